//! `PromptBuilder`: deterministically serializes controller state into a
//! single labelled-section string for the model call.

const FAILURE_OUTPUT_MAX: usize = 45 * 1024;
const REPO_TREE_MAX: usize = 20 * 1024;
const FILE_MAX: usize = 120 * 1024;
const ACTION_PRIORS_MAX: usize = 12 * 1024;
const OBSERVATIONS_MAX: usize = 30 * 1024;

const TRUNCATION_MARKER: &str = "\n...<truncated>";

/// Mode-specific goal framing: repair carries an intent/subgoal pair,
/// feature mode carries a description, acceptance criteria, and subgoal
/// progress.
#[derive(Debug, Clone)]
pub enum GoalSection {
    Repair { intent: String, subgoal: String },
    Feature {
        description: String,
        acceptance_criteria: Vec<String>,
        completed_subgoals: Vec<String>,
        current_subgoal: String,
    },
}

#[derive(Debug, Clone)]
pub struct LabelledFile {
    pub path: String,
    pub content: String,
}

/// Truncates `text` to `max_bytes`, preserving the head and appending a
/// marker when truncation occurred. Cuts on a UTF-8 boundary.
fn truncate_with_marker(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &text[..end], TRUNCATION_MARKER)
}

/// Builds the single prompt string the model receives, in a fixed section
/// order so replays with the same state produce byte-identical prompts.
pub struct PromptBuilder {
    goal: GoalSection,
    test_command: String,
    focus_test_command: Option<String>,
    failure_output: String,
    repo_tree: Vec<String>,
    constraints: Vec<String>,
    files: Vec<LabelledFile>,
    action_priors: Option<String>,
    observations: Option<String>,
}

impl PromptBuilder {
    pub fn new(goal: GoalSection, test_command: impl Into<String>) -> Self {
        Self {
            goal,
            test_command: test_command.into(),
            focus_test_command: None,
            failure_output: String::new(),
            repo_tree: Vec::new(),
            constraints: Vec::new(),
            files: Vec::new(),
            action_priors: None,
            observations: None,
        }
    }

    pub fn with_focus_test_command(mut self, cmd: impl Into<String>) -> Self {
        self.focus_test_command = Some(cmd.into());
        self
    }

    pub fn with_failure_output(mut self, output: impl Into<String>) -> Self {
        self.failure_output = output.into();
        self
    }

    pub fn with_repo_tree(mut self, tree: Vec<String>) -> Self {
        self.repo_tree = tree;
        self
    }

    pub fn with_constraints(mut self, constraints: Vec<String>) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_files(mut self, files: Vec<LabelledFile>) -> Self {
        self.files = files;
        self
    }

    pub fn with_action_priors(mut self, priors: impl Into<String>) -> Self {
        self.action_priors = Some(priors.into());
        self
    }

    pub fn with_observations(mut self, observations: impl Into<String>) -> Self {
        self.observations = Some(observations.into());
        self
    }

    pub fn build(&self) -> String {
        let mut sections = Vec::new();

        match &self.goal {
            GoalSection::Repair { intent, subgoal } => {
                sections.push("GOAL:\nrepair the failing test suite".to_string());
                sections.push(format!("INTENT: {intent}\nSUBGOAL: {subgoal}"));
            }
            GoalSection::Feature {
                description,
                acceptance_criteria,
                completed_subgoals,
                current_subgoal,
            } => {
                sections.push("GOAL:\nimplement the requested feature".to_string());
                sections.push(format!("FEATURE_DESCRIPTION:\n{description}"));
                sections.push(format!("ACCEPTANCE_CRITERIA:\n{}", acceptance_criteria.join("\n")));
                sections.push(format!("COMPLETED_SUBGOALS:\n{}", completed_subgoals.join("\n")));
                sections.push(format!("CURRENT_SUBGOAL:\n{current_subgoal}"));
            }
        }

        sections.push(format!("TEST_COMMAND:\n{}", self.test_command));
        if let Some(focus) = &self.focus_test_command {
            sections.push(format!("FOCUS_TEST_COMMAND:\n{focus}"));
        }

        sections.push(format!(
            "FAILURE_OUTPUT:\n{}",
            truncate_with_marker(&self.failure_output, FAILURE_OUTPUT_MAX)
        ));

        let tree_text = self.repo_tree.join("\n");
        sections.push(format!("REPO_TREE:\n{}", truncate_with_marker(&tree_text, REPO_TREE_MAX)));

        if !self.constraints.is_empty() {
            sections.push(format!("CONSTRAINTS:\n{}", self.constraints.join("\n")));
        }

        for file in &self.files {
            sections.push(format!(
                "[path: {}]\n{}",
                file.path,
                truncate_with_marker(&file.content, FILE_MAX)
            ));
        }

        if let Some(priors) = &self.action_priors {
            sections.push(format!("ACTION_PRIORS:\n{}", truncate_with_marker(priors, ACTION_PRIORS_MAX)));
        }

        if let Some(observations) = &self.observations {
            sections.push(format!(
                "OBSERVATIONS:\n{}",
                truncate_with_marker(observations, OBSERVATIONS_MAX)
            ));
        }

        sections.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repair_goal() -> GoalSection {
        GoalSection::Repair {
            intent: "import".to_string(),
            subgoal: "resolve the missing import".to_string(),
        }
    }

    #[test]
    fn test_build_includes_goal_and_test_command() {
        let prompt = PromptBuilder::new(repair_goal(), "pytest -q").build();
        assert!(prompt.contains("GOAL:"));
        assert!(prompt.contains("INTENT: import"));
        assert!(prompt.contains("TEST_COMMAND:\npytest -q"));
    }

    #[test]
    fn test_feature_mode_includes_acceptance_criteria() {
        let goal = GoalSection::Feature {
            description: "add a /health endpoint".to_string(),
            acceptance_criteria: vec!["returns 200".to_string()],
            completed_subgoals: vec![],
            current_subgoal: "write the handler".to_string(),
        };
        let prompt = PromptBuilder::new(goal, "pytest -q").build();
        assert!(prompt.contains("FEATURE_DESCRIPTION:"));
        assert!(prompt.contains("ACCEPTANCE_CRITERIA:\nreturns 200"));
        assert!(prompt.contains("CURRENT_SUBGOAL:\nwrite the handler"));
    }

    #[test]
    fn test_failure_output_truncated_with_marker() {
        let huge = "x".repeat(FAILURE_OUTPUT_MAX + 100);
        let prompt = PromptBuilder::new(repair_goal(), "pytest -q")
            .with_failure_output(huge)
            .build();
        assert!(prompt.contains(TRUNCATION_MARKER));
    }

    #[test]
    fn test_small_failure_output_not_truncated() {
        let prompt = PromptBuilder::new(repair_goal(), "pytest -q")
            .with_failure_output("short failure")
            .build();
        assert!(!prompt.contains(TRUNCATION_MARKER));
        assert!(prompt.contains("short failure"));
    }

    #[test]
    fn test_files_are_labelled_and_truncated() {
        let huge_file = LabelledFile {
            path: "src/app.py".to_string(),
            content: "y".repeat(FILE_MAX + 10),
        };
        let prompt = PromptBuilder::new(repair_goal(), "pytest -q")
            .with_files(vec![huge_file])
            .build();
        assert!(prompt.contains("[path: src/app.py]"));
        assert!(prompt.contains(TRUNCATION_MARKER));
    }

    #[test]
    fn test_optional_sections_omitted_when_absent() {
        let prompt = PromptBuilder::new(repair_goal(), "pytest -q").build();
        assert!(!prompt.contains("ACTION_PRIORS:"));
        assert!(!prompt.contains("OBSERVATIONS:"));
        assert!(!prompt.contains("FOCUS_TEST_COMMAND:"));
    }

    #[test]
    fn test_optional_sections_present_when_set() {
        let prompt = PromptBuilder::new(repair_goal(), "pytest -q")
            .with_focus_test_command("pytest -q tests/test_x.py")
            .with_action_priors("tool_request,success_rate=0.8")
            .with_observations("read src/app.py: saw import foo")
            .build();
        assert!(prompt.contains("FOCUS_TEST_COMMAND:\npytest -q tests/test_x.py"));
        assert!(prompt.contains("ACTION_PRIORS:"));
        assert!(prompt.contains("OBSERVATIONS:"));
    }

    #[test]
    fn test_build_is_deterministic() {
        let builder = PromptBuilder::new(repair_goal(), "pytest -q").with_constraints(vec!["no network".to_string()]);
        assert_eq!(builder.build(), builder.build());
    }
}
