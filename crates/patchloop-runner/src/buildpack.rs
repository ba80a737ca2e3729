//! Concrete `Buildpack` providers. Detection runs against the repo's file
//! listing only (no filesystem access beyond the tree snapshot the sandbox
//! already produced); install/test/focus plans are static per language.

use patchloop_core::collaborators::Buildpack;
use patchloop_core::command::Command;

const PYTHON_SYSDEPS: &[&str] = &["build-essential", "libffi-dev", "libssl-dev"];
const NODE_SYSDEPS: &[&str] = &["python3", "make", "g++"];

/// Detects a Python project via `pyproject.toml`, `requirements.txt`, or
/// `setup.py` at the repo root.
pub struct PythonBuildpack;

impl Buildpack for PythonBuildpack {
    fn name(&self) -> &'static str {
        "python"
    }

    fn detect(&self, repo_files: &[String]) -> f64 {
        let markers = ["pyproject.toml", "requirements.txt", "setup.py", "setup.cfg", "Pipfile"];
        if repo_files.iter().any(|f| markers.contains(&f.as_str())) {
            0.9
        } else if repo_files.iter().any(|f| f.ends_with(".py")) {
            0.4
        } else {
            0.0
        }
    }

    fn image(&self) -> &str {
        "python:3.11-slim"
    }

    fn install_steps(&self) -> Vec<Command> {
        vec![
            Command::new(
                vec!["pip".into(), "install".into(), "--upgrade".into(), "pip".into()],
                "/repo",
                120,
            )
            .with_network(true),
            Command::new(
                vec![
                    "sh".into(),
                    "-c".into(),
                    "if [ -f requirements.txt ]; then pip install -r requirements.txt; \
                     elif [ -f pyproject.toml ]; then pip install -e .; \
                     elif [ -f setup.py ]; then pip install -e .; fi"
                        .into(),
                ],
                "/repo",
                600,
            )
            .with_network(true),
            Command::new(vec!["pip".into(), "install".into(), "pytest".into()], "/repo", 120)
                .with_network(true),
        ]
    }

    fn test_plan(&self) -> Vec<String> {
        vec!["pytest".into(), "-q".into()]
    }

    fn focus_plan(&self, failing_test_path: &str) -> Vec<String> {
        vec!["pytest".into(), "-q".into(), failing_test_path.into()]
    }

    fn sysdeps_whitelist(&self) -> &[&'static str] {
        PYTHON_SYSDEPS
    }
}

/// Detects a Node project via `package.json` at the repo root.
pub struct NodeBuildpack;

impl Buildpack for NodeBuildpack {
    fn name(&self) -> &'static str {
        "node"
    }

    fn detect(&self, repo_files: &[String]) -> f64 {
        if repo_files.iter().any(|f| f == "package.json") {
            0.9
        } else if repo_files.iter().any(|f| f.ends_with(".js") || f.ends_with(".ts")) {
            0.3
        } else {
            0.0
        }
    }

    fn image(&self) -> &str {
        "node:20-slim"
    }

    fn install_steps(&self) -> Vec<Command> {
        vec![Command::new(
            vec![
                "sh".into(),
                "-c".into(),
                "if [ -f package-lock.json ]; then npm ci; else npm install; fi".into(),
            ],
            "/repo",
            600,
        )
        .with_network(true)]
    }

    fn test_plan(&self) -> Vec<String> {
        vec!["npm".into(), "test".into()]
    }

    /// Routes through `npx jest` so the executor's npx network carve-out
    /// applies; a focused run otherwise behaves like any other test
    /// invocation.
    fn focus_plan(&self, failing_test_path: &str) -> Vec<String> {
        vec!["npx".into(), "jest".into(), failing_test_path.into()]
    }

    fn sysdeps_whitelist(&self) -> &[&'static str] {
        NODE_SYSDEPS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_detects_on_pyproject() {
        let bp = PythonBuildpack;
        assert!(bp.detect(&["pyproject.toml".to_string()]) > 0.5);
    }

    #[test]
    fn test_python_weak_signal_on_loose_py_files() {
        let bp = PythonBuildpack;
        let conf = bp.detect(&["scripts/tool.py".to_string()]);
        assert!(conf > 0.0 && conf < 0.5);
    }

    #[test]
    fn test_python_no_signal_on_unrelated_tree() {
        let bp = PythonBuildpack;
        assert_eq!(bp.detect(&["README.md".to_string()]), 0.0);
    }

    #[test]
    fn test_python_install_steps_include_pytest() {
        let bp = PythonBuildpack;
        let steps = bp.install_steps();
        assert!(steps.iter().any(|c| c.argv.contains(&"pytest".to_string())));
    }

    #[test]
    fn test_python_focus_plan_includes_path() {
        let bp = PythonBuildpack;
        let plan = bp.focus_plan("tests/test_x.py");
        assert_eq!(plan, vec!["pytest", "-q", "tests/test_x.py"]);
    }

    #[test]
    fn test_node_detects_on_package_json() {
        let bp = NodeBuildpack;
        assert!(bp.detect(&["package.json".to_string()]) > 0.5);
    }

    #[test]
    fn test_node_no_signal_on_unrelated_tree() {
        let bp = NodeBuildpack;
        assert_eq!(bp.detect(&["README.md".to_string()]), 0.0);
    }

    #[test]
    fn test_node_focus_plan_uses_npx() {
        let bp = NodeBuildpack;
        let plan = bp.focus_plan("tests/x.test.js");
        assert_eq!(plan[0], "npx");
        assert!(plan.contains(&"tests/x.test.js".to_string()));
    }

    #[test]
    fn test_names_match_language_labels() {
        assert_eq!(PythonBuildpack.name(), "python");
        assert_eq!(NodeBuildpack.name(), "node");
    }
}
