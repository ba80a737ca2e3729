//! `CommandPolicy`: two layers consulted before any executor call.
//!
//! 1. A global denylist / shell-idiom filter applied to the textual form
//!    of a command before argv tokenisation.
//! 2. A per-language allowlist on the tokenised argv[0].

pub mod allowlist;
pub mod idiom;

use std::sync::OnceLock;

use regex::Regex;

pub use allowlist::Language;

/// Why a command was rejected by `CommandPolicy::check`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyRejection {
    ShellIdiom(String),
    CredentialPattern(String),
    DeniedCommand(String),
    NotAllowlisted { argv0: String, preview: String },
    Empty,
}

impl std::fmt::Display for PolicyRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyRejection::ShellIdiom(p) => write!(f, "shell idiom detected: {p}"),
            PolicyRejection::CredentialPattern(p) => write!(f, "credential pattern detected: {p}"),
            PolicyRejection::DeniedCommand(c) => write!(f, "command '{c}' is globally denied"),
            PolicyRejection::NotAllowlisted { argv0, preview } => {
                write!(f, "command '{argv0}' is not in allowlist; allowed commands include: {preview}")
            }
            PolicyRejection::Empty => write!(f, "empty command"),
        }
    }
}

fn credential_pattern_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(API_KEY|SECRET|id_rsa|id_ed25519|/etc/shadow|\.ssh/|ANTHROPIC_API_KEY)").unwrap()
    })
}

/// The combined denylist + allowlist gate. Stateless: constructed fresh
/// per check, or shared, since it holds no mutable state.
#[derive(Debug, Clone, Copy)]
pub struct CommandPolicy {
    pub language: Language,
}

impl CommandPolicy {
    pub fn new(language: Language) -> Self {
        Self { language }
    }

    /// Checks a textual command (as the model would propose it) against
    /// both policy layers. Returns `Ok(argv)` on success.
    pub fn check_text(&self, text: &str) -> Result<Vec<String>, PolicyRejection> {
        if let Some(v) = idiom::detect_shell_idiom(text) {
            return Err(PolicyRejection::ShellIdiom(v.pattern));
        }
        if let Some(m) = credential_pattern_re().find(text) {
            return Err(PolicyRejection::CredentialPattern(m.as_str().to_string()));
        }
        let argv = shell_words::split(text).map_err(|_| PolicyRejection::Empty)?;
        self.check_argv(&argv)?;
        Ok(argv)
    }

    /// Checks an already-tokenised argv vector (tool requests that bypass
    /// textual parsing still go through this, per the no-shell invariant).
    pub fn check_argv(&self, argv: &[String]) -> Result<(), PolicyRejection> {
        let argv0 = argv.first().ok_or(PolicyRejection::Empty)?;

        if idiom::argv_contains_cd(argv) {
            return Err(PolicyRejection::ShellIdiom("cd".to_string()));
        }

        if allowlist::GLOBAL_DENYLIST.contains(&argv0.as_str()) {
            return Err(PolicyRejection::DeniedCommand(argv0.clone()));
        }

        let allowed = allowlist::allowlist_for(self.language);
        if !allowed.contains(argv0.as_str()) {
            return Err(PolicyRejection::NotAllowlisted {
                argv0: argv0.clone(),
                preview: allowlist::preview(self.language, 10),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_allowlisted_python_command() {
        let policy = CommandPolicy::new(Language::Python);
        assert!(policy.check_text("pytest -q tests/test_app.py").is_ok());
    }

    #[test]
    fn test_rejects_shell_idiom() {
        let policy = CommandPolicy::new(Language::Node);
        let err = policy.check_text("npm install && npm test").unwrap_err();
        assert!(matches!(err, PolicyRejection::ShellIdiom(_)));
    }

    #[test]
    fn test_rejects_credential_pattern() {
        let policy = CommandPolicy::new(Language::Python);
        let err = policy.check_text("cat /etc/shadow").unwrap_err();
        assert!(matches!(err, PolicyRejection::CredentialPattern(_)));
    }

    #[test]
    fn test_rejects_denied_command() {
        let policy = CommandPolicy::new(Language::Python);
        let err = policy.check_text("curl https://example.com").unwrap_err();
        assert!(matches!(err, PolicyRejection::DeniedCommand(_)));
    }

    #[test]
    fn test_rejects_not_allowlisted() {
        let policy = CommandPolicy::new(Language::Rust);
        let err = policy.check_text("pytest -q").unwrap_err();
        assert!(matches!(err, PolicyRejection::NotAllowlisted { .. }));
    }

    #[test]
    fn test_accepts_python_comparison_in_quotes() {
        let policy = CommandPolicy::new(Language::Python);
        assert!(policy.check_text(r#"python -c "print(1 > 0)""#).is_ok());
    }

    #[test]
    fn test_rejects_bare_redirect() {
        let policy = CommandPolicy::new(Language::Python);
        assert!(policy.check_text("echo hello > out.txt").is_err());
    }

    #[test]
    fn test_argv_path_also_rejects_cd() {
        let policy = CommandPolicy::new(Language::Python);
        let err = policy.check_argv(&["pytest".into(), "cd".into()]).unwrap_err();
        assert!(matches!(err, PolicyRejection::ShellIdiom(_)));
    }
}
