//! Per-language argv[0] allowlists, combined with a base set of safe
//! unix utilities and `git`. An unknown language silently falls back to
//! the Python allowlist (see §9's open question on whether that default
//! is desired).

use std::collections::BTreeSet;

/// The languages a buildpack can report; `Other` covers anything the
/// detector could not classify, and resolves to the Python allowlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
    Node,
    Rust,
    Go,
    Java,
    DotNet,
    Other,
}

const BASE: &[&str] = &[
    "git", "cat", "head", "tail", "grep", "find", "ls", "pwd", "echo", "mkdir", "rm", "cp", "mv", "touch",
    "chmod", "sed", "awk", "sort", "uniq", "wc", "diff", "patch", "tar", "unzip", "make",
];

const PYTHON: &[&str] = &[
    "pytest", "python", "python3", "pip", "pip3", "pipenv", "poetry", "ruff", "mypy", "black", "flake8", "pylint",
];

const NODE: &[&str] = &[
    "node", "npm", "yarn", "pnpm", "npx", "bun", "tsc", "jest", "mocha", "eslint", "prettier",
];

const RUST: &[&str] = &["cargo", "rustc", "rustup", "rustfmt", "clippy-driver"];

const GO: &[&str] = &["go", "gofmt", "golint"];

const JAVA: &[&str] = &["mvn", "gradle", "javac", "java"];

const DOTNET: &[&str] = &["dotnet"];

/// Global denylist: never permitted regardless of detected language.
pub const GLOBAL_DENYLIST: &[&str] = &[
    "curl", "wget", "ssh", "scp", "rsync", "nc", "netcat", "telnet", "ftp", "sftp", "sudo", "su", "docker",
    "kubectl", "systemctl", "service", "crontab", "at", "nohup", "screen", "tmux",
];

/// The permitted argv[0] set for a given language: base unix utilities
/// plus that language's tools.
pub fn allowlist_for(language: Language) -> BTreeSet<&'static str> {
    let lang_set: &[&str] = match language {
        Language::Python | Language::Other => PYTHON,
        Language::Node => NODE,
        Language::Rust => RUST,
        Language::Go => GO,
        Language::Java => JAVA,
        Language::DotNet => DOTNET,
    };
    BASE.iter().chain(lang_set.iter()).copied().collect()
}

/// A short, deterministic preview of the allowed commands, used in
/// rejection messages so the model has something concrete to retry with.
pub fn preview(language: Language, max: usize) -> String {
    let set = allowlist_for(language);
    let preview: Vec<&str> = set.into_iter().take(max).collect();
    preview.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_language_falls_back_to_python() {
        let python = allowlist_for(Language::Python);
        let other = allowlist_for(Language::Other);
        assert_eq!(python, other);
    }

    #[test]
    fn test_base_commands_present_in_every_language() {
        for lang in [Language::Python, Language::Node, Language::Rust, Language::Go, Language::Java, Language::DotNet]
        {
            let set = allowlist_for(lang);
            assert!(set.contains("git"));
            assert!(set.contains("grep"));
        }
    }

    #[test]
    fn test_node_does_not_include_python_tools() {
        let set = allowlist_for(Language::Node);
        assert!(set.contains("npm"));
        assert!(!set.contains("pytest"));
    }

    #[test]
    fn test_global_denylist_excludes_docker() {
        assert!(GLOBAL_DENYLIST.contains(&"docker"));
    }

    #[test]
    fn test_preview_is_bounded() {
        let p = preview(Language::Python, 3);
        assert_eq!(p.split(", ").count(), 3);
    }
}
