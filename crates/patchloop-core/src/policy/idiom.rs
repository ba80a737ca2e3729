//! Shell-idiom detection for textual commands before argv tokenisation.
//!
//! Applied to any command text *before* it is turned into an argv vector.
//! Uses `shell-words` for lexical tokenisation so quoted metacharacters
//! (`python -c "print(1 > 0)"`) are not mistaken for shell syntax; falls
//! back to a conservative regex scan if tokenisation itself fails.

use std::sync::OnceLock;

use regex::Regex;

/// A single textual command was rejected for containing shell syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellIdiomViolation {
    pub pattern: String,
}

fn inline_env_assignment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*=\S+\s+").unwrap())
}

fn bare_redirect_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[^"']\s*[><|]\s*[^"'=]"#).unwrap())
}

const RAW_REJECTS: &[&str] = &[";", "&&", "||", "$(", "`"];

/// Scans raw command text for metacharacters that are never valid even
/// inside a well-formed argv (newlines, inline env assignment prefix,
/// command substitution). These are checked before tokenisation because
/// they are unambiguous regardless of quoting.
fn scan_raw(text: &str) -> Option<ShellIdiomViolation> {
    if text.contains('\n') {
        return Some(ShellIdiomViolation {
            pattern: "embedded newline".to_string(),
        });
    }
    for pat in RAW_REJECTS {
        if text.contains(pat) {
            return Some(ShellIdiomViolation {
                pattern: (*pat).to_string(),
            });
        }
    }
    if inline_env_assignment_re().is_match(text) {
        return Some(ShellIdiomViolation {
            pattern: "inline env assignment".to_string(),
        });
    }
    if text.trim_start().starts_with("cd ") {
        return Some(ShellIdiomViolation {
            pattern: "leading cd".to_string(),
        });
    }
    None
}

/// True unquoted pipe/redirect metacharacters: `|`, `>`, `<`, `>>`. Checked
/// token-by-token after lexical tokenisation so a quoted `>` inside a
/// string literal (`python -c "print(1 > 0)"`) is not flagged.
fn scan_tokens(tokens: &[String]) -> Option<ShellIdiomViolation> {
    for tok in tokens {
        if tok == "cd" {
            return Some(ShellIdiomViolation {
                pattern: "cd".to_string(),
            });
        }
        for meta in ["|", ">", "<", ">>"] {
            if tok == meta {
                return Some(ShellIdiomViolation {
                    pattern: meta.to_string(),
                });
            }
        }
    }
    None
}

/// True if `text` contains any shell metacharacter outside of a quoted
/// argument. Must accept `python -c "print(1 > 0)"` and reject
/// `echo hello > out.txt`.
pub fn detect_shell_idiom(text: &str) -> Option<ShellIdiomViolation> {
    if let Some(v) = scan_raw(text) {
        return Some(v);
    }

    match shell_words::split(text) {
        Ok(tokens) => scan_tokens(&tokens),
        Err(_) => {
            // Tokenisation failed (unbalanced quotes etc); fall back to a
            // conservative raw regex scan of the unquoted-looking text.
            if bare_redirect_re().is_match(text) {
                Some(ShellIdiomViolation {
                    pattern: "unparseable command with redirect-like syntax".to_string(),
                })
            } else {
                None
            }
        }
    }
}

/// True if the tokenised argv list itself contains a `cd` anywhere, even
/// if the caller supplied argv directly rather than a textual command.
pub fn argv_contains_cd(argv: &[String]) -> bool {
    argv.iter().any(|a| a == "cd")
}
