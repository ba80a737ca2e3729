//! Combines the individual per-toolchain trace parsers behind the single
//! `TraceParser` seam `ControllerLoop::new` expects, since buildpack
//! selection (and so the right parser) is only known once a run is
//! already underway.

use patchloop_core::collaborators::TraceParser;
use patchloop_core::domain::FailureInfo;
use patchloop_runner::{JestTraceParser, PytestTraceParser};

/// Tries the pytest parser first; falls back to the Jest parser whenever
/// pytest finds no failing tests, so a Node repo's output still yields a
/// useful `FailureInfo` instead of an empty one.
pub struct CompositeTraceParser {
    pytest: PytestTraceParser,
    jest: JestTraceParser,
}

impl CompositeTraceParser {
    pub fn new() -> Self {
        Self {
            pytest: PytestTraceParser,
            jest: JestTraceParser,
        }
    }
}

impl Default for CompositeTraceParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceParser for CompositeTraceParser {
    fn parse(&self, stdout: &str, stderr: &str) -> FailureInfo {
        let info = self.pytest.parse(stdout, stderr);
        if !info.failing_tests.is_empty() || !info.likely_files.is_empty() {
            return info;
        }
        self.jest.parse(stdout, stderr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_falls_back_to_jest_when_pytest_finds_nothing() {
        let output = "FAIL src/app.test.js\n  \u{2715} renders without crashing (12 ms)\n\nTypeError: Cannot read properties of undefined\n";
        let info = CompositeTraceParser::new().parse(output, "");
        assert_eq!(info.likely_files, vec!["src/app.test.js".to_string()]);
    }

    #[test]
    fn test_prefers_pytest_when_it_matches() {
        let output = "FAILED tests/test_app.py::test_two - ModuleNotFoundError: No module named 'foo'\n";
        let info = CompositeTraceParser::new().parse(output, "");
        assert_eq!(info.failing_tests, vec!["tests/test_app.py".to_string()]);
    }
}
