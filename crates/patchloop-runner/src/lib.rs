//! patchloop-runner: the table-driven collaborators the controller loop
//! consumes through `patchloop-core`'s trait seams — per-language buildpack
//! providers and test-output trace parsers.
//!
//! Nothing here talks to the sandbox or executor directly: a `Buildpack`
//! only describes install/test commands, and a `TraceParser` only turns
//! stdout/stderr text into a `FailureInfo`. The controller loop is what
//! actually runs those commands and interprets the result.

pub mod buildpack;
pub mod trace_parser;

pub use buildpack::{NodeBuildpack, PythonBuildpack};
pub use trace_parser::{JestTraceParser, PytestTraceParser};

use patchloop_core::collaborators::Buildpack;

/// The default buildpack set, in detection-priority order. Used by
/// `ControllerLoop::select_buildpack` to pick the highest-confidence match
/// for a repo's file tree.
pub fn default_buildpacks() -> Vec<Box<dyn Buildpack>> {
    vec![Box::new(PythonBuildpack), Box::new(NodeBuildpack)]
}
