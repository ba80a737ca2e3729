//! Domain models for the repair controller.
//!
//! Canonical definitions for the core entities that flow through every
//! phase: run identity, the phase state machine, failure/verify results,
//! context signatures, and diffs.

pub mod context_signature;
pub mod diff;
pub mod digest;
pub mod error;
pub mod failure;
pub mod phase;
pub mod run;

pub use context_signature::ContextSignature;
pub use diff::Diff;
pub use error::{ControllerError, Result};
pub use failure::{FailureInfo, VerifyResult};
pub use phase::{Phase, PhaseTransition};
pub use run::{RunHeader, TimeMode};
