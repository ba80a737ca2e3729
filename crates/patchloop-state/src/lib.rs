//! Persistent action-outcome memory for the repair controller.
//!
//! Stores `(context, action, outcome)` rows in an embedded SurrealDB
//! instance and serves decayed, similarity-weighted priors back to the
//! controller loop before it calls the model.

pub mod error;
pub mod handle;
pub mod schema;

pub use error::{MemoryError, Result};
pub use handle::{ActionMemory, MemoryConfig, QueryContext};
pub use schema::{ActionOutcomeRecord, ActionPrior, ActionType, IngestOffset, Outcome};

use sha2::{Digest, Sha256};

/// SHA-256 hex digest, used for `event_hash` computation.
pub(crate) fn digest_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
