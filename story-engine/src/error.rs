//! Engine error taxonomy.
//!
//! Stage-level failures travel as `StageResult { success: false, .. }`
//! values, never as errors across stage boundaries. The variants here cover
//! everything fatal to a run (or to the remainder of one) plus the
//! non-fatal persistence case, which callers log and swallow.

use story_engine_sdk::{Capability, CapabilityError, RepositoryError};

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The routing capability's response could not be parsed into a
    /// decision. Fatal, nothing has executed yet.
    #[error("routing response malformed: {0}")]
    RoutingMalformed(String),

    /// A capability name outside the closed set. Fails fast before any
    /// session setup.
    #[error("unknown capability: {0}")]
    UnknownCapability(String),

    /// A stage's prerequisite context is absent from both the current run
    /// and the selected content.
    #[error("{stage} requires {missing} context, which was neither generated in this run nor selected")]
    MissingContext {
        stage: Capability,
        missing: &'static str,
    },

    /// The capability runtime failed or timed out.
    #[error("capability {capability} failed: {source}")]
    CapabilityCall {
        capability: Capability,
        #[source]
        source: CapabilityError,
    },

    /// Durable storage failed. Non-fatal: generated content is still
    /// returned to the caller.
    #[error(transparent)]
    Persistence(#[from] RepositoryError),
}
