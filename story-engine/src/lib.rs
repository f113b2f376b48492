//! Workflow orchestration engine for multi-stage story generation.
//!
//! Given a user request, the engine asks the routing capability which
//! generation stages to run (plot, author, world, characters, critique),
//! runs them in dependency order while streaming partial output to the
//! caller, and can drive a bounded critique → enhance → score refinement
//! loop until a quality threshold or the iteration budget is hit.
//!
//! The external world — the LLM runtime and durable storage — is reached
//! through the `CapabilityClient` and `ArtifactRepository` traits from
//! `story-engine-sdk`; everything in this crate is transport-agnostic.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod improvement;
pub mod json;
pub mod orchestrator;
pub mod repository;
pub mod routing;
pub mod session;
pub mod stage;

pub use config::EngineConfig;
pub use error::EngineError;
pub use orchestrator::Orchestrator;
