//! Shared vocabulary for the story-engine orchestrator.
//!
//! This crate holds the types that cross the boundary between the engine and
//! its hosts: the inbound request shape, the closed capability set, the
//! collaborator traits for capability invocation and artifact persistence,
//! the outbound streaming event contract, and structured log events for
//! host UIs.

use std::collections::HashMap;
use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// Re-export async trait for convenience
pub use async_trait::async_trait;

/// Structured fields of a generated artifact, as parsed from capability output.
pub type Fields = serde_json::Map<String, Value>;

// ============================================================================
// Inbound request
// ============================================================================

/// Content the user selected in the client before sending the message.
///
/// Lets a workflow reuse an existing artifact (for example a saved plot) as
/// upstream context instead of regenerating it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedContent {
    /// Opaque repository id; issued ids are UUIDs but the engine never
    /// assumes that.
    pub content_id: String,
    pub content_type: String,
    #[serde(default)]
    pub content_title: Option<String>,
}

/// One inbound user message, created once per request and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub user_message: String,
    pub user_id: String,
    pub session_id: String,
    #[serde(default)]
    pub selected_content: Option<SelectedContent>,
}

// ============================================================================
// Capabilities
// ============================================================================

/// The closed set of external text-generation capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Routing,
    Plot,
    Author,
    World,
    Characters,
    Critique,
    Enhancement,
    Scoring,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Routing => "routing",
            Capability::Plot => "plot",
            Capability::Author => "author",
            Capability::World => "world",
            Capability::Characters => "characters",
            Capability::Critique => "critique",
            Capability::Enhancement => "enhancement",
            Capability::Scoring => "scoring",
        }
    }

    /// Parse a capability name; `None` for anything outside the closed set.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "routing" => Some(Capability::Routing),
            "plot" => Some(Capability::Plot),
            "author" => Some(Capability::Author),
            "world" | "world_building" => Some(Capability::World),
            "characters" => Some(Capability::Characters),
            "critique" => Some(Capability::Critique),
            "enhancement" => Some(Capability::Enhancement),
            "scoring" => Some(Capability::Scoring),
            _ => None,
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One capability invocation: the composed message plus the identifiers the
/// runtime needs to key conversational state.
#[derive(Debug, Clone)]
pub struct CapabilityCall {
    pub capability: Capability,
    pub message: String,
    /// Sub-session id, deterministic per `(session_id, capability)`.
    pub session_id: String,
    pub user_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("capability transport error: {0}")]
    Transport(String),
    #[error("capability stream interrupted: {0}")]
    Interrupted(String),
}

/// Ordered stream of text chunks emitted by a capability. Non-streaming
/// runtimes yield the whole response as a single chunk.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, CapabilityError>> + Send>>;

/// External capability runtime (the LLM/agent side of the system).
#[async_trait]
pub trait CapabilityClient: Send + Sync {
    async fn invoke(&self, call: CapabilityCall) -> Result<ChunkStream, CapabilityError>;
}

// ============================================================================
// Artifact repository
// ============================================================================

/// Kinds of persisted structured content records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Plot,
    Author,
    World,
    Characters,
    Critique,
    Enhancement,
    Score,
    ImprovementSession,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Plot => "plot",
            ArtifactKind::Author => "author",
            ArtifactKind::World => "world",
            ArtifactKind::Characters => "characters",
            ArtifactKind::Critique => "critique",
            ArtifactKind::Enhancement => "enhancement",
            ArtifactKind::Score => "score",
            ArtifactKind::ImprovementSession => "improvement_session",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "plot" => Some(ArtifactKind::Plot),
            "author" => Some(ArtifactKind::Author),
            "world" | "world_building" => Some(ArtifactKind::World),
            "characters" => Some(ArtifactKind::Characters),
            "critique" => Some(ArtifactKind::Critique),
            "enhancement" => Some(ArtifactKind::Enhancement),
            "score" => Some(ArtifactKind::Score),
            "improvement_session" => Some(ArtifactKind::ImprovementSession),
            _ => None,
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("artifact storage error: {0}")]
    Storage(String),
    #[error("artifact not found: {kind} {id}")]
    NotFound { kind: ArtifactKind, id: String },
}

/// Persistence collaborator. Artifacts are owned by the repository; the
/// engine only holds their ids once issued, and reads them back as opaque
/// strings.
#[async_trait]
pub trait ArtifactRepository: Send + Sync {
    /// Persist a new artifact and return its id.
    async fn save(
        &self,
        kind: ArtifactKind,
        fields: &Fields,
        session_id: &str,
        user_id: &str,
        parent_refs: &HashMap<String, Value>,
    ) -> Result<Uuid, RepositoryError>;

    /// Fetch an artifact's structured fields, `None` if it does not exist.
    async fn get_by_id(
        &self,
        kind: ArtifactKind,
        id: &str,
    ) -> Result<Option<Fields>, RepositoryError>;

    /// Overwrite an existing artifact's structured fields.
    async fn update(
        &self,
        kind: ArtifactKind,
        id: &str,
        fields: &Fields,
    ) -> Result<(), RepositoryError>;
}

// ============================================================================
// Outbound events
// ============================================================================

/// Ids of everything persisted during one run, keyed for the client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SavedData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plot_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub world_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub characters_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub critique_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub improvement_session_id: Option<Uuid>,
}

impl SavedData {
    pub fn record(&mut self, kind: ArtifactKind, id: Uuid) {
        match kind {
            ArtifactKind::Plot => self.plot_id = Some(id),
            ArtifactKind::Author => self.author_id = Some(id),
            ArtifactKind::World => self.world_id = Some(id),
            ArtifactKind::Characters => self.characters_id = Some(id),
            ArtifactKind::Critique => self.critique_id = Some(id),
            ArtifactKind::ImprovementSession => self.improvement_session_id = Some(id),
            // Intermediate loop artifacts are not surfaced to the client
            ArtifactKind::Enhancement | ArtifactKind::Score => {}
        }
    }
}

/// One stage's outcome as reported in the terminal event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub agent_name: String,
    pub success: bool,
    /// Structured fields on success, raw text otherwise.
    pub content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Terminal event closing one request. Every request receives exactly one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalEvent {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub responses: Vec<StageReport>,
    pub saved_data: SavedData,
    pub complete: bool,
}

/// Outbound streaming contract: zero or more chunk events per stage, then
/// one terminal event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundEvent {
    Chunk {
        agent_name: String,
        chunk: String,
        complete: bool,
    },
    Terminal(TerminalEvent),
}

impl OutboundEvent {
    pub fn chunk(agent_name: impl Into<String>, chunk: impl Into<String>) -> Self {
        OutboundEvent::Chunk {
            agent_name: agent_name.into(),
            chunk: chunk.into(),
            complete: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboundEvent::Terminal(_))
    }
}

// ============================================================================
// Structured engine logs
// ============================================================================

/// Structured log events emitted by the engine for host UIs and dashboards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineLog {
    /// Run accepted, session context created
    RunStarted {
        session_id: String,
        user_id: String,
    },
    /// Routing decision resolved to a workflow
    RoutingResolved {
        session_id: String,
        route: String,
        stages: Vec<String>,
    },
    /// Stage invocation started
    StageStarted {
        session_id: String,
        capability: String,
    },
    /// Stage finished with a validated result
    StageCompleted {
        session_id: String,
        capability: String,
        artifact_id: Option<Uuid>,
    },
    /// Stage failed; remaining stages halt
    StageFailed {
        session_id: String,
        capability: String,
        error: String,
    },
    /// Improvement loop iteration started
    IterationStarted {
        session_id: String,
        number: u32,
    },
    /// Improvement loop iteration scored
    IterationScored {
        session_id: String,
        number: u32,
        score: f64,
    },
    /// Improvement loop finished
    LoopCompleted {
        session_id: String,
        iterations: u32,
        reason: String,
    },
    /// Artifact persistence was skipped after an error (non-fatal)
    PersistenceSkipped {
        session_id: String,
        kind: String,
        error: String,
    },
}

impl EngineLog {
    /// Emit this log event to stderr for host-side parsing
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            use std::io::Write;
            eprintln!("__ENGINE_EVENT__:{}", json);
            // Force flush stderr in async/concurrent contexts
            let _ = std::io::stderr().flush();
        }
    }
}

/// Helper macros for engine logging
#[macro_export]
macro_rules! log_run_start {
    ($session:expr, $user:expr) => {
        $crate::EngineLog::RunStarted {
            session_id: $session.to_string(),
            user_id: $user.to_string(),
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_routing_resolved {
    ($session:expr, $route:expr, $stages:expr) => {
        $crate::EngineLog::RoutingResolved {
            session_id: $session.to_string(),
            route: $route.to_string(),
            stages: $stages,
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_stage_start {
    ($session:expr, $capability:expr) => {
        $crate::EngineLog::StageStarted {
            session_id: $session.to_string(),
            capability: $capability.to_string(),
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_stage_complete {
    ($session:expr, $capability:expr, $artifact:expr) => {
        $crate::EngineLog::StageCompleted {
            session_id: $session.to_string(),
            capability: $capability.to_string(),
            artifact_id: $artifact,
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_stage_failed {
    ($session:expr, $capability:expr, $error:expr) => {
        $crate::EngineLog::StageFailed {
            session_id: $session.to_string(),
            capability: $capability.to_string(),
            error: $error.to_string(),
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_iteration_start {
    ($session:expr, $number:expr) => {
        $crate::EngineLog::IterationStarted {
            session_id: $session.to_string(),
            number: $number,
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_iteration_scored {
    ($session:expr, $number:expr, $score:expr) => {
        $crate::EngineLog::IterationScored {
            session_id: $session.to_string(),
            number: $number,
            score: $score,
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_loop_complete {
    ($session:expr, $iterations:expr, $reason:expr) => {
        $crate::EngineLog::LoopCompleted {
            session_id: $session.to_string(),
            iterations: $iterations,
            reason: $reason.to_string(),
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_persistence_skipped {
    ($session:expr, $kind:expr, $error:expr) => {
        $crate::EngineLog::PersistenceSkipped {
            session_id: $session.to_string(),
            kind: $kind.to_string(),
            error: $error.to_string(),
        }
        .emit();
    };
}
