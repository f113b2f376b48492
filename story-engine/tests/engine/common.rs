//! Shared fixtures for engine integration tests: a scripted capability
//! runtime, an in-memory repository, and canned capability payloads.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use story_engine::repository::MemoryArtifactRepository;
use story_engine::{EngineConfig, Orchestrator};
use story_engine_sdk::{
    async_trait, Capability, CapabilityCall, CapabilityClient, CapabilityError, ChunkStream,
    Fields, GenerationRequest, OutboundEvent, SelectedContent, TerminalEvent,
};

// ============================================================================
// Scripted capability runtime
// ============================================================================

/// One scripted response for a capability invocation.
pub enum Script {
    /// Stream these chunks in order, then complete.
    Chunks(Vec<String>),
    /// Never yield anything (exercises the call timeout).
    Hang,
}

/// Capability runtime replaying scripted responses in FIFO order per
/// capability, recording every call it receives.
#[derive(Default)]
pub struct ScriptedCapabilities {
    scripts: Mutex<HashMap<Capability, VecDeque<Script>>>,
    calls: Mutex<Vec<CapabilityCall>>,
}

impl ScriptedCapabilities {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a whole response as a single chunk.
    pub fn respond(&self, capability: Capability, text: impl Into<String>) {
        self.respond_chunks(capability, vec![text.into()]);
    }

    /// Queue a response delivered as multiple stream chunks.
    pub fn respond_chunks(&self, capability: Capability, chunks: Vec<String>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(capability)
            .or_default()
            .push_back(Script::Chunks(chunks));
    }

    /// Queue a response that never arrives.
    pub fn hang(&self, capability: Capability) {
        self.scripts
            .lock()
            .unwrap()
            .entry(capability)
            .or_default()
            .push_back(Script::Hang);
    }

    /// Every capability invoked so far, in call order.
    pub fn invoked(&self) -> Vec<Capability> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|call| call.capability)
            .collect()
    }

    /// All recorded calls (for message and session assertions).
    pub fn calls(&self) -> Vec<CapabilityCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CapabilityClient for ScriptedCapabilities {
    async fn invoke(&self, call: CapabilityCall) -> Result<ChunkStream, CapabilityError> {
        let capability = call.capability;
        self.calls.lock().unwrap().push(call);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&capability)
            .and_then(VecDeque::pop_front);
        match script {
            Some(Script::Chunks(chunks)) => {
                Ok(Box::pin(futures::stream::iter(chunks.into_iter().map(Ok))))
            }
            Some(Script::Hang) => Ok(Box::pin(futures::stream::pending())),
            None => Err(CapabilityError::Transport(format!(
                "no scripted response for {capability}"
            ))),
        }
    }
}

// ============================================================================
// Engine construction and event collection
// ============================================================================

pub fn engine(
    capabilities: Arc<ScriptedCapabilities>,
    repository: Arc<MemoryArtifactRepository>,
) -> Arc<Orchestrator> {
    engine_with_config(capabilities, repository, EngineConfig::default())
}

pub fn engine_with_config(
    capabilities: Arc<ScriptedCapabilities>,
    repository: Arc<MemoryArtifactRepository>,
    config: EngineConfig,
) -> Arc<Orchestrator> {
    Arc::new(Orchestrator::new(capabilities, repository, config))
}

/// Config with a timeout short enough for hang tests.
pub fn short_timeout_config() -> EngineConfig {
    EngineConfig {
        capability_timeout: Duration::from_millis(50),
        ..EngineConfig::default()
    }
}

/// Run one request to completion and collect every emitted event.
pub async fn collect_events(
    orchestrator: &Arc<Orchestrator>,
    request: GenerationRequest,
) -> Vec<OutboundEvent> {
    let mut receiver = orchestrator.process(request);
    let mut events = Vec::new();
    while let Some(event) = receiver.recv().await {
        events.push(event);
    }
    events
}

/// The run's terminal event, asserting it is last and unique.
pub fn terminal(events: &[OutboundEvent]) -> &TerminalEvent {
    let terminals = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminals, 1, "expected exactly one terminal event");
    match events.last() {
        Some(OutboundEvent::Terminal(event)) => event,
        other => panic!("terminal event must close the stream, got {other:?}"),
    }
}

/// Concatenate the chunk payloads emitted for one agent, in order.
pub fn chunk_text(events: &[OutboundEvent], agent: &str) -> String {
    events
        .iter()
        .filter_map(|event| match event {
            OutboundEvent::Chunk {
                agent_name, chunk, ..
            } if agent_name == agent => Some(chunk.as_str()),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Requests
// ============================================================================

pub fn request(message: &str) -> GenerationRequest {
    GenerationRequest {
        user_message: message.to_string(),
        user_id: "u-test".to_string(),
        session_id: "s-test".to_string(),
        selected_content: None,
    }
}

pub fn request_with_selected(
    message: &str,
    content_type: &str,
    content_id: &str,
) -> GenerationRequest {
    GenerationRequest {
        selected_content: Some(SelectedContent {
            content_id: content_id.to_string(),
            content_type: content_type.to_string(),
            content_title: Some("Saved".to_string()),
        }),
        ..request(message)
    }
}

// ============================================================================
// Canned payloads
// ============================================================================

pub fn fields_of(value: Value) -> Fields {
    value.as_object().expect("fixture must be an object").clone()
}

pub fn routing_json(tag: &str, agents: &[&str]) -> String {
    routing_json_with(tag, agents, json!({}))
}

pub fn routing_json_with(tag: &str, agents: &[&str], extracted_parameters: Value) -> String {
    json!({
        "routing_decision": tag,
        "agents_to_invoke": agents,
        "extracted_parameters": extracted_parameters,
        "workflow_plan": format!("run {}", agents.join(", "))
    })
    .to_string()
}

pub fn plot_value() -> Value {
    json!({
        "title": "The Hollow Crown",
        "plot_summary": "A deposed cartographer maps her way back to a throne that no longer exists."
    })
}

pub fn plot_json() -> String {
    plot_value().to_string()
}

pub fn author_json() -> String {
    json!({
        "author_name": "R. Voss",
        "biography": "Former lighthouse keeper turned novelist.",
        "writing_style": "Spare, tidal prose."
    })
    .to_string()
}

pub fn world_json() -> String {
    json!({
        "world_name": "The Shattered Meridian",
        "geography": "An archipelago strung along a drowned mountain range.",
        "political_landscape": "City-states bound by salvage treaties.",
        "cultural_systems": "Tide-calendars govern festivals and debts.",
        "economic_framework": "Salvage rights and kelp-silk weaving.",
        "historical_timeline": "Three centuries since the Drowning.",
        "magic_and_technology": "Pressure-forged brass and current-reading.",
        "social_structures": "Crews over bloodlines."
    })
    .to_string()
}

pub fn characters_json() -> String {
    json!({
        "character_count": 2,
        "characters": [
            {"name": "Maren", "role": "protagonist"},
            {"name": "Odo", "role": "rival salvager"}
        ],
        "relationship_networks": {"Maren": ["Odo"]},
        "character_dynamics": "Rivals forced into one crew.",
        "world_context_integration": "Both are bound by the salvage treaties."
    })
    .to_string()
}

pub fn critique_json() -> String {
    json!({
        "strengths": ["clear throughline"],
        "weaknesses": ["sagging middle"],
        "suggestions": ["tighten act two"],
        "overall_assessment": "Solid draft with pacing issues."
    })
    .to_string()
}

pub fn enhancement_json(enhanced_content: Value) -> String {
    json!({
        "enhanced_content": enhanced_content,
        "changes_made": ["tightened act two"],
        "improvement_focus": "pacing"
    })
    .to_string()
}

pub fn scoring_json(overall_score: f64) -> String {
    json!({
        "overall_score": overall_score,
        "category_scores": {
            "content quality": overall_score,
            "structure": overall_score,
            "style and voice": overall_score,
            "genre fit": overall_score,
            "technical execution": overall_score
        },
        "justification": "Weighted across the rubric."
    })
    .to_string()
}
