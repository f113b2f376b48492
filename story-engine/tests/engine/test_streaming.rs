//! Streaming contract tests: chunk forwarding, exact reconstruction, and
//! the per-call timeout.

use std::sync::Arc;

use story_engine::repository::MemoryArtifactRepository;
use story_engine_sdk::{Capability, OutboundEvent};

use super::common::*;

#[tokio::test]
async fn test_chunks_reconstruct_the_raw_response() {
    let capabilities = ScriptedCapabilities::new();
    capabilities.respond(Capability::Routing, routing_json("plot_only", &["plot"]));
    // Deliberately split mid-word and mid-JSON
    let raw = plot_json();
    let cuts = [raw.len() / 3, 2 * raw.len() / 3];
    capabilities.respond_chunks(
        Capability::Plot,
        vec![
            raw[..cuts[0]].to_string(),
            raw[cuts[0]..cuts[1]].to_string(),
            raw[cuts[1]..].to_string(),
        ],
    );
    let orchestrator = engine(capabilities, Arc::new(MemoryArtifactRepository::new()));

    let events = collect_events(&orchestrator, request("A plot")).await;

    assert!(terminal(&events).success);
    assert_eq!(chunk_text(&events, "plot"), raw);
}

#[tokio::test]
async fn test_chunk_events_precede_the_terminal() {
    let capabilities = ScriptedCapabilities::new();
    capabilities.respond(Capability::Routing, routing_json("plot_only", &["plot"]));
    capabilities.respond(Capability::Plot, plot_json());
    let orchestrator = engine(capabilities, Arc::new(MemoryArtifactRepository::new()));

    let events = collect_events(&orchestrator, request("A plot")).await;

    assert!(events.len() > 1);
    for event in &events[..events.len() - 1] {
        match event {
            OutboundEvent::Chunk { complete, .. } => assert!(!*complete),
            OutboundEvent::Terminal(_) => panic!("terminal event emitted before the stream ended"),
        }
    }
    assert!(events.last().unwrap().is_terminal());
}

#[tokio::test]
async fn test_routing_never_streams_chunks() {
    let capabilities = ScriptedCapabilities::new();
    capabilities.respond(Capability::Routing, routing_json("poetry_only", &[]));
    let orchestrator = engine(capabilities, Arc::new(MemoryArtifactRepository::new()));

    let events = collect_events(&orchestrator, request("hello")).await;

    assert!(chunk_text(&events, "routing").is_empty());
}

#[tokio::test]
async fn test_hung_capability_times_out_as_stage_failure() {
    let capabilities = ScriptedCapabilities::new();
    capabilities.respond(Capability::Routing, routing_json("plot_only", &["plot"]));
    capabilities.hang(Capability::Plot);
    let orchestrator = engine_with_config(
        capabilities.clone(),
        Arc::new(MemoryArtifactRepository::new()),
        short_timeout_config(),
    );

    let events = collect_events(&orchestrator, request("A plot")).await;
    let terminal = terminal(&events);

    assert!(!terminal.success);
    assert!(terminal.error.as_ref().unwrap().contains("timed out"));
    assert_eq!(terminal.responses.len(), 1);
    assert!(!terminal.responses[0].success);
}

#[tokio::test]
async fn test_hung_routing_times_out_the_run() {
    let capabilities = ScriptedCapabilities::new();
    capabilities.hang(Capability::Routing);
    let orchestrator = engine_with_config(
        capabilities,
        Arc::new(MemoryArtifactRepository::new()),
        short_timeout_config(),
    );

    let events = collect_events(&orchestrator, request("hello")).await;
    let terminal = terminal(&events);

    assert!(!terminal.success);
    assert!(terminal.error.as_ref().unwrap().contains("timed out"));
    assert!(terminal.responses.is_empty());
}
