//! End-to-end workflow tests: routing, dispatch, sequential stage
//! execution, selected-content reuse, and failure handling.

use std::sync::Arc;

use serde_json::{json, Value};
use story_engine::repository::MemoryArtifactRepository;
use story_engine_sdk::{ArtifactKind, Capability};

use super::common::*;

#[tokio::test]
async fn test_plot_then_author_runs_both_stages() {
    let capabilities = ScriptedCapabilities::new();
    capabilities.respond(
        Capability::Routing,
        routing_json("plot_then_author", &["plot", "author"]),
    );
    capabilities.respond(Capability::Plot, plot_json());
    capabilities.respond(Capability::Author, author_json());
    let repository = Arc::new(MemoryArtifactRepository::new());
    let orchestrator = engine(capabilities.clone(), repository.clone());

    let events = collect_events(&orchestrator, request("A story about a deposed queen")).await;
    let terminal = terminal(&events);

    assert!(terminal.success);
    assert!(terminal.error.is_none());
    assert_eq!(terminal.responses.len(), 2);
    assert_eq!(terminal.responses[0].agent_name, "plot");
    assert_eq!(terminal.responses[1].agent_name, "author");
    assert!(terminal.responses.iter().all(|r| r.success));
    assert!(terminal.saved_data.plot_id.is_some());
    assert!(terminal.saved_data.author_id.is_some());
    assert_eq!(
        capabilities.invoked(),
        vec![Capability::Routing, Capability::Plot, Capability::Author]
    );
    // Both artifacts actually landed in the repository
    assert_eq!(repository.ids_of_kind(ArtifactKind::Plot).len(), 1);
    assert_eq!(repository.ids_of_kind(ArtifactKind::Author).len(), 1);
}

#[tokio::test]
async fn test_malformed_routing_fails_before_any_stage() {
    let capabilities = ScriptedCapabilities::new();
    capabilities.respond(Capability::Routing, "I think you want a plot for that.");
    let orchestrator = engine(capabilities.clone(), Arc::new(MemoryArtifactRepository::new()));

    let events = collect_events(&orchestrator, request("Write me something")).await;
    let terminal = terminal(&events);

    assert!(!terminal.success);
    assert!(terminal.error.as_ref().unwrap().contains("routing"));
    assert!(terminal.responses.is_empty());
    assert_eq!(capabilities.invoked(), vec![Capability::Routing]);
}

#[tokio::test]
async fn test_unknown_capability_name_fails_fast() {
    let capabilities = ScriptedCapabilities::new();
    capabilities.respond(
        Capability::Routing,
        routing_json("plot_only", &["plot", "poetry"]),
    );
    let orchestrator = engine(capabilities.clone(), Arc::new(MemoryArtifactRepository::new()));

    let events = collect_events(&orchestrator, request("A plot and a poem")).await;
    let terminal = terminal(&events);

    assert!(!terminal.success);
    assert!(terminal.error.as_ref().unwrap().contains("poetry"));
    assert!(terminal.responses.is_empty());
    // No stage ran, not even the valid one
    assert_eq!(capabilities.invoked(), vec![Capability::Routing]);
}

#[tokio::test]
async fn test_unrecognized_route_completes_with_empty_plan() {
    let capabilities = ScriptedCapabilities::new();
    capabilities.respond(Capability::Routing, routing_json("poetry_only", &[]));
    let orchestrator = engine(capabilities.clone(), Arc::new(MemoryArtifactRepository::new()));

    let events = collect_events(&orchestrator, request("A poem please")).await;

    assert_eq!(events.len(), 1);
    let terminal = terminal(&events);
    assert!(terminal.success);
    assert!(terminal.responses.is_empty());
}

#[tokio::test]
async fn test_stage_failure_halts_downstream_stages() {
    let capabilities = ScriptedCapabilities::new();
    capabilities.respond(
        Capability::Routing,
        routing_json("plot_then_author", &["plot", "author"]),
    );
    capabilities.respond(Capability::Plot, "I'd rather discuss themes than commit to JSON.");
    capabilities.respond(Capability::Author, author_json());
    let orchestrator = engine(capabilities.clone(), Arc::new(MemoryArtifactRepository::new()));

    let events = collect_events(&orchestrator, request("A story")).await;
    let terminal = terminal(&events);

    assert!(!terminal.success);
    assert_eq!(terminal.responses.len(), 1);
    assert!(!terminal.responses[0].success);
    // Raw text is preserved for diagnostics
    assert_eq!(
        terminal.responses[0].content,
        Value::String("I'd rather discuss themes than commit to JSON.".to_string())
    );
    assert!(terminal.saved_data.plot_id.is_none());
    assert_eq!(capabilities.invoked(), vec![Capability::Routing, Capability::Plot]);
}

#[tokio::test]
async fn test_selected_plot_skips_regeneration_and_links_parents() {
    let repository = Arc::new(MemoryArtifactRepository::new());
    repository.insert(ArtifactKind::Plot, "P1", fields_of(plot_value()));

    let capabilities = ScriptedCapabilities::new();
    capabilities.respond(
        Capability::Routing,
        routing_json(
            "plot_then_world_building_then_characters",
            &["plot", "world", "characters"],
        ),
    );
    capabilities.respond(Capability::World, world_json());
    capabilities.respond(Capability::Characters, characters_json());
    let orchestrator = engine(capabilities.clone(), repository.clone());

    let events = collect_events(
        &orchestrator,
        request_with_selected("Build out my saved plot", "plot", "P1"),
    )
    .await;
    let terminal = terminal(&events);

    assert!(terminal.success);
    assert_eq!(capabilities.invoked(),
        vec![Capability::Routing, Capability::World, Capability::Characters]);
    assert!(terminal.saved_data.plot_id.is_none());
    assert!(terminal.saved_data.world_id.is_some());
    assert!(terminal.saved_data.characters_id.is_some());

    // The world artifact is linked to the selected plot's external id
    let world_ids = repository.ids_of_kind(ArtifactKind::World);
    assert_eq!(world_ids.len(), 1);
    let world_refs = repository
        .parent_refs(ArtifactKind::World, &world_ids[0])
        .unwrap();
    assert_eq!(world_refs["plot_id"], json!("P1"));

    // Characters link both the selected plot and the generated world
    let character_ids = repository.ids_of_kind(ArtifactKind::Characters);
    let character_refs = repository
        .parent_refs(ArtifactKind::Characters, &character_ids[0])
        .unwrap();
    assert_eq!(character_refs["plot_id"], json!("P1"));
    assert_eq!(character_refs["world_id"], json!(world_ids[0]));

    // The world stage saw the plot's fields in its composed message
    let world_call = &capabilities.calls()[1];
    assert!(world_call.message.contains("PLOT CONTEXT:"));
    assert!(world_call.message.contains("The Hollow Crown"));
}

#[tokio::test]
async fn test_characters_only_refused_without_world_context() {
    let repository = Arc::new(MemoryArtifactRepository::new());
    repository.insert(ArtifactKind::Plot, "P1", fields_of(plot_value()));

    let capabilities = ScriptedCapabilities::new();
    capabilities.respond(
        Capability::Routing,
        routing_json("characters_only", &["characters"]),
    );
    let orchestrator = engine(capabilities.clone(), repository);

    let events = collect_events(
        &orchestrator,
        request_with_selected("Cast my plot", "plot", "P1"),
    )
    .await;
    let terminal = terminal(&events);

    assert!(!terminal.success);
    assert!(terminal.error.as_ref().unwrap().contains("world"));
    assert_eq!(capabilities.invoked(), vec![Capability::Routing]);
}

#[tokio::test]
async fn test_unknown_selected_type_is_ignored() {
    let capabilities = ScriptedCapabilities::new();
    capabilities.respond(Capability::Routing, routing_json("plot_only", &["plot"]));
    capabilities.respond(Capability::Plot, plot_json());
    let orchestrator = engine(capabilities.clone(), Arc::new(MemoryArtifactRepository::new()));

    let events = collect_events(
        &orchestrator,
        request_with_selected("A plot", "poem", "X9"),
    )
    .await;

    assert!(terminal(&events).success);
}

#[tokio::test]
async fn test_stage_message_override_from_routing_parameters() {
    let capabilities = ScriptedCapabilities::new();
    capabilities.respond(
        Capability::Routing,
        routing_json_with(
            "plot_only",
            &["plot"],
            json!({"plot_message": "Write a gothic plot about a lighthouse."}),
        ),
    );
    capabilities.respond(Capability::Plot, plot_json());
    let orchestrator = engine(capabilities.clone(), Arc::new(MemoryArtifactRepository::new()));

    let events = collect_events(&orchestrator, request("something gothic")).await;

    assert!(terminal(&events).success);
    let plot_call = &capabilities.calls()[1];
    assert_eq!(plot_call.message, "Write a gothic plot about a lighthouse.");
    // Sub-session id is deterministic per (session, capability)
    assert_eq!(plot_call.session_id, "s-test:plot");
}
