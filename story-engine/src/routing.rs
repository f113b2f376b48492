//! Routing decision parsing.
//!
//! The routing capability answers a user message with a free-form response
//! that should contain a JSON decision object. This module turns that
//! response into a typed [`RoutingDecision`] or a fatal
//! [`EngineError::RoutingMalformed`] — nothing downstream executes on a
//! malformed decision.

use std::collections::HashMap;

use serde_json::Value;
use story_engine_sdk::{Capability, Fields, SelectedContent};

use crate::error::EngineError;
use crate::json::extract_json;
use crate::stage::validate_fields;

/// The closed set of routing tags, matched exhaustively everywhere.
///
/// A tag outside the set is not an error: it becomes `Unrecognized` and
/// dispatch resolves it to an empty stage list, so the decision stays
/// observable to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTag {
    PlotOnly,
    AuthorOnly,
    PlotThenAuthor,
    AuthorThenPlot,
    CritiqueOnly,
    WorldBuildingOnly,
    CharactersOnly,
    PlotThenWorldBuilding,
    PlotThenWorldBuildingThenCharacters,
    WorldThenCharacters,
    IterativeImprovement,
    Unrecognized(String),
}

impl RouteTag {
    pub fn parse(tag: &str) -> Self {
        match tag {
            "plot_only" => RouteTag::PlotOnly,
            "author_only" => RouteTag::AuthorOnly,
            "plot_then_author" => RouteTag::PlotThenAuthor,
            "author_then_plot" => RouteTag::AuthorThenPlot,
            "critique_only" => RouteTag::CritiqueOnly,
            "world_building_only" => RouteTag::WorldBuildingOnly,
            "characters_only" => RouteTag::CharactersOnly,
            "plot_then_world_building" => RouteTag::PlotThenWorldBuilding,
            "plot_then_world_building_then_characters" => {
                RouteTag::PlotThenWorldBuildingThenCharacters
            }
            "world_then_characters" => RouteTag::WorldThenCharacters,
            "iterative_improvement" => RouteTag::IterativeImprovement,
            other => RouteTag::Unrecognized(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RouteTag::PlotOnly => "plot_only",
            RouteTag::AuthorOnly => "author_only",
            RouteTag::PlotThenAuthor => "plot_then_author",
            RouteTag::AuthorThenPlot => "author_then_plot",
            RouteTag::CritiqueOnly => "critique_only",
            RouteTag::WorldBuildingOnly => "world_building_only",
            RouteTag::CharactersOnly => "characters_only",
            RouteTag::PlotThenWorldBuilding => "plot_then_world_building",
            RouteTag::PlotThenWorldBuildingThenCharacters => {
                "plot_then_world_building_then_characters"
            }
            RouteTag::WorldThenCharacters => "world_then_characters",
            RouteTag::IterativeImprovement => "iterative_improvement",
            RouteTag::Unrecognized(tag) => tag,
        }
    }
}

impl std::fmt::Display for RouteTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated routing decision. Immutable once parsed.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub route: RouteTag,
    pub agents_to_invoke: Vec<String>,
    pub extracted_parameters: Fields,
    /// Opaque plan text from the router; presence-validated, not interpreted.
    pub workflow_plan: Value,
    /// Per-stage message overrides (`<capability>_message` parameters).
    pub message_overrides: HashMap<Capability, String>,
    /// Selected content echoed by the router, if any.
    pub selected_content: Option<SelectedContent>,
}

/// Parse the routing capability's raw response into a decision.
///
/// The JSON extraction and the required-field check
/// ({routing_decision, agents_to_invoke, extracted_parameters,
/// workflow_plan}) both map to `RoutingMalformed`.
pub fn parse_routing_response(raw: &str) -> Result<RoutingDecision, EngineError> {
    let value =
        extract_json(raw).map_err(|e| EngineError::RoutingMalformed(e.to_string()))?;
    let fields =
        validate_fields(Capability::Routing, &value).map_err(EngineError::RoutingMalformed)?;

    let tag = fields
        .get("routing_decision")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            EngineError::RoutingMalformed("routing_decision is not a string".to_string())
        })?;

    let agents_to_invoke = fields
        .get("agents_to_invoke")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            EngineError::RoutingMalformed("agents_to_invoke is not an array".to_string())
        })?
        .iter()
        .map(|agent| {
            agent.as_str().map(str::to_string).ok_or_else(|| {
                EngineError::RoutingMalformed(format!(
                    "agents_to_invoke contains a non-string entry: {agent}"
                ))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let extracted_parameters = fields
        .get("extracted_parameters")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let selected_content = fields
        .get("selected_content")
        .and_then(|v| serde_json::from_value::<SelectedContent>(v.clone()).ok());

    Ok(RoutingDecision {
        route: RouteTag::parse(tag),
        message_overrides: message_overrides(&extracted_parameters),
        agents_to_invoke,
        extracted_parameters,
        workflow_plan: fields
            .get("workflow_plan")
            .cloned()
            .unwrap_or(Value::Null),
        selected_content,
    })
}

/// Pull `<capability>_message` overrides out of the extracted parameters.
fn message_overrides(parameters: &Fields) -> HashMap<Capability, String> {
    let mut overrides = HashMap::new();
    for (key, value) in parameters {
        let Some(name) = key.strip_suffix("_message") else {
            continue;
        };
        if let (Some(capability), Some(message)) = (Capability::parse(name), value.as_str()) {
            overrides.insert(capability, message.to_string());
        }
    }
    overrides
}
