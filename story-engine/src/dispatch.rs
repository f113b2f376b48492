//! Workflow dispatch: routing tag → ordered stage plan.
//!
//! The dispatcher refuses to plan a stage whose prerequisite context can
//! come from neither an earlier stage in the same plan nor the user's
//! selected content. It never silently proceeds without context, and it
//! never errors on an unrecognized tag — that resolves to an empty plan so
//! the decision stays observable.

use story_engine_sdk::{ArtifactKind, Capability, SelectedContent};

use crate::error::EngineError;
use crate::routing::RouteTag;

/// What a routing decision dispatches to.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Run these stages sequentially, threading context forward.
    Stages(Vec<Capability>),
    /// Hand the request to the improvement loop controller.
    Improvement,
}

/// Upstream context a stage consumes before it may run.
pub fn prerequisites(capability: Capability) -> &'static [ArtifactKind] {
    match capability {
        Capability::World => &[ArtifactKind::Plot],
        Capability::Characters => &[ArtifactKind::Plot, ArtifactKind::World],
        _ => &[],
    }
}

/// Build the stage plan for a routing tag.
///
/// `selected` satisfies a prerequisite when its content type matches; a
/// selected plot also replaces the plot stage of
/// `plot_then_world_building_then_characters` entirely.
pub fn plan(
    route: &RouteTag,
    selected: Option<&SelectedContent>,
) -> Result<Dispatch, EngineError> {
    let stages: Vec<Capability> = match route {
        RouteTag::PlotOnly => vec![Capability::Plot],
        RouteTag::AuthorOnly => vec![Capability::Author],
        RouteTag::PlotThenAuthor => vec![Capability::Plot, Capability::Author],
        RouteTag::AuthorThenPlot => vec![Capability::Author, Capability::Plot],
        RouteTag::CritiqueOnly => vec![Capability::Critique],
        RouteTag::WorldBuildingOnly => vec![Capability::World],
        RouteTag::CharactersOnly => vec![Capability::Characters],
        RouteTag::PlotThenWorldBuilding => vec![Capability::Plot, Capability::World],
        RouteTag::PlotThenWorldBuildingThenCharacters => {
            if selected_kind(selected) == Some(ArtifactKind::Plot) {
                vec![Capability::World, Capability::Characters]
            } else {
                vec![Capability::Plot, Capability::World, Capability::Characters]
            }
        }
        RouteTag::WorldThenCharacters => vec![Capability::World, Capability::Characters],
        RouteTag::IterativeImprovement => return Ok(Dispatch::Improvement),
        RouteTag::Unrecognized(_) => vec![],
    };

    check_prerequisites(&stages, selected)?;
    Ok(Dispatch::Stages(stages))
}

fn selected_kind(selected: Option<&SelectedContent>) -> Option<ArtifactKind> {
    selected.and_then(|s| ArtifactKind::parse(&s.content_type))
}

/// Verify every stage's context is reachable from the plan or the
/// selection before anything executes.
fn check_prerequisites(
    stages: &[Capability],
    selected: Option<&SelectedContent>,
) -> Result<(), EngineError> {
    let selected = selected_kind(selected);
    for (position, stage) in stages.iter().enumerate() {
        for required in prerequisites(*stage) {
            let produced_upstream = stages[..position]
                .iter()
                .any(|earlier| crate::stage::artifact_kind(*earlier) == Some(*required));
            if !produced_upstream && selected != Some(*required) {
                return Err(EngineError::MissingContext {
                    stage: *stage,
                    missing: required.as_str(),
                });
            }
        }
    }
    Ok(())
}
