//! Stage results and per-stage output schemas.
//!
//! Each generation capability answers with a JSON object; the tables here
//! define the fields that object must carry before the engine will treat
//! the stage as successful. Partial or guessed structures are never
//! accepted: a stage either validates completely or fails with its raw
//! text preserved for diagnostics.

use serde_json::Value;
use story_engine_sdk::{ArtifactKind, Capability, Fields, StageReport};
use uuid::Uuid;

/// Required top-level fields per capability output.
pub fn required_fields(capability: Capability) -> &'static [&'static str] {
    match capability {
        Capability::Routing => &[
            "routing_decision",
            "agents_to_invoke",
            "extracted_parameters",
            "workflow_plan",
        ],
        Capability::Plot => &["title", "plot_summary"],
        Capability::Author => &["author_name", "biography", "writing_style"],
        Capability::World => &[
            "world_name",
            "geography",
            "political_landscape",
            "cultural_systems",
            "economic_framework",
            "historical_timeline",
            "magic_and_technology",
            "social_structures",
        ],
        Capability::Characters => &[
            "character_count",
            "characters",
            "relationship_networks",
            "character_dynamics",
            "world_context_integration",
        ],
        Capability::Critique => &[
            "strengths",
            "weaknesses",
            "suggestions",
            "overall_assessment",
        ],
        Capability::Enhancement => &["enhanced_content", "changes_made", "improvement_focus"],
        Capability::Scoring => &["overall_score", "category_scores", "justification"],
    }
}

/// The artifact kind a successful stage persists as, if any.
pub fn artifact_kind(capability: Capability) -> Option<ArtifactKind> {
    match capability {
        Capability::Routing => None,
        Capability::Plot => Some(ArtifactKind::Plot),
        Capability::Author => Some(ArtifactKind::Author),
        Capability::World => Some(ArtifactKind::World),
        Capability::Characters => Some(ArtifactKind::Characters),
        Capability::Critique => Some(ArtifactKind::Critique),
        Capability::Enhancement => Some(ArtifactKind::Enhancement),
        Capability::Scoring => Some(ArtifactKind::Score),
    }
}

/// Parent-ref key under which a prerequisite artifact id is recorded when
/// persisting a downstream artifact.
pub fn parent_ref_key(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::Plot => "plot_id",
        ArtifactKind::Author => "author_id",
        ArtifactKind::World => "world_id",
        ArtifactKind::Characters => "characters_id",
        ArtifactKind::Critique => "critique_id",
        ArtifactKind::Enhancement => "enhancement_id",
        ArtifactKind::Score => "score_id",
        ArtifactKind::ImprovementSession => "improvement_session_id",
    }
}

/// Check a parsed capability response against the stage's field table.
///
/// Returns the object's fields on success, or the list of missing fields.
pub fn validate_fields(capability: Capability, value: &Value) -> Result<Fields, String> {
    let object = value
        .as_object()
        .ok_or_else(|| format!("{} response is not a JSON object", capability))?;

    let missing: Vec<&str> = required_fields(capability)
        .iter()
        .filter(|field| !object.contains_key(**field))
        .copied()
        .collect();

    if missing.is_empty() {
        Ok(object.clone())
    } else {
        Err(format!(
            "{} response missing required fields: {}",
            capability,
            missing.join(", ")
        ))
    }
}

/// Outcome of one stage invocation. Created once, never mutated after
/// completion.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub capability: Capability,
    pub raw_text: String,
    pub structured_fields: Option<Fields>,
    pub success: bool,
    pub error: Option<String>,
    pub artifact_id: Option<Uuid>,
}

impl StageResult {
    pub fn completed(capability: Capability, raw_text: String, fields: Fields) -> Self {
        Self {
            capability,
            raw_text,
            structured_fields: Some(fields),
            success: true,
            error: None,
            artifact_id: None,
        }
    }

    pub fn failed(capability: Capability, raw_text: String, error: impl Into<String>) -> Self {
        Self {
            capability,
            raw_text,
            structured_fields: None,
            success: false,
            error: Some(error.into()),
            artifact_id: None,
        }
    }

    pub fn with_artifact(mut self, id: Uuid) -> Self {
        self.artifact_id = Some(id);
        self
    }

    /// Wire-shape report for the terminal event.
    pub fn to_report(&self) -> StageReport {
        StageReport {
            agent_name: self.capability.as_str().to_string(),
            success: self.success,
            content: match &self.structured_fields {
                Some(fields) => Value::Object(fields.clone()),
                None => Value::String(self.raw_text.clone()),
            },
            error: self.error.clone(),
        }
    }
}
