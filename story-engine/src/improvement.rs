//! Iterative improvement: the bounded critique → enhance → score loop.
//!
//! Each pass critiques the current content, enhances it using the critique,
//! and scores the enhancement against a fixed weighted rubric. The loop
//! stops at the first score at or above [`TARGET_SCORE`] or after
//! [`MAX_ITERATIONS`] passes — the iteration ceiling is the sole
//! termination guarantee. A failed critique, enhancement, or score aborts
//! the loop; completed iterations are kept and reported.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use story_engine_sdk::{
    log_iteration_scored, log_iteration_start, log_loop_complete, log_persistence_skipped,
    ArtifactKind, Capability, Fields,
};
use uuid::Uuid;

use crate::executor::StageExecutor;
use crate::json::extract_json;
use crate::session::SessionContext;
use crate::stage::validate_fields;

/// Quality threshold at which the loop converges.
pub const TARGET_SCORE: f64 = 9.5;
/// Hard ceiling on loop passes.
pub const MAX_ITERATIONS: u32 = 4;

/// Scoring rubric: category and weight in percent. The weights are part of
/// the scoring prompt; the capability returns the single weighted
/// `overall_score`.
pub const RUBRIC: &[(&str, u32)] = &[
    ("content quality", 30),
    ("structure", 25),
    ("style and voice", 20),
    ("genre fit", 15),
    ("technical execution", 10),
];

/// What kind of content the loop is refining.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImprovementContentType {
    Plot,
    Author,
    Text,
}

impl ImprovementContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImprovementContentType::Plot => "plot",
            ImprovementContentType::Author => "author",
            ImprovementContentType::Text => "text",
        }
    }

    /// Anything that is not "plot" or "author" is treated as plain text.
    pub fn parse(name: &str) -> Self {
        match name {
            "plot" => ImprovementContentType::Plot,
            "author" => ImprovementContentType::Author,
            _ => ImprovementContentType::Text,
        }
    }

    /// Map an artifact kind to the loop's content type. Anything that is
    /// not a plot or author record is treated as plain text.
    pub fn from_kind(kind: ArtifactKind) -> Self {
        match kind {
            ArtifactKind::Plot => ImprovementContentType::Plot,
            ArtifactKind::Author => ImprovementContentType::Author,
            _ => ImprovementContentType::Text,
        }
    }
}

/// One completed loop pass. Appended once, immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Iteration {
    pub number: u32,
    /// The content that was critiqued this pass.
    pub content_snapshot: Value,
    pub critique_result: Fields,
    pub enhancement_result: Fields,
    pub score_result: Fields,
    pub overall_score: f64,
}

/// Audit record of one improvement session, persisted via the repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImprovementSessionRecord {
    pub original_content: Value,
    pub content_type: ImprovementContentType,
    pub target_score: f64,
    pub max_iterations: u32,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_reason: Option<String>,
    pub iterations: Vec<Iteration>,
    /// Final content after the last completed pass.
    pub final_content: Value,
}

/// Inputs resolved by the orchestrator before the loop starts.
#[derive(Debug, Clone)]
pub struct ImprovementInput {
    pub original_content: Value,
    pub content_type: ImprovementContentType,
    /// Originating artifact to write converged content back to, if any.
    pub source: Option<(ArtifactKind, String)>,
}

/// Loop outcome: the audit record plus the abort reason, if the loop
/// stopped before convergence or exhaustion.
#[derive(Debug)]
pub struct ImprovementRun {
    pub record: ImprovementSessionRecord,
    pub audit_id: Option<Uuid>,
    pub abort: Option<String>,
}

pub struct ImprovementLoopController<'a> {
    executor: &'a StageExecutor,
}

impl<'a> ImprovementLoopController<'a> {
    pub fn new(executor: &'a StageExecutor) -> Self {
        Self { executor }
    }

    /// Drive the loop to convergence, exhaustion, or abort.
    pub async fn run(
        &self,
        session: &mut SessionContext,
        input: ImprovementInput,
    ) -> ImprovementRun {
        let mut record = ImprovementSessionRecord {
            original_content: input.original_content.clone(),
            content_type: input.content_type,
            target_score: TARGET_SCORE,
            max_iterations: MAX_ITERATIONS,
            status: "in_progress".to_string(),
            completion_reason: None,
            iterations: Vec::new(),
            final_content: input.original_content.clone(),
        };
        let audit_id = self.persist_record(session, None, &record).await;

        let mut current = input.original_content;
        let mut abort = None;

        for number in 1..=MAX_ITERATIONS {
            log_iteration_start!(session.session_id, number);

            let critique = match self
                .capability_pass(session, Capability::Critique, critique_message(&current, input.content_type))
                .await
            {
                Ok(fields) => fields,
                Err(e) => {
                    abort = Some(format!("critique failed at iteration {number}: {e}"));
                    break;
                }
            };

            let enhancement = match self
                .capability_pass(
                    session,
                    Capability::Enhancement,
                    enhance_message(&current, &critique, number),
                )
                .await
            {
                Ok(fields) => fields,
                Err(e) => {
                    abort = Some(format!("enhancement failed at iteration {number}: {e}"));
                    break;
                }
            };
            let enhanced = seed_from_enhancement(&enhancement);

            let score_result = match self
                .capability_pass(session, Capability::Scoring, score_message(&enhanced))
                .await
            {
                Ok(fields) => fields,
                Err(e) => {
                    abort = Some(format!("scoring failed at iteration {number}: {e}"));
                    break;
                }
            };
            let overall_score = match score_result.get("overall_score").and_then(Value::as_f64) {
                Some(score) => score,
                None => {
                    abort = Some(format!(
                        "scoring returned a non-numeric overall_score at iteration {number}"
                    ));
                    break;
                }
            };

            // One Iteration per completed pass, appended exactly once
            record.iterations.push(Iteration {
                number,
                content_snapshot: current.clone(),
                critique_result: critique,
                enhancement_result: enhancement,
                score_result,
                overall_score,
            });
            current = enhanced;
            record.final_content = current.clone();
            log_iteration_scored!(session.session_id, number, overall_score);

            if overall_score >= TARGET_SCORE {
                record.completion_reason = Some("target_score_reached".to_string());
                break;
            }
        }

        if abort.is_none() && record.completion_reason.is_none() {
            record.completion_reason = Some("max_iterations_reached".to_string());
        }
        record.status = if abort.is_none() {
            "completed".to_string()
        } else {
            "aborted".to_string()
        };

        // Both convergence paths write the final content back to the
        // originating artifact, when one was referenced.
        if abort.is_none() {
            if let (Some((kind, id)), Value::Object(fields)) =
                (&input.source, &record.final_content)
            {
                if let Err(e) = self.executor.repository().update(*kind, id, fields).await {
                    log_persistence_skipped!(session.session_id, kind, e);
                }
            }
        }

        let audit_id = self.persist_record(session, audit_id, &record).await;
        log_loop_complete!(
            session.session_id,
            record.iterations.len() as u32,
            record
                .completion_reason
                .as_deref()
                .unwrap_or("aborted")
        );

        ImprovementRun {
            record,
            audit_id,
            abort,
        }
    }

    /// Invoke one loop capability and validate its structured response.
    async fn capability_pass(
        &self,
        session: &mut SessionContext,
        capability: Capability,
        message: String,
    ) -> Result<Fields, String> {
        let raw = self
            .executor
            .invoke_text(session, capability, message)
            .await
            .map_err(|e| e.to_string())?;
        extract_json(&raw)
            .map_err(|e| e.to_string())
            .and_then(|value| validate_fields(capability, &value))
    }

    /// Save or refresh the audit record. Persistence stays non-fatal.
    async fn persist_record(
        &self,
        session: &SessionContext,
        existing: Option<Uuid>,
        record: &ImprovementSessionRecord,
    ) -> Option<Uuid> {
        let fields = match serde_json::to_value(record) {
            Ok(Value::Object(fields)) => fields,
            _ => return existing,
        };
        let repository = self.executor.repository();
        let result = match existing {
            Some(id) => repository
                .update(ArtifactKind::ImprovementSession, &id.to_string(), &fields)
                .await
                .map(|()| id),
            None => {
                repository
                    .save(
                        ArtifactKind::ImprovementSession,
                        &fields,
                        &session.session_id,
                        &session.user_id,
                        &Default::default(),
                    )
                    .await
            }
        };
        match result {
            Ok(id) => Some(id),
            Err(e) => {
                log_persistence_skipped!(session.session_id, ArtifactKind::ImprovementSession, e);
                existing
            }
        }
    }
}

/// Structured enhancement output seeds the next pass; anything else is
/// flattened to a string.
fn seed_from_enhancement(enhancement: &Fields) -> Value {
    match enhancement.get("enhanced_content") {
        Some(Value::Object(fields)) => Value::Object(fields.clone()),
        Some(Value::String(text)) => Value::String(text.clone()),
        Some(other) => Value::String(other.to_string()),
        None => Value::Null,
    }
}

fn render_content(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

fn critique_message(content: &Value, content_type: ImprovementContentType) -> String {
    format!(
        "Critique the following {} content. Respond with a JSON object \
         containing strengths, weaknesses, suggestions, and overall_assessment.\n\n\
         CONTENT:\n{}",
        content_type.as_str(),
        render_content(content)
    )
}

fn enhance_message(content: &Value, critique: &Fields, iteration: u32) -> String {
    let directive = if iteration <= 1 {
        "You may restructure the content where the critique calls for it."
    } else {
        "Refine the existing structure; do not restructure it."
    };
    format!(
        "This is enhancement iteration {}. {} Apply the critique below and \
         respond with a JSON object containing enhanced_content (preserving \
         the original fields when the content is structured), changes_made, \
         and improvement_focus.\n\nCRITIQUE:\n{}\n\nCONTENT:\n{}",
        iteration,
        directive,
        serde_json::to_string_pretty(critique).unwrap_or_default(),
        render_content(content)
    )
}

fn score_message(content: &Value) -> String {
    let rubric = RUBRIC
        .iter()
        .map(|(category, weight)| format!("- {category}: {weight}%"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Score the following content against this weighted rubric:\n{}\n\n\
         Respond with a JSON object containing overall_score (the single \
         weighted scalar, 0-10), category_scores, and justification.\n\n\
         CONTENT:\n{}",
        rubric,
        render_content(content)
    )
}
