//! Stage execution: capability invocation, streaming, validation,
//! persistence.
//!
//! One stage is one capability call. Incoming text is re-chunked into small
//! word-aligned pieces and forwarded to the caller in strict emission
//! order; after the capability completes, the accumulated text is parsed
//! and checked against the stage's field table. Successes are persisted
//! through the repository collaborator with refs to their upstream
//! artifacts; persistence failure downgrades nothing — the content is
//! still returned.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use story_engine_sdk::{
    log_persistence_skipped, log_stage_complete, log_stage_failed, log_stage_start,
    ArtifactKind, ArtifactRepository, Capability, CapabilityCall, CapabilityClient,
    CapabilityError, Fields, OutboundEvent,
};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::timeout;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::json::extract_json;
use crate::session::SessionContext;
use crate::stage::{artifact_kind, parent_ref_key, validate_fields, StageResult};

// ============================================================================
// Run context
// ============================================================================

/// One piece of upstream context available to later stages.
#[derive(Debug, Clone)]
pub struct ContextEntry {
    pub fields: Fields,
    /// Persisted id, when the context came from the repository or a saved
    /// stage. Fresh-but-unpersisted context has none.
    pub artifact_id: Option<Value>,
}

/// Context accumulated over one run: validated stage outputs plus any
/// selected content resolved through the repository.
#[derive(Debug, Default)]
pub struct RunContext {
    entries: HashMap<ArtifactKind, ContextEntry>,
}

impl RunContext {
    pub fn insert(&mut self, kind: ArtifactKind, fields: Fields, artifact_id: Option<Value>) {
        self.entries.insert(
            kind,
            ContextEntry {
                fields,
                artifact_id,
            },
        );
    }

    pub fn get(&self, kind: ArtifactKind) -> Option<&ContextEntry> {
        self.entries.get(&kind)
    }

    /// Labeled context blocks for a stage's prerequisites, e.g.
    /// `PLOT CONTEXT:\n{...}`.
    fn blocks_for(&self, capability: Capability) -> String {
        let mut blocks = String::new();
        for kind in crate::dispatch::prerequisites(capability) {
            if let Some(entry) = self.entries.get(kind) {
                let json = serde_json::to_string_pretty(&entry.fields)
                    .unwrap_or_else(|_| "{}".to_string());
                blocks.push_str(&format!(
                    "\n\n{} CONTEXT:\n{}",
                    kind.as_str().to_uppercase(),
                    json
                ));
            }
        }
        blocks
    }

    /// Parent refs for persisting a stage's artifact
    /// (`{"plot_id": <id>, ...}` for each prerequisite with a known id).
    fn parent_refs_for(&self, capability: Capability) -> HashMap<String, Value> {
        let mut refs = HashMap::new();
        for kind in crate::dispatch::prerequisites(capability) {
            if let Some(id) = self.entries.get(kind).and_then(|e| e.artifact_id.clone()) {
                refs.insert(parent_ref_key(*kind).to_string(), id);
            }
        }
        refs
    }
}

/// Compose a stage's outbound message: base instruction plus labeled
/// upstream context blocks.
pub fn compose_message(base: &str, capability: Capability, ctx: &RunContext) -> String {
    format!("{}{}", base, ctx.blocks_for(capability))
}

// ============================================================================
// Word-aligned re-chunking
// ============================================================================

/// Re-chunks incoming stream text into ~target-size pieces, cutting only at
/// word starts so concatenating the pieces reconstructs the input exactly.
#[derive(Debug)]
pub struct Rechunker {
    buffer: String,
    target: usize,
}

impl Rechunker {
    pub fn new(target: usize) -> Self {
        Self {
            buffer: String::new(),
            target: target.max(1),
        }
    }

    /// Absorb incoming text, returning every complete piece it unlocked.
    pub fn push(&mut self, incoming: &str) -> Vec<String> {
        self.buffer.push_str(incoming);
        let mut pieces = Vec::new();
        while let Some(cut) = self.next_cut() {
            let rest = self.buffer.split_off(cut);
            pieces.push(std::mem::replace(&mut self.buffer, rest));
        }
        pieces
    }

    /// Whatever is left once the stream completes.
    pub fn flush(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }

    /// First word start at or past the target size. Trailing text stays
    /// buffered: the next word may not have fully arrived yet.
    fn next_cut(&self) -> Option<usize> {
        let mut prev_ws = false;
        for (i, c) in self.buffer.char_indices() {
            if i >= self.target && prev_ws && !c.is_whitespace() {
                return Some(i);
            }
            prev_ws = c.is_whitespace();
        }
        None
    }
}

// ============================================================================
// Executor
// ============================================================================

/// Runs a single stage against the capability runtime.
pub struct StageExecutor {
    capabilities: Arc<dyn CapabilityClient>,
    repository: Arc<dyn ArtifactRepository>,
    config: EngineConfig,
}

impl StageExecutor {
    pub fn new(
        capabilities: Arc<dyn CapabilityClient>,
        repository: Arc<dyn ArtifactRepository>,
        config: EngineConfig,
    ) -> Self {
        Self {
            capabilities,
            repository,
            config,
        }
    }

    /// Invoke a capability and collect its full text without forwarding
    /// chunks (routing and improvement-loop calls).
    pub async fn invoke_text(
        &self,
        session: &mut SessionContext,
        capability: Capability,
        message: String,
    ) -> Result<String, EngineError> {
        let call = self.call(session, capability, message);
        let stream = self
            .capabilities
            .invoke(call)
            .await
            .map_err(|source| EngineError::CapabilityCall { capability, source })?;
        let mut stream = stream;
        let mut text = String::new();
        loop {
            match timeout(self.config.capability_timeout, stream.next()).await {
                Err(_) => {
                    return Err(EngineError::CapabilityCall {
                        capability,
                        source: CapabilityError::Interrupted(format!(
                            "timed out after {:?}",
                            self.config.capability_timeout
                        )),
                    })
                }
                Ok(None) => break,
                Ok(Some(Err(source))) => {
                    return Err(EngineError::CapabilityCall { capability, source })
                }
                Ok(Some(Ok(chunk))) => text.push_str(&chunk),
            }
        }
        Ok(text)
    }

    /// Run one workflow stage: stream, validate, persist.
    ///
    /// Never returns an error — every failure mode becomes a
    /// `StageResult { success: false }` so the caller can report completed
    /// work alongside the failure.
    pub async fn run_stage(
        &self,
        session: &mut SessionContext,
        capability: Capability,
        base_message: &str,
        ctx: &RunContext,
        events: &UnboundedSender<OutboundEvent>,
    ) -> StageResult {
        log_stage_start!(session.session_id, capability);

        let message = compose_message(base_message, capability, ctx);
        let call = self.call(session, capability, message);

        let raw_text = match self.stream_stage(capability, call, events).await {
            Ok(text) => text,
            Err((partial, error)) => {
                log_stage_failed!(session.session_id, capability, error);
                return StageResult::failed(capability, partial, error);
            }
        };

        let fields = match extract_json(&raw_text)
            .map_err(|e| e.to_string())
            .and_then(|value| validate_fields(capability, &value))
        {
            Ok(fields) => fields,
            Err(error) => {
                log_stage_failed!(session.session_id, capability, error);
                return StageResult::failed(capability, raw_text, error);
            }
        };

        let mut result = StageResult::completed(capability, raw_text, fields);
        if let Some(kind) = artifact_kind(capability) {
            if let Some(id) = self.persist(session, kind, capability, ctx, &result).await {
                result = result.with_artifact(id);
            }
        }
        log_stage_complete!(session.session_id, capability, result.artifact_id);
        result
    }

    /// Forward re-chunked pieces in emission order while accumulating the
    /// full text. On failure returns whatever accumulated so far.
    async fn stream_stage(
        &self,
        capability: Capability,
        call: CapabilityCall,
        events: &UnboundedSender<OutboundEvent>,
    ) -> Result<String, (String, String)> {
        let mut stream = match self.capabilities.invoke(call).await {
            Ok(stream) => stream,
            Err(e) => return Err((String::new(), e.to_string())),
        };

        let mut rechunker = Rechunker::new(self.config.stream_chunk_size);
        let mut raw_text = String::new();
        loop {
            match timeout(self.config.capability_timeout, stream.next()).await {
                Err(_) => {
                    return Err((
                        raw_text,
                        format!(
                            "{} timed out after {:?}",
                            capability, self.config.capability_timeout
                        ),
                    ))
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => return Err((raw_text, e.to_string())),
                Ok(Some(Ok(incoming))) => {
                    raw_text.push_str(&incoming);
                    for piece in rechunker.push(&incoming) {
                        let _ = events.send(OutboundEvent::chunk(capability.as_str(), piece));
                    }
                }
            }
        }
        if let Some(piece) = rechunker.flush() {
            let _ = events.send(OutboundEvent::chunk(capability.as_str(), piece));
        }
        Ok(raw_text)
    }

    /// Persist a validated stage output. Persistence errors are logged and
    /// swallowed; the stage stays successful with no artifact id.
    async fn persist(
        &self,
        session: &SessionContext,
        kind: ArtifactKind,
        capability: Capability,
        ctx: &RunContext,
        result: &StageResult,
    ) -> Option<Uuid> {
        let fields = result.structured_fields.as_ref()?;
        let parent_refs = ctx.parent_refs_for(capability);
        match self
            .repository
            .save(
                kind,
                fields,
                &session.session_id,
                &session.user_id,
                &parent_refs,
            )
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                log_persistence_skipped!(session.session_id, kind, e);
                None
            }
        }
    }

    pub fn repository(&self) -> &Arc<dyn ArtifactRepository> {
        &self.repository
    }

    fn call(
        &self,
        session: &mut SessionContext,
        capability: Capability,
        message: String,
    ) -> CapabilityCall {
        CapabilityCall {
            capability,
            message,
            session_id: session.sub_session(capability).to_string(),
            user_id: session.user_id.clone(),
        }
    }
}
