//! The orchestration façade.
//!
//! One `Orchestrator` serves many concurrent requests; each request gets
//! its own spawned run, its own `SessionContext`, and exactly one terminal
//! event. A run is a strictly sequential chain of suspending calls —
//! routing, then each planned stage in order — with chunk events forwarded
//! to the caller as they arrive.

use std::sync::Arc;

use serde_json::Value;
use story_engine_sdk::{
    log_routing_resolved, log_run_start, ArtifactKind, ArtifactRepository, Capability,
    CapabilityClient, GenerationRequest, OutboundEvent, SavedData, SelectedContent, StageReport,
    TerminalEvent,
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::config::EngineConfig;
use crate::dispatch::{self, Dispatch};
use crate::error::EngineError;
use crate::executor::{RunContext, StageExecutor};
use crate::improvement::{ImprovementContentType, ImprovementInput, ImprovementLoopController};
use crate::routing::{parse_routing_response, RoutingDecision};
use crate::session::SessionContext;
use crate::stage::artifact_kind;

pub struct Orchestrator {
    executor: StageExecutor,
    repository: Arc<dyn ArtifactRepository>,
}

impl Orchestrator {
    pub fn new(
        capabilities: Arc<dyn CapabilityClient>,
        repository: Arc<dyn ArtifactRepository>,
        config: EngineConfig,
    ) -> Self {
        Self {
            executor: StageExecutor::new(capabilities, repository.clone(), config),
            repository,
        }
    }

    /// Handle one request in a spawned task, returning the event stream.
    /// The stream carries zero or more chunk events and exactly one
    /// terminal event.
    pub fn process(self: &Arc<Self>, request: GenerationRequest) -> UnboundedReceiver<OutboundEvent> {
        let (events, receiver) = unbounded_channel();
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            orchestrator.run(request, events).await;
        });
        receiver
    }

    /// Drive one request to its terminal event.
    pub async fn run(&self, request: GenerationRequest, events: UnboundedSender<OutboundEvent>) {
        log_run_start!(request.session_id, request.user_id);
        let mut session = SessionContext::new(&request.user_id, &request.session_id);
        let terminal = self.drive(&request, &mut session, &events).await;
        let _ = events.send(OutboundEvent::Terminal(terminal));
    }

    async fn drive(
        &self,
        request: &GenerationRequest,
        session: &mut SessionContext,
        events: &UnboundedSender<OutboundEvent>,
    ) -> TerminalEvent {
        let raw = match self
            .executor
            .invoke_text(session, Capability::Routing, request.user_message.clone())
            .await
        {
            Ok(raw) => raw,
            Err(e) => return failure(e.to_string(), vec![], SavedData::default()),
        };

        let decision = match parse_routing_response(&raw) {
            Ok(decision) => decision,
            Err(e) => return failure(e.to_string(), vec![], SavedData::default()),
        };

        // Unknown capability names fail fast, before any stage runs
        for agent in &decision.agents_to_invoke {
            if Capability::parse(agent).is_none() {
                let e = EngineError::UnknownCapability(agent.clone());
                return failure(e.to_string(), vec![], SavedData::default());
            }
        }

        // The request's selection wins over whatever the router echoed
        let selected = request
            .selected_content
            .clone()
            .or_else(|| decision.selected_content.clone());

        match dispatch::plan(&decision.route, selected.as_ref()) {
            Err(e) => failure(e.to_string(), vec![], SavedData::default()),
            Ok(Dispatch::Improvement) => {
                log_routing_resolved!(
                    session.session_id,
                    decision.route,
                    vec!["improvement".to_string()]
                );
                self.run_improvement(request, session, &decision, selected)
                    .await
            }
            Ok(Dispatch::Stages(stages)) => {
                log_routing_resolved!(
                    session.session_id,
                    decision.route,
                    stages.iter().map(|s| s.as_str().to_string()).collect()
                );
                self.run_stages(request, session, &decision, selected, stages, events)
                    .await
            }
        }
    }

    async fn run_stages(
        &self,
        request: &GenerationRequest,
        session: &mut SessionContext,
        decision: &RoutingDecision,
        selected: Option<SelectedContent>,
        stages: Vec<Capability>,
        events: &UnboundedSender<OutboundEvent>,
    ) -> TerminalEvent {
        let mut ctx = RunContext::default();
        if let Some(sel) = &selected {
            if let Err(e) = self.resolve_selected(sel, &mut ctx).await {
                return failure(e, vec![], SavedData::default());
            }
        }

        let mut responses: Vec<StageReport> = Vec::new();
        let mut saved_data = SavedData::default();

        for stage in stages {
            // Re-check each prerequisite against what the run actually
            // produced; a stage never executes without its context.
            for required in dispatch::prerequisites(stage) {
                if ctx.get(*required).is_none() {
                    let e = EngineError::MissingContext {
                        stage,
                        missing: required.as_str(),
                    };
                    return failure(e.to_string(), responses, saved_data);
                }
            }

            let base_message = decision
                .message_overrides
                .get(&stage)
                .map(String::as_str)
                .unwrap_or(&request.user_message);
            let result = self
                .executor
                .run_stage(session, stage, base_message, &ctx, events)
                .await;
            responses.push(result.to_report());

            if !result.success {
                let error = result
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("{stage} failed"));
                return failure(error, responses, saved_data);
            }

            if let (Some(kind), Some(fields)) =
                (artifact_kind(stage), result.structured_fields.clone())
            {
                if let Some(id) = result.artifact_id {
                    saved_data.record(kind, id);
                }
                let id_value = result.artifact_id.map(|id| Value::String(id.to_string()));
                ctx.insert(kind, fields, id_value);
            }
        }

        TerminalEvent {
            success: true,
            error: None,
            responses,
            saved_data,
            complete: true,
        }
    }

    /// Resolve selected content through the repository into run context.
    ///
    /// An unknown content type is ignored (nothing can require it); a known
    /// type that fails to resolve is an error only when reported by the
    /// repository itself — absence surfaces later as missing context if a
    /// stage actually needs it.
    async fn resolve_selected(
        &self,
        selected: &SelectedContent,
        ctx: &mut RunContext,
    ) -> Result<(), String> {
        let Some(kind) = ArtifactKind::parse(&selected.content_type) else {
            return Ok(());
        };
        match self.repository.get_by_id(kind, &selected.content_id).await {
            Ok(Some(fields)) => {
                ctx.insert(
                    kind,
                    fields,
                    Some(Value::String(selected.content_id.clone())),
                );
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => Err(format!(
                "failed to resolve selected {} {}: {}",
                kind, selected.content_id, e
            )),
        }
    }

    async fn run_improvement(
        &self,
        request: &GenerationRequest,
        session: &mut SessionContext,
        decision: &RoutingDecision,
        selected: Option<SelectedContent>,
    ) -> TerminalEvent {
        let input = match self.improvement_input(request, decision, selected).await {
            Ok(input) => input,
            Err(e) => return failure(e, vec![], SavedData::default()),
        };

        let controller = ImprovementLoopController::new(&self.executor);
        let run = controller.run(session, input).await;

        let mut saved_data = SavedData::default();
        if let Some(id) = run.audit_id {
            saved_data.record(ArtifactKind::ImprovementSession, id);
        }
        let content = serde_json::to_value(&run.record).unwrap_or(Value::Null);
        let success = run.abort.is_none();
        TerminalEvent {
            success,
            error: run.abort.clone(),
            responses: vec![StageReport {
                agent_name: "improvement".to_string(),
                success,
                content,
                error: run.abort,
            }],
            saved_data,
            complete: true,
        }
    }

    /// Decide what the improvement loop refines: the selected artifact if
    /// one resolves, otherwise inline content from the routing parameters
    /// or the message itself.
    async fn improvement_input(
        &self,
        request: &GenerationRequest,
        decision: &RoutingDecision,
        selected: Option<SelectedContent>,
    ) -> Result<ImprovementInput, String> {
        if let Some(sel) = selected {
            if let Some(kind) = ArtifactKind::parse(&sel.content_type) {
                return match self.repository.get_by_id(kind, &sel.content_id).await {
                    Ok(Some(fields)) => Ok(ImprovementInput {
                        original_content: Value::Object(fields),
                        content_type: ImprovementContentType::from_kind(kind),
                        source: Some((kind, sel.content_id.clone())),
                    }),
                    Ok(None) => Err(format!(
                        "selected {} {} could not be resolved for improvement",
                        kind, sel.content_id
                    )),
                    Err(e) => Err(e.to_string()),
                };
            }
        }

        let content = decision
            .extracted_parameters
            .get("content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| request.user_message.clone());
        let content_type = decision
            .extracted_parameters
            .get("content_type")
            .and_then(Value::as_str)
            .map(ImprovementContentType::parse)
            .unwrap_or(ImprovementContentType::Text);
        Ok(ImprovementInput {
            original_content: Value::String(content),
            content_type,
            source: None,
        })
    }
}

fn failure(error: String, responses: Vec<StageReport>, saved_data: SavedData) -> TerminalEvent {
    TerminalEvent {
        success: false,
        error: Some(error),
        responses,
        saved_data,
        complete: true,
    }
}
