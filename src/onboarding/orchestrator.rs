//! Conversation orchestrator: the step-gated tool loop.
//!
//! One call to [`ConversationOrchestrator::handle_turn`] processes one user
//! message to completion. Each iteration renders the current step's prompt,
//! asks the provider for a reply, authorizes and executes any requested
//! operations, folds their results back into the transcript and applies the
//! resulting state transitions. Every transition is persisted (awaited)
//! before the next iteration reads the session.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use crate::config::OrchestratorConfig;
use crate::context::{Identity, OperationContext};
use crate::error::{LlmError, OperationError};
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::store::Database;
use crate::tools::{OperationId, OperationRegistry};

pub use super::prompts::ToolCall;
use super::model::{EntryKind, OnboardingSession, TranscriptEntry};
use super::prompts::{self, ParsedResponse};
use super::state::{OnboardingState, StateTransition};
use super::steps::{StepAllowList, completion_event, expected_operation, step_completed};

/// Upper bound on injected directives per turn, whatever the config says.
const NUDGE_CEILING: u32 = 2;

/// Failure categories folded back to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Duplicate,
    NotAvailableInStep,
    Fatal,
}

/// Outcome of one requested operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    pub name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ToolResult {
    fn ok(name: &str, payload: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            success: true,
            payload: Some(payload),
            error_kind: None,
            error_message: None,
        }
    }

    fn failed(name: &str, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            success: false,
            payload: None,
            error_kind: Some(kind),
            error_message: Some(message.into()),
        }
    }

    /// Success, or a duplicate that satisfies the step anyway.
    pub fn satisfies_step(&self) -> bool {
        self.success || self.error_kind == Some(ErrorKind::Duplicate)
    }

    fn operation(&self) -> Option<OperationId> {
        self.name.parse().ok()
    }

    /// Transcript content for the synthetic tool-result turn.
    fn render(&self) -> String {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if self.error_kind == Some(ErrorKind::Duplicate)
            && let Some(map) = value.as_object_mut()
        {
            map.insert(
                "note".to_string(),
                serde_json::Value::String(
                    "This already exists, so this step is done. Move on.".to_string(),
                ),
            );
        }
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// The model produced a final answer.
    Completed,
    /// The loop hit its iteration budget and returned the last text.
    IterationCapReached,
    /// A provider, executor or persistence failure ended the turn.
    Fatal,
}

/// Everything one turn produced.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub reply: String,
    pub state: OnboardingState,
    pub transitions: Vec<StateTransition>,
    pub tool_results: Vec<ToolResult>,
    pub iterations: u32,
    pub nudges: u32,
    pub status: TurnStatus,
}

/// Per-turn bookkeeping.
#[derive(Default)]
struct TurnLog {
    iterations: u32,
    nudges: u32,
    executed_any: bool,
    verified: HashSet<OperationId>,
    transitions: Vec<StateTransition>,
    tool_results: Vec<ToolResult>,
    last_text: String,
}

pub struct ConversationOrchestrator {
    llm: Arc<dyn LlmProvider>,
    operations: Arc<OperationRegistry>,
    allow_list: StepAllowList,
    db: Arc<dyn Database>,
    config: OrchestratorConfig,
}

impl ConversationOrchestrator {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        operations: Arc<OperationRegistry>,
        db: Arc<dyn Database>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            llm,
            operations,
            allow_list: StepAllowList::default(),
            db,
            config,
        }
    }

    pub fn with_allow_list(mut self, allow_list: StepAllowList) -> Self {
        self.allow_list = allow_list;
        self
    }

    /// Process one user message.
    pub async fn handle_turn(
        &self,
        session: &mut OnboardingSession,
        message: &str,
        identity: &Identity,
    ) -> TurnOutcome {
        let user_index = session.conversation.len();
        session.push(TranscriptEntry::user(message));

        // Nudge eligibility is fixed by the user's message and the assistant
        // turn it answers.
        let confirmed_summary = prompts::is_affirmative(message)
            && session
                .conversation
                .last_assistant_before(user_index)
                .is_some_and(|entry| prompts::looks_like_summary(&entry.content));

        self.run(session, identity, confirmed_summary).await
    }

    /// Continue without a user message, e.g. right after consent.
    pub async fn resume(&self, session: &mut OnboardingSession, identity: &Identity) -> TurnOutcome {
        session.push(TranscriptEntry::directive(prompts::resume_directive(
            session.role,
            session.state,
        )));
        self.run(session, identity, false).await
    }

    async fn run(
        &self,
        session: &mut OnboardingSession,
        identity: &Identity,
        confirmed_summary: bool,
    ) -> TurnOutcome {
        let mut log = TurnLog::default();

        loop {
            if log.iterations >= self.config.max_iterations {
                tracing::warn!(
                    session = %session.id,
                    state = %session.state,
                    iterations = log.iterations,
                    tool_results = log.tool_results.len(),
                    "Iteration cap reached; returning last assistant text"
                );
                let last_text = std::mem::take(&mut log.last_text);
                let reply = self.guard_claims(session, &log, last_text);
                return self.finish(session, log, reply, TurnStatus::IterationCapReached).await;
            }
            log.iterations += 1;

            let raw = match self.complete(session).await {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::error!(session = %session.id, error = %e, "Provider call failed");
                    return self.abort(session, log).await;
                }
            };

            let parsed = prompts::parse_tool_calls(&raw);
            tracing::debug!(
                session = %session.id,
                iteration = log.iterations,
                step = %session.state,
                calls = parsed.calls.len(),
                malformed = parsed.malformed,
                "Provider response parsed"
            );
            if parsed.malformed > 0 {
                tracing::warn!(
                    session = %session.id,
                    malformed = parsed.malformed,
                    "Ignoring malformed tool-call blocks"
                );
            }

            if parsed.calls.is_empty() {
                if let Some(operation) = self.nudge_target(session.state, confirmed_summary, &log) {
                    log.nudges += 1;
                    tracing::warn!(
                        session = %session.id,
                        operation = %operation,
                        nudge = log.nudges,
                        "User confirmed but no call was made; injecting directive"
                    );
                    if !parsed.text.is_empty() {
                        session.push(TranscriptEntry::assistant(parsed.text.clone()));
                    }
                    session.push(TranscriptEntry::directive(prompts::nudge_directive(operation)));
                    log.last_text = parsed.text;
                    continue;
                }

                let reply = self.guard_claims(session, &log, parsed.text);
                return self.finish(session, log, reply, TurnStatus::Completed).await;
            }

            if let Some(outcome) = self.execute_calls(session, identity, raw, parsed, &mut log).await {
                return outcome;
            }
        }
    }

    /// The operation to nudge toward, if this stall qualifies.
    fn nudge_target(
        &self,
        state: OnboardingState,
        confirmed_summary: bool,
        log: &TurnLog,
    ) -> Option<OperationId> {
        if !confirmed_summary || log.executed_any || log.nudges >= self.config.max_nudges.min(NUDGE_CEILING) {
            return None;
        }
        expected_operation(state)
    }

    /// Run every call from one response. Returns early only on a fatal
    /// failure.
    async fn execute_calls(
        &self,
        session: &mut OnboardingSession,
        identity: &Identity,
        raw: String,
        parsed: ParsedResponse,
        log: &mut TurnLog,
    ) -> Option<TurnOutcome> {
        // The raw reply (blocks included) stays in the transcript so the model
        // sees its own calls next to their results.
        session.push(TranscriptEntry::assistant(raw));
        log.last_text = parsed.text;

        for call in &parsed.calls {
            let result = self.dispatch(session, identity, call).await;
            session.push(TranscriptEntry::tool_result(&result.name, result.render()));
            log.tool_results.push(result.clone());

            match result.error_kind {
                Some(ErrorKind::Fatal) => {
                    log.executed_any = true;
                    return Some(self.abort(session, std::mem::take(log)).await);
                }
                Some(ErrorKind::NotAvailableInStep) => continue,
                _ => log.executed_any = true,
            }

            if !result.satisfies_step() {
                continue;
            }
            let Some(operation) = result.operation() else {
                continue;
            };
            log.verified.insert(operation);

            if let Some(event) = completion_event(operation) {
                let Ok(next) = session.state.apply(session.role, event) else {
                    continue;
                };
                let transition = StateTransition {
                    from: session.state,
                    to: next,
                    event,
                };
                session.state = next;
                session.updated_at = chrono::Utc::now();
                if let Err(e) = self.db.put_session(session).await {
                    tracing::error!(
                        session = %session.id,
                        error = %e,
                        "Failed to persist state transition"
                    );
                    session.state = transition.from;
                    return Some(self.abort(session, std::mem::take(log)).await);
                }
                tracing::info!(
                    session = %session.id,
                    from = %transition.from,
                    to = %transition.to,
                    cause = %event,
                    "Onboarding state advanced"
                );
                log.transitions.push(transition);
            }
        }
        None
    }

    /// Authorize and execute one call.
    async fn dispatch(
        &self,
        session: &OnboardingSession,
        identity: &Identity,
        call: &ToolCall,
    ) -> ToolResult {
        let operation = match self.allow_list.authorize(session.state, &call.name) {
            Ok(operation) => operation,
            Err(rejection) => {
                tracing::warn!(
                    session = %session.id,
                    tool = %call.name,
                    step = %session.state,
                    "Rejected operation outside the current step"
                );
                return ToolResult::failed(
                    &call.name,
                    ErrorKind::NotAvailableInStep,
                    rejection.to_string(),
                );
            }
        };

        let ctx = OperationContext::new(session.id, session.role, identity.clone());
        let params = serde_json::Value::Object(call.arguments.clone());
        let name = operation.as_str();

        match self
            .operations
            .execute(operation, &params, &ctx, self.config.operation_timeout)
            .await
        {
            Ok(output) => {
                tracing::debug!(
                    session = %session.id,
                    operation = name,
                    elapsed_ms = output.duration.as_millis() as u64,
                    "Operation succeeded"
                );
                ToolResult::ok(name, output.result)
            }
            Err(OperationError::Validation(msg)) => {
                tracing::debug!(session = %session.id, operation = name, %msg, "Operation rejected input");
                ToolResult::failed(name, ErrorKind::Validation, msg)
            }
            Err(OperationError::Duplicate(msg)) => {
                tracing::warn!(
                    session = %session.id,
                    operation = name,
                    %msg,
                    "Resource already exists; treating as step success"
                );
                ToolResult::failed(name, ErrorKind::Duplicate, msg)
            }
            Err(OperationError::Fatal(msg)) => {
                tracing::error!(session = %session.id, operation = name, %msg, "Operation failed");
                ToolResult::failed(name, ErrorKind::Fatal, msg)
            }
        }
    }

    /// One provider round-trip under the configured timeout.
    async fn complete(&self, session: &OnboardingSession) -> Result<String, LlmError> {
        let allowed = self.allow_list.allowed(session.state);
        let schemas = self.operations.schemas_for(allowed).await;
        let request = CompletionRequest::new(render_messages(session, &schemas))
            .with_max_tokens(self.config.max_tokens);

        match tokio::time::timeout(self.config.provider_timeout, self.llm.complete(request)).await {
            Ok(result) => result.map(|response| response.content),
            Err(_) => Err(LlmError::Timeout {
                provider: self.llm.model_name().to_string(),
                timeout: self.config.provider_timeout,
            }),
        }
    }

    /// Replace unverified completion claims with a corrective note. A claim
    /// is verified by a result this turn or by a step the session has
    /// already passed.
    fn guard_claims(&self, session: &OnboardingSession, log: &TurnLog, text: String) -> String {
        let unverified: Vec<OperationId> = prompts::claimed_operations(&text)
            .into_iter()
            .filter(|op| !log.verified.contains(op))
            .filter(|op| !step_completed(session.role, session.state, *op))
            .collect();
        if unverified.is_empty() {
            return text;
        }

        tracing::warn!(
            session = %session.id,
            claimed = ?unverified,
            "Assistant claimed an action no operation performed"
        );
        let kept = prompts::strip_claims(&text, &unverified);
        let note = prompts::corrective_note(&unverified);
        if kept.is_empty() {
            note
        } else {
            format!("{kept}\n\n{note}")
        }
    }

    async fn finish(
        &self,
        session: &mut OnboardingSession,
        log: TurnLog,
        reply: String,
        status: TurnStatus,
    ) -> TurnOutcome {
        let reply = if reply.trim().is_empty() {
            prompts::FALLBACK_REPLY.to_string()
        } else {
            reply
        };
        session.push(TranscriptEntry::assistant(reply.clone()));

        if let Err(e) = self.db.put_session(session).await {
            tracing::error!(session = %session.id, error = %e, "Failed to persist session");
            return self.outcome(session, log, prompts::APOLOGY.to_string(), TurnStatus::Fatal);
        }
        self.outcome(session, log, reply, status)
    }

    /// End the turn on a fatal failure. State already committed this turn
    /// stands; nothing further is applied.
    async fn abort(&self, session: &mut OnboardingSession, log: TurnLog) -> TurnOutcome {
        session.push(TranscriptEntry::assistant(prompts::APOLOGY));
        if let Err(e) = self.db.put_session(session).await {
            tracing::error!(session = %session.id, error = %e, "Failed to persist session after fatal error");
        }
        self.outcome(session, log, prompts::APOLOGY.to_string(), TurnStatus::Fatal)
    }

    fn outcome(
        &self,
        session: &OnboardingSession,
        log: TurnLog,
        reply: String,
        status: TurnStatus,
    ) -> TurnOutcome {
        TurnOutcome {
            reply,
            state: session.state,
            transitions: log.transitions,
            tool_results: log.tool_results,
            iterations: log.iterations,
            nudges: log.nudges,
            status,
        }
    }
}

/// Render the transcript for the provider. Synthetic entries go in as user
/// messages with a visible prefix.
fn render_messages(
    session: &OnboardingSession,
    schemas: &[crate::tools::OperationSchema],
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(prompts::system_prompt(
        session.role,
        session.state,
        schemas,
    ))];
    for entry in session.conversation.entries() {
        let message = match entry.kind {
            EntryKind::System => ChatMessage::system(entry.content.clone()),
            EntryKind::User => ChatMessage::user(entry.content.clone()),
            EntryKind::Assistant => ChatMessage::assistant(entry.content.clone()),
            EntryKind::ToolResult => ChatMessage::user(format!(
                "[tool_result {}] {}",
                entry.name.as_deref().unwrap_or("unknown"),
                entry.content
            )),
            EntryKind::Directive => ChatMessage::user(format!("[directive] {}", entry.content)),
        };
        messages.push(message);
    }
    messages
}
