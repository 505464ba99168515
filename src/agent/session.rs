//! Chat session: the conversational control loop.
//!
//! One user turn is an explicit state machine:
//!
//! ```text
//! AwaitingModel ──answer──────────────► Answered
//!      │  ▲
//!      │  └──all calls ran─────┐
//!      ▼                       │
//! ToolCallsPending ──► Executing (one call at a time, in order)
//!                          ├─ input error ──────► Rejected
//!                          └─ refused, no human ► NeedsConfirmation
//! step budget spent ───────────────────────────► BudgetExhausted
//! ```
//!
//! Every model message and every tool request/result is appended to the audit
//! log before the next state is evaluated.

use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::{Map, Value, json};

use crate::agent::audit::AuditLog;
use crate::agent::console::Console;
use crate::agent::parser::{ParsedResponse, parse_response};
use crate::config::SessionConfig;
use crate::error::{Error, LlmError, ToolError};
use crate::executor::{ExecStatus, ExecutionResult, ToolExecutor};
use crate::gate::{self, ConfirmationPreview, Confirmer, GateDecision};
use crate::llm::{ChatMessage, LlmProvider, Role, ToolCall, ToolCompletionRequest};
use crate::tools::{RiskLevel, ToolRegistry};

/// How a user turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model answered without requesting more tools.
    Answered { content: String },
    /// A high-risk call was refused because nobody could confirm it.
    NeedsConfirmation { tool: String },
    /// A call failed validation (unknown tool, malformed or unsafe arguments).
    Rejected { tool: String, reason: String },
    /// `max_steps` model round-trips without a final answer.
    BudgetExhausted {
        steps: usize,
        last_failure: Option<i32>,
    },
}

impl TurnOutcome {
    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Answered { .. } => 0,
            Self::NeedsConfirmation { .. } => crate::executor::RC_NOT_CONFIRMED,
            Self::Rejected { .. } => crate::executor::RC_INPUT_ERROR,
            Self::BudgetExhausted { last_failure, .. } => last_failure.unwrap_or(1),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Answered { .. } => "answered",
            Self::NeedsConfirmation { .. } => "needs_confirmation",
            Self::Rejected { .. } => "rejected",
            Self::BudgetExhausted { .. } => "budget_exhausted",
        }
    }
}

enum TurnState {
    AwaitingModel,
    ToolCallsPending(Vec<ToolCall>),
    Finished(TurnOutcome),
}

/// What happened to a single executed call.
enum CallDisposition {
    Continue,
    Stop(TurnOutcome),
}

pub struct ChatSession {
    config: SessionConfig,
    registry: Arc<ToolRegistry>,
    llm: Arc<dyn LlmProvider>,
    executor: ToolExecutor,
    confirmer: Option<Arc<dyn Confirmer>>,
    audit: AuditLog,
    messages: Vec<ChatMessage>,
    /// Most recent non-zero tool return code in the current turn.
    last_failure: Option<i32>,
}

impl ChatSession {
    /// Start a session. The system prompt is audited immediately.
    pub fn new(
        config: SessionConfig,
        registry: Arc<ToolRegistry>,
        llm: Arc<dyn LlmProvider>,
        executor: ToolExecutor,
        audit: AuditLog,
    ) -> Result<Self, Error> {
        let executor = executor.with_dry_run(config.dry_run_tools);
        let system = ChatMessage::system(config.system_prompt.clone());
        audit.record(Role::System, json!({"content": system.content}))?;
        Ok(Self {
            config,
            registry,
            llm,
            executor,
            confirmer: None,
            audit,
            messages: vec![system],
            last_failure: None,
        })
    }

    /// Attach the operator used for interactive confirmation.
    pub fn with_confirmer(mut self, confirmer: Arc<dyn Confirmer>) -> Self {
        self.confirmer = Some(confirmer);
        self
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run one user turn to a terminal outcome.
    ///
    /// Model timeouts consume a step and re-enter the loop; other model
    /// failures and audit write failures are returned as errors.
    pub async fn run_turn(&mut self, user_text: &str) -> Result<TurnOutcome, Error> {
        self.messages.push(ChatMessage::user(user_text));
        self.audit.record(Role::User, json!({"content": user_text}))?;
        self.last_failure = None;

        let max_steps = self.config.max_steps.max(1);
        let mut steps = 0usize;
        let mut state = TurnState::AwaitingModel;

        loop {
            state = match state {
                TurnState::AwaitingModel if steps >= max_steps => {
                    tracing::warn!(steps, "Step budget exhausted without an answer");
                    TurnState::Finished(TurnOutcome::BudgetExhausted {
                        steps,
                        last_failure: self.last_failure,
                    })
                }
                TurnState::AwaitingModel => {
                    steps += 1;
                    match self.ask_model(steps).await? {
                        Some(parsed) if parsed.is_answer() => {
                            TurnState::Finished(TurnOutcome::Answered {
                                content: parsed.content,
                            })
                        }
                        Some(parsed) => TurnState::ToolCallsPending(parsed.calls),
                        None => TurnState::AwaitingModel,
                    }
                }
                TurnState::ToolCallsPending(calls) => self.execute_calls(calls).await?,
                TurnState::Finished(outcome) => {
                    self.audit.record(
                        Role::System,
                        json!({"event": "turn_end", "outcome": outcome.label(), "steps": steps}),
                    )?;
                    tracing::info!(outcome = outcome.label(), steps, "Turn finished");
                    return Ok(outcome);
                }
            };
        }
    }

    /// One model round-trip. `None` when the request timed out.
    async fn ask_model(&mut self, step: usize) -> Result<Option<ParsedResponse>, Error> {
        let request =
            ToolCompletionRequest::new(self.messages.clone(), self.registry.tool_definitions());

        let response = match self.llm.complete_with_tools(request).await {
            Ok(response) => response,
            Err(LlmError::Timeout { url, timeout }) => {
                tracing::warn!(step, %url, ?timeout, "Model request timed out");
                self.audit.record(
                    Role::Assistant,
                    json!({
                        "step": step,
                        "error": "timeout",
                        "detail": format!("model request timed out after {}s", timeout.as_secs()),
                    }),
                )?;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let parsed = parse_response(&response.message);
        let wire_calls: Vec<Value> = parsed.calls.iter().map(ToolCall::to_wire).collect();
        self.audit.record(
            Role::Assistant,
            json!({
                "step": step,
                "content": parsed.content,
                "tool_calls": wire_calls,
            }),
        )?;

        self.messages.push(if parsed.calls.is_empty() {
            ChatMessage::assistant(parsed.content.clone())
        } else {
            ChatMessage::assistant_with_calls(parsed.content.clone(), &parsed.calls)
        });

        if self.config.echo && !parsed.content.is_empty() {
            println!("{}", parsed.content);
        }
        if !parsed.calls.is_empty() {
            tracing::info!(step, calls = parsed.calls.len(), shape = ?parsed.shape, "Model requested tools");
        }
        Ok(Some(parsed))
    }

    /// Execute the calls of one model message, strictly in order.
    async fn execute_calls(&mut self, calls: Vec<ToolCall>) -> Result<TurnState, Error> {
        let mut queue: VecDeque<ToolCall> = calls.into();
        while let Some(call) = queue.pop_front() {
            if let CallDisposition::Stop(outcome) = self.execute_call(&call).await? {
                for skipped in queue {
                    self.messages.push(ChatMessage::tool_result(
                        skipped.id,
                        skipped.name,
                        "SKIPPED: turn ended before this call ran.",
                    ));
                }
                return Ok(TurnState::Finished(outcome));
            }
        }
        Ok(TurnState::AwaitingModel)
    }

    async fn execute_call(&mut self, call: &ToolCall) -> Result<CallDisposition, Error> {
        self.audit.record(
            Role::Tool,
            json!({
                "event": "request",
                "tool_call_id": call.id,
                "tool_name": call.name,
                "tool_args": call.raw_arguments,
            }),
        )?;

        let sanitized = match call.raw_arguments.as_object() {
            Some(map) => self.registry.sanitize(&call.name, map),
            None => self.registry.lookup(&call.name).and_then(|_| {
                Err(ToolError::MalformedArguments {
                    tool: call.name.clone(),
                    reason: "arguments are not a JSON object".to_string(),
                })
            }),
        };

        let args = match sanitized {
            Ok(args) => args,
            Err(err) => {
                tracing::warn!(tool = %call.name, error = %err, "Rejected tool call");
                let result = ExecutionResult::input_error(&err);
                self.finish_call(call, RiskLevel::High, &result)?;
                return Ok(CallDisposition::Stop(TurnOutcome::Rejected {
                    tool: call.name.clone(),
                    reason: err.to_string(),
                }));
            }
        };

        let risk = RiskLevel::classify(&args);
        let decision = gate::decide(risk, self.config.auto_approve, self.config.interactive);
        tracing::debug!(tool = %call.name, risk = %risk, ?decision, "Gate decision");

        let preview = || ConfirmationPreview::new(call.name.clone(), risk, args.to_value());

        let result = match (decision, &self.confirmer) {
            (GateDecision::Proceed, _) => self.executor.execute(&args).await?,
            (GateDecision::AskOperator, Some(confirmer)) => {
                if confirmer.confirm(&preview()).await {
                    self.executor.execute(&args).await?
                } else {
                    ExecutionResult::declined()
                }
            }
            (GateDecision::AskOperator, None) | (GateDecision::Refuse, _) => {
                let preview_text = format!("{}\n", preview().to_pretty_json());
                let path = self
                    .executor
                    .artifacts()
                    .write(&call.name, "preview.json", &preview_text)?;
                ExecutionResult::needs_confirmation(path)
            }
        };

        self.finish_call(call, risk, &result)?;

        if result.status == ExecStatus::NeedsConfirmation {
            tracing::warn!(tool = %call.name, "High-risk call refused: confirmation required");
            return Ok(CallDisposition::Stop(TurnOutcome::NeedsConfirmation {
                tool: call.name.clone(),
            }));
        }
        Ok(CallDisposition::Continue)
    }

    /// Audit the result, echo it, and feed it back to the model.
    fn finish_call(
        &mut self,
        call: &ToolCall,
        risk: RiskLevel,
        result: &ExecutionResult,
    ) -> Result<(), Error> {
        let mut payload = Map::new();
        payload.insert("event".into(), json!("result"));
        payload.insert("tool_call_id".into(), json!(call.id));
        payload.insert("tool_name".into(), json!(call.name));
        payload.insert("risk".into(), json!(risk));
        payload.insert("status".into(), json!(result.status));
        payload.insert("returncode".into(), json!(result.returncode));
        payload.insert("stdout_tail".into(), json!(result.stdout_tail));
        payload.insert("stderr_tail".into(), json!(result.stderr_tail));
        payload.insert("artifact_paths".into(), json!(result.artifact_paths));
        self.audit.record(Role::Tool, Value::Object(payload))?;

        if result.returncode != 0 {
            self.last_failure = Some(result.returncode);
        }
        if self.config.echo {
            println!("{}", result.render_summary(&call.name));
        }
        self.messages.push(ChatMessage::tool_result(
            call.id.clone(),
            call.name.clone(),
            result.content_for_llm.clone(),
        ));
        Ok(())
    }

    /// Interactive loop: one turn per operator line until EOF, `exit` or `quit`.
    pub async fn repl(&mut self, console: &Console) -> Result<(), Error> {
        println!("GMV ops chat (type exit or quit to leave)");
        loop {
            let line = match console.read_line("gmv> ").await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    println!();
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Could not read operator input");
                    return Ok(());
                }
            };
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            if matches!(text.to_lowercase().as_str(), "exit" | "quit") {
                return Ok(());
            }
            match self.run_turn(text).await {
                Ok(TurnOutcome::Answered { .. }) => {}
                Ok(outcome) => println!("[turn] {} (rc={})", outcome.label(), outcome.exit_code()),
                Err(Error::Llm(e)) => eprintln!("model request failed: {e}"),
                Err(e) => return Err(e),
            }
        }
    }
}
