// src/llm/orchestrator.rs
// LLM Conversation Orchestrator (§4.5): builds the system prompt, streams a
// multi-turn tool-calling loop against the configured provider, and persists
// the final assistant message.

use crate::audit::AuditLogger;
use crate::db::Db;
use crate::error::AppError;
use crate::executor::CommandExecutor;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider, StreamChunk};
use crate::llm::tools::{builtin_tool_definitions, RUN_COMMAND, UPDATE_HOST_NOTE};
use crate::mcp::registry::McpRegistry;
use crate::models::{Id, MessageRole, Session};
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    TextDelta(String),
    AssistantTyping(bool),
    Done,
}

pub struct OrchestratorConfig {
    pub default_model: String,
    pub max_tool_iterations: u32,
    pub max_turn_wall_clock: Duration,
}

pub struct Orchestrator {
    db: Db,
    executor: CommandExecutor,
    mcp: Arc<McpRegistry>,
    provider: Arc<dyn LlmProvider>,
    audit: AuditLogger,
    config: OrchestratorConfig,
}

struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl Orchestrator {
    pub fn new(
        db: Db,
        executor: CommandExecutor,
        mcp: Arc<McpRegistry>,
        provider: Arc<dyn LlmProvider>,
        audit: AuditLogger,
        config: OrchestratorConfig,
    ) -> Self {
        Self { db, executor, mcp, provider, audit, config }
    }

    fn build_system_prompt(&self, organization_id: Id, user_id: Id, session: &Session) -> anyhow::Result<String> {
        let mut sections = Vec::new();
        sections.push(
            "You are InfraLLM's operations assistant. You control a fleet of hosts over SSH, \
             gated by policy, and external MCP tools. Be precise and narrate your intent before \
             running commands."
                .to_string(),
        );

        if let Some(settings) = self.db.get_prompt_settings(organization_id, user_id)? {
            if let Some(custom) = settings.system_prompt {
                sections.push(custom);
            }
            if let Some(personalization) = settings.personalization_prompt {
                sections.push(personalization);
            }
        }

        let mut host_section = String::from("Hosts in scope for this session:\n");
        for host_id in &session.host_ids {
            if let Some(host) = self.db.get_host(organization_id, *host_id)? {
                let note = self.db.get_host_note(organization_id, *host_id)?;
                let note_excerpt = note
                    .map(|n| n.content.chars().take(280).collect::<String>())
                    .unwrap_or_else(|| "(no notes yet)".to_string());
                host_section.push_str(&format!(
                    "- {} ({}:{}) tags={:?} env={} status={:?} note: {}\n",
                    host.id, host.hostname, host.port, host.tags, host.environment, host.status, note_excerpt
                ));

                let policies = self.db.policies_applicable_to(organization_id, user_id, host.id)?;
                for policy in policies {
                    host_section.push_str(&format!(
                        "  policy '{}': allow={:?} deny={:?} requireApproval={}\n",
                        policy.name, policy.allowed_command_patterns, policy.denied_command_patterns, policy.require_approval
                    ));
                }
            }
        }
        sections.push(host_section);

        Ok(sections.join("\n\n"))
    }

    fn conversation_history(&self, session_id: Id) -> anyhow::Result<Vec<ChatMessage>> {
        // Token-budget capping: drop the oldest messages once the history
        // exceeds a soft cap, replacing them with a one-line placeholder
        // rather than silently losing context (§4.5 step 3).
        const MAX_MESSAGES: usize = 40;
        let messages = self.db.list_messages_for_session(session_id)?;
        let mut chat_messages = Vec::new();
        if messages.len() > MAX_MESSAGES {
            chat_messages.push(ChatMessage {
                role: "user".to_string(),
                content: Value::String(format!(
                    "[{} earlier messages omitted for length]",
                    messages.len() - MAX_MESSAGES
                )),
            });
        }
        for message in messages.iter().rev().take(MAX_MESSAGES).collect::<Vec<_>>().into_iter().rev() {
            let role = match message.role {
                MessageRole::User => "user",
                MessageRole::Assistant => "assistant",
            };
            chat_messages.push(ChatMessage {
                role: role.to_string(),
                content: Value::String(message.content.clone()),
            });
        }
        Ok(chat_messages)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn send_message_stream(
        &self,
        organization_id: Id,
        user_id: Id,
        session: &Session,
        user_message: &str,
        model_override: Option<String>,
        events: UnboundedSender<OrchestratorEvent>,
        cancel: CancellationToken,
    ) -> Result<(), AppError> {
        self.db
            .create_message(session.id, MessageRole::User, user_message, None, 0)
            .map_err(AppError::Internal)?;
        self.db.touch_session_message(session.id, 0, 0.0).map_err(AppError::Internal)?;

        let model = model_override.unwrap_or_else(|| self.config.default_model.clone());
        let system_prompt = self.build_system_prompt(organization_id, user_id, session).map_err(AppError::Internal)?;
        let mut history = self.conversation_history(session.id).map_err(AppError::Internal)?;

        let mut tools = builtin_tool_definitions();
        tools.extend(
            self.mcp
                .get_tool_definitions(organization_id)
                .await
                .map_err(|e| AppError::UpstreamFailure(e.to_string()))?,
        );

        let started = Instant::now();
        let mut total_tokens: i64 = 0;
        let mut final_text = String::new();
        let mut tool_trace = Vec::new();

        let _ = events.send(OrchestratorEvent::AssistantTyping(true));

        for iteration in 0..self.config.max_tool_iterations {
            if cancel.is_cancelled() {
                return self.finish_canceled(session.id, &final_text, &events).await;
            }
            if started.elapsed() > self.config.max_turn_wall_clock {
                return self.finish_capped(session.id, &final_text, total_tokens, "wall-clock limit", &events);
            }

            // Text produced during this loop iteration only; `final_text` is the
            // running total persisted at the end of the turn, but history must
            // only ever see each round's own delta, not the whole turn so far.
            let mut round_text = String::new();

            let request = CompletionRequest {
                model: model.clone(),
                system_prompt: system_prompt.clone(),
                messages: history.clone(),
                tools: tools.clone(),
                max_tokens: 4096,
            };

            let mut stream = self
                .provider
                .send_stream(request)
                .await
                .map_err(|e| AppError::UpstreamFailure(e.to_string()))?;

            let mut pending_calls: Vec<PendingToolCall> = Vec::new();
            let mut stop_reason = String::new();

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return self.finish_canceled(session.id, &final_text, &events).await;
                    }
                    chunk = stream.next() => {
                        let Some(chunk) = chunk else { break };
                        match chunk.map_err(|e| AppError::UpstreamFailure(e.to_string()))? {
                            StreamChunk::TextDelta(text) => {
                                final_text.push_str(&text);
                                round_text.push_str(&text);
                                let _ = events.send(OrchestratorEvent::TextDelta(text));
                            }
                            StreamChunk::ToolUseComplete { tool_call, .. } => {
                                pending_calls.push(PendingToolCall {
                                    id: tool_call.id,
                                    name: tool_call.name,
                                    arguments: tool_call.arguments,
                                });
                            }
                            StreamChunk::Usage(usage) => {
                                total_tokens += (usage.input_tokens + usage.output_tokens) as i64;
                            }
                            StreamChunk::Done { stop_reason: reason } => {
                                stop_reason = reason;
                            }
                            StreamChunk::ToolUseStart { .. } | StreamChunk::ToolUseInputDelta { .. } => {}
                        }
                    }
                }
            }

            if pending_calls.is_empty() || stop_reason != "tool_use" {
                break;
            }

            history.push(ChatMessage { role: "assistant".to_string(), content: Value::String(round_text.clone()) });

            for call in pending_calls {
                let result = self
                    .dispatch_tool(organization_id, user_id, session, &call)
                    .await;
                tool_trace.push(serde_json::json!({
                    "id": call.id,
                    "name": call.name,
                    "arguments": call.arguments,
                    "result": result.clone().unwrap_or_else(|e| e.to_string()),
                }));
                let content = result.unwrap_or_else(|e| format!("error: {e}"));
                history.push(ChatMessage {
                    role: "user".to_string(),
                    content: serde_json::json!([{ "type": "tool_result", "tool_use_id": call.id, "content": content }]),
                });
            }

            if iteration + 1 == self.config.max_tool_iterations {
                return self.finish_capped(session.id, &final_text, total_tokens, "tool-iteration limit", &events);
            }
        }

        self.db
            .create_message(
                session.id,
                MessageRole::Assistant,
                &final_text,
                Some(Value::Array(tool_trace)),
                total_tokens,
            )
            .map_err(AppError::Internal)?;
        self.db
            .touch_session_message(session.id, total_tokens, estimate_cost(total_tokens))
            .map_err(AppError::Internal)?;

        if session.title.is_none() {
            let message_count = self.db.list_messages_for_session(session.id).map_err(AppError::Internal)?.len();
            if message_count >= 2 {
                self.spawn_title_generation(session.id, user_message.to_string());
            }
        }

        let _ = events.send(OrchestratorEvent::AssistantTyping(false));
        let _ = events.send(OrchestratorEvent::Done);
        Ok(())
    }

    /// Requests a short title from the model in a detached task (§4.5 step 6)
    /// so the first turn's latency isn't blocked on it. Best-effort: a failed
    /// title request just leaves the session untitled.
    fn spawn_title_generation(&self, session_id: Id, first_user_message: String) {
        let provider = Arc::clone(&self.provider);
        let db = self.db.clone();
        let model = self.config.default_model.clone();
        tokio::spawn(async move {
            let request = CompletionRequest {
                model,
                system_prompt: "Reply with a plain 3-6 word title summarizing the user's request below. \
                                 No punctuation, no quotes, no preamble."
                    .to_string(),
                messages: vec![ChatMessage { role: "user".to_string(), content: Value::String(first_user_message) }],
                tools: Vec::new(),
                max_tokens: 32,
            };

            let mut stream = match provider.send_stream(request).await {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(error = %err, "title generation request failed");
                    return;
                }
            };

            let mut title = String::new();
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(StreamChunk::TextDelta(text)) => title.push_str(&text),
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "title generation stream errored");
                        return;
                    }
                }
            }

            let title: String = title.trim().chars().take(60).collect();
            if !title.is_empty() {
                if let Err(err) = db.set_session_title(session_id, &title) {
                    warn!(error = %err, "failed to persist generated session title");
                }
            }
        });
    }

    async fn dispatch_tool(
        &self,
        organization_id: Id,
        user_id: Id,
        session: &Session,
        call: &PendingToolCall,
    ) -> Result<String, AppError> {
        let args: Value = serde_json::from_str(&call.arguments).unwrap_or(Value::Null);

        if call.name.starts_with("mcp__") {
            return self
                .mcp
                .dispatch(&call.name, args, organization_id)
                .await
                .map_err(|e| AppError::UpstreamFailure(e.to_string()));
        }

        match call.name.as_str() {
            RUN_COMMAND => {
                let host_id: Id = args
                    .get("hostId")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| AppError::InvalidArgument("run_command requires hostId".to_string()))?;
                let command = args
                    .get("command")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| AppError::InvalidArgument("run_command requires command".to_string()))?;
                let reasoning = args.get("reasoning").and_then(|v| v.as_str());

                match self
                    .executor
                    .execute(organization_id, user_id, host_id, Some(session.id), command, false, reasoning)
                    .await
                {
                    Ok(outcome) => Ok(format!(
                        "exitCode={:?}\nstdout:\n{}\nstderr:\n{}",
                        outcome.execution.exit_code, outcome.execution.stdout, outcome.execution.stderr
                    )),
                    Err(AppError::PolicyDenied { reason, matched_pattern }) => {
                        Ok(format!("denied: {reason} (pattern: {matched_pattern:?})"))
                    }
                    Err(err) => Err(err),
                }
            }
            UPDATE_HOST_NOTE => {
                let host_id: Id = args
                    .get("hostId")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| AppError::InvalidArgument("update_host_note requires hostId".to_string()))?;
                let content = args
                    .get("content")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| AppError::InvalidArgument("update_host_note requires content".to_string()))?;
                self.db
                    .upsert_host_note(organization_id, host_id, content)
                    .map_err(AppError::Internal)?;
                Ok("note updated".to_string())
            }
            other => {
                warn!(tool = other, "unknown tool requested by model");
                Ok(format!("unknown tool: {other}"))
            }
        }
    }

    async fn finish_canceled(
        &self,
        session_id: Id,
        partial_text: &str,
        events: &UnboundedSender<OrchestratorEvent>,
    ) -> Result<(), AppError> {
        let content = format!("{partial_text}\n[canceled]");
        self.db
            .create_message(session_id, MessageRole::Assistant, &content, None, 0)
            .map_err(AppError::Internal)?;
        let _ = events.send(OrchestratorEvent::AssistantTyping(false));
        let _ = events.send(OrchestratorEvent::Done);
        Err(AppError::Canceled)
    }

    fn finish_capped(
        &self,
        session_id: Id,
        partial_text: &str,
        total_tokens: i64,
        reason: &str,
        events: &UnboundedSender<OrchestratorEvent>,
    ) -> Result<(), AppError> {
        info!(reason, "terminating tool loop due to safety cap");
        let content = format!("{partial_text}\n[stopped: {reason}]");
        self.db
            .create_message(session_id, MessageRole::Assistant, &content, None, total_tokens)
            .map_err(AppError::Internal)?;
        let _ = events.send(OrchestratorEvent::AssistantTyping(false));
        let _ = events.send(OrchestratorEvent::Done);
        Ok(())
    }
}

fn estimate_cost(total_tokens: i64) -> f64 {
    // Flat per-1k-token rate; providers expose real pricing out of scope here.
    (total_tokens as f64 / 1000.0) * 0.01
}
