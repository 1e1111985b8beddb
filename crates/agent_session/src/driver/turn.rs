use std::sync::atomic::Ordering;
use std::sync::Arc;

use agent_protocol::{ConversationItem, ExecutionMode, ToolCallItem};
use serde_json::{json, Value};
use stream_api::{ApiError, ChatRequest, Frame};
use tool_sandbox::ToolContext;

use super::SessionDriver;
use crate::remote::ApiRemoteTools;
use crate::update::SessionUpdate;

const ABORTED_TOOL_ERROR: &str = "turn aborted before tool execution";

/// What one streamed response left behind.
struct RoundOutcome {
    /// Calls this round that still need a local answer.
    tool_calls: Vec<ToolCallItem>,
    aborted: bool,
}

impl SessionDriver {
    pub(super) async fn submit_user_turn(&mut self, text: String) {
        if !self.ensure_logged_in() {
            return;
        }
        let checkpoint = self.session.items.len();
        self.session.items.push(ConversationItem::user_text(text));
        self.run_turn(None, checkpoint).await;
    }

    pub(super) async fn submit_init(&mut self) {
        if !self.ensure_logged_in() {
            return;
        }
        let checkpoint = self.session.items.len();
        self.run_turn(Some("init"), checkpoint).await;
    }

    /// Streams one response, then keeps answering local tool calls and
    /// resubmitting until the remote side stops asking or the depth cap hits.
    async fn run_turn(&mut self, action: Option<&str>, checkpoint: usize) {
        self.cancel.store(false, Ordering::SeqCst);
        self.set_busy(true);

        let mut request = self.chat_request(action.map(str::to_string), None);
        let mut rollback = Some(checkpoint);
        let mut depth = 0usize;

        loop {
            let round = self.stream_round(&request, rollback.take()).await;
            self.sync_history();

            let local = self.session.execution_mode == ExecutionMode::Local;
            if !local || round.tool_calls.is_empty() {
                break;
            }
            if round.aborted {
                for call in &round.tool_calls {
                    self.answer_aborted(call);
                }
                break;
            }

            let mut last_output = Value::Null;
            for call in &round.tool_calls {
                last_output = self.execute_tool(call).await;
            }
            self.sync_history();

            if self.cancel.load(Ordering::SeqCst) {
                self.line("Cancelled.");
                break;
            }
            if depth >= self.max_tool_depth {
                tracing::warn!(tab_id = self.tab_id, depth, "tool call depth limit reached");
                self.line(format!(
                    "Tool call limit ({}) reached; stopping this turn.",
                    self.max_tool_depth
                ));
                break;
            }
            depth += 1;
            request = self.chat_request(Some("tool_result".to_string()), Some(last_output));
        }

        self.sync_history();
        self.set_busy(false);
    }

    fn chat_request(&self, action: Option<String>, tool_result: Option<Value>) -> ChatRequest {
        let mut request = ChatRequest::new(self.session.items.clone(), self.session.mode);
        request.execution_mode = Some(self.session.execution_mode);
        request.conversation_id = self.session.conversation_id.clone();
        request.app_id = self.session.app_id.clone();
        request.action = action;
        request.tool_result = tool_result;
        request
    }

    /// Submits `request` and consumes its frames.
    ///
    /// `rollback` is the transcript length to restore when the request fails
    /// before any frame arrives.
    async fn stream_round(&mut self, request: &ChatRequest, rollback: Option<usize>) -> RoundOutcome {
        let stream = match self.api.stream_chat(request, Some(&self.cancel)).await {
            Ok(stream) => stream,
            Err(error) => {
                if let Some(len) = rollback {
                    self.session.items.truncate(len);
                }
                self.report_stream_error(&error);
                return RoundOutcome {
                    tool_calls: Vec::new(),
                    aborted: true,
                };
            }
        };

        let cancel = Arc::clone(&self.cancel);
        let tab_id = self.tab_id;
        let mut stream = stream
            .with_cancel(move || cancel.load(Ordering::SeqCst))
            .on_usage(move |usage| {
                tracing::debug!(tab_id, total_tokens = usage.total_tokens, "usage reported");
            })
            .on_stop(move || tracing::debug!(tab_id, "chat stream stopped"));

        let round_start = self.session.items.len();
        let mut live = String::new();
        let mut saw_assistant = false;
        let mut received_frame = false;
        let mut failure = None;

        loop {
            match stream.next().await {
                Ok(Some(frame)) => {
                    received_frame = true;
                    self.apply_frame(frame, &mut live, &mut saw_assistant);
                }
                Ok(None) => break,
                Err(error) => {
                    failure = Some(error);
                    break;
                }
            }
        }
        let cancelled = stream.was_cancelled();
        drop(stream);

        if failure.is_some() && !received_frame {
            if let Some(len) = rollback {
                self.session.items.truncate(len);
            }
        }
        if !saw_assistant && !live.trim().is_empty() {
            self.session
                .items
                .push(ConversationItem::assistant_text(live.clone()));
        }

        let round_items = &self.session.items[round_start.min(self.session.items.len())..];
        for item in round_items {
            if let Some(text) = display_line(item) {
                self.line(text);
            }
        }
        if !live.is_empty() {
            self.send(SessionUpdate::Stream(String::new()));
        }

        let tool_calls = unanswered_calls(round_items);
        if let Some(error) = &failure {
            self.report_stream_error(error);
        } else if cancelled {
            self.line("Cancelled.");
        }

        RoundOutcome {
            tool_calls,
            aborted: failure.is_some() || cancelled,
        }
    }

    fn apply_frame(&mut self, frame: Frame, live: &mut String, saw_assistant: &mut bool) {
        match frame {
            Frame::TextDelta(text) | Frame::ReasoningDelta(text) => {
                live.push_str(&text);
                self.send(SessionUpdate::Stream(live.clone()));
            }
            Frame::ConversationId(id) => {
                if self.session.conversation_id.is_none() {
                    tracing::info!(tab_id = self.tab_id, conversation_id = %id, "conversation started");
                    self.session.conversation_id = Some(id);
                    self.persist();
                    self.publish_state();
                }
            }
            Frame::Data { items, usage } => {
                for item in items {
                    if item.is_assistant_message() {
                        *saw_assistant = true;
                    }
                    self.observe_app_id(&item);
                    self.session.items.push(item);
                }
                if let Some(usage) = usage {
                    self.usage = Some(usage);
                    self.publish_state();
                }
            }
        }
    }

    fn observe_app_id(&mut self, item: &ConversationItem) {
        if self.session.app_id.is_some() {
            return;
        }
        if let Some(app_id) = item.app_id() {
            tracing::info!(tab_id = self.tab_id, app_id = %app_id, "app linked by response");
            self.session.app_id = Some(app_id);
            self.persist();
            self.publish_state();
        }
    }

    async fn execute_tool(&mut self, call: &ToolCallItem) -> Value {
        tracing::info!(tab_id = self.tab_id, tool = %call.name, call_id = %call.call_id, "executing tool call");
        let remote = ApiRemoteTools::new(&self.api);
        let ctx = ToolContext {
            remote: &remote,
            app_id: self.session.app_id.as_deref(),
        };
        let output = self.sandbox.execute(call, ctx).await;

        let item = ConversationItem::tool_output(&call.call_id, &call.name, output.clone());
        self.line(item.summary());
        self.observe_app_id(&item);
        self.session.items.push(item);
        output
    }

    fn answer_aborted(&mut self, call: &ToolCallItem) {
        let output = json!({ "ok": false, "error": ABORTED_TOOL_ERROR });
        self.session.items.push(ConversationItem::tool_output(
            &call.call_id,
            &call.name,
            output,
        ));
    }

    fn report_stream_error(&self, error: &ApiError) {
        match error {
            ApiError::Cancelled => self.line("Cancelled."),
            error => {
                tracing::warn!(tab_id = self.tab_id, error = %error, "chat turn failed");
                self.line(format!("Error: {error}"));
            }
        }
    }
}

/// Tool calls in `items` without a matching `tool_output` in the same slice.
fn unanswered_calls(items: &[ConversationItem]) -> Vec<ToolCallItem> {
    items
        .iter()
        .filter_map(|item| match item {
            ConversationItem::ToolCall(call) => Some(call),
            _ => None,
        })
        .filter(|call| {
            !items.iter().any(|item| {
                matches!(item, ConversationItem::ToolOutput(output) if output.call_id == call.call_id)
            })
        })
        .cloned()
        .collect()
}

fn display_line(item: &ConversationItem) -> Option<String> {
    match item {
        ConversationItem::Message(message) if item.is_assistant_message() => {
            let text = message.text();
            (!text.trim().is_empty()).then_some(text)
        }
        ConversationItem::ToolCall(_) | ConversationItem::AppEvent(_) => Some(item.summary()),
        _ => None,
    }
}
