//! Compaction manager (spec §4.9 design notes, config table's `Compaction`
//! entry): a threshold-triggered memory-flush protocol. When the packed
//! context crosses `ThresholdPercent` of the token budget, the loop asks
//! the model to confirm a flush; on silence past `ConfirmationTimeout`,
//! `AutoCompactOnTimeout` decides whether to compact anyway.
//!
//! Adapted from the teacher's `runtime::compact` module (boundary scan +
//! LLM-generated summary appended as a marker line), generalized from a
//! turn-count threshold to the domain's percent-of-budget threshold and
//! wrapped in the confirmation handshake the expanded config adds.

use std::time::Duration;

use rt_domain::{CompactionConfig, Message, Role};
use rt_providers::{ChatRequest, ModelBackend, StreamChunk};
use futures_util::StreamExt;

/// A marker prefix on a `System` message's content identifying it as a
/// compaction summary. Scanning for this prefix finds the boundary without
/// needing a side channel on `Message`.
const MARKER_PREFIX: &str = "[compaction summary]\n";

fn is_marker(message: &Message) -> bool {
    message.role == Role::System && message.content.starts_with(MARKER_PREFIX)
}

/// Index of the first message after the most recent compaction marker, or
/// 0 if none exists. The marker itself is kept (it reads as a system
/// message summarizing everything before it).
pub fn compaction_boundary(history: &[Message]) -> usize {
    history
        .iter()
        .rposition(is_marker)
        .unwrap_or(0)
}

/// Outcome of asking whether to proceed with a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushDecision {
    Proceed,
    Skip,
}

pub struct CompactionManager<'a> {
    config: &'a CompactionConfig,
}

impl<'a> CompactionManager<'a> {
    pub fn new(config: &'a CompactionConfig) -> Self {
        Self { config }
    }

    /// Whether `token_estimate` against `max_tokens` has crossed the
    /// configured threshold.
    pub fn should_trigger(&self, token_estimate: u64, max_tokens: u32) -> bool {
        if !self.config.enabled || max_tokens == 0 {
            return false;
        }
        let percent = (token_estimate * 100) / max_tokens as u64;
        percent >= self.config.threshold_percent as u64
    }

    /// Wait for a confirmation signal, falling back to the configured
    /// timeout policy when none arrives in time.
    pub async fn await_confirmation(&self, confirm: tokio::sync::oneshot::Receiver<bool>) -> FlushDecision {
        let timeout = Duration::from_millis(self.config.confirmation_timeout_ms);
        match tokio::time::timeout(timeout, confirm).await {
            Ok(Ok(true)) => FlushDecision::Proceed,
            Ok(Ok(false)) | Ok(Err(_)) => FlushDecision::Skip,
            Err(_) => {
                if self.config.auto_compact_on_timeout {
                    FlushDecision::Proceed
                } else {
                    FlushDecision::Skip
                }
            }
        }
    }

    /// The prompt sent to the model when requesting a summary, falling
    /// back to a sensible default when the config leaves it unset.
    pub fn flush_prompt(&self) -> &str {
        self.config
            .flush_prompt
            .as_deref()
            .unwrap_or(
                "Summarize the conversation so far, preserving the active goal, \
                 key decisions, open threads, and any tool state worth keeping. \
                 Be concise; omit pleasantries.",
            )
    }

    /// Split active history (after the last marker) into messages to fold
    /// into a summary versus the most recent `keep_last` user turns to
    /// keep verbatim.
    pub fn split_for_compaction<'h>(&self, history: &'h [Message], keep_last: usize) -> (&'h [Message], &'h [Message]) {
        let boundary = compaction_boundary(history);
        let active_start = if matches!(history.get(boundary), Some(m) if is_marker(m)) {
            boundary + 1
        } else {
            boundary
        };
        let active = &history[active_start..];

        let mut user_turns = 0;
        let mut keep_from = active.len();
        for (i, message) in active.iter().enumerate().rev() {
            if message.role == Role::User {
                user_turns += 1;
                if user_turns >= keep_last {
                    keep_from = i;
                    break;
                }
            }
        }
        (&active[..keep_from], &active[keep_from..])
    }

    /// Ask `backend` to summarize `to_compact`, collecting the streamed
    /// text chunks into one string.
    pub async fn summarize(
        &self,
        backend: &dyn ModelBackend,
        to_compact: &[Message],
    ) -> rt_domain::Result<String> {
        let transcript = render_transcript(to_compact);
        let request = ChatRequest {
            system_prompt: Some(self.flush_prompt().to_string()),
            messages: vec![Message::user(transcript)],
            tools: Vec::new(),
            max_tokens: Some(2000),
            temperature: Some(0.1),
            model: None,
        };
        let mut stream = backend.stream(request).await?;
        let mut summary = String::new();
        while let Some(chunk) = stream.next().await {
            if let StreamChunk::Text(text) = chunk? {
                summary.push_str(&text);
            }
        }
        Ok(summary)
    }

    /// Build the marker message to append in place of `to_compact`.
    pub fn marker_message(&self, summary: &str) -> Message {
        Message::new(Role::System, rt_domain::Direction::Outbound, format!("{MARKER_PREFIX}{summary}"))
    }
}

fn render_transcript(messages: &[Message]) -> String {
    let mut buf = String::new();
    for message in messages {
        let label = match message.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::Tool => "Tool",
            Role::System => "System",
        };
        buf.push_str(label);
        buf.push_str(": ");
        if message.content.len() > 2000 {
            buf.push_str(&message.content[..1000]);
            buf.push_str(" [...] ");
            buf.push_str(&message.content[message.content.len() - 500..]);
        } else {
            buf.push_str(&message.content);
        }
        buf.push('\n');
    }
    buf
}
