//! Demo collaborators for the `run` command: a scripted model backend and
//! two side-effect-free tools, standing in for the HTTP-backed providers
//! and the tool library the core treats as external collaborators.
//!
//! Grounded on the same "feed fixed chunks, record calls" idiom the
//! workspace already tests itself with (`rt_runtime::runtime`'s
//! `ScriptedBackend`/`EchoTool` test doubles), promoted here to something
//! a user can actually run without an API key.

use std::sync::Arc;

use futures_util::stream::{self, BoxStream};
use rt_domain::{Result, ToolCall, ToolErrorKind, ToolResult};
use rt_executor::tool::Tool;
use rt_providers::{ChatRequest, ModelBackend, ModelCapabilities, StreamChunk};

/// Answers every request by echoing the last user message back with no
/// tool calls — enough to exercise the full loop without a network
/// dependency.
pub struct EchoBackend;

#[async_trait::async_trait]
impl ModelBackend for EchoBackend {
    async fn stream(&self, req: ChatRequest) -> Result<BoxStream<'static, Result<StreamChunk>>> {
        let last_user = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == rt_domain::Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let reply = format!("echo: {last_user}");
        let chunks = vec![
            Ok(StreamChunk::Text(reply)),
            Ok(StreamChunk::Done {
                input_tokens: last_user.split_whitespace().count() as u32,
                output_tokens: 2,
                finish_reason: Some("stop".to_string()),
            }),
        ];
        Ok(Box::pin(stream::iter(chunks)))
    }

    fn capabilities(&self) -> ModelCapabilities {
        ModelCapabilities::default()
    }

    fn id(&self) -> &str {
        "demo-echo"
    }
}

/// Echoes its arguments back as the tool result.
pub struct EchoTool;

#[async_trait::async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    async fn call(&self, call: &ToolCall) -> std::result::Result<ToolResult, ToolErrorKind> {
        Ok(ToolResult::ok(call.call_id.clone(), call.arguments.to_string()))
    }
}

/// Returns the current UTC time — a tool with observable, non-arbitrary
/// output, useful for checking the executor actually dispatched it.
pub struct ClockTool;

#[async_trait::async_trait]
impl Tool for ClockTool {
    fn name(&self) -> &str {
        "clock"
    }

    async fn call(&self, call: &ToolCall) -> std::result::Result<ToolResult, ToolErrorKind> {
        Ok(ToolResult::ok(call.call_id.clone(), chrono::Utc::now().to_rfc3339()))
    }
}

pub fn demo_tool_catalogue() -> rt_executor::tool::ToolCatalogue {
    let mut catalogue = rt_executor::tool::ToolCatalogue::new();
    catalogue.register(Arc::new(EchoTool));
    catalogue.register(Arc::new(ClockTool));
    catalogue
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn echo_backend_reflects_last_user_message() {
        let backend = EchoBackend;
        let req = ChatRequest {
            messages: vec![rt_domain::Message::user("hello there")],
            ..ChatRequest::default()
        };
        let mut stream = backend.stream(req).await.unwrap();
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            if let StreamChunk::Text(t) = chunk.unwrap() {
                text.push_str(&t);
            }
        }
        assert_eq!(text, "echo: hello there");
    }

    #[tokio::test]
    async fn clock_tool_returns_parseable_timestamp() {
        let tool = ClockTool;
        let call = ToolCall {
            call_id: "c1".into(),
            tool_name: "clock".into(),
            arguments: serde_json::json!({}),
        };
        let result = tool.call(&call).await.unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&result.content).is_ok());
    }
}
