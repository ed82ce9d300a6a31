//! The model-backend interface (spec §4 component 1, "One-shot streaming
//! completion with tools"). Concrete HTTP adapters (Anthropic, OpenAI,
//! Google, ...) are external collaborators and live outside this workspace;
//! this crate only defines the contract the runtime drives and the
//! failover/circuit-breaking logic layered over a set of backends.

use futures_util::stream::BoxStream;
use rt_domain::{Result, ToolCall, ToolDefinition};
use serde::{Deserialize, Serialize};

/// A provider-agnostic chat completion request (spec §4.1 "stream phase":
/// packed message list, merged system prompt, filtered tool set, token
/// budget).
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub system_prompt: Option<String>,
    pub messages: Vec<rt_domain::Message>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub model: Option<String>,
}

/// One chunk of a streaming completion (spec §4.1: text chunks, thinking
/// chunks, tool-call chunks, and a terminal summary with token counts).
#[derive(Debug, Clone)]
pub enum StreamChunk {
    Text(String),
    ThinkingStart,
    Thinking(String),
    ThinkingEnd,
    ToolCall(ToolCall),
    Done {
        input_tokens: u32,
        output_tokens: u32,
        finish_reason: Option<String>,
    },
}

/// The non-streaming completion produced once a stream phase finishes
/// accumulating chunks (spec §3 stats fields: input/output tokens).
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Advertised capabilities of a backend/model pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    pub supports_tools: bool,
    pub supports_streaming: bool,
    pub supports_json_mode: bool,
}

impl Default for ModelCapabilities {
    fn default() -> Self {
        Self {
            supports_tools: true,
            supports_streaming: true,
            supports_json_mode: false,
        }
    }
}

/// One LLM backend. Implementations translate [`ChatRequest`] into the
/// wire format of a specific vendor API; none are shipped here.
#[async_trait::async_trait]
pub trait ModelBackend: Send + Sync {
    /// Stream a completion, yielding chunks as they arrive.
    async fn stream(&self, req: ChatRequest) -> Result<BoxStream<'static, Result<StreamChunk>>>;

    fn capabilities(&self) -> ModelCapabilities;

    /// Stable identifier used in events, traces, and failover logs.
    fn id(&self) -> &str;
}
