//! The conversation data model (spec §3): `Message`, `ToolCall`,
//! `ToolResult`, `Artifact`, `Attachment`. Ownership of `Message` persistence
//! belongs to the session/branch store; the loop only ever appends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// A tool invocation requested by the model. `arguments` is opaque to the
/// loop — validated only by the tool that owns `tool_name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// The result of executing a [`ToolCall`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub content: String,
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,
}

impl ToolResult {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
            attachments: Vec::new(),
            artifacts: Vec::new(),
        }
    }

    pub fn err(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: true,
            attachments: Vec::new(),
            artifacts: Vec::new(),
        }
    }
}

/// A binary blob produced by a tool. Converted to an [`Attachment`] with a
/// data-URL fallback when the tool did not supply a hosted `url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub mime_type: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_bytes")]
    pub data: Option<Vec<u8>>,
}

impl Artifact {
    /// Convert to an [`Attachment`], base64-encoding `data` into a data URL
    /// when no hosted `url` was provided.
    pub fn into_attachment(self) -> Attachment {
        let url = self.url.unwrap_or_else(|| {
            let encoded = self
                .data
                .as_deref()
                .map(base64_bytes::encode)
                .unwrap_or_default();
            format!("data:{};base64,{}", self.mime_type, encoded)
        });
        Attachment {
            mime_type: self.mime_type,
            filename: self.filename,
            url,
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn encode(bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }

    pub fn serialize<S: Serializer>(v: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        v.as_deref().map(encode).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(d)?;
        match encoded {
            Some(s) => STANDARD
                .decode(s.as_bytes())
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

/// A tool artifact that has been resolved to a fetchable URL (hosted or
/// data-URL), suitable for attaching to an outbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub mime_type: String,
    pub filename: String,
    pub url: String,
}

/// One message in a session's transcript. The store owns `id`/`created_at`;
/// the loop only ever appends new messages, never mutates in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub direction: Direction,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, Direction::Inbound, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, Direction::Outbound, content)
    }

    pub fn new(role: Role, direction: Direction, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            direction,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            attachments: Vec::new(),
            branch_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }

    pub fn with_tool_results(mut self, results: Vec<ToolResult>) -> Self {
        self.tool_results = results;
        self
    }

    pub fn with_branch(mut self, branch_id: Option<String>) -> Self {
        self.branch_id = branch_id;
        self
    }
}

/// Definition of a tool surfaced to the model backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_without_url_falls_back_to_data_url() {
        let artifact = Artifact {
            mime_type: "text/plain".into(),
            filename: "note.txt".into(),
            url: None,
            data: Some(b"hi".to_vec()),
        };
        let attachment = artifact.into_attachment();
        assert!(attachment.url.starts_with("data:text/plain;base64,"));
    }

    #[test]
    fn artifact_with_url_is_used_verbatim() {
        let artifact = Artifact {
            mime_type: "image/png".into(),
            filename: "x.png".into(),
            url: Some("https://example.com/x.png".into()),
            data: None,
        };
        let attachment = artifact.into_attachment();
        assert_eq!(attachment.url, "https://example.com/x.png");
    }

    #[test]
    fn base64_round_trip_known_vector() {
        assert_eq!(base64_bytes::encode(b"hi"), "aGk=");
        assert_eq!(base64_bytes::encode(b"hello"), "aGVsbG8=");
    }

    #[test]
    fn artifact_data_round_trips_through_json() {
        let artifact = Artifact {
            mime_type: "text/plain".into(),
            filename: "note.txt".into(),
            url: None,
            data: Some(b"round trip me".to_vec()),
        };
        let json = serde_json::to_string(&artifact).unwrap();
        let parsed: Artifact = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.data, Some(b"round trip me".to_vec()));
    }
}
