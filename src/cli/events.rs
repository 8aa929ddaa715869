//! Typed view of the agent's stream-json records.
//!
//! Records stay untyped ([`StreamRecord`](super::StreamRecord)) on the wire;
//! these types are an optional lens over them. Unknown record and content
//! types deserialize to an `Unknown` variant rather than failing.

use serde::{Deserialize, Serialize};

/// System initialization record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInit {
    /// Record subtype (e.g., "init").
    #[serde(default)]
    pub subtype: String,
    /// Agent session identifier.
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub cwd: Option<String>,
    /// Tools available in this session.
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// MCP servers and their connection status.
    #[serde(default)]
    pub mcp_servers: Vec<serde_json::Value>,
}

/// A block of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: serde_json::Value,
        #[serde(default)]
        is_error: Option<bool>,
    },
    Thinking {
        thinking: String,
    },
    #[serde(other)]
    Unknown,
}

/// A model or user message carried by a record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "content_blocks")]
    pub content: Vec<ContentBlock>,
}

/// User messages may carry content as a bare string.
fn content_blocks<'de, D>(deserializer: D) -> Result<Vec<ContentBlock>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Content {
        Text(String),
        Blocks(Vec<ContentBlock>),
    }

    Ok(match Content::deserialize(deserializer)? {
        Content::Text(text) => vec![ContentBlock::Text { text }],
        Content::Blocks(blocks) => blocks,
    })
}

/// Final result record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEvent {
    /// Result subtype (e.g., "success", "`error_max_turns`").
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub session_id: String,
    /// Final answer text.
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    /// Total cost in USD.
    #[serde(default, alias = "cost_usd")]
    pub total_cost_usd: Option<f64>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub duration_api_ms: u64,
    #[serde(default)]
    pub num_turns: u32,
}

/// Records emitted by the agent in stream-json format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeEvent {
    System(SystemInit),
    Assistant {
        message: Message,
        #[serde(default)]
        session_id: Option<String>,
    },
    User {
        message: Message,
        #[serde(default)]
        session_id: Option<String>,
    },
    Result(ResultEvent),
    /// Catch-all for unknown record types.
    #[serde(other)]
    Unknown,
}

impl ClaudeEvent {
    /// Returns true if this is the final record of a turn.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Result(_))
    }

    /// Returns the session ID if available.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::System(init) => Some(&init.session_id),
            Self::Result(result) => Some(&result.session_id),
            Self::Assistant { session_id, .. } | Self::User { session_id, .. } => {
                session_id.as_deref()
            }
            Self::Unknown => None,
        }
    }

    /// Concatenated text of an assistant message, or the final result text.
    #[must_use]
    pub fn text(&self) -> Option<String> {
        match self {
            Self::Assistant { message, .. } => {
                let text: String = message
                    .content
                    .iter()
                    .filter_map(|block| match block {
                        ContentBlock::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect();
                (!text.is_empty()).then_some(text)
            }
            Self::Result(result) => result.result.clone(),
            _ => None,
        }
    }

    /// Names of tools the assistant asked to use in this record.
    #[must_use]
    pub fn tool_names(&self) -> Vec<&str> {
        match self {
            Self::Assistant { message, .. } => message
                .content
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolUse { name, .. } => Some(name.as_str()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}
