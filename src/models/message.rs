use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "outbound" => Direction::Outbound,
            _ => Direction::Inbound,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub contact_id: String,
    pub direction: Direction,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// An outbound or inbound message row to insert.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub contact_id: String,
    pub direction: Direction,
    pub channel: String,
    pub content: String,
    pub status: String,
    pub ai_generated: bool,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub ai_model: Option<String>,
    pub ai_cost: f64,
}

impl NewMessage {
    pub fn inbound(contact_id: &str, channel: &str, content: &str) -> Self {
        Self {
            contact_id: contact_id.to_string(),
            direction: Direction::Inbound,
            channel: channel.to_string(),
            content: content.to_string(),
            status: "received".to_string(),
            ai_generated: false,
            input_tokens: 0,
            output_tokens: 0,
            ai_model: None,
            ai_cost: 0.0,
        }
    }

    /// A templated outbound reply that did not consume model tokens.
    pub fn canned(contact_id: &str, channel: &str, content: &str) -> Self {
        Self {
            direction: Direction::Outbound,
            status: "pending".to_string(),
            ..Self::inbound(contact_id, channel, content)
        }
    }

    pub fn tokens_used(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}
