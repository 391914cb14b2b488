use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Greeting,
    Question,
    PositiveResponse,
    NegativeResponse,
    BookingInterest,
    Reschedule,
    Confirmation,
    Objection,
    OptOut,
    RequestHuman,
    Thanks,
    Unclear,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Greeting => "greeting",
            Intent::Question => "question",
            Intent::PositiveResponse => "positive_response",
            Intent::NegativeResponse => "negative_response",
            Intent::BookingInterest => "booking_interest",
            Intent::Reschedule => "reschedule",
            Intent::Confirmation => "confirmation",
            Intent::Objection => "objection",
            Intent::OptOut => "opt_out",
            Intent::RequestHuman => "request_human",
            Intent::Thanks => "thanks",
            Intent::Unclear => "unclear",
        }
    }

    /// Maps a free-text label (as returned by the classifier) into the closed
    /// intent set. Anything unrecognized becomes `Unclear`.
    pub fn from_label(label: &str) -> Self {
        let normalized = label.trim().to_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "greeting" => Intent::Greeting,
            "question" => Intent::Question,
            "positive_response" | "positive" => Intent::PositiveResponse,
            "negative_response" | "negative" => Intent::NegativeResponse,
            "booking_interest" | "booking" => Intent::BookingInterest,
            "reschedule" => Intent::Reschedule,
            "confirmation" | "confirm" => Intent::Confirmation,
            "objection" => Intent::Objection,
            "opt_out" => Intent::OptOut,
            "request_human" => Intent::RequestHuman,
            "thanks" => Intent::Thanks,
            _ => Intent::Unclear,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IntentEntities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl IntentEntities {
    pub fn is_empty(&self) -> bool {
        self.day.is_none() && self.time.is_none() && self.date.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntentResult {
    pub intent: Intent,
    pub confidence: f32,
    #[serde(default)]
    pub entities: IntentEntities,
    #[serde(default)]
    pub requires_escalation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_reason: Option<String>,
}

impl IntentResult {
    pub fn new(intent: Intent, confidence: f32) -> Self {
        Self {
            intent,
            confidence,
            entities: IntentEntities::default(),
            requires_escalation: false,
            escalation_reason: None,
        }
    }

    pub fn unclear() -> Self {
        Self::new(Intent::Unclear, 0.0)
    }

    pub fn with_entities(mut self, entities: IntentEntities) -> Self {
        self.entities = entities;
        self
    }

    pub fn escalating(mut self, reason: &str) -> Self {
        self.requires_escalation = true;
        self.escalation_reason = Some(reason.to_string());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EscalationCheck {
    pub required: bool,
    pub reason: Option<String>,
}

impl EscalationCheck {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn required(reason: &str) -> Self {
        Self {
            required: true,
            reason: Some(reason.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_label_known() {
        assert_eq!(Intent::from_label("booking_interest"), Intent::BookingInterest);
        assert_eq!(Intent::from_label("Positive Response"), Intent::PositiveResponse);
        assert_eq!(Intent::from_label("opt-out"), Intent::OptOut);
    }

    #[test]
    fn test_from_label_unknown_is_unclear() {
        assert_eq!(Intent::from_label("wants_pizza"), Intent::Unclear);
        assert_eq!(Intent::from_label(""), Intent::Unclear);
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&Intent::RequestHuman).unwrap();
        assert_eq!(json, "\"request_human\"");
    }
}
