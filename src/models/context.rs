use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::intent::Intent;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Goal {
    #[default]
    InitialEngagement,
    QualifyLead,
    AnswerQuestion,
    HandleObjection,
    OfferBooking,
    ConfirmBooking,
    Closing,
}

impl Goal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Goal::InitialEngagement => "initial_engagement",
            Goal::QualifyLead => "qualify_lead",
            Goal::AnswerQuestion => "answer_question",
            Goal::HandleObjection => "handle_objection",
            Goal::OfferBooking => "offer_booking",
            Goal::ConfirmBooking => "confirm_booking",
            Goal::Closing => "closing",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum QualificationStatus {
    #[default]
    Unknown,
    Partial,
    Qualified,
    Disqualified,
}

impl QualificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualificationStatus::Unknown => "unknown",
            QualificationStatus::Partial => "partial",
            QualificationStatus::Qualified => "qualified",
            QualificationStatus::Disqualified => "disqualified",
        }
    }

    /// Status is a pure function of the criteria sets: any miss disqualifies,
    /// covering every configured criterion qualifies, any match is partial.
    pub fn derive(matched: &[String], missed: &[String], configured: &[String]) -> Self {
        if !missed.is_empty() {
            QualificationStatus::Disqualified
        } else if configured.iter().all(|c| matched.contains(c)) {
            QualificationStatus::Qualified
        } else if !matched.is_empty() {
            QualificationStatus::Partial
        } else {
            QualificationStatus::Unknown
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_decision_maker: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_size: Option<String>,
    #[serde(default)]
    pub pain_points: Vec<String>,
    #[serde(default)]
    pub objections: Vec<String>,
    #[serde(default)]
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Qualification {
    #[serde(default)]
    pub status: QualificationStatus,
    #[serde(default)]
    pub criteria_matched: Vec<String>,
    #[serde(default)]
    pub criteria_unknown: Vec<String>,
    #[serde(default)]
    pub criteria_missed: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    #[serde(default)]
    pub current_goal: Goal,
    #[serde(default)]
    pub turn_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_intent: Option<Intent>,
    #[serde(default)]
    pub escalation_attempts: u32,
    #[serde(default)]
    pub follow_ups_sent: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationContext {
    #[serde(default)]
    pub extracted_info: ExtractedInfo,
    #[serde(default)]
    pub qualification: Qualification,
    #[serde(default)]
    pub state: ConversationState,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub message_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn test_derive_status_precedence() {
        let configured = s(&["A", "B"]);
        assert_eq!(
            QualificationStatus::derive(&s(&["A", "B"]), &s(&["C"]), &configured),
            QualificationStatus::Disqualified
        );
        assert_eq!(
            QualificationStatus::derive(&s(&["A", "B"]), &[], &configured),
            QualificationStatus::Qualified
        );
        assert_eq!(
            QualificationStatus::derive(&s(&["A"]), &[], &configured),
            QualificationStatus::Partial
        );
        assert_eq!(
            QualificationStatus::derive(&[], &[], &configured),
            QualificationStatus::Unknown
        );
    }

    #[test]
    fn test_no_criteria_is_qualified() {
        assert_eq!(
            QualificationStatus::derive(&[], &[], &[]),
            QualificationStatus::Qualified
        );
    }

    #[test]
    fn test_defaults() {
        let ctx = ConversationContext::default();
        assert_eq!(ctx.state.current_goal, Goal::InitialEngagement);
        assert_eq!(ctx.qualification.status, QualificationStatus::Unknown);
        assert_eq!(ctx.state.turn_count, 0);
    }
}
