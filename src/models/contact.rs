use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContactStatus {
    Pending,
    Contacted,
    InConversation,
    Qualified,
    Booked,
    OptedOut,
    HandedOff,
}

impl ContactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactStatus::Pending => "pending",
            ContactStatus::Contacted => "contacted",
            ContactStatus::InConversation => "in_conversation",
            ContactStatus::Qualified => "qualified",
            ContactStatus::Booked => "booked",
            ContactStatus::OptedOut => "opted_out",
            ContactStatus::HandedOff => "handed_off",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "contacted" => ContactStatus::Contacted,
            "in_conversation" => ContactStatus::InConversation,
            "qualified" => ContactStatus::Qualified,
            "booked" => ContactStatus::Booked,
            "opted_out" => ContactStatus::OptedOut,
            "handed_off" => ContactStatus::HandedOff,
            _ => ContactStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub client_id: String,
    pub workflow_id: String,
    pub name: Option<String>,
    pub phone: String,
    pub email: Option<String>,
    pub channel: String,
    pub status: ContactStatus,
    pub conversation_context: Option<String>,
    /// Optimistic-concurrency token for `conversation_context`.
    pub state_version: i64,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl Contact {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().filter(|n| !n.is_empty()).unwrap_or("there")
    }
}

/// A qualification criterion with a stable identifier. Workflows may store
/// plain strings; those get positional ids (`c1`, `c2`, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Criterion {
    pub id: String,
    pub text: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CriterionConfig {
    Text(String),
    Identified { id: Option<String>, text: String },
}

impl Criterion {
    pub fn list_from_json(raw: Option<&str>) -> Vec<Criterion> {
        let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
            return vec![];
        };
        let configs: Vec<CriterionConfig> = match serde_json::from_str(raw) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "invalid qualification criteria, ignoring");
                return vec![];
            }
        };
        configs
            .into_iter()
            .enumerate()
            .filter_map(|(i, config)| {
                let (id, text) = match config {
                    CriterionConfig::Text(text) => (None, text),
                    CriterionConfig::Identified { id, text } => (id, text),
                };
                let text = text.trim().to_string();
                if text.is_empty() {
                    return None;
                }
                Some(Criterion {
                    id: id.unwrap_or_else(|| format!("c{}", i + 1)),
                    text,
                })
            })
            .collect()
    }

    pub fn texts(criteria: &[Criterion]) -> Vec<String> {
        criteria.iter().map(|c| c.text.clone()).collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrandResearch {
    #[serde(default)]
    pub company_overview: Option<String>,
    #[serde(default)]
    pub products: Vec<String>,
    #[serde(default)]
    pub value_propositions: Vec<String>,
    #[serde(default)]
    pub target_audience: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub is_active: bool,
    pub criteria: Vec<Criterion>,
    pub goal: Option<String>,
    pub tone: Option<String>,
    pub dos: Vec<String>,
    pub donts: Vec<String>,
    pub custom_instructions: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub name: String,
    pub timezone: String,
    pub business_hours: Option<String>,
    pub brand_research: Option<BrandResearch>,
    pub operator_phone: Option<String>,
}

impl Client {
    pub fn tz(&self) -> chrono_tz::Tz {
        self.timezone.parse().unwrap_or_else(|_| {
            tracing::warn!(timezone = %self.timezone, "unknown timezone, using UTC");
            chrono_tz::UTC
        })
    }
}

/// A contact joined with its workflow and client, as loaded for one run.
#[derive(Debug, Clone)]
pub struct ContactRecord {
    pub contact: Contact,
    pub workflow: Workflow,
    pub client: Client,
}

#[derive(Debug, Clone)]
pub struct CalendarConnection {
    pub client_id: String,
    pub calendar_id: String,
    pub access_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_criteria_from_strings() {
        let criteria = Criterion::list_from_json(Some(r#"["Has budget", "  ", "Decision maker"]"#));
        assert_eq!(criteria.len(), 2);
        assert_eq!(criteria[0].id, "c1");
        assert_eq!(criteria[1].id, "c3");
        assert_eq!(criteria[1].text, "Decision maker");
    }

    #[test]
    fn test_criteria_from_objects() {
        let criteria =
            Criterion::list_from_json(Some(r#"[{"id":"budget","text":"Has budget"},{"text":"Timeline"}]"#));
        assert_eq!(criteria[0].id, "budget");
        assert_eq!(criteria[1].id, "c2");
    }

    #[test]
    fn test_criteria_invalid_json_is_empty() {
        assert!(Criterion::list_from_json(Some("{oops")).is_empty());
        assert!(Criterion::list_from_json(None).is_empty());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            ContactStatus::Pending,
            ContactStatus::InConversation,
            ContactStatus::Booked,
            ContactStatus::OptedOut,
            ContactStatus::HandedOff,
        ] {
            assert_eq!(ContactStatus::parse(status.as_str()), status);
        }
    }
}
