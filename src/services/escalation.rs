//! Human handoff: the reply the contact sees and the alert the operator gets.

use crate::models::ContactRecord;
use crate::services::messaging::MessagingProvider;

const HANDOFF_TEMPLATES: &[(&str, &str)] = &[
    (
        "human",
        "Of course! I'm passing you to a member of our team. Someone will reach out shortly.",
    ),
    (
        "frustrat",
        "I'm sorry for the trouble. A member of our team will follow up with you personally as soon as possible.",
    ),
    (
        "maximum turns",
        "Thanks for your patience! I'd like to get a team member involved to help you properly. They'll be in touch shortly.",
    ),
    (
        "escalation attempts",
        "I'll have a member of our team pick this up with you directly. They'll be in touch soon.",
    ),
];

const GENERIC_HANDOFF: &str =
    "Thanks for your message! A member of our team will be in touch with you shortly.";

/// Picks the handoff reply whose key appears in `reason`.
pub fn handoff_message(reason: Option<&str>) -> &'static str {
    let Some(reason) = reason.map(str::to_lowercase) else {
        return GENERIC_HANDOFF;
    };
    HANDOFF_TEMPLATES
        .iter()
        .find(|(key, _)| reason.contains(key))
        .map(|(_, template)| *template)
        .unwrap_or(GENERIC_HANDOFF)
}

pub fn operator_alert(record: &ContactRecord, reason: &str, app_url: &str) -> String {
    let contact = &record.contact;
    format!(
        "Handoff: {} ({}) — {}. {}/contacts/{}",
        contact.display_name(),
        contact.phone,
        reason,
        app_url.trim_end_matches('/'),
        contact.id
    )
}

/// Best-effort. Returns whether an alert went out.
pub async fn notify_operator(
    messaging: &dyn MessagingProvider,
    record: &ContactRecord,
    reason: &str,
    app_url: &str,
    fallback_phone: Option<&str>,
) -> bool {
    let contact_id = record.contact.id.as_str();
    let Some(to) = record
        .client
        .operator_phone
        .as_deref()
        .or(fallback_phone)
        .filter(|p| !p.trim().is_empty())
    else {
        tracing::warn!(contact_id, "no operator phone configured, skipping handoff alert");
        return false;
    };

    match messaging
        .send_message("sms", to, &operator_alert(record, reason, app_url))
        .await
    {
        Ok(_) => {
            tracing::info!(contact_id, reason, "operator notified of handoff");
            true
        }
        Err(e) => {
            tracing::warn!(contact_id, error = %e, "failed to notify operator");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::models::{Client, Contact, ContactStatus, Workflow};
    use crate::services::intent::{REASON_FRUSTRATION, REASON_HUMAN_REQUESTED, REASON_TOO_MANY_TURNS};

    struct RecordingMessaging {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl MessagingProvider for RecordingMessaging {
        async fn send_message(&self, _channel: &str, to: &str, body: &str) -> anyhow::Result<String> {
            if self.fail {
                anyhow::bail!("transport down");
            }
            self.sent.lock().unwrap().push((to.to_string(), body.to_string()));
            Ok("SM1".to_string())
        }
    }

    fn record(operator_phone: Option<&str>) -> ContactRecord {
        ContactRecord {
            contact: Contact {
                id: "ct_1".to_string(),
                client_id: "cl_1".to_string(),
                workflow_id: "wf_1".to_string(),
                name: Some("Dana".to_string()),
                phone: "+15550001111".to_string(),
                email: None,
                channel: "sms".to_string(),
                status: ContactStatus::InConversation,
                conversation_context: None,
                state_version: 0,
                last_message_at: None,
            },
            workflow: Workflow {
                id: "wf_1".to_string(),
                name: "Inbound".to_string(),
                is_active: true,
                criteria: vec![],
                goal: None,
                tone: None,
                dos: vec![],
                donts: vec![],
                custom_instructions: None,
            },
            client: Client {
                id: "cl_1".to_string(),
                name: "Acme".to_string(),
                timezone: "UTC".to_string(),
                business_hours: None,
                brand_research: None,
                operator_phone: operator_phone.map(str::to_string),
            },
        }
    }

    #[test]
    fn test_handoff_message_by_reason() {
        assert!(handoff_message(Some(REASON_HUMAN_REQUESTED)).contains("passing you"));
        assert!(handoff_message(Some(REASON_FRUSTRATION)).contains("sorry"));
        assert!(handoff_message(Some(REASON_TOO_MANY_TURNS)).contains("patience"));
        assert_eq!(handoff_message(Some("something else")), GENERIC_HANDOFF);
        assert_eq!(handoff_message(None), GENERIC_HANDOFF);
    }

    #[test]
    fn test_operator_alert_contains_deep_link() {
        let alert = operator_alert(&record(None), "Customer appears frustrated", "https://app.example.com/");
        assert!(alert.contains("Dana (+15550001111)"));
        assert!(alert.ends_with("https://app.example.com/contacts/ct_1"));
    }

    #[tokio::test]
    async fn test_notify_prefers_client_operator() {
        let messaging = RecordingMessaging {
            sent: Mutex::new(vec![]),
            fail: false,
        };
        let sent = notify_operator(&messaging, &record(Some("+15559990000")), "r", "http://x", Some("+1000")).await;
        assert!(sent);
        assert_eq!(messaging.sent.lock().unwrap()[0].0, "+15559990000");
    }

    #[tokio::test]
    async fn test_notify_failures_are_swallowed() {
        let messaging = RecordingMessaging {
            sent: Mutex::new(vec![]),
            fail: true,
        };
        assert!(!notify_operator(&messaging, &record(Some("+15559990000")), "r", "http://x", None).await);
        assert!(!notify_operator(&messaging, &record(None), "r", "http://x", None).await);
    }
}
