use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::models::{BookingState, Contact, ConversationContext, Direction, StoredMessage, WorkflowKnowledge};
use crate::services::ai::Message;

const REPLY_RULES: &str = r#"You are replying to a lead over text message.

Rules:
- Reply in plain text only, no markdown, lists or emojis unless the lead uses them
- Keep it short: one or two sentences, under 300 characters
- Ask at most one question per message
- Never invent prices, availability or facts that are not listed below
- Never say a meeting is booked or confirmed; bookings are handled separately
- If you don't know the answer, say a team member will follow up"#;

const BOOKING_PENDING_NOTE: &str = "Times have been offered and the lead has not picked one yet. \
Do not claim anything is booked. Help them choose one of the offered times or ask what works better.";

const BOOKING_TOOLS_RULES: &str = r#"The lead is choosing a meeting time. Use a tool when their message is about scheduling:
- select_time_slot: they picked a time (use slot_index for "the first one", "option 2"; otherwise day_preference and/or time_24h)
- confirm_booking: they agreed to the single most recently suggested time ("yes", "that works")
- request_different_times: none of the offered times work
- request_human_help: they want a person or ask for something you cannot do
If the message is not about scheduling, reply in plain text instead."#;

/// System prompt for a free-form conversational reply.
pub fn build_system_prompt(
    knowledge: &WorkflowKnowledge,
    contact: &Contact,
    context: &ConversationContext,
    open_criteria: &[String],
    booking_pending: bool,
) -> String {
    let mut sections = vec![REPLY_RULES.to_string(), knowledge.to_prompt()];

    let mut lead = format!("The lead's name is {}.", contact.display_name());
    if !context.summary.is_empty() {
        lead.push_str(&format!(" What we know so far: {}.", context.summary));
    }
    if !open_criteria.is_empty() {
        lead.push_str(&format!(" Still unknown: {}.", open_criteria.join("; ")));
    }
    sections.push(lead);

    if booking_pending {
        sections.push(BOOKING_PENDING_NOTE.to_string());
    }

    sections.join("\n\n")
}

/// Appended to the system prompt while slots are on the table.
pub fn booking_tools_prompt(state: &BookingState, tz: Tz, now: DateTime<Utc>) -> String {
    let offered = state
        .offered_slots
        .iter()
        .enumerate()
        .map(|(i, slot)| format!("{}. {}", i + 1, slot.formatted))
        .collect::<Vec<_>>()
        .join("\n");

    let mut prompt = format!(
        "{BOOKING_TOOLS_RULES}\n\nToday is {}.\nOffered times:\n{offered}",
        now.with_timezone(&tz).format("%A, %B %-d")
    );
    if let Some(last) = &state.last_offered_slot {
        prompt.push_str(&format!("\nMost recently suggested: {}", last.formatted));
    }
    prompt
}

/// Chat transcript for the model, oldest first, ending with the latest
/// inbound message.
pub fn history_messages(history: &[StoredMessage], latest_message: &str) -> Vec<Message> {
    let mut messages: Vec<Message> = history
        .iter()
        .map(|m| match m.direction {
            Direction::Inbound => Message::user(&m.content),
            Direction::Outbound => Message::assistant(&m.content),
        })
        .collect();

    let latest_recorded = history
        .last()
        .is_some_and(|m| m.direction == Direction::Inbound && m.content == latest_message);
    if !latest_recorded {
        messages.push(Message::user(latest_message));
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Client, ContactStatus, TimeSlot, Workflow};
    use chrono::TimeZone;

    fn contact() -> Contact {
        Contact {
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
        }
    }

    fn knowledge() -> WorkflowKnowledge {
        let client = Client {
            id: "cl_1".to_string(),
            name: "Acme Solar".to_string(),
            timezone: "UTC".to_string(),
            business_hours: None,
            brand_research: None,
            operator_phone: None,
        };
        let workflow = Workflow {
            id: "wf_1".to_string(),
            name: "Inbound".to_string(),
            is_active: true,
            criteria: vec![],
            goal: None,
            tone: None,
            dos: vec![],
            donts: vec![],
            custom_instructions: None,
        };
        WorkflowKnowledge::resolve(&client, &workflow)
    }

    fn stored(direction: Direction, content: &str) -> StoredMessage {
        StoredMessage {
            id: "m".to_string(),
            contact_id: "ct_1".to_string(),
            direction,
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_prompt_mentions_lead_and_open_criteria() {
        let mut context = ConversationContext::default();
        context.summary = "Status: partial".to_string();
        let prompt = build_system_prompt(
            &knowledge(),
            &contact(),
            &context,
            &["Owns their home".to_string()],
            false,
        );
        assert!(prompt.contains("Acme Solar"));
        assert!(prompt.contains("name is Dana"));
        assert!(prompt.contains("Status: partial"));
        assert!(prompt.contains("Still unknown: Owns their home"));
        assert!(!prompt.contains("has not picked one yet"));
    }

    #[test]
    fn test_pending_booking_note() {
        let prompt = build_system_prompt(&knowledge(), &contact(), &ConversationContext::default(), &[], true);
        assert!(prompt.contains("Do not claim anything is booked"));
    }

    #[test]
    fn test_tools_prompt_lists_numbered_slots() {
        let start = Utc.with_ymd_and_hms(2025, 6, 16, 14, 0, 0).unwrap();
        let slot = TimeSlot {
            start,
            end: start + chrono::Duration::minutes(30),
            formatted: "Monday, June 16 at 2:00 PM".to_string(),
        };
        let state = BookingState {
            is_active: true,
            offered_slots: vec![slot.clone()],
            last_offered_slot: Some(slot),
            ..Default::default()
        };
        let prompt = booking_tools_prompt(&state, chrono_tz::UTC, start);
        assert!(prompt.contains("1. Monday, June 16 at 2:00 PM"));
        assert!(prompt.contains("Most recently suggested"));
        assert!(prompt.contains("Today is Monday, June 16"));
    }

    #[test]
    fn test_history_does_not_duplicate_latest() {
        let history = vec![stored(Direction::Outbound, "Hi Dana!"), stored(Direction::Inbound, "hello")];
        let messages = history_messages(&history, "hello");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "assistant");

        let messages = history_messages(&history, "are you there?");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2], Message::user("are you there?"));
    }
}
