//! Per-contact conversation state: parsing, merging and serializing the
//! blob stored on the contact row.
//!
//! The blob is a versioned envelope holding the conversation context and the
//! booking sub-state. Older or damaged blobs are migrated field by field, so
//! loading state never fails.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{
    BookingState, ConversationContext, ConversationState, ExtractedInfo, Goal, Intent,
    Qualification, QualificationStatus, TimeSlot,
};

pub const STATE_VERSION: u32 = 2;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateRecord {
    pub context: ConversationContext,
    pub booking: BookingState,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u32,
    context: ConversationContext,
    #[serde(default)]
    booking: BookingState,
}

/// Qualification verdicts produced during one turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QualificationUpdate {
    pub matched: Vec<String>,
    pub missed: Vec<String>,
    pub unknown: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TurnUpdate<'a> {
    pub intent: Intent,
    pub user_message: &'a str,
    pub ai_response: &'a str,
    pub qualification_update: Option<QualificationUpdate>,
    pub extracted_info_update: Option<ExtractedInfo>,
}

pub fn parse(raw: Option<&str>) -> StateRecord {
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return StateRecord::default();
    };

    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "conversation state is not valid JSON, starting fresh");
            return StateRecord::default();
        }
    };

    if value.get("version").and_then(Value::as_u64) == Some(STATE_VERSION as u64) {
        match serde_json::from_value::<Envelope>(value.clone()) {
            Ok(envelope) => {
                let mut context = envelope.context;
                context.qualification = normalize_qualification(context.qualification);
                return StateRecord {
                    context,
                    booking: envelope.booking,
                };
            }
            Err(e) => {
                tracing::warn!(error = %e, "conversation state failed validation, migrating field by field");
            }
        }
    }

    migrate(&value)
}

pub fn serialize(record: &StateRecord) -> String {
    let envelope = serde_json::json!({
        "version": STATE_VERSION,
        "context": record.context,
        "booking": record.booking,
    });
    envelope.to_string()
}

/// Unversioned blobs stored the context at the top level with the booking
/// state nested under `bookingState`.
fn migrate(value: &Value) -> StateRecord {
    if !value.is_object() {
        return StateRecord::default();
    }

    let context_value = value.get("context").filter(|v| v.is_object()).unwrap_or(value);
    let booking_value = value
        .get("booking")
        .or_else(|| value.get("bookingState"))
        .or_else(|| context_value.get("bookingState"));

    StateRecord {
        context: parse_context(context_value),
        booking: booking_value.map(parse_booking).unwrap_or_default(),
    }
}

pub fn parse_context(value: &Value) -> ConversationContext {
    let info = value.get("extractedInfo").unwrap_or(&Value::Null);
    let qualification = value.get("qualification").unwrap_or(&Value::Null);
    let state = value.get("state").unwrap_or(&Value::Null);

    ConversationContext {
        extracted_info: ExtractedInfo {
            is_decision_maker: field(info, "isDecisionMaker"),
            budget: field(info, "budget"),
            timeline: field(info, "timeline"),
            company_size: field(info, "companySize"),
            pain_points: string_list(info, "painPoints"),
            objections: string_list(info, "objections"),
            notes: string_list(info, "notes"),
        },
        qualification: normalize_qualification(Qualification {
            status: field(qualification, "status"),
            criteria_matched: string_list(qualification, "criteriaMatched"),
            criteria_unknown: string_list(qualification, "criteriaUnknown"),
            criteria_missed: string_list(qualification, "criteriaMissed"),
        }),
        state: ConversationState {
            current_goal: field(state, "currentGoal"),
            turn_count: field(state, "turnCount"),
            last_intent: field(state, "lastIntent"),
            escalation_attempts: field(state, "escalationAttempts"),
            follow_ups_sent: field(state, "followUpsSent"),
            last_message_at: field(state, "lastMessageAt"),
        },
        summary: field(value, "summary"),
        message_count: field(value, "messageCount"),
    }
}

fn parse_booking(value: &Value) -> BookingState {
    let slots = value
        .get("offeredSlots")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|s| serde_json::from_value::<TimeSlot>(s.clone()).ok())
                .collect()
        })
        .unwrap_or_default();

    BookingState {
        is_active: field(value, "isActive"),
        offered_slots: slots,
        slots_offered_at: field(value, "slotsOfferedAt"),
        selected_slot: field(value, "selectedSlot"),
        offer_attempts: field(value, "offerAttempts"),
        last_offered_slot: field(value, "lastOfferedSlot"),
        is_rescheduling: field(value, "isRescheduling"),
        existing_appointment_id: field(value, "existingAppointmentId"),
        existing_calendar_event_id: field(value, "existingCalendarEventId"),
    }
}

fn field<T: DeserializeOwned + Default>(value: &Value, key: &str) -> T {
    value
        .get(key)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

fn string_list(value: &Value, key: &str) -> Vec<String> {
    let items = value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();
    dedupe(items)
}

/// Set semantics with first-insertion order.
fn dedupe(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

fn union(current: &[String], update: &[String]) -> Vec<String> {
    dedupe(current.iter().chain(update.iter()).cloned().collect())
}

fn without(items: Vec<String>, remove: &[String]) -> Vec<String> {
    items.into_iter().filter(|i| !remove.contains(i)).collect()
}

/// Enforces pairwise-disjoint criteria sets; matched wins over missed, missed
/// over unknown.
/// Matched wins over missed, and both win over unknown.
fn normalize_qualification(mut q: Qualification) -> Qualification {
    q.criteria_matched = dedupe(q.criteria_matched);
    q.criteria_missed = without(dedupe(q.criteria_missed), &q.criteria_matched);
    let decided: Vec<String> = union(&q.criteria_matched, &q.criteria_missed);
    q.criteria_unknown = without(q.criteria_unknown, &decided);
    q
}

pub fn merge_qualification(
    current: &Qualification,
    update: &QualificationUpdate,
    criteria: &[String],
) -> Qualification {
    let newly_matched = dedupe(update.matched.clone());
    let newly_missed = without(dedupe(update.missed.clone()), &newly_matched);
    let newly_unknown = without(
        without(dedupe(update.unknown.clone()), &newly_matched),
        &newly_missed,
    );

    let matched = without(
        without(union(&current.criteria_matched, &newly_matched), &newly_missed),
        &newly_unknown,
    );
    let missed = without(
        without(union(&current.criteria_missed, &newly_missed), &newly_matched),
        &newly_unknown,
    );
    let unknown = without(
        without(union(&current.criteria_unknown, &newly_unknown), &newly_matched),
        &newly_missed,
    );

    let merged = normalize_qualification(Qualification {
        status: current.status,
        criteria_matched: matched,
        criteria_unknown: unknown,
        criteria_missed: missed,
    });

    Qualification {
        status: QualificationStatus::derive(&merged.criteria_matched, &merged.criteria_missed, criteria),
        ..merged
    }
}

pub fn merge_extracted_info(current: &ExtractedInfo, update: &ExtractedInfo) -> ExtractedInfo {
    ExtractedInfo {
        is_decision_maker: update.is_decision_maker.or(current.is_decision_maker),
        budget: update.budget.clone().or_else(|| current.budget.clone()),
        timeline: update.timeline.clone().or_else(|| current.timeline.clone()),
        company_size: update.company_size.clone().or_else(|| current.company_size.clone()),
        pain_points: union(&current.pain_points, &update.pain_points),
        objections: union(&current.objections, &update.objections),
        notes: union(&current.notes, &update.notes),
    }
}

pub fn next_goal(intent: Intent, status: QualificationStatus, current: Goal) -> Goal {
    let qualified = status == QualificationStatus::Qualified;
    match intent {
        Intent::OptOut | Intent::RequestHuman => Goal::Closing,
        Intent::Reschedule => Goal::OfferBooking,
        Intent::BookingInterest if qualified => Goal::OfferBooking,
        Intent::Question => Goal::AnswerQuestion,
        Intent::Objection => Goal::HandleObjection,
        Intent::Confirmation if current == Goal::OfferBooking => Goal::ConfirmBooking,
        Intent::PositiveResponse if !qualified => Goal::QualifyLead,
        Intent::PositiveResponse => Goal::OfferBooking,
        _ if current == Goal::InitialEngagement => Goal::QualifyLead,
        _ => current,
    }
}

pub fn build_summary(context: &ConversationContext, criteria_count: usize) -> String {
    let q = &context.qualification;
    let info = &context.extracted_info;
    let mut parts = vec![format!(
        "Qualification: {} ({} of {} criteria met)",
        q.status.as_str(),
        q.criteria_matched.len(),
        criteria_count
    )];

    if let Some(dm) = info.is_decision_maker {
        parts.push(format!("Decision maker: {}", if dm { "yes" } else { "no" }));
    }
    if let Some(budget) = &info.budget {
        parts.push(format!("Budget: {budget}"));
    }
    if let Some(timeline) = &info.timeline {
        parts.push(format!("Timeline: {timeline}"));
    }
    if let Some(size) = &info.company_size {
        parts.push(format!("Company size: {size}"));
    }
    if !info.pain_points.is_empty() {
        parts.push(format!("Pain points: {}", info.pain_points.join(", ")));
    }
    if !info.objections.is_empty() {
        parts.push(format!("Objections: {}", info.objections.join(", ")));
    }
    parts.push(format!(
        "Turn {}, goal: {}",
        context.state.turn_count,
        context.state.current_goal.as_str()
    ));

    parts.join(". ")
}

pub fn update(
    current: &ConversationContext,
    turn: &TurnUpdate<'_>,
    criteria: &[String],
    now: DateTime<Utc>,
) -> ConversationContext {
    let qualification = match &turn.qualification_update {
        Some(q) => merge_qualification(&current.qualification, q, criteria),
        None => current.qualification.clone(),
    };

    let extracted_info = match &turn.extracted_info_update {
        Some(info) => merge_extracted_info(&current.extracted_info, info),
        None => current.extracted_info.clone(),
    };

    let state = ConversationState {
        current_goal: next_goal(turn.intent, qualification.status, current.state.current_goal),
        turn_count: current.state.turn_count + 1,
        last_intent: Some(turn.intent),
        last_message_at: Some(now),
        ..current.state.clone()
    };

    let replies = if turn.ai_response.is_empty() { 0 } else { 1 };
    let inbound = if turn.user_message.is_empty() { 0 } else { 1 };

    let mut next = ConversationContext {
        extracted_info,
        qualification,
        state,
        summary: String::new(),
        message_count: current.message_count + inbound + replies,
    };
    next.summary = build_summary(&next, criteria.len());
    next
}

pub fn increment_escalation_attempts(context: &ConversationContext) -> ConversationContext {
    let mut next = context.clone();
    next.state.escalation_attempts += 1;
    next
}

pub fn increment_follow_ups(context: &ConversationContext) -> ConversationContext {
    let mut next = context.clone();
    next.state.follow_ups_sent += 1;
    next
}
