//! Per-message coordinator. One call to [`Orchestrator::process_message`]
//! runs a full turn for a contact: eligibility, intent, escalation,
//! qualification, booking, reply generation and a single atomic write.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::db::{ContactStore, TurnRecord};
use crate::errors::{ErrorKind, ProcessingError};
use crate::models::{
    Appointment, BookingState, ContactRecord, ContactStatus, ConversationContext, Criterion,
    Intent, NewMessage, QualificationStatus, StoredMessage, WorkflowKnowledge,
};
use crate::services::ai::retry::{generate_with_retry, RetryPolicy};
use crate::services::ai::tools::{booking_tools, BookingTool};
use crate::services::ai::{estimate_cost, GenerationRequest, LlmProvider, TokenUsage};
use crate::services::booking::phrases::PhrasePicker;
use crate::services::booking::{BookingHandler, BookingOutcome, BookingSettings, Selection};
use crate::services::calendar::CalendarProvider;
use crate::services::context::{self, StateRecord, TurnUpdate};
use crate::services::escalation;
use crate::services::intent::{self, IntentDetector, REASON_HUMAN_REQUESTED};
use crate::services::messaging::MessagingProvider;
use crate::services::prompt;
use crate::services::qualification::{self, Assessment, QualificationEngine};

const OPT_OUT_MESSAGE: &str =
    "You've been unsubscribed and won't receive any more messages from us. Take care!";

const FALLBACK_AI: &str = "Thanks for your message! I'm having a little trouble replying right now, \
so a member of our team will get back to you shortly.";
const FALLBACK_DATABASE: &str =
    "Thanks for reaching out! We hit a brief issue on our end. A member of our team will follow up with you soon.";
const FALLBACK_UNKNOWN: &str = "Thanks for your message. A member of our team will be in touch shortly.";

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub retry: RetryPolicy,
    /// Messages of history loaded for prompts and assessment.
    pub history_limit: usize,
    pub input_cost_per_mtok: f64,
    pub output_cost_per_mtok: f64,
    pub app_url: String,
    pub operator_phone: Option<String>,
    pub booking: BookingSettings,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            model: "llama3.2".to_string(),
            max_tokens: 300,
            temperature: 0.7,
            retry: RetryPolicy::default(),
            history_limit: 20,
            input_cost_per_mtok: 0.59,
            output_cost_per_mtok: 0.79,
            app_url: "http://localhost:3000".to_string(),
            operator_phone: None,
            booking: BookingSettings::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub reply: String,
    pub intent: Intent,
    pub tokens_used: TokenUsage,
    pub cost: f64,
    pub should_escalate: bool,
    pub appointment: Option<Appointment>,
    pub qualification_status: QualificationStatus,
    /// Set when the reply is a fallback for a recoverable failure.
    pub error: Option<ErrorKind>,
}

/// The reply chosen for this turn and what it changes.
struct Reply {
    text: String,
    booking: BookingState,
    appointment: Option<Appointment>,
    usage: TokenUsage,
    ai_generated: bool,
}

enum Step {
    Done(Reply),
    Escalate(String),
    Continue { booking: BookingState, booking_pending: bool },
}

/// Everything loaded for the turn that later steps read.
struct Turn<'a> {
    record: &'a ContactRecord,
    message: &'a str,
    context: ConversationContext,
    booking: BookingState,
    history: Vec<StoredMessage>,
    intent: Intent,
    now: DateTime<Utc>,
}

pub struct Orchestrator {
    store: Arc<dyn ContactStore>,
    llm: Arc<dyn LlmProvider>,
    messaging: Arc<dyn MessagingProvider>,
    intents: IntentDetector,
    qualification: QualificationEngine,
    booking: BookingHandler,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ContactStore>,
        llm: Arc<dyn LlmProvider>,
        calendar: Arc<dyn CalendarProvider>,
        messaging: Arc<dyn MessagingProvider>,
        phrases: Arc<dyn PhrasePicker>,
        settings: OrchestratorSettings,
    ) -> Self {
        let intents = IntentDetector::new(llm.clone(), settings.model.clone(), settings.retry.clone());
        let qualification =
            QualificationEngine::new(llm.clone(), settings.model.clone(), settings.retry.clone());
        let booking = BookingHandler::new(calendar, store.clone(), phrases, settings.booking.clone());
        Self {
            store,
            llm,
            messaging,
            intents,
            qualification,
            booking,
            settings,
        }
    }

    pub async fn process_message(
        &self,
        contact_id: &str,
        message: &str,
    ) -> Result<ProcessResult, ProcessingError> {
        self.process_message_at(contact_id, message, Utc::now()).await
    }

    /// Routing errors and lost state races come back as `Err`; every other
    /// failure is answered with a fallback reply and flagged for a human.
    pub async fn process_message_at(
        &self,
        contact_id: &str,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<ProcessResult, ProcessingError> {
        match self.run(contact_id, message, now).await {
            Ok(result) => Ok(result),
            Err(e) if !e.is_recoverable() => {
                tracing::info!(contact_id, kind = e.kind().as_str(), "message not processed: {e}");
                Err(e)
            }
            Err(e) => {
                tracing::error!(contact_id, kind = e.kind().as_str(), error = %e, "turn failed, sending fallback");
                Ok(self.fallback(contact_id, &e).await)
            }
        }
    }

    async fn fallback(&self, contact_id: &str, err: &ProcessingError) -> ProcessResult {
        let kind = err.kind();
        let reply = match kind {
            ErrorKind::AiGenerationFailed => FALLBACK_AI,
            ErrorKind::DatabaseError => FALLBACK_DATABASE,
            _ => FALLBACK_UNKNOWN,
        };

        let channel = match self.store.load_contact(contact_id).await {
            Ok(Some(record)) => record.contact.channel,
            _ => "sms".to_string(),
        };
        if let Err(e) = self
            .store
            .insert_message(&NewMessage::canned(contact_id, &channel, reply))
            .await
        {
            tracing::warn!(contact_id, error = %e, "failed to record fallback reply");
        }

        ProcessResult {
            reply: reply.to_string(),
            intent: Intent::Unclear,
            tokens_used: TokenUsage::default(),
            cost: 0.0,
            should_escalate: true,
            appointment: None,
            qualification_status: QualificationStatus::Unknown,
            error: Some(kind),
        }
    }

    async fn run(
        &self,
        contact_id: &str,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<ProcessResult, ProcessingError> {
        let record = self
            .store
            .load_contact(contact_id)
            .await?
            .ok_or_else(|| ProcessingError::ContactNotFound(contact_id.to_string()))?;

        match record.contact.status {
            ContactStatus::OptedOut => return Err(ProcessingError::ContactOptedOut(contact_id.to_string())),
            ContactStatus::HandedOff => return Err(ProcessingError::ContactHandedOff(contact_id.to_string())),
            _ => {}
        }
        if !record.workflow.is_active {
            return Err(ProcessingError::WorkflowInactive(record.workflow.id.clone()));
        }

        let StateRecord { context, booking } = context::parse(record.contact.conversation_context.as_deref());
        let history = self
            .store
            .recent_messages(contact_id, self.settings.history_limit)
            .await?;

        let detected = self.intents.detect(message, &context).await;
        tracing::info!(
            contact_id,
            intent = detected.intent.as_str(),
            confidence = detected.confidence,
            "intent detected"
        );

        let mut turn = Turn {
            record: &record,
            message,
            context,
            booking,
            history,
            intent: detected.intent,
            now,
        };

        if detected.intent == Intent::OptOut {
            return self.opt_out(&turn).await;
        }

        let check = intent::check_escalation_triggers(message, &turn.context);
        if check.required || detected.requires_escalation {
            let reason = check
                .reason
                .or(detected.escalation_reason)
                .unwrap_or_else(|| REASON_HUMAN_REQUESTED.to_string());
            return self.escalate(&turn, &reason).await;
        }

        let knowledge = WorkflowKnowledge::resolve(&record.client, &record.workflow);

        let last_message_at = record.contact.last_message_at.or(turn.context.state.last_message_at);
        if qualification::should_allow_requalification(&turn.context, message, last_message_at, now) {
            tracing::info!(contact_id, "reopening missed criteria for reassessment");
            turn.context.qualification =
                qualification::reset_criteria_for_reassessment(&turn.context.qualification);
        }

        let assessment = self
            .qualification
            .assess(&knowledge.criteria, &turn.context, &turn.history, message)
            .await;
        tracing::debug!(contact_id, status = assessment.status.as_str(), "qualification assessed");

        let (booking, booking_pending, spent) = match self.booking_step(&turn, &assessment).await? {
            (Step::Done(reply), _) => return self.finish(&turn, &knowledge, assessment, reply).await,
            (Step::Escalate(reason), _) => return self.escalate(&turn, &reason).await,
            (Step::Continue { booking, booking_pending }, spent) => (booking, booking_pending, spent),
        };
        turn.booking = booking;

        let open_criteria: Vec<String> = assessment.criteria_unknown.clone();
        let request = GenerationRequest {
            model: self.settings.model.clone(),
            system_prompt: prompt::build_system_prompt(
                &knowledge,
                &record.contact,
                &turn.context,
                &open_criteria,
                booking_pending,
            ),
            messages: prompt::history_messages(&turn.history, message),
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            tools: vec![],
        };
        let generation = generate_with_retry(self.llm.as_ref(), &request, &self.settings.retry).await?;
        let text = generation.content.trim().to_string();
        if text.is_empty() {
            return Err(ProcessingError::Unknown("model returned an empty reply".to_string()));
        }

        let reply = Reply {
            text,
            booking: turn.booking.clone(),
            appointment: None,
            usage: combine(spent, generation.usage),
            ai_generated: true,
        };
        self.finish(&turn, &knowledge, assessment, reply).await
    }

    /// Booking decision tree. The usage is what tool mode spent when it
    /// handed the turn back.
    async fn booking_step(
        &self,
        turn: &Turn<'_>,
        assessment: &Assessment,
    ) -> Result<(Step, TokenUsage), ProcessingError> {
        let record = turn.record;
        let status = record.contact.status;
        let connected = self.booking.connection(&record.client.id).await?.is_some();

        if turn.intent == Intent::Reschedule && status == ContactStatus::Booked && connected {
            let outcome = self
                .booking
                .start_reschedule(record, turn.message, &turn.booking, turn.now)
                .await?;
            return Ok((step_from(outcome, TokenUsage::default()), TokenUsage::default()));
        }

        if turn.booking.is_offering() {
            return self.negotiate(turn).await;
        }

        let wants_booking =
            turn.intent == Intent::BookingInterest || assessment.status == QualificationStatus::Qualified;
        if wants_booking
            && !turn.booking.is_active
            && status != ContactStatus::Booked
            && connected
            && turn.booking.offer_attempts < self.settings.booking.max_offer_attempts
        {
            let outcome = self.booking.offer_time_slots(record, &turn.booking, turn.now).await?;
            return Ok((step_from(outcome, TokenUsage::default()), TokenUsage::default()));
        }

        Ok((
            Step::Continue {
                booking: turn.booking.clone(),
                booking_pending: false,
            },
            TokenUsage::default(),
        ))
    }

    /// Tool-mode turn while slots are on the table. Falls back to the
    /// deterministic selection parser when the model call fails or says
    /// nothing usable.
    async fn negotiate(&self, turn: &Turn<'_>) -> Result<(Step, TokenUsage), ProcessingError> {
        let record = turn.record;
        let contact_id = record.contact.id.as_str();
        let knowledge = WorkflowKnowledge::resolve(&record.client, &record.workflow);

        let system_prompt = format!(
            "{}\n\n{}",
            prompt::build_system_prompt(&knowledge, &record.contact, &turn.context, &[], true),
            prompt::booking_tools_prompt(&turn.booking, record.client.tz(), turn.now)
        );
        let request = GenerationRequest {
            model: self.settings.model.clone(),
            system_prompt,
            messages: prompt::history_messages(&turn.history, turn.message),
            max_tokens: self.settings.max_tokens,
            temperature: 0.3,
            tools: booking_tools(),
        };

        let generation = match generate_with_retry(self.llm.as_ref(), &request, &self.settings.retry).await {
            Ok(generation) => generation,
            Err(e) => {
                tracing::warn!(contact_id, error = %e, "tool-mode generation failed, parsing selection directly");
                let outcome = self
                    .booking
                    .handle_time_selection(record, turn.message, &turn.booking, turn.now)
                    .await?;
                return Ok((step_from(outcome, TokenUsage::default()), TokenUsage::default()));
            }
        };
        let usage = generation.usage;

        let tool = generation.tool_calls.iter().find_map(BookingTool::from_call);
        let outcome = match tool {
            Some(BookingTool::SelectTimeSlot {
                slot_index,
                day_preference,
                time_24h,
            }) => {
                tracing::info!(contact_id, ?slot_index, "model selected a slot");
                let selection =
                    Selection::from_tool(slot_index, day_preference.as_deref(), time_24h.as_deref());
                self.booking
                    .select_time_slot(record, &turn.booking, &selection, turn.now)
                    .await?
            }
            Some(BookingTool::ConfirmBooking) => {
                tracing::info!(contact_id, "model confirmed the suggested slot");
                self.booking.confirm_booking(record, &turn.booking, turn.now).await?
            }
            Some(BookingTool::RequestDifferentTimes { reason }) => {
                tracing::info!(contact_id, reason = reason.as_deref().unwrap_or(""), "lead wants other times");
                self.booking
                    .offer_different_times(record, &turn.booking, turn.now)
                    .await?
            }
            Some(BookingTool::RequestHumanHelp { reason }) => {
                let reason = reason
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or_else(|| REASON_HUMAN_REQUESTED.to_string());
                return Ok((Step::Escalate(reason), usage));
            }
            None => {
                let text = generation.content.trim();
                if !text.is_empty() {
                    return Ok((
                        Step::Done(Reply {
                            text: text.to_string(),
                            booking: turn.booking.clone(),
                            appointment: None,
                            usage,
                            ai_generated: true,
                        }),
                        usage,
                    ));
                }
                tracing::debug!(contact_id, "model returned neither text nor a tool call");
                self.booking
                    .handle_time_selection(record, turn.message, &turn.booking, turn.now)
                    .await?
            }
        };
        Ok((step_from(outcome, usage), usage))
    }

    async fn opt_out(&self, turn: &Turn<'_>) -> Result<ProcessResult, ProcessingError> {
        let contact_id = turn.record.contact.id.as_str();
        let context = context::update(
            &turn.context,
            &TurnUpdate {
                intent: Intent::OptOut,
                user_message: turn.message,
                ai_response: OPT_OUT_MESSAGE,
                qualification_update: None,
                extracted_info_update: None,
            },
            &Criterion::texts(&turn.record.workflow.criteria),
            turn.now,
        );
        let message = self.outbound(turn, OPT_OUT_MESSAGE, false, TokenUsage::default(), 0.0);
        self.persist(turn, context, BookingState::default(), Some(ContactStatus::OptedOut), message)
            .await?;
        tracing::info!(contact_id, "contact opted out");

        Ok(ProcessResult {
            reply: OPT_OUT_MESSAGE.to_string(),
            intent: Intent::OptOut,
            tokens_used: TokenUsage::default(),
            cost: 0.0,
            should_escalate: false,
            appointment: None,
            qualification_status: turn.context.qualification.status,
            error: None,
        })
    }

    async fn escalate(&self, turn: &Turn<'_>, reason: &str) -> Result<ProcessResult, ProcessingError> {
        let record = turn.record;
        let contact_id = record.contact.id.as_str();
        let reply = escalation::handoff_message(Some(reason));

        let updated = context::update(
            &turn.context,
            &TurnUpdate {
                intent: turn.intent,
                user_message: turn.message,
                ai_response: reply,
                qualification_update: None,
                extracted_info_update: None,
            },
            &Criterion::texts(&record.workflow.criteria),
            turn.now,
        );
        let updated = context::increment_escalation_attempts(&updated);
        let message = self.outbound(turn, reply, false, TokenUsage::default(), 0.0);
        self.persist(turn, updated, turn.booking.clone(), Some(ContactStatus::HandedOff), message)
            .await?;
        tracing::info!(contact_id, reason, "conversation handed off");

        escalation::notify_operator(
            self.messaging.as_ref(),
            record,
            reason,
            &self.settings.app_url,
            self.settings.operator_phone.as_deref(),
        )
        .await;

        Ok(ProcessResult {
            reply: reply.to_string(),
            intent: turn.intent,
            tokens_used: TokenUsage::default(),
            cost: 0.0,
            should_escalate: true,
            appointment: None,
            qualification_status: turn.context.qualification.status,
            error: None,
        })
    }

    async fn finish(
        &self,
        turn: &Turn<'_>,
        knowledge: &WorkflowKnowledge,
        assessment: Assessment,
        reply: Reply,
    ) -> Result<ProcessResult, ProcessingError> {
        let contact_id = turn.record.contact.id.as_str();
        let criteria = Criterion::texts(&knowledge.criteria);
        let updated = context::update(
            &turn.context,
            &TurnUpdate {
                intent: turn.intent,
                user_message: turn.message,
                ai_response: &reply.text,
                qualification_update: Some(assessment.qualification_update()),
                extracted_info_update: Some(assessment.extracted_info.clone()),
            },
            &criteria,
            turn.now,
        );

        let qualification_status = updated.qualification.status;
        let status = next_status(
            turn.record.contact.status,
            reply.appointment.is_some(),
            qualification_status,
        );
        let cost = estimate_cost(
            &reply.usage,
            self.settings.input_cost_per_mtok,
            self.settings.output_cost_per_mtok,
        );

        let message = self.outbound(turn, &reply.text, reply.ai_generated, reply.usage, cost);
        self.persist(turn, updated, reply.booking, status, message).await?;
        tracing::info!(
            contact_id,
            status = status.map(|s| s.as_str()).unwrap_or("unchanged"),
            qualification = qualification_status.as_str(),
            booked = reply.appointment.is_some(),
            tokens = reply.usage.total,
            "turn complete"
        );

        Ok(ProcessResult {
            reply: reply.text,
            intent: turn.intent,
            tokens_used: reply.usage,
            cost,
            should_escalate: false,
            appointment: reply.appointment,
            qualification_status,
            error: None,
        })
    }

    fn outbound(&self, turn: &Turn<'_>, text: &str, ai_generated: bool, usage: TokenUsage, cost: f64) -> NewMessage {
        let contact = &turn.record.contact;
        NewMessage {
            ai_generated,
            input_tokens: usage.input,
            output_tokens: usage.output,
            ai_model: (usage.total > 0).then(|| self.settings.model.clone()),
            ai_cost: cost,
            ..NewMessage::canned(&contact.id, &contact.channel, text)
        }
    }

    /// One atomic write for the reply and the contact update.
    async fn persist(
        &self,
        turn: &Turn<'_>,
        context: ConversationContext,
        booking: BookingState,
        status: Option<ContactStatus>,
        message: NewMessage,
    ) -> Result<(), ProcessingError> {
        let contact = &turn.record.contact;
        self.store
            .record_turn(&TurnRecord {
                contact_id: contact.id.clone(),
                expected_version: contact.state_version,
                status,
                conversation_context: context::serialize(&StateRecord { context, booking }),
                last_message_at: turn.now,
                message: Some(message),
            })
            .await?;
        Ok(())
    }
}

/// `usage` is non-zero only when a tool-mode generation chose the outcome.
fn step_from(outcome: BookingOutcome, usage: TokenUsage) -> Step {
    match outcome.message {
        Some(text) => Step::Done(Reply {
            text,
            booking: outcome.state,
            appointment: outcome.appointment,
            usage,
            ai_generated: usage.total > 0,
        }),
        None => Step::Continue {
            booking: outcome.state,
            booking_pending: outcome.booking_pending,
        },
    }
}

fn combine(a: TokenUsage, b: TokenUsage) -> TokenUsage {
    TokenUsage::new(a.input + b.input, a.output + b.output)
}

/// A booking wins; reaching `qualified` beats the default move into
/// `in_conversation`.
fn next_status(
    current: ContactStatus,
    booked: bool,
    qualification: QualificationStatus,
) -> Option<ContactStatus> {
    if booked {
        return Some(ContactStatus::Booked);
    }
    let early = matches!(
        current,
        ContactStatus::Pending | ContactStatus::Contacted | ContactStatus::InConversation
    );
    if qualification == QualificationStatus::Qualified && early {
        return Some(ContactStatus::Qualified);
    }
    if matches!(current, ContactStatus::Pending | ContactStatus::Contacted) {
        return Some(ContactStatus::InConversation);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use ContactStatus::*;
        assert_eq!(next_status(Pending, false, QualificationStatus::Unknown), Some(InConversation));
        assert_eq!(next_status(Contacted, false, QualificationStatus::Partial), Some(InConversation));
        assert_eq!(next_status(Contacted, false, QualificationStatus::Qualified), Some(Qualified));
        assert_eq!(next_status(InConversation, false, QualificationStatus::Qualified), Some(Qualified));
        assert_eq!(next_status(InConversation, false, QualificationStatus::Partial), None);
        assert_eq!(next_status(Qualified, true, QualificationStatus::Qualified), Some(Booked));
        assert_eq!(next_status(Booked, false, QualificationStatus::Qualified), None);
    }

    fn reply_outcome() -> BookingOutcome {
        BookingOutcome {
            message: Some("Pick one".to_string()),
            state: BookingState::default(),
            continue_with_ai: false,
            booking_pending: false,
            appointment: None,
        }
    }

    #[test]
    fn test_tool_outcome_with_message_ends_turn() {
        assert!(matches!(
            step_from(reply_outcome(), TokenUsage::new(5, 5)),
            Step::Done(r) if r.usage.total == 10 && r.ai_generated
        ));
    }

    #[test]
    fn test_parsed_outcome_is_not_ai_generated() {
        assert!(matches!(
            step_from(reply_outcome(), TokenUsage::default()),
            Step::Done(r) if r.usage.total == 0 && !r.ai_generated
        ));
    }

    #[test]
    fn test_deferred_outcome_keeps_pending_flag() {
        let outcome = BookingOutcome {
            message: None,
            state: BookingState {
                is_active: true,
                ..Default::default()
            },
            continue_with_ai: true,
            booking_pending: true,
            appointment: None,
        };
        match step_from(outcome, TokenUsage::default()) {
            Step::Continue { booking, booking_pending } => {
                assert!(booking.is_active);
                assert!(booking_pending);
            }
            _ => panic!("expected the turn to continue"),
        }
    }
}
