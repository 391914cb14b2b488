use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::Deserialize;

use crate::models::{ConversationContext, EscalationCheck, Intent, IntentEntities, IntentResult};
use crate::services::ai::json::extract_json;
use crate::services::ai::retry::{generate_with_retry, RetryPolicy};
use crate::services::ai::{GenerationRequest, LlmProvider, Message};
use crate::services::booking::{parse, slots};

pub const REASON_HUMAN_REQUESTED: &str = "Customer requested human assistance";
pub const REASON_TOO_MANY_TURNS: &str = "Conversation exceeded maximum turns";
pub const REASON_REPEATED_ESCALATION: &str = "Multiple escalation attempts";
pub const REASON_FRUSTRATION: &str = "Customer appears frustrated";

const MAX_TURNS: u32 = 15;
const MAX_ESCALATION_ATTEMPTS: u32 = 2;

const OPT_OUT_PHRASES: &[&str] = &[
    "stop",
    "stopall",
    "unsubscribe",
    "remove me",
    "opt out",
    "opt-out",
    "optout",
    "do not contact",
    "don't contact",
    "dont contact",
    "do not text",
    "don't text",
    "dont text",
    "stop texting",
    "stop messaging",
    "take me off",
    "leave me alone",
];

/// Opt-out words that only count as the entire message.
const OPT_OUT_EXACT: &[&str] = &["cancel", "end", "quit"];

const HUMAN_PHRASES: &[&str] = &[
    "human",
    "real person",
    "actual person",
    "live agent",
    "representative",
    "talk to someone",
    "speak to someone",
    "speak with someone",
    "talk to a person",
    "speak to a person",
    "talk with a person",
    "a manager",
    "your manager",
];

const AFFIRMATIVE_PHRASES: &[&str] = &[
    "yes", "yeah", "yea", "yep", "yup", "sure", "ok", "okay", "k", "y", "absolutely", "definitely",
    "of course", "sounds good",
];

const NEGATIVE_PHRASES: &[&str] = &[
    "no",
    "nope",
    "nah",
    "not interested",
    "no thanks",
    "no thank you",
    "not now",
    "not really",
    "pass",
];

const RESCHEDULE_PHRASES: &[&str] = &[
    "reschedule",
    "re-schedule",
    "move my appointment",
    "move the appointment",
    "move my meeting",
    "move our meeting",
    "move my call",
    "change my appointment",
    "change the appointment",
    "change my booking",
    "push it back",
    "move it to",
    "can we move",
];

const BOOKING_PHRASES: &[&str] = &[
    "book",
    "schedule",
    "appointment",
    "meeting",
    "call",
    "demo",
    "consultation",
    "available",
    "availability",
    "calendar",
    "set up a time",
    "time slot",
    "openings",
    "when can",
    "free on",
];

const QUESTION_STARTERS: &[&str] = &[
    "what", "how", "when", "where", "why", "who", "which", "can", "could", "do", "does", "is",
    "are", "will", "would", "should",
];

const GREETING_PREFIXES: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "hiya",
    "howdy",
    "yo",
    "good morning",
    "good afternoon",
    "good evening",
];

const THANKS_PHRASES: &[&str] = &["thanks", "thank you", "thx", "ty", "appreciate it", "cheers"];

const FRUSTRATION_PHRASES: &[&str] = &[
    "frustrated",
    "frustrating",
    "annoying",
    "annoyed",
    "ridiculous",
    "useless",
    "waste of time",
    "not helpful",
    "terrible",
    "angry",
    "wtf",
    "are you a bot",
    "are you a robot",
    "is this a bot",
];

fn phrase_re(phrases: &[&str]) -> Regex {
    let alternatives: Vec<String> = phrases.iter().map(|p| regex::escape(p)).collect();
    Regex::new(&format!(r"\b(?:{})\b", alternatives.join("|"))).unwrap()
}

macro_rules! phrase_matcher {
    ($name:ident, $phrases:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| phrase_re($phrases))
        }
    };
}

phrase_matcher!(opt_out_re, OPT_OUT_PHRASES);
phrase_matcher!(human_re, HUMAN_PHRASES);
phrase_matcher!(affirmative_re, AFFIRMATIVE_PHRASES);
phrase_matcher!(negative_re, NEGATIVE_PHRASES);
phrase_matcher!(reschedule_re, RESCHEDULE_PHRASES);
phrase_matcher!(booking_re, BOOKING_PHRASES);
phrase_matcher!(thanks_re, THANKS_PHRASES);
phrase_matcher!(frustration_re, FRUSTRATION_PHRASES);

fn day_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\b(?:monday|mon|tuesday|tues|tue|wednesday|weds|wed|thursday|thurs|thur|thu|friday|fri|saturday|sat|sunday|sun|today|tomorrow)\s+(?:at\s+)?\d{1,2}\b",
        )
        .unwrap()
    })
}

fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\b(\d{4}-\d{2}-\d{2}|\d{1,2}/\d{1,2}(?:/\d{2,4})?|(?:january|jan|february|feb|march|mar|april|apr|may|june|jun|july|jul|august|aug|september|sept|sep|october|oct|november|nov|december|dec)\.?\s+\d{1,2}(?:st|nd|rd|th)?)\b",
        )
        .unwrap()
    })
}

fn strip_punctuation(text: &str) -> String {
    text.trim_matches(|c: char| !c.is_alphanumeric()).to_string()
}

fn starts_with_word(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| {
        text.strip_prefix(w)
            .is_some_and(|rest| rest.is_empty() || !rest.starts_with(|c: char| c.is_alphanumeric()))
    })
}

/// Day, time and date mentions in the message.
pub fn extract_entities(message: &str) -> IntentEntities {
    let text = parse::normalize(message);
    let day = parse::parse_day(&text).map(|d| match d {
        parse::DayRef::Weekday(w) => parse::weekday_name(w).to_lowercase(),
        parse::DayRef::Today => "today".to_string(),
        parse::DayRef::Tomorrow => "tomorrow".to_string(),
    });
    let time = parse::parse_time(&text).map(|t| match t.meridiem {
        Some(_) => slots::format_time(t.candidates()[0]),
        None => format!("{}:{:02}", t.hour, t.minute),
    });
    let date = date_re().find(&text).map(|m| m.as_str().to_string());
    IntentEntities { day, time, date }
}

/// Deterministic classification. `None` means no pattern matched.
pub fn detect_fast_path(message: &str) -> Option<IntentResult> {
    let text = parse::normalize(message);
    let bare = strip_punctuation(&text);
    if bare.is_empty() {
        return None;
    }

    if opt_out_re().is_match(&text) || OPT_OUT_EXACT.contains(&bare.as_str()) {
        return Some(IntentResult::new(Intent::OptOut, 1.0));
    }

    if human_re().is_match(&text) {
        return Some(
            IntentResult::new(Intent::RequestHuman, 0.95).escalating(REASON_HUMAN_REQUESTED),
        );
    }

    if bare.chars().count() < 10 && affirmative_re().is_match(&bare) {
        return Some(IntentResult::new(Intent::PositiveResponse, 0.85));
    }

    if bare.chars().count() < 20 && negative_re().is_match(&bare) {
        return Some(IntentResult::new(Intent::NegativeResponse, 0.85));
    }

    if reschedule_re().is_match(&text) {
        return Some(IntentResult::new(Intent::Reschedule, 0.9).with_entities(extract_entities(&text)));
    }

    if booking_re().is_match(&text) {
        return Some(
            IntentResult::new(Intent::BookingInterest, 0.8).with_entities(extract_entities(&text)),
        );
    }

    if parse::parse_time(&text).is_some() || day_number_re().is_match(&text) {
        return Some(
            IntentResult::new(Intent::BookingInterest, 0.85).with_entities(extract_entities(&text)),
        );
    }

    if text.contains('?') || starts_with_word(&text, QUESTION_STARTERS) {
        return Some(IntentResult::new(Intent::Question, 0.75));
    }

    if bare.chars().count() < 30 && starts_with_word(&bare, GREETING_PREFIXES) {
        return Some(IntentResult::new(Intent::Greeting, 0.9));
    }

    if thanks_re().is_match(&text) {
        return Some(IntentResult::new(Intent::Thanks, 0.9));
    }

    None
}

/// Runs on every message, independent of the detected intent.
pub fn check_escalation_triggers(message: &str, context: &ConversationContext) -> EscalationCheck {
    let text = parse::normalize(message);

    if human_re().is_match(&text) {
        return EscalationCheck::required(REASON_HUMAN_REQUESTED);
    }
    if context.state.turn_count > MAX_TURNS {
        return EscalationCheck::required(REASON_TOO_MANY_TURNS);
    }
    if context.state.escalation_attempts >= MAX_ESCALATION_ATTEMPTS {
        return EscalationCheck::required(REASON_REPEATED_ESCALATION);
    }
    if frustration_re().is_match(&text) {
        return EscalationCheck::required(REASON_FRUSTRATION);
    }
    EscalationCheck::none()
}

const CLASSIFIER_PROMPT: &str = r#"You classify one inbound SMS from a sales lead.

Return ONLY valid JSON (no markdown, no explanation) with this exact structure:
{"intent": "<label>", "confidence": 0.0-1.0, "entities": {"day": null, "time": null, "date": null}}

Labels:
- greeting: hello with no other content
- question: asks about the product, pricing, or process
- positive_response: agrees or shows interest
- negative_response: declines or is not interested
- booking_interest: wants to schedule a call or meeting
- reschedule: wants to move an existing appointment
- confirmation: confirms a proposed time or detail
- objection: raises a concern (price, timing, trust, competitor)
- opt_out: wants no further messages
- request_human: wants to talk to a person
- thanks: thanks with no other content
- unclear: none of the above"#;

#[derive(Deserialize)]
struct ClassifierResponse {
    intent: String,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    entities: Option<IntentEntities>,
}

pub struct IntentDetector {
    llm: Arc<dyn LlmProvider>,
    model: String,
    retry: RetryPolicy,
}

impl IntentDetector {
    pub fn new(llm: Arc<dyn LlmProvider>, model: String, retry: RetryPolicy) -> Self {
        Self { llm, model, retry }
    }

    /// Never fails: a classifier error yields `unclear` with zero confidence.
    pub async fn detect(&self, message: &str, context: &ConversationContext) -> IntentResult {
        if let Some(result) = detect_fast_path(message) {
            return result;
        }

        match self.classify(message, context).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "intent classification failed, treating as unclear");
                IntentResult::unclear()
            }
        }
    }

    async fn classify(
        &self,
        message: &str,
        context: &ConversationContext,
    ) -> anyhow::Result<IntentResult> {
        let summary = if context.summary.is_empty() {
            "New conversation."
        } else {
            context.summary.as_str()
        };
        let request = GenerationRequest {
            model: self.model.clone(),
            system_prompt: CLASSIFIER_PROMPT.to_string(),
            messages: vec![Message::user(&format!(
                "Conversation so far: {summary}\n\nLatest message: {message}"
            ))],
            max_tokens: 100,
            temperature: 0.1,
            tools: vec![],
        };

        let generation = generate_with_retry(self.llm.as_ref(), &request, &self.retry).await?;
        let parsed: ClassifierResponse = extract_json(&generation.content)
            .ok_or_else(|| anyhow::anyhow!("classifier returned no JSON: {}", generation.content))?;

        let intent = Intent::from_label(&parsed.intent);
        let confidence = parsed.confidence.unwrap_or(0.5).clamp(0.0, 1.0);
        let mut result = IntentResult::new(intent, confidence)
            .with_entities(parsed.entities.unwrap_or_default());
        if intent == Intent::RequestHuman {
            result = result.escalating(REASON_HUMAN_REQUESTED);
        }
        tracing::debug!(intent = intent.as_str(), confidence, "classified by model");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ai::{AiError, Generation};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast(message: &str) -> Intent {
        detect_fast_path(message).map(|r| r.intent).unwrap_or(Intent::Unclear)
    }

    #[test]
    fn test_opt_out_anywhere() {
        for message in ["STOP", "stop", "Please stop texting me", "unsubscribe", "remove me from this list", "Cancel"] {
            let result = detect_fast_path(message).unwrap();
            assert_eq!(result.intent, Intent::OptOut, "{message}");
            assert_eq!(result.confidence, 1.0);
        }
        assert_ne!(fast("can we cancel the 3pm and pick another?"), Intent::OptOut);
    }

    #[test]
    fn test_human_request_escalates() {
        let result = detect_fast_path("can I talk to a real person").unwrap();
        assert_eq!(result.intent, Intent::RequestHuman);
        assert!(result.requires_escalation);
        assert_eq!(result.escalation_reason.as_deref(), Some(REASON_HUMAN_REQUESTED));
    }

    #[test]
    fn test_short_replies() {
        assert_eq!(fast("Yes!"), Intent::PositiveResponse);
        assert_eq!(fast("ok"), Intent::PositiveResponse);
        assert_eq!(fast("no thanks"), Intent::NegativeResponse);
        assert_eq!(fast("Not interested."), Intent::NegativeResponse);
    }

    #[test]
    fn test_reschedule_before_booking() {
        let result = detect_fast_path("I need to reschedule my appointment to Thursday").unwrap();
        assert_eq!(result.intent, Intent::Reschedule);
        assert_eq!(result.entities.day.as_deref(), Some("thursday"));
    }

    #[test]
    fn test_booking_and_time_selection() {
        let result = detect_fast_path("Can we book a call for tomorrow at 3pm").unwrap();
        assert_eq!(result.intent, Intent::BookingInterest);
        assert_eq!(result.entities.day.as_deref(), Some("tomorrow"));
        assert_eq!(result.entities.time.as_deref(), Some("3:00 PM"));

        let result = detect_fast_path("the 3pm works").unwrap();
        assert_eq!(result.intent, Intent::BookingInterest);
        assert_eq!(result.confidence, 0.85);

        assert_eq!(fast("tuesday 2 is good"), Intent::BookingInterest);
        assert_eq!(fast("monday 3"), Intent::BookingInterest);
        assert_eq!(fast("at 10"), Intent::BookingInterest);
    }

    #[test]
    fn test_words_starting_with_a_day_are_not_booking() {
        for message in [
            "We're planning a wedding 12 months out",
            "I'm satisfied 10 times over with our current setup",
            "money 20 grand is the limit",
            "it was sunny 5 days straight",
        ] {
            assert_ne!(fast(message), Intent::BookingInterest, "{message}");
        }
    }

    #[test]
    fn test_question_greeting_thanks() {
        assert_eq!(fast("What does it cost?"), Intent::Question);
        assert_eq!(fast("how long does install take"), Intent::Question);
        assert_eq!(fast("Hey there"), Intent::Greeting);
        assert_eq!(fast("good morning!"), Intent::Greeting);
        assert_eq!(fast("Thanks so much, really appreciate it"), Intent::Thanks);
        assert!(detect_fast_path("my roof faces south mostly").is_none());
    }

    #[test]
    fn test_extract_date_entity() {
        let entities = extract_entities("could we meet on June 18th or 6/19");
        assert_eq!(entities.date.as_deref(), Some("june 18th"));
        assert_eq!(extract_entities("mark 12 on the form").date, None);
    }

    #[test]
    fn test_escalation_triggers() {
        let mut context = ConversationContext::default();
        assert!(!check_escalation_triggers("sounds great", &context).required);
        assert_eq!(
            check_escalation_triggers("this is ridiculous", &context).reason.as_deref(),
            Some(REASON_FRUSTRATION)
        );

        context.state.turn_count = 16;
        let check = check_escalation_triggers("sounds great", &context);
        assert!(check.required);
        assert_eq!(check.reason.as_deref(), Some(REASON_TOO_MANY_TURNS));

        context.state.turn_count = 3;
        context.state.escalation_attempts = 2;
        assert_eq!(
            check_escalation_triggers("ok", &context).reason.as_deref(),
            Some(REASON_REPEATED_ESCALATION)
        );
    }

    struct CountingLlm {
        calls: AtomicUsize,
        reply: Result<String, AiError>,
    }

    #[async_trait::async_trait]
    impl LlmProvider for CountingLlm {
        async fn generate(&self, _request: &GenerationRequest) -> Result<Generation, AiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone().map(|content| Generation {
                content,
                ..Default::default()
            })
        }
    }

    fn detector(reply: Result<String, AiError>) -> (IntentDetector, Arc<CountingLlm>) {
        let llm = Arc::new(CountingLlm {
            calls: AtomicUsize::new(0),
            reply,
        });
        (
            IntentDetector::new(llm.clone(), "test-model".into(), RetryPolicy::immediate()),
            llm,
        )
    }

    #[tokio::test]
    async fn test_opt_out_never_calls_model() {
        let (detector, llm) = detector(Err(AiError::Transport("down".into())));
        let result = detector.detect("STOP", &ConversationContext::default()).await;
        assert_eq!(result.intent, Intent::OptOut);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_model_fallback_maps_labels() {
        let (detector, llm) = detector(Ok(
            "```json\n{\"intent\":\"objection\",\"confidence\":0.7}\n```".into(),
        ));
        let result = detector
            .detect("my roof faces south mostly", &ConversationContext::default())
            .await;
        assert_eq!(result.intent, Intent::Objection);
        assert_eq!(result.confidence, 0.7);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);

        let (detector, _) = detector_with_label("something_new");
        let result = detector
            .detect("my roof faces south mostly", &ConversationContext::default())
            .await;
        assert_eq!(result.intent, Intent::Unclear);
    }

    fn detector_with_label(label: &str) -> (IntentDetector, Arc<CountingLlm>) {
        detector(Ok(format!("{{\"intent\":\"{label}\"}}")))
    }

    #[tokio::test]
    async fn test_model_failure_is_unclear() {
        let (detector, _) = detector(Err(AiError::Status {
            status: 500,
            message: "boom".into(),
        }));
        let result = detector
            .detect("my roof faces south mostly", &ConversationContext::default())
            .await;
        assert_eq!(result, IntentResult::unclear());
    }
}
