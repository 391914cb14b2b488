use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::Deserialize;

use crate::models::{
    ConversationContext, Criterion, Direction, ExtractedInfo, Qualification, QualificationStatus,
    StoredMessage,
};
use crate::services::ai::json::extract_json;
use crate::services::ai::retry::{generate_with_retry, RetryPolicy};
use crate::services::ai::{GenerationRequest, LlmProvider, Message};
use crate::services::context::{self, QualificationUpdate};

const FUZZY_PREFIX_CHARS: usize = 20;
const REQUALIFY_AFTER_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Assessment {
    pub status: QualificationStatus,
    pub criteria_matched: Vec<String>,
    pub criteria_unknown: Vec<String>,
    pub criteria_missed: Vec<String>,
    pub extracted_info: ExtractedInfo,
}

impl Assessment {
    fn from_context(context: &ConversationContext) -> Self {
        let q = &context.qualification;
        Self {
            status: q.status,
            criteria_matched: q.criteria_matched.clone(),
            criteria_unknown: q.criteria_unknown.clone(),
            criteria_missed: q.criteria_missed.clone(),
            extracted_info: context.extracted_info.clone(),
        }
    }

    pub fn qualification_update(&self) -> QualificationUpdate {
        QualificationUpdate {
            matched: self.criteria_matched.clone(),
            missed: self.criteria_missed.clone(),
            unknown: self.criteria_unknown.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Verdict {
    Matched,
    Missed,
    Unknown,
}

impl Verdict {
    fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "matched" | "met" | "yes" | "true" => Verdict::Matched,
            "missed" | "not_met" | "unmet" | "no" | "false" => Verdict::Missed,
            _ => Verdict::Unknown,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CriterionVerdict {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    criterion: Option<String>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    evidence: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssessmentResponse {
    #[serde(default)]
    criteria: Vec<CriterionVerdict>,
    #[serde(default)]
    extracted_info: Option<ExtractedInfo>,
}

fn prefix(text: &str) -> String {
    text.trim().to_lowercase().chars().take(FUZZY_PREFIX_CHARS).collect()
}

/// Which verdict belongs to `criterion`: by id, then by exact text, then by
/// overlapping 20-character prefixes. Texts shorter than the prefix never
/// match fuzzily.
fn find_verdict<'a>(criterion: &Criterion, verdicts: &'a [CriterionVerdict]) -> Option<&'a CriterionVerdict> {
    let by_id = verdicts.iter().find(|v| {
        v.id
            .as_deref()
            .is_some_and(|id| id.trim().eq_ignore_ascii_case(&criterion.id))
    });
    if by_id.is_some() {
        return by_id;
    }

    let wanted = criterion.text.trim().to_lowercase();
    if wanted.is_empty() {
        return None;
    }
    let long_enough = |text: &str| text.chars().count() >= FUZZY_PREFIX_CHARS;

    verdicts.iter().find(|v| {
        let Some(echo) = v
            .criterion
            .as_deref()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
        else {
            return false;
        };
        echo == wanted
            || (long_enough(&wanted) && echo.contains(&prefix(&wanted)))
            || (long_enough(&echo) && wanted.contains(&prefix(&echo)))
    })
}

const ASSESSMENT_PROMPT: &str = r#"You assess whether a sales lead meets qualification criteria, based only on what the lead has said.

For each criterion decide:
- "matched": the lead clearly meets it
- "missed": the lead clearly does not meet it
- "unknown": not enough information yet

Also extract any facts the lead has shared.

Return ONLY valid JSON (no markdown, no explanation) with this exact structure:
{
  "criteria": [{"id": "<criterion id>", "criterion": "<criterion text>", "status": "matched|missed|unknown", "evidence": "short quote or null"}],
  "extractedInfo": {"isDecisionMaker": null, "budget": null, "timeline": null, "companySize": null, "painPoints": [], "objections": [], "notes": []}
}"#;

fn changed_circumstances_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\b(things (have|'ve) changed|(circumstances|situation) (has |have )?changed|got (the )?approval|(budget|it) (got |was |has been )?approved|(now|finally) (i|we) can|now (i|we) (have|do)|we('ve| have) (now )?got (the |a )?budget|changed my mind|ready now)\b",
        )
        .unwrap()
    })
}

/// A disqualified contact may be reassessed after a week of silence or when
/// they say their situation changed.
pub fn should_allow_requalification(
    context: &ConversationContext,
    latest_message: &str,
    last_message_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    if context.qualification.status != QualificationStatus::Disqualified {
        return false;
    }
    if last_message_at.is_some_and(|at| now - at >= Duration::days(REQUALIFY_AFTER_DAYS)) {
        return true;
    }
    changed_circumstances_re().is_match(&latest_message.to_lowercase())
}

/// Reopens previously missed criteria.
pub fn reset_criteria_for_reassessment(qualification: &Qualification) -> Qualification {
    let mut unknown = qualification.criteria_unknown.clone();
    for criterion in &qualification.criteria_missed {
        if !unknown.contains(criterion) {
            unknown.push(criterion.clone());
        }
    }
    Qualification {
        status: if qualification.criteria_matched.is_empty() {
            QualificationStatus::Unknown
        } else {
            QualificationStatus::Partial
        },
        criteria_matched: qualification.criteria_matched.clone(),
        criteria_unknown: unknown,
        criteria_missed: vec![],
    }
}

pub struct QualificationEngine {
    llm: Arc<dyn LlmProvider>,
    model: String,
    retry: RetryPolicy,
}

impl QualificationEngine {
    pub fn new(llm: Arc<dyn LlmProvider>, model: String, retry: RetryPolicy) -> Self {
        Self { llm, model, retry }
    }

    /// Falls back to the prior assessment in `context` when the model call or
    /// its output fails.
    pub async fn assess(
        &self,
        criteria: &[Criterion],
        context: &ConversationContext,
        history: &[StoredMessage],
        latest_message: &str,
    ) -> Assessment {
        if criteria.is_empty() {
            return Assessment {
                status: QualificationStatus::Qualified,
                extracted_info: context.extracted_info.clone(),
                ..Default::default()
            };
        }

        match self.request_verdicts(criteria, context, history, latest_message).await {
            Ok(response) => merge_verdicts(criteria, context, response),
            Err(e) => {
                tracing::warn!(error = %e, "qualification assessment failed, keeping prior state");
                Assessment::from_context(context)
            }
        }
    }

    async fn request_verdicts(
        &self,
        criteria: &[Criterion],
        context: &ConversationContext,
        history: &[StoredMessage],
        latest_message: &str,
    ) -> anyhow::Result<AssessmentResponse> {
        let criteria_list = criteria
            .iter()
            .map(|c| format!("- [{}] {}", c.id, c.text))
            .collect::<Vec<_>>()
            .join("\n");

        let mut transcript: Vec<String> = history
            .iter()
            .map(|m| match m.direction {
                Direction::Inbound => format!("Lead: {}", m.content),
                Direction::Outbound => format!("Us: {}", m.content),
            })
            .collect();
        if history.last().map(|m| m.content.as_str()) != Some(latest_message) {
            transcript.push(format!("Lead: {latest_message}"));
        }

        let known = if context.summary.is_empty() {
            String::new()
        } else {
            format!("\n\nWhat we know so far: {}", context.summary)
        };

        let request = GenerationRequest {
            model: self.model.clone(),
            system_prompt: ASSESSMENT_PROMPT.to_string(),
            messages: vec![Message::user(&format!(
                "Criteria:\n{criteria_list}{known}\n\nConversation:\n{}",
                transcript.join("\n")
            ))],
            max_tokens: 500,
            temperature: 0.1,
            tools: vec![],
        };

        let generation = generate_with_retry(self.llm.as_ref(), &request, &self.retry).await?;
        extract_json(&generation.content)
            .ok_or_else(|| anyhow::anyhow!("assessment returned no JSON: {}", generation.content))
    }
}

/// Fresh matched/missed verdicts override prior membership; everything not
/// decided is unknown.
fn merge_verdicts(
    criteria: &[Criterion],
    context: &ConversationContext,
    response: AssessmentResponse,
) -> Assessment {
    let mut fresh = QualificationUpdate::default();
    for criterion in criteria {
        let Some(verdict) = find_verdict(criterion, &response.criteria) else {
            continue;
        };
        match Verdict::from_label(&verdict.status) {
            Verdict::Matched => fresh.matched.push(criterion.text.clone()),
            Verdict::Missed => fresh.missed.push(criterion.text.clone()),
            Verdict::Unknown => {}
        }
        if let Some(evidence) = verdict.evidence.as_deref().filter(|e| !e.is_empty()) {
            tracing::debug!(criterion = %criterion.id, status = %verdict.status, evidence, "criterion verdict");
        }
    }

    let texts = Criterion::texts(criteria);
    let merged = context::merge_qualification(&context.qualification, &fresh, &texts);
    let decided: Vec<&String> = merged
        .criteria_matched
        .iter()
        .chain(merged.criteria_missed.iter())
        .collect();
    let unknown: Vec<String> = texts
        .iter()
        .filter(|t| !decided.contains(t))
        .cloned()
        .collect();

    let extracted_info = match &response.extracted_info {
        Some(info) => context::merge_extracted_info(&context.extracted_info, info),
        None => context.extracted_info.clone(),
    };

    Assessment {
        status: QualificationStatus::derive(&merged.criteria_matched, &merged.criteria_missed, &texts),
        criteria_matched: merged.criteria_matched,
        criteria_unknown: unknown,
        criteria_missed: merged.criteria_missed,
        extracted_info,
    }
}
