use serde::{Deserialize, Serialize};

use super::availability::BusinessHours;
use super::contact::{Client, Criterion, Workflow};

const FALLBACK_DESCRIPTION: &str =
    "a company that helps its customers solve problems and grow their business";
const FALLBACK_VALUE_PROPOSITION: &str = "a personalised solution that fits their needs";
const FALLBACK_GOAL: &str = "learn about the lead's needs and book a short call with the team";

/// Everything the reply generator needs to know about the business behind
/// a workflow, resolved once per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowKnowledge {
    pub company_name: String,
    pub company_description: String,
    pub products: Vec<String>,
    pub value_propositions: Vec<String>,
    pub target_audience: Option<String>,
    pub criteria: Vec<Criterion>,
    pub goal: String,
    pub tone: String,
    pub dos: Vec<String>,
    pub donts: Vec<String>,
    pub custom_instructions: Option<String>,
    pub business_hours: String,
}

impl WorkflowKnowledge {
    /// Brand research may not have run yet; every field has a fallback.
    pub fn resolve(client: &Client, workflow: &Workflow) -> Self {
        let research = client.brand_research.clone().unwrap_or_default();

        let company_description = research
            .company_overview
            .filter(|o| !o.trim().is_empty())
            .unwrap_or_else(|| FALLBACK_DESCRIPTION.to_string());

        let mut value_propositions = research.value_propositions;
        if value_propositions.is_empty() {
            value_propositions.push(FALLBACK_VALUE_PROPOSITION.to_string());
        }

        Self {
            company_name: client.name.clone(),
            company_description,
            products: research.products,
            value_propositions,
            target_audience: research.target_audience,
            criteria: workflow.criteria.clone(),
            goal: workflow
                .goal
                .clone()
                .filter(|g| !g.trim().is_empty())
                .unwrap_or_else(|| FALLBACK_GOAL.to_string()),
            tone: workflow
                .tone
                .clone()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| "professional".to_string()),
            dos: workflow.dos.clone(),
            donts: workflow.donts.clone(),
            custom_instructions: workflow.custom_instructions.clone(),
            business_hours: BusinessHours::from_config(client.business_hours.as_deref())
                .to_human_readable(),
        }
    }

    pub fn to_prompt(&self) -> String {
        let mut lines = vec![format!(
            "You are texting on behalf of {}, {}.",
            self.company_name, self.company_description
        )];

        if !self.products.is_empty() {
            lines.push(format!("Products and services: {}.", self.products.join(", ")));
        }
        lines.push(format!("Why customers choose us: {}.", self.value_propositions.join("; ")));
        if let Some(audience) = &self.target_audience {
            lines.push(format!("Typical customers: {audience}."));
        }
        lines.push(format!("Your goal: {}.", self.goal));

        match self.tone.as_str() {
            "friendly" => lines.push("Use a warm, friendly tone. Be personable and approachable.".to_string()),
            "casual" => lines.push(
                "Use a casual, relaxed tone. Keep it conversational, like texting a friend.".to_string(),
            ),
            _ => {}
        }

        if !self.criteria.is_empty() {
            let list = self
                .criteria
                .iter()
                .map(|c| format!("- {}", c.text))
                .collect::<Vec<_>>()
                .join("\n");
            lines.push(format!(
                "Naturally find out whether the lead meets these criteria (one question at a time):\n{list}"
            ));
        }

        if !self.dos.is_empty() {
            lines.push(format!("Always: {}.", self.dos.join("; ")));
        }
        if !self.donts.is_empty() {
            lines.push(format!("Never: {}.", self.donts.join("; ")));
        }
        if !self.business_hours.is_empty() {
            lines.push(format!("Business hours: {}.", self.business_hours));
        }
        if let Some(custom) = self.custom_instructions.as_ref().filter(|c| !c.is_empty()) {
            lines.push(custom.clone());
        }

        lines.join("\n")
    }
}
