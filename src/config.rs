use std::env;
use std::str::FromStr;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub app_url: String,
    pub llm_provider: String,
    pub groq_api_key: String,
    pub groq_model: String,
    pub ollama_url: String,
    pub ollama_model: String,
    pub ai_max_tokens: u32,
    pub ai_temperature: f32,
    pub ai_input_cost_per_mtok: f64,
    pub ai_output_cost_per_mtok: f64,
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    pub twilio_phone_number: String,
    pub operator_phone: Option<String>,
    pub google_calendar_url: String,
    pub booking_lookahead_days: u32,
    pub booking_slot_minutes: u32,
    pub phrase_seed: Option<u64>,
}

fn parsed<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: parsed("PORT", 3000),
            database_url: string("DATABASE_URL", "leadline.db"),
            app_url: string("APP_URL", "http://localhost:3000"),
            llm_provider: string("LLM_PROVIDER", "ollama"),
            groq_api_key: env::var("GROQ_API_KEY").unwrap_or_default(),
            groq_model: string("GROQ_MODEL", "llama-3.3-70b-versatile"),
            ollama_url: string("OLLAMA_URL", "http://localhost:11434"),
            ollama_model: string("OLLAMA_MODEL", "llama3.2"),
            ai_max_tokens: parsed("AI_MAX_TOKENS", 300),
            ai_temperature: parsed("AI_TEMPERATURE", 0.7),
            ai_input_cost_per_mtok: parsed("AI_INPUT_COST_PER_MTOK", 0.59),
            ai_output_cost_per_mtok: parsed("AI_OUTPUT_COST_PER_MTOK", 0.79),
            twilio_account_sid: env::var("TWILIO_ACCOUNT_SID").unwrap_or_default(),
            twilio_auth_token: env::var("TWILIO_AUTH_TOKEN").unwrap_or_default(),
            twilio_phone_number: env::var("TWILIO_PHONE_NUMBER").unwrap_or_default(),
            operator_phone: env::var("OPERATOR_PHONE").ok().filter(|p| !p.trim().is_empty()),
            google_calendar_url: string(
                "GOOGLE_CALENDAR_URL",
                "https://www.googleapis.com/calendar/v3",
            ),
            booking_lookahead_days: parsed("BOOKING_LOOKAHEAD_DAYS", 7),
            booking_slot_minutes: parsed("BOOKING_SLOT_MINUTES", 30),
            phrase_seed: env::var("PHRASE_SEED").ok().and_then(|v| v.trim().parse().ok()),
        }
    }

    /// Model name for the selected provider.
    pub fn model(&self) -> &str {
        match self.llm_provider.as_str() {
            "groq" => &self.groq_model,
            _ => &self.ollama_model,
        }
    }
}
