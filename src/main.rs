use std::sync::{Arc, Mutex};

use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use leadline::config::AppConfig;
use leadline::db::{self, ContactStore, SqliteStore};
use leadline::handlers;
use leadline::services::ai::groq::GroqProvider;
use leadline::services::ai::ollama::OllamaProvider;
use leadline::services::ai::retry::RetryPolicy;
use leadline::services::ai::LlmProvider;
use leadline::services::booking::phrases::{PhrasePicker, RandomPhrases};
use leadline::services::booking::BookingSettings;
use leadline::services::calendar::google::GoogleCalendarProvider;
use leadline::services::messaging::twilio::TwilioProvider;
use leadline::services::messaging::MessagingProvider;
use leadline::services::orchestrator::{Orchestrator, OrchestratorSettings};
use leadline::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let conn = db::init_db(&config.database_url)?;
    let store: Arc<dyn ContactStore> = Arc::new(SqliteStore::new(Arc::new(Mutex::new(conn))));

    let llm: Arc<dyn LlmProvider> = match config.llm_provider.as_str() {
        "groq" => {
            anyhow::ensure!(!config.groq_api_key.is_empty(), "GROQ_API_KEY must be set when LLM_PROVIDER=groq");
            tracing::info!("using Groq LLM provider (model: {})", config.groq_model);
            Arc::new(GroqProvider::new(config.groq_api_key.clone()))
        }
        _ => {
            tracing::info!("using Ollama LLM provider (url: {}, model: {})", config.ollama_url, config.ollama_model);
            Arc::new(OllamaProvider::new(config.ollama_url.clone()))
        }
    };
    let messaging: Arc<dyn MessagingProvider> = Arc::new(TwilioProvider::new(
        config.twilio_account_sid.clone(),
        config.twilio_auth_token.clone(),
        config.twilio_phone_number.clone(),
    ));
    let calendar = Arc::new(GoogleCalendarProvider::new(config.google_calendar_url.clone()));
    let phrases: Arc<dyn PhrasePicker> = match config.phrase_seed {
        Some(seed) => Arc::new(RandomPhrases::seeded(seed)),
        None => Arc::new(RandomPhrases::new()),
    };

    let settings = OrchestratorSettings {
        model: config.model().to_string(),
        max_tokens: config.ai_max_tokens,
        temperature: config.ai_temperature,
        retry: RetryPolicy::default(),
        input_cost_per_mtok: config.ai_input_cost_per_mtok,
        output_cost_per_mtok: config.ai_output_cost_per_mtok,
        app_url: config.app_url.clone(),
        operator_phone: config.operator_phone.clone(),
        booking: BookingSettings {
            lookahead_days: config.booking_lookahead_days,
            slot_minutes: config.booking_slot_minutes,
            ..BookingSettings::default()
        },
        ..OrchestratorSettings::default()
    };
    let orchestrator = Orchestrator::new(
        store.clone(),
        llm,
        calendar,
        messaging.clone(),
        phrases,
        settings,
    );

    let state = Arc::new(AppState {
        config: config.clone(),
        store,
        messaging,
        orchestrator,
    });

    let app = handlers::router(state).layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
