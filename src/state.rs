use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::ContactStore;
use crate::services::messaging::MessagingProvider;
use crate::services::orchestrator::Orchestrator;

pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn ContactStore>,
    pub messaging: Arc<dyn MessagingProvider>,
    pub orchestrator: Orchestrator,
}
