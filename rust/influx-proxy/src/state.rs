use crate::{config::AppConfig, query::QueryEngine, vitals::VitalsMonitor};
use std::sync::Arc;

/// Per-router state shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub api_key: Option<Arc<str>>,
    pub query: QueryEngine,
    pub vitals: Arc<VitalsMonitor>,
}

impl AppState {
    pub fn new(config: &AppConfig, query: QueryEngine) -> Self {
        let vitals = VitalsMonitor::new(query.clone(), config.vitals.clone());
        Self {
            api_key: config.api_key.as_deref().map(Arc::from),
            query,
            vitals: Arc::new(vitals),
        }
    }
}
