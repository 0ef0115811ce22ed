use crate::{
    backend::{FluxBackend, HttpBackend},
    config::AppConfig,
    error::{Result, ServiceError},
    query::{QueryEngine, QueryRequest, ResolvedQuery},
    response::QueryResponse,
    state::AppState,
    vitals::{JudgeRequest, Judgement},
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

pub struct Server {
    config: Arc<AppConfig>,
    state: AppState,
}

impl Server {
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let backend = HttpBackend::new(&config.influx)?;
        info!(endpoint = %backend.endpoint(), "InfluxDB backend configured");
        Ok(Self::with_backend(config, Arc::new(backend)))
    }

    /// Builds the server around an already constructed backend.
    pub fn with_backend(config: AppConfig, backend: Arc<dyn FluxBackend>) -> Self {
        let config = Arc::new(config);
        let query = QueryEngine::new(backend, Arc::new(config.influx.clone()));
        let state = AppState::new(&config, query);

        Self { config, state }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/healthz", get(Self::health))
            .route("/api/influxdb/query", post(Self::query))
            .route("/api/influxdb/translate", post(Self::translate))
            .route("/api/influxdb/judge", post(Self::judge))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.config.listen_addr;
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "influx-proxy listening");
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    async fn health() -> Json<serde_json::Value> {
        Json(json!({ "status": "ok" }))
    }

    async fn query(
        State(state): State<AppState>,
        headers: HeaderMap,
        body: std::result::Result<Json<QueryRequest>, JsonRejection>,
    ) -> Result<Json<QueryResponse>> {
        enforce_api_key(&headers, &state)?;
        let Json(request) = body.map_err(invalid_body)?;
        let response = state.query.execute_query(request).await?;
        Ok(Json(response))
    }

    async fn translate(
        State(state): State<AppState>,
        headers: HeaderMap,
        body: std::result::Result<Json<QueryRequest>, JsonRejection>,
    ) -> Result<Json<ResolvedQuery>> {
        enforce_api_key(&headers, &state)?;
        let Json(request) = body.map_err(invalid_body)?;
        Ok(Json(state.query.translate(&request)?))
    }

    async fn judge(
        State(state): State<AppState>,
        headers: HeaderMap,
        body: std::result::Result<Json<JudgeRequest>, JsonRejection>,
    ) -> Result<Json<Judgement>> {
        enforce_api_key(&headers, &state)?;
        let Json(request) = body.map_err(invalid_body)?;
        Ok(Json(state.vitals.judge(&request).await?))
    }
}

fn invalid_body(rejection: JsonRejection) -> ServiceError {
    ServiceError::InvalidRequest(format!("invalid request body: {}", rejection.body_text()))
}

fn enforce_api_key(headers: &HeaderMap, state: &AppState) -> Result<()> {
    if let Some(expected) = &state.api_key {
        let provided = headers
            .get("x-api-key")
            .and_then(|value| value.to_str().ok());

        if provided != Some(expected.as_ref()) {
            return Err(ServiceError::Auth);
        }
    }

    Ok(())
}
