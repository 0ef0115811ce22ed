//! Request normalization: turns a caller's [`QueryRequest`] into the Flux text
//! that is sent to InfluxDB.

pub mod template;

use crate::{
    backend::{self, FluxBackend},
    config::InfluxConfig,
    error::{Result, ServiceError},
    response::QueryResponse,
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc};
use tracing::{info, warn};

pub use template::{expand, expand_with, LiteralEncoder, TemplateParams, Verbatim};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Kept as text so an unknown mode is reported as a rejected value rather
    /// than a body decoding failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// 12h of data smoothed by a 10m timed moving average.
    Tma2m,
    /// Mean of the last 2 minutes.
    Mean5m,
}

impl QueryMode {
    pub const ALL: [QueryMode; 2] = [QueryMode::Tma2m, QueryMode::Mean5m];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryMode::Tma2m => "tma2m",
            QueryMode::Mean5m => "mean5m",
        }
    }
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryMode {
    type Err = ServiceError;

    fn from_str(value: &str) -> Result<Self> {
        QueryMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == value)
            .ok_or_else(|| ServiceError::InvalidRequest(unsupported_mode_message()))
    }
}

fn unsupported_mode_message() -> String {
    let allowed: Vec<&str> = QueryMode::ALL.iter().map(QueryMode::as_str).collect();
    format!("unsupported mode, use {}", allowed.join(" or "))
}

/// A request after defaults are applied and templates expanded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedQuery {
    pub query: String,
    pub bucket: String,
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<QueryMode>,
}

pub fn resolve(request: &QueryRequest, config: &InfluxConfig) -> Result<ResolvedQuery> {
    let bucket = first_non_blank(request.bucket.as_deref(), &config.default_bucket);
    let device_id = first_non_blank(request.device_id.as_deref(), &config.default_device_id);

    let resolved = match request.query.as_deref().filter(|q| !q.is_empty()) {
        Some(query) => ResolvedQuery {
            query: query.to_string(),
            bucket: bucket.to_string(),
            device_id: device_id.to_string(),
            mode: None,
        },
        None => {
            let field = match request.field.as_deref().filter(|f| !f.is_empty()) {
                Some(field) => field,
                None => {
                    warn!("field missing for templated query");
                    return Err(ServiceError::InvalidRequest(
                        "field is required when query is empty".to_string(),
                    ));
                }
            };

            let raw_mode = request.mode.as_deref().unwrap_or_default();
            let mode = raw_mode.parse::<QueryMode>().inspect_err(|_| {
                warn!(mode = raw_mode, "unsupported query mode");
            })?;

            let query = expand(
                mode,
                TemplateParams {
                    bucket,
                    device_id,
                    field,
                },
            );

            ResolvedQuery {
                query,
                bucket: bucket.to_string(),
                device_id: device_id.to_string(),
                mode: Some(mode),
            }
        }
    };

    info!(query = %resolved.query, bucket = %resolved.bucket, "resolved InfluxDB query");
    Ok(resolved)
}

/// Resolves requests and runs them against the configured backend.
#[derive(Clone)]
pub struct QueryEngine {
    backend: Arc<dyn FluxBackend>,
    config: Arc<InfluxConfig>,
}

impl QueryEngine {
    pub fn new(backend: Arc<dyn FluxBackend>, config: Arc<InfluxConfig>) -> Self {
        Self { backend, config }
    }

    pub async fn execute_query(&self, request: QueryRequest) -> Result<QueryResponse> {
        let resolved = resolve(&request, &self.config)?;
        self.execute_resolved(&resolved).await
    }

    pub async fn execute_resolved(&self, resolved: &ResolvedQuery) -> Result<QueryResponse> {
        let response = self.backend.query(&resolved.query).await?;
        backend::normalize_response(&resolved.query, response)
    }

    /// Resolves the request without contacting the backend.
    pub fn translate(&self, request: &QueryRequest) -> Result<ResolvedQuery> {
        resolve(request, &self.config)
    }
}

fn first_non_blank<'a>(value: Option<&'a str>, fallback: &'a str) -> &'a str {
    match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => fallback,
    }
}
