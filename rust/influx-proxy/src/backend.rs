//! HTTP gateway to the InfluxDB v2 query API.

use crate::{
    config::InfluxConfig,
    error::{Result, ServiceError},
    response::{annotated_csv, envelope, QueryResponse, ResponseFormat},
};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    Certificate, Client, StatusCode, Url,
};
use serde::Serialize;
use tracing::{debug, error, info};

pub const USER_AGENT: &str = concat!("influx-proxy/", env!("CARGO_PKG_VERSION"));

const BODY_PREVIEW_LIMIT: usize = 200;

/// Raw answer from the backend, fully buffered.
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub status: StatusCode,
    pub content_type: String,
    pub body: Bytes,
}

#[async_trait]
pub trait FluxBackend: Send + Sync {
    /// Sends one Flux query. Only transport failures are errors here; any
    /// HTTP status is returned as a [`BackendResponse`].
    async fn query(&self, flux: &str) -> Result<BackendResponse>;
}

#[derive(Serialize)]
struct QueryBody<'a> {
    query: &'a str,
}

#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    endpoint: Url,
    token: String,
}

impl HttpBackend {
    pub fn new(config: &InfluxConfig) -> anyhow::Result<Self> {
        let mut builder = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(USER_AGENT);

        if let Some(path) = &config.ca_cert {
            let pem = std::fs::read(path)
                .with_context(|| format!("failed to read INFLUXDB_CA_CERT {}", path.display()))?;
            let cert = Certificate::from_pem(&pem).context("invalid INFLUXDB_CA_CERT bundle")?;
            builder = builder.add_root_certificate(cert);
        }

        let client = builder
            .build()
            .context("failed to build InfluxDB HTTP client")?;

        Ok(Self {
            client,
            endpoint: query_endpoint(&config.url, &config.org)?,
            token: config.token.clone(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl FluxBackend for HttpBackend {
    async fn query(&self, flux: &str) -> Result<BackendResponse> {
        debug!(url = %self.endpoint, query = flux, "querying InfluxDB");

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .header(ACCEPT, "text/csv")
            .json(&QueryBody { query: flux })
            .send()
            .await
            .map_err(|err| {
                error!(error = %err, url = %self.endpoint, "failed to query InfluxDB");
                ServiceError::BackendUnreachable(err)
            })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let body = response.bytes().await.map_err(|err| {
            error!(error = %err, "failed to read InfluxDB response body");
            ServiceError::BackendUnreachable(err)
        })?;

        Ok(BackendResponse {
            status,
            content_type,
            body,
        })
    }
}

/// `{base}/api/v2/query?org={org}`, keeping any path prefix and unrelated
/// query parameters already present on the base URL.
pub fn query_endpoint(base: &Url, org: &str) -> anyhow::Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| anyhow!("INFLUXDB_URL {base} cannot carry a path"))?
        .pop_if_empty()
        .extend(["api", "v2", "query"]);

    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "org")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(retained)
        .append_pair("org", org);

    Ok(url)
}

/// Classifies a backend answer and converts successful payloads.
pub fn normalize_response(query: &str, response: BackendResponse) -> Result<QueryResponse> {
    let BackendResponse {
        status,
        content_type,
        body,
    } = response;

    info!(
        status = status.as_u16(),
        content_type = %content_type,
        body_length = body.len(),
        "InfluxDB response received"
    );

    if status != StatusCode::OK {
        let body = String::from_utf8_lossy(&body).into_owned();
        error!(status = status.as_u16(), body = %body, query, "InfluxDB returned error");
        return Err(ServiceError::BackendError { status, body });
    }

    match ResponseFormat::detect(&content_type) {
        Some(ResponseFormat::AnnotatedCsv) => {
            let rows = annotated_csv::parse(&body).map_err(|err| {
                error!(
                    error = %err,
                    body = %String::from_utf8_lossy(&body),
                    "failed to parse CSV response"
                );
                ServiceError::Internal("failed to parse tabular response".to_string())
            })?;
            info!(record_count = rows.len(), "InfluxDB query succeeded");
            Ok(QueryResponse::from_rows(rows))
        }
        Some(ResponseFormat::Json) => {
            let envelope = envelope::parse(&body).map_err(|err| {
                error!(
                    error = %err,
                    body = %String::from_utf8_lossy(&body),
                    "failed to parse JSON response"
                );
                ServiceError::Internal("failed to parse JSON response".to_string())
            })?;
            let response = QueryResponse::from_envelope(envelope);
            info!(result_count = response.results.len(), "InfluxDB query succeeded");
            Ok(response)
        }
        None => {
            let preview = body_preview(&body);
            error!(
                content_type = %content_type,
                body_preview = %preview,
                "unexpected content type from InfluxDB"
            );
            Err(ServiceError::Internal(format!(
                "unexpected content type: {content_type} (body preview: {preview})"
            )))
        }
    }
}

fn body_preview(body: &[u8]) -> String {
    let end = body.len().min(BODY_PREVIEW_LIMIT);
    String::from_utf8_lossy(&body[..end]).into_owned()
}
