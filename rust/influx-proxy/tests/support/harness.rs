use axum::{
    body::{self, Body, Bytes},
    extract::State,
    http::{self, HeaderMap, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use influx_proxy::{
    config::{AppConfig, InfluxConfig, VitalsConfig},
    server::Server,
};
use reqwest::Url;
use serde_json::Value;
use std::{
    future::Future,
    net::SocketAddr,
    sync::{Arc, Mutex, Once},
    time::Duration,
};
use tokio::{net::TcpListener, task::JoinHandle};
use tower::ServiceExt;

pub const API_KEY: &str = "test-api-key";
pub const TOKEN: &str = "test-token";
pub const ORG: &str = "test-org";
pub const DEFAULT_BUCKET: &str = "vitals_data";
pub const DEFAULT_DEVICE: &str = "84F7035346E0";

static TRACING_INIT: Once = Once::new();

/// What the fake InfluxDB answers with.
#[derive(Debug, Clone)]
pub struct Canned {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub body: Vec<u8>,
    pub delay: Option<Duration>,
}

impl Canned {
    pub fn new(status: u16, content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: StatusCode::from_u16(status).expect("valid status"),
            content_type,
            body: body.into(),
            delay: None,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// A request as seen by the fake InfluxDB.
#[derive(Debug, Clone)]
pub struct Captured {
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Value,
}

#[derive(Clone)]
struct FakeState {
    canned: Canned,
    captured: Arc<Mutex<Vec<Captured>>>,
}

async fn fake_query(
    State(state): State<FakeState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.captured.lock().expect("capture lock").push(Captured {
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers,
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    });

    if let Some(delay) = state.canned.delay {
        tokio::time::sleep(delay).await;
    }

    (
        state.canned.status,
        [(http::header::CONTENT_TYPE, state.canned.content_type)],
        state.canned.body.clone(),
    )
        .into_response()
}

pub struct FakeInflux {
    addr: SocketAddr,
    captured: Arc<Mutex<Vec<Captured>>>,
    task: JoinHandle<()>,
}

impl FakeInflux {
    pub async fn start(canned: Canned) -> Self {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/api/v2/query", post(fake_query))
            .with_state(FakeState {
                canned,
                captured: Arc::clone(&captured),
            });

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake influx");
        let addr = listener.local_addr().expect("fake influx addr");
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            addr,
            captured,
            task,
        }
    }

    pub fn url(&self) -> Url {
        Url::parse(&format!("http://{}", self.addr)).expect("fake influx url")
    }

    pub fn requests(&self) -> Vec<Captured> {
        self.captured.lock().expect("capture lock").clone()
    }
}

impl Drop for FakeInflux {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn test_config(url: Url, api_key: Option<&str>, timeout: Duration) -> AppConfig {
    AppConfig {
        listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        api_key: api_key.map(str::to_string),
        influx: InfluxConfig {
            url,
            token: TOKEN.to_string(),
            org: ORG.to_string(),
            default_bucket: DEFAULT_BUCKET.to_string(),
            default_device_id: DEFAULT_DEVICE.to_string(),
            ca_cert: None,
            request_timeout: timeout,
        },
        vitals: VitalsConfig::default(),
    }
}

/// Runs a test closure against a proxy wired to a fake InfluxDB answering with `canned`.
pub async fn with_proxy_harness<F, Fut>(canned: Canned, test: F)
where
    F: FnOnce(ProxyHarness) -> Fut,
    Fut: Future<Output = ()>,
{
    let backend = FakeInflux::start(canned).await;
    let config = test_config(backend.url(), Some(API_KEY), Duration::from_secs(5));
    test(ProxyHarness::new(config, Some(backend))).await;
}

pub struct ProxyHarness {
    router: Router,
    api_key: String,
    backend: Option<FakeInflux>,
}

impl ProxyHarness {
    pub fn new(config: AppConfig, backend: Option<FakeInflux>) -> Self {
        TRACING_INIT.call_once(|| {
            let _ = tracing_subscriber::fmt::try_init();
        });

        let server = Server::new(config).expect("failed to build proxy server");
        Self {
            router: server.router(),
            api_key: API_KEY.to_string(),
            backend,
        }
    }

    pub fn backend_requests(&self) -> Vec<Captured> {
        self.backend
            .as_ref()
            .map(FakeInflux::requests)
            .unwrap_or_default()
    }

    pub async fn query(&self, payload: Value) -> (StatusCode, Value) {
        self.post_json("/api/influxdb/query", payload.to_string(), true).await
    }

    #[allow(dead_code)]
    pub async fn query_without_api_key(&self, payload: Value) -> (StatusCode, Value) {
        self.post_json("/api/influxdb/query", payload.to_string(), false).await
    }

    #[allow(dead_code)]
    pub async fn translate(&self, payload: Value) -> (StatusCode, Value) {
        self.post_json("/api/influxdb/translate", payload.to_string(), true).await
    }

    #[allow(dead_code)]
    pub async fn judge(&self, payload: Value) -> (StatusCode, Value) {
        self.post_json("/api/influxdb/judge", payload.to_string(), true).await
    }

    /// Sends `raw` as-is so malformed bodies can be exercised.
    pub async fn post_json(
        &self,
        path: &str,
        raw: String,
        include_api_key: bool,
    ) -> (StatusCode, Value) {
        read_json(self.post(path, raw, include_api_key).await).await
    }

    pub async fn post(&self, path: &str, raw: String, include_api_key: bool) -> Response {
        let mut builder = Request::builder()
            .method("POST")
            .uri(path)
            .header(http::header::CONTENT_TYPE, "application/json");

        if include_api_key {
            builder = builder.header("x-api-key", &self.api_key);
        }

        let request = builder
            .body(Body::from(raw))
            .expect("failed to build harness request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router should handle harness request")
    }

    #[allow(dead_code)]
    pub async fn get(&self, path: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .expect("failed to build harness request");
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router should handle harness request");
        read_json(response).await
    }
}

pub async fn read_raw(response: http::Response<Body>) -> (StatusCode, Bytes) {
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("response body should be readable");
    (status, bytes)
}

pub async fn read_json(response: http::Response<Body>) -> (StatusCode, Value) {
    let (status, bytes) = read_raw(response).await;
    let value =
        serde_json::from_slice::<Value>(&bytes).expect("response body should be valid JSON");
    (status, value)
}
