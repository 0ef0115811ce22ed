use anyhow::{bail, Context, Result};
use reqwest::Url;
use serde::Deserialize;
use std::{
    net::{SocketAddr, ToSocketAddrs},
    path::PathBuf,
    time::Duration,
};

const DEFAULT_INFLUX_URL: &str = "http://localhost:8086";
const DEFAULT_ORG: &str = "ld6002h";
const DEFAULT_BUCKET: &str = "vitals_data";
const DEFAULT_DEVICE_ID: &str = "84F7035346E0";
const DEFAULT_MIDDLE_SAMPLE: usize = 10;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub api_key: Option<String>,
    pub influx: InfluxConfig,
    pub vitals: VitalsConfig,
}

/// Connection details and query defaults for the InfluxDB backend.
#[derive(Debug, Clone)]
pub struct InfluxConfig {
    pub url: Url,
    pub token: String,
    pub org: String,
    pub default_bucket: String,
    pub default_device_id: String,
    pub ca_cert: Option<PathBuf>,
    pub request_timeout: Duration,
}

/// Absolute and relative deviation limits for one vital sign.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub abs: f64,
    pub rel: f64,
}

/// Settings for comparing the smoothed 12h baseline with the recent mean.
#[derive(Debug, Clone, PartialEq)]
pub struct VitalsConfig {
    pub heart_rate: Thresholds,
    pub respiration: Thresholds,
    /// Consecutive anomalous evaluations that raise an alert.
    pub alert_threshold: u32,
    /// Number of central samples averaged from the sorted baseline series.
    pub middle_sample: usize,
}

impl Default for VitalsConfig {
    fn default() -> Self {
        Self {
            heart_rate: Thresholds {
                abs: default_hr_abs(),
                rel: default_hr_rel(),
            },
            respiration: Thresholds {
                abs: default_rr_abs(),
                rel: default_rr_rel(),
            },
            alert_threshold: default_alert_threshold(),
            middle_sample: DEFAULT_MIDDLE_SAMPLE,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    influxdb_url: Option<String>,
    #[serde(default)]
    influxdb_token: Option<String>,
    #[serde(default)]
    influxdb_org: Option<String>,
    #[serde(default)]
    influxdb_bucket: Option<String>,
    #[serde(default)]
    device_id: Option<String>,
    #[serde(default)]
    influxdb_ca_cert: Option<String>,
    #[serde(default)]
    proxy_listen_addr: Option<String>,
    #[serde(default)]
    proxy_listen_host: Option<String>,
    #[serde(default)]
    proxy_listen_port: Option<u16>,
    #[serde(default)]
    proxy_api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    proxy_request_timeout_secs: u64,
    #[serde(default = "default_hr_abs")]
    hr_abs: f64,
    #[serde(default = "default_hr_rel")]
    hr_rel: f64,
    #[serde(default = "default_rr_abs")]
    rr_abs: f64,
    #[serde(default = "default_rr_rel")]
    rr_rel: f64,
    #[serde(default = "default_alert_threshold")]
    alert_threshold: u32,
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_hr_abs() -> f64 {
    20.0
}

const fn default_hr_rel() -> f64 {
    0.30
}

const fn default_rr_abs() -> f64 {
    5.0
}

const fn default_rr_rel() -> f64 {
    0.35
}

const fn default_alert_threshold() -> u32 {
    3
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Builds the configuration from an explicit set of `KEY=value` pairs.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let raw: RawConfig = envy::from_iter(vars)
            .context("failed to parse INFLUXDB_* / PROXY_* environment variables")?;

        let listen_addr = resolve_addr(
            non_blank(raw.proxy_listen_addr),
            non_blank(raw.proxy_listen_host),
            raw.proxy_listen_port,
        )?;

        let url = non_blank(raw.influxdb_url).unwrap_or_else(|| DEFAULT_INFLUX_URL.to_string());
        let url = Url::parse(&url).context("invalid INFLUXDB_URL value")?;

        let token = non_blank(raw.influxdb_token).context("INFLUXDB_TOKEN must be set")?;

        for (name, value) in [
            ("HR_ABS", raw.hr_abs),
            ("HR_REL", raw.hr_rel),
            ("RR_ABS", raw.rr_abs),
            ("RR_REL", raw.rr_rel),
        ] {
            if !value.is_finite() || value < 0.0 {
                bail!("{name} must be a non-negative number, got {value}");
            }
        }

        Ok(Self {
            listen_addr,
            api_key: non_blank(raw.proxy_api_key),
            influx: InfluxConfig {
                url,
                token,
                org: non_blank(raw.influxdb_org).unwrap_or_else(|| DEFAULT_ORG.to_string()),
                default_bucket: non_blank(raw.influxdb_bucket)
                    .unwrap_or_else(|| DEFAULT_BUCKET.to_string()),
                default_device_id: non_blank(raw.device_id)
                    .unwrap_or_else(|| DEFAULT_DEVICE_ID.to_string()),
                ca_cert: non_blank(raw.influxdb_ca_cert).map(PathBuf::from),
                request_timeout: Duration::from_secs(raw.proxy_request_timeout_secs.max(1)),
            },
            vitals: VitalsConfig {
                heart_rate: Thresholds {
                    abs: raw.hr_abs,
                    rel: raw.hr_rel,
                },
                respiration: Thresholds {
                    abs: raw.rr_abs,
                    rel: raw.rr_rel,
                },
                alert_threshold: raw.alert_threshold.max(1),
                middle_sample: DEFAULT_MIDDLE_SAMPLE,
            },
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn resolve_addr(
    addr: Option<String>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<SocketAddr> {
    if let Some(addr) = addr {
        return addr
            .to_socket_addrs()
            .context("invalid PROXY_LISTEN_ADDR value")?
            .next()
            .context("PROXY_LISTEN_ADDR resolved to no addresses");
    }

    let host = host.unwrap_or_else(|| "0.0.0.0".to_string());
    let port = port.unwrap_or(8490);
    let combined = format!("{}:{}", host, port);
    combined
        .to_socket_addrs()
        .context("invalid proxy listen host/port combination")?
        .next()
        .context("listen address resolved to no targets")
}
