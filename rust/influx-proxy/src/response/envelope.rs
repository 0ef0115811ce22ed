//! JSON envelope returned by InfluxDB when it answers with `application/json`.

use serde::Deserialize;
use serde_json::value::RawValue;

#[derive(Debug, Default, Deserialize)]
pub struct Envelope {
    /// Elements are kept as raw JSON so they are forwarded byte for byte.
    #[serde(default)]
    pub results: Option<Vec<Box<RawValue>>>,
    #[serde(default)]
    pub error: Option<String>,
}

pub fn parse(body: &[u8]) -> serde_json::Result<Envelope> {
    serde_json::from_slice(body)
}
