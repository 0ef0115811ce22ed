//! Flux templates for the semantic query modes.
//!
//! Each template is a pure function of `(bucket, device_id, field)`. Values are
//! substituted into Flux string literals through a [`LiteralEncoder`]; the
//! default [`Verbatim`] encoder inserts them unchanged, so callers that pass
//! user-controlled values must accept that a `"` can terminate the literal.

use super::QueryMode;
use std::borrow::Cow;

/// Encodes a value before it is placed between the quotes of a Flux string literal.
pub trait LiteralEncoder {
    fn encode<'a>(&self, raw: &'a str) -> Cow<'a, str>;
}

/// Inserts values as-is.
#[derive(Debug, Default, Clone, Copy)]
pub struct Verbatim;

impl LiteralEncoder for Verbatim {
    fn encode<'a>(&self, raw: &'a str) -> Cow<'a, str> {
        Cow::Borrowed(raw)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TemplateParams<'a> {
    pub bucket: &'a str,
    pub device_id: &'a str,
    pub field: &'a str,
}

pub fn expand(mode: QueryMode, params: TemplateParams<'_>) -> String {
    expand_with(&Verbatim, mode, params)
}

pub fn expand_with<E: LiteralEncoder + ?Sized>(
    encoder: &E,
    mode: QueryMode,
    params: TemplateParams<'_>,
) -> String {
    let bucket = encoder.encode(params.bucket);
    let device_id = encoder.encode(params.device_id);
    let field = encoder.encode(params.field);

    match mode {
        QueryMode::Tma2m => timed_moving_average(&bucket, &device_id, &field),
        QueryMode::Mean5m => recent_mean(&bucket, &device_id, &field),
    }
}

/// Last 12h, zero samples dropped, 10m time-weighted window every 5m. The
/// trailing zero filter removes window-edge artifacts.
fn timed_moving_average(bucket: &str, device_id: &str, field: &str) -> String {
    format!(
        r#"from(bucket: "{bucket}")
  |> range(start: -12h)
  |> filter(fn: (r) => r["device_id"] == "{device_id}")
  |> filter(fn: (r) => r["_field"] == "{field}")
  |> filter(fn: (r) => r._value != 0)
  |> timedMovingAverage(every: 5m, period: 10m)
  |> filter(fn: (r) => r._value != 0)"#
    )
}

/// Mean of the non-zero samples from the last 2 minutes.
fn recent_mean(bucket: &str, device_id: &str, field: &str) -> String {
    format!(
        r#"from(bucket: "{bucket}")
  |> range(start: -2m)
  |> filter(fn: (r) => r["device_id"] == "{device_id}")
  |> filter(fn: (r) => r["_field"] == "{field}")
  |> filter(fn: (r) => r._value != 0)
  |> mean()"#
    )
}
