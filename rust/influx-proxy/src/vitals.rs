//! Vital-sign anomaly judgement.
//!
//! For each sign the smoothed 12h series (`tma2m`) is reduced to a robust
//! baseline by averaging its central samples, then compared with the recent
//! 2 minute mean (`mean5m`). A sign deviating beyond its absolute or relative
//! limit counts as anomalous; an alert is raised once either sign has been
//! anomalous on `alert_threshold` consecutive evaluations of the same device.

use crate::{
    config::{Thresholds, VitalsConfig},
    error::Result,
    query::{QueryEngine, QueryMode, QueryRequest},
    response::{QueryResponse, Record},
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VitalSign {
    HeartRate,
    Respiration,
}

impl VitalSign {
    pub const ALL: [VitalSign; 2] = [VitalSign::HeartRate, VitalSign::Respiration];

    /// Field name the sign is stored under in InfluxDB.
    pub fn field(&self) -> &'static str {
        match self {
            VitalSign::HeartRate => "heart_rate_bpm",
            VitalSign::Respiration => "respiration_bpm",
        }
    }

    fn thresholds(&self, config: &VitalsConfig) -> Thresholds {
        match self {
            VitalSign::HeartRate => config.heart_rate,
            VitalSign::Respiration => config.respiration,
        }
    }
}

/// Mean of the `n` central values of the sorted input. Inputs no longer than
/// `n` are averaged whole; when the surplus is odd the window leans toward the
/// lower end.
pub fn middle_n_mean(values: &[f64], n: usize) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let n = n.max(1);
    let window = if sorted.len() <= n {
        &sorted[..]
    } else {
        let start = (sorted.len() - n) / 2;
        &sorted[start..start + n]
    };

    Some(window.iter().sum::<f64>() / window.len() as f64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Neither a recent mean nor any baseline sample.
    NoData,
    /// One side of the comparison is missing.
    Insufficient,
    Normal,
    Anomalous,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Deviation {
    pub abs_diff: f64,
    pub rel_diff: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assessment {
    pub verdict: Verdict,
    pub deviation: Option<Deviation>,
}

/// Compares a baseline with the recent mean. The relative deviation is taken
/// against the recent mean and is zero when that mean is zero.
pub fn assess(
    baseline: Option<f64>,
    recent: Option<f64>,
    sample_count: usize,
    limits: Thresholds,
) -> Assessment {
    if recent.is_none() && sample_count == 0 {
        return Assessment {
            verdict: Verdict::NoData,
            deviation: None,
        };
    }

    let (Some(baseline), Some(recent)) = (baseline, recent) else {
        return Assessment {
            verdict: Verdict::Insufficient,
            deviation: None,
        };
    };

    let abs_diff = (baseline - recent).abs();
    let rel_diff = if recent != 0.0 { abs_diff / recent } else { 0.0 };
    let verdict = if abs_diff > limits.abs || rel_diff > limits.rel {
        Verdict::Anomalous
    } else {
        Verdict::Normal
    };

    Assessment {
        verdict,
        deviation: Some(Deviation { abs_diff, rel_diff }),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeRequest {
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    /// No data for any sign; streaks are left untouched.
    Offline,
    Evaluated,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignReport {
    pub sign: VitalSign,
    pub field: &'static str,
    pub baseline: Option<f64>,
    pub recent: Option<f64>,
    pub sample_count: usize,
    pub verdict: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deviation: Option<Deviation>,
    /// Consecutive anomalous evaluations including this one.
    pub consecutive: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Judgement {
    pub bucket: String,
    pub device_id: String,
    pub status: DeviceStatus,
    pub signs: Vec<SignReport>,
    pub alert: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct Streak {
    heart_rate: u32,
    respiration: u32,
}

impl Streak {
    fn count_mut(&mut self, sign: VitalSign) -> &mut u32 {
        match sign {
            VitalSign::HeartRate => &mut self.heart_rate,
            VitalSign::Respiration => &mut self.respiration,
        }
    }
}

/// Runs judgements and keeps per-device anomaly streaks between them.
pub struct VitalsMonitor {
    engine: QueryEngine,
    config: VitalsConfig,
    streaks: Mutex<HashMap<(String, String), Streak>>,
}

impl VitalsMonitor {
    pub fn new(engine: QueryEngine, config: VitalsConfig) -> Self {
        Self {
            engine,
            config,
            streaks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn judge(&self, request: &JudgeRequest) -> Result<Judgement> {
        let mut bucket = String::new();
        let mut device_id = String::new();
        let mut signs = Vec::with_capacity(VitalSign::ALL.len());

        for sign in VitalSign::ALL {
            let query = |mode: QueryMode| QueryRequest {
                field: Some(sign.field().to_string()),
                mode: Some(mode.to_string()),
                bucket: request.bucket.clone(),
                device_id: request.device_id.clone(),
                query: None,
            };

            let series_query = self.engine.translate(&query(QueryMode::Tma2m))?;
            let recent_query = self.engine.translate(&query(QueryMode::Mean5m))?;
            bucket.clone_from(&series_query.bucket);
            device_id.clone_from(&series_query.device_id);

            let (series, recent) = tokio::try_join!(
                self.engine.execute_resolved(&series_query),
                self.engine.execute_resolved(&recent_query),
            )?;

            let series = sample_values(&series);
            let recent = sample_values(&recent).first().copied();
            let baseline = middle_n_mean(&series, self.config.middle_sample);
            let assessment = assess(baseline, recent, series.len(), sign.thresholds(&self.config));

            info!(
                device_id = %device_id,
                field = sign.field(),
                baseline = ?baseline,
                recent = ?recent,
                sample_count = series.len(),
                verdict = ?assessment.verdict,
                "vital sign assessed"
            );

            signs.push(SignReport {
                sign,
                field: sign.field(),
                baseline,
                recent,
                sample_count: series.len(),
                verdict: assessment.verdict,
                deviation: assessment.deviation,
                consecutive: 0,
            });
        }

        if signs.iter().all(|s| s.verdict == Verdict::NoData) {
            warn!(device_id = %device_id, "no recent vital data, device treated as offline");
            return Ok(Judgement {
                bucket,
                device_id,
                status: DeviceStatus::Offline,
                signs,
                alert: false,
            });
        }

        let alert = self.record_streaks(&bucket, &device_id, &mut signs);

        Ok(Judgement {
            bucket,
            device_id,
            status: DeviceStatus::Evaluated,
            signs,
            alert,
        })
    }

    /// Extends or resets each sign's streak and clears both once an alert fires.
    fn record_streaks(&self, bucket: &str, device_id: &str, signs: &mut [SignReport]) -> bool {
        let mut streaks = self.streaks.lock();
        let streak = streaks
            .entry((bucket.to_string(), device_id.to_string()))
            .or_default();

        for report in signs.iter_mut() {
            let count = streak.count_mut(report.sign);
            *count = if report.verdict == Verdict::Anomalous {
                count.saturating_add(1)
            } else {
                0
            };
            report.consecutive = *count;

            if let (Verdict::Anomalous, Some(deviation)) = (report.verdict, report.deviation) {
                warn!(
                    device_id,
                    field = report.field,
                    baseline = ?report.baseline,
                    recent = ?report.recent,
                    abs_diff = deviation.abs_diff,
                    rel_diff = deviation.rel_diff,
                    "vital sign anomaly"
                );
            }
        }

        let threshold = self.config.alert_threshold;
        let alert = streak.heart_rate >= threshold || streak.respiration >= threshold;
        if alert {
            warn!(
                device_id,
                heart_rate = streak.heart_rate,
                respiration = streak.respiration,
                "ALERT: consecutive vital sign anomalies"
            );
            *streak = Streak::default();
        }

        alert
    }
}

/// Finite `_value` numbers of every record, in response order.
fn sample_values(response: &QueryResponse) -> Vec<f64> {
    response
        .results
        .iter()
        .filter_map(record_value)
        .filter(|v| v.is_finite())
        .collect()
}

fn record_value(record: &Record) -> Option<f64> {
    match record {
        Record::Row(row) => row.get("_value")?.trim().parse().ok(),
        Record::Raw(raw) => serde_json::from_str::<serde_json::Value>(raw.get())
            .ok()?
            .get("_value")?
            .as_f64(),
    }
}
