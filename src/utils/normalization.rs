//! Normalization Utilities
//!
//! Converts raw metric scores to percentiles using Köppen climate tier-stratified
//! calibration parameters, and raw CSR scores to percentiles using the global
//! (tier-independent) CSR table.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{ScoringError, ScoringResult};
use crate::metrics::Metric;
use crate::types::{ClimateZone, CsrStrategy};

/// Canonical percentiles of the 13 metric breakpoints
pub const PERCENTILES: [f64; 13] = [
    1.0, 5.0, 10.0, 20.0, 30.0, 40.0, 50.0,
    60.0, 70.0, 80.0, 90.0, 95.0, 99.0,
];

/// Canonical percentiles of the 15 CSR breakpoints
pub const CSR_PERCENTILES: [f64; 15] = [
    1.0, 5.0, 10.0, 20.0, 30.0, 40.0, 50.0, 60.0,
    70.0, 75.0, 80.0, 85.0, 90.0, 95.0, 99.0,
];

/// Percentile values for a single metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentileParams {
    pub p1: f64,
    pub p5: f64,
    pub p10: f64,
    pub p20: f64,
    pub p30: f64,
    pub p40: f64,
    pub p50: f64,
    pub p60: f64,
    pub p70: f64,
    pub p80: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

impl PercentileParams {
    pub fn values(&self) -> [f64; 13] {
        [
            self.p1, self.p5, self.p10, self.p20, self.p30,
            self.p40, self.p50, self.p60, self.p70, self.p80,
            self.p90, self.p95, self.p99,
        ]
    }

    pub fn from_values(v: [f64; 13]) -> Self {
        PercentileParams {
            p1: v[0], p5: v[1], p10: v[2], p20: v[3], p30: v[4],
            p40: v[5], p50: v[6], p60: v[7], p70: v[8], p80: v[9],
            p90: v[10], p95: v[11], p99: v[12],
        }
    }
}

/// Calibration parameters for every climate zone and metric
///
/// JSON layout: `{ "<zone>": { "<metric>": { "p1": .., "p99": .. } } }`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationTable {
    #[serde(flatten)]
    zones: BTreeMap<String, BTreeMap<String, PercentileParams>>,
}

impl CalibrationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load calibration from JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read calibration file: {:?}", path))?;

        let table: CalibrationTable = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse calibration JSON: {:?}", path))?;

        tracing::info!(zones = table.zones.len(), "loaded calibration from {:?}", path);
        Ok(table)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize calibration")?;
        fs::write(path, json).with_context(|| format!("Failed to write calibration file: {:?}", path))
    }

    pub fn insert(&mut self, zone: ClimateZone, metric: Metric, params: PercentileParams) {
        self.zones
            .entry(zone.as_str().to_string())
            .or_default()
            .insert(metric.key().to_string(), params);
    }

    /// Zones present in the table
    pub fn zones(&self) -> Vec<ClimateZone> {
        self.zones.keys().filter_map(|k| ClimateZone::parse(k)).collect()
    }

    pub fn has_zone(&self, zone: ClimateZone) -> bool {
        self.zones.contains_key(zone.as_str())
    }

    /// Breakpoints for a metric, accepting the legacy metric keys
    pub fn get(&self, zone: ClimateZone, metric: Metric) -> ScoringResult<&PercentileParams> {
        let tier = self.zones.get(zone.as_str()).ok_or_else(|| ScoringError::Config {
            metric: metric.key(),
            zone: zone.as_str().to_string(),
            key: metric.key().to_string(),
            reason: "climate zone not present in calibration".to_string(),
        })?;

        std::iter::once(metric.key())
            .chain(metric.legacy_keys().iter().copied())
            .find_map(|key| tier.get(key))
            .ok_or_else(|| ScoringError::Config {
                metric: metric.key(),
                zone: zone.as_str().to_string(),
                key: metric.key().to_string(),
                reason: "no calibration params for metric".to_string(),
            })
    }

    /// Percentile of a raw value against this zone's breakpoints
    ///
    /// `raw <= p1` gives 0 and `raw >= p99` gives 100. `invert` returns
    /// `100 - percentile`.
    pub fn percentile(
        &self,
        raw_value: f64,
        metric: Metric,
        zone: ClimateZone,
        invert: bool,
    ) -> ScoringResult<f64> {
        let params = self.get(zone, metric)?;
        let percentile = interpolate(raw_value, &params.values(), &PERCENTILES);
        Ok(if invert { 100.0 - percentile } else { percentile })
    }
}

/// Piecewise-linear percentile over sorted breakpoints
///
/// Finds the first bracket `values[i] <= raw <= values[i+1]` and interpolates;
/// a zero-width bracket yields its lower percentile.
fn interpolate(raw_value: f64, values: &[f64], percentiles: &[f64]) -> f64 {
    let last = values.len() - 1;

    // Edge cases
    if raw_value <= values[0] {
        return 0.0;
    }
    if raw_value >= values[last] {
        return 100.0;
    }

    // Linear interpolation
    for i in 0..last {
        if values[i] <= raw_value && raw_value <= values[i + 1] {
            let fraction = if values[i + 1] - values[i] > 0.0 {
                (raw_value - values[i]) / (values[i + 1] - values[i])
            } else {
                0.0
            };

            return percentiles[i] + fraction * (percentiles[i + 1] - percentiles[i]);
        }
    }

    // Only reachable with unsorted breakpoints or NaN input
    50.0
}

/// Percentile values for CSR strategies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsrPercentileParams {
    pub p1: f64,
    pub p5: f64,
    pub p10: f64,
    pub p20: f64,
    pub p30: f64,
    pub p40: f64,
    pub p50: f64,
    pub p60: f64,
    pub p70: f64,
    pub p75: f64,
    pub p80: f64,
    pub p85: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

impl CsrPercentileParams {
    pub fn values(&self) -> [f64; 15] {
        [
            self.p1, self.p5, self.p10, self.p20, self.p30,
            self.p40, self.p50, self.p60, self.p70, self.p75,
            self.p80, self.p85, self.p90, self.p95, self.p99,
        ]
    }

    pub fn from_values(v: [f64; 15]) -> Self {
        CsrPercentileParams {
            p1: v[0], p5: v[1], p10: v[2], p20: v[3], p30: v[4],
            p40: v[5], p50: v[6], p60: v[7], p70: v[8], p75: v[9],
            p80: v[10], p85: v[11], p90: v[12], p95: v[13], p99: v[14],
        }
    }
}

/// CSR Calibration parameters (global, not tier-specific)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsrCalibration {
    pub c: CsrPercentileParams,
    pub s: CsrPercentileParams,
    pub r: CsrPercentileParams,
}

impl CsrCalibration {
    /// Load CSR calibration from JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read CSR calibration file: {:?}", path))?;

        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse CSR calibration JSON: {:?}", path))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize CSR calibration")?;
        fs::write(path, json).with_context(|| format!("Failed to write CSR calibration file: {:?}", path))
    }

    pub fn params(&self, strategy: CsrStrategy) -> &CsrPercentileParams {
        match strategy {
            CsrStrategy::Competitor => &self.c,
            CsrStrategy::StressTolerator => &self.s,
            CsrStrategy::Ruderal => &self.r,
        }
    }
}

/// Convert raw CSR score to percentile using global calibration
///
/// Without calibration, fixed thresholds apply: C and S score 100 at raw >= 60
/// and R at raw >= 50, otherwise 50.
pub fn csr_percentile(
    raw_value: f64,
    strategy: CsrStrategy,
    csr_calibration: Option<&CsrCalibration>,
) -> f64 {
    let Some(csr_cal) = csr_calibration else {
        let threshold = match strategy {
            CsrStrategy::Competitor | CsrStrategy::StressTolerator => 60.0,
            CsrStrategy::Ruderal => 50.0,
        };
        return if raw_value >= threshold { 100.0 } else { 50.0 };
    };

    interpolate(raw_value, &csr_cal.params(strategy).values(), &CSR_PERCENTILES)
}
