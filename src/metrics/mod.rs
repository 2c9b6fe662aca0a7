//! Metric modules for guild scoring
//!
//! Each metric lives in its own module and computes a raw value plus a detail
//! payload from a guild slice. Percentile normalization and display
//! inversion happen in the scorer so the calibration path can reuse the
//! same code.

pub mod m1_pest_pathogen_indep;
pub mod m2_growth_compatibility;
pub mod m3_insect_control;
pub mod m4_disease_control;
pub mod m5_beneficial_fungi;
pub mod m6_structural_diversity;
pub mod m7_pollinator_support;

pub use m1_pest_pathogen_indep::{calculate_m1, M1Result};
pub use m2_growth_compatibility::{calculate_m2, Conflict, ConflictKind, M2Result, PlantCsrData};
pub use m3_insect_control::{calculate_m3, M3Result};
pub use m4_disease_control::{calculate_m4, M4Result};
pub use m5_beneficial_fungi::{calculate_m5, M5Result};
pub use m6_structural_diversity::{calculate_m6, GrowthFormGroup, M6Result, PlantHeight};
pub use m7_pollinator_support::{calculate_m7, pollinator_weight, M7Result};

use serde::{Deserialize, Serialize};
use std::fmt;

/// The seven guild metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    M1,
    M2,
    M3,
    M4,
    M5,
    M6,
    M7,
}

impl Metric {
    pub const ALL: [Metric; 7] = [
        Metric::M1,
        Metric::M2,
        Metric::M3,
        Metric::M4,
        Metric::M5,
        Metric::M6,
        Metric::M7,
    ];

    /// Calibration key
    pub const fn key(self) -> &'static str {
        match self {
            Metric::M1 => "m1",
            Metric::M2 => "m2",
            Metric::M3 => "m3",
            Metric::M4 => "m4",
            Metric::M5 => "m5",
            Metric::M6 => "m6",
            Metric::M7 => "m7",
        }
    }

    /// Keys older calibration files used for the same metric
    pub const fn legacy_keys(self) -> &'static [&'static str] {
        match self {
            Metric::M1 => &[],
            Metric::M2 => &["n4", "growth_compat"],
            Metric::M3 => &["p1"],
            Metric::M4 => &["p2"],
            Metric::M5 => &["p3"],
            Metric::M6 => &["p5"],
            Metric::M7 => &["p6"],
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Metric::M1 => "Pest & Pathogen Independence",
            Metric::M2 => "Growth Compatibility",
            Metric::M3 => "Insect Pest Control",
            Metric::M4 => "Disease Suppression",
            Metric::M5 => "Beneficial Fungi Networks",
            Metric::M6 => "Structural Diversity",
            Metric::M7 => "Pollinator Support",
        }
    }

    /// M1 and M2 measure risk, so their display score is `100 - percentile`
    pub const fn inverted_display(self) -> bool {
        matches!(self, Metric::M1 | Metric::M2)
    }

    pub const fn index(self) -> usize {
        self as usize
    }

    /// Plant fields the metric cannot run without
    pub const fn required_fields(self) -> &'static [&'static str] {
        match self {
            Metric::M2 => m2_growth_compatibility::REQUIRED_FIELDS,
            _ => &[],
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Per-metric breakdown returned alongside the scores
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "metric", rename_all = "lowercase")]
pub enum MetricDetails {
    M1(M1Result),
    M2(M2Result),
    M3(M3Result),
    M4(M4Result),
    M5(M5Result),
    M6(M6Result),
    M7(M7Result),
}

impl MetricDetails {
    pub fn metric(&self) -> Metric {
        match self {
            MetricDetails::M1(_) => Metric::M1,
            MetricDetails::M2(_) => Metric::M2,
            MetricDetails::M3(_) => Metric::M3,
            MetricDetails::M4(_) => Metric::M4,
            MetricDetails::M5(_) => Metric::M5,
            MetricDetails::M6(_) => Metric::M6,
            MetricDetails::M7(_) => Metric::M7,
        }
    }

    /// Raw value that gets percentile-normalized
    pub fn raw(&self) -> f64 {
        match self {
            MetricDetails::M1(r) => r.raw,
            MetricDetails::M2(r) => r.raw,
            MetricDetails::M3(r) => r.raw,
            MetricDetails::M4(r) => r.raw,
            MetricDetails::M5(r) => r.raw,
            MetricDetails::M6(r) => r.raw,
            MetricDetails::M7(r) => r.raw,
        }
    }
}

/// Raw scores for all 7 metrics (unnormalized) - for calibration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawScores {
    pub m1_faiths_pd: f64,
    pub m1_pest_risk: f64,
    pub m2_conflict_density: f64,
    pub m3_biocontrol_raw: f64,
    pub m4_pathogen_control_raw: f64,
    pub m5_beneficial_fungi_raw: f64,
    pub m6_stratification_raw: f64,
    pub m7_pollinator_raw: f64,
}

impl RawScores {
    /// Collect raw values from the seven detail payloads (any order)
    pub fn from_details(details: &[MetricDetails]) -> Self {
        let mut scores = RawScores {
            m1_faiths_pd: 0.0,
            m1_pest_risk: 0.0,
            m2_conflict_density: 0.0,
            m3_biocontrol_raw: 0.0,
            m4_pathogen_control_raw: 0.0,
            m5_beneficial_fungi_raw: 0.0,
            m6_stratification_raw: 0.0,
            m7_pollinator_raw: 0.0,
        };
        for detail in details {
            match detail {
                MetricDetails::M1(r) => {
                    scores.m1_faiths_pd = r.faiths_pd;
                    scores.m1_pest_risk = r.raw;
                }
                MetricDetails::M2(r) => scores.m2_conflict_density = r.raw,
                MetricDetails::M3(r) => scores.m3_biocontrol_raw = r.raw,
                MetricDetails::M4(r) => scores.m4_pathogen_control_raw = r.raw,
                MetricDetails::M5(r) => scores.m5_beneficial_fungi_raw = r.raw,
                MetricDetails::M6(r) => scores.m6_stratification_raw = r.raw,
                MetricDetails::M7(r) => scores.m7_pollinator_raw = r.raw,
            }
        }
        scores
    }

    /// Value that is percentile-normalized for a metric
    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::M1 => self.m1_pest_risk,
            Metric::M2 => self.m2_conflict_density,
            Metric::M3 => self.m3_biocontrol_raw,
            Metric::M4 => self.m4_pathogen_control_raw,
            Metric::M5 => self.m5_beneficial_fungi_raw,
            Metric::M6 => self.m6_stratification_raw,
            Metric::M7 => self.m7_pollinator_raw,
        }
    }

    pub fn values(&self) -> [f64; 7] {
        Metric::ALL.map(|metric| self.get(metric))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_keys_and_order() {
        let keys: Vec<&str> = Metric::ALL.iter().map(|m| m.key()).collect();
        assert_eq!(keys, vec!["m1", "m2", "m3", "m4", "m5", "m6", "m7"]);
        for (i, metric) in Metric::ALL.iter().enumerate() {
            assert_eq!(metric.index(), i);
        }
        assert!(Metric::M1.inverted_display());
        assert!(Metric::M2.inverted_display());
        assert!(!Metric::M7.inverted_display());
        assert_eq!(Metric::M2.required_fields(), &["CSR_C", "CSR_S", "CSR_R"]);
    }
}
