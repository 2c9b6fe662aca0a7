//! METRIC 2: GROWTH COMPATIBILITY (CSR CONFLICTS)
//!
//! Scores ecological compatibility based on Grime's CSR strategy conflicts.
//! Detects 4 types of conflicts (C-C, C-S, C-R, R-R) with context-specific
//! modulation based on growth form, height, and light preference.
//!
//! **Fields needed**:
//!   1. CSR_C / CSR_S / CSR_R - strategy scores (required, never defaulted)
//!   2. height_m              - vertical niche analysis (default 1.0 m)
//!   3. try_growth_form       - vine/tree complementarity (default empty)
//!   4. light_pref            - EIVE-L for C-S conflicts (default 5.0)

use serde::Serialize;

use crate::error::{ScoringError, ScoringResult};
use crate::metrics::Metric;
use crate::types::{fields, CsrStrategy, GuildMember};
use crate::utils::{csr_percentile, CsrCalibration};

const PERCENTILE_THRESHOLD: f64 = 75.0; // Top quartile

const DEFAULT_HEIGHT_M: f64 = 1.0;
const DEFAULT_LIGHT: f64 = 5.0;

/// Fields M2 cannot run without
pub const REQUIRED_FIELDS: &[&str] = &[fields::CSR_C, fields::CSR_S, fields::CSR_R];

/// Per-plant CSR data for detailed breakdown
#[derive(Debug, Clone, Serialize)]
pub struct PlantCsrData {
    pub plant_id: String,
    pub plant_name: String,
    pub c_raw: f64,
    pub s_raw: f64,
    pub r_raw: f64,
    pub c_percentile: f64,
    pub s_percentile: f64,
    pub r_percentile: f64,
    pub dominant_strategy: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConflictKind {
    #[serde(rename = "C-C")]
    CompetitorCompetitor,
    #[serde(rename = "C-S")]
    CompetitorStress,
    #[serde(rename = "C-R")]
    CompetitorRuderal,
    #[serde(rename = "R-R")]
    RuderalRuderal,
}

/// One scored pairing
#[derive(Debug, Clone, Serialize)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub plant_a: String,
    pub plant_b: String,
    pub severity: f64,
}

impl Conflict {
    fn new(kind: ConflictKind, a: &PlantRow, b: &PlantRow, severity: f64) -> Self {
        Conflict {
            kind,
            plant_a: a.id.to_string(),
            plant_b: b.id.to_string(),
            severity,
        }
    }
}

/// Result of M2 calculation
#[derive(Debug, Clone, Serialize)]
pub struct M2Result {
    /// Conflict density (conflicts per possible pair)
    pub raw: f64,
    pub high_c_count: usize,
    pub high_s_count: usize,
    pub high_r_count: usize,
    /// Total raw conflicts before density normalization
    pub total_conflicts: f64,
    pub plant_csr_data: Vec<PlantCsrData>,
    pub conflicts: Vec<Conflict>,
}

/// Plant data for conflict detection
#[derive(Debug, Clone)]
struct PlantRow<'a> {
    index: usize,
    id: &'a str,
    c_percentile: f64,
    s_percentile: f64,
    r_percentile: f64,
    height_m: f64,
    growth_form: &'a str,
    light_pref: f64,
}

impl PlantRow<'_> {
    fn is_climber(&self) -> bool {
        self.growth_form.contains("vine") || self.growth_form.contains("liana")
    }

    fn is_tree(&self) -> bool {
        self.growth_form.contains("tree")
    }
}

/// Calculate M2: Growth Compatibility (CSR Conflicts)
///
/// C-C and R-R pairs are counted once per unordered pair; C-S and C-R once
/// per (C plant, S/R plant) pairing of distinct members.
pub fn calculate_m2(
    members: &[GuildMember],
    csr_calibration: Option<&CsrCalibration>,
) -> ScoringResult<M2Result> {
    let n_plants = members.len();
    let (plants, plant_csr_data) = extract_plant_data(members, csr_calibration)?;

    // Classify plants
    let high_c: Vec<&PlantRow> = plants.iter()
        .filter(|p| p.c_percentile > PERCENTILE_THRESHOLD)
        .collect();
    let high_s: Vec<&PlantRow> = plants.iter()
        .filter(|p| p.s_percentile > PERCENTILE_THRESHOLD)
        .collect();
    let high_r: Vec<&PlantRow> = plants.iter()
        .filter(|p| p.r_percentile > PERCENTILE_THRESHOLD)
        .collect();

    let mut conflicts = Vec::new();

    // CONFLICT TYPE 1: C-C (Competitive vs Competitive)
    for (i, plant_a) in high_c.iter().enumerate() {
        for plant_b in &high_c[i + 1..] {
            let severity = calculate_c_c_conflict(plant_a, plant_b);
            conflicts.push(Conflict::new(ConflictKind::CompetitorCompetitor, plant_a, plant_b, severity));
        }
    }

    // CONFLICT TYPE 2: C-S (Competitive vs Stress-Tolerant)
    for plant_c in &high_c {
        for plant_s in &high_s {
            if plant_c.index != plant_s.index {
                let severity = calculate_c_s_conflict(plant_c, plant_s);
                conflicts.push(Conflict::new(ConflictKind::CompetitorStress, plant_c, plant_s, severity));
            }
        }
    }

    // CONFLICT TYPE 3: C-R (Competitive vs Ruderal)
    for plant_c in &high_c {
        for plant_r in &high_r {
            if plant_c.index != plant_r.index {
                let severity = calculate_c_r_conflict(plant_c, plant_r);
                conflicts.push(Conflict::new(ConflictKind::CompetitorRuderal, plant_c, plant_r, severity));
            }
        }
    }

    // CONFLICT TYPE 4: R-R (Ruderal vs Ruderal), fixed low severity
    for (i, plant_a) in high_r.iter().enumerate() {
        for plant_b in &high_r[i + 1..] {
            conflicts.push(Conflict::new(ConflictKind::RuderalRuderal, plant_a, plant_b, 0.3));
        }
    }

    let total_conflicts = conflicts.iter().fold(0.0, |acc, c| acc + c.severity);

    // Normalize by guild size (conflict density)
    let max_pairs = if n_plants > 1 {
        n_plants * (n_plants - 1)
    } else {
        1
    };
    let conflict_density = total_conflicts / max_pairs as f64;

    Ok(M2Result {
        raw: conflict_density,
        high_c_count: high_c.len(),
        high_s_count: high_s.len(),
        high_r_count: high_r.len(),
        total_conflicts,
        plant_csr_data,
        conflicts,
    })
}

/// Determine dominant CSR strategy based on percentiles
///
/// Returns the strategy with the highest percentile, or "Mixed" if balanced
fn determine_dominant_strategy(c_pct: f64, s_pct: f64, r_pct: f64) -> &'static str {
    // Balanced when within 20 percentile points
    let max_pct = c_pct.max(s_pct).max(r_pct);
    let min_pct = c_pct.min(s_pct).min(r_pct);

    if max_pct - min_pct < 20.0 {
        return "Mixed";
    }

    if c_pct >= s_pct && c_pct >= r_pct {
        if c_pct > PERCENTILE_THRESHOLD { "Competitive" } else { "C-leaning" }
    } else if s_pct >= c_pct && s_pct >= r_pct {
        if s_pct > PERCENTILE_THRESHOLD { "Stress-tolerant" } else { "S-leaning" }
    } else if r_pct > PERCENTILE_THRESHOLD {
        "Ruderal"
    } else {
        "R-leaning"
    }
}

/// Strategies in `Metric::M2.required_fields()` order
const CSR_STRATEGIES: [CsrStrategy; 3] = [
    CsrStrategy::Competitor,
    CsrStrategy::StressTolerator,
    CsrStrategy::Ruderal,
];

/// C, S and R scores of one member
fn required_csr(member: &GuildMember) -> ScoringResult<[f64; 3]> {
    let mut values = [0.0; 3];
    for ((value, strategy), field) in values
        .iter_mut()
        .zip(CSR_STRATEGIES)
        .zip(Metric::M2.required_fields().iter().copied())
    {
        *value = member
            .plant
            .csr(strategy)
            .ok_or_else(|| ScoringError::missing_field(Metric::M2.key(), member.id(), field))?;
    }
    Ok(values)
}

/// Convert CSR to percentiles; missing CSR is a data error, other fields default
fn extract_plant_data<'a>(
    members: &[GuildMember<'a>],
    csr_calibration: Option<&CsrCalibration>,
) -> ScoringResult<(Vec<PlantRow<'a>>, Vec<PlantCsrData>)> {
    let mut plants = Vec::with_capacity(members.len());
    let mut csr_data = Vec::with_capacity(members.len());

    for (index, member) in members.iter().enumerate() {
        let [c_val, s_val, r_val] = required_csr(member)?;

        let c_percentile = csr_percentile(c_val, CsrStrategy::Competitor, csr_calibration);
        let s_percentile = csr_percentile(s_val, CsrStrategy::StressTolerator, csr_calibration);
        let r_percentile = csr_percentile(r_val, CsrStrategy::Ruderal, csr_calibration);

        let plant = member.plant;
        plants.push(PlantRow {
            index,
            id: member.id(),
            c_percentile,
            s_percentile,
            r_percentile,
            height_m: plant.height_m.unwrap_or(DEFAULT_HEIGHT_M),
            growth_form: plant.growth_form_str(),
            light_pref: plant.light_pref.unwrap_or(DEFAULT_LIGHT),
        });

        csr_data.push(PlantCsrData {
            plant_id: plant.id.clone(),
            plant_name: plant.scientific_name.clone(),
            c_raw: c_val,
            s_raw: s_val,
            r_raw: r_val,
            c_percentile,
            s_percentile,
            r_percentile,
            dominant_strategy: determine_dominant_strategy(c_percentile, s_percentile, r_percentile)
                .to_string(),
        });
    }

    Ok((plants, csr_data))
}

/// C-C conflict with growth form and height modulation
fn calculate_c_c_conflict(plant_a: &PlantRow, plant_b: &PlantRow) -> f64 {
    let mut conflict = 1.0; // Base severity

    if (plant_a.is_climber() && plant_b.is_tree()) || (plant_b.is_climber() && plant_a.is_tree()) {
        conflict *= 0.2; // Vine can climb tree
    } else {
        // Height separation
        let height_diff = (plant_a.height_m - plant_b.height_m).abs();
        if height_diff < 2.0 {
            conflict *= 1.0; // Same canopy layer
        } else if height_diff < 5.0 {
            conflict *= 0.6; // Partial separation
        } else {
            conflict *= 0.3; // Different canopy layers
        }
    }

    conflict
}

/// C-S conflict with critical light preference modulation
fn calculate_c_s_conflict(plant_c: &PlantRow, plant_s: &PlantRow) -> f64 {
    let mut conflict = 0.6; // Base severity

    let s_light = plant_s.light_pref;

    if s_light < 3.2 {
        // S is SHADE-ADAPTED - wants to be under C plant's canopy
        conflict = 0.0;
    } else if s_light > 7.47 {
        // S is SUN-LOVING - will be shaded out by C plant
        conflict = 0.9;
    } else {
        // S is FLEXIBLE - depends on height difference
        let height_diff = (plant_c.height_m - plant_s.height_m).abs();
        if height_diff > 8.0 {
            conflict *= 0.3;
        }
    }

    conflict
}

/// C-R conflict with height modulation
fn calculate_c_r_conflict(plant_c: &PlantRow, plant_r: &PlantRow) -> f64 {
    let mut conflict = 0.8; // Base severity

    // Height difference allows R plants to exploit gaps
    let height_diff = (plant_c.height_m - plant_r.height_m).abs();
    if height_diff > 5.0 {
        conflict *= 0.3;
    }

    conflict
}
