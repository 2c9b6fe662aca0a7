//! Köppen-stratified percentile calibration
//!
//! Samples random guilds per climate zone, scores them through the same
//! `GuildScorer::compute_raw_scores` path used in production and turns the
//! sorted raw values into percentile breakpoints.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

use crate::config::CalibrationConfig;
use crate::data::GuildData;
use crate::metrics::{Metric, RawScores};
use crate::scorer::GuildScorer;
use crate::types::{ClimateZone, CsrStrategy};
use crate::utils::{
    CalibrationTable, CsrCalibration, CsrPercentileParams, PercentileParams, CSR_PERCENTILES, PERCENTILES,
};

/// Metrics calibrated on 2-plant pairs
pub const PAIR_METRICS: [Metric; 2] = [Metric::M1, Metric::M2];

/// Plant ids per climate zone, sorted for reproducible sampling
#[derive(Debug, Clone, Default)]
pub struct ClimateOrganizer {
    pools: BTreeMap<ClimateZone, Vec<String>>,
}

impl ClimateOrganizer {
    pub fn from_data(data: &GuildData) -> Self {
        let pools = ClimateZone::ALL
            .into_iter()
            .map(|zone| (zone, data.zone_pool(zone)))
            .collect();
        ClimateOrganizer { pools }
    }

    pub fn zones(&self) -> impl Iterator<Item = ClimateZone> + '_ {
        self.pools.keys().copied()
    }

    pub fn zone_plants(&self, zone: ClimateZone) -> &[String] {
        self.pools.get(&zone).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Sampling outcome for one zone
#[derive(Debug, Clone, Serialize)]
pub struct ZoneReport {
    pub zone: ClimateZone,
    pub available_plants: usize,
    pub sampled: usize,
    pub valid: usize,
    pub failed: usize,
    /// Zone left out of the table (too few plants or no valid guilds)
    pub skipped: bool,
}

/// Calibration table plus per-zone sampling reports
#[derive(Debug, Clone)]
pub struct CalibrationRun {
    pub table: CalibrationTable,
    pub reports: Vec<ZoneReport>,
}

/// Builds calibration tables from random guilds
pub struct CalibrationBuilder<'a> {
    scorer: &'a GuildScorer,
    organizer: ClimateOrganizer,
    config: CalibrationConfig,
}

impl<'a> CalibrationBuilder<'a> {
    pub fn new(scorer: &'a GuildScorer, config: CalibrationConfig) -> Self {
        if scorer.context().csr_calibration.is_none() {
            warn!("No CSR calibration on the scorer - M2 samples use fixed thresholds");
        }
        let organizer = ClimateOrganizer::from_data(scorer.data());
        CalibrationBuilder { scorer, organizer, config }
    }

    pub fn organizer(&self) -> &ClimateOrganizer {
        &self.organizer
    }

    /// Metrics the configured guild size calibrates: M1/M2 for pairs, all otherwise
    pub fn metrics(&self) -> &'static [Metric] {
        if self.config.guild_size == 2 {
            &PAIR_METRICS
        } else {
            &Metric::ALL
        }
    }

    /// Sample, score and derive breakpoints for every zone
    pub fn build(&self) -> CalibrationRun {
        let mut table = CalibrationTable::new();
        let mut reports = Vec::new();

        for zone in self.organizer.zones() {
            let plants = self.organizer.zone_plants(zone);
            let mut report = ZoneReport {
                zone,
                available_plants: plants.len(),
                sampled: 0,
                valid: 0,
                failed: 0,
                skipped: true,
            };

            if plants.len() < self.config.guild_size {
                warn!(
                    zone = %zone,
                    available = plants.len(),
                    guild_size = self.config.guild_size,
                    "Skipping zone (insufficient plants)"
                );
                reports.push(report);
                continue;
            }

            let guilds = sample_guilds(plants, self.config.guild_size, self.config.guilds_per_zone, self.zone_seed(zone));
            report.sampled = guilds.len();

            let (raw_scores, failed) = self.score_guilds(&guilds);
            report.valid = raw_scores.len();
            report.failed = failed;
            info!(
                zone = %zone,
                available = plants.len(),
                valid = report.valid,
                failed,
                "Computed raw scores"
            );

            if raw_scores.is_empty() {
                warn!(zone = %zone, "Skipping zone (no valid guilds)");
                reports.push(report);
                continue;
            }

            for &metric in self.metrics() {
                let mut values: Vec<f64> = raw_scores.iter().map(|s| s.get(metric)).collect();
                table.insert(zone, metric, PercentileParams::from_values(breakpoints(&mut values, &PERCENTILES)));
            }
            report.skipped = false;
            reports.push(report);
        }

        CalibrationRun { table, reports }
    }

    /// Global CSR table from every plant with complete C, S and R scores
    ///
    /// Needs only the plant data, so it is built before the scorer that
    /// samples M2. `None` when no plant has complete CSR data.
    pub fn build_csr(data: &GuildData) -> Option<CsrCalibration> {
        let plants: Vec<_> = data.plants_with_complete_csr().collect();
        if plants.is_empty() {
            warn!("No plants with complete CSR data");
            return None;
        }
        info!(plants = plants.len(), "Computing CSR percentiles");

        let params = |strategy: CsrStrategy| {
            let mut values: Vec<f64> = plants.iter().filter_map(|p| p.csr(strategy)).collect();
            CsrPercentileParams::from_values(breakpoints(&mut values, &CSR_PERCENTILES))
        };

        Some(CsrCalibration {
            c: params(CsrStrategy::Competitor),
            s: params(CsrStrategy::StressTolerator),
            r: params(CsrStrategy::Ruderal),
        })
    }

    /// Raw scores in parallel; failures are counted and skipped
    fn score_guilds(&self, guilds: &[Vec<String>]) -> (Vec<RawScores>, usize) {
        let failed = AtomicUsize::new(0);
        let raw_scores = guilds
            .par_iter()
            .filter_map(|guild| match self.scorer.compute_raw_scores(guild.as_slice()) {
                Ok(scores) => Some(scores),
                Err(err) => {
                    if failed.fetch_add(1, Ordering::Relaxed) == 0 {
                        warn!("First failed guild: {}", err);
                    } else {
                        debug!("Failed guild: {}", err);
                    }
                    None
                }
            })
            .collect();
        (raw_scores, failed.into_inner())
    }

    fn zone_seed(&self, zone: ClimateZone) -> u64 {
        self.config.seed.wrapping_add(zone as u64)
    }
}

/// Sample random guilds of distinct plants
fn sample_guilds(plants: &[String], guild_size: usize, n_guilds: usize, seed: u64) -> Vec<Vec<String>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n_guilds)
        .map(|_| plants.choose_multiple(&mut rng, guild_size).cloned().collect())
        .collect()
}

/// Breakpoint for percentile p at sorted index round(p/100 × (len − 1))
///
/// `values` must be non-empty; it is sorted in place.
fn breakpoints<const N: usize>(values: &mut [f64], percentiles: &[f64; N]) -> [f64; N] {
    values.sort_by(|a, b| a.total_cmp(b));
    let last = values.len().saturating_sub(1);
    std::array::from_fn(|i| {
        let index = (percentiles[i] / 100.0 * last as f64).round() as usize;
        values.get(index).copied().unwrap_or(0.0)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::GuildData;
    use crate::phylo_tree::PhylogeneticTree;
    use crate::scorer::tests::fixture_context;
    use crate::scorer::ScoringContext;
    use crate::types::{Plant, ZoneSet};

    fn config(guild_size: usize) -> CalibrationConfig {
        CalibrationConfig {
            guilds_per_zone: 40,
            guild_size,
            seed: 7,
        }
    }

    #[test]
    fn test_breakpoint_indices() {
        let mut values: Vec<f64> = (0..=100).rev().map(f64::from).collect();
        let bp = breakpoints(&mut values, &PERCENTILES);
        assert_eq!(bp, PERCENTILES);

        let mut single = vec![3.5];
        assert_eq!(breakpoints(&mut single, &PERCENTILES), [3.5; 13]);
    }

    #[test]
    fn test_seven_metric_build_is_reproducible() {
        let scorer = GuildScorer::new(fixture_context(false)).unwrap();
        let builder = CalibrationBuilder::new(&scorer, config(3));

        let first = builder.build();
        let second = builder.build();
        assert_eq!(first.table, second.table);

        // Humid temperate has p1-p5; arid only p5 and p6
        assert!(first.table.has_zone(ClimateZone::HumidTemperate));
        assert!(!first.table.has_zone(ClimateZone::Arid));
        for metric in Metric::ALL {
            let params = first.table.get(ClimateZone::HumidTemperate, metric).unwrap();
            let values = params.values();
            assert!(values.windows(2).all(|w| w[0] <= w[1]));
        }

        let arid = first.reports.iter().find(|r| r.zone == ClimateZone::Arid).unwrap();
        assert!(arid.skipped);
        assert_eq!(arid.available_plants, 2);
    }

    #[test]
    fn test_pair_stage_covers_m1_m2_and_counts_failures() {
        let scorer = GuildScorer::new(fixture_context(false)).unwrap();
        let builder = CalibrationBuilder::new(&scorer, config(2));
        let run = builder.build();

        assert!(run.table.get(ClimateZone::HumidTemperate, Metric::M1).is_ok());
        assert!(run.table.get(ClimateZone::HumidTemperate, Metric::M2).is_ok());
        assert!(run.table.get(ClimateZone::HumidTemperate, Metric::M3).is_err());

        // Every arid pair is {p5, p6} and p6 has no C score
        let arid = run.reports.iter().find(|r| r.zone == ClimateZone::Arid).unwrap();
        assert_eq!(arid.sampled, 40);
        assert_eq!(arid.failed, 40);
        assert!(arid.skipped);
        assert!(!run.table.has_zone(ClimateZone::Arid));
    }

    #[test]
    fn test_csr_table_from_complete_plants() {
        let csr = CalibrationBuilder::build_csr(&fixture_context(false).data).unwrap();

        // C over p1-p5: 10, 20, 33, 40, 70
        assert_eq!(csr.c.p1, 10.0);
        assert_eq!(csr.c.p50, 33.0);
        assert_eq!(csr.c.p99, 70.0);
        assert_eq!(csr.r.p99, 70.0);
    }

    /// Ten humid temperate herbs; p8 and p9 are the only strong competitors
    fn competitor_pair_data() -> GuildData {
        let herb = |i: usize, c: f64, s: f64, r: f64| {
            let mut p = Plant::new(format!("p{}", i), format!("Species {}", i));
            p.csr_c = Some(c);
            p.csr_s = Some(s);
            p.csr_r = Some(r);
            p.height_m = Some(1.0);
            p.growth_form = Some("herb".to_string());
            p.zones = ZoneSet::from_zones(&[ClimateZone::HumidTemperate]);
            p
        };
        let mut plants: Vec<Plant> = (0..8)
            .map(|i| {
                let s = 10.0 * (i + 1) as f64;
                herb(i, 20.0, s, 80.0 - s)
            })
            .collect();
        plants.push(herb(8, 55.0, 15.0, 30.0));
        plants.push(herb(9, 55.0, 25.0, 20.0));
        GuildData::from_records(plants, Vec::new(), Vec::new(), Default::default(), Default::default(), Default::default())
    }

    #[test]
    fn test_pair_m2_distribution_matches_scoring_time_csr() {
        let data = competitor_pair_data();
        let tips: Vec<String> = (0..10).map(|i| format!("p{}:1", i)).collect();
        let tree = PhylogeneticTree::from_newick(&format!("({});", tips.join(",")))
            .unwrap()
            .with_tip_mapping((0..10).map(|i| (format!("p{}", i), format!("p{}", i))));

        let csr = CalibrationBuilder::build_csr(&data).unwrap();
        // C=55 sits above the 75th percentile only under the derived table
        assert!(csr.c.p85 <= 55.0);
        let context = ScoringContext {
            data,
            tree,
            calibration: None,
            csr_calibration: Some(csr),
            options: Default::default(),
        };
        let scorer = GuildScorer::new(context).unwrap();

        let run = CalibrationBuilder::new(
            &scorer,
            CalibrationConfig {
                guilds_per_zone: 2000,
                guild_size: 2,
                seed: 7,
            },
        )
        .build();
        let m2 = run.table.get(ClimateZone::HumidTemperate, Metric::M2).unwrap();
        let values = m2.values();

        // Full C-C conflict over n(n-1) = 2
        let raw = scorer.compute_raw_scores(&["p8", "p9"]).unwrap().get(Metric::M2);
        assert_eq!(raw, 0.5);
        assert!(values[0] <= raw && raw <= values[values.len() - 1]);
        assert_eq!(values[values.len() - 1], 0.5);
        assert!(values.iter().all(|v| v.is_sign_positive()));
    }
}
