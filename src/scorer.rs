//! Guild Scorer - Main coordinator for scoring plant guilds
//!
//! Validates a guild, slices the shared dataset to its members once, runs the
//! seven metrics in parallel (Rayon) and turns raw values into percentiles
//! and display scores.

use anyhow::{Context, Result};
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::calibration::CalibrationBuilder;
use crate::config::{ScorerConfig, ScoringOptions};
use crate::data::GuildData;
use crate::error::{GuildValidationError, ScoringError, ScoringResult, GUILD_SCOPE};
use crate::metrics::*;
use crate::phylo_tree::PhylogeneticTree;
use crate::types::{ClimateZone, GuildMember, ZoneSet};
use crate::utils::{CalibrationTable, CsrCalibration};

/// Everything a score needs, loaded once and shared read-only
pub struct ScoringContext {
    pub data: GuildData,
    pub tree: PhylogeneticTree,
    /// Required by `score`; calibration runs go without
    pub calibration: Option<CalibrationTable>,
    /// Missing table falls back to fixed CSR thresholds
    pub csr_calibration: Option<CsrCalibration>,
    pub options: ScoringOptions,
}

impl ScoringContext {
    /// Load datasets, tree and calibration tables named in the config
    pub fn load(config: &ScorerConfig) -> Result<Self> {
        let mut context = Self::load_datasets(config)?;

        let calibration_path = config.resolve(&config.calibration_path);
        context.calibration = Some(CalibrationTable::load(&calibration_path)?);

        context.csr_calibration = match &config.csr_calibration_path {
            Some(path) => {
                let path = config.resolve(path);
                if path.exists() {
                    Some(CsrCalibration::load(&path)?)
                } else {
                    warn!("CSR calibration not found at {:?} - using fixed thresholds", path);
                    None
                }
            }
            None => None,
        };
        Ok(context)
    }

    /// Datasets and tree for a calibration run
    ///
    /// The CSR table is derived from the loaded plants, never read from disk,
    /// so M2 samples see the same table that the run saves for scoring.
    pub fn load_for_calibration(config: &ScorerConfig) -> Result<Self> {
        let mut context = Self::load_datasets(config)?;
        context.csr_calibration = CalibrationBuilder::build_csr(&context.data);
        Ok(context)
    }

    fn load_datasets(config: &ScorerConfig) -> Result<Self> {
        Ok(ScoringContext {
            data: GuildData::load(config)?,
            tree: load_tree(config)?,
            calibration: None,
            csr_calibration: None,
            options: config.scoring.clone(),
        })
    }
}

/// Newick by default, the compact binary dump for `.bin` files
pub fn load_tree(config: &ScorerConfig) -> Result<PhylogeneticTree> {
    let tree_path = config.resolve(&config.tree_path);
    let tree = match tree_path.extension().and_then(|ext| ext.to_str()) {
        Some("bin") => PhylogeneticTree::from_binary(&tree_path)?,
        _ => PhylogeneticTree::load_newick(&tree_path)?,
    };
    info!(
        nodes = tree.get_num_nodes(),
        leaves = tree.num_leaves(),
        "loaded phylogenetic tree from {:?}",
        tree_path
    );
    tree.load_mapping(&config.resolve(&config.tree_mapping_path))
}

/// Guild score result
#[derive(Debug, Clone, Serialize)]
pub struct GuildScore {
    /// Mean of the seven display scores
    pub overall_score: f64,
    /// Display scores (M1-M7)
    pub metrics: [f64; 7],
    pub raw_scores: [f64; 7],
    /// Percentiles before display inversion
    pub normalized: [f64; 7],
    pub details: Vec<MetricDetails>,
    pub climate_zone: ClimateZone,
    pub shared_zones: Vec<ClimateZone>,
    pub plant_ids: Vec<String>,
}

impl GuildScore {
    pub fn display(&self, metric: Metric) -> f64 {
        self.metrics[metric.index()]
    }

    pub fn detail(&self, metric: Metric) -> Option<&MetricDetails> {
        self.details.iter().find(|d| d.metric() == metric)
    }
}

/// A validated guild slice
struct Guild<'a> {
    members: Vec<GuildMember<'a>>,
    shared_zones: ZoneSet,
}

/// Main guild scorer
#[derive(Clone)]
pub struct GuildScorer {
    context: Arc<ScoringContext>,
    /// Dedicated metric pool; `None` runs on the global Rayon pool
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl GuildScorer {
    pub fn new(context: ScoringContext) -> Result<Self> {
        Self::from_shared(Arc::new(context))
    }

    /// Share one context between several scorers
    pub fn from_shared(context: Arc<ScoringContext>) -> Result<Self> {
        let pool = match context.options.metric_threads {
            Some(threads) => Some(Arc::new(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("guild-metric-{}", i))
                    .build()
                    .context("Failed to build metric thread pool")?,
            )),
            None => None,
        };
        Ok(GuildScorer { context, pool })
    }

    /// Load everything from the config and build a scorer
    pub fn from_config(config: &ScorerConfig) -> Result<Self> {
        Self::new(ScoringContext::load(config)?)
    }

    pub fn context(&self) -> &ScoringContext {
        &self.context
    }

    /// Access guild data (for calibration to organize by climate zone)
    pub fn data(&self) -> &GuildData {
        &self.context.data
    }

    /// Score a guild of plants using all 7 metrics (parallel)
    pub fn score<S: AsRef<str>>(&self, plant_ids: &[S], zone: ClimateZone) -> ScoringResult<GuildScore> {
        let guild = self.guild(plant_ids, Some(zone))?;
        let members = &guild.members;

        // Each metric is independent and runs on its own task
        let run = || -> ScoringResult<Vec<MetricDetails>> {
            Metric::ALL
                .par_iter()
                .map(|&metric| self.compute_metric(metric, members))
                .collect()
        };
        let details = match &self.pool {
            Some(pool) => pool.install(run)?,
            None => run()?,
        };

        self.normalize(&guild, details, zone)
    }

    /// Score a guild without fan-out; same result as [`GuildScorer::score`]
    pub fn score_sequential<S: AsRef<str>>(&self, plant_ids: &[S], zone: ClimateZone) -> ScoringResult<GuildScore> {
        let guild = self.guild(plant_ids, Some(zone))?;
        let details = self.compute_details(&guild.members)?;
        self.normalize(&guild, details, zone)
    }

    /// Compute raw scores for a guild (for calibration)
    ///
    /// Same validation and metric code path as `score`, without
    /// normalization, so no calibration table is needed. Runs sequentially;
    /// calibration parallelizes across guilds instead.
    pub fn compute_raw_scores<S: AsRef<str>>(&self, plant_ids: &[S]) -> ScoringResult<RawScores> {
        let guild = self.guild(plant_ids, None)?;
        let details = self.compute_details(&guild.members)?;
        Ok(RawScores::from_details(&details))
    }

    fn compute_details(&self, members: &[GuildMember]) -> ScoringResult<Vec<MetricDetails>> {
        Metric::ALL
            .iter()
            .map(|&metric| self.compute_metric(metric, members))
            .collect()
    }

    fn compute_metric(&self, metric: Metric, members: &[GuildMember]) -> ScoringResult<MetricDetails> {
        let ctx = &*self.context;
        let data = &ctx.data;

        let details = match metric {
            Metric::M1 => MetricDetails::M1(calculate_m1(members, &ctx.tree, ctx.options.pd_anchor)?),
            Metric::M2 => MetricDetails::M2(calculate_m2(members, ctx.csr_calibration.as_ref())?),
            Metric::M3 => MetricDetails::M3(calculate_m3(
                members,
                &data.herbivore_predators,
                &data.insect_parasites,
            )),
            Metric::M4 => MetricDetails::M4(calculate_m4(members, &data.pathogen_antagonists)),
            Metric::M5 => {
                let exclude = ctx
                    .options
                    .exclude_pathogenic_from_m5
                    .then_some(&data.pathogenic_fungi);
                MetricDetails::M5(calculate_m5(members, exclude))
            }
            Metric::M6 => MetricDetails::M6(calculate_m6(members)),
            Metric::M7 => MetricDetails::M7(calculate_m7(members)),
        };
        Ok(details)
    }

    /// Validate ids and slice the dataset to the guild
    fn guild<S: AsRef<str>>(&self, plant_ids: &[S], zone: Option<ClimateZone>) -> ScoringResult<Guild<'_>> {
        if plant_ids.is_empty() {
            return Err(ScoringError::invalid_guild(GuildValidationError::Empty));
        }

        let mut seen: FxHashSet<&str> = FxHashSet::default();
        let mut members = Vec::with_capacity(plant_ids.len());
        for id in plant_ids {
            let id = id.as_ref();
            if !seen.insert(id) {
                return Err(ScoringError::invalid_guild(GuildValidationError::DuplicatePlant {
                    plant_id: id.to_string(),
                }));
            }
            let member = self.context.data.member(id).ok_or_else(|| {
                ScoringError::invalid_guild(GuildValidationError::UnknownPlant {
                    plant_id: id.to_string(),
                })
            })?;
            members.push(member);
        }

        // Köppen tier overlap
        let shared_zones = members
            .iter()
            .fold(ZoneSet::ALL, |shared, m| shared.intersection(m.plant.zones));
        if shared_zones.is_empty() {
            return Err(ScoringError::invalid_guild(GuildValidationError::NoSharedClimateZone {
                plant_ids: members.iter().map(|m| m.id().to_string()).collect(),
            }));
        }
        if let Some(zone) = zone.filter(|z| !shared_zones.contains(*z)) {
            return Err(ScoringError::invalid_guild(GuildValidationError::ZoneNotShared {
                zone: zone.to_string(),
                plant_ids: members
                    .iter()
                    .filter(|m| !m.plant.zones.contains(zone))
                    .map(|m| m.id().to_string())
                    .collect(),
            }));
        }

        debug!(n_plants = members.len(), "guild validated");
        Ok(Guild { members, shared_zones })
    }

    /// Percentiles, display inversion (M1, M2) and the overall mean
    fn normalize(&self, guild: &Guild, details: Vec<MetricDetails>, zone: ClimateZone) -> ScoringResult<GuildScore> {
        let calibration = self.context.calibration.as_ref().ok_or_else(|| ScoringError::Config {
            metric: GUILD_SCOPE,
            zone: zone.to_string(),
            key: "calibration".to_string(),
            reason: "no calibration table loaded".to_string(),
        })?;

        let mut raw_scores = [0.0; 7];
        let mut normalized = [0.0; 7];
        let mut metrics = [0.0; 7];

        for detail in &details {
            let metric = detail.metric();
            let raw = detail.raw();
            let percentile = if metric == Metric::M1 && guild.members.len() < 2 {
                // No diversity to rank: worst percentile, display 0
                100.0
            } else {
                calibration.percentile(raw, metric, zone, false)?
            };

            let i = metric.index();
            raw_scores[i] = raw;
            normalized[i] = percentile;
            metrics[i] = if metric.inverted_display() {
                100.0 - percentile
            } else {
                percentile
            };
        }

        // Overall score: simple average
        let overall_score = metrics.iter().sum::<f64>() / metrics.len() as f64;
        debug!(overall_score, "guild scored");

        Ok(GuildScore {
            overall_score,
            metrics,
            raw_scores,
            normalized,
            details,
            climate_zone: zone,
            shared_zones: guild.shared_zones.zones(),
            plant_ids: guild.members.iter().map(|m| m.id().to_string()).collect(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data::LookupTable;
    use crate::types::{FungalProfile, OrganismProfile, Plant};
    use crate::utils::PercentileParams;
    use approx::assert_relative_eq;
    use rustc_hash::FxHashMap;

    const NEWICK: &str = "(((p1:1,p2:2):1,p3:3):1,(p4:2,(p5:1,p6:1):1):2);";

    fn plant(id: &str, csr: [Option<f64>; 3], height: f64, form: &str, light: Option<f64>, zones: &[ClimateZone]) -> Plant {
        let mut p = Plant::new(id, format!("Species {}", id));
        p.csr_c = csr[0];
        p.csr_s = csr[1];
        p.csr_r = csr[2];
        p.height_m = Some(height);
        p.growth_form = Some(form.to_string());
        p.light_pref = light;
        p.zones = ZoneSet::from_zones(zones);
        p
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn lookup(key: &str, values: &[&str]) -> LookupTable {
        let mut map: FxHashMap<String, Vec<String>> = FxHashMap::default();
        map.insert(key.to_string(), names(values));
        LookupTable::new(map)
    }

    /// Evenly spaced breakpoints 0.0, 0.1, .., 1.2
    pub(crate) fn linear_params() -> PercentileParams {
        PercentileParams::from_values(std::array::from_fn(|i| i as f64 * 0.1))
    }

    /// Six plants: p1-p5 humid temperate, p5-p6 arid; p6 has no C score
    pub(crate) fn fixture_context(with_calibration: bool) -> ScoringContext {
        let ht = ClimateZone::HumidTemperate;
        let arid = ClimateZone::Arid;
        let plants = vec![
            plant("p1", [Some(70.0), Some(20.0), Some(10.0)], 20.0, "tree", Some(6.0), &[ht]),
            plant("p2", [Some(20.0), Some(70.0), Some(10.0)], 3.0, "shrub", Some(2.5), &[ht]),
            plant("p3", [Some(10.0), Some(20.0), Some(70.0)], 0.5, "herb", Some(8.0), &[ht]),
            plant("p4", [Some(40.0), Some(40.0), Some(20.0)], 4.0, "liana", Some(5.0), &[ht]),
            plant("p5", [Some(33.0), Some(33.0), Some(34.0)], 1.0, "herb", None, &[ht, arid]),
            plant("p6", [None, Some(50.0), Some(50.0)], 2.0, "shrub", Some(7.0), &[arid]),
        ];
        let organisms = vec![
            ("p1".to_string(), OrganismProfile { herbivores: names(&["aphid"]), ..Default::default() }),
            (
                "p2".to_string(),
                OrganismProfile {
                    predators_has_host: names(&["ladybird"]),
                    pollinators: names(&["apis"]),
                    ..Default::default()
                },
            ),
            ("p3".to_string(), OrganismProfile { pollinators: names(&["apis"]), ..Default::default() }),
        ];
        let fungi = vec![
            (
                "p1".to_string(),
                FungalProfile { pathogenic: names(&["botrytis"]), amf: names(&["glomus"]), ..Default::default() },
            ),
            (
                "p2".to_string(),
                FungalProfile { amf: names(&["glomus"]), mycoparasitic: names(&["trichoderma"]), ..Default::default() },
            ),
            ("p3".to_string(), FungalProfile { entomopathogenic: names(&["beauveria"]), ..Default::default() }),
        ];
        let data = GuildData::from_records(
            plants,
            organisms,
            fungi,
            lookup("aphid", &["ladybird"]),
            lookup("aphid", &["beauveria"]),
            lookup("botrytis", &["trichoderma"]),
        );

        let ids = ["p1", "p2", "p3", "p4", "p5", "p6"];
        let tree = PhylogeneticTree::from_newick(NEWICK)
            .unwrap()
            .with_tip_mapping(ids.iter().map(|id| (id.to_string(), *id)));

        let calibration = with_calibration.then(|| {
            let mut table = CalibrationTable::new();
            for zone in [ht, arid] {
                for metric in Metric::ALL {
                    table.insert(zone, metric, linear_params());
                }
            }
            table
        });

        ScoringContext {
            data,
            tree,
            calibration,
            csr_calibration: None,
            options: ScoringOptions::default(),
        }
    }

    fn scorer() -> GuildScorer {
        GuildScorer::new(fixture_context(true)).unwrap()
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let scorer = scorer();
        let ids = ["p1", "p2", "p3"];
        let parallel = scorer.score(&ids, ClimateZone::HumidTemperate).unwrap();
        let sequential = scorer.score_sequential(&ids, ClimateZone::HumidTemperate).unwrap();

        assert_eq!(parallel.overall_score, sequential.overall_score);
        assert_eq!(parallel.metrics, sequential.metrics);
        assert_eq!(parallel.raw_scores, sequential.raw_scores);

        let mean = parallel.metrics.iter().sum::<f64>() / 7.0;
        assert_relative_eq!(parallel.overall_score, mean, epsilon = 1e-12);
        assert_relative_eq!(parallel.display(Metric::M1), 100.0 - parallel.normalized[0], epsilon = 1e-12);
        assert_relative_eq!(parallel.display(Metric::M2), 100.0 - parallel.normalized[1], epsilon = 1e-12);
        assert_eq!(parallel.display(Metric::M7), parallel.normalized[6]);
        for score in parallel.metrics {
            assert!((0.0..=100.0).contains(&score));
        }
        assert_eq!(parallel.details.len(), 7);
        assert!(matches!(parallel.detail(Metric::M5), Some(MetricDetails::M5(_))));
        assert_eq!(parallel.plant_ids, vec!["p1", "p2", "p3"]);
    }

    #[test]
    fn test_dedicated_pool_gives_same_scores() {
        let mut context = fixture_context(true);
        context.options.metric_threads = Some(2);
        let pooled = GuildScorer::new(context).unwrap();
        let ids = ["p1", "p2", "p4"];
        let a = pooled.score(&ids, ClimateZone::HumidTemperate).unwrap();
        let b = scorer().score(&ids, ClimateZone::HumidTemperate).unwrap();
        assert_eq!(a.metrics, b.metrics);
    }

    #[test]
    fn test_single_plant_guild() {
        let result = scorer().score(&["p1"], ClimateZone::HumidTemperate).unwrap();
        assert_eq!(result.raw_scores[0], 1.0);
        assert_eq!(result.normalized[0], 100.0);
        assert_eq!(result.metrics[0], 0.0);
    }

    #[test]
    fn test_validation_errors() {
        let scorer = scorer();
        let zone = ClimateZone::HumidTemperate;
        let empty: [&str; 0] = [];

        let err = scorer.score(&empty, zone).unwrap_err();
        assert_eq!(err, ScoringError::invalid_guild(GuildValidationError::Empty));

        let err = scorer.score(&["p1", "p2", "p1"], zone).unwrap_err();
        assert!(matches!(
            err,
            ScoringError::GuildValidation { reason: GuildValidationError::DuplicatePlant { .. }, .. }
        ));

        let err = scorer.score(&["p1", "nope"], zone).unwrap_err();
        assert!(matches!(
            err,
            ScoringError::GuildValidation { reason: GuildValidationError::UnknownPlant { .. }, .. }
        ));

        let err = scorer.score(&["p1", "p6"], zone).unwrap_err();
        assert!(matches!(
            err,
            ScoringError::GuildValidation { reason: GuildValidationError::NoSharedClimateZone { .. }, .. }
        ));
    }

    #[test]
    fn test_zone_outside_intersection_is_rejected() {
        let scorer = scorer();
        let expected = GuildValidationError::ZoneNotShared {
            zone: ClimateZone::Arid.to_string(),
            plant_ids: vec!["p1".to_string(), "p2".to_string()],
        };

        for result in [
            scorer.score(&["p1", "p2", "p5"], ClimateZone::Arid),
            scorer.score_sequential(&["p1", "p2", "p5"], ClimateZone::Arid),
        ] {
            match result {
                Err(ScoringError::GuildValidation { reason, .. }) => assert_eq!(reason, expected),
                other => panic!("expected a zone rejection, got {:?}", other.map(|s| s.overall_score)),
            }
        }

        // Raw scores take no zone
        assert!(scorer.compute_raw_scores(&["p1", "p2"]).is_ok());
    }

    #[test]
    fn test_missing_csr_is_data_error() {
        let err = scorer().score(&["p5", "p6"], ClimateZone::Arid).unwrap_err();
        assert_eq!(err.metric(), "m2");
        assert!(matches!(err, ScoringError::Data { .. }));
    }

    #[test]
    fn test_raw_scores_need_no_calibration() {
        let scorer = GuildScorer::new(fixture_context(false)).unwrap();
        let ids = ["p1", "p2", "p3"];

        let err = scorer.score(&ids, ClimateZone::HumidTemperate).unwrap_err();
        assert!(matches!(err, ScoringError::Config { .. }));

        let raw = scorer.compute_raw_scores(&ids).unwrap();
        let with_calibration = self::scorer().score(&ids, ClimateZone::HumidTemperate).unwrap();
        assert_eq!(raw.values(), with_calibration.raw_scores);
        assert!(raw.m1_faiths_pd > 0.0);
    }

    #[test]
    fn test_pathogenic_exclusion_option() {
        let mut context = fixture_context(true);
        context.options.exclude_pathogenic_from_m5 = true;
        let excluding = GuildScorer::new(context).unwrap();

        // glomus is not pathogenic anywhere, so nothing changes
        let ids = ["p1", "p2"];
        let a = excluding.score(&ids, ClimateZone::HumidTemperate).unwrap();
        let b = scorer().score(&ids, ClimateZone::HumidTemperate).unwrap();
        assert_eq!(a.raw_scores[4], b.raw_scores[4]);
    }
}
