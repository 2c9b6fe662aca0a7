//! Scorer configuration
//!
//! Built from environment variables (the way the API binary always did) or
//! from a JSON file. All paths are resolved against `data_dir`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::ClimateZone;

/// Where Faith's PD is anchored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PdAnchor {
    /// Minimal subtree joining the tips to the tree root
    #[default]
    Root,
    /// Minimal subtree joining the tips to their MRCA
    Mrca,
}

/// Knobs that change metric semantics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringOptions {
    pub pd_anchor: PdAnchor,
    /// Drop fungi that are pathogenic anywhere in the dataset from M5
    pub exclude_pathogenic_from_m5: bool,
    /// Size of the dedicated metric pool; `None` uses the rayon global pool
    pub metric_threads: Option<usize>,
}

impl Default for ScoringOptions {
    fn default() -> Self {
        ScoringOptions {
            pd_anchor: PdAnchor::Root,
            exclude_pathogenic_from_m5: false,
            metric_threads: None,
        }
    }
}

/// Random guild sampling for percentile calibration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub guilds_per_zone: usize,
    pub guild_size: usize,
    pub seed: u64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        CalibrationConfig {
            guilds_per_zone: 20_000,
            guild_size: 7,
            seed: 42,
        }
    }
}

/// Input locations and scoring options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    pub data_dir: PathBuf,
    pub plants_path: PathBuf,
    pub organisms_path: PathBuf,
    pub fungi_path: PathBuf,
    pub herbivore_predators_path: PathBuf,
    pub insect_parasites_path: PathBuf,
    pub pathogen_antagonists_path: PathBuf,
    pub tree_path: PathBuf,
    pub tree_mapping_path: PathBuf,
    pub calibration_path: PathBuf,
    pub csr_calibration_path: Option<PathBuf>,
    pub climate_zone: ClimateZone,
    pub scoring: ScoringOptions,
    pub calibration: CalibrationConfig,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        ScorerConfig {
            data_dir: PathBuf::from("shipley_checks/stage4"),
            plants_path: PathBuf::from("phase4_output/bill_with_csr_ecoservices_koppen_vernaculars_11711.parquet"),
            organisms_path: PathBuf::from("phase0_output/organism_profiles_11711.parquet"),
            fungi_path: PathBuf::from("phase0_output/fungal_guilds_hybrid_11711.parquet"),
            herbivore_predators_path: PathBuf::from("phase0_output/herbivore_predators_11711.csv"),
            insect_parasites_path: PathBuf::from("phase0_output/insect_fungal_parasites_11711.csv"),
            pathogen_antagonists_path: PathBuf::from("phase0_output/pathogen_antagonists_11711.csv"),
            tree_path: PathBuf::from("data/mixgb_tree_11711_species_20251107.nwk"),
            tree_mapping_path: PathBuf::from("data/mixgb_wfo_to_tree_mapping_11711.csv"),
            calibration_path: PathBuf::from("phase5_output/normalization_params_7plant.json"),
            csr_calibration_path: Some(PathBuf::from("phase5_output/csr_percentile_calibration_global.json")),
            climate_zone: ClimateZone::HumidTemperate,
            scoring: ScoringOptions::default(),
            calibration: CalibrationConfig::default(),
        }
    }
}

impl ScorerConfig {
    /// Defaults overridden by DATA_DIR, CALIBRATION_PATH, CSR_CALIBRATION_PATH,
    /// CLIMATE_TIER and METRIC_THREADS
    pub fn from_env() -> Result<Self> {
        let mut config = ScorerConfig::default();

        if let Ok(dir) = env::var("DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(path) = env::var("CALIBRATION_PATH") {
            config.calibration_path = PathBuf::from(path);
        }
        if let Ok(path) = env::var("CSR_CALIBRATION_PATH") {
            config.csr_calibration_path = Some(PathBuf::from(path));
        }
        if let Ok(tier) = env::var("CLIMATE_TIER") {
            config.climate_zone = ClimateZone::parse(&tier)
                .with_context(|| format!("CLIMATE_TIER '{}' is not a known climate zone", tier))?;
        }
        if let Ok(threads) = env::var("METRIC_THREADS") {
            let threads: usize = threads
                .parse()
                .with_context(|| format!("METRIC_THREADS '{}' is not a number", threads))?;
            config.scoring.metric_threads = Some(threads);
        }

        Ok(config)
    }

    /// Load from JSON; absent fields keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Join a configured path onto `data_dir` unless it is already absolute
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ScorerConfig::default();
        assert_eq!(config.climate_zone, ClimateZone::HumidTemperate);
        assert_eq!(config.scoring.pd_anchor, PdAnchor::Root);
        assert!(!config.scoring.exclude_pathogenic_from_m5);
        assert_eq!(config.calibration.guilds_per_zone, 20_000);
        assert_eq!(config.calibration.guild_size, 7);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{
            "data_dir": "/tmp/guilds",
            "climate_zone": "tier_6_arid",
            "scoring": { "pd_anchor": "mrca", "exclude_pathogenic_from_m5": true }
        }"#;
        let config: ScorerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.climate_zone, ClimateZone::Arid);
        assert_eq!(config.scoring.pd_anchor, PdAnchor::Mrca);
        assert!(config.scoring.exclude_pathogenic_from_m5);
        assert_eq!(config.scoring.metric_threads, None);
        assert_eq!(config.calibration.seed, 42);
        assert_eq!(
            config.resolve(&config.tree_mapping_path),
            PathBuf::from("/tmp/guilds/data/mixgb_wfo_to_tree_mapping_11711.csv")
        );
    }
}
