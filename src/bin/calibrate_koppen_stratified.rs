//! Köppen-Stratified Calibration Pipeline
//!
//! 2-Stage Calibration:
//!   Stage 1: 2-plant pairs (M1, M2)
//!   Stage 2: 7-plant guilds (M1-M7)
//! The global CSR percentile table used by M2 is derived first and shared by
//! both stages.
//!
//! Usage: calibrate_koppen_stratified [config.json]
//! Without a config file, settings come from DATA_DIR / CLIMATE_TIER etc.

use anyhow::{Context, Result};
use guild_scorer::{CalibrationBuilder, CalibrationConfig, CalibrationRun, GuildScorer, ScorerConfig, ScoringContext};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    // Initialize tracing (structured logging)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "guild_scorer=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => ScorerConfig::from_file(Path::new(&path))?,
        None => ScorerConfig::from_env()?,
    };

    let total_start = Instant::now();
    tracing::info!("Initializing GuildScorer for calibration...");
    let scorer = GuildScorer::new(ScoringContext::load_for_calibration(&config)?)?;

    let output_dir = config.resolve(Path::new("phase5_output"));
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create output directory: {:?}", output_dir))?;

    // CSR (global, not tier-specific); already installed on the scorer
    let csr_path: Option<PathBuf> = match &scorer.context().csr_calibration {
        Some(csr) => {
            let path = output_dir.join("csr_percentile_calibration_global.json");
            csr.save(&path)?;
            tracing::info!("Saved: {:?}", path);
            Some(path)
        }
        None => None,
    };

    // STAGE 1: 2-PLANT PAIRS
    tracing::info!("STAGE 1: 2-plant pair calibration");
    let stage1_start = Instant::now();
    let pairs = CalibrationBuilder::new(&scorer, CalibrationConfig { guild_size: 2, ..config.calibration.clone() }).build();
    let stage1_time = stage1_start.elapsed();
    let path_2plant = output_dir.join("normalization_params_2plant.json");
    pairs.table.save(&path_2plant)?;
    tracing::info!("Saved: {:?}", path_2plant);

    // STAGE 2: N-PLANT GUILDS
    tracing::info!(guild_size = config.calibration.guild_size, "STAGE 2: guild calibration");
    let stage2_start = Instant::now();
    let guilds = CalibrationBuilder::new(&scorer, config.calibration.clone()).build();
    let stage2_time = stage2_start.elapsed();
    let path_guilds = output_dir.join(format!("normalization_params_{}plant.json", config.calibration.guild_size));
    guilds.table.save(&path_guilds)?;
    tracing::info!("Saved: {:?}", path_guilds);

    let total_time = total_start.elapsed();
    let manifest = json!({
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "seed": config.calibration.seed,
        "guilds_per_zone": config.calibration.guilds_per_zone,
        "stage1": stage_summary(&pairs, &path_2plant, stage1_time.as_secs_f64()),
        "stage2": stage_summary(&guilds, &path_guilds, stage2_time.as_secs_f64()),
        "csr_calibration": csr_path,
        "total_seconds": total_time.as_secs_f64(),
    });
    let manifest_path = output_dir.join("calibration_manifest.json");
    std::fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)
        .with_context(|| format!("Failed to write manifest: {:?}", manifest_path))?;

    tracing::info!(
        stage1_seconds = stage1_time.as_secs_f64(),
        stage2_seconds = stage2_time.as_secs_f64(),
        total_seconds = total_time.as_secs_f64(),
        "CALIBRATION COMPLETE"
    );
    Ok(())
}

fn stage_summary(run: &CalibrationRun, path: &Path, seconds: f64) -> serde_json::Value {
    json!({
        "output": path,
        "seconds": seconds,
        "zones": run.reports,
    })
}
