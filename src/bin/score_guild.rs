//! Score one guild and print the result as JSON
//!
//! Usage: score_guild [--zone tier_3_humid_temperate] wfo-0000832453 wfo-0000649136 ...
//! Data locations come from DATA_DIR / CALIBRATION_PATH (see `ScorerConfig`).

use anyhow::{bail, Context, Result};
use guild_scorer::{ClimateZone, GuildScorer, ScorerConfig};
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "guild_scorer=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = ScorerConfig::from_env()?;
    let mut zone = config.climate_zone;
    let mut plant_ids = Vec::new();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--zone" {
            let name = args.next().context("--zone needs a value")?;
            zone = ClimateZone::parse(&name)
                .with_context(|| format!("'{}' is not a known climate zone", name))?;
        } else {
            plant_ids.push(arg);
        }
    }
    if plant_ids.is_empty() {
        bail!("usage: score_guild [--zone <tier>] <wfo_id>...");
    }

    let init_start = Instant::now();
    let scorer = GuildScorer::from_config(&config)?;
    tracing::info!(seconds = init_start.elapsed().as_secs_f64(), "Scorer initialized");

    let score_start = Instant::now();
    let score = scorer.score(plant_ids.as_slice(), zone)?;
    tracing::info!(
        micros = score_start.elapsed().as_micros() as u64,
        overall = score.overall_score,
        "Guild scored"
    );

    println!("{}", serde_json::to_string_pretty(&score)?);
    Ok(())
}
