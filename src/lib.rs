//! Guild Scorer
//!
//! Scores combinations of plant species ("guilds") for ecological
//! compatibility: seven independent metrics, each percentile-normalized
//! against Köppen climate zone calibrations and averaged into a 0-100 score.
//!
//! - `data`: source tables loaded with Polars, projected into typed records
//! - `phylo_tree`: Faith's phylogenetic diversity over a rooted tree
//! - `metrics/`: individual metric implementations (M1-M7)
//! - `utils/`: normalization and organism counting utilities
//! - `scorer`: validation, parallel metric fan-out and aggregation
//! - `calibration`: random-guild percentile calibration

pub mod calibration;
pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod phylo_tree;
pub mod scorer;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use calibration::{CalibrationBuilder, CalibrationRun, ClimateOrganizer, ZoneReport};
pub use config::{CalibrationConfig, PdAnchor, ScorerConfig, ScoringOptions};
pub use data::{GuildData, LookupTable};
pub use error::{GuildValidationError, ScoringError, ScoringResult};
pub use metrics::*;
pub use phylo_tree::PhylogeneticTree;
pub use scorer::{GuildScore, GuildScorer, ScoringContext};
pub use types::{ClimateZone, CsrStrategy, FungalProfile, GuildMember, OrganismProfile, Plant, ZoneSet};
pub use utils::{csr_percentile, CalibrationTable, CsrCalibration, PercentileParams};
