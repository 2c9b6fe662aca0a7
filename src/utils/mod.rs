//! Utility modules for guild scoring
//!
//! Contains shared functionality used across multiple metrics:
//! - Normalization: Percentile transformation
//! - Organism counting: Shared organism network analysis

pub mod normalization;
pub mod organism_counter;

// Re-export commonly used types
pub use normalization::{
    csr_percentile, CalibrationTable, CsrCalibration, CsrPercentileParams, PercentileParams,
    CSR_PERCENTILES, PERCENTILES,
};
pub use organism_counter::{count_plants_with_any, count_shared_organisms, sorted_counts};
