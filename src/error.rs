//! Error taxonomy for the scoring path
//!
//! Loaders and binaries use `anyhow` with context. Everything reachable from
//! `GuildScorer::score` returns [`ScoringError`] so callers can tell bad data,
//! missing calibration and rejected guilds apart.

use thiserror::Error;

/// Scope label used for errors raised before any metric runs
pub const GUILD_SCOPE: &str = "guild";

/// Errors raised while scoring a guild
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoringError {
    /// Missing required field, malformed record or unmapped tree tip
    #[error("{metric}: plant '{plant_id}' field '{field}': {reason}")]
    Data {
        metric: &'static str,
        plant_id: String,
        field: &'static str,
        reason: String,
    },

    /// Calibration zone or metric key absent
    #[error("{metric}: no calibration '{key}' for zone '{zone}': {reason}")]
    Config {
        metric: &'static str,
        zone: String,
        key: String,
        reason: String,
    },

    /// Guild rejected before scoring
    #[error("{metric}: invalid guild: {reason}")]
    GuildValidation {
        metric: &'static str,
        reason: GuildValidationError,
    },
}

/// Reasons a guild is rejected
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GuildValidationError {
    #[error("guild is empty")]
    Empty,

    #[error("plant '{plant_id}' appears more than once")]
    DuplicatePlant { plant_id: String },

    #[error("plant '{plant_id}' is not in the dataset")]
    UnknownPlant { plant_id: String },

    #[error("plants {plant_ids:?} share no climate zone")]
    NoSharedClimateZone { plant_ids: Vec<String> },

    #[error("plants {plant_ids:?} are not in climate zone '{zone}'")]
    ZoneNotShared { zone: String, plant_ids: Vec<String> },
}

impl ScoringError {
    pub fn missing_field(metric: &'static str, plant_id: &str, field: &'static str) -> Self {
        ScoringError::Data {
            metric,
            plant_id: plant_id.to_string(),
            field,
            reason: "required value is missing".to_string(),
        }
    }

    pub fn invalid_guild(reason: GuildValidationError) -> Self {
        ScoringError::GuildValidation {
            metric: GUILD_SCOPE,
            reason,
        }
    }

    /// Metric (or scope) the error was raised in
    pub fn metric(&self) -> &'static str {
        match self {
            ScoringError::Data { metric, .. }
            | ScoringError::Config { metric, .. }
            | ScoringError::GuildValidation { metric, .. } => metric,
        }
    }
}

pub type ScoringResult<T> = std::result::Result<T, ScoringError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_error_names_field_and_plant() {
        let err = ScoringError::missing_field("m2", "wfo-0000832453", "CSR_C");
        let msg = err.to_string();
        assert!(msg.contains("m2"));
        assert!(msg.contains("wfo-0000832453"));
        assert!(msg.contains("CSR_C"));
        assert_eq!(err.metric(), "m2");
    }

    #[test]
    fn test_guild_validation_scope() {
        let err = ScoringError::invalid_guild(GuildValidationError::Empty);
        assert_eq!(err.metric(), GUILD_SCOPE);
        assert_eq!(err.to_string(), "guild: invalid guild: guild is empty");
    }
}
