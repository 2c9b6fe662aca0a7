//! METRIC 7: POLLINATOR SUPPORT (SHARED POLLINATORS)
//!
//! Scores shared pollinator networks using quadratic weighting to reflect
//! non-linear benefits of high-overlap pollinator communities.
//!
//! **Data Quality Note**:
//!   - Uses ONLY the strict pollinator relation (GloBI 'pollinates')
//!   - Does NOT use flower visitors (contaminated with herbivores, mites and
//!     incidental fungi)

use serde::Serialize;
use smallvec::SmallVec;
use std::collections::BTreeMap;

use crate::types::GuildMember;
use crate::utils::{count_plants_with_any, count_shared_organisms, sorted_counts};

/// Result of M7 calculation
#[derive(Debug, Clone, Serialize)]
pub struct M7Result {
    /// Quadratic-weighted pollinator overlap score
    pub raw: f64,
    /// Number of pollinators visiting ≥2 plants
    pub n_shared_pollinators: usize,
    /// Number of plants with ≥1 documented pollinator
    pub plants_with_pollinators: usize,
    /// Total plants in guild
    pub total_plants: usize,
    /// Map of pollinator_name → plant_count
    pub pollinator_counts: BTreeMap<String, usize>,
}

/// Contribution of one pollinator visiting `visits` of `n_plants` members
pub fn pollinator_weight(visits: usize, n_plants: usize) -> f64 {
    if n_plants == 0 {
        return 0.0;
    }
    let overlap_ratio = visits as f64 / n_plants as f64;
    overlap_ratio.powi(2) // QUADRATIC benefit
}

/// Calculate M7: Pollinator Support
///
/// Sum of (plants visited by pollinator X / total plants)² over every
/// pollinator X visiting at least two members.
pub fn calculate_m7(members: &[GuildMember]) -> M7Result {
    let n_plants = members.len();
    let counts = sorted_counts(&count_shared_organisms(members, pollinator_lists, |_| true));

    let mut raw = 0.0;
    let mut n_shared_pollinators = 0;
    for count in counts.values() {
        if *count >= 2 {
            raw += pollinator_weight(*count, n_plants);
            n_shared_pollinators += 1;
        }
    }

    M7Result {
        raw,
        n_shared_pollinators,
        plants_with_pollinators: count_plants_with_any(members, pollinator_lists, |_| true),
        total_plants: n_plants,
        pollinator_counts: counts,
    }
}

fn pollinator_lists<'a>(member: &GuildMember<'a>) -> SmallVec<[&'a [String]; 4]> {
    SmallVec::from_slice(&[member.pollinators()])
}
