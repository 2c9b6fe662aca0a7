//! METRIC 5: BENEFICIAL FUNGI NETWORKS (MYCORRHIZAE & ENDOPHYTES)
//!
//! Scores Common Mycorrhizal Networks and individual fungal associations
//! using shared organism counting and coverage analysis.
//!
//! **Categories counted**: AMF, EMF, endophytic, saprotrophic.
//!
//! A fungus can be listed as beneficial on one plant and pathogenic on
//! another. By default it still counts here; `exclude` lets the caller drop
//! such fungi (see `ScoringOptions::exclude_pathogenic_from_m5`).

use rustc_hash::FxHashSet;
use serde::Serialize;
use smallvec::SmallVec;
use std::collections::BTreeMap;

use crate::types::GuildMember;
use crate::utils::{count_plants_with_any, count_shared_organisms, sorted_counts};

const NETWORK_WEIGHT: f64 = 0.6;
const COVERAGE_WEIGHT: f64 = 0.4;

/// Result of M5 calculation
#[derive(Debug, Clone, Serialize)]
pub struct M5Result {
    /// Combined network + coverage score
    pub raw: f64,
    /// Network connectivity score
    pub network_score: f64,
    /// Fraction of plants with beneficial fungi
    pub coverage_ratio: f64,
    /// Number of fungi hosted by ≥2 plants
    pub n_shared_fungi: usize,
    /// Number of plants with beneficial fungi
    pub plants_with_fungi: usize,
    /// Map of fungus_name → plant_count
    pub fungi_counts: BTreeMap<String, usize>,
    /// Fungi left out because they are also recorded as pathogens
    pub excluded_fungi: Vec<String>,
}

/// Calculate M5: Beneficial Fungi Networks
pub fn calculate_m5(members: &[GuildMember], exclude: Option<&FxHashSet<String>>) -> M5Result {
    let n_plants = members.len().max(1) as f64;
    let keep = |org: &str| exclude.map_or(true, |set| !set.contains(org));

    let counts = sorted_counts(&count_shared_organisms(members, beneficial_lists, keep));

    // COMPONENT 1: Network score (weight 0.6)
    let mut network_raw = 0.0;
    let mut n_shared_fungi = 0;
    for count in counts.values() {
        if *count >= 2 {
            network_raw += *count as f64 / n_plants;
            n_shared_fungi += 1;
        }
    }

    // COMPONENT 2: Coverage ratio (weight 0.4)
    let plants_with_fungi = count_plants_with_any(members, beneficial_lists, keep);
    let coverage_ratio = plants_with_fungi as f64 / n_plants;

    let mut excluded_fungi: Vec<String> = match exclude {
        Some(set) => members
            .iter()
            .flat_map(|m| m.beneficial_fungi())
            .flatten()
            .filter(|org| set.contains(org.as_str()))
            .cloned()
            .collect(),
        None => Vec::new(),
    };
    excluded_fungi.sort_unstable();
    excluded_fungi.dedup();

    M5Result {
        raw: network_raw * NETWORK_WEIGHT + coverage_ratio * COVERAGE_WEIGHT,
        network_score: network_raw,
        coverage_ratio,
        n_shared_fungi,
        plants_with_fungi,
        fungi_counts: counts,
        excluded_fungi,
    }
}

fn beneficial_lists<'a>(member: &GuildMember<'a>) -> SmallVec<[&'a [String]; 4]> {
    SmallVec::from_slice(&member.beneficial_fungi())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FungalProfile, Plant};
    use approx::assert_relative_eq;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn fixture() -> ([Plant; 4], [FungalProfile; 4]) {
        let plants = [
            Plant::new("a", "A"),
            Plant::new("b", "B"),
            Plant::new("c", "C"),
            Plant::new("d", "D"),
        ];
        let fungi = [
            FungalProfile { amf: names(&["glomus"]), endophytic: names(&["fusarium"]), ..Default::default() },
            FungalProfile { amf: names(&["glomus"]), saprotrophic: names(&["fusarium"]), ..Default::default() },
            FungalProfile { emf: names(&["glomus", "tuber"]), ..Default::default() },
            FungalProfile::default(),
        ];
        (plants, fungi)
    }

    #[test]
    fn test_network_and_coverage() {
        let (plants, fungi) = fixture();
        let members: Vec<GuildMember> = (0..4)
            .map(|i| GuildMember { plant: &plants[i], organisms: None, fungi: Some(&fungi[i]) })
            .collect();

        let result = calculate_m5(&members, None);
        // glomus on 3/4, fusarium on 2/4; tuber alone
        assert_relative_eq!(result.network_score, 0.75 + 0.5, epsilon = 1e-12);
        assert_relative_eq!(result.coverage_ratio, 0.75, epsilon = 1e-12);
        assert_relative_eq!(result.raw, 1.25 * 0.6 + 0.75 * 0.4, epsilon = 1e-12);
        assert_eq!(result.n_shared_fungi, 2);
        assert!(result.excluded_fungi.is_empty());
    }

    #[test]
    fn test_pathogenic_exclusion_flag() {
        let (plants, fungi) = fixture();
        let members: Vec<GuildMember> = (0..4)
            .map(|i| GuildMember { plant: &plants[i], organisms: None, fungi: Some(&fungi[i]) })
            .collect();
        let pathogenic: FxHashSet<String> = ["fusarium".to_string()].into_iter().collect();

        let result = calculate_m5(&members, Some(&pathogenic));
        assert_relative_eq!(result.network_score, 0.75, epsilon = 1e-12);
        assert_relative_eq!(result.coverage_ratio, 0.75, epsilon = 1e-12);
        assert_eq!(result.excluded_fungi, vec!["fusarium".to_string()]);
        assert_eq!(result.fungi_counts.get("fusarium"), None);
    }
}
