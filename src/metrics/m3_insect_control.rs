//! METRIC 3: BENEFICIAL INSECT NETWORKS (BIOCONTROL)
//!
//! Scores natural pest control provided by predators and entomopathogenic
//! fungi. Uses pairwise analysis to identify protective relationships
//! between vulnerable and protective plants.
//!
//! **Relations used**:
//!   - herbivores on the vulnerable plant
//!   - predators (hasHost ∪ interactsWith ∪ adjacentTo) on the protective plant
//!   - entomopathogenic fungi on the protective plant

use serde::Serialize;
use smallvec::SmallVec;
use std::collections::BTreeMap;

use crate::data::LookupTable;
use crate::types::GuildMember;
use crate::utils::{count_shared_organisms, sorted_counts};

/// Scale applied to the per-pair biocontrol density
const SCALE: f64 = 20.0;

/// Weight per entomopathogenic fungus for the general mechanism
const GENERAL_FUNGUS_WEIGHT: f64 = 0.2;

/// Result of M3 calculation
#[derive(Debug, Clone, Serialize)]
pub struct M3Result {
    /// Normalized biocontrol score (scaled by guild size)
    pub raw: f64,
    /// Total biocontrol before normalization
    pub biocontrol_raw: f64,
    /// Number of mechanisms detected
    pub n_mechanisms: usize,
    /// Map of predator_name → plant_count (known predators only)
    pub predator_counts: BTreeMap<String, usize>,
    /// Map of entomopathogenic_fungus_name → plant_count (known parasites only)
    pub entomo_fungi_counts: BTreeMap<String, usize>,
    /// Count of specific predator matches (herbivore → known predator)
    pub specific_predator_matches: usize,
    /// Count of specific fungi matches (herbivore → known fungus)
    pub specific_fungi_matches: usize,
    /// Pairs that earned the general entomopathogenic bonus
    pub general_fungi_pairs: usize,
    /// List of matched (herbivore, predator) pairs
    pub matched_predator_pairs: Vec<(String, String)>,
    /// List of matched (herbivore, fungus) pairs
    pub matched_fungi_pairs: Vec<(String, String)>,
}

/// Calculate M3: Beneficial Insect Networks (Biocontrol)
///
/// Every ordered pair (A vulnerable, B protective, A ≠ B) where A has
/// herbivores earns:
///   1. 1.0 per predator on B known to eat one of A's herbivores
///   2. 1.0 per entomopathogenic fungus on B known to attack one of A's herbivores
///   3. 0.2 per entomopathogenic fungus on B
pub fn calculate_m3(
    members: &[GuildMember],
    herbivore_predators: &LookupTable,
    insect_parasites: &LookupTable,
) -> M3Result {
    let n_plants = members.len();
    let mut biocontrol_raw = 0.0;
    let mut n_mechanisms = 0;
    let mut specific_predator_matches = 0;
    let mut specific_fungi_matches = 0;
    let mut general_fungi_pairs = 0;
    let mut matched_predator_pairs: Vec<(String, String)> = Vec::new();
    let mut matched_fungi_pairs: Vec<(String, String)> = Vec::new();

    // Predator union per member, computed once
    let predators: Vec<Vec<String>> = members.iter().map(|m| m.predators()).collect();

    // Pairwise analysis: vulnerable plant A vs protective plant B
    for (a, plant_a) in members.iter().enumerate() {
        let herbivores_a = plant_a.herbivores();
        if herbivores_a.is_empty() {
            continue; // Skip plants with no herbivores
        }

        for (b, plant_b) in members.iter().enumerate() {
            if a == b {
                continue; // Skip self-comparison
            }

            // MECHANISM 1: Specific animal predators (weight 1.0)
            let predators_b = &predators[b];
            for herbivore in herbivores_a {
                if let Some(known_predators) = herbivore_predators.get(herbivore) {
                    let matched = find_matches(predators_b, known_predators);
                    if !matched.is_empty() {
                        biocontrol_raw += matched.len() as f64;
                        n_mechanisms += 1;
                        specific_predator_matches += 1;
                        for pred in matched {
                            matched_predator_pairs.push((herbivore.clone(), pred.to_string()));
                        }
                    }
                }
            }

            // MECHANISMS 2 & 3: Entomopathogenic fungi
            let entomo_b = plant_b.entomopathogens();
            if entomo_b.is_empty() {
                continue;
            }

            // MECHANISM 2: Specific entomopathogenic fungi (weight 1.0)
            for herbivore in herbivores_a {
                if let Some(known_parasites) = insect_parasites.get(herbivore) {
                    let matched = find_matches(entomo_b, known_parasites);
                    if !matched.is_empty() {
                        biocontrol_raw += matched.len() as f64;
                        n_mechanisms += 1;
                        specific_fungi_matches += 1;
                        for fungus in matched {
                            matched_fungi_pairs.push((herbivore.clone(), fungus.to_string()));
                        }
                    }
                }
            }

            // MECHANISM 3: General entomopathogenic fungi (weight 0.2)
            biocontrol_raw += entomo_b.len() as f64 * GENERAL_FUNGUS_WEIGHT;
            general_fungi_pairs += 1;
        }
    }

    // Normalize by guild size
    let max_pairs = n_plants * n_plants.saturating_sub(1);
    let biocontrol_normalized = if max_pairs > 0 {
        biocontrol_raw / max_pairs as f64 * SCALE
    } else {
        0.0
    };

    // Agent networks, restricted to organisms the lookup tables know as agents
    let predator_counts = count_shared_organisms(
        members,
        |m| SmallVec::from_slice(&m.predator_lists()),
        |org| herbivore_predators.is_agent(org),
    );
    let entomo_fungi_counts = count_shared_organisms(
        members,
        |m| SmallVec::from_slice(&[m.entomopathogens()]),
        |org| insect_parasites.is_agent(org),
    );

    // Deduplicate matched pairs
    matched_predator_pairs.sort_unstable();
    matched_predator_pairs.dedup();
    matched_fungi_pairs.sort_unstable();
    matched_fungi_pairs.dedup();

    M3Result {
        raw: biocontrol_normalized,
        biocontrol_raw,
        n_mechanisms,
        predator_counts: sorted_counts(&predator_counts),
        entomo_fungi_counts: sorted_counts(&entomo_fungi_counts),
        specific_predator_matches,
        specific_fungi_matches,
        general_fungi_pairs,
        matched_predator_pairs,
        matched_fungi_pairs,
    }
}

/// Known agents present on the protective plant
///
/// No ordering is assumed for either list; each known agent matches once.
pub(crate) fn find_matches<'a>(present: &[String], known: &'a [String]) -> Vec<&'a str> {
    let mut matched: Vec<&'a str> = known
        .iter()
        .filter(|agent| present.contains(agent))
        .map(|agent| agent.as_str())
        .collect();
    matched.sort_unstable();
    matched.dedup();
    matched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FungalProfile, OrganismProfile, Plant};
    use approx::assert_relative_eq;
    use rustc_hash::FxHashMap;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn lookup(key: &str, values: &[&str]) -> LookupTable {
        let mut map: FxHashMap<String, Vec<String>> = FxHashMap::default();
        map.insert(key.to_string(), names(values));
        LookupTable::new(map)
    }

    #[test]
    fn test_mechanisms() {
        let plants = [Plant::new("a", "A"), Plant::new("b", "B")];
        let organisms = [
            OrganismProfile { herbivores: names(&["aphid"]), ..Default::default() },
            OrganismProfile {
                predators_has_host: names(&["ladybird"]),
                predators_adjacent_to: names(&["lacewing", "spider"]),
                ..Default::default()
            },
        ];
        let fungi = [
            FungalProfile::default(),
            FungalProfile { entomopathogenic: names(&["beauveria", "metarhizium"]), ..Default::default() },
        ];
        let members: Vec<GuildMember> = (0..2)
            .map(|i| GuildMember { plant: &plants[i], organisms: Some(&organisms[i]), fungi: Some(&fungi[i]) })
            .collect();

        let predators = lookup("aphid", &["ladybird", "lacewing", "hoverfly"]);
        let parasites = lookup("aphid", &["beauveria"]);

        let result = calculate_m3(&members, &predators, &parasites);

        // 2 predators + 1 specific fungus + 0.2 × 2 fungi, only A→B pair
        assert_relative_eq!(result.biocontrol_raw, 3.4, epsilon = 1e-12);
        assert_relative_eq!(result.raw, 3.4 / 2.0 * 20.0, epsilon = 1e-12);
        assert_eq!(result.specific_predator_matches, 1);
        assert_eq!(result.specific_fungi_matches, 1);
        assert_eq!(result.general_fungi_pairs, 1);
        assert_eq!(
            result.matched_predator_pairs,
            vec![("aphid".to_string(), "lacewing".to_string()), ("aphid".to_string(), "ladybird".to_string())]
        );
        // spider is observed but not a known biocontrol agent
        assert_eq!(result.predator_counts.get("spider"), None);
        assert_eq!(result.predator_counts.get("ladybird"), Some(&1));
        assert_eq!(result.entomo_fungi_counts.len(), 1);
    }

    #[test]
    fn test_no_herbivores_no_credit() {
        let plants = [Plant::new("a", "A"), Plant::new("b", "B")];
        let fungi = FungalProfile { entomopathogenic: names(&["beauveria"]), ..Default::default() };
        let members = vec![
            GuildMember { plant: &plants[0], organisms: None, fungi: Some(&fungi) },
            GuildMember { plant: &plants[1], organisms: None, fungi: Some(&fungi) },
        ];
        let result = calculate_m3(&members, &LookupTable::default(), &LookupTable::default());
        assert_eq!(result.raw, 0.0);
        assert_eq!(result.n_mechanisms, 0);
    }

    #[test]
    fn test_single_plant_is_zero() {
        let plants = [Plant::new("a", "A")];
        let organisms = OrganismProfile { herbivores: names(&["aphid"]), ..Default::default() };
        let members = vec![GuildMember { plant: &plants[0], organisms: Some(&organisms), fungi: None }];
        let result = calculate_m3(&members, &LookupTable::default(), &LookupTable::default());
        assert_eq!(result.raw, 0.0);
    }

    #[test]
    fn test_matches_do_not_depend_on_list_order() {
        let present = names(&["zoophthora", "metarhizium", "isaria", "beauveria", "isaria"]);
        let known = names(&["beauveria", "isaria"]);
        assert_eq!(find_matches(&present, &known), vec!["beauveria", "isaria"]);

        // Profile built by hand, not normalized at load time
        let plants = [Plant::new("a", "A"), Plant::new("b", "B")];
        let organisms = OrganismProfile { herbivores: names(&["aphid"]), ..Default::default() };
        let fungi = FungalProfile {
            entomopathogenic: names(&["zoophthora", "metarhizium", "isaria", "beauveria"]),
            ..Default::default()
        };
        let members = vec![
            GuildMember { plant: &plants[0], organisms: Some(&organisms), fungi: None },
            GuildMember { plant: &plants[1], organisms: None, fungi: Some(&fungi) },
        ];
        let result = calculate_m3(&members, &LookupTable::default(), &lookup("aphid", &["beauveria"]));
        assert_eq!(result.specific_fungi_matches, 1);
        // 1 specific + 0.2 × 4 fungi
        assert_relative_eq!(result.biocontrol_raw, 1.8, epsilon = 1e-12);
    }
}
