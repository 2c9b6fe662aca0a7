//! METRIC 4: DISEASE SUPPRESSION
//!
//! Scores natural disease control provided by mycoparasitic fungi and
//! fungivorous animals. Pairwise like M3: pathogens on the vulnerable plant,
//! antagonists on the protective plant.

use serde::Serialize;
use smallvec::SmallVec;
use std::collections::BTreeMap;

use crate::data::LookupTable;
use crate::metrics::m3_insect_control::find_matches;
use crate::types::GuildMember;
use crate::utils::{count_shared_organisms, sorted_counts};

/// Scale applied to the per-pair control density
const SCALE: f64 = 10.0;

const GENERAL_MYCOPARASITE_WEIGHT: f64 = 0.5;
const GENERAL_FUNGIVORE_WEIGHT: f64 = 0.2;

/// Result of M4 calculation
#[derive(Debug, Clone, Serialize)]
pub struct M4Result {
    /// Normalized pathogen control score (scaled by guild size)
    pub raw: f64,
    /// Total pathogen control before normalization
    pub pathogen_control_raw: f64,
    /// Number of mechanisms detected
    pub n_mechanisms: usize,
    /// Map of mycoparasite_name → plant_count (known antagonists only)
    pub mycoparasite_counts: BTreeMap<String, usize>,
    /// Map of fungivore_name → plant_count (known antagonists only)
    pub fungivore_counts: BTreeMap<String, usize>,
    /// Map of pathogen_name → plant_count
    pub pathogen_counts: BTreeMap<String, usize>,
    /// Count of specific fungal antagonist matches (pathogen → known mycoparasite)
    pub specific_antagonist_matches: usize,
    /// Count of specific fungivore matches (pathogen → known fungivore)
    pub specific_fungivore_matches: usize,
    /// List of matched (pathogen, antagonist) pairs
    pub matched_antagonist_pairs: Vec<(String, String)>,
    /// List of matched (pathogen, fungivore) pairs
    pub matched_fungivore_pairs: Vec<(String, String)>,
}

/// Calculate M4: Disease Suppression
///
/// Every ordered pair (A vulnerable, B protective, A ≠ B) where A has
/// pathogens earns:
///   1. 1.0 per mycoparasite on B known to antagonize one of A's pathogens
///   2. 1.0 per fungivore on B known to antagonize one of A's pathogens
///   3. 0.5 per mycoparasite on B
///   4. 0.2 per fungivore on B
pub fn calculate_m4(members: &[GuildMember], pathogen_antagonists: &LookupTable) -> M4Result {
    let n_plants = members.len();
    let mut pathogen_control_raw = 0.0;
    let mut n_mechanisms = 0;
    let mut specific_antagonist_matches = 0;
    let mut specific_fungivore_matches = 0;
    let mut matched_antagonist_pairs: Vec<(String, String)> = Vec::new();
    let mut matched_fungivore_pairs: Vec<(String, String)> = Vec::new();

    for (a, plant_a) in members.iter().enumerate() {
        let pathogens_a = plant_a.pathogens();
        if pathogens_a.is_empty() {
            continue;
        }

        for (b, plant_b) in members.iter().enumerate() {
            if a == b {
                continue;
            }

            let mycoparasites_b = plant_b.mycoparasites();
            let fungivores_b = plant_b.fungivores();

            // MECHANISMS 1 & 2: Specific antagonists (weight 1.0)
            for pathogen in pathogens_a {
                let Some(antagonists) = pathogen_antagonists.get(pathogen) else {
                    continue;
                };

                let matched_fungi = find_matches(mycoparasites_b, antagonists);
                if !matched_fungi.is_empty() {
                    pathogen_control_raw += matched_fungi.len() as f64;
                    n_mechanisms += 1;
                    specific_antagonist_matches += 1;
                    for fungus in matched_fungi {
                        matched_antagonist_pairs.push((pathogen.clone(), fungus.to_string()));
                    }
                }

                let matched_animals = find_matches(fungivores_b, antagonists);
                if !matched_animals.is_empty() {
                    pathogen_control_raw += matched_animals.len() as f64;
                    n_mechanisms += 1;
                    specific_fungivore_matches += 1;
                    for animal in matched_animals {
                        matched_fungivore_pairs.push((pathogen.clone(), animal.to_string()));
                    }
                }
            }

            // MECHANISM 3: General mycoparasites (weight 0.5)
            if !mycoparasites_b.is_empty() {
                pathogen_control_raw += mycoparasites_b.len() as f64 * GENERAL_MYCOPARASITE_WEIGHT;
                n_mechanisms += 1;
            }

            // MECHANISM 4: General fungivores eating pathogens (weight 0.2)
            if !fungivores_b.is_empty() {
                pathogen_control_raw += fungivores_b.len() as f64 * GENERAL_FUNGIVORE_WEIGHT;
                n_mechanisms += 1;
            }
        }
    }

    let max_pairs = n_plants * n_plants.saturating_sub(1);
    let pathogen_control_normalized = if max_pairs > 0 {
        pathogen_control_raw / max_pairs as f64 * SCALE
    } else {
        0.0
    };

    let mycoparasite_counts = count_shared_organisms(
        members,
        |m| SmallVec::from_slice(&[m.mycoparasites()]),
        |org| pathogen_antagonists.is_agent(org),
    );
    let fungivore_counts = count_shared_organisms(
        members,
        |m| SmallVec::from_slice(&[m.fungivores()]),
        |org| pathogen_antagonists.is_agent(org),
    );
    let pathogen_counts = count_shared_organisms(members, |m| SmallVec::from_slice(&[m.pathogens()]), |_| true);

    matched_antagonist_pairs.sort_unstable();
    matched_antagonist_pairs.dedup();
    matched_fungivore_pairs.sort_unstable();
    matched_fungivore_pairs.dedup();

    M4Result {
        raw: pathogen_control_normalized,
        pathogen_control_raw,
        n_mechanisms,
        mycoparasite_counts: sorted_counts(&mycoparasite_counts),
        fungivore_counts: sorted_counts(&fungivore_counts),
        pathogen_counts: sorted_counts(&pathogen_counts),
        specific_antagonist_matches,
        specific_fungivore_matches,
        matched_antagonist_pairs,
        matched_fungivore_pairs,
    }
}
