//! METRIC 6: STRUCTURAL DIVERSITY (VERTICAL STRATIFICATION)
//!
//! Scores vertical stratification quality and growth form diversity.
//! Validates that height differences are compatible with light preferences.
//!
//! **Fields used**:
//!   1. height_m        - stratification analysis (default 1.0 m)
//!   2. light_pref      - EIVE-L of the shorter plant (missing = neutral credit)
//!   3. try_growth_form - diversity scoring and vine/tree complementarity

use rustc_hash::FxHashSet;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::types::GuildMember;

const DEFAULT_HEIGHT_M: f64 = 1.0;
/// Minimum height gap that counts as a separate canopy layer
const LAYER_GAP_M: f64 = 2.0;
/// Distinct growth forms needed for full form diversity
const MAX_FORMS: f64 = 6.0;

/// Plant with height and light preference information
#[derive(Debug, Clone, Serialize)]
pub struct PlantHeight {
    pub name: String,
    pub height_m: f64,
    pub light_pref: Option<f64>,
}

/// Plants sharing a growth form
#[derive(Debug, Clone, Serialize)]
pub struct GrowthFormGroup {
    pub form_name: String,
    pub plants: Vec<PlantHeight>,
    pub height_range: (f64, f64),
}

/// Result of M6 calculation
#[derive(Debug, Clone, Serialize)]
pub struct M6Result {
    /// Combined stratification + form diversity score
    pub raw: f64,
    /// Tallest minus shortest known height
    pub height_range: f64,
    /// Number of distinct growth forms
    pub n_forms: usize,
    pub stratification_quality: f64,
    pub form_diversity: f64,
    pub growth_form_groups: Vec<GrowthFormGroup>,
}

/// Calculate M6: Structural Diversity
pub fn calculate_m6(members: &[GuildMember]) -> M6Result {
    // Stable sort by height, missing heights at the default
    let mut sorted: Vec<&GuildMember> = members.iter().collect();
    sorted.sort_by(|a, b| height_of(a).total_cmp(&height_of(b)));

    // COMPONENT 1: Light-validated height stratification (70%)
    let mut valid_stratification = 0.0;
    let mut invalid_stratification = 0.0;

    for (i, short) in sorted.iter().enumerate() {
        for tall in &sorted[i + 1..] {
            let height_diff = height_of(tall) - height_of(short);
            if height_diff <= LAYER_GAP_M {
                continue;
            }

            // Climbers use the tree instead of competing for its light
            if short.plant.is_climber() && tall.plant.is_tree() {
                valid_stratification += height_diff;
                continue;
            }

            match short.plant.light_pref {
                None => {
                    // Conservative: neutral/flexible (missing data)
                    valid_stratification += height_diff * 0.5;
                }
                Some(light) if light < 3.2 => {
                    // Shade-tolerant: can thrive under canopy
                    valid_stratification += height_diff;
                }
                Some(light) if light > 7.47 => {
                    // Sun-loving: will be shaded out
                    invalid_stratification += height_diff;
                }
                Some(_) => {
                    // Flexible: partial compatibility
                    valid_stratification += height_diff * 0.6;
                }
            }
        }
    }

    // Stratification quality: valid / total
    let total_height_diffs = valid_stratification + invalid_stratification;
    let stratification_quality = if total_height_diffs > 0.0 {
        valid_stratification / total_height_diffs
    } else {
        0.0 // No vertical diversity
    };

    // COMPONENT 2: Form diversity (30%)
    let unique_forms: FxHashSet<&str> = members
        .iter()
        .map(|m| m.plant.growth_form_str())
        .filter(|form| !form.is_empty())
        .collect();
    let n_forms = unique_forms.len();
    let form_diversity = if n_forms > 0 {
        ((n_forms - 1) as f64 / (MAX_FORMS - 1.0)).min(1.0)
    } else {
        0.0
    };

    // Combined (70% light-validated height, 30% form)
    let raw = 0.7 * stratification_quality + 0.3 * form_diversity;

    // Height range over plants with a recorded height
    let known_heights: Vec<f64> = members.iter().filter_map(|m| m.plant.height_m).collect();
    let height_range = if known_heights.len() >= 2 {
        known_heights.iter().copied().fold(f64::NEG_INFINITY, f64::max)
            - known_heights.iter().copied().fold(f64::INFINITY, f64::min)
    } else {
        0.0
    };

    M6Result {
        raw,
        height_range,
        n_forms,
        stratification_quality,
        form_diversity,
        growth_form_groups: group_by_form(members),
    }
}

fn height_of(member: &GuildMember) -> f64 {
    member.plant.height_m.unwrap_or(DEFAULT_HEIGHT_M)
}

/// Group plants by growth form with heights and light preferences
fn group_by_form(members: &[GuildMember]) -> Vec<GrowthFormGroup> {
    let mut form_groups: BTreeMap<&str, Vec<PlantHeight>> = BTreeMap::new();

    for member in members {
        let form = member.plant.growth_form_str();
        if form.is_empty() {
            continue;
        }
        form_groups.entry(form).or_default().push(PlantHeight {
            name: member.plant.scientific_name.clone(),
            height_m: height_of(member),
            light_pref: member.plant.light_pref,
        });
    }

    form_groups
        .into_iter()
        .map(|(form_name, plants)| {
            let min_height = plants.iter().map(|p| p.height_m).fold(f64::INFINITY, f64::min);
            let max_height = plants.iter().map(|p| p.height_m).fold(f64::NEG_INFINITY, f64::max);
            GrowthFormGroup {
                form_name: form_name.to_string(),
                plants,
                height_range: (min_height, max_height),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Plant;
    use approx::assert_relative_eq;

    fn plant(id: &str, height: Option<f64>, form: &str, light: Option<f64>) -> Plant {
        let mut p = Plant::new(id, id);
        p.height_m = height;
        if !form.is_empty() {
            p.growth_form = Some(form.to_string());
        }
        p.light_pref = light;
        p
    }

    fn members(plants: &[Plant]) -> Vec<GuildMember<'_>> {
        plants
            .iter()
            .map(|plant| GuildMember { plant, organisms: None, fungi: None })
            .collect()
    }

    #[test]
    fn test_light_validated_stratification() {
        let plants = [
            plant("canopy", Some(20.0), "tree", Some(7.0)),
            plant("shade", Some(1.0), "herb", Some(2.0)),
            plant("sun", Some(0.5), "herb", Some(8.0)),
        ];
        let result = calculate_m6(&members(&plants));
        // sun under shade: diff 0.5, ignored
        // sun under canopy: invalid 19.5
        // shade under canopy: valid 19.0
        assert_relative_eq!(result.stratification_quality, 19.0 / 38.5, epsilon = 1e-12);
        assert_relative_eq!(result.form_diversity, 0.2, epsilon = 1e-12);
        assert_relative_eq!(result.raw, 0.7 * 19.0 / 38.5 + 0.3 * 0.2, epsilon = 1e-12);
        assert_relative_eq!(result.height_range, 19.5, epsilon = 1e-12);
    }

    #[test]
    fn test_vine_under_tree_is_full_credit() {
        let plants = [
            plant("oak", Some(15.0), "tree", Some(6.0)),
            plant("grape", Some(3.0), "liana", Some(9.0)),
        ];
        let result = calculate_m6(&members(&plants));
        assert_relative_eq!(result.stratification_quality, 1.0);
    }

    #[test]
    fn test_missing_light_and_height_defaults() {
        let plants = [
            plant("tall", Some(10.0), "shrub", None),
            plant("unknown", None, "", None),
        ];
        let result = calculate_m6(&members(&plants));
        // default height 1.0, missing light → neutral 0.5 credit, no invalid
        assert_relative_eq!(result.stratification_quality, 1.0);
        assert_eq!(result.n_forms, 1);
        assert_eq!(result.form_diversity, 0.0);
        assert_eq!(result.height_range, 0.0);
    }

    #[test]
    fn test_form_diversity_is_capped() {
        let forms = ["tree", "shrub", "herb", "graminoid", "liana", "fern", "succulent"];
        let plants: Vec<Plant> = forms
            .iter()
            .map(|form| plant(form, Some(1.0), form, Some(5.0)))
            .collect();
        let result = calculate_m6(&members(&plants));
        assert_eq!(result.n_forms, 7);
        assert_eq!(result.form_diversity, 1.0);
        assert_eq!(result.stratification_quality, 0.0);
        assert_eq!(result.growth_form_groups.len(), 7);
    }
}
