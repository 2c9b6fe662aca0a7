//! Shared Organism Counter Utility
//!
//! Counts how many plants in a guild share each organism (pollinator, fungus, etc.).
//! Used by M3/M4 for agent counts, M5 (Beneficial Fungi) and M7 (Pollinator
//! Support) for network analysis.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::collections::BTreeMap;

use crate::types::GuildMember;

/// Count organisms shared across plants in a guild
///
/// `lists` returns the relation lists to aggregate for one member (e.g. the
/// four beneficial fungal categories). An organism listed several times for
/// the same plant counts once for that plant. `keep` filters organisms
/// before counting.
///
/// Returns a map of organism → plant_count
pub fn count_shared_organisms<'a, L, K>(
    members: &[GuildMember<'a>],
    lists: L,
    keep: K,
) -> FxHashMap<&'a str, usize>
where
    L: Fn(&GuildMember<'a>) -> SmallVec<[&'a [String]; 4]>,
    K: Fn(&str) -> bool,
{
    let mut counts: FxHashMap<&'a str, usize> = FxHashMap::default();

    for member in members {
        // Most plants have < 16 organisms per relation
        let mut plant_organisms: SmallVec<[&'a str; 16]> = SmallVec::new();

        for list in lists(member) {
            for org in list.iter() {
                if !org.is_empty() && keep(org.as_str()) {
                    plant_organisms.push(org.as_str());
                }
            }
        }

        // Deduplicate organisms for this plant
        plant_organisms.sort_unstable();
        plant_organisms.dedup();

        for org in plant_organisms {
            *counts.entry(org).or_insert(0) += 1;
        }
    }

    counts
}

/// Owned, name-ordered copy of a count map for result payloads
pub fn sorted_counts(counts: &FxHashMap<&str, usize>) -> BTreeMap<String, usize> {
    counts.iter().map(|(org, n)| (org.to_string(), *n)).collect()
}

/// Number of members with at least one kept organism in the given lists
pub fn count_plants_with_any<'a, L, K>(members: &[GuildMember<'a>], lists: L, keep: K) -> usize
where
    L: Fn(&GuildMember<'a>) -> SmallVec<[&'a [String]; 4]>,
    K: Fn(&str) -> bool,
{
    members
        .iter()
        .filter(|&member| lists(member).iter().any(|list| list.iter().any(|org| keep(org.as_str()))))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrganismProfile, Plant};
    use smallvec::smallvec;

    fn profile(pollinators: &[&str], herbivores: &[&str]) -> OrganismProfile {
        OrganismProfile {
            pollinators: pollinators.iter().map(|s| s.to_string()).collect(),
            herbivores: herbivores.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_count_shared_organisms() {
        let plants = [Plant::new("plant_a", "A"), Plant::new("plant_b", "B"), Plant::new("plant_c", "C")];
        let profiles = [
            profile(&["bee_1", "bee_2", "butterfly_1"], &[]),
            profile(&["bee_1", "fly_1"], &[]),
            profile(&["bee_1", "butterfly_1", "fly_2"], &[]),
        ];
        let members: Vec<GuildMember> = plants
            .iter()
            .zip(profiles.iter())
            .map(|(plant, organisms)| GuildMember { plant, organisms: Some(organisms), fungi: None })
            .collect();

        let counts = count_shared_organisms(&members, |m| smallvec![m.pollinators()], |_| true);

        // bee_1 should appear in all 3 plants
        assert_eq!(counts.get("bee_1"), Some(&3));
        // butterfly_1 should appear in 2 plants (a, c)
        assert_eq!(counts.get("butterfly_1"), Some(&2));
        assert_eq!(counts.get("bee_2"), Some(&1));
        assert_eq!(counts.get("fly_1"), Some(&1));
    }

    #[test]
    fn test_count_multiple_lists_counts_plant_once() {
        let plants = [Plant::new("plant_a", "A"), Plant::new("plant_b", "B")];
        let profiles = [profile(&["bee_1", "bee_2"], &["bee_1"]), profile(&["bee_1"], &[])];
        let members: Vec<GuildMember> = plants
            .iter()
            .zip(profiles.iter())
            .map(|(plant, organisms)| GuildMember { plant, organisms: Some(organisms), fungi: None })
            .collect();

        let counts = count_shared_organisms(
            &members,
            |m| smallvec![m.pollinators(), m.herbivores()],
            |org| org != "bee_2",
        );
        assert_eq!(counts.get("bee_1"), Some(&2));
        assert_eq!(counts.get("bee_2"), None);

        let with_any = count_plants_with_any(&members, |m| smallvec![m.herbivores()], |_| true);
        assert_eq!(with_any, 1);
    }
}
