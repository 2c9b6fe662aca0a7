//! M1: Pest & Pathogen Independence
//!
//! Scores phylogenetic diversity using Faith's PD as a proxy for pest/pathogen
//! risk reduction. Higher diversity (more evolutionary distance) = lower risk.
//!
//! Ecological Rationale:
//! - Host specificity: Most pests are genus/family-specific
//! - Dilution effect: Non-host plants reduce pest transmission
//! - Associational resistance: Non-hosts interfere with pest foraging

use serde::Serialize;

use crate::config::PdAnchor;
use crate::error::ScoringResult;
use crate::phylo_tree::PhylogeneticTree;
use crate::types::GuildMember;

/// Decay constant for the exponential risk transform
const K: f64 = 0.001;

/// M1 calculation result
#[derive(Debug, Clone, Serialize)]
pub struct M1Result {
    /// Pest risk, exp(-K × PD); 1.0 is the worst case
    pub raw: f64,
    pub faiths_pd: f64,
    /// Members with a tree tip
    pub n_mapped: usize,
    /// Members skipped because they have no tree tip
    pub unmapped: Vec<String>,
}

/// Calculate M1: Pest & Pathogen Independence
///
/// Guilds with fewer than two members (or fewer than two mapped tips) have
/// no diversity and get the maximum risk of 1.0.
pub fn calculate_m1(
    members: &[GuildMember],
    tree: &PhylogeneticTree,
    anchor: PdAnchor,
) -> ScoringResult<M1Result> {
    if members.len() < 2 {
        return Ok(M1Result {
            raw: 1.0,
            faiths_pd: 0.0,
            n_mapped: 0,
            unmapped: Vec::new(),
        });
    }

    let mut nodes = Vec::with_capacity(members.len());
    let mut unmapped = Vec::new();
    for member in members {
        match tree.node_for(member.id()) {
            Ok(node) => nodes.push(node),
            Err(err) => {
                tracing::warn!("{}; tip skipped", err);
                unmapped.push(member.id().to_string());
            }
        }
    }

    let faiths_pd = if nodes.len() < 2 {
        0.0
    } else {
        tree.diversity_of_nodes(&nodes, anchor)
    };

    Ok(M1Result {
        raw: libm::exp(-K * faiths_pd),
        faiths_pd,
        n_mapped: nodes.len(),
        unmapped,
    })
}
