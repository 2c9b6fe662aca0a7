//! Phylogenetic tree with an LCA index for Faith's PD
//!
//! The tree is loaded once (Newick text or the compact binary dump) and never
//! mutated. At load time we precompute parent links, root distances, depths, a
//! DFS preorder and a binary-lifting ancestor table, so LCA queries are
//! O(log n) and Faith's PD of k tips costs O(k log k + k log n).
//!
//! PD anchored at the root uses the preorder trick: with tips sorted by DFS
//! position, the union of their root paths has length
//! `sum(rootdist[t]) - sum(rootdist[lca(t_i, t_i+1)])`.

use ahash::AHashMap;
use anyhow::{bail, Context, Result};
use polars::prelude::*;
use std::fs;
use std::path::Path;

use crate::config::PdAnchor;
use crate::error::{ScoringError, ScoringResult};
use crate::metrics::Metric;
use crate::types::fields;

/// Sentinel parent index of the root in the binary format
pub const NO_PARENT: u32 = u32::MAX;

/// Immutable rooted tree with weighted edges
#[derive(Debug, Clone)]
pub struct PhylogeneticTree {
    parent: Vec<u32>,
    children: Vec<Vec<u32>>,
    labels: Vec<String>,
    edge_length: Vec<f64>,
    root: u32,
    root_dist: Vec<f64>,
    depth: Vec<u32>,
    /// Position of each node in DFS preorder
    preorder: Vec<u32>,
    /// `ancestors[k][v]` is the 2^k-th ancestor of v (the root maps to itself)
    ancestors: Vec<Vec<u32>>,
    leaf_index: AHashMap<String, u32>,
    /// Plant id -> leaf node
    tip_index: AHashMap<String, u32>,
    num_leaves: usize,
}

impl PhylogeneticTree {
    /// Parse a Newick string
    ///
    /// Supports quoted labels, `[...]` comments and internal node labels.
    /// A missing branch length is taken as 0.
    pub fn from_newick(text: &str) -> Result<Self> {
        let chars: Vec<char> = text.chars().collect();
        let mut parent = vec![NO_PARENT];
        let mut children: Vec<Vec<u32>> = vec![Vec::new()];
        let mut labels = vec![String::new()];
        let mut lengths = vec![0.0f64];

        let new_child = |of: u32,
                         parent: &mut Vec<u32>,
                         children: &mut Vec<Vec<u32>>,
                         labels: &mut Vec<String>,
                         lengths: &mut Vec<f64>|
         -> u32 {
            let id = parent.len() as u32;
            parent.push(of);
            children.push(Vec::new());
            labels.push(String::new());
            lengths.push(0.0);
            children[of as usize].push(id);
            id
        };

        let mut current: u32 = 0;
        let mut i = 0;
        let mut terminated = false;

        while i < chars.len() {
            let c = chars[i];
            match c {
                '(' => {
                    current = new_child(current, &mut parent, &mut children, &mut labels, &mut lengths);
                    i += 1;
                }
                ',' => {
                    let up = parent[current as usize];
                    if up == NO_PARENT {
                        bail!("Newick: ',' outside of any clade at offset {}", i);
                    }
                    current = new_child(up, &mut parent, &mut children, &mut labels, &mut lengths);
                    i += 1;
                }
                ')' => {
                    let up = parent[current as usize];
                    if up == NO_PARENT {
                        bail!("Newick: unbalanced ')' at offset {}", i);
                    }
                    current = up;
                    i += 1;
                }
                ':' => {
                    let start = i + 1;
                    let mut end = start;
                    while end < chars.len() && !matches!(chars[end], ',' | ')' | ';' | '[') && !chars[end].is_whitespace() {
                        end += 1;
                    }
                    let number: String = chars[start..end].iter().collect();
                    lengths[current as usize] = number
                        .parse::<f64>()
                        .with_context(|| format!("Newick: bad branch length '{}' at offset {}", number, start))?;
                    i = end;
                }
                ';' => {
                    terminated = true;
                    break;
                }
                '[' => {
                    while i < chars.len() && chars[i] != ']' {
                        i += 1;
                    }
                    if i == chars.len() {
                        bail!("Newick: unterminated comment");
                    }
                    i += 1;
                }
                '\'' => {
                    let mut label = String::new();
                    i += 1;
                    loop {
                        if i >= chars.len() {
                            bail!("Newick: unterminated quoted label");
                        }
                        if chars[i] == '\'' {
                            // '' is an escaped quote
                            if i + 1 < chars.len() && chars[i + 1] == '\'' {
                                label.push('\'');
                                i += 2;
                                continue;
                            }
                            i += 1;
                            break;
                        }
                        label.push(chars[i]);
                        i += 1;
                    }
                    labels[current as usize] = label;
                }
                c if c.is_whitespace() => i += 1,
                _ => {
                    let start = i;
                    while i < chars.len()
                        && !matches!(chars[i], '(' | ')' | ',' | ':' | ';' | '[' | '\'')
                        && !chars[i].is_whitespace()
                    {
                        i += 1;
                    }
                    labels[current as usize] = chars[start..i].iter().collect();
                }
            }
        }

        if !terminated {
            bail!("Newick: missing terminating ';'");
        }
        if current != 0 {
            bail!("Newick: unbalanced parentheses");
        }

        Self::from_parts(parent, children, labels, lengths)
    }

    /// Read and parse a Newick file
    pub fn load_newick(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read tree file: {:?}", path))?;
        let tree = Self::from_newick(&text)
            .with_context(|| format!("Failed to parse tree file: {:?}", path))?;
        tracing::info!(
            nodes = tree.get_num_nodes(),
            leaves = tree.num_leaves(),
            "loaded Newick tree from {:?}",
            path
        );
        Ok(tree)
    }

    /// Read the compact binary dump
    pub fn from_binary(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .with_context(|| format!("Failed to read tree binary: {:?}", path))?;
        let tree = Self::from_binary_bytes(&bytes)
            .with_context(|| format!("Failed to decode tree binary: {:?}", path))?;
        tracing::info!(
            nodes = tree.get_num_nodes(),
            leaves = tree.num_leaves(),
            "loaded binary tree from {:?}",
            path
        );
        Ok(tree)
    }

    /// Decode the compact binary dump
    ///
    /// Layout (little endian): `u32 num_nodes`, `u32 num_leaves`, then per
    /// node `u32 parent` (`NO_PARENT` for the root), `u32 n_children`,
    /// `u32[n_children]`, `u32 label_len`, label bytes, `f32 edge_length`.
    pub fn from_binary_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader { bytes, pos: 0 };
        let num_nodes = reader.u32()? as usize;
        let declared_leaves = reader.u32()? as usize;

        let mut parent = Vec::with_capacity(num_nodes);
        let mut children = Vec::with_capacity(num_nodes);
        let mut labels = Vec::with_capacity(num_nodes);
        let mut lengths = Vec::with_capacity(num_nodes);

        for _ in 0..num_nodes {
            parent.push(reader.u32()?);
            let n_children = reader.u32()? as usize;
            let mut kids = Vec::with_capacity(n_children);
            for _ in 0..n_children {
                kids.push(reader.u32()?);
            }
            children.push(kids);
            let label_len = reader.u32()? as usize;
            let label = std::str::from_utf8(reader.take(label_len)?)
                .context("tree label is not UTF-8")?
                .to_string();
            labels.push(label);
            lengths.push(reader.f32()? as f64);
        }

        let tree = Self::from_parts(parent, children, labels, lengths)?;
        if tree.num_leaves() != declared_leaves {
            tracing::warn!(
                declared = declared_leaves,
                found = tree.num_leaves(),
                "binary tree header leaf count differs from structure"
            );
        }
        Ok(tree)
    }

    /// Build the ancestor index over a parent/children topology
    fn from_parts(
        parent: Vec<u32>,
        children: Vec<Vec<u32>>,
        labels: Vec<String>,
        edge_length: Vec<f64>,
    ) -> Result<Self> {
        let n = parent.len();
        if n == 0 {
            bail!("tree has no nodes");
        }

        let mut roots = parent.iter().enumerate().filter(|&(_, &p)| p == NO_PARENT);
        let root = match (roots.next(), roots.next()) {
            (Some((idx, _)), None) => idx as u32,
            (None, _) => bail!("tree has no root"),
            (Some(_), Some(_)) => bail!("tree has more than one root"),
        };

        for (node, kids) in children.iter().enumerate() {
            for &kid in kids {
                if kid as usize >= n || parent[kid as usize] != node as u32 {
                    bail!("node {} lists child {} whose parent link disagrees", node, kid);
                }
            }
        }

        let mut root_dist = vec![0.0; n];
        let mut depth = vec![0u32; n];
        let mut preorder = vec![u32::MAX; n];
        let mut stack = vec![root];
        let mut order = 0u32;
        let mut max_depth = 0u32;

        while let Some(node) = stack.pop() {
            let v = node as usize;
            preorder[v] = order;
            order += 1;
            // Push in reverse so children are visited left to right
            for &kid in children[v].iter().rev() {
                let k = kid as usize;
                root_dist[k] = root_dist[v] + edge_length[k];
                depth[k] = depth[v] + 1;
                max_depth = max_depth.max(depth[k]);
                stack.push(kid);
            }
        }

        if order as usize != n {
            bail!("tree is disconnected: reached {} of {} nodes", order, n);
        }

        let levels = (u32::BITS - max_depth.leading_zeros()).max(1) as usize;
        let mut ancestors = Vec::with_capacity(levels);
        ancestors.push(
            parent
                .iter()
                .enumerate()
                .map(|(v, &p)| if p == NO_PARENT { v as u32 } else { p })
                .collect::<Vec<u32>>(),
        );
        for k in 1..levels {
            let prev = &ancestors[k - 1];
            let next: Vec<u32> = (0..n).map(|v| prev[prev[v] as usize]).collect();
            ancestors.push(next);
        }

        let mut leaf_index = AHashMap::new();
        let mut num_leaves = 0;
        for (v, kids) in children.iter().enumerate() {
            if kids.is_empty() {
                num_leaves += 1;
                if !labels[v].is_empty() {
                    leaf_index.insert(labels[v].clone(), v as u32);
                }
            }
        }

        Ok(PhylogeneticTree {
            parent,
            children,
            labels,
            edge_length,
            root,
            root_dist,
            depth,
            preorder,
            ancestors,
            leaf_index,
            tip_index: AHashMap::new(),
            num_leaves,
        })
    }

    /// Attach a plant id -> tip label mapping
    ///
    /// Pairs whose tip is not a leaf of this tree are skipped and counted.
    pub fn with_tip_mapping<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let mut missing = 0usize;
        for (plant_id, tip) in pairs {
            match self.leaf_index.get(tip.as_ref()) {
                Some(&node) => {
                    self.tip_index.insert(plant_id.into(), node);
                }
                None => missing += 1,
            }
        }
        if missing > 0 {
            tracing::warn!(missing, "tip mapping entries not found among tree leaves");
        }
        self
    }

    /// Attach the mapping CSV (`wfo_taxon_id`, `tree_tip`)
    pub fn load_mapping(self, path: &Path) -> Result<Self> {
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.into()))?
            .finish()
            .with_context(|| format!("Failed to read tip mapping: {:?}", path))?;

        let ids = df.column("wfo_taxon_id")?.str()?;
        let tips = df.column(fields::TREE_TIP)?.str()?;

        let pairs: Vec<(String, String)> = ids
            .into_iter()
            .zip(tips.into_iter())
            .filter_map(|(id, tip)| match (id, tip) {
                (Some(id), Some(tip)) if !tip.is_empty() && tip != "NA" => {
                    Some((id.to_string(), tip.to_string()))
                }
                _ => None,
            })
            .collect();

        let tree = self.with_tip_mapping(pairs);
        tracing::info!(mapped = tree.tip_index.len(), "loaded tip mapping from {:?}", path);
        Ok(tree)
    }

    pub fn get_num_nodes(&self) -> usize {
        self.parent.len()
    }

    pub fn num_leaves(&self) -> usize {
        self.num_leaves
    }

    pub fn root(&self) -> u32 {
        self.root
    }

    pub fn label(&self, node: u32) -> &str {
        &self.labels[node as usize]
    }

    pub fn edge_length(&self, node: u32) -> f64 {
        self.edge_length[node as usize]
    }

    pub fn children(&self, node: u32) -> &[u32] {
        &self.children[node as usize]
    }

    pub fn root_distance(&self, node: u32) -> f64 {
        self.root_dist[node as usize]
    }

    /// Leaf with this label
    pub fn find_node_by_label(&self, label: &str) -> Option<u32> {
        self.leaf_index.get(label).copied()
    }

    /// Leaf mapped to a plant id
    pub fn node_for(&self, plant_id: &str) -> ScoringResult<u32> {
        self.tip_index.get(plant_id).copied().ok_or_else(|| ScoringError::Data {
            metric: Metric::M1.key(),
            plant_id: plant_id.to_string(),
            field: fields::TREE_TIP,
            reason: "no tree tip mapped to this plant".to_string(),
        })
    }

    /// Lowest common ancestor
    pub fn lca(&self, a: u32, b: u32) -> u32 {
        let (mut a, mut b) = (a as usize, b as usize);
        if self.depth[a] < self.depth[b] {
            std::mem::swap(&mut a, &mut b);
        }

        let mut diff = self.depth[a] - self.depth[b];
        let mut k = 0;
        while diff > 0 {
            if diff & 1 == 1 {
                a = self.ancestors[k][a] as usize;
            }
            diff >>= 1;
            k += 1;
        }
        if a == b {
            return a as u32;
        }

        for k in (0..self.ancestors.len()).rev() {
            let (up_a, up_b) = (self.ancestors[k][a], self.ancestors[k][b]);
            if up_a != up_b {
                a = up_a as usize;
                b = up_b as usize;
            }
        }
        self.ancestors[0][a]
    }

    /// Most recent common ancestor of a node set (`None` when empty)
    pub fn mrca(&self, nodes: &[u32]) -> Option<u32> {
        let (&first, rest) = nodes.split_first()?;
        Some(rest.iter().fold(first, |acc, &node| self.lca(acc, node)))
    }

    /// Patristic distance between two nodes
    pub fn pairwise_distance(&self, a: u32, b: u32) -> f64 {
        let lca = self.lca(a, b);
        self.root_dist[a as usize] + self.root_dist[b as usize] - 2.0 * self.root_dist[lca as usize]
    }

    /// Faith's PD of a node set under the given anchor
    pub fn diversity_of_nodes(&self, nodes: &[u32], anchor: PdAnchor) -> f64 {
        let mut sorted: Vec<u32> = nodes.to_vec();
        sorted.sort_unstable_by_key(|&v| self.preorder[v as usize]);
        sorted.dedup();

        if sorted.is_empty() {
            return 0.0;
        }

        let mut pd: f64 = sorted.iter().map(|&v| self.root_dist[v as usize]).sum();
        for pair in sorted.windows(2) {
            pd -= self.root_dist[self.lca(pair[0], pair[1]) as usize];
        }

        match anchor {
            PdAnchor::Root => pd.max(0.0),
            PdAnchor::Mrca => {
                let mrca = sorted.iter().skip(1).fold(sorted[0], |acc, &v| self.lca(acc, v));
                (pd - self.root_dist[mrca as usize]).max(0.0)
            }
        }
    }

    /// Faith's PD (root anchored) of the tips mapped to these plant ids
    pub fn diversity<S: AsRef<str>>(&self, plant_ids: &[S]) -> ScoringResult<f64> {
        let nodes = self.resolve(plant_ids)?;
        Ok(self.diversity_of_nodes(&nodes, PdAnchor::Root))
    }

    /// Faith's PD anchored at the MRCA of the mapped tips
    pub fn diversity_to_mrca<S: AsRef<str>>(&self, plant_ids: &[S]) -> ScoringResult<f64> {
        let nodes = self.resolve(plant_ids)?;
        Ok(self.diversity_of_nodes(&nodes, PdAnchor::Mrca))
    }

    fn resolve<S: AsRef<str>>(&self, plant_ids: &[S]) -> ScoringResult<Vec<u32>> {
        plant_ids.iter().map(|id| self.node_for(id.as_ref())).collect()
    }
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .with_context(|| format!("truncated tree binary at byte {}", self.pos))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn f32(&mut self) -> Result<f32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(f32::from_le_bytes(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // ((A:1,B:2)ab:3,(C:4,(D:1,E:1)de:2)cde:5)root;
    const NEWICK: &str = "((A:1,B:2)ab:3,(C:4,(D:1,E:1)de:2)cde:5)root;";

    fn tree() -> PhylogeneticTree {
        PhylogeneticTree::from_newick(NEWICK)
            .unwrap()
            .with_tip_mapping([("pa", "A"), ("pb", "B"), ("pc", "C"), ("pd", "D"), ("pe", "E")])
    }

    #[test]
    fn test_parse_counts() {
        let t = tree();
        assert_eq!(t.get_num_nodes(), 9);
        assert_eq!(t.num_leaves(), 5);
        assert_eq!(t.label(t.root()), "root");
        let d = t.find_node_by_label("D").unwrap();
        assert_relative_eq!(t.root_distance(d), 8.0);
    }

    #[test]
    fn test_known_diversity_values() {
        let t = tree();
        // A + B + edge ab
        assert_relative_eq!(t.diversity(&["pa", "pb"]).unwrap(), 6.0);
        // A path (4) + D path (8), nothing shared below the root
        assert_relative_eq!(t.diversity(&["pa", "pd"]).unwrap(), 12.0);
        // every edge in the tree
        assert_relative_eq!(t.diversity(&["pa", "pb", "pc", "pd", "pe"]).unwrap(), 19.0);
        assert_relative_eq!(t.diversity::<&str>(&[]).unwrap(), 0.0);
    }

    #[test]
    fn test_mrca_anchor() {
        let t = tree();
        assert_relative_eq!(t.diversity_to_mrca(&["pd", "pe"]).unwrap(), 2.0);
        assert_relative_eq!(t.diversity_to_mrca(&["pc", "pd", "pe"]).unwrap(), 8.0);
        assert_relative_eq!(t.diversity_to_mrca(&["pa"]).unwrap(), 0.0);
    }

    #[test]
    fn test_diversity_non_decreasing() {
        let t = tree();
        let ids = ["pe", "pa", "pc", "pb", "pd"];
        let mut previous = 0.0;
        for k in 1..=ids.len() {
            let pd = t.diversity(&ids[..k]).unwrap();
            assert!(pd >= 0.0);
            assert!(pd >= previous, "PD dropped from {} to {} at {} tips", previous, pd, k);
            previous = pd;
        }
    }

    #[test]
    fn test_lca_and_distance() {
        let t = tree();
        let a = t.find_node_by_label("A").unwrap();
        let d = t.find_node_by_label("D").unwrap();
        let e = t.find_node_by_label("E").unwrap();
        assert_eq!(t.lca(a, d), t.root());
        assert_eq!(t.label(t.lca(d, e)), "de");
        assert_relative_eq!(t.pairwise_distance(d, e), 2.0);
        assert_relative_eq!(t.pairwise_distance(a, d), 12.0);
        let c = t.find_node_by_label("C").unwrap();
        assert_eq!(t.mrca(&[d, e, c]).map(|v| t.label(v)), Some("cde"));
    }

    #[test]
    fn test_unmapped_tip_is_data_error() {
        let t = tree();
        let err = t.diversity(&["pa", "wfo-unknown"]).unwrap_err();
        assert_eq!(err.metric(), "m1");
        assert!(err.to_string().contains("wfo-unknown"));
    }

    #[test]
    fn test_quoted_labels_and_comments() {
        let t = PhylogeneticTree::from_newick("('wfo-1|Abies alba':1.5,[note]'O''Brien':2)[&R];").unwrap();
        assert!(t.find_node_by_label("wfo-1|Abies alba").is_some());
        assert!(t.find_node_by_label("O'Brien").is_some());
        assert_eq!(t.num_leaves(), 2);
    }

    #[test]
    fn test_missing_length_defaults_to_zero() {
        let t = PhylogeneticTree::from_newick("(A,B:2);").unwrap();
        let a = t.find_node_by_label("A").unwrap();
        assert_relative_eq!(t.edge_length(a), 0.0);
    }

    #[test]
    fn test_malformed_newick() {
        assert!(PhylogeneticTree::from_newick("((A:1,B:2);").is_err());
        assert!(PhylogeneticTree::from_newick("(A:1,B:2)").is_err());
        assert!(PhylogeneticTree::from_newick("(A:x,B:2);").is_err());
    }

    fn push_node(buf: &mut Vec<u8>, parent: u32, children: &[u32], label: &str, length: f32) {
        buf.extend_from_slice(&parent.to_le_bytes());
        buf.extend_from_slice(&(children.len() as u32).to_le_bytes());
        for c in children {
            buf.extend_from_slice(&c.to_le_bytes());
        }
        buf.extend_from_slice(&(label.len() as u32).to_le_bytes());
        buf.extend_from_slice(label.as_bytes());
        buf.extend_from_slice(&length.to_le_bytes());
    }

    #[test]
    fn test_binary_dump() {
        // root(0) -> X(1):1.0, Y(2):0.5 ; Y -> Z(3):0.25
        let mut buf = Vec::new();
        buf.extend_from_slice(&4u32.to_le_bytes());
        buf.extend_from_slice(&2u32.to_le_bytes());
        push_node(&mut buf, NO_PARENT, &[1, 2], "", 0.0);
        push_node(&mut buf, 0, &[], "X", 1.0);
        push_node(&mut buf, 0, &[3], "Y", 0.5);
        push_node(&mut buf, 2, &[], "Z", 0.25);

        let t = PhylogeneticTree::from_binary_bytes(&buf)
            .unwrap()
            .with_tip_mapping([("px", "X"), ("pz", "Z")]);
        assert_eq!(t.get_num_nodes(), 4);
        assert_eq!(t.num_leaves(), 2);
        assert_relative_eq!(t.diversity(&["px", "pz"]).unwrap(), 1.75);

        buf.truncate(buf.len() - 2);
        assert!(PhylogeneticTree::from_binary_bytes(&buf).is_err());
    }
}
