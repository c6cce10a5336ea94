//! Blueprint pre-analysis (C9, spec.md §4.9): given a batch of proposals
//! and optional dependency edges, group proposals into file-overlap
//! clusters via union-find, then classify cross-group relationships
//! (conflict, enabler, mergeable) before trajectory generation. The
//! Jaccard/union-find style here mirrors `spin_core::wave::conflict`'s
//! `directory_jaccard` and `symbol_escape_hatch`.

use std::collections::HashSet;

use spin_core::model::Proposal;

const GROUP_OVERLAP_THRESHOLD: f64 = 0.5;
const MERGEABLE_OVERLAP_THRESHOLD: f64 = 0.7;
const IMPACT_TIEBREAK: f64 = 1.0;

fn file_jaccard(a: &Proposal, b: &Proposal) -> f64 {
    let fa: HashSet<&String> = a.files.iter().collect();
    let fb: HashSet<&String> = b.files.iter().collect();
    if fa.is_empty() && fb.is_empty() {
        return 0.0;
    }
    let intersection = fa.intersection(&fb).count();
    let union = fa.union(&fb).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self { parent: (0..n).collect() }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[ra] = rb;
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProposalGroup {
    /// Indices into the original `proposals` slice, in input order.
    pub proposal_indices: Vec<usize>,
    pub categories: Vec<String>,
    pub is_enabler: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Index of the proposal kept; the other is dropped.
    KeepHigherImpact(usize),
    /// Scores too close to call; run the two proposals sequentially.
    Sequence,
}

#[derive(Clone, Debug)]
pub struct ProposalConflict {
    pub a: usize,
    pub b: usize,
    pub resolution: ConflictResolution,
}

#[derive(Clone, Debug, Default)]
pub struct Blueprint {
    /// Enabler groups sort first (§4.9).
    pub groups: Vec<ProposalGroup>,
    pub conflicts: Vec<ProposalConflict>,
    /// Pairs of proposal indices eligible to be merged into one ticket.
    pub mergeable_pairs: Vec<(usize, usize)>,
}

fn group_by_overlap(proposals: &[Proposal]) -> Vec<Vec<usize>> {
    let mut uf = UnionFind::new(proposals.len());
    for i in 0..proposals.len() {
        for j in (i + 1)..proposals.len() {
            if file_jaccard(&proposals[i], &proposals[j]) >= GROUP_OVERLAP_THRESHOLD {
                uf.union(i, j);
            }
        }
    }
    let mut groups: std::collections::HashMap<usize, Vec<usize>> = std::collections::HashMap::new();
    for i in 0..proposals.len() {
        let root = uf.find(i);
        groups.entry(root).or_default().push(i);
    }
    let mut ordered: Vec<(usize, Vec<usize>)> = groups.into_iter().collect();
    ordered.sort_by_key(|(root, _)| *root);
    ordered.into_iter().map(|(_, members)| members).collect()
}

fn detect_conflicts(proposals: &[Proposal], groups: &[Vec<usize>]) -> Vec<ProposalConflict> {
    let group_of: std::collections::HashMap<usize, usize> = groups
        .iter()
        .enumerate()
        .flat_map(|(gi, members)| members.iter().map(move |&pi| (pi, gi)))
        .collect();

    let mut conflicts = Vec::new();
    for i in 0..proposals.len() {
        for j in (i + 1)..proposals.len() {
            if group_of.get(&i) == group_of.get(&j) {
                continue;
            }
            let same_files = proposals[i].files.iter().any(|f| proposals[j].files.contains(f));
            if !same_files || proposals[i].category == proposals[j].category {
                continue;
            }
            let score_i = proposals[i].impact_score.unwrap_or(0.0);
            let score_j = proposals[j].impact_score.unwrap_or(0.0);
            let resolution = if (score_i - score_j).abs() > IMPACT_TIEBREAK {
                ConflictResolution::KeepHigherImpact(if score_i >= score_j { i } else { j })
            } else {
                ConflictResolution::Sequence
            };
            conflicts.push(ProposalConflict { a: i, b: j, resolution });
        }
    }
    conflicts
}

fn detect_mergeable(proposals: &[Proposal], groups: &[Vec<usize>]) -> Vec<(usize, usize)> {
    let group_of: std::collections::HashMap<usize, usize> = groups
        .iter()
        .enumerate()
        .flat_map(|(gi, members)| members.iter().map(move |&pi| (pi, gi)))
        .collect();

    let mut pairs = Vec::new();
    for i in 0..proposals.len() {
        for j in (i + 1)..proposals.len() {
            if group_of.get(&i) != group_of.get(&j) {
                continue;
            }
            if proposals[i].category != proposals[j].category {
                continue;
            }
            if file_jaccard(&proposals[i], &proposals[j]) >= MERGEABLE_OVERLAP_THRESHOLD {
                pairs.push((i, j));
            }
        }
    }
    pairs
}

/// A group is an enabler when a dependency edge imports one of its
/// files from a file owned by a proposal outside the group.
fn is_enabler_group(proposals: &[Proposal], members: &[usize], dependency_edges: &[(String, String)]) -> bool {
    if dependency_edges.is_empty() {
        return false;
    }
    let group_files: HashSet<&String> = members.iter().flat_map(|&i| proposals[i].files.iter()).collect();
    dependency_edges.iter().any(|(importer, imported)| {
        group_files.contains(imported) && !group_files.contains(importer)
    })
}

fn group_categories(proposals: &[Proposal], members: &[usize]) -> Vec<String> {
    let mut categories: Vec<String> = members.iter().map(|&i| proposals[i].category.clone()).collect();
    categories.sort();
    categories.dedup();
    categories
}

/// Build the blueprint for one scout batch: group by file overlap,
/// classify enablers, detect cross-group conflicts and mergeable pairs,
/// then sort so enabler groups come first.
pub fn build_blueprint(proposals: &[Proposal], dependency_edges: &[(String, String)]) -> Blueprint {
    let raw_groups = group_by_overlap(proposals);
    let mut groups: Vec<ProposalGroup> = raw_groups
        .iter()
        .map(|members| ProposalGroup {
            proposal_indices: members.clone(),
            categories: group_categories(proposals, members),
            is_enabler: is_enabler_group(proposals, members, dependency_edges),
        })
        .collect();
    groups.sort_by_key(|g| !g.is_enabler);

    let conflicts = detect_conflicts(proposals, &raw_groups);
    let mergeable_pairs = detect_mergeable(proposals, &raw_groups);

    Blueprint { groups, conflicts, mergeable_pairs }
}
