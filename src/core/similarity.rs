use crate::core::perceptual::{max_distance_for, score_for_distance, PerceptualHash};
use crate::database::models::{Asset, GroupType, VariantGroup};
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SimilarityError {
    #[error("Similarity threshold {0} is outside [0, 100]")]
    InvalidThreshold(f64),
}

/// Above this many bands the buckets get too coarse to prune anything, so
/// candidates come from the popcount window instead.
const MAX_BANDS: u32 = 16;

pub fn validate_threshold(threshold: f64) -> Result<f64, SimilarityError> {
    if threshold.is_finite() && (0.0..=100.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(SimilarityError::InvalidThreshold(threshold))
    }
}

#[derive(Debug, Clone)]
struct Member {
    path: PathBuf,
    id: String,
}

/// All assets sharing one exact fingerprint.
#[derive(Debug, Clone)]
struct Node {
    hash: PerceptualHash,
    members: Vec<Member>,
}

/// Immutable snapshot of perceptual fingerprints. Built once per scan and
/// re-clustered at any threshold without touching the images again.
#[derive(Debug, Clone, Default)]
pub struct SimilarityIndex {
    nodes: Vec<Node>,
    /// `(popcount, node)` ordered by popcount, then hash.
    by_weight: Vec<(u32, usize)>,
    assets: usize,
}

impl SimilarityIndex {
    /// Assets without a perceptual fingerprint are left out.
    pub fn build(assets: &[Asset]) -> Self {
        let mut by_hash: HashMap<PerceptualHash, Vec<Member>> = HashMap::new();
        let mut count = 0;
        for asset in assets {
            if let Some(hash) = asset.perceptual_hash {
                by_hash.entry(hash).or_default().push(Member {
                    path: asset.path.clone(),
                    id: asset.id.clone(),
                });
                count += 1;
            }
        }

        let mut nodes: Vec<Node> = by_hash
            .into_iter()
            .map(|(hash, mut members)| {
                members.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.id.cmp(&b.id)));
                Node { hash, members }
            })
            .collect();
        nodes.sort_by_key(|node| node.hash);

        let mut by_weight: Vec<(u32, usize)> = nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (node.hash.bits().count_ones(), index))
            .collect();
        by_weight.sort();

        Self {
            nodes,
            by_weight,
            assets: count,
        }
    }

    /// Number of fingerprinted assets in the snapshot.
    pub fn len(&self) -> usize {
        self.assets
    }

    pub fn is_empty(&self) -> bool {
        self.assets == 0
    }

    /// Connected components of the graph whose edges join fingerprints with
    /// similarity at or above `threshold`. Singletons are dropped. A group's
    /// similarity is its weakest edge.
    pub fn group(&self, threshold: f64) -> Result<Vec<VariantGroup>, SimilarityError> {
        let threshold = validate_threshold(threshold)?;
        let max_distance =
            max_distance_for(threshold).ok_or(SimilarityError::InvalidThreshold(threshold))?;

        let mut components = if max_distance < MAX_BANDS {
            self.banded_components(max_distance)
        } else {
            self.windowed_components(max_distance)
        };

        let mut clusters: HashMap<usize, Vec<usize>> = HashMap::new();
        for node in 0..self.nodes.len() {
            clusters.entry(components.find(node)).or_default().push(node);
        }

        let mut groups: Vec<(PathBuf, VariantGroup)> = clusters
            .into_iter()
            .filter_map(|(root, nodes)| {
                let mut members: Vec<&Member> = nodes
                    .iter()
                    .flat_map(|&node| self.nodes[node].members.iter())
                    .collect();
                if members.len() < 2 {
                    return None;
                }
                members.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.id.cmp(&b.id)));

                let similarity = score_for_distance(components.weakest[root]);
                let ids: Vec<String> = members.iter().map(|m| m.id.clone()).collect();
                debug_assert!(
                    ids.windows(2).all(|pair| pair[0] != pair[1]),
                    "asset listed twice in one similar group"
                );
                let seed = ids.join(",");
                let first = members[0].path.clone();
                Some((first, VariantGroup::new(GroupType::Similar, similarity, ids, &seed)))
            })
            .collect();

        groups.sort_by(|a, b| a.0.cmp(&b.0));
        let groups: Vec<VariantGroup> = groups.into_iter().map(|(_, group)| group).collect();

        log::debug!(
            "Similarity grouping at {:.2} (distance <= {}): {} nodes, {} groups",
            threshold,
            max_distance,
            self.nodes.len(),
            groups.len()
        );
        Ok(groups)
    }

    /// Splits the 64 bits into `max_distance + 1` disjoint bands. Two
    /// fingerprints within `max_distance` bits must agree on at least one
    /// whole band, so comparing only within shared-band buckets finds every
    /// pair.
    fn banded_components(&self, max_distance: u32) -> Components {
        let n = self.nodes.len();
        band_layout(max_distance + 1)
            .par_iter()
            .fold(
                || Components::new(n),
                |mut components, &(shift, width)| {
                    let mut buckets: HashMap<u64, Vec<usize>> = HashMap::new();
                    for (index, node) in self.nodes.iter().enumerate() {
                        buckets
                            .entry(band_value(node.hash, shift, width))
                            .or_default()
                            .push(index);
                    }

                    for bucket in buckets.values() {
                        for (i, &a) in bucket.iter().enumerate() {
                            for &b in &bucket[i + 1..] {
                                let distance = self.nodes[a].hash.distance(self.nodes[b].hash);
                                if distance <= max_distance {
                                    components.connect(a, b, distance);
                                }
                            }
                        }
                    }
                    components
                },
            )
            .reduce(|| Components::new(n), Components::merge)
    }

    /// Popcounts of two fingerprints differ by no more than their distance,
    /// so each node only needs comparing against the run of nodes whose
    /// popcount is at most `max_distance` above its own.
    fn windowed_components(&self, max_distance: u32) -> Components {
        let n = self.nodes.len();
        let chunk = (n / (rayon::current_num_threads() * 4)).max(1);
        (0..n)
            .into_par_iter()
            .with_min_len(chunk)
            .fold(
                || Components::new(n),
                |mut components, position| {
                    let (weight, a) = self.by_weight[position];
                    let window = self.by_weight[position + 1..]
                        .iter()
                        .take_while(|&&(other, _)| other - weight <= max_distance);
                    for &(_, b) in window {
                        let distance = self.nodes[a].hash.distance(self.nodes[b].hash);
                        if distance <= max_distance {
                            components.connect(a, b, distance);
                        }
                    }
                    components
                },
            )
            .reduce(|| Components::new(n), Components::merge)
    }
}

/// `(shift, width)` for each band, widths differing by at most one bit.
fn band_layout(bands: u32) -> Vec<(u32, u32)> {
    let bands = bands.clamp(1, PerceptualHash::BITS);
    let base = PerceptualHash::BITS / bands;
    let extra = PerceptualHash::BITS % bands;

    let mut shift = 0;
    (0..bands)
        .map(|band| {
            let width = base + u32::from(band < extra);
            let layout = (shift, width);
            shift += width;
            layout
        })
        .collect()
}

fn band_value(hash: PerceptualHash, shift: u32, width: u32) -> u64 {
    let mask = if width >= u64::BITS {
        u64::MAX
    } else {
        (1u64 << width) - 1
    };
    (hash.bits() >> shift) & mask
}

/// Union-find over nodes that also records, per root, the largest distance
/// of any pair joined inside that component.
#[derive(Debug, Clone)]
struct Components {
    parent: Vec<usize>,
    rank: Vec<u8>,
    weakest: Vec<u32>,
}

impl Components {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
            rank: vec![0; size],
            weakest: vec![0; size],
        }
    }

    fn find(&mut self, mut node: usize) -> usize {
        while self.parent[node] != node {
            self.parent[node] = self.parent[self.parent[node]];
            node = self.parent[node];
        }
        node
    }

    fn connect(&mut self, a: usize, b: usize, distance: u32) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            self.weakest[ra] = self.weakest[ra].max(distance);
            return;
        }

        let weakest = self.weakest[ra].max(self.weakest[rb]).max(distance);
        let root = match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => {
                self.parent[ra] = rb;
                rb
            }
            std::cmp::Ordering::Greater => {
                self.parent[rb] = ra;
                ra
            }
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
                ra
            }
        };
        self.weakest[root] = weakest;
    }

    /// Folds the partition found by another worker into this one.
    fn merge(mut self, mut other: Self) -> Self {
        for node in 0..other.parent.len() {
            let root = other.find(node);
            if root != node {
                self.connect(node, root, 0);
            }
        }
        for node in 0..other.parent.len() {
            if other.parent[node] == node && other.weakest[node] > 0 {
                let root = self.find(node);
                self.weakest[root] = self.weakest[root].max(other.weakest[node]);
            }
        }
        self
    }
}

/// Clusters assets by perceptual distance. For repeated thresholds over the
/// same assets, build a [`SimilarityIndex`] once and call
/// [`SimilarityIndex::group`] instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimilarityGrouper;

impl SimilarityGrouper {
    pub fn new() -> Self {
        Self
    }

    pub fn group(
        &self,
        assets: &[Asset],
        threshold: f64,
    ) -> Result<Vec<VariantGroup>, SimilarityError> {
        validate_threshold(threshold)?;
        SimilarityIndex::build(assets).group(threshold)
    }
}
