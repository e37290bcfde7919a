//! Exact nearest-neighbor search strategies.
//!
//! Every strategy returns the same neighbors for the same data: the `k`
//! smallest `(distance, sample index)` pairs in ascending order. The choice
//! only affects how much of the data a query touches.

use crate::types::{euclidean, Embedding};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

pub const DEFAULT_LEAF_SIZE: usize = 30;

/// Relative slack applied before pruning a subtree, so that rounding in a
/// lower bound never discards a sample tied with the current k-th best.
const PRUNE_SLACK: f64 = 1e-9;

/// A training sample found near a query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Position of the sample in the index's sample list.
    pub index: usize,
    pub distance: f64,
}

impl Eq for Neighbor {}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.index.cmp(&other.index))
    }
}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Strategy for finding the k nearest samples to a query.
pub trait NeighborSearch: Send + Sync + std::fmt::Debug {
    /// Return up to `k` neighbors of `query`, sorted by ascending distance,
    /// ties broken by ascending sample index.
    fn nearest(&self, points: &[Embedding], query: &[f64], k: usize) -> Vec<Neighbor>;
}

/// Which search structure an index builds over its samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchStrategy {
    BruteForce,
    KdTree { leaf_size: usize },
    BallTree { leaf_size: usize },
}

impl Default for SearchStrategy {
    fn default() -> Self {
        SearchStrategy::BallTree {
            leaf_size: DEFAULT_LEAF_SIZE,
        }
    }
}

impl SearchStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            SearchStrategy::BruteForce => "brute_force",
            SearchStrategy::KdTree { .. } => "kd_tree",
            SearchStrategy::BallTree { .. } => "ball_tree",
        }
    }

    /// Build the search structure over `points`.
    pub fn build(&self, points: &[Embedding]) -> Box<dyn NeighborSearch> {
        match *self {
            SearchStrategy::BruteForce => Box::new(BruteForce),
            SearchStrategy::KdTree { leaf_size } => Box::new(KdTree::build(points, leaf_size)),
            SearchStrategy::BallTree { leaf_size } => Box::new(BallTree::build(points, leaf_size)),
        }
    }
}

/// Bounded max-heap holding the best `k` candidates seen so far.
struct KBest {
    k: usize,
    heap: BinaryHeap<Neighbor>,
}

impl KBest {
    fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    fn offer(&mut self, candidate: Neighbor) {
        if self.heap.len() < self.k {
            self.heap.push(candidate);
        } else if let Some(worst) = self.heap.peek() {
            if candidate < *worst {
                self.heap.pop();
                self.heap.push(candidate);
            }
        }
    }

    /// Whether a subtree whose samples are all at least `bound` away can
    /// be skipped.
    fn can_prune(&self, bound: f64) -> bool {
        if self.heap.len() < self.k {
            return false;
        }
        match self.heap.peek() {
            Some(worst) => bound > worst.distance + PRUNE_SLACK * (1.0 + worst.distance),
            None => false,
        }
    }

    fn into_sorted(self) -> Vec<Neighbor> {
        self.heap.into_sorted_vec()
    }
}

/// Linear scan over every sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct BruteForce;

impl NeighborSearch for BruteForce {
    fn nearest(&self, points: &[Embedding], query: &[f64], k: usize) -> Vec<Neighbor> {
        if k == 0 {
            return Vec::new();
        }
        let mut best = KBest::new(k);
        for (index, point) in points.iter().enumerate() {
            best.offer(Neighbor {
                index,
                distance: euclidean(&point.values, query),
            });
        }
        best.into_sorted()
    }
}

/// Median split along the dimension of largest spread.
///
/// Returns `None` when the slice is small enough to be a leaf or all
/// samples coincide along every dimension.
fn split_indices(
    points: &[Embedding],
    indices: &mut [usize],
    leaf_size: usize,
) -> Option<(usize, f64, usize)> {
    if indices.len() <= leaf_size.max(1) {
        return None;
    }
    let dim = points[indices[0]].dim();
    let mut best_dim = 0;
    let mut best_spread = 0.0f64;
    for d in 0..dim {
        let (lo, hi) = indices.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
            let v = points[i].values[d];
            (lo.min(v), hi.max(v))
        });
        if hi - lo > best_spread {
            best_spread = hi - lo;
            best_dim = d;
        }
    }
    if best_spread <= 0.0 {
        return None;
    }

    let mid = indices.len() / 2;
    indices.select_nth_unstable_by(mid, |&a, &b| {
        points[a].values[best_dim].total_cmp(&points[b].values[best_dim])
    });
    let value = points[indices[mid]].values[best_dim];
    Some((best_dim, value, mid))
}

#[derive(Debug)]
enum KdNode {
    Leaf(Vec<usize>),
    Split {
        dim: usize,
        value: f64,
        left: Box<KdNode>,
        right: Box<KdNode>,
    },
}

/// Axis-aligned k-d tree.
#[derive(Debug)]
pub struct KdTree {
    root: KdNode,
}

impl KdTree {
    pub fn build(points: &[Embedding], leaf_size: usize) -> Self {
        let mut indices: Vec<usize> = (0..points.len()).collect();
        Self {
            root: Self::build_node(points, &mut indices, leaf_size),
        }
    }

    fn build_node(points: &[Embedding], indices: &mut [usize], leaf_size: usize) -> KdNode {
        match split_indices(points, indices, leaf_size) {
            None => KdNode::Leaf(indices.to_vec()),
            Some((dim, value, mid)) => {
                let (lo, hi) = indices.split_at_mut(mid);
                KdNode::Split {
                    dim,
                    value,
                    left: Box::new(Self::build_node(points, lo, leaf_size)),
                    right: Box::new(Self::build_node(points, hi, leaf_size)),
                }
            }
        }
    }

    fn search(node: &KdNode, points: &[Embedding], query: &[f64], best: &mut KBest) {
        match node {
            KdNode::Leaf(indices) => {
                for &index in indices {
                    best.offer(Neighbor {
                        index,
                        distance: euclidean(&points[index].values, query),
                    });
                }
            }
            KdNode::Split {
                dim,
                value,
                left,
                right,
            } => {
                let diff = query[*dim] - value;
                let (near, far) = if diff <= 0.0 { (left, right) } else { (right, left) };
                Self::search(near, points, query, best);
                if !best.can_prune(diff.abs()) {
                    Self::search(far, points, query, best);
                }
            }
        }
    }
}

impl NeighborSearch for KdTree {
    fn nearest(&self, points: &[Embedding], query: &[f64], k: usize) -> Vec<Neighbor> {
        if k == 0 || points.is_empty() {
            return Vec::new();
        }
        let mut best = KBest::new(k);
        Self::search(&self.root, points, query, &mut best);
        best.into_sorted()
    }
}

#[derive(Debug)]
struct Ball {
    centroid: Vec<f64>,
    radius: f64,
    kind: BallKind,
}

#[derive(Debug)]
enum BallKind {
    Leaf(Vec<usize>),
    Inner(Box<Ball>, Box<Ball>),
}

/// Ball tree: each node bounds its samples by a centroid and radius.
#[derive(Debug)]
pub struct BallTree {
    root: Option<Ball>,
}

impl BallTree {
    pub fn build(points: &[Embedding], leaf_size: usize) -> Self {
        let mut indices: Vec<usize> = (0..points.len()).collect();
        let root = if indices.is_empty() {
            None
        } else {
            Some(Self::build_node(points, &mut indices, leaf_size))
        };
        Self { root }
    }

    fn build_node(points: &[Embedding], indices: &mut [usize], leaf_size: usize) -> Ball {
        let dim = points[indices[0]].dim();
        let mut centroid = vec![0.0f64; dim];
        for &i in indices.iter() {
            for (c, v) in centroid.iter_mut().zip(&points[i].values) {
                *c += v;
            }
        }
        let n = indices.len() as f64;
        centroid.iter_mut().for_each(|c| *c /= n);
        let radius = indices
            .iter()
            .map(|&i| euclidean(&points[i].values, &centroid))
            .fold(0.0f64, f64::max);

        let kind = match split_indices(points, indices, leaf_size) {
            None => BallKind::Leaf(indices.to_vec()),
            Some((_, _, mid)) => {
                let (lo, hi) = indices.split_at_mut(mid);
                BallKind::Inner(
                    Box::new(Self::build_node(points, lo, leaf_size)),
                    Box::new(Self::build_node(points, hi, leaf_size)),
                )
            }
        };
        Ball {
            centroid,
            radius,
            kind,
        }
    }

    fn lower_bound(ball: &Ball, query: &[f64]) -> f64 {
        (euclidean(query, &ball.centroid) - ball.radius).max(0.0)
    }

    fn search(ball: &Ball, points: &[Embedding], query: &[f64], best: &mut KBest) {
        if best.can_prune(Self::lower_bound(ball, query)) {
            return;
        }
        match &ball.kind {
            BallKind::Leaf(indices) => {
                for &index in indices {
                    best.offer(Neighbor {
                        index,
                        distance: euclidean(&points[index].values, query),
                    });
                }
            }
            BallKind::Inner(a, b) => {
                let (near, far) = if Self::lower_bound(a, query) <= Self::lower_bound(b, query) {
                    (a, b)
                } else {
                    (b, a)
                };
                Self::search(near, points, query, best);
                Self::search(far, points, query, best);
            }
        }
    }
}

impl NeighborSearch for BallTree {
    fn nearest(&self, points: &[Embedding], query: &[f64], k: usize) -> Vec<Neighbor> {
        let Some(root) = &self.root else {
            return Vec::new();
        };
        if k == 0 {
            return Vec::new();
        }
        let mut best = KBest::new(k);
        Self::search(root, points, query, &mut best);
        best.into_sorted()
    }
}
