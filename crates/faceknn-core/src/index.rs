//! Fitted k-nearest-neighbor index over labeled face embeddings.

use crate::search::{Neighbor, NeighborSearch, SearchStrategy};
use crate::types::{Classification, DimensionMismatch, Embedding, LabeledSample};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    #[error("cannot build an index from zero samples")]
    Empty,
    #[error("neighbor count must be at least 1")]
    ZeroNeighbors,
    #[error("embeddings must have at least one dimension")]
    ZeroDimensions,
    #[error("embedding contains a non-finite value")]
    NonFinite,
    #[error(transparent)]
    DimensionMismatch(#[from] DimensionMismatch),
}

/// Serializable state of a fitted index. The search structure is rebuilt
/// from it on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub k: usize,
    pub strategy: SearchStrategy,
    pub trained_at: String,
    pub samples: Vec<LabeledSample>,
}

/// Summary of an index, for logs and `inspect` output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexSummary {
    pub samples: usize,
    pub dim: usize,
    pub k: usize,
    pub strategy: SearchStrategy,
    pub trained_at: String,
    /// Sample count per label, sorted by label.
    pub labels: BTreeMap<String, usize>,
}

/// Immutable KNN classifier index.
///
/// Owns its own copy of every training embedding and label. Read-only after
/// fitting, so a shared reference can serve concurrent predictions.
#[derive(Debug)]
pub struct KnnIndex {
    embeddings: Vec<Embedding>,
    labels: Vec<String>,
    k: usize,
    dim: usize,
    strategy: SearchStrategy,
    trained_at: String,
    search: Box<dyn NeighborSearch>,
}

impl KnnIndex {
    /// Fit an index over `samples`.
    ///
    /// Samples are put in a canonical order (label, then embedding) first,
    /// so the order they were collected in never changes query results.
    pub fn fit(
        samples: Vec<LabeledSample>,
        k: usize,
        strategy: SearchStrategy,
    ) -> Result<Self, IndexError> {
        Self::assemble(
            samples,
            k,
            strategy,
            chrono::Utc::now().to_rfc3339(),
        )
    }

    /// Rebuild an index from a snapshot taken with [`KnnIndex::snapshot`].
    pub fn from_snapshot(snapshot: IndexSnapshot) -> Result<Self, IndexError> {
        Self::assemble(
            snapshot.samples,
            snapshot.k,
            snapshot.strategy,
            snapshot.trained_at,
        )
    }

    fn assemble(
        mut samples: Vec<LabeledSample>,
        k: usize,
        strategy: SearchStrategy,
        trained_at: String,
    ) -> Result<Self, IndexError> {
        if samples.is_empty() {
            return Err(IndexError::Empty);
        }
        if k == 0 {
            return Err(IndexError::ZeroNeighbors);
        }
        let dim = samples[0].embedding.dim();
        if dim == 0 {
            return Err(IndexError::ZeroDimensions);
        }
        for sample in &samples {
            check_query(&sample.embedding, dim)?;
        }

        samples.sort_by(|a, b| {
            a.label.cmp(&b.label).then_with(|| {
                a.embedding
                    .values
                    .iter()
                    .zip(&b.embedding.values)
                    .map(|(x, y)| x.total_cmp(y))
                    .find(|o| o.is_ne())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
        });

        let (embeddings, labels): (Vec<Embedding>, Vec<String>) = samples
            .into_iter()
            .map(|s| (s.embedding, s.label))
            .unzip();
        let search = strategy.build(&embeddings);

        tracing::debug!(
            samples = embeddings.len(),
            dim,
            k,
            strategy = strategy.name(),
            "built knn index"
        );

        Ok(Self {
            embeddings,
            labels,
            k,
            dim,
            strategy,
            trained_at,
            search,
        })
    }

    pub fn snapshot(&self) -> IndexSnapshot {
        IndexSnapshot {
            k: self.k,
            strategy: self.strategy,
            trained_at: self.trained_at.clone(),
            samples: self
                .embeddings
                .iter()
                .zip(&self.labels)
                .map(|(e, l)| LabeledSample::new(e.clone(), l.clone()))
                .collect(),
        }
    }

    /// Neighbor count used for voting, as trained.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Neighbor count actually consulted: `k` capped at the sample count.
    pub fn effective_k(&self) -> usize {
        self.k.min(self.embeddings.len())
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn strategy(&self) -> SearchStrategy {
        self.strategy
    }

    pub fn trained_at(&self) -> &str {
        &self.trained_at
    }

    pub fn summary(&self) -> IndexSummary {
        let mut labels = BTreeMap::new();
        for label in &self.labels {
            *labels.entry(label.clone()).or_insert(0) += 1;
        }
        IndexSummary {
            samples: self.len(),
            dim: self.dim,
            k: self.k,
            strategy: self.strategy,
            trained_at: self.trained_at.clone(),
            labels,
        }
    }

    /// The `n` nearest training samples to `query`, closest first.
    pub fn kneighbors(&self, query: &Embedding, n: usize) -> Result<Vec<Neighbor>, IndexError> {
        check_query(query, self.dim)?;
        let n = n.min(self.embeddings.len());
        Ok(self.search.nearest(&self.embeddings, &query.values, n))
    }

    /// Distance-weighted plurality vote among the k nearest samples.
    ///
    /// Each neighbor weighs `1 / distance`. When any neighbor sits at
    /// distance zero, only the zero-distance neighbors vote. Equal totals
    /// go to the lexicographically smallest label.
    pub fn vote(&self, query: &Embedding) -> Result<Classification, IndexError> {
        let neighbors = self.kneighbors(query, self.effective_k())?;
        let exact = neighbors.iter().any(|n| n.distance == 0.0);

        let mut tally: BTreeMap<&str, f64> = BTreeMap::new();
        for neighbor in &neighbors {
            let weight = match (exact, neighbor.distance == 0.0) {
                (true, true) => 1.0,
                (true, false) => 0.0,
                (false, _) => 1.0 / neighbor.distance,
            };
            *tally.entry(self.labels[neighbor.index].as_str()).or_insert(0.0) += weight;
        }

        let total: f64 = tally.values().sum();
        let mut winner: Option<(&str, f64)> = None;
        for (&label, &weight) in &tally {
            if winner.map_or(true, |(_, best)| weight > best) {
                winner = Some((label, weight));
            }
        }

        // kneighbors never returns an empty list for a non-empty index.
        let (label, weight) = winner.ok_or(IndexError::Empty)?;
        Ok(Classification {
            label: label.to_string(),
            vote_share: if total > 0.0 { weight / total } else { 0.0 },
            nearest_distance: neighbors[0].distance,
        })
    }
}

fn check_query(query: &Embedding, dim: usize) -> Result<(), IndexError> {
    if query.dim() != dim {
        return Err(DimensionMismatch {
            expected: dim,
            actual: query.dim(),
        }
        .into());
    }
    if query.values.iter().any(|v| !v.is_finite()) {
        return Err(IndexError::NonFinite);
    }
    Ok(())
}
