//! Fit a [`KnnIndex`] from a [`TrainingSet`].

use crate::index::{IndexError, KnnIndex};
use crate::persist::{self, PersistError};
use crate::search::SearchStrategy;
use crate::types::TrainingSet;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("invalid training input: {0}")]
    InvalidInput(String),
    #[error("index: {0}")]
    Index(#[from] IndexError),
    #[error("saving index: {0}")]
    Persist(#[from] PersistError),
}

/// Training knobs. Everything is optional.
#[derive(Debug, Clone, Default)]
pub struct TrainOptions {
    /// Neighbor count; `None` picks `round(sqrt(N))`.
    pub k: Option<usize>,
    pub strategy: SearchStrategy,
    /// Where to write the fitted index, if anywhere.
    pub save_path: Option<PathBuf>,
    /// Log training decisions at info level instead of debug.
    pub verbose: bool,
}

/// Neighbor count heuristic: `round(sqrt(n))`, never below 1.
pub fn auto_k(n: usize) -> usize {
    ((n as f64).sqrt().round() as usize).max(1)
}

/// Fit a distance-weighted KNN index over `set`.
///
/// The returned index owns a copy of the data, so `set` can be dropped
/// afterwards. When `options.save_path` is set the index is also written
/// there; the in-memory index is returned either way.
pub fn train(set: &TrainingSet, options: &TrainOptions) -> Result<KnnIndex, TrainError> {
    if set.is_empty() {
        return Err(TrainError::InvalidInput(
            "training set has no samples".into(),
        ));
    }

    let k = match options.k {
        Some(0) => {
            return Err(TrainError::InvalidInput(
                "neighbor count must be at least 1".into(),
            ))
        }
        Some(k) => k,
        None => {
            let k = auto_k(set.len());
            if options.verbose {
                tracing::info!(k, samples = set.len(), "chose neighbor count automatically");
            } else {
                tracing::debug!(k, samples = set.len(), "chose neighbor count automatically");
            }
            k
        }
    };

    let index = KnnIndex::fit(set.samples().to_vec(), k, options.strategy)?;

    if options.verbose {
        tracing::info!(
            samples = index.len(),
            labels = set.labels().len(),
            dim = index.dim(),
            k,
            strategy = options.strategy.name(),
            "trained knn classifier"
        );
    }

    if let Some(path) = &options.save_path {
        persist::save(&index, path)?;
        tracing::info!(path = %path.display(), "saved knn index");
    }

    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Embedding, LabeledSample};

    fn set_of(n: usize) -> TrainingSet {
        TrainingSet::from_samples((0..n).map(|i| {
            LabeledSample::new(vec![i as f64, 0.0], if i % 2 == 0 { "even" } else { "odd" })
        }))
        .unwrap()
    }

    #[test]
    fn test_auto_k_examples() {
        assert_eq!(auto_k(100), 10);
        assert_eq!(auto_k(50), 7);
        assert_eq!(auto_k(10), 3);
        assert_eq!(auto_k(2), 1);
        assert_eq!(auto_k(1), 1);
    }

    #[test]
    fn test_auto_k_recomputed_per_set() {
        let small = train(&set_of(4), &TrainOptions::default()).unwrap();
        let large = train(&set_of(100), &TrainOptions::default()).unwrap();
        assert_eq!(small.k(), 2);
        assert_eq!(large.k(), 10);
    }

    #[test]
    fn test_auto_k_for_fifty_samples() {
        let index = train(&set_of(50), &TrainOptions::default()).unwrap();
        assert_eq!(index.k(), 7);
    }

    #[test]
    fn test_explicit_k_is_kept() {
        let options = TrainOptions {
            k: Some(4),
            ..Default::default()
        };
        let index = train(&set_of(100), &options).unwrap();
        assert_eq!(index.k(), 4);
    }

    #[test]
    fn test_empty_set_is_invalid_input() {
        let err = train(&TrainingSet::new(), &TrainOptions::default()).unwrap_err();
        assert!(matches!(err, TrainError::InvalidInput(_)));
    }

    #[test]
    fn test_zero_k_is_invalid_input() {
        let options = TrainOptions {
            k: Some(0),
            ..Default::default()
        };
        let err = train(&set_of(3), &options).unwrap_err();
        assert!(matches!(err, TrainError::InvalidInput(_)));
    }

    #[test]
    fn test_index_outlives_training_set() {
        let set = set_of(9);
        let index = train(&set, &TrainOptions::default()).unwrap();
        drop(set);
        assert_eq!(index.len(), 9);
        let result = index.vote(&Embedding::new(vec![4.0, 0.0])).unwrap();
        assert_eq!(result.label, "even");
    }

    #[test]
    fn test_save_path_writes_and_returns_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let options = TrainOptions {
            save_path: Some(path.clone()),
            ..Default::default()
        };
        let index = train(&set_of(5), &options).unwrap();
        assert!(path.exists());
        let loaded = persist::load(&path).unwrap();
        assert_eq!(loaded.snapshot(), index.snapshot());
    }

    #[test]
    fn test_strategies_train_equivalent_classifiers() {
        let set = set_of(40);
        let strategies = [
            SearchStrategy::BruteForce,
            SearchStrategy::KdTree { leaf_size: 3 },
            SearchStrategy::BallTree { leaf_size: 3 },
        ];
        let indexes: Vec<KnnIndex> = strategies
            .iter()
            .map(|&strategy| {
                train(
                    &set,
                    &TrainOptions {
                        strategy,
                        ..Default::default()
                    },
                )
                .unwrap()
            })
            .collect();

        for q in 0..40 {
            let query = Embedding::new(vec![q as f64 + 0.3, 0.7]);
            let expected = indexes[0].vote(&query).unwrap();
            for index in &indexes[1..] {
                assert_eq!(index.vote(&query).unwrap(), expected);
            }
        }
    }
}
