use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Label reported for a face whose nearest training sample is farther than
/// the distance threshold.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Face embedding vector produced by an [`EmbeddingProvider`](crate::EmbeddingProvider).
///
/// Dimensionality is fixed by the provider's model and must stay constant
/// across a training set and every query made against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f64>,
}

impl Embedding {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f64 {
        euclidean(&self.values, &other.values)
    }
}

impl From<Vec<f64>> for Embedding {
    fn from(values: Vec<f64>) -> Self {
        Self { values }
    }
}

pub(crate) fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Face bounding region in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaceRegion {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl FaceRegion {
    pub fn new(top: u32, right: u32, bottom: u32, left: u32) -> Self {
        Self {
            top,
            right,
            bottom,
            left,
        }
    }
}

/// Embedding dimensionality did not match the rest of the data.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("embedding has {actual} dimensions, expected {expected}")]
pub struct DimensionMismatch {
    pub expected: usize,
    pub actual: usize,
}

/// One training example: an embedding and the identity it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledSample {
    pub embedding: Embedding,
    pub label: String,
}

impl LabeledSample {
    pub fn new(embedding: impl Into<Embedding>, label: impl Into<String>) -> Self {
        Self {
            embedding: embedding.into(),
            label: label.into(),
        }
    }
}

/// Ordered collection of labeled samples sharing one dimensionality.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingSet {
    samples: Vec<LabeledSample>,
}

impl TrainingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a training set, rejecting the first sample whose dimensionality
    /// differs from the first one.
    pub fn from_samples(
        samples: impl IntoIterator<Item = LabeledSample>,
    ) -> Result<Self, DimensionMismatch> {
        let mut set = Self::new();
        for sample in samples {
            set.push(sample)?;
        }
        Ok(set)
    }

    pub fn push(&mut self, sample: LabeledSample) -> Result<(), DimensionMismatch> {
        if let Some(expected) = self.dim() {
            if sample.embedding.dim() != expected {
                return Err(DimensionMismatch {
                    expected,
                    actual: sample.embedding.dim(),
                });
            }
        }
        self.samples.push(sample);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Shared embedding dimensionality, or `None` for an empty set.
    pub fn dim(&self) -> Option<usize> {
        self.samples.first().map(|s| s.embedding.dim())
    }

    /// Distinct labels, sorted.
    pub fn labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = self.samples.iter().map(|s| s.label.as_str()).collect();
        labels.sort_unstable();
        labels.dedup();
        labels
    }

    pub fn samples(&self) -> &[LabeledSample] {
        &self.samples
    }
}

/// A recognized (or rejected) face: the label plus where it was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub region: FaceRegion,
}

impl Prediction {
    pub fn unknown(region: FaceRegion) -> Self {
        Self {
            label: UNKNOWN_LABEL.to_string(),
            region,
        }
    }

    /// True when the face matched a training identity.
    pub fn is_known(&self) -> bool {
        self.label != UNKNOWN_LABEL
    }
}

/// Result of classifying a single embedding against the index.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Weighted plurality label among the k nearest samples.
    pub label: String,
    /// Fraction of the total neighbor weight held by `label`, in (0, 1].
    pub vote_share: f64,
    /// Distance to the single closest training sample.
    pub nearest_distance: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Embedding::new(vec![0.1, 0.2, 0.3]);
        assert_eq!(a.euclidean_distance(&a.clone()), 0.0);
    }

    #[test]
    fn test_euclidean_distance_345() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_training_set_rejects_mixed_dimensions() {
        let mut set = TrainingSet::new();
        set.push(LabeledSample::new(vec![1.0, 2.0], "alice")).unwrap();
        let err = set
            .push(LabeledSample::new(vec![1.0, 2.0, 3.0], "bob"))
            .unwrap_err();
        assert_eq!(err, DimensionMismatch { expected: 2, actual: 3 });
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_training_set_labels_sorted_distinct() {
        let set = TrainingSet::from_samples([
            LabeledSample::new(vec![0.0], "bob"),
            LabeledSample::new(vec![1.0], "alice"),
            LabeledSample::new(vec![2.0], "bob"),
        ])
        .unwrap();
        assert_eq!(set.labels(), vec!["alice", "bob"]);
        assert_eq!(set.dim(), Some(1));
    }

    #[test]
    fn test_empty_training_set_has_no_dim() {
        let set = TrainingSet::new();
        assert!(set.is_empty());
        assert_eq!(set.dim(), None);
    }

    #[test]
    fn test_prediction_unknown() {
        let p = Prediction::unknown(FaceRegion::new(0, 1, 1, 0));
        assert_eq!(p.label, UNKNOWN_LABEL);
        assert!(!p.is_known());
    }
}
