//! Open-set face prediction: KNN vote plus a nearest-distance gate.

use crate::index::{IndexError, KnnIndex};
use crate::persist::{self, PersistError};
use crate::provider::{DetectedFace, EmbeddingProvider, ProviderError};
use crate::types::Prediction;
use image::RgbImage;
use std::path::PathBuf;
use thiserror::Error;

/// Nearest-neighbor distance above which a face is reported as unknown.
///
/// Calibrated for embeddings from the same model family used in training.
pub const DEFAULT_DISTANCE_THRESHOLD: f64 = 0.5;

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("no classifier supplied: pass an index or a path to a saved index")]
    Configuration,
    #[error("distance threshold must be a non-negative number, got {0}")]
    InvalidThreshold(f64),
    #[error("loading index: {0}")]
    Persist(#[from] PersistError),
    #[error("embedding provider: {0}")]
    Provider(#[from] ProviderError),
    #[error("index query: {0}")]
    Index(#[from] IndexError),
}

/// Accept `threshold` if it can gate distances: not NaN, not negative.
pub fn check_distance_threshold(threshold: f64) -> Result<f64, PredictError> {
    if threshold.is_nan() || threshold < 0.0 {
        return Err(PredictError::InvalidThreshold(threshold));
    }
    Ok(threshold)
}

/// Where the predictor gets its classifier from.
#[derive(Debug, Clone, Copy)]
pub enum IndexSource<'a> {
    InMemory(&'a KnnIndex),
    Path(&'a std::path::Path),
}

impl<'a> From<&'a KnnIndex> for IndexSource<'a> {
    fn from(index: &'a KnnIndex) -> Self {
        IndexSource::InMemory(index)
    }
}

impl<'a> From<&'a PathBuf> for IndexSource<'a> {
    fn from(path: &'a PathBuf) -> Self {
        IndexSource::Path(path.as_path())
    }
}

/// Detect faces in `image` and label each one.
///
/// Returns one prediction per detected face, in the provider's detection
/// order. No faces is an empty result, not an error.
pub fn predict<P: EmbeddingProvider + ?Sized>(
    image: &RgbImage,
    provider: &mut P,
    source: Option<IndexSource<'_>>,
    distance_threshold: f64,
) -> Result<Vec<Prediction>, PredictError> {
    check_distance_threshold(distance_threshold)?;
    let loaded;
    let index = match source.ok_or(PredictError::Configuration)? {
        IndexSource::InMemory(index) => index,
        IndexSource::Path(path) => {
            loaded = persist::load(path)?;
            &loaded
        }
    };

    let faces = provider.detect_and_encode(image)?;
    if faces.is_empty() {
        tracing::debug!("no faces found");
        return Ok(Vec::new());
    }

    predict_faces(index, &faces, distance_threshold)
}

/// Label already-encoded faces against `index`.
///
/// The nearest sample's distance alone decides known vs unknown; a known
/// face gets the index's weighted plurality label.
pub fn predict_faces(
    index: &KnnIndex,
    faces: &[DetectedFace],
    distance_threshold: f64,
) -> Result<Vec<Prediction>, PredictError> {
    check_distance_threshold(distance_threshold)?;
    faces
        .iter()
        .map(|face| {
            let nearest = index.kneighbors(&face.embedding, 1)?;
            let distance = nearest.first().map_or(f64::INFINITY, |n| n.distance);

            if distance > distance_threshold {
                tracing::debug!(distance, distance_threshold, "face rejected as unknown");
                return Ok(Prediction::unknown(face.region));
            }

            let vote = index.vote(&face.embedding)?;
            tracing::debug!(
                label = %vote.label,
                distance,
                vote_share = vote.vote_share,
                "face matched"
            );
            Ok(Prediction {
                label: vote.label,
                region: face.region,
            })
        })
        .collect()
}
