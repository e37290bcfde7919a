//! Embedding provider seam.
//!
//! Face detection and embedding extraction are external: whatever model is
//! plugged in here maps an image to zero or more (region, embedding) pairs.

use crate::types::{Embedding, FaceRegion};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("embedding provider failed: {0}")]
    Failed(String),
    #[error("embedding provider i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("embedding provider returned malformed output: {0}")]
    Decode(#[from] serde_json::Error),
}

/// One face found by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub region: FaceRegion,
    pub embedding: Embedding,
}

/// Maps an image to detected face regions and one embedding per region.
///
/// Implementations must be deterministic for a fixed model and input.
/// Output order is the provider's detection order and is preserved by
/// every caller. Takes `&mut self` since real providers own inference
/// sessions.
pub trait EmbeddingProvider {
    fn detect_and_encode(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, ProviderError>;
}

impl<P: EmbeddingProvider + ?Sized> EmbeddingProvider for &mut P {
    fn detect_and_encode(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, ProviderError> {
        (**self).detect_and_encode(image)
    }
}

impl<P: EmbeddingProvider + ?Sized> EmbeddingProvider for Box<P> {
    fn detect_and_encode(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, ProviderError> {
        (**self).detect_and_encode(image)
    }
}
