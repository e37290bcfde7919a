//! faceknn-core: Open-set face recognition over a k-nearest-neighbor index.
//!
//! Builds a labeled embedding dataset from a directory tree, fits a
//! distance-weighted KNN index over it, and labels new faces, rejecting
//! any whose nearest training sample is too far away as "unknown".
//! Face detection and embedding extraction are supplied by the caller
//! through [`EmbeddingProvider`].

pub mod dataset;
pub mod index;
pub mod persist;
pub mod predictor;
pub mod provider;
pub mod search;
pub mod trainer;
pub mod types;
pub mod workspace;

pub use dataset::{DatasetBuilder, DatasetError, DatasetReport, SkipReason, SkippedImage};
pub use index::{IndexError, IndexSummary, KnnIndex};
pub use persist::PersistError;
pub use predictor::{
    check_distance_threshold, predict, predict_faces, IndexSource, PredictError,
    DEFAULT_DISTANCE_THRESHOLD,
};
pub use provider::{DetectedFace, EmbeddingProvider, ProviderError};
pub use search::{NeighborSearch, SearchStrategy};
pub use trainer::{auto_k, train, TrainError, TrainOptions};
pub use types::{
    Classification, Embedding, FaceRegion, LabeledSample, Prediction, TrainingSet, UNKNOWN_LABEL,
};
