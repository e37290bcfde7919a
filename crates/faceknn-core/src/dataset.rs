//! Build a [`TrainingSet`] from a labeled directory tree.
//!
//! Layout: `root/<label>/<image>`. Each image must contain exactly one
//! face; anything else is skipped and reported, never fatal.

use crate::provider::EmbeddingProvider;
use crate::types::{DimensionMismatch, Embedding, LabeledSample, TrainingSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("cannot read dataset root {}: {source}", .path.display())]
    Root {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Why an image contributed no sample.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SkipReason {
    #[error("unreadable image: {0}")]
    Unreadable(String),
    #[error("embedding provider failed: {0}")]
    ProviderFailure(String),
    #[error("didn't find a face")]
    NoFace,
    #[error("found more than one face ({0})")]
    MultipleFaces(usize),
    /// The whole label directory could not be listed.
    #[error("unreadable label directory: {0}")]
    UnreadableDirectory(String),
    #[error(transparent)]
    DimensionMismatch(#[from] DimensionMismatch),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedImage {
    pub path: PathBuf,
    pub label: String,
    pub reason: SkipReason,
}

/// Outcome of a dataset build: the accepted samples plus every skip.
///
/// A label directory that cannot be listed appears in `skipped` once, with
/// the directory as its path and [`SkipReason::UnreadableDirectory`].
#[derive(Debug, Default)]
pub struct DatasetReport {
    pub training_set: TrainingSet,
    pub skipped: Vec<SkippedImage>,
}

impl DatasetReport {
    /// Image files looked at, accepted or not.
    pub fn images_seen(&self) -> usize {
        self.training_set.len() + self.skipped_images().count()
    }

    /// Skips of individual image files.
    pub fn skipped_images(&self) -> impl Iterator<Item = &SkippedImage> {
        self.skipped
            .iter()
            .filter(|s| !matches!(s.reason, SkipReason::UnreadableDirectory(_)))
    }

    /// Label directories that could not be listed.
    pub fn unreadable_dirs(&self) -> impl Iterator<Item = &SkippedImage> {
        self.skipped
            .iter()
            .filter(|s| matches!(s.reason, SkipReason::UnreadableDirectory(_)))
    }
}

/// Walks a labeled image tree and collects one embedding per usable image.
pub struct DatasetBuilder<P> {
    provider: P,
    verbose: bool,
}

impl<P: EmbeddingProvider> DatasetBuilder<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            verbose: false,
        }
    }

    /// Log every skipped image at warn level instead of debug.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn into_provider(self) -> P {
        self.provider
    }

    /// Walk `root` and build a training set.
    ///
    /// Label directories and image files are visited in sorted order.
    /// Non-directory entries at the root and non-image files are ignored.
    pub fn build(&mut self, root: &Path) -> Result<DatasetReport, DatasetError> {
        let label_dirs = sorted_entries(root).map_err(|source| DatasetError::Root {
            path: root.to_path_buf(),
            source,
        })?;

        let mut report = DatasetReport::default();

        for dir in label_dirs.into_iter().filter(|p| p.is_dir()) {
            let Some(label) = dir.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };

            let listing = sorted_entries(&dir);
            self.collect_label(&mut report, &dir, label, listing);
        }

        tracing::info!(
            samples = report.training_set.len(),
            labels = report.training_set.labels().len(),
            skipped = report.skipped.len(),
            "dataset built"
        );

        Ok(report)
    }

    /// Add every usable image under one label directory to `report`.
    fn collect_label(
        &mut self,
        report: &mut DatasetReport,
        dir: &Path,
        label: String,
        listing: std::io::Result<Vec<PathBuf>>,
    ) {
        let images = match listing {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "cannot read label directory; skipping");
                report.skipped.push(SkippedImage {
                    path: dir.to_path_buf(),
                    label,
                    reason: SkipReason::UnreadableDirectory(e.to_string()),
                });
                return;
            }
        };

        tracing::debug!(label = %label, "collecting faces");
        for path in images.into_iter().filter(|p| p.is_file() && is_image_file(p)) {
            let result = self.embed_single_face(&path).and_then(|embedding| {
                report
                    .training_set
                    .push(LabeledSample::new(embedding, label.clone()))
                    .map_err(SkipReason::from)
            });

            if let Err(reason) = result {
                if self.verbose {
                    tracing::warn!(path = %path.display(), %reason, "image not suitable for training");
                } else {
                    tracing::debug!(path = %path.display(), %reason, "image not suitable for training");
                }
                report.skipped.push(SkippedImage {
                    path,
                    label: label.clone(),
                    reason,
                });
            }
        }
    }

    /// Decode one image and return the embedding of its single face.
    fn embed_single_face(&mut self, path: &Path) -> Result<Embedding, SkipReason> {
        let image = image::open(path)
            .map_err(|e| SkipReason::Unreadable(e.to_string()))?
            .to_rgb8();

        let mut faces = self
            .provider
            .detect_and_encode(&image)
            .map_err(|e| SkipReason::ProviderFailure(e.to_string()))?;

        match faces.len() {
            0 => Err(SkipReason::NoFace),
            1 => Ok(faces.remove(0).embedding),
            n => Err(SkipReason::MultipleFaces(n)),
        }
    }
}

fn sorted_entries(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect::<Vec<_>>();
    entries.sort();
    Ok(entries)
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|ext| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::{face, keyed_image, ScriptedProvider};

    fn write_image(dir: &Path, name: &str, key: u8) {
        std::fs::create_dir_all(dir).unwrap();
        keyed_image(key).save(dir.join(name)).unwrap();
    }

    #[test]
    fn test_is_image_file() {
        assert!(is_image_file(Path::new("a/b.jpg")));
        assert!(is_image_file(Path::new("a/b.JPEG")));
        assert!(is_image_file(Path::new("b.png")));
        assert!(!is_image_file(Path::new("b.txt")));
        assert!(!is_image_file(Path::new("noext")));
    }

    #[test]
    fn test_skips_zero_and_multiple_faces() {
        let root = tempfile::tempdir().unwrap();
        let alice = root.path().join("alice");
        let bob = root.path().join("bob");
        write_image(&alice, "1.png", 1);
        write_image(&alice, "2.png", 2);
        write_image(&alice, "empty.png", 10);
        write_image(&bob, "1.png", 3);
        write_image(&bob, "crowd.png", 11);

        let provider = ScriptedProvider::new()
            .respond(1, vec![face(vec![0.0, 0.0], 0)])
            .respond(2, vec![face(vec![0.1, 0.0], 0)])
            .respond(3, vec![face(vec![1.0, 1.0], 0)])
            .respond(10, vec![])
            .respond(11, vec![face(vec![1.0, 1.0], 0), face(vec![0.0, 0.0], 20)]);

        let report = DatasetBuilder::new(provider).build(root.path()).unwrap();

        assert_eq!(report.images_seen(), 5);
        assert_eq!(report.training_set.len(), 5 - 2);
        assert_eq!(report.training_set.labels(), vec!["alice", "bob"]);

        let reasons: Vec<&SkipReason> = report.skipped.iter().map(|s| &s.reason).collect();
        assert_eq!(reasons, vec![&SkipReason::NoFace, &SkipReason::MultipleFaces(2)]);
        assert_eq!(report.skipped[0].label, "alice");
        assert!(report.skipped[1].path.ends_with("bob/crowd.png"));
    }

    #[test]
    fn test_skip_reasons_are_distinguishable() {
        assert_eq!(SkipReason::NoFace.to_string(), "didn't find a face");
        assert_eq!(
            SkipReason::MultipleFaces(3).to_string(),
            "found more than one face (3)"
        );
    }

    #[test]
    fn test_provider_failure_does_not_abort() {
        let root = tempfile::tempdir().unwrap();
        let carol = root.path().join("carol");
        write_image(&carol, "a.png", 1);
        write_image(&carol, "b.png", 66);
        write_image(&carol, "c.png", 2);

        let provider = ScriptedProvider::new()
            .respond(1, vec![face(vec![0.0], 0)])
            .respond(2, vec![face(vec![1.0], 0)])
            .fail_on(66);

        let report = DatasetBuilder::new(provider).build(root.path()).unwrap();
        assert_eq!(report.training_set.len(), 2);
        assert_eq!(report.skipped.len(), 1);
        assert!(matches!(report.skipped[0].reason, SkipReason::ProviderFailure(_)));
    }

    #[test]
    fn test_unreadable_image_is_skipped() {
        let root = tempfile::tempdir().unwrap();
        let dave = root.path().join("dave");
        write_image(&dave, "good.png", 1);
        std::fs::write(dave.join("broken.jpg"), b"definitely not a jpeg").unwrap();

        let provider = ScriptedProvider::new().respond(1, vec![face(vec![0.5], 0)]);
        let mut builder = DatasetBuilder::new(provider);
        let report = builder.build(root.path()).unwrap();

        assert_eq!(report.training_set.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert!(matches!(report.skipped[0].reason, SkipReason::Unreadable(_)));
        // The provider never saw the broken file.
        assert_eq!(builder.into_provider().calls, 1);
    }

    #[test]
    fn test_dimension_mismatch_is_skipped() {
        let root = tempfile::tempdir().unwrap();
        let erin = root.path().join("erin");
        write_image(&erin, "a.png", 1);
        write_image(&erin, "b.png", 2);

        let provider = ScriptedProvider::new()
            .respond(1, vec![face(vec![0.0, 0.0], 0)])
            .respond(2, vec![face(vec![0.0, 0.0, 0.0], 0)]);

        let report = DatasetBuilder::new(provider).build(root.path()).unwrap();
        assert_eq!(report.training_set.len(), 1);
        assert_eq!(
            report.skipped[0].reason,
            SkipReason::DimensionMismatch(DimensionMismatch { expected: 2, actual: 3 })
        );
    }

    #[test]
    fn test_ignores_root_files_and_non_images() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("README.txt"), b"labels below").unwrap();
        write_image(&root.path().join("frank"), "1.png", 1);
        std::fs::write(root.path().join("frank").join("notes.txt"), b"x").unwrap();

        let provider = ScriptedProvider::new().respond(1, vec![face(vec![0.0], 0)]);
        let mut builder = DatasetBuilder::new(provider);
        let report = builder.build(root.path()).unwrap();

        assert_eq!(report.training_set.len(), 1);
        assert!(report.skipped.is_empty());
        assert_eq!(builder.into_provider().calls, 1);
    }

    #[test]
    fn test_unreadable_label_dir_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let frank = root.path().join("frank");
        let mut builder = DatasetBuilder::new(ScriptedProvider::new());
        let mut report = DatasetReport::default();

        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        builder.collect_label(&mut report, &frank, "frank".into(), Err(denied));

        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].path, frank);
        assert_eq!(report.skipped[0].label, "frank");
        assert!(matches!(
            report.skipped[0].reason,
            SkipReason::UnreadableDirectory(_)
        ));
        assert_eq!(report.unreadable_dirs().count(), 1);
        assert_eq!(report.images_seen(), 0);
    }

    #[test]
    fn test_images_seen_counts_files_only() {
        let root = tempfile::tempdir().unwrap();
        let gina = root.path().join("gina");
        write_image(&gina, "a.png", 1);
        write_image(&gina, "b.png", 2);

        let provider = ScriptedProvider::new()
            .respond(1, vec![face(vec![0.1], 0)])
            .respond(2, vec![]);
        let mut builder = DatasetBuilder::new(provider);
        let mut report = builder.build(root.path()).unwrap();
        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        builder.collect_label(&mut report, &root.path().join("hal"), "hal".into(), Err(denied));

        assert_eq!(report.skipped.len(), 2);
        assert_eq!(report.skipped_images().count(), 1);
        assert_eq!(report.images_seen(), 2);
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let root = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::new();
        let err = DatasetBuilder::new(provider)
            .build(&root.path().join("nope"))
            .unwrap_err();
        assert!(matches!(err, DatasetError::Root { .. }));
    }

    #[test]
    fn test_empty_root_gives_empty_set() {
        let root = tempfile::tempdir().unwrap();
        let report = DatasetBuilder::new(ScriptedProvider::new())
            .build(root.path())
            .unwrap();
        assert!(report.training_set.is_empty());
        assert_eq!(report.images_seen(), 0);
    }
}
