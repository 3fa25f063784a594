//! Match-and-Annotate pipeline: for each query image, detect faces, resolve
//! each against the gallery, draw annotations, and write the result.
//!
//! Query images are processed independently. A failure on one image is
//! recorded and the batch continues; the run summary carries the failures
//! so the caller can reflect them in the exit status.

use crate::annotate::Annotator;
use crate::gallery::list_image_files;
use lineup_core::{EngineError, FaceEngine, GalleryEntry, Matcher, NearestNeighborMatcher};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Sentinel label for a face whose nearest neighbor fails the match gate.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Batch-level failures that abort the run before any image is processed.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("unknown folder not found: {0}")]
    FolderMissing(PathBuf),
    #[error("failed to read unknown folder {path}: {source}")]
    FolderUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to create results folder {path}: {source}")]
    ResultsDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Per-image failures; these do not abort the batch.
#[derive(Error, Debug)]
pub enum ImageFailure {
    #[error("failed to load image: {0}")]
    Load(#[source] image::ImageError),
    #[error(transparent)]
    Analyze(#[from] EngineError),
    #[error("failed to write annotated image: {0}")]
    Save(#[source] image::ImageError),
}

/// Outcome of a batch run.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Query images annotated and written successfully.
    pub processed: usize,
    /// Query images that failed, with the reason.
    pub failures: Vec<(PathBuf, ImageFailure)>,
}

impl RunSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Run the pipeline over every file in `unknown_folder`.
///
/// The gallery is borrowed read-only; no state is shared between images.
pub fn run_batch(
    engine: &mut FaceEngine,
    gallery: &[GalleryEntry],
    annotator: &Annotator,
    unknown_folder: &Path,
    results_folder: &Path,
) -> Result<RunSummary, PipelineError> {
    if !unknown_folder.exists() {
        return Err(PipelineError::FolderMissing(unknown_folder.to_path_buf()));
    }
    prepare_results_dir(results_folder)?;

    let files =
        list_image_files(unknown_folder).map_err(|source| PipelineError::FolderUnreadable {
            path: unknown_folder.to_path_buf(),
            source,
        })?;

    let matcher = NearestNeighborMatcher::default();
    let mut summary = RunSummary::default();

    for path in files {
        match process_image(engine, gallery, &matcher, annotator, &path, results_folder) {
            Ok(faces) => {
                tracing::info!(file = %path.display(), faces, "annotated");
                summary.processed += 1;
            }
            Err(failure) => {
                tracing::warn!(file = %path.display(), error = %failure, "query image failed");
                summary.failures.push((path, failure));
            }
        }
    }

    Ok(summary)
}

/// Create the results folder if absent; succeeds when it already exists.
fn prepare_results_dir(path: &Path) -> Result<(), PipelineError> {
    std::fs::create_dir_all(path).map_err(|source| PipelineError::ResultsDir {
        path: path.to_path_buf(),
        source,
    })
}

/// Process one query image end to end; returns the number of faces found.
fn process_image(
    engine: &mut FaceEngine,
    gallery: &[GalleryEntry],
    matcher: &NearestNeighborMatcher,
    annotator: &Annotator,
    path: &Path,
    results_folder: &Path,
) -> Result<usize, ImageFailure> {
    let mut image = image::open(path).map_err(ImageFailure::Load)?.to_rgb8();

    let faces = engine.analyze(&image)?;

    for face in &faces {
        let outcome = matcher.resolve(&face.embedding, gallery);
        let name = resolve_name(outcome.index, gallery);
        tracing::debug!(
            name,
            distance = outcome.distance,
            confidence = face.bbox.confidence,
            "face resolved"
        );
        annotator.annotate(&mut image, &face.bbox, name);
    }

    // Same file name as the query image; an existing output is overwritten.
    let out_path = results_folder.join(path.file_name().unwrap_or_default());
    image.save(&out_path).map_err(ImageFailure::Save)?;

    Ok(faces.len())
}

/// Gallery name at the resolved index, or the `"Unknown"` sentinel.
fn resolve_name(index: Option<usize>, gallery: &[GalleryEntry]) -> &str {
    match index {
        Some(i) => gallery[i].name.as_str(),
        None => UNKNOWN_LABEL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lineup_core::Embedding;

    #[test]
    fn test_resolve_name_matched() {
        let gallery = vec![GalleryEntry {
            name: "alice".into(),
            embedding: Embedding { values: vec![1.0] },
        }];
        assert_eq!(resolve_name(Some(0), &gallery), "alice");
    }

    #[test]
    fn test_resolve_name_unmatched_is_sentinel() {
        assert_eq!(resolve_name(None, &[]), UNKNOWN_LABEL);
    }

    #[test]
    fn test_prepare_results_dir_creates_nested() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("out/results");
        prepare_results_dir(&results).unwrap();
        assert!(results.is_dir());
    }

    #[test]
    fn test_prepare_results_dir_existing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        prepare_results_dir(dir.path()).unwrap();
        prepare_results_dir(dir.path()).unwrap();
    }

    #[test]
    fn test_summary_reports_failures() {
        let mut summary = RunSummary::default();
        assert!(summary.all_succeeded());

        summary.processed = 2;
        summary.failures.push((
            PathBuf::from("bad.jpg"),
            ImageFailure::Load(image::ImageError::IoError(io::Error::new(
                io::ErrorKind::NotFound,
                "missing",
            ))),
        ));
        assert!(!summary.all_succeeded());
    }
}
