//! Gallery Builder: turn a folder of named reference photos into a list of
//! (name, embedding) entries.
//!
//! One face per reference photo is assumed. Photos with several detectable
//! faces are handled by an explicit [`ReferenceFacePolicy`] rather than
//! silent truncation; photos with no detectable face are a fatal error,
//! since a silently missing entry would degrade every downstream match.

use clap::ValueEnum;
use lineup_core::{DetectedFace, EngineError, FaceEngine, GalleryEntry};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("known folder not found: {0}")]
    FolderMissing(PathBuf),
    #[error("failed to read known folder {path}: {source}")]
    FolderUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to load reference image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("no face detected in reference image {0}")]
    NoFaceInReference(PathBuf),
    #[error("reference image {path} contains {count} faces and the policy is `error`")]
    MultipleFaces { path: PathBuf, count: usize },
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// How to pick the reference embedding when a photo contains several faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReferenceFacePolicy {
    /// Keep the first detected face (highest detector confidence).
    First,
    /// Keep the face with the largest bounding-box area.
    Largest,
    /// Refuse the reference image.
    Error,
}

/// List the files of a folder, non-recursive, sorted by file name.
///
/// Subdirectories are skipped; file-type filtering is left to the image
/// decoder. Sorting makes the scan order deterministic across platforms.
pub fn list_image_files(folder: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(folder)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort_by_key(|path| path.file_name().map(|n| n.to_os_string()));

    Ok(files)
}

/// Display name for a reference file: base name up to the first `'.'`.
pub fn display_name(file_name: &str) -> String {
    file_name.split('.').next().unwrap_or(file_name).to_string()
}

/// Build the gallery: one entry per reference image, in file-name order.
pub fn build_gallery(
    engine: &mut FaceEngine,
    folder: &Path,
    policy: ReferenceFacePolicy,
) -> Result<Vec<GalleryEntry>, GalleryError> {
    if !folder.exists() {
        return Err(GalleryError::FolderMissing(folder.to_path_buf()));
    }
    let files = list_image_files(folder).map_err(|source| GalleryError::FolderUnreadable {
        path: folder.to_path_buf(),
        source,
    })?;

    let mut gallery = Vec::with_capacity(files.len());
    for path in files {
        let name = path
            .file_name()
            .map(|n| display_name(&n.to_string_lossy()))
            .unwrap_or_default();

        let image = image::open(&path)
            .map_err(|source| GalleryError::Image { path: path.clone(), source })?
            .to_rgb8();

        let faces = engine.analyze(&image)?;
        let face = select_reference_face(faces, policy, &path)?;

        tracing::info!(
            name = %name,
            file = %path.display(),
            confidence = face.bbox.confidence,
            "enrolled reference"
        );
        gallery.push(GalleryEntry { name, embedding: face.embedding });
    }

    tracing::info!(entries = gallery.len(), "gallery built");
    Ok(gallery)
}

fn select_reference_face(
    faces: Vec<DetectedFace>,
    policy: ReferenceFacePolicy,
    path: &Path,
) -> Result<DetectedFace, GalleryError> {
    if faces.is_empty() {
        return Err(GalleryError::NoFaceInReference(path.to_path_buf()));
    }

    if faces.len() > 1 {
        match policy {
            ReferenceFacePolicy::Error => {
                return Err(GalleryError::MultipleFaces {
                    path: path.to_path_buf(),
                    count: faces.len(),
                });
            }
            ReferenceFacePolicy::First | ReferenceFacePolicy::Largest => {
                tracing::warn!(
                    file = %path.display(),
                    count = faces.len(),
                    policy = ?policy,
                    "reference image contains multiple faces"
                );
            }
        }
    }

    let face = match policy {
        ReferenceFacePolicy::Largest => faces
            .into_iter()
            .max_by(|a, b| {
                a.bbox
                    .area()
                    .partial_cmp(&b.bbox.area())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap(),
        _ => faces.into_iter().next().unwrap(),
    };

    Ok(face)
}
