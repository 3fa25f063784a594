//! Detection + recognition engine over decoded images.
//!
//! Bundles the SCRFD detector and the ArcFace recognizer behind one
//! synchronous call that turns an RGB image into (region, embedding) pairs.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// SCRFD detection model file name (insightface buffalo_l pack).
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// ArcFace recognition model file name (insightface buffalo_l pack).
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// A face found in a query image: pixel-space region plus its embedding.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// Face analysis engine: detect regions, then extract one embedding per
/// region, preserving detection order.
#[derive(Debug)]
pub struct FaceEngine {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl FaceEngine {
    /// Load both ONNX models from `model_dir`. Fails fast if either model
    /// file is missing.
    pub fn load(model_dir: &Path) -> Result<Self, EngineError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?;
        Ok(Self { detector, recognizer })
    }

    /// Detect all faces in an image and extract an embedding for each.
    ///
    /// Returns faces in detection order (highest confidence first); the
    /// embedding at index i belongs to the region at index i.
    pub fn analyze(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, EngineError> {
        let gray = image::imageops::grayscale(image);

        let regions = self.detector.detect(&gray)?;
        tracing::debug!(faces = regions.len(), "detection complete");

        let mut faces = Vec::with_capacity(regions.len());
        for bbox in regions {
            let embedding = self.recognizer.extract(&gray, &bbox)?;
            faces.push(DetectedFace { bbox, embedding });
        }

        Ok(faces)
    }
}

/// Default model directory: `$LINEUP_MODEL_DIR`, else
/// `$XDG_DATA_HOME/lineup/models`, else `~/.local/share/lineup/models`.
pub fn default_model_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("LINEUP_MODEL_DIR") {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("lineup/models")
}
