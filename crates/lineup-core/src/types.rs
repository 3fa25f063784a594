use serde::{Deserialize, Serialize};

/// Euclidean distance above which two embeddings are considered different
/// identities. Calibrated for L2-normalized ArcFace embeddings; equivalent
/// to a cosine similarity cutoff of 0.40 (d² = 2 − 2·cos).
pub const MATCH_DISTANCE_THRESHOLD: f32 = 1.10;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

/// Face embedding vector (512-dimensional for ArcFace), L2-normalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    /// Euclidean distance between two embeddings. Lower = more similar.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// A named reference embedding, built once from a reference photo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub name: String,
    pub embedding: Embedding,
}

/// Result of resolving a probe embedding against a gallery.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    /// Index of the matched gallery entry, `None` when the nearest
    /// neighbor is beyond the distance threshold (or the gallery is empty).
    pub index: Option<usize>,
    /// Distance to the nearest gallery entry (`f32::INFINITY` when empty).
    pub distance: f32,
}

/// Strategy for resolving a probe embedding against a gallery of references.
pub trait Matcher {
    fn resolve(&self, probe: &Embedding, gallery: &[GalleryEntry]) -> MatchOutcome;
}

/// Nearest-neighbor matcher over Euclidean distance.
///
/// The match gate is evaluated at the arg-min index only: a probe resolves
/// to its single nearest neighbor or to nothing, never to a farther entry
/// that happens to sit inside the threshold. Ties break toward the
/// first-occurring index.
pub struct NearestNeighborMatcher {
    threshold: f32,
}

impl NearestNeighborMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Default for NearestNeighborMatcher {
    fn default() -> Self {
        Self::new(MATCH_DISTANCE_THRESHOLD)
    }
}

impl Matcher for NearestNeighborMatcher {
    fn resolve(&self, probe: &Embedding, gallery: &[GalleryEntry]) -> MatchOutcome {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, entry) in gallery.iter().enumerate() {
            let dist = probe.euclidean_distance(&entry.embedding);
            // Strict < keeps the first index on exact ties.
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_dist <= self.threshold => MatchOutcome {
                index: Some(idx),
                distance: best_dist,
            },
            _ => MatchOutcome {
                index: None,
                distance: best_dist,
            },
        }
    }
}
