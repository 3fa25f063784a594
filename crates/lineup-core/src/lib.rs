//! lineup-core — Face detection, embedding extraction, and matching.
//!
//! Uses SCRFD for face detection and ArcFace for embeddings, both running
//! via ONNX Runtime for CPU inference. The nearest-neighbor matcher
//! resolves probe embeddings against a gallery of named references.

pub mod detector;
pub mod engine;
pub mod recognizer;
pub mod types;

pub use engine::{default_model_dir, DetectedFace, EngineError, FaceEngine};
pub use types::{
    BoundingBox, Embedding, GalleryEntry, MatchOutcome, Matcher, NearestNeighborMatcher,
    MATCH_DISTANCE_THRESHOLD,
};
