//! ArcFace face recognizer via ONNX Runtime.
//!
//! Aligns each detected face to the canonical 112×112 landmark positions
//! with a 4-DOF similarity transform, then extracts an L2-normalized
//! 512-dimensional embedding.

use crate::types::{BoundingBox, Embedding};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: usize = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric normalization, unlike SCRFD
const ARCFACE_EMBEDDING_DIM: usize = 512;

/// InsightFace reference landmark positions for a 112×112 aligned crop:
/// [left eye, right eye, nose, left mouth, right mouth].
const REFERENCE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0} — download from insightface and place in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks — the detector must supply landmarks for alignment")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based embedding extractor.
#[derive(Debug)]
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), "loaded ArcFace model");

        Ok(Self { session })
    }

    /// Extract an embedding for a detected face in a grayscale image.
    ///
    /// The face must carry landmarks; the crop is aligned to the canonical
    /// 112×112 position before inference.
    pub fn extract(
        &mut self,
        image: &GrayImage,
        face: &BoundingBox,
    ) -> Result<Embedding, RecognizerError> {
        let landmarks = face.landmarks.as_ref().ok_or(RecognizerError::NoLandmarks)?;

        let aligned = align_face(image, landmarks);
        let input = preprocess(&aligned);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let raw: Vec<f32> = raw_data.to_vec();
        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw
        };

        Ok(Embedding { values })
    }
}

/// Normalize a 112×112 aligned crop into a NCHW float tensor, grayscale
/// replicated across the three channels.
fn preprocess(aligned: &[u8]) -> Array4<f32> {
    let size = ARCFACE_INPUT_SIZE;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for y in 0..size {
        for x in 0..size {
            let pixel = aligned.get(y * size + x).copied().unwrap_or(0) as f32;
            let normalized = (pixel - ARCFACE_MEAN) / ARCFACE_STD;
            tensor[[0, 0, y, x]] = normalized;
            tensor[[0, 1, y, x]] = normalized;
            tensor[[0, 2, y, x]] = normalized;
        }
    }

    tensor
}

/// Warp the face region into a canonical 112×112 crop.
///
/// Estimates the similarity transform mapping the detected landmarks onto
/// the reference positions and applies it with inverse-mapped bilinear
/// sampling. Out-of-bounds samples read as black.
fn align_face(image: &GrayImage, landmarks: &[(f32, f32); 5]) -> Vec<u8> {
    let matrix = estimate_similarity_transform(landmarks, &REFERENCE_LANDMARKS);
    warp_to_crop(image, &matrix, ARCFACE_INPUT_SIZE)
}

/// Least-squares 4-DOF similarity transform (scale, rotation, translation)
/// from `src` landmarks to `dst` landmarks.
///
/// Returns [a, -b, tx, b, a, ty], the row-major 2×3 matrix
/// `[[a, -b, tx], [b, a, ty]]`.
fn estimate_similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> [f32; 6] {
    // Normal equations for the overdetermined system; each point pair
    // contributes two rows in the unknowns [a, b, tx, ty]:
    //   sx·a - sy·b + tx = dx
    //   sy·a + sx·b + ty = dy
    let mut ata = [0.0f32; 16];
    let mut atb = [0.0f32; 4];

    for i in 0..5 {
        let (sx, sy) = src[i];
        let (dx, dy) = dst[i];

        let r1 = [sx, -sy, 1.0, 0.0];
        let r2 = [sy, sx, 0.0, 1.0];

        for j in 0..4 {
            for k in 0..4 {
                ata[j * 4 + k] += r1[j] * r1[k] + r2[j] * r2[k];
            }
            atb[j] += r1[j] * dx + r2[j] * dy;
        }
    }

    let x = solve_4x4(&ata, &atb);
    let (a, b, tx, ty) = (x[0], x[1], x[2], x[3]);

    [a, -b, tx, b, a, ty]
}

/// Gaussian elimination with partial pivoting for the 4×4 normal equations.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(ata: &[f32; 16], atb: &[f32; 4]) -> [f32; 4] {
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        for j in 0..4 {
            m[i][j] = ata[i * 4 + j];
        }
        m[i][4] = atb[i];
    }

    for col in 0..4 {
        let mut max_row = col;
        for row in (col + 1)..4 {
            if m[row][col].abs() > m[max_row][col].abs() {
                max_row = row;
            }
        }
        m.swap(col, max_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            // Degenerate landmark configuration; identity keeps the warp sane.
            return [1.0, 0.0, 0.0, 0.0];
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }

    x
}

/// Apply a 2×3 similarity warp, producing a square grayscale crop.
fn warp_to_crop(image: &GrayImage, matrix: &[f32; 6], out_size: usize) -> Vec<u8> {
    let (a, tx) = (matrix[0], matrix[2]);
    let (b, ty) = (matrix[3], matrix[5]);
    let (width, height) = image.dimensions();

    // Invert the 2×2 rotation-scale block: M = [[a, -b], [b, a]], det = a² + b²
    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return vec![0u8; out_size * out_size];
    }
    let ia = a / det;
    let ib = b / det;

    let mut output = vec![0u8; out_size * out_size];

    let sample = |x: i32, y: i32| -> f32 {
        if x >= 0 && (x as u32) < width && y >= 0 && (y as u32) < height {
            image.get_pixel(x as u32, y as u32)[0] as f32
        } else {
            0.0
        }
    };

    for oy in 0..out_size {
        for ox in 0..out_size {
            // src = M⁻¹ · (dst − t)
            let dx = ox as f32 - tx;
            let dy = oy as f32 - ty;
            let sx = ia * dx + ib * dy;
            let sy = -ib * dx + ia * dy;

            let x0 = sx.floor() as i32;
            let y0 = sy.floor() as i32;
            let fx = sx - x0 as f32;
            let fy = sy - y0 as f32;

            let val = sample(x0, y0) * (1.0 - fx) * (1.0 - fy)
                + sample(x0 + 1, y0) * fx * (1.0 - fy)
                + sample(x0, y0 + 1) * (1.0 - fx) * fy
                + sample(x0 + 1, y0 + 1) * fx * fy;

            output[oy * out_size + ox] = val.round().clamp(0.0, 255.0) as u8;
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_preprocess_output_shape() {
        let aligned = vec![128u8; ARCFACE_INPUT_SIZE * ARCFACE_INPUT_SIZE];
        let tensor = preprocess(&aligned);
        assert_eq!(tensor.shape(), &[1, 3, ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE]);
    }

    #[test]
    fn test_preprocess_normalization() {
        let aligned = vec![128u8; ARCFACE_INPUT_SIZE * ARCFACE_INPUT_SIZE];
        let tensor = preprocess(&aligned);
        let expected = (128.0 - ARCFACE_MEAN) / ARCFACE_STD;
        assert!((tensor[[0, 0, 0, 0]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_channels_identical() {
        let aligned = vec![100u8; ARCFACE_INPUT_SIZE * ARCFACE_INPUT_SIZE];
        let tensor = preprocess(&aligned);
        for y in [0, 55, 111] {
            for x in [0, 55, 111] {
                assert_eq!(tensor[[0, 0, y, x]], tensor[[0, 1, y, x]]);
                assert_eq!(tensor[[0, 1, y, x]], tensor[[0, 2, y, x]]);
            }
        }
    }

    #[test]
    fn test_identity_transform() {
        // src == dst: a ≈ 1, b ≈ 0, translation ≈ 0
        let pts = REFERENCE_LANDMARKS;
        let m = estimate_similarity_transform(&pts, &pts);

        assert!((m[0] - 1.0).abs() < 1e-4, "a = {}", m[0]);
        assert!(m[1].abs() < 1e-4, "-b = {}", m[1]);
        assert!(m[2].abs() < 1e-3, "tx = {}", m[2]);
        assert!(m[3].abs() < 1e-4, "b = {}", m[3]);
        assert!((m[4] - 1.0).abs() < 1e-4, "a2 = {}", m[4]);
        assert!(m[5].abs() < 1e-3, "ty = {}", m[5]);
    }

    /// Reference landmarks scaled by `s` and shifted by `(dx, dy)`.
    fn transformed_reference(s: f32, dx: f32, dy: f32) -> [(f32, f32); 5] {
        REFERENCE_LANDMARKS.map(|(x, y)| (x * s + dx, y * s + dy))
    }

    #[test]
    fn test_scale_and_translation_recovered() {
        // Landmarks at 4x scale, offset by (10, 20): the estimate must
        // invert both, giving a ≈ 0.25 with no rotation.
        let src = transformed_reference(4.0, 10.0, 20.0);
        let m = estimate_similarity_transform(&src, &REFERENCE_LANDMARKS);

        assert!((m[0] - 0.25).abs() < 0.01, "a = {}, expected ~0.25", m[0]);
        assert!(m[3].abs() < 0.01, "b = {}, expected ~0", m[3]);
    }

    #[test]
    fn test_warp_output_size() {
        let image = GrayImage::from_pixel(640, 480, Luma([128u8]));
        let m = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let out = warp_to_crop(&image, &m, ARCFACE_INPUT_SIZE);
        assert_eq!(out.len(), ARCFACE_INPUT_SIZE * ARCFACE_INPUT_SIZE);
        assert!(out.iter().all(|&p| p == 128));
    }

    #[test]
    fn test_landmark_maps_to_reference_position() {
        // A bright patch at the nose landmark must land near the reference
        // nose position after alignment. The face sits at 1.5x scale,
        // offset into a 200×200 frame.
        let mut image = GrayImage::new(200, 200);
        let src_landmarks = transformed_reference(1.5, 20.0, 10.0);

        let (nx, ny) = src_landmarks[2];
        let (nx, ny) = (nx.round() as u32, ny.round() as u32);
        for dy in 0..5 {
            for dx in 0..5 {
                image.put_pixel(nx - 2 + dx, ny - 2 + dy, Luma([255u8]));
            }
        }

        let aligned = align_face(&image, &src_landmarks);

        let ref_x = REFERENCE_LANDMARKS[2].0.round() as usize;
        let ref_y = REFERENCE_LANDMARKS[2].1.round() as usize;

        let mut max_val = 0u8;
        for dy in 0..3usize {
            for dx in 0..3usize {
                let x = ref_x - 1 + dx;
                let y = ref_y - 1 + dy;
                if x < ARCFACE_INPUT_SIZE && y < ARCFACE_INPUT_SIZE {
                    max_val = max_val.max(aligned[y * ARCFACE_INPUT_SIZE + x]);
                }
            }
        }
        assert!(max_val > 100, "expected bright patch near ({ref_x}, {ref_y}), max={max_val}");
    }
}
