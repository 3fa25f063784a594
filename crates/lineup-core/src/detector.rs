//! SCRFD face detector via ONNX Runtime.
//!
//! Runs the SCRFD anchor-free model over a letterboxed 640×640 input and
//! decodes the three stride levels into pixel-space bounding boxes with
//! five-point landmarks, followed by NMS.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — download from insightface and place in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Scale and padding applied by the letterbox resize, kept for mapping
/// detections back to source-image coordinates.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx, kps_idx).
type StrideOutputIndices = (usize, usize, usize);

/// SCRFD-based face detector.
#[derive(Debug)]
pub struct FaceDetector {
    session: Session,
    /// Per-stride output indices [(score, bbox, kps)] for strides [8, 16, 32],
    /// discovered by name at load time with a positional fallback.
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self { session, stride_indices })
    }

    /// Detect faces in a grayscale image, returning bounding boxes sorted
    /// by confidence (highest first).
    pub fn detect(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let (input, letterbox) = preprocess(image);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all_detections = Vec::new();

        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            let (_, kps) = outputs[kps_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("kps stride {stride}: {e}")))?;

            all_detections.extend(decode_stride(
                scores,
                bboxes,
                kps,
                stride,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        let mut result = nms(all_detections, SCRFD_NMS_THRESHOLD);
        result.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(result)
    }
}

/// Letterbox-resize a grayscale image into a normalized NCHW float tensor.
///
/// The image is scaled to fit 640×640 preserving aspect ratio, centered, and
/// padded with the model mean (which normalizes to 0.0). Grayscale is
/// replicated across the three input channels.
fn preprocess(image: &GrayImage) -> (Array4<f32>, Letterbox) {
    let (width, height) = image.dimensions();
    let input = SCRFD_INPUT_SIZE;

    let scale = (input as f32 / width as f32).min(input as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as u32).max(1);
    let new_h = ((height as f32 * scale).round() as u32).max(1);

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let pad_x = (input - new_w) as f32 / 2.0;
    let pad_y = (input - new_h) as f32 / 2.0;
    let x0 = pad_x.floor() as u32;
    let y0 = pad_y.floor() as u32;

    let mut tensor = Array4::<f32>::zeros((1, 3, input as usize, input as usize));

    for y in 0..input {
        for x in 0..input {
            let pixel = if y >= y0 && y < y0 + new_h && x >= x0 && x < x0 + new_w {
                resized.get_pixel(x - x0, y - y0)[0] as f32
            } else {
                SCRFD_MEAN
            };

            let normalized = (pixel - SCRFD_MEAN) / SCRFD_STD;
            tensor[[0, 0, y as usize, x as usize]] = normalized;
            tensor[[0, 1, y as usize, x as usize]] = normalized;
            tensor[[0, 2, y as usize, x as usize]] = normalized;
        }
    }

    (tensor, Letterbox { scale, pad_x, pad_y })
}

/// Discover output tensor ordering by name.
///
/// SCRFD exports may name tensors "score_8", "bbox_16", "kps_32", etc., or
/// carry generic numeric names. When the named pattern is present, map each
/// name to its stride slot; otherwise fall back to the standard positional
/// layout: [0-2] scores, [3-5] bboxes, [6-8] kps (strides 8, 16, 32).
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named = SCRFD_STRIDES.iter().all(|&stride| {
        find("score", stride).is_some()
            && find("bbox", stride).is_some()
            && find("kps", stride).is_some()
    });

    if named {
        std::array::from_fn(|i| {
            let stride = SCRFD_STRIDES[i];
            (
                find("score", stride).unwrap(),
                find("bbox", stride).unwrap(),
                find("kps", stride).unwrap(),
            )
        })
    } else {
        tracing::info!(?names, "SCRFD output names not recognized, using positional mapping");
        [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
    }
}

/// Decode detections for a single stride level back into source coordinates.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid = SCRFD_INPUT_SIZE as usize / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;

    let mut detections = Vec::new();

    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let anchor_idx = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_cx = (anchor_idx % grid) as f32 * stride as f32;
        let anchor_cy = (anchor_idx / grid) as f32 * stride as f32;

        // bbox offsets are [left, top, right, bottom] distances in stride units
        let off = idx * 4;
        if off + 3 >= bboxes.len() {
            continue;
        }
        let x1 = anchor_cx - bboxes[off] * stride as f32;
        let y1 = anchor_cy - bboxes[off + 1] * stride as f32;
        let x2 = anchor_cx + bboxes[off + 2] * stride as f32;
        let y2 = anchor_cy + bboxes[off + 3] * stride as f32;

        let unmap = |v: f32, pad: f32| (v - pad) / letterbox.scale;

        let kps_off = idx * 10;
        let landmarks = if kps_off + 9 < kps.len() {
            let mut lms = [(0.0f32, 0.0f32); 5];
            for (i, lm) in lms.iter_mut().enumerate() {
                let lx = anchor_cx + kps[kps_off + i * 2] * stride as f32;
                let ly = anchor_cy + kps[kps_off + i * 2 + 1] * stride as f32;
                *lm = (unmap(lx, letterbox.pad_x), unmap(ly, letterbox.pad_y));
            }
            Some(lms)
        } else {
            None
        };

        let left = unmap(x1, letterbox.pad_x);
        let top = unmap(y1, letterbox.pad_y);
        detections.push(BoundingBox {
            x: left,
            y: top,
            width: unmap(x2, letterbox.pad_x) - left,
            height: unmap(y2, letterbox.pad_y) - top,
            confidence: score,
            landmarks,
        });
    }

    detections
}

/// Non-Maximum Suppression: drop detections overlapping a stronger one.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<BoundingBox> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

/// Intersection-over-Union of two bounding boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.area() + b.area() - inter;

    if union > 0.0 { inter / union } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: conf, landmarks: None }
    }

    #[test]
    fn test_iou_identical() {
        let a = make_bbox(12.0, 8.0, 64.0, 48.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = make_bbox(0.0, 0.0, 30.0, 30.0, 1.0);
        let b = make_bbox(31.0, 0.0, 30.0, 30.0, 1.0);
        assert!(iou(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_vertical_overlap() {
        // Two 10×20 boxes sharing a 10×5 strip: inter 50, union 350.
        let a = make_bbox(0.0, 0.0, 10.0, 20.0, 1.0);
        let b = make_bbox(0.0, 15.0, 10.0, 20.0, 1.0);
        assert!((iou(&a, &b) - 50.0 / 350.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        // Two near-coincident 40×40 boxes (IoU ≈ 0.82) and one far away;
        // the weaker twin goes, both others stay, sorted by confidence.
        let detections = vec![
            make_bbox(12.0, 12.0, 40.0, 40.0, 0.6),
            make_bbox(10.0, 10.0, 40.0, 40.0, 0.95),
            make_bbox(200.0, 40.0, 30.0, 30.0, 0.5),
        ];
        let result = nms(detections, 0.4);
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.95).abs() < 1e-6);
        assert!((result[1].confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_below_threshold_overlap() {
        // IoU just under the threshold must not suppress: 40×40 boxes
        // offset by 10 overlap 30×30 = 900 over union 2300 ≈ 0.39.
        let detections = vec![
            make_bbox(0.0, 0.0, 40.0, 40.0, 0.9),
            make_bbox(10.0, 10.0, 40.0, 40.0, 0.8),
        ];
        assert_eq!(nms(detections, 0.4).len(), 2);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_discover_output_indices_grouped_by_stride() {
        // Export grouped per stride rather than per tensor kind.
        let names: Vec<String> = [
            "score_8", "bbox_8", "kps_8",
            "score_16", "bbox_16", "kps_16",
            "score_32", "bbox_32", "kps_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let indices = discover_output_indices(&names);
        assert_eq!(indices[0], (0, 1, 2));
        assert_eq!(indices[1], (3, 4, 5));
        assert_eq!(indices[2], (6, 7, 8));
    }

    #[test]
    fn test_discover_output_indices_numeric_names_fall_back() {
        // Generic graph-node names like the insightface det_10g export.
        let names: Vec<String> = ["448", "471", "494", "451", "474", "497", "454", "477", "500"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(discover_output_indices(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_discover_output_indices_partial_names_fall_back() {
        // Only the score tensors are named; incomplete naming must not be
        // trusted for any stride.
        let names: Vec<String> = [
            "score_8", "score_16", "score_32",
            "out_3", "out_4", "out_5",
            "out_6", "out_7", "out_8",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(discover_output_indices(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_preprocess_shape_and_padding() {
        // 320×240 letterboxed into 640×640: scale 2.0, vertical pad 80 each side.
        let image = GrayImage::from_pixel(320, 240, image::Luma([255u8]));
        let (tensor, letterbox) = preprocess(&image);

        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert!((letterbox.scale - 2.0).abs() < 1e-6);
        assert!((letterbox.pad_x - 0.0).abs() < 1e-6);
        assert!((letterbox.pad_y - 80.0).abs() < 1e-6);

        // Pad rows normalize to 0.0, image rows to (255 - mean) / std.
        assert!(tensor[[0, 0, 0, 0]].abs() < 1e-6);
        let expected = (255.0 - SCRFD_MEAN) / SCRFD_STD;
        assert!((tensor[[0, 0, 320, 320]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_channels_identical() {
        let image = GrayImage::from_pixel(64, 64, image::Luma([100u8]));
        let (tensor, _) = preprocess(&image);
        assert_eq!(tensor[[0, 0, 100, 100]], tensor[[0, 1, 100, 100]]);
        assert_eq!(tensor[[0, 1, 100, 100]], tensor[[0, 2, 100, 100]]);
    }

    #[test]
    fn test_letterbox_coordinate_roundtrip() {
        let image = GrayImage::new(320, 240);
        let (_, letterbox) = preprocess(&image);

        let orig_x = 100.0f32;
        let orig_y = 50.0f32;
        let boxed_x = orig_x * letterbox.scale + letterbox.pad_x;
        let boxed_y = orig_y * letterbox.scale + letterbox.pad_y;

        let recovered_x = (boxed_x - letterbox.pad_x) / letterbox.scale;
        let recovered_y = (boxed_y - letterbox.pad_y) / letterbox.scale;
        assert!((recovered_x - orig_x).abs() < 0.1);
        assert!((recovered_y - orig_y).abs() < 0.1);
    }
}
