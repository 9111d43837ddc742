//! Embedded detector backend: YOLOv8 over ONNX Runtime, in-process.
//!
//! No non-maximum suppression: only the coarse category of a clip matters,
//! so duplicate boxes for one object cannot change the outcome. Skipping NMS
//! trades box precision (which nothing consumes) for less code.

use image::RgbImage;
use ndarray::Array;
use ort::{session::Session, value::TensorRef};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::label::{BoundingBox, DetectedObject};
use crate::error::ServiceError;
use crate::infer::InferenceBackend;

/// YOLOv8 input resolution.
const INPUT_SIZE: u32 = 640;
/// Candidates below this score are discarded before any mapping.
const SCORE_THRESHOLD: f32 = 0.25;

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("failed to load model: {0}")]
    ModelLoad(String),
    #[error("inference error: {0}")]
    Inference(String),
    #[error("image processing error: {0}")]
    ImageProcessing(String),
}

impl From<DetectorError> for ServiceError {
    fn from(err: DetectorError) -> Self {
        match err {
            DetectorError::ModelLoad(msg) => ServiceError::InferenceMisconfigured(msg),
            DetectorError::Inference(msg) | DetectorError::ImageProcessing(msg) => {
                ServiceError::ExtractionFailed(msg)
            }
        }
    }
}

/// In-process YOLOv8 detector. The session is loaded lazily on first use and
/// reused; inference runs on the blocking pool.
pub struct EmbeddedDetector {
    inner: Arc<DetectorInner>,
}

struct DetectorInner {
    model_path: PathBuf,
    session: Mutex<Option<Session>>,
}

impl EmbeddedDetector {
    pub fn new(model_path: PathBuf) -> Self {
        Self {
            inner: Arc::new(DetectorInner {
                model_path,
                session: Mutex::new(None),
            }),
        }
    }
}

#[async_trait::async_trait]
impl InferenceBackend for EmbeddedDetector {
    async fn classify(&self, frame_path: &Path) -> Result<Vec<DetectedObject>, ServiceError> {
        let inner = Arc::clone(&self.inner);
        let frame_path = frame_path.to_path_buf();
        let detections = tokio::task::spawn_blocking(move || inner.detect(&frame_path))
            .await
            .map_err(|e| ServiceError::Internal(format!("detector task: {}", e)))??;
        Ok(detections)
    }
}

impl DetectorInner {
    fn detect(&self, frame_path: &Path) -> Result<Vec<DetectedObject>, DetectorError> {
        let image = image::open(frame_path)
            .map_err(|e| DetectorError::ImageProcessing(e.to_string()))?
            .to_rgb8();

        let input = preprocess(&image);

        let mut guard = self.session.lock().unwrap();
        if guard.is_none() {
            if !self.model_path.exists() {
                return Err(DetectorError::ModelLoad(format!(
                    "model file not found at {}",
                    self.model_path.display()
                )));
            }
            info!(path = %self.model_path.display(), "loading YOLOv8 model");
            let session = Session::builder()
                .map_err(|e| DetectorError::ModelLoad(e.to_string()))?
                .commit_from_file(&self.model_path)
                .map_err(|e| DetectorError::ModelLoad(e.to_string()))?;
            *guard = Some(session);
        }
        let session = guard
            .as_mut()
            .ok_or_else(|| DetectorError::Inference("session not initialized".into()))?;

        let input_tensor = TensorRef::from_array_view(input.view())
            .map_err(|e| DetectorError::Inference(e.to_string()))?;
        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e| DetectorError::Inference(e.to_string()))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::Inference(format!("failed to extract tensor: {e}")))?;

        let detections = parse_detections(data, shape.as_ref())?;
        debug!(count = detections.len(), "raw detections above score threshold");
        Ok(detections)
    }
}

/// Resize to the model input and convert to a normalized (1, 3, H, W) array.
fn preprocess(image: &RgbImage) -> Array<f32, ndarray::Dim<[usize; 4]>> {
    let resized = image::imageops::resize(
        image,
        INPUT_SIZE,
        INPUT_SIZE,
        image::imageops::FilterType::Triangle,
    );

    let size = INPUT_SIZE as usize;
    let mut input = Array::zeros((1, 3, size, size));
    for y in 0..size {
        for x in 0..size {
            let pixel = resized.get_pixel(x as u32, y as u32);
            input[[0, 0, y, x]] = f32::from(pixel[0]) / 255.0;
            input[[0, 1, y, x]] = f32::from(pixel[1]) / 255.0;
            input[[0, 2, y, x]] = f32::from(pixel[2]) / 255.0;
        }
    }
    input
}

/// Decode the YOLOv8 output tensor into detections above the score threshold.
///
/// Exported models come in two layouts: channel-major `[1, 4+C, N]` and
/// box-major `[1, N, 4+C]`, where the first four values per candidate are
/// center-x, center-y, width, height and the rest are per-class scores. The
/// layout is detected from the shape (the anchor count dwarfs the feature
/// count). Geometry is converted to corner format, normalized by the input
/// size.
fn parse_detections(data: &[f32], dims: &[i64]) -> Result<Vec<DetectedObject>, DetectorError> {
    if dims.len() != 3 {
        return Err(DetectorError::Inference(format!(
            "expected 3D output tensor, got {}D",
            dims.len()
        )));
    }

    let box_major = dims[1] > dims[2];
    let (num_anchors, num_features) = if box_major {
        (dims[1] as usize, dims[2] as usize)
    } else {
        (dims[2] as usize, dims[1] as usize)
    };
    if num_features <= 4 {
        return Err(DetectorError::Inference(format!(
            "output tensor has no class scores: {:?}",
            dims
        )));
    }
    let num_classes = num_features - 4;

    let mut detections = Vec::new();
    for anchor in 0..num_anchors {
        let feature = |idx: usize| -> f32 {
            if box_major {
                data[anchor * num_features + idx]
            } else {
                data[idx * num_anchors + anchor]
            }
        };

        let mut best_score = 0.0f32;
        let mut best_class = 0usize;
        for class in 0..num_classes {
            let score = feature(4 + class);
            if score > best_score {
                best_score = score;
                best_class = class;
            }
        }
        if best_score < SCORE_THRESHOLD {
            continue;
        }

        let cx = feature(0);
        let cy = feature(1);
        let w = feature(2);
        let h = feature(3);
        let scale = INPUT_SIZE as f32;

        detections.push(DetectedObject {
            class: coco_class_name(best_class).to_string(),
            confidence: best_score,
            bounding_box: Some(BoundingBox {
                x: (cx - w / 2.0) / scale,
                y: (cy - h / 2.0) / scale,
                width: w / scale,
                height: h / scale,
            }),
        });
    }
    Ok(detections)
}

fn coco_class_name(class_id: usize) -> &'static str {
    COCO_CLASSES.get(class_id).copied().unwrap_or("unknown")
}

/// 80 COCO object classes, in model output order.
const COCO_CLASSES: &[&str] = &[
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];
