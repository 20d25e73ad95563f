//! Face encoder interface and its ONNX-backed adapter.
//!
//! The pipeline only depends on the [`FaceEncoder`] trait; the production
//! adapter wraps SCRFD (detection) and ArcFace (recognition) sessions on
//! ONNX Runtime. Tests inject deterministic encoders instead.

use anyhow::{Context, Result};
use image::DynamicImage;
use ort::session::Session;
use ort::value::Value;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

pub type Embedding = Vec<f32>;

const SCRFD_MODEL_URL_HF: &str = "https://huggingface.co/ykk648/face_lib/resolve/main/face_detect/scrfd_onnx/scrfd_500m_bnkps.onnx";
const SCRFD_MODEL_URL_GH: &str = "https://github.com/deepinsight/insightface/releases/download/v0.7/scrfd_500m_bnkps.onnx";
const ARCFACE_MODEL_URL: &str = "https://huggingface.co/maze/faceX/resolve/e010b5098c3685fd00b22dd2aec6f37320e3d850/w600k_r50.onnx";

const DETECT_SIZE: u32 = 640;
const EMBED_SIZE: u32 = 112;

/// Registration-path failure, surfaced to the caller.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("no face detected in image")]
    NoFaceDetected,
    #[error("face embedding capability not available")]
    Unavailable,
    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Processing-mode result. `Faces(vec![])` means "confirmed no face";
/// `Unavailable` and `DecodeError` mean "could not evaluate" and leave the
/// image eligible for a future pass.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodeOutcome {
    Faces(Vec<Embedding>),
    Unavailable,
    DecodeError,
}

pub trait FaceEncoder: Send + Sync {
    /// Registration mode: decode one in-memory image and return only the
    /// first detector-ordered face vector.
    fn encode_registration(&self, bytes: &[u8]) -> Result<Embedding, RegistrationError>;

    /// Processing mode: decode a stored image file and return all detected
    /// face vectors.
    fn encode_file(&self, path: &Path) -> EncodeOutcome;
}

#[derive(Debug, Clone)]
struct FaceBbox {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    confidence: f32,
}

pub struct OnnxFaceEncoder {
    pub models_dir: PathBuf,
    detector: Option<Mutex<Session>>,
    recognizer: Option<Mutex<Session>>,
    confidence_threshold: f32,
    nms_iou_threshold: f32,
}

impl OnnxFaceEncoder {
    pub fn new(models_dir: PathBuf) -> Self {
        Self {
            models_dir,
            detector: None,
            recognizer: None,
            confidence_threshold: std::env::var("FACELENS_FACE_CONFIDENCE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.5),
            nms_iou_threshold: std::env::var("FACELENS_FACE_NMS_IOU")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.4),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.detector.is_some() && self.recognizer.is_some()
    }

    /// Downloads model files if absent and loads the sessions. A failure
    /// leaves the encoder in the not-ready state; the pipeline then reports
    /// `Unavailable` instead of erroring.
    pub async fn initialize(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.models_dir).context("failed to create models directory")?;

        let auto_dl = std::env::var("FACELENS_FACE_AUTO_DOWNLOAD")
            .map(|v| !matches!(v.as_str(), "0" | "false" | "FALSE"))
            .unwrap_or(true);
        if auto_dl {
            if let Err(e) = self.download_models().await {
                warn!("face model auto-download failed: {}", e);
            }
        }

        if let Err(e) = self.load_models() {
            warn!("face models not loaded: {}", e);
        }
        Ok(())
    }

    async fn download_models(&self) -> Result<()> {
        let detector_path = self.models_dir.join("scrfd_500m_bnkps.onnx");
        let recognizer_path = self.models_dir.join("w600k_r50.onnx");
        let client = reqwest::Client::new();

        if !detector_path.exists() {
            info!("downloading SCRFD face detection model");
            if let Err(e) = download_file(&client, SCRFD_MODEL_URL_HF, &detector_path).await {
                warn!("download from Hugging Face failed: {}; trying GitHub", e);
                download_file(&client, SCRFD_MODEL_URL_GH, &detector_path).await?;
            }
        }
        if !recognizer_path.exists() {
            info!("downloading ArcFace recognition model");
            download_file(&client, ARCFACE_MODEL_URL, &recognizer_path).await?;
        }
        Ok(())
    }

    fn load_models(&mut self) -> Result<()> {
        let detector_path = self.models_dir.join("scrfd_500m_bnkps.onnx");
        let recognizer_path = self.models_dir.join("w600k_r50.onnx");
        if !detector_path.exists() || !recognizer_path.exists() {
            anyhow::bail!(
                "face models missing; expected SCRFD at {:?} and ArcFace at {:?}",
                detector_path,
                recognizer_path
            );
        }

        let detector = Session::builder()?
            .commit_from_file(&detector_path)
            .context("failed to create SCRFD session")?;
        let recognizer = Session::builder()?
            .commit_from_file(&recognizer_path)
            .context("failed to create ArcFace session")?;

        self.detector = Some(Mutex::new(detector));
        self.recognizer = Some(Mutex::new(recognizer));
        info!("face models loaded from {:?}", self.models_dir);
        Ok(())
    }

    /// Letterbox to 640x640 BGR, normalized to [-1, 1], NCHW.
    fn preprocess_detector(&self, image: &DynamicImage) -> (Vec<f32>, f32) {
        let (ow, oh) = (image.width() as f32, image.height() as f32);
        let scale = DETECT_SIZE as f32 / ow.max(oh);
        let nw = (ow * scale) as u32;
        let nh = (oh * scale) as u32;
        let resized = image.resize_exact(nw.max(1), nh.max(1), image::imageops::FilterType::Triangle);
        let mut padded = DynamicImage::new_rgb8(DETECT_SIZE, DETECT_SIZE);
        image::imageops::overlay(&mut padded, &resized, 0, 0);
        let rgb = padded.to_rgb8();
        let mut data = Vec::with_capacity((3 * DETECT_SIZE * DETECT_SIZE) as usize);
        for c in 0..3 {
            for y in 0..DETECT_SIZE {
                for x in 0..DETECT_SIZE {
                    let p = rgb.get_pixel(x, y);
                    // InsightFace models expect BGR channel order
                    let v = match c {
                        0 => p[2],
                        1 => p[1],
                        _ => p[0],
                    } as f32;
                    data.push((v - 127.5) / 128.0);
                }
            }
        }
        (data, scale)
    }

    fn detect_faces(&self, image: &DynamicImage) -> Result<Vec<FaceBbox>> {
        let mut session = self
            .detector
            .as_ref()
            .context("detection model not loaded")?
            .lock();
        let (data, scale) = self.preprocess_detector(image);
        let img_w = image.width() as f32;
        let img_h = image.height() as f32;

        let input_name = session.inputs()[0].name().to_string();
        let input = Value::from_array((vec![1i64, 3, DETECT_SIZE as i64, DETECT_SIZE as i64], data))
            .context("failed to create SCRFD input tensor")?;
        let outputs = session
            .run(ort::inputs![input_name => input])
            .context("SCRFD inference failed")?;

        // SCRFD emits per-stride score/bbox pairs; decode each grid, filter
        // by confidence, then NMS across all strides.
        let mut raw: Vec<FaceBbox> = Vec::new();
        for stride_str in ["8", "16", "32"] {
            let stride: f32 = stride_str.parse().unwrap();
            let (Some(sv), Some(bv)) = (
                outputs.get(&format!("score_{stride_str}")),
                outputs.get(&format!("bbox_{stride_str}")),
            ) else {
                continue;
            };
            let (Ok((_, scores)), Ok((_, boxes))) =
                (sv.try_extract_tensor::<f32>(), bv.try_extract_tensor::<f32>())
            else {
                continue;
            };

            let side = (DETECT_SIZE as f32 / stride) as usize;
            let grid_points = side * side;
            if grid_points == 0 || scores.len() % grid_points != 0 {
                continue;
            }
            let anchors_per_point = scores.len() / grid_points;

            for i in 0..grid_points {
                let cy = (i / side) as f32 * stride;
                let cx = (i % side) as f32 * stride;
                for a in 0..anchors_per_point {
                    let idx = i * anchors_per_point + a;
                    let conf = scores[idx];
                    if conf < self.confidence_threshold {
                        continue;
                    }
                    let b = idx * 4;
                    if b + 3 >= boxes.len() {
                        continue;
                    }
                    // Box deltas are (l, t, r, b) in stride units
                    let x1 = ((cx - boxes[b] * stride) / scale).clamp(0.0, img_w);
                    let y1 = ((cy - boxes[b + 1] * stride) / scale).clamp(0.0, img_h);
                    let x2 = ((cx + boxes[b + 2] * stride) / scale).clamp(0.0, img_w);
                    let y2 = ((cy + boxes[b + 3] * stride) / scale).clamp(0.0, img_h);
                    if x2 <= x1 || y2 <= y1 || (x2 - x1) < 8.0 || (y2 - y1) < 8.0 {
                        continue;
                    }
                    raw.push(FaceBbox { x1, y1, x2, y2, confidence: conf });
                }
            }
        }

        let keep = nms(&raw, self.nms_iou_threshold);
        Ok(keep.into_iter().map(|i| raw[i].clone()).collect())
    }

    fn embed_face(&self, face_crop: &DynamicImage) -> Result<Embedding> {
        let mut session = self
            .recognizer
            .as_ref()
            .context("recognition model not loaded")?
            .lock();
        let resized = face_crop.resize_exact(EMBED_SIZE, EMBED_SIZE, image::imageops::FilterType::Triangle);
        let rgb = resized.to_rgb8();
        let mut data = Vec::with_capacity((3 * EMBED_SIZE * EMBED_SIZE) as usize);
        for c in 0..3 {
            for y in 0..EMBED_SIZE {
                for x in 0..EMBED_SIZE {
                    let p = rgb.get_pixel(x, y);
                    let v = match c {
                        0 => p[0],
                        1 => p[1],
                        _ => p[2],
                    } as f32;
                    data.push((v - 127.5) / 128.0);
                }
            }
        }

        let input_name = session.inputs()[0].name().to_string();
        let input = Value::from_array((vec![1i64, 3, EMBED_SIZE as i64, EMBED_SIZE as i64], data))
            .context("failed to create ArcFace input tensor")?;
        let outputs = session
            .run(ort::inputs![input_name => input])
            .context("ArcFace inference failed")?;

        let key = outputs
            .keys()
            .next()
            .context("ArcFace model produced no outputs")?
            .to_string();
        let val = outputs.get(&key).context("ArcFace output missing")?;
        let (_, slice) = val
            .try_extract_tensor::<f32>()
            .context("failed to extract ArcFace output tensor")?;
        let mut v = slice.to_vec();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            anyhow::bail!("ArcFace embedding has zero norm");
        }
        for x in &mut v {
            *x /= norm;
        }
        Ok(v)
    }

    /// All face vectors in an image, detector order.
    fn encode_image(&self, img: &DynamicImage) -> Result<Vec<Embedding>> {
        let bboxes = self.detect_faces(img)?;
        let mut embeddings = Vec::with_capacity(bboxes.len());
        for bbox in bboxes {
            let x1 = bbox.x1.max(0.0) as u32;
            let y1 = bbox.y1.max(0.0) as u32;
            let x2 = bbox.x2.min(img.width() as f32) as u32;
            let y2 = bbox.y2.min(img.height() as f32) as u32;
            if x2 <= x1 || y2 <= y1 {
                continue;
            }
            let crop = img.crop_imm(x1, y1, x2 - x1, y2 - y1);
            match self.embed_face(&crop) {
                Ok(embedding) => embeddings.push(embedding),
                Err(e) => warn!("failed to embed face (confidence {:.2}): {}", bbox.confidence, e),
            }
        }
        Ok(embeddings)
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn encode_registration(&self, bytes: &[u8]) -> Result<Embedding, RegistrationError> {
        if !self.is_ready() {
            return Err(RegistrationError::Unavailable);
        }
        let img = image::load_from_memory(bytes)?;
        let mut faces = self.encode_image(&img)?;
        if faces.is_empty() {
            return Err(RegistrationError::NoFaceDetected);
        }
        Ok(faces.swap_remove(0))
    }

    fn encode_file(&self, path: &Path) -> EncodeOutcome {
        if !self.is_ready() {
            return EncodeOutcome::Unavailable;
        }
        let img = match image::open(path) {
            Ok(img) => img,
            Err(e) => {
                warn!("could not decode {:?}: {}", path, e);
                return EncodeOutcome::DecodeError;
            }
        };
        match self.encode_image(&img) {
            Ok(faces) => EncodeOutcome::Faces(faces),
            Err(e) => {
                warn!("face inference failed for {:?}: {}", path, e);
                EncodeOutcome::Unavailable
            }
        }
    }
}

async fn download_file(client: &reqwest::Client, url: &str, path: &Path) -> Result<()> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("failed to download model from {url}"))?;
    if !response.status().is_success() {
        anyhow::bail!("failed to download model: HTTP {}", response.status());
    }
    let bytes = response.bytes().await.context("failed to read response body")?;
    if bytes.len() < 1024 {
        anyhow::bail!("downloaded file is suspiciously small ({} bytes)", bytes.len());
    }
    std::fs::write(path, &bytes).with_context(|| format!("failed to write {path:?}"))?;
    info!("downloaded model to {:?} ({} bytes)", path, bytes.len());
    Ok(())
}

fn nms(boxes: &[FaceBbox], iou_threshold: f32) -> Vec<usize> {
    if boxes.is_empty() {
        return vec![];
    }
    let mut indices: Vec<usize> = (0..boxes.len()).collect();
    indices.sort_by(|&a, &b| {
        boxes[b]
            .confidence
            .partial_cmp(&boxes[a].confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut keep = Vec::new();
    let mut suppressed = vec![false; boxes.len()];
    for i in 0..indices.len() {
        let ia = indices[i];
        if suppressed[ia] {
            continue;
        }
        keep.push(ia);
        for &ib in indices.iter().skip(i + 1) {
            if !suppressed[ib] && iou(&boxes[ia], &boxes[ib]) > iou_threshold {
                suppressed[ib] = true;
            }
        }
    }
    keep
}

fn iou(a: &FaceBbox, b: &FaceBbox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);
    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }
    let intersection = (x2 - x1) * (y2 - y1);
    let union = (a.x2 - a.x1) * (a.y2 - a.y1) + (b.x2 - b.x1) * (b.y2 - b.y1) - intersection;
    if union <= 0.0 {
        return 0.0;
    }
    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> FaceBbox {
        FaceBbox { x1, y1, x2, y2, confidence }
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        assert_eq!(iou(&bbox(0.0, 0.0, 10.0, 10.0, 1.0), &bbox(20.0, 20.0, 30.0, 30.0, 1.0)), 0.0);
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn nms_suppresses_overlapping_lower_confidence() {
        let boxes = vec![
            bbox(0.0, 0.0, 10.0, 10.0, 0.9),
            bbox(1.0, 1.0, 11.0, 11.0, 0.8),
            bbox(50.0, 50.0, 60.0, 60.0, 0.7),
        ];
        let keep = nms(&boxes, 0.4);
        assert_eq!(keep, vec![0, 2]);
    }

    #[test]
    fn uninitialized_encoder_reports_unavailable() {
        let enc = OnnxFaceEncoder::new(PathBuf::from("/nonexistent"));
        assert!(!enc.is_ready());
        assert_eq!(enc.encode_file(Path::new("/nonexistent/a.jpg")), EncodeOutcome::Unavailable);
        assert!(matches!(
            enc.encode_registration(b"not-an-image"),
            Err(RegistrationError::Unavailable)
        ));
    }
}
