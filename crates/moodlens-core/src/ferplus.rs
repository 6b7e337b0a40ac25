//! FER+ emotion classifier via ONNX Runtime.
//!
//! Runs the ONNX model zoo `emotion-ferplus-8` network on a 64x64 grayscale
//! rendition of the whole image. Intended for face-centred captures: there
//! is no face detection step, so it never reports a missing face.

use crate::classifier::{BackendInfo, ClassificationError, EmotionBackend, FaceAnalysis, RawAnalysis};
use crate::types::Emotion;
use image::imageops::FilterType;
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

const FERPLUS_INPUT_SIZE: usize = 64;

/// Output order of the FER+ logits. `None` marks classes outside our label
/// set (contempt), which are dropped after softmax.
const FERPLUS_CLASSES: [Option<Emotion>; 8] = [
    Some(Emotion::Neutral),
    Some(Emotion::Happy),
    Some(Emotion::Surprise),
    Some(Emotion::Sad),
    Some(Emotion::Angry),
    Some(Emotion::Disgust),
    Some(Emotion::Fear),
    None,
];

#[derive(Error, Debug)]
pub enum FerPlusError {
    #[error("model file not found: {0}; download emotion-ferplus-8.onnx and place it in models/")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

impl From<FerPlusError> for ClassificationError {
    fn from(err: FerPlusError) -> Self {
        ClassificationError::Backend(err.to_string())
    }
}

/// Local FER+ emotion backend.
pub struct FerPlusBackend {
    session: Mutex<Session>,
    model_path: String,
}

impl FerPlusBackend {
    /// Load the FER+ ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, FerPlusError> {
        if !Path::new(model_path).exists() {
            return Err(FerPlusError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded FER+ model"
        );

        Ok(Self {
            session: Mutex::new(session),
            model_path: model_path.to_string(),
        })
    }

    fn infer(&self, input: Array4<f32>) -> Result<Vec<f32>, FerPlusError> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| FerPlusError::InferenceFailed("session lock poisoned".into()))?;

        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| FerPlusError::InferenceFailed(format!("logit extraction: {e}")))?;

        let logits: Vec<f32> = raw_data.to_vec();
        if logits.len() != FERPLUS_CLASSES.len() {
            return Err(FerPlusError::InferenceFailed(format!(
                "expected {} logits, got {}",
                FERPLUS_CLASSES.len(),
                logits.len()
            )));
        }
        Ok(logits)
    }

    /// Resize a grayscale image to 64x64 and lay it out as a 1x1x64x64 tensor.
    ///
    /// FER+ takes raw 0-255 intensities, no normalization.
    fn preprocess(gray: &GrayImage) -> Array4<f32> {
        let size = FERPLUS_INPUT_SIZE as u32;
        let resized = image::imageops::resize(gray, size, size, FilterType::Triangle);

        let mut tensor = Array4::<f32>::zeros((1, 1, FERPLUS_INPUT_SIZE, FERPLUS_INPUT_SIZE));
        for (x, y, pixel) in resized.enumerate_pixels() {
            tensor[[0, 0, y as usize, x as usize]] = pixel.0[0] as f32;
        }
        tensor
    }
}

/// Softmax over the logits, reported as percentages over the known labels.
fn scores_from_logits(logits: &[f32]) -> FaceAnalysis {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f64> = logits.iter().map(|&l| ((l - max) as f64).exp()).collect();
    let sum: f64 = exps.iter().sum();

    let emotion = FERPLUS_CLASSES
        .iter()
        .zip(exps.iter())
        .filter_map(|(class, &e)| class.map(|c| (c.as_str().to_string(), e / sum * 100.0)))
        .collect();

    // Dominant label is left to the adapter, which takes the argmax of the
    // kept classes.
    FaceAnalysis {
        dominant_emotion: None,
        emotion,
    }
}

impl EmotionBackend for FerPlusBackend {
    fn info(&self) -> BackendInfo {
        BackendInfo {
            name: "ferplus".into(),
            location: Some(self.model_path.clone()),
            notes: "pretrained FER+ (emotion-ferplus-8) run locally via ONNX Runtime; no local training".into(),
        }
    }

    fn analyze(&self, image_path: &Path) -> Result<RawAnalysis, ClassificationError> {
        let img = image::open(image_path)
            .map_err(|e| ClassificationError::UnsupportedFormat(format!("{}: {e}", image_path.display())))?;

        let input = Self::preprocess(&img.to_luma8());
        let logits = self.infer(input)?;
        Ok(RawAnalysis::Single(scores_from_logits(&logits)))
    }
}
