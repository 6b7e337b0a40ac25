//! Classifier adapter.
//!
//! Wraps an external emotion-inference backend, bounds each call with a
//! timeout, and normalizes whatever the backend returns into a single
//! [`EmotionResult`].

use crate::types::{Emotion, EmotionResult, EmotionScores};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassificationError {
    #[error("no face detected: {0}")]
    NoFaceDetected(String),
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("classifier failed: {0}")]
    Backend(String),
    #[error("classification timed out after {:.1}s", .0.as_secs_f64())]
    Timeout(Duration),
    #[error("classifier returned an unusable result: {0}")]
    Malformed(String),
}

/// Emotion analysis for one face, as reported by a backend.
///
/// Labels are free-form strings here; they are validated against the
/// closed [`Emotion`] set during normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceAnalysis {
    #[serde(default)]
    pub dominant_emotion: Option<String>,
    #[serde(default)]
    pub emotion: IndexMap<String, f64>,
}

/// Result shape from a backend: one face object, or one object per detected face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawAnalysis {
    Many(Vec<FaceAnalysis>),
    Single(FaceAnalysis),
}

/// Descriptive metadata about a backend, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct BackendInfo {
    pub name: String,
    /// Model file or service URL, when the backend has one.
    pub location: Option<String>,
    pub notes: String,
}

/// An external emotion-inference capability.
///
/// Implementations may block for as long as inference takes; the adapter
/// runs them off the caller's thread and enforces the timeout.
pub trait EmotionBackend: Send + Sync {
    fn info(&self) -> BackendInfo;

    fn analyze(&self, image_path: &Path) -> Result<RawAnalysis, ClassificationError>;
}

/// Reduce a raw backend response to one canonical result.
///
/// When several faces are reported, the first one is used and the rest are
/// discarded. A missing dominant label is derived from the highest score.
pub fn normalize(raw: RawAnalysis) -> Result<EmotionResult, ClassificationError> {
    let face = match raw {
        RawAnalysis::Single(face) => face,
        RawAnalysis::Many(faces) => {
            let count = faces.len();
            let first = faces.into_iter().next().ok_or_else(|| {
                ClassificationError::NoFaceDetected("classifier returned no faces".into())
            })?;
            if count > 1 {
                tracing::warn!(faces = count, "multiple faces reported; using the first");
            }
            first
        }
    };

    let mut scores = EmotionScores::new();
    for (label, &score) in face.emotion.iter() {
        let emotion: Emotion = label
            .parse()
            .map_err(|e| ClassificationError::Malformed(format!("{e}")))?;
        if !score.is_finite() || score < 0.0 {
            return Err(ClassificationError::Malformed(format!(
                "score for '{label}' must be a non-negative number, got {score}"
            )));
        }
        scores.insert(emotion, score);
    }

    let dominant = match face.dominant_emotion.as_deref() {
        Some(label) => label
            .parse()
            .map_err(|e| ClassificationError::Malformed(format!("{e}")))?,
        None => scores
            .dominant()
            .ok_or_else(|| ClassificationError::Malformed("score map is empty".into()))?,
    };

    EmotionResult::new(dominant, scores).map_err(|e| ClassificationError::Malformed(e.to_string()))
}

/// Calls a backend exactly once per image, with a deadline.
#[derive(Clone)]
pub struct ClassifierAdapter {
    backend: Arc<dyn EmotionBackend>,
    timeout: Duration,
}

impl ClassifierAdapter {
    pub fn new(backend: Arc<dyn EmotionBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub fn backend_info(&self) -> BackendInfo {
        self.backend.info()
    }

    /// Classify the image stored at `image_path`.
    ///
    /// The backend runs on its own thread. If it has not answered within the
    /// timeout the call fails with [`ClassificationError::Timeout`]; the
    /// backend call itself is not cancelled and its late result is dropped.
    pub fn classify(&self, image_path: &Path) -> Result<EmotionResult, ClassificationError> {
        let (tx, rx) = mpsc::channel();
        let backend = Arc::clone(&self.backend);
        let path = image_path.to_path_buf();

        std::thread::Builder::new()
            .name("moodlens-classify".into())
            .spawn(move || {
                let result = backend.analyze(&path);
                // Receiver is gone after a timeout.
                let _ = tx.send(result);
            })
            .map_err(|e| ClassificationError::Backend(format!("failed to spawn classifier thread: {e}")))?;

        let raw = match rx.recv_timeout(self.timeout) {
            Ok(result) => result?,
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    path = %image_path.display(),
                    timeout_secs = self.timeout.as_secs_f64(),
                    "classifier did not answer in time"
                );
                return Err(ClassificationError::Timeout(self.timeout));
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(ClassificationError::Backend("classifier thread panicked".into()));
            }
        };

        let result = normalize(raw)?;
        tracing::debug!(
            path = %image_path.display(),
            dominant = %result.dominant_emotion(),
            labels = result.emotion_scores().len(),
            "image classified"
        );
        Ok(result)
    }
}

/// Backend that answers every request with the same canned response.
///
/// Useful for tests and for exercising the pipeline without a model.
pub struct FixedBackend {
    response: Result<RawAnalysis, ClassificationError>,
    delay: Duration,
    calls: AtomicUsize,
}

impl FixedBackend {
    pub fn new(raw: RawAnalysis) -> Self {
        Self {
            response: Ok(raw),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: ClassificationError) -> Self {
        Self {
            response: Err(error),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Sleep this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of `analyze` calls received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmotionBackend for FixedBackend {
    fn info(&self) -> BackendInfo {
        BackendInfo {
            name: "fixed".into(),
            location: None,
            notes: "returns a preconfigured analysis for every image".into(),
        }
    }

    fn analyze(&self, _image_path: &Path) -> Result<RawAnalysis, ClassificationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.response.clone()
    }
}
