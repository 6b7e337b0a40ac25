//! moodlens-core — Emotion classification and result annotation.
//!
//! Normalizes the output of an external emotion classifier into a
//! canonical [`EmotionResult`] and renders that result onto images.

pub mod annotator;
pub mod artifact;
pub mod classifier;
pub mod deepface;
pub mod ferplus;
pub mod typeface;
pub mod types;

pub use annotator::{AnnotateError, Annotator};
pub use classifier::{
    ClassificationError, ClassifierAdapter, EmotionBackend, FaceAnalysis, FixedBackend,
    RawAnalysis,
};
pub use types::{Emotion, EmotionResult, EmotionScores, ResultError};
