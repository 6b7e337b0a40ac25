//! moodlens-pipeline — The analysis & annotation pipeline.
//!
//! Each request runs synchronously on the caller's thread:
//! store the raw image, classify it, annotate it, record the session.

pub mod config;
pub mod error;
pub mod input;
pub mod pipeline;

pub use config::{BackendKind, Config, ConfigError};
pub use error::{ErrorKind, ErrorResponse, PipelineError, SetupError};
pub use input::{AnalysisRequest, CaptureRequest, InputError, Upload};
pub use pipeline::{AnalysisOutcome, Pipeline, Stage};
