use crate::input::InputError;
use moodlens_core::{AnnotateError, ClassificationError};
use moodlens_store::{PersistenceError, StorageError};
use serde::Serialize;
use thiserror::Error;

/// Why a single analysis request failed. The first failing step wins.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{0}")]
    Input(#[from] InputError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("annotation error: {0}")]
    Annotation(#[from] AnnotateError),
    #[error("{0}")]
    Classification(#[from] ClassificationError),
    #[error("session log error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Coarse failure category, as exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Input,
    Storage,
    Classification,
    Persistence,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Input(_) => ErrorKind::Input,
            // Producing the annotated artifact is part of artifact storage.
            PipelineError::Storage(_) | PipelineError::Annotation(_) => ErrorKind::Storage,
            PipelineError::Classification(_) => ErrorKind::Classification,
            PipelineError::Persistence(_) => ErrorKind::Persistence,
        }
    }

    /// Status code a request/response front end should answer with.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Input => 400,
            _ => 500,
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            message: self.to_string(),
        }
    }
}

/// Failure body handed to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub message: String,
}

/// Failure while assembling a pipeline from configuration.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("failed to initialize classifier backend: {0}")]
    Backend(String),
}
