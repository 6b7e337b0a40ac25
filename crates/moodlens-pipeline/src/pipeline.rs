//! Pipeline orchestrator.
//!
//! Composes the image store, classifier adapter, annotator and session log.
//! A request moves through [`Stage`]s in order; the first failure ends it.
//! Artifacts already written are kept on failure (the raw upload always,
//! the annotated copy if logging fails), and nothing is retried.

use crate::config::{BackendKind, Config};
use crate::error::{PipelineError, SetupError};
use crate::input::{AnalysisRequest, CaptureRequest, Upload};
use moodlens_core::classifier::BackendInfo;
use moodlens_core::deepface::DeepFaceBackend;
use moodlens_core::ferplus::FerPlusBackend;
use moodlens_core::{Annotator, ClassifierAdapter, Emotion, EmotionBackend, EmotionScores};
use moodlens_store::{ImageStore, SessionLog, SessionRecord, SessionSummary};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Progress of one request.
///
/// `Completed` and `Failed` are terminal. A request can fail from any
/// non-terminal stage; the reason is the returned [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Stored,
    Classified,
    Annotated,
    Logged,
    Completed,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed)
    }
}

/// Successful analysis, as returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
    pub name: String,
    /// Root-relative URL of the annotated image.
    pub image_url: String,
    pub dominant_emotion: Emotion,
    pub emotions: EmotionScores,
    #[serde(skip)]
    pub record_id: i64,
    #[serde(skip)]
    pub raw_path: PathBuf,
    #[serde(skip)]
    pub annotated_path: PathBuf,
}

pub struct Pipeline {
    store: ImageStore,
    classifier: ClassifierAdapter,
    annotator: Annotator,
    log: SessionLog,
    default_name: String,
}

impl Pipeline {
    pub fn new(
        store: ImageStore,
        classifier: ClassifierAdapter,
        annotator: Annotator,
        log: SessionLog,
        default_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            classifier,
            annotator,
            log,
            default_name: default_name.into(),
        }
    }

    /// Assemble every component from `config`.
    ///
    /// Creates the upload directory and the session schema if they are
    /// missing, and loads or connects the configured backend.
    pub fn from_config(config: &Config) -> Result<Self, SetupError> {
        let store = ImageStore::open(&config.upload_dir, &config.public_prefix)?;
        let log = SessionLog::open(&config.db_path)?;
        let backend = build_backend(config)?;
        let classifier = ClassifierAdapter::new(backend, config.classify_timeout());
        let annotator = Annotator::with_font(config.font_path.as_deref(), config.font_size);

        tracing::info!(
            upload_dir = %config.upload_dir.display(),
            db_path = %config.db_path.display(),
            backend = ?config.backend,
            builtin_font = annotator.typeface().is_builtin(),
            "pipeline ready"
        );

        Ok(Self::new(store, classifier, annotator, log, config.default_name.clone()))
    }

    /// Analyze an uploaded file.
    pub fn analyze_upload(&self, upload: Upload) -> Result<AnalysisOutcome, PipelineError> {
        let request = AnalysisRequest::from_upload(upload, &self.default_name)?;
        self.run(request)
    }

    /// Analyze an inline base64 capture.
    pub fn analyze_capture(&self, capture: CaptureRequest) -> Result<AnalysisOutcome, PipelineError> {
        let request = AnalysisRequest::from_capture(capture, &self.default_name)?;
        self.run(request)
    }

    /// Run a decoded request through every stage.
    pub fn run(&self, request: AnalysisRequest) -> Result<AnalysisOutcome, PipelineError> {
        let started = Instant::now();
        let mut stage = Stage::Received;

        let result = self.execute(&request, &mut stage);
        match &result {
            Ok(outcome) => tracing::info!(
                name = %outcome.name,
                dominant = %outcome.dominant_emotion,
                image_url = %outcome.image_url,
                record_id = outcome.record_id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "analysis completed"
            ),
            Err(err) => {
                let reached = stage;
                advance(&mut stage, Stage::Failed);
                tracing::warn!(
                    name = %request.name,
                    stage = ?stage,
                    after = ?reached,
                    kind = ?err.kind(),
                    error = %err,
                    "analysis failed"
                );
            }
        }
        result
    }

    fn execute(
        &self,
        request: &AnalysisRequest,
        stage: &mut Stage,
    ) -> Result<AnalysisOutcome, PipelineError> {
        let raw = self
            .store
            .persist(&request.bytes, &request.name, &request.channel)?;
        advance(stage, Stage::Stored);

        let result = self.classifier.classify(&raw.path)?;
        advance(stage, Stage::Classified);

        let (dominant, scores) = result.into_parts();
        let annotated_path = self.annotator.annotate(&raw.path, dominant, &scores)?;
        advance(stage, Stage::Annotated);

        let record_id = self
            .log
            .append(&request.name, &annotated_path, dominant, &scores)?;
        advance(stage, Stage::Logged);

        let outcome = AnalysisOutcome {
            name: request.name.clone(),
            image_url: self.store.public_url(&annotated_path),
            dominant_emotion: dominant,
            emotions: scores,
            record_id,
            raw_path: raw.path,
            annotated_path,
        };
        advance(stage, Stage::Completed);
        Ok(outcome)
    }

    /// Session history, newest first.
    pub fn history(&self) -> Result<Vec<SessionSummary>, PipelineError> {
        Ok(self.log.list_all()?)
    }

    pub fn session(&self, id: i64) -> Result<Option<SessionRecord>, PipelineError> {
        Ok(self.log.get(id)?)
    }

    pub fn backend_info(&self) -> BackendInfo {
        self.classifier.backend_info()
    }
}

fn advance(stage: &mut Stage, next: Stage) {
    tracing::trace!(from = ?*stage, to = ?next, "stage");
    *stage = next;
}

fn build_backend(config: &Config) -> Result<Arc<dyn EmotionBackend>, SetupError> {
    match config.backend {
        BackendKind::DeepFace => {
            let backend = DeepFaceBackend::new(&config.deepface_url, config.classify_timeout())
                .map_err(|e| SetupError::Backend(e.to_string()))?;
            Ok(Arc::new(backend))
        }
        BackendKind::FerPlus => {
            let backend = FerPlusBackend::load(&config.model_path.to_string_lossy())
                .map_err(|e| SetupError::Backend(e.to_string()))?;
            Ok(Arc::new(backend))
        }
    }
}
