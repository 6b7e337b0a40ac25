//! Remote backend speaking the DeepFace REST API (`POST /analyze`).

use crate::classifier::{BackendInfo, ClassificationError, EmotionBackend, RawAnalysis};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Response envelope. Recent DeepFace servers wrap faces in `results`,
/// older ones return the face object (or list) directly.
#[derive(Deserialize)]
#[serde(untagged)]
enum AnalyzeResponse {
    Wrapped { results: RawAnalysis },
    Bare(RawAnalysis),
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Emotion backend backed by a DeepFace-compatible HTTP service.
pub struct DeepFaceBackend {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl DeepFaceBackend {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, ClassificationError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ClassificationError::Backend(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/analyze", self.base_url)
    }
}

impl EmotionBackend for DeepFaceBackend {
    fn info(&self) -> BackendInfo {
        BackendInfo {
            name: "deepface".into(),
            location: Some(self.endpoint()),
            notes: "DeepFace analyze(actions=['emotion']) served over HTTP; pretrained, no local training".into(),
        }
    }

    fn analyze(&self, image_path: &Path) -> Result<RawAnalysis, ClassificationError> {
        let bytes = std::fs::read(image_path).map_err(|e| {
            ClassificationError::Backend(format!("failed to read {}: {e}", image_path.display()))
        })?;
        let img = data_uri(&bytes)?;

        let url = self.endpoint();
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "img": img, "actions": ["emotion"] }))
            .send()
            .map_err(|e| ClassificationError::Backend(format!("request to {url} failed: {e}")))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|e| ClassificationError::Backend(format!("failed to read response body: {e}")))?;

        tracing::debug!(url = %url, status, bytes = body.len(), "deepface responded");
        parse_response(status, &body)
    }
}

/// Encode image bytes as a `data:` URI, the input form DeepFace accepts inline.
fn data_uri(bytes: &[u8]) -> Result<String, ClassificationError> {
    let format = image::guess_format(bytes)
        .map_err(|e| ClassificationError::UnsupportedFormat(e.to_string()))?;
    Ok(format!(
        "data:{};base64,{}",
        format.to_mime_type(),
        STANDARD.encode(bytes)
    ))
}

fn parse_response(status: u16, body: &str) -> Result<RawAnalysis, ClassificationError> {
    if !(200..300).contains(&status) {
        let message = serde_json::from_str::<ErrorBody>(body)
            .map(|b| b.error)
            .unwrap_or_else(|_| format!("HTTP {status}: {}", body.trim()));
        let lower = message.to_ascii_lowercase();
        if lower.contains("face could not be detected") || lower.contains("no face") {
            return Err(ClassificationError::NoFaceDetected(message));
        }
        return Err(ClassificationError::Backend(message));
    }

    match serde_json::from_str::<AnalyzeResponse>(body) {
        Ok(AnalyzeResponse::Wrapped { results }) => Ok(results),
        Ok(AnalyzeResponse::Bare(raw)) => Ok(raw),
        Err(e) => Err(ClassificationError::Malformed(format!(
            "unrecognized DeepFace response: {e}"
        ))),
    }
}
