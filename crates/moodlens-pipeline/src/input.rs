//! Request decoding for the two ingestion channels.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use moodlens_store::Channel;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("no image sent")]
    MissingImage,
    #[error("image is not valid base64: {0}")]
    InvalidBase64(String),
    #[error("malformed capture request: {0}")]
    InvalidJson(String),
}

/// A file upload (multipart form on the web side).
#[derive(Debug, Clone, Default)]
pub struct Upload {
    pub name: Option<String>,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// An inline webcam capture: `{"name": ..., "imageBase64": ...}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaptureRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "imageBase64", default)]
    pub image_base64: Option<String>,
}

impl CaptureRequest {
    pub fn from_json(text: &str) -> Result<Self, InputError> {
        serde_json::from_str(text).map_err(|e| InputError::InvalidJson(e.to_string()))
    }
}

/// Decoded input ready for the pipeline.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub name: String,
    pub bytes: Vec<u8>,
    pub channel: Channel,
}

impl AnalysisRequest {
    pub fn from_upload(upload: Upload, default_name: &str) -> Result<Self, InputError> {
        if upload.bytes.is_empty() {
            return Err(InputError::MissingImage);
        }
        Ok(Self {
            name: resolve_name(upload.name.as_deref(), default_name),
            bytes: upload.bytes,
            channel: Channel::Upload {
                content_type: upload.content_type,
            },
        })
    }

    pub fn from_capture(capture: CaptureRequest, default_name: &str) -> Result<Self, InputError> {
        let encoded = capture
            .image_base64
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or(InputError::MissingImage)?;

        let bytes = decode_image_base64(encoded)?;
        if bytes.is_empty() {
            return Err(InputError::MissingImage);
        }
        Ok(Self {
            name: resolve_name(capture.name.as_deref(), default_name),
            bytes,
            channel: Channel::Capture,
        })
    }
}

/// Requester name, or `default_name` when absent or blank.
pub fn resolve_name(name: Option<&str>, default_name: &str) -> String {
    match name.map(str::trim) {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => default_name.to_string(),
    }
}

/// Decode base64 image data, accepting an optional `data:...;base64,` prefix.
///
/// Everything up to the first comma is treated as the prefix. Embedded
/// whitespace (line-wrapped payloads) is ignored.
pub fn decode_image_base64(input: &str) -> Result<Vec<u8>, InputError> {
    let payload = match input.split_once(',') {
        Some((_, rest)) => rest,
        None => input,
    };
    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| InputError::InvalidBase64(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_plain_base64() {
        assert_eq!(decode_image_base64("aGVsbG8=").unwrap(), b"hello");
    }

    #[test]
    fn test_decode_data_uri() {
        assert_eq!(
            decode_image_base64("data:image/jpeg;base64,aGVsbG8=").unwrap(),
            b"hello"
        );
    }

    #[test]
    fn test_decode_wrapped_lines() {
        assert_eq!(decode_image_base64("aGVs\nbG8=\n").unwrap(), b"hello");
    }

    #[test]
    fn test_decode_invalid() {
        assert!(matches!(
            decode_image_base64("data:image/png;base64,!!!not-base64!!!"),
            Err(InputError::InvalidBase64(_))
        ));
    }

    #[test]
    fn test_capture_missing_image() {
        let req = CaptureRequest::from_json(r#"{"name":"Ada"}"#).unwrap();
        assert_eq!(
            AnalysisRequest::from_capture(req, "Anonymous").unwrap_err(),
            InputError::MissingImage
        );

        let blank = CaptureRequest::from_json(r#"{"imageBase64":"  "}"#).unwrap();
        assert_eq!(
            AnalysisRequest::from_capture(blank, "Anonymous").unwrap_err(),
            InputError::MissingImage
        );
    }

    #[test]
    fn test_capture_defaults_name() {
        let req = CaptureRequest::from_json(r#"{"imageBase64":"aGVsbG8="}"#).unwrap();
        let decoded = AnalysisRequest::from_capture(req, "Anonymous").unwrap();
        assert_eq!(decoded.name, "Anonymous");
        assert_eq!(decoded.bytes, b"hello");
        assert_eq!(decoded.channel, Channel::Capture);
    }

    #[test]
    fn test_capture_bad_json() {
        assert!(matches!(
            CaptureRequest::from_json("{"),
            Err(InputError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_upload_requires_bytes() {
        let upload = Upload {
            name: Some("Ada".into()),
            ..Upload::default()
        };
        assert_eq!(
            AnalysisRequest::from_upload(upload, "Anonymous").unwrap_err(),
            InputError::MissingImage
        );
    }

    #[test]
    fn test_upload_keeps_content_type() {
        let upload = Upload {
            name: Some("  Ada  ".into()),
            bytes: vec![1, 2, 3],
            content_type: Some("image/png".into()),
        };
        let req = AnalysisRequest::from_upload(upload, "Anonymous").unwrap();
        assert_eq!(req.name, "Ada");
        assert_eq!(
            req.channel,
            Channel::Upload {
                content_type: Some("image/png".into())
            }
        );
    }

    #[test]
    fn test_resolve_name() {
        assert_eq!(resolve_name(None, "Anonymous"), "Anonymous");
        assert_eq!(resolve_name(Some(""), "Anonymous"), "Anonymous");
        assert_eq!(resolve_name(Some("Ada"), "Anonymous"), "Ada");
    }
}
