//! Image artifact storage.
//!
//! Files are named `<requester>_<UTC timestamp, µs>_<token>.<ext>`. The
//! token comes from a pluggable [`UniquenessSource`], so two submissions from
//! the same requester within one microsecond still get distinct names.

use chrono::{DateTime, Utc};
use image::ImageFormat;
use moodlens_core::artifact::write_atomic;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

const MAX_NAME_LEN: usize = 64;
const FALLBACK_NAME: &str = "anonymous";
const DEFAULT_EXTENSION: &str = "jpg";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("failed to create storage directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// How an image reached the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Channel {
    /// Multipart file upload, with the client-declared content type if any.
    Upload { content_type: Option<String> },
    /// Inline base64 capture (webcam snapshot).
    Capture,
}

/// A persisted image artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub path: PathBuf,
    pub file_name: String,
}

/// Source of the per-file disambiguation token.
pub trait UniquenessSource: Send + Sync {
    fn next_token(&self) -> String;
}

/// Random 12-hex-digit tokens taken from a v4 UUID.
pub struct RandomToken;

impl UniquenessSource for RandomToken {
    fn next_token(&self) -> String {
        let mut token = uuid::Uuid::new_v4().simple().to_string();
        token.truncate(12);
        token
    }
}

/// Monotonic counter tokens (`000000`, `000001`, ...), deterministic for tests.
#[derive(Default)]
pub struct SequenceToken(AtomicU64);

impl SequenceToken {
    pub fn starting_at(n: u64) -> Self {
        Self(AtomicU64::new(n))
    }
}

impl UniquenessSource for SequenceToken {
    fn next_token(&self) -> String {
        format!("{:06}", self.0.fetch_add(1, Ordering::SeqCst))
    }
}

/// Reduce a requester name to a safe file-name component.
///
/// Whitespace becomes `_`; anything other than ASCII alphanumerics, `-` and
/// `_` is dropped, which rules out path separators and `..`.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .filter_map(|c| {
            if c.is_whitespace() {
                Some('_')
            } else if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                Some(c)
            } else {
                None
            }
        })
        .take(MAX_NAME_LEN)
        .collect();

    if cleaned.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        cleaned
    }
}

fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let mime = content_type.split(';').next().unwrap_or("").trim();
    match mime.to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/bmp" | "image/x-ms-bmp" => Some("bmp"),
        _ => None,
    }
}

fn extension_for_format(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Jpeg => Some("jpg"),
        ImageFormat::Png => Some("png"),
        ImageFormat::Gif => Some("gif"),
        ImageFormat::WebP => Some("webp"),
        ImageFormat::Bmp => Some("bmp"),
        _ => None,
    }
}

/// Pick a file extension: declared content type, then sniffed bytes, then `jpg`.
pub fn extension_for(bytes: &[u8], channel: &Channel) -> &'static str {
    let declared = match channel {
        Channel::Upload {
            content_type: Some(ct),
        } => extension_for_content_type(ct),
        _ => None,
    };
    declared
        .or_else(|| image::guess_format(bytes).ok().and_then(extension_for_format))
        .unwrap_or(DEFAULT_EXTENSION)
}

/// URL prefix with exactly one leading `/` and no trailing `/`; empty for the site root.
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// Flat directory of raw and annotated images.
pub struct ImageStore {
    root: PathBuf,
    public_prefix: String,
    tokens: Arc<dyn UniquenessSource>,
}

impl ImageStore {
    /// Open (creating if needed) the storage directory at `root`.
    ///
    /// `public_prefix` is the URL path under which `root` is served, e.g.
    /// `/static/uploads`.
    pub fn open(root: impl Into<PathBuf>, public_prefix: &str) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| StorageError::CreateDir {
            path: root.clone(),
            source,
        })?;

        Ok(Self {
            root,
            public_prefix: normalize_prefix(public_prefix),
            tokens: Arc::new(RandomToken),
        })
    }

    /// Replace the token source used for new file names.
    pub fn with_tokens(mut self, tokens: Arc<dyn UniquenessSource>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_name_for(&self, requester: &str, ext: &str, now: DateTime<Utc>) -> String {
        format!(
            "{}_{}_{}.{ext}",
            sanitize_name(requester),
            now.format("%Y%m%d%H%M%S%6f"),
            self.tokens.next_token()
        )
    }

    /// Persist raw image bytes under a fresh, unique name.
    pub fn persist(
        &self,
        bytes: &[u8],
        requester: &str,
        channel: &Channel,
    ) -> Result<StoredImage, StorageError> {
        let ext = extension_for(bytes, channel);
        let file_name = self.file_name_for(requester, ext, Utc::now());
        let path = self.root.join(&file_name);

        write_atomic(&path, bytes).map_err(|source| StorageError::Write {
            path: path.clone(),
            source,
        })?;

        tracing::debug!(path = %path.display(), bytes = bytes.len(), "image stored");
        Ok(StoredImage { path, file_name })
    }

    /// Root-relative URL for an artifact in this store; always starts with `/`.
    pub fn public_url(&self, path: &Path) -> String {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{}/{}", self.public_prefix, name)
    }
}
