use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Which emotion backend the classifier adapter talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// DeepFace-compatible HTTP service.
    DeepFace,
    /// Local FER+ ONNX model.
    FerPlus,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deepface" => Ok(BackendKind::DeepFace),
            "ferplus" => Ok(BackendKind::FerPlus),
            other => Err(format!("unknown backend '{other}' (expected deepface or ferplus)")),
        }
    }
}

/// Pipeline configuration.
///
/// Built from defaults, an optional TOML file, then `MOODLENS_*`
/// environment variables, in that order of precedence (last wins).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding raw and annotated images.
    pub upload_dir: PathBuf,
    /// Path to the SQLite session database.
    pub db_path: PathBuf,
    /// URL path under which `upload_dir` is served.
    pub public_prefix: String,
    /// Requester name used when none is supplied.
    pub default_name: String,
    /// Upper bound on a single classifier call.
    pub classify_timeout_secs: u64,
    /// Preferred annotation font (TrueType/OpenType).
    pub font_path: Option<PathBuf>,
    pub font_size: f32,
    pub backend: BackendKind,
    /// Base URL of the DeepFace service.
    pub deepface_url: String,
    /// FER+ ONNX model file.
    pub model_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("static/uploads"),
            db_path: PathBuf::from("data/emotions.db"),
            public_prefix: "/static/uploads".to_string(),
            default_name: "Anonymous".to_string(),
            classify_timeout_secs: 30,
            font_path: None,
            font_size: 20.0,
            backend: BackendKind::DeepFace,
            deepface_url: "http://127.0.0.1:5005".to_string(),
            model_path: PathBuf::from("models/emotion-ferplus-8.onnx"),
        }
    }
}

impl Config {
    /// Load from an optional TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };
        Ok(config.with_overrides(|key| std::env::var(key).ok()))
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `MOODLENS_*` overrides looked up through `var`.
    ///
    /// Unparseable numeric or backend values are ignored with a warning.
    pub fn with_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = var("MOODLENS_UPLOAD_DIR") {
            self.upload_dir = PathBuf::from(v);
        }
        if let Some(v) = var("MOODLENS_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = var("MOODLENS_PUBLIC_PREFIX") {
            self.public_prefix = v;
        }
        if let Some(v) = var("MOODLENS_DEFAULT_NAME") {
            self.default_name = v;
        }
        self.classify_timeout_secs = parsed(&var, "MOODLENS_CLASSIFY_TIMEOUT_SECS", self.classify_timeout_secs);
        if let Some(v) = var("MOODLENS_FONT_PATH") {
            self.font_path = Some(PathBuf::from(v));
        }
        self.font_size = parsed(&var, "MOODLENS_FONT_SIZE", self.font_size);
        self.backend = parsed(&var, "MOODLENS_BACKEND", self.backend);
        if let Some(v) = var("MOODLENS_DEEPFACE_URL") {
            self.deepface_url = v;
        }
        if let Some(v) = var("MOODLENS_MODEL_PATH") {
            self.model_path = PathBuf::from(v);
        }
        self
    }

    pub fn classify_timeout(&self) -> Duration {
        Duration::from_secs(self.classify_timeout_secs.max(1))
    }
}

fn parsed<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match var(key) {
        Some(v) => v.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %v, "ignoring unparseable setting");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.upload_dir, PathBuf::from("static/uploads"));
        assert_eq!(config.db_path, PathBuf::from("data/emotions.db"));
        assert_eq!(config.default_name, "Anonymous");
        assert_eq!(config.backend, BackendKind::DeepFace);
        assert_eq!(config.classify_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_toml_partial_file() {
        let config = Config::from_toml_str(
            r#"
            upload_dir = "/srv/moodlens/uploads"
            backend = "ferplus"
            classify_timeout_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.upload_dir, PathBuf::from("/srv/moodlens/uploads"));
        assert_eq!(config.backend, BackendKind::FerPlus);
        assert_eq!(config.classify_timeout_secs, 5);
        // Untouched keys keep their defaults.
        assert_eq!(config.public_prefix, "/static/uploads");
    }

    #[test]
    fn test_toml_rejects_unknown_backend() {
        assert!(Config::from_toml_str(r#"backend = "tensorflow""#).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::default().with_overrides(vars(&[
            ("MOODLENS_DB_PATH", "/tmp/x.db"),
            ("MOODLENS_BACKEND", "FerPlus"),
            ("MOODLENS_CLASSIFY_TIMEOUT_SECS", "12"),
            ("MOODLENS_FONT_PATH", "/usr/share/fonts/DejaVuSans.ttf"),
        ]));
        assert_eq!(config.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.backend, BackendKind::FerPlus);
        assert_eq!(config.classify_timeout_secs, 12);
        assert_eq!(
            config.font_path,
            Some(PathBuf::from("/usr/share/fonts/DejaVuSans.ttf"))
        );
    }

    #[test]
    fn test_env_bad_values_ignored() {
        let config = Config::default().with_overrides(vars(&[
            ("MOODLENS_CLASSIFY_TIMEOUT_SECS", "soon"),
            ("MOODLENS_BACKEND", "magic"),
        ]));
        assert_eq!(config.classify_timeout_secs, 30);
        assert_eq!(config.backend, BackendKind::DeepFace);
    }

    #[test]
    fn test_zero_timeout_clamped() {
        let config = Config {
            classify_timeout_secs: 0,
            ..Config::default()
        };
        assert_eq!(config.classify_timeout(), Duration::from_secs(1));
    }
}
