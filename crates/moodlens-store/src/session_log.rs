//! SQLite-backed session history.
//!
//! One append-only row per completed analysis. Rows are never updated or
//! deleted here; retention is left to whoever operates the database.

use chrono::{SecondsFormat, Utc};
use moodlens_core::{Emotion, EmotionScores};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS sessions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT,
        image_path TEXT,
        dominant_emotion TEXT,
        emotions_json TEXT,
        created_at TEXT
    );
";

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("failed to create database directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to serialize emotion scores: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("session log lock poisoned")]
    Poisoned,
}

/// List-view projection of a session row (no score map).
///
/// `dominant_emotion` is the label as stored. Rows written by older tools
/// may hold labels outside [`Emotion`] (e.g. `unknown`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub id: i64,
    pub name: String,
    pub image_path: String,
    pub dominant_emotion: String,
    pub created_at: String,
}

impl SessionSummary {
    /// The stored label, if it is one of the known emotions.
    pub fn emotion(&self) -> Option<Emotion> {
        self.dominant_emotion.parse().ok()
    }
}

/// A complete session row.
///
/// `emotion_scores` is `None` when the stored text is not a JSON score map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionRecord {
    pub id: i64,
    pub name: String,
    pub image_path: String,
    pub dominant_emotion: String,
    pub emotion_scores: Option<EmotionScores>,
    pub created_at: String,
}

impl SessionRecord {
    pub fn emotion(&self) -> Option<Emotion> {
        self.dominant_emotion.parse().ok()
    }
}

fn decode_scores(id: i64, text: Option<&str>) -> Option<EmotionScores> {
    let text = text?;
    match EmotionScores::from_json(text) {
        Ok(scores) => Some(scores),
        Err(err) => {
            tracing::warn!(id, error = %err, "stored emotion scores are not readable");
            None
        }
    }
}

/// Append-only store of session records.
pub struct SessionLog {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SessionLog {
    /// Open the database at `path`, creating the file and schema if absent.
    ///
    /// Safe to call on an existing database; existing rows are kept.
    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| PersistenceError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
            tracing::warn!(error = %err, "failed to enable WAL mode");
        }
        conn.execute_batch(SCHEMA)?;

        tracing::info!(path = %path.display(), "session log ready");
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// In-memory log, discarded on drop.
    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, PersistenceError> {
        self.conn.lock().map_err(|_| PersistenceError::Poisoned)
    }

    /// Insert one session row and return its id.
    ///
    /// `created_at` is assigned here, as UTC RFC 3339 with microseconds.
    pub fn append(
        &self,
        name: &str,
        annotated_path: &Path,
        dominant: Emotion,
        scores: &EmotionScores,
    ) -> Result<i64, PersistenceError> {
        let emotions_json = scores.to_json()?;
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let image_path = annotated_path.to_string_lossy().into_owned();

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sessions (name, image_path, dominant_emotion, emotions_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![name, image_path, dominant.as_str(), emotions_json, created_at],
        )?;
        let id = conn.last_insert_rowid();

        tracing::debug!(id, name, dominant = %dominant, "session recorded");
        Ok(id)
    }

    /// All sessions, newest first.
    ///
    /// Labels are returned as stored; a row with an unrecognized label is
    /// still listed.
    pub fn list_all(&self) -> Result<Vec<SessionSummary>, PersistenceError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, image_path, dominant_emotion, created_at
             FROM sessions
             ORDER BY id DESC",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .map(|(id, name, image_path, dominant, created_at)| SessionSummary {
                id,
                name: name.unwrap_or_default(),
                image_path: image_path.unwrap_or_default(),
                dominant_emotion: dominant.unwrap_or_default(),
                created_at: created_at.unwrap_or_default(),
            })
            .collect())
    }

    /// Full record for `id`, if it exists.
    pub fn get(&self, id: i64) -> Result<Option<SessionRecord>, PersistenceError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT name, image_path, dominant_emotion, emotions_json, created_at
                 FROM sessions
                 WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((name, image_path, dominant, emotions_json, created_at)) = row else {
            return Ok(None);
        };

        Ok(Some(SessionRecord {
            id,
            name: name.unwrap_or_default(),
            image_path: image_path.unwrap_or_default(),
            dominant_emotion: dominant.unwrap_or_default(),
            emotion_scores: decode_scores(id, emotions_json.as_deref()),
            created_at: created_at.unwrap_or_default(),
        }))
    }

    pub fn count(&self) -> Result<usize, PersistenceError> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}
