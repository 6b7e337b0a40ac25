//! moodlens-store — Persistence for analysis artifacts and session history.
//!
//! Raw and annotated images live in a flat upload directory; one row per
//! completed analysis lives in a SQLite `sessions` table.

pub mod image_store;
pub mod session_log;

pub use image_store::{
    Channel, ImageStore, RandomToken, SequenceToken, StorageError, StoredImage, UniquenessSource,
};
pub use session_log::{PersistenceError, SessionLog, SessionRecord, SessionSummary};
