//! Room store failures.

use derive_more::{Display, Error};
use tracing::instrument;

/// What part of a room store gave way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum StoreFailure {
    /// The backing table could not be reached: the in-process room table's
    /// lock was poisoned, or the SQLite file could not be opened, migrated
    /// or unlocked within the busy timeout.
    Unavailable,
    /// SQLite refused a statement against the `rooms` table.
    Query,
    /// A room did not serialize, or a stored room did not decode.
    Encoding,
    /// The blocking task running a SQLite call died.
    Worker,
}

/// A room could not be read from or written to its store.
///
/// Carries the room-store call site that raised it. When a write fails
/// the room keeps whatever the store last held, so the caller reports the
/// failure for that one action and the room stays usable.
#[derive(Debug, Clone, Display, Error)]
#[display("Room store {} failure: {} at {}:{}", kind, message, file, line)]
pub struct StoreError {
    /// Failure category.
    pub kind: StoreFailure,
    /// What the store was doing.
    pub message: String,
    /// Line in the store backend that raised it.
    pub line: u32,
    /// Store backend source file.
    pub file: &'static str,
}

impl StoreError {
    /// Records a room store failure at the caller's location.
    #[track_caller]
    #[instrument(skip(message))]
    pub fn new(kind: StoreFailure, message: impl Into<String>) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            kind,
            message: message.into(),
            line: loc.line(),
            file: loc.file(),
        }
    }

    /// Whether retrying later might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, StoreFailure::Unavailable | StoreFailure::Worker)
    }
}

impl From<diesel::result::Error> for StoreError {
    #[track_caller]
    fn from(err: diesel::result::Error) -> Self {
        Self::new(StoreFailure::Query, format!("rooms table statement failed: {}", err))
    }
}

impl From<diesel::ConnectionError> for StoreError {
    #[track_caller]
    fn from(err: diesel::ConnectionError) -> Self {
        Self::new(
            StoreFailure::Unavailable,
            format!("room database unreachable: {}", err),
        )
    }
}

impl From<serde_json::Error> for StoreError {
    #[track_caller]
    fn from(err: serde_json::Error) -> Self {
        Self::new(
            StoreFailure::Encoding,
            format!("room state is not valid JSON: {}", err),
        )
    }
}

impl From<tokio::task::JoinError> for StoreError {
    #[track_caller]
    fn from(err: tokio::task::JoinError) -> Self {
        Self::new(
            StoreFailure::Worker,
            format!("room database task did not finish: {}", err),
        )
    }
}
