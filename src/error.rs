//! Error taxonomy for the classification engine
//!
//! Containment rules:
//! - TransientFeed: the feed is skipped for this cycle, checkpoint untouched
//! - ClassifierUnavailable: downgraded to UNCERTAIN by the adapter
//! - Persistence: aborts the checkpoint advance of one feed
//! - InvariantViolation: surfaced to the caller

use thiserror::Error;

use crate::model::{FeedId, Fingerprint};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("feed '{feed}' unavailable: {message}")]
    TransientFeed { feed: FeedId, message: String },

    #[error("classifier unavailable: {0}")]
    ClassifierUnavailable(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("no classification recorded for {0}")]
    UnknownFingerprint(Fingerprint),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        EngineError::Persistence(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Persistence(err.to_string())
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
