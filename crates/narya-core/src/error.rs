//! error types for narya-core
//!
//! only structural failures live here. a command that fails validation is
//! not an error, see [`crate::poll::Rejection`].

use narya_crypto::CryptoError;
use narya_domain::DomainError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PollError {
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid poll configuration: {0}")]
    InvalidConfig(String),

    #[error("expected message type {expected}, got {got}")]
    InvalidMessageType { expected: &'static str, got: String },

    #[error("poll already holds {max} messages")]
    TooManyMessages { max: usize },

    #[error("message processing has already started")]
    ProcessingStarted,

    #[error("no more messages to process")]
    NoUnprocessedMessages,

    #[error("message processing is not complete")]
    ProcessingIncomplete,

    #[error("no more ballots to tally")]
    NoUntalliedBallots,

    #[error("no more subsidy batches to calculate")]
    NoSubsidyBatches,

    #[error("poll {holder} is being processed, poll {requested} must wait")]
    LockHeld { holder: u64, requested: u64 },

    #[error("no poll with id {0}")]
    UnknownPoll(u64),

    #[error("inconsistent signup snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("missing salt for {0}")]
    MissingSalt(String),

    #[error("coordinator key does not match the exported public key")]
    CoordinatorKeyMismatch,

    #[error("packed value wider than {0} bits")]
    PackedOverflow(usize),

    #[error("invalid export: {0}")]
    InvalidExport(String),
}

pub type Result<T> = std::result::Result<T, PollError>;
