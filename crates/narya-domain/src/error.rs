//! error types for narya-domain

use narya_crypto::CryptoError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("invalid serialized key: {0}")]
    InvalidSerializedKey(String),

    #[error("{field} does not fit in 50 bits: {value}")]
    ValueTooLarge { field: &'static str, value: u64 },

    #[error("invalid message type {0}")]
    InvalidMessageType(String),

    #[error("expected {expected} elements, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("vote option tree of depth {depth} cannot hold {max_vote_options} options")]
    VoteOptionTreeTooSmall { depth: usize, max_vote_options: usize },
}

pub type Result<T> = std::result::Result<T, DomainError>;
