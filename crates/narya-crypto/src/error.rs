//! error types for narya-crypto

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("value is not below the snark field modulus: {0}")]
    FieldOverflow(String),

    #[error("invalid field element encoding: {0}")]
    InvalidEncoding(String),

    #[error("hash arity {0} not supported")]
    UnsupportedArity(usize),

    #[error("too many hash inputs: {got} > {max}")]
    TooManyInputs { got: usize, max: usize },

    #[error("point is not on baby jubjub")]
    PointNotOnCurve,

    #[error("invalid packed point")]
    InvalidPackedPoint,

    #[error("nonce must be below 2^128")]
    InvalidNonce,

    #[error("decryption failed: {0}")]
    DecryptionFailed(&'static str),

    #[error("tree is full: capacity {0}")]
    TreeFull(usize),

    #[error("index {index} out of bounds (limit {limit})")]
    IndexOutOfBounds { index: usize, limit: usize },

    #[error("invalid subroot range: {0}")]
    InvalidSubrootRange(String),

    #[error("accumulator queue: {0}")]
    AccQueue(&'static str),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
