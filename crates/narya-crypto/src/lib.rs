//! narya-crypto: circuit-friendly primitives for anti-collusion voting
//!
//! everything here hashes and encrypts the way the on-chain contracts and
//! the zk circuits do, so roots and commitments computed off-chain can be
//! fed straight into proofs.
//!
//! ## layout
//!
//! - [`field`] bn254 scalar field helpers and serde adapters
//! - [`poseidon`] poseidon (t = 2..=6), `hash13` and the sha256 input hash
//! - [`babyjub`] twisted edwards curve, point packing
//! - [`eddsa`] eddsa-poseidon signatures and ecdh
//! - [`cipher`] poseidon duplex encryption
//! - [`tree`] incremental k-ary merkle tree
//! - [`accqueue`] accumulator queue mirroring the contract
//!
//! ## usage
//!
//! ```rust,ignore
//! use narya_crypto::{AccQueue, NOTHING_UP_MY_SLEEVE};
//!
//! let mut q = AccQueue::new(2, 5, NOTHING_UP_MY_SLEEVE)?;
//! q.enqueue(leaf)?;
//! q.merge_sub_roots(0)?;
//! let root = q.merge(10)?;
//! ```

pub mod accqueue;
pub mod babyjub;
pub mod cipher;
pub mod eddsa;
pub mod error;
pub mod field;
pub mod poseidon;
pub mod tree;

pub use accqueue::AccQueue;
pub use babyjub::Point;
pub use cipher::{poseidon_decrypt, poseidon_encrypt};
pub use eddsa::{
    format_priv_key_for_babyjub, gen_ecdh_shared_key, gen_pub_key, sign, verify, Signature,
};
pub use error::{CryptoError, Result};
pub use field::{
    fr_from_dec_str, fr_to_dec_string, gen_random_babyjub_value, gen_random_salt, Fr,
    NOTHING_UP_MY_SLEEVE,
};
pub use poseidon::{hash13, hash2, hash3, hash4, hash5, hash_left_right, sha256_hash};
pub use tree::{gen_tree_commitment, IncrementalMerkleTree, MerkleProof};
