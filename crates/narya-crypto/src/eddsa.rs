//! eddsa-poseidon over baby jubjub and the key derivation it shares with ecdh
//!
//! # Key derivation
//!
//! ```text
//! h  = blake512(minimal big-endian bytes of priv)
//! s  = prune(h[0..32]) as little-endian integer
//! pk = Base8 * (s >> 3)
//! ```
//!
//! `s >> 3` is also the scalar the circuits take as the coordinator key.

use blake_hash::{Blake512, Digest};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::babyjub::{sub_order, Point, BASE8};
use crate::field::{fr_to_biguint, fr_to_le_bytes, serde_fr, Fr};
use crate::poseidon::fixed;

fn blake512(data: &[u8]) -> [u8; 64] {
    let digest = Blake512::digest(data);
    let mut out = [0u8; 64];
    out.copy_from_slice(&digest);
    out
}

/// minimal big-endian encoding, zero encodes as a single byte
fn priv_key_bytes(priv_key: &Fr) -> Vec<u8> {
    fr_to_biguint(priv_key).to_bytes_be()
}

fn prune(bytes: &mut [u8]) {
    bytes[0] &= 0xf8;
    bytes[31] &= 0x7f;
    bytes[31] |= 0x40;
}

fn expand(priv_key: &Fr) -> ([u8; 64], BigUint) {
    expand_bytes(&priv_key_bytes(priv_key))
}

/// blake digest of the key bytes plus the pruned scalar it yields
fn expand_bytes(key: &[u8]) -> ([u8; 64], BigUint) {
    let h = blake512(key);
    let mut head = [0u8; 32];
    head.copy_from_slice(&h[..32]);
    prune(&mut head);
    (h, BigUint::from_bytes_le(&head))
}

/// Scalar form of a private key as the circuits consume it.
pub fn format_priv_key_for_babyjub(priv_key: &Fr) -> BigUint {
    let (_, s) = expand(priv_key);
    s >> 3u32
}

pub fn gen_pub_key(priv_key: &Fr) -> Point {
    BASE8.mul_scalar(&format_priv_key_for_babyjub(priv_key))
}

/// Shared point between `priv_key` and someone else's public key.
pub fn gen_ecdh_shared_key(priv_key: &Fr, pub_key: &Point) -> Point {
    pub_key.mul_scalar(&format_priv_key_for_babyjub(priv_key))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    #[serde(rename = "R8")]
    pub r8: Point,
    #[serde(rename = "S", with = "serde_fr")]
    pub s: Fr,
}

/// Sign a single field element.
pub fn sign(priv_key: &Fr, msg: &Fr) -> Signature {
    let (h, s) = expand(priv_key);
    sign_expanded(&h, s, msg)
}

fn sign_expanded(h: &[u8; 64], s: BigUint, msg: &Fr) -> Signature {
    let l = sub_order();
    let a = BASE8.mul_scalar(&(&s >> 3u32));

    let mut nonce_input = Vec::with_capacity(64);
    nonce_input.extend_from_slice(&h[32..]);
    nonce_input.extend_from_slice(&fr_to_le_bytes(msg));
    let r = BigUint::from_bytes_le(&blake512(&nonce_input)) % &l;

    let r8 = BASE8.mul_scalar(&r);
    let hm = challenge(&r8, &a, msg);
    let big_s = (r + (hm % &l) * (s % &l)) % &l;

    Signature {
        r8,
        s: Fr::from(big_s),
    }
}

fn challenge(r8: &Point, a: &Point, msg: &Fr) -> BigUint {
    fr_to_biguint(&fixed([r8.x, r8.y, a.x, a.y, *msg]))
}

/// Verify `Base8 * S == R8 + A * (8 * hm)`.
pub fn verify(msg: &Fr, sig: &Signature, pub_key: &Point) -> bool {
    if !sig.r8.is_on_curve() || !pub_key.is_on_curve() {
        return false;
    }
    let s = fr_to_biguint(&sig.s);
    if s >= sub_order() {
        return false;
    }
    let hm = challenge(&sig.r8, pub_key, msg);
    let left = BASE8.mul_scalar(&s);
    let right = sig.r8.add(&pub_key.mul_scalar(&(hm * 8u32)));
    left == right
}
