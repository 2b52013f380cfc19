//! bn254 scalar field helpers
//!
//! every value that reaches a hash, a tree or a circuit input is an element
//! of the bn254 scalar field. big integers coming from callers or from json
//! are range checked here; reduction never happens silently.

use ark_ff::{BigInteger, MontFp, PrimeField};
use num_bigint::BigUint;
use num_traits::ToPrimitive;
use rand::{CryptoRng, RngCore};

use crate::error::{CryptoError, Result};

pub use ark_bn254::Fr;

/// keccak256("Maci") mod p, the zero leaf of every message tree
pub const NOTHING_UP_MY_SLEEVE: Fr =
    MontFp!("8370432830353022751713833565135785980866757267633941821328460903436894336785");

/// field modulus as a big integer
pub fn snark_field_size() -> BigUint {
    BigUint::from(Fr::MODULUS)
}

/// checked conversion, values >= p are rejected
pub fn fr_from_biguint(value: &BigUint) -> Result<Fr> {
    if *value >= snark_field_size() {
        return Err(CryptoError::FieldOverflow(value.to_string()));
    }
    Ok(Fr::from(value.clone()))
}

pub fn fr_to_biguint(value: &Fr) -> BigUint {
    BigUint::from(value.into_bigint())
}

/// parse a decimal string into a field element
pub fn fr_from_dec_str(s: &str) -> Result<Fr> {
    let value: BigUint = s
        .trim()
        .parse()
        .map_err(|_| CryptoError::InvalidEncoding(s.to_string()))?;
    fr_from_biguint(&value)
}

pub fn fr_to_dec_string(value: &Fr) -> String {
    fr_to_biguint(value).to_string()
}

/// value as u64 if it fits
pub fn fr_to_u64(value: &Fr) -> Option<u64> {
    fr_to_biguint(value).to_u64()
}

/// 32-byte big-endian encoding
pub fn fr_to_be_bytes(value: &Fr) -> [u8; 32] {
    let bytes = value.into_bigint().to_bytes_be();
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    out
}

/// 32-byte little-endian encoding
pub fn fr_to_le_bytes(value: &Fr) -> [u8; 32] {
    let bytes = value.into_bigint().to_bytes_le();
    let mut out = [0u8; 32];
    out[..bytes.len()].copy_from_slice(&bytes);
    out
}

/// Uniform value below the field modulus.
///
/// Used for private keys and commitment salts alike.
pub fn gen_random_babyjub_value<R: RngCore + CryptoRng>(rng: &mut R) -> Fr {
    let modulus = snark_field_size();
    // 2^256 mod p; draws below it would bias the reduction
    let floor = (BigUint::from(1u8) << 256u32) % &modulus;
    loop {
        let mut buf = [0u8; 32];
        rng.fill_bytes(&mut buf);
        let candidate = BigUint::from_bytes_be(&buf);
        if candidate >= floor {
            return Fr::from(candidate % &modulus);
        }
    }
}

/// random blinding salt for commitments
pub fn gen_random_salt<R: RngCore + CryptoRng>(rng: &mut R) -> Fr {
    gen_random_babyjub_value(rng)
}

struct Dec<'a>(&'a Fr);

impl serde::Serialize for Dec<'_> {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&fr_to_dec_string(self.0))
    }
}

struct DecOwned(Fr);

impl<'de> serde::Deserialize<'de> for DecOwned {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let s = <String as serde::Deserialize>::deserialize(d)?;
        fr_from_dec_str(&s)
            .map(DecOwned)
            .map_err(serde::de::Error::custom)
    }
}

/// `#[serde(with = "serde_fr")]` for a single element as a decimal string
pub mod serde_fr {
    use super::*;

    pub fn serialize<S: serde::Serializer>(v: &Fr, s: S) -> std::result::Result<S::Ok, S::Error> {
        serde::Serialize::serialize(&Dec(v), s)
    }

    pub fn deserialize<'de, D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Fr, D::Error> {
        <DecOwned as serde::Deserialize>::deserialize(d).map(|v| v.0)
    }
}

/// `#[serde(with = "serde_fr_vec")]` for a list of decimal strings
pub mod serde_fr_vec {
    use super::*;

    pub fn serialize<S: serde::Serializer>(v: &[Fr], s: S) -> std::result::Result<S::Ok, S::Error> {
        s.collect_seq(v.iter().map(Dec))
    }

    pub fn deserialize<'de, D: serde::Deserializer<'de>>(
        d: D,
    ) -> std::result::Result<Vec<Fr>, D::Error> {
        let raw = <Vec<DecOwned> as serde::Deserialize>::deserialize(d)?;
        Ok(raw.into_iter().map(|v| v.0).collect())
    }
}

/// `#[serde(with = "serde_fr_map")]` for maps with field element values
pub mod serde_fr_map {
    use super::*;
    use std::collections::BTreeMap;

    pub fn serialize<K, S>(m: &BTreeMap<K, Fr>, s: S) -> std::result::Result<S::Ok, S::Error>
    where
        K: serde::Serialize,
        S: serde::Serializer,
    {
        s.collect_map(m.iter().map(|(k, v)| (k, Dec(v))))
    }

    pub fn deserialize<'de, K, D>(d: D) -> std::result::Result<BTreeMap<K, Fr>, D::Error>
    where
        K: serde::Deserialize<'de> + Ord,
        D: serde::Deserializer<'de>,
    {
        let raw = <BTreeMap<K, DecOwned> as serde::Deserialize>::deserialize(d)?;
        Ok(raw.into_iter().map(|(k, v)| (k, v.0)).collect())
    }
}

/// `#[serde(with = "serde_u64_str")]` for counters exported as decimal strings
pub mod serde_u64_str {
    pub fn serialize<S: serde::Serializer>(v: &u64, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: serde::Deserializer<'de>>(d: D) -> std::result::Result<u64, D::Error> {
        let s = <String as serde::Deserialize>::deserialize(d)?;
        s.trim().parse().map_err(serde::de::Error::custom)
    }
}
