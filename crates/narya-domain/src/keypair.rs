//! coordinator and voter keys
//!
//! keys travel as prefixed hex strings:
//!
//! ```text
//! macipk.<hex of the 32-byte packed point>
//! macisk.<64 hex digits of the raw scalar, big-endian>
//! ```

use std::fmt;

use num_bigint::BigUint;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use narya_crypto::babyjub::Point;
use narya_crypto::eddsa::{format_priv_key_for_babyjub, gen_ecdh_shared_key, gen_pub_key};
use narya_crypto::field::{fr_from_biguint, fr_to_be_bytes, gen_random_babyjub_value, Fr};
use narya_crypto::poseidon::hash2;

use crate::error::{DomainError, Result};

pub const SERIALIZED_PUB_KEY_PREFIX: &str = "macipk.";
pub const SERIALIZED_PRIV_KEY_PREFIX: &str = "macisk.";

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PrivKey(Fr);

impl fmt::Debug for PrivKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivKey(..)")
    }
}

impl PrivKey {
    pub fn new(raw: Fr) -> Self {
        Self(raw)
    }

    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(gen_random_babyjub_value(rng))
    }

    pub fn raw(&self) -> &Fr {
        &self.0
    }

    /// the shifted scalar the circuits take in place of the raw key
    pub fn as_circuit_inputs(&self) -> Fr {
        Fr::from(format_priv_key_for_babyjub(&self.0))
    }

    pub fn serialize(&self) -> String {
        format!(
            "{}{}",
            SERIALIZED_PRIV_KEY_PREFIX,
            hex::encode(fr_to_be_bytes(&self.0))
        )
    }

    pub fn deserialize(s: &str) -> Result<Self> {
        let body = s
            .strip_prefix(SERIALIZED_PRIV_KEY_PREFIX)
            .ok_or_else(|| DomainError::InvalidSerializedKey(s.to_string()))?;
        let value = BigUint::parse_bytes(body.as_bytes(), 16)
            .ok_or_else(|| DomainError::InvalidSerializedKey(s.to_string()))?;
        Ok(Self(fr_from_biguint(&value)?))
    }

    pub fn is_valid_serialized(s: &str) -> bool {
        Self::deserialize(s).is_ok()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PubKey(Point);

impl PubKey {
    pub fn new(point: Point) -> Self {
        Self(point)
    }

    pub fn from_coords(x: Fr, y: Fr) -> Self {
        Self(Point::new(x, y))
    }

    pub fn point(&self) -> &Point {
        &self.0
    }

    pub fn x(&self) -> Fr {
        self.0.x
    }

    pub fn y(&self) -> Fr {
        self.0.y
    }

    pub fn hash(&self) -> Fr {
        hash2([self.0.x, self.0.y])
    }

    pub fn as_circuit_inputs(&self) -> [Fr; 2] {
        [self.0.x, self.0.y]
    }

    pub fn serialize(&self) -> String {
        format!("{}{}", SERIALIZED_PUB_KEY_PREFIX, hex::encode(self.0.pack()))
    }

    pub fn deserialize(s: &str) -> Result<Self> {
        let invalid = || DomainError::InvalidSerializedKey(s.to_string());
        let body = s.strip_prefix(SERIALIZED_PUB_KEY_PREFIX).ok_or_else(invalid)?;
        let bytes = hex::decode(body).map_err(|_| invalid())?;
        let packed: [u8; 32] = bytes.try_into().map_err(|_| invalid())?;
        Ok(Self(Point::unpack(&packed)?))
    }

    pub fn is_valid_serialized(s: &str) -> bool {
        Self::deserialize(s).is_ok()
    }
}

impl Serialize for PubKey {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&PubKey::serialize(self))
    }
}

impl<'de> Deserialize<'de> for PubKey {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        PubKey::deserialize(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Keypair {
    pub priv_key: PrivKey,
    pub pub_key: PubKey,
}

impl Keypair {
    pub fn new(priv_key: PrivKey) -> Self {
        let pub_key = PubKey(gen_pub_key(priv_key.raw()));
        Self { priv_key, pub_key }
    }

    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self::new(PrivKey::random(rng))
    }

    /// ecdh between one side's private key and the other's public key
    pub fn gen_ecdh_shared_key(priv_key: &PrivKey, pub_key: &PubKey) -> Point {
        gen_ecdh_shared_key(priv_key.raw(), pub_key.point())
    }
}
