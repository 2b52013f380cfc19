//! user commands carried inside messages
//!
//! a vote command is packed, signed, then encrypted to the coordinator:
//!
//! ```text
//! packed    = stateIndex | voteOptionIndex<<50 | newVoteWeight<<100 | nonce<<150 | pollId<<200
//! plaintext = [packed, newPubKey.x, newPubKey.y, salt, R8.x, R8.y, S]
//! message   = Message(1, poseidonEncrypt(plaintext, sharedKey, 0))
//! ```
//!
//! top-up commands travel in the clear as `Message(2, [stateIndex, amount, 0..])`.

use ark_ff::{BigInteger, PrimeField, Zero};
use num_bigint::BigUint;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use narya_crypto::babyjub::Point;
use narya_crypto::cipher::{poseidon_decrypt, poseidon_encrypt};
use narya_crypto::eddsa::{self, Signature};
use narya_crypto::field::{gen_random_salt, serde_fr, serde_u64_str, Fr};
use narya_crypto::poseidon::hash4;

use crate::error::{DomainError, Result};
use crate::keypair::{PrivKey, PubKey};
use crate::message::{Message, MessageType, MESSAGE_DATA_LENGTH};
use crate::state_leaf::PAD_KEY;

/// Width of every packed command field.
pub const PACKED_FIELD_BITS: u32 = 50;

const PLAINTEXT_LENGTH: usize = 7;

fn check_50_bits(field: &'static str, value: u64) -> Result<u64> {
    if value >> PACKED_FIELD_BITS != 0 {
        return Err(DomainError::ValueTooLarge { field, value });
    }
    Ok(value)
}

/// Vote or key-change command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PCommand {
    #[serde(with = "serde_u64_str")]
    pub state_index: u64,
    pub new_pub_key: PubKey,
    #[serde(with = "serde_u64_str")]
    pub vote_option_index: u64,
    #[serde(with = "serde_u64_str")]
    pub new_vote_weight: u64,
    #[serde(with = "serde_u64_str")]
    pub nonce: u64,
    #[serde(with = "serde_u64_str")]
    pub poll_id: u64,
    #[serde(with = "serde_fr")]
    pub salt: Fr,
}

impl PCommand {
    pub fn new(
        state_index: u64,
        new_pub_key: PubKey,
        vote_option_index: u64,
        new_vote_weight: u64,
        nonce: u64,
        poll_id: u64,
        salt: Fr,
    ) -> Result<Self> {
        Ok(Self {
            state_index: check_50_bits("stateIndex", state_index)?,
            new_pub_key,
            vote_option_index: check_50_bits("voteOptionIndex", vote_option_index)?,
            new_vote_weight: check_50_bits("newVoteWeight", new_vote_weight)?,
            nonce: check_50_bits("nonce", nonce)?,
            poll_id: check_50_bits("pollId", poll_id)?,
            salt,
        })
    }

    /// Same as [`new`](Self::new) with a fresh salt.
    pub fn with_random_salt<R: RngCore + CryptoRng>(
        rng: &mut R,
        state_index: u64,
        new_pub_key: PubKey,
        vote_option_index: u64,
        new_vote_weight: u64,
        nonce: u64,
        poll_id: u64,
    ) -> Result<Self> {
        let salt = gen_random_salt(rng);
        Self::new(
            state_index,
            new_pub_key,
            vote_option_index,
            new_vote_weight,
            nonce,
            poll_id,
            salt,
        )
    }

    /// Stand-in for a message that failed to decrypt at publish time.
    pub fn placeholder() -> Self {
        Self {
            state_index: 0,
            new_pub_key: PubKey::new(PAD_KEY),
            vote_option_index: 0,
            new_vote_weight: 0,
            nonce: 0,
            poll_id: 0,
            salt: Fr::zero(),
        }
    }

    pub fn packed(&self) -> Fr {
        let mut packed = BigUint::from(self.state_index);
        packed |= BigUint::from(self.vote_option_index) << PACKED_FIELD_BITS;
        packed |= BigUint::from(self.new_vote_weight) << (2 * PACKED_FIELD_BITS);
        packed |= BigUint::from(self.nonce) << (3 * PACKED_FIELD_BITS);
        packed |= BigUint::from(self.poll_id) << (4 * PACKED_FIELD_BITS);
        // 250 bits, always below the modulus
        Fr::from(packed)
    }

    pub fn as_array(&self) -> [Fr; 4] {
        [
            self.packed(),
            self.new_pub_key.x(),
            self.new_pub_key.y(),
            self.salt,
        ]
    }

    pub fn hash(&self) -> Fr {
        hash4(self.as_array())
    }

    pub fn sign(&self, priv_key: &PrivKey) -> Signature {
        eddsa::sign(priv_key.raw(), &self.hash())
    }

    pub fn verify_signature(&self, signature: &Signature, pub_key: &PubKey) -> bool {
        eddsa::verify(&self.hash(), signature, pub_key.point())
    }

    /// Encrypt the command and its signature into a type-1 message.
    pub fn encrypt(&self, signature: &Signature, shared_key: &Point) -> Result<Message> {
        let mut plaintext = self.as_array().to_vec();
        plaintext.extend_from_slice(&[signature.r8.x, signature.r8.y, signature.s]);
        let ciphertext = poseidon_encrypt(&plaintext, shared_key, &Fr::zero())?;
        Message::from_vec(MessageType::Vote.as_fr(), ciphertext)
    }

    /// Inverse of [`encrypt`](Self::encrypt). The signature is returned
    /// unchecked.
    pub fn decrypt(message: &Message, shared_key: &Point) -> Result<(PCommand, Signature)> {
        let plaintext = poseidon_decrypt(message.data(), shared_key, &Fr::zero(), PLAINTEXT_LENGTH)?;

        let fields = unpack_fields(&plaintext[0]);
        let command = PCommand {
            state_index: fields[0],
            new_pub_key: PubKey::from_coords(plaintext[1], plaintext[2]),
            vote_option_index: fields[1],
            new_vote_weight: fields[2],
            nonce: fields[3],
            poll_id: fields[4],
            salt: plaintext[3],
        };
        let signature = Signature {
            r8: Point::new(plaintext[4], plaintext[5]),
            s: plaintext[6],
        };
        Ok((command, signature))
    }
}

/// the five 50-bit fields of a packed command, low bits first
fn unpack_fields(packed: &Fr) -> [u64; 5] {
    let bits = packed.into_bigint().to_bits_le();
    let mut out = [0u64; 5];
    for (i, field) in out.iter_mut().enumerate() {
        let start = i * PACKED_FIELD_BITS as usize;
        for b in (0..PACKED_FIELD_BITS as usize).rev() {
            *field <<= 1;
            if bits.get(start + b).copied().unwrap_or(false) {
                *field |= 1;
            }
        }
    }
    out
}

/// Voice credit top-up. Values come straight from the message payload, so
/// they stay field elements until processing validates them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TCommand {
    #[serde(with = "serde_fr")]
    pub state_index: Fr,
    #[serde(with = "serde_fr")]
    pub amount: Fr,
    #[serde(with = "serde_fr")]
    pub poll_id: Fr,
}

impl TCommand {
    pub fn new(state_index: Fr, amount: Fr, poll_id: Fr) -> Self {
        Self {
            state_index,
            amount,
            poll_id,
        }
    }

    pub fn from_message(message: &Message, poll_id: u64) -> Self {
        Self::new(message.data()[0], message.data()[1], Fr::from(poll_id))
    }

    pub fn to_message(&self) -> Message {
        let mut data = [Fr::zero(); MESSAGE_DATA_LENGTH];
        data[0] = self.state_index;
        data[1] = self.amount;
        Message::new(MessageType::Topup.as_fr(), data)
    }
}

/// A decoded command, tagged the way it is exported.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmdType")]
pub enum Command {
    #[serde(rename = "1")]
    Vote(PCommand),
    #[serde(rename = "2")]
    Topup(TCommand),
}

impl Command {
    pub fn message_type(&self) -> MessageType {
        match self {
            Command::Vote(_) => MessageType::Vote,
            Command::Topup(_) => MessageType::Topup,
        }
    }
}
