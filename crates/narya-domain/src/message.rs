//! on-chain message: a type tag plus ten field elements of payload

use ark_ff::{One, Zero};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use narya_crypto::field::{fr_from_biguint, serde_fr, serde_fr_vec, Fr};
use narya_crypto::poseidon::hash13;

use crate::error::{DomainError, Result};
use crate::keypair::PubKey;

pub const MESSAGE_DATA_LENGTH: usize = 10;

/// Message type tags as they appear on chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// signed vote or key change, encrypted to the coordinator
    Vote,
    /// voice credit top-up, sent in the clear
    Topup,
}

impl MessageType {
    pub fn as_fr(self) -> Fr {
        match self {
            MessageType::Vote => Fr::one(),
            MessageType::Topup => Fr::from(2u64),
        }
    }

    pub fn from_fr(value: &Fr) -> Option<Self> {
        if *value == Fr::one() {
            Some(MessageType::Vote)
        } else if *value == Fr::from(2u64) {
            Some(MessageType::Topup)
        } else {
            None
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawMessage")]
pub struct Message {
    #[serde(with = "serde_fr")]
    msg_type: Fr,
    #[serde(with = "serde_fr_vec")]
    data: Vec<Fr>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    #[serde(with = "serde_fr")]
    msg_type: Fr,
    #[serde(with = "serde_fr_vec")]
    data: Vec<Fr>,
}

impl TryFrom<RawMessage> for Message {
    type Error = DomainError;

    fn try_from(raw: RawMessage) -> Result<Self> {
        Message::from_vec(raw.msg_type, raw.data)
    }
}

impl Message {
    pub fn new(msg_type: Fr, data: [Fr; MESSAGE_DATA_LENGTH]) -> Self {
        Self {
            msg_type,
            data: data.to_vec(),
        }
    }

    pub fn from_vec(msg_type: Fr, data: Vec<Fr>) -> Result<Self> {
        if data.len() != MESSAGE_DATA_LENGTH {
            return Err(DomainError::InvalidLength {
                expected: MESSAGE_DATA_LENGTH,
                got: data.len(),
            });
        }
        Ok(Self { msg_type, data })
    }

    /// Build from raw integers; anything at or above the field modulus is
    /// rejected.
    pub fn from_raw(msg_type: &BigUint, data: &[BigUint]) -> Result<Self> {
        let data = data
            .iter()
            .map(fr_from_biguint)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Self::from_vec(fr_from_biguint(msg_type)?, data)
    }

    /// type-1 message with an all-zero payload, the filler for empty slots
    pub fn blank() -> Self {
        Self::new(Fr::one(), [Fr::zero(); MESSAGE_DATA_LENGTH])
    }

    pub fn msg_type(&self) -> &Fr {
        &self.msg_type
    }

    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_fr(&self.msg_type)
    }

    pub fn data(&self) -> &[Fr] {
        &self.data
    }

    /// `[msgType, ...data]`
    pub fn as_circuit_inputs(&self) -> Vec<Fr> {
        let mut out = Vec::with_capacity(1 + MESSAGE_DATA_LENGTH);
        out.push(self.msg_type);
        out.extend_from_slice(&self.data);
        out
    }

    /// Leaf of the message tree: hash13 over the message and the
    /// ephemeral key it was encrypted with.
    pub fn hash(&self, enc_pub_key: &PubKey) -> Result<Fr> {
        let mut inputs = self.as_circuit_inputs();
        inputs.extend_from_slice(&enc_pub_key.as_circuit_inputs());
        Ok(hash13(&inputs)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use narya_crypto::field::snark_field_size;
    use narya_crypto::poseidon::hash5;
    use rand::SeedableRng;

    fn sample() -> Message {
        let data: Vec<Fr> = (1..=10u64).map(Fr::from).collect();
        Message::from_vec(Fr::one(), data).unwrap()
    }

    #[test]
    fn test_hash_layout() {
        let mut rng = rand_chacha::ChaCha20Rng::seed_from_u64(9);
        let key = crate::keypair::Keypair::random(&mut rng).pub_key;
        let m = sample();
        let d = m.data();
        let expected = hash5(&[
            Fr::one(),
            hash5(&d[0..5]).unwrap(),
            hash5(&d[5..10]).unwrap(),
            key.x(),
            key.y(),
        ])
        .unwrap();
        assert_eq!(m.hash(&key).unwrap(), expected);
    }

    #[test]
    fn test_length_checked() {
        assert_eq!(
            Message::from_vec(Fr::one(), vec![Fr::zero(); 9]),
            Err(DomainError::InvalidLength {
                expected: 10,
                got: 9
            })
        );
    }

    #[test]
    fn test_from_raw_rejects_overflow() {
        let mut data = vec![BigUint::from(0u8); 10];
        assert!(Message::from_raw(&BigUint::from(1u8), &data).is_ok());
        data[3] = snark_field_size();
        assert!(matches!(
            Message::from_raw(&BigUint::from(1u8), &data),
            Err(DomainError::Crypto(_))
        ));
    }

    #[test]
    fn test_message_type() {
        assert_eq!(sample().message_type(), Some(MessageType::Vote));
        let topup = Message::new(MessageType::Topup.as_fr(), [Fr::zero(); 10]);
        assert_eq!(topup.message_type(), Some(MessageType::Topup));
        let bogus = Message::new(Fr::from(3u64), [Fr::zero(); 10]);
        assert_eq!(bogus.message_type(), None);
    }

    #[test]
    fn test_json() {
        let m = sample();
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["msgType"], "1");
        assert_eq!(json["data"][9], "10");
        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, m);

        let short = serde_json::json!({ "msgType": "1", "data": ["1"] });
        assert!(serde_json::from_value::<Message>(short).is_err());
    }
}
