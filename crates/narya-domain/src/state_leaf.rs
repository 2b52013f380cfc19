//! state leaves: one per signup, index 0 is the blank leaf

use ark_ff::{MontFp, Zero};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use narya_crypto::babyjub::Point;
use narya_crypto::field::{gen_random_salt, serde_fr, Fr};
use narya_crypto::poseidon::hash4;

use crate::keypair::{Keypair, PubKey};

/// nothing-up-my-sleeve key owned by nobody: the blank leaf's key, the
/// encryption key of top-ups and the key of placeholder commands
pub const PAD_KEY: Point = Point {
    x: MontFp!("10457101036533406547632367118273992217979173478358440826365724437999023779287"),
    y: MontFp!("19824078218392094440610104313265183977899662750282163392862422243483260492317"),
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateLeaf {
    pub pub_key: PubKey,
    #[serde(with = "serde_fr")]
    pub voice_credit_balance: Fr,
    #[serde(with = "serde_fr")]
    pub timestamp: Fr,
}

impl StateLeaf {
    pub fn new(pub_key: PubKey, voice_credit_balance: Fr, timestamp: Fr) -> Self {
        Self {
            pub_key,
            voice_credit_balance,
            timestamp,
        }
    }

    pub fn blank() -> Self {
        Self::new(PubKey::new(PAD_KEY), Fr::zero(), Fr::zero())
    }

    /// random key, salt-sized balance, zero timestamp
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let keypair = Keypair::random(rng);
        Self::new(keypair.pub_key, gen_random_salt(rng), Fr::zero())
    }

    pub fn as_circuit_inputs(&self) -> [Fr; 4] {
        [
            self.pub_key.x(),
            self.pub_key.y(),
            self.voice_credit_balance,
            self.timestamp,
        ]
    }

    pub fn hash(&self) -> Fr {
        hash4(self.as_circuit_inputs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_pad_key_on_curve() {
        assert!(PAD_KEY.is_on_curve());
    }

    #[test]
    fn test_blank_leaf() {
        let blank = StateLeaf::blank();
        assert_eq!(blank.pub_key, PubKey::new(PAD_KEY));
        assert!(blank.voice_credit_balance.is_zero());
        assert_eq!(
            blank.hash(),
            hash4([PAD_KEY.x, PAD_KEY.y, Fr::zero(), Fr::zero()])
        );
    }

    #[test]
    fn test_hash_depends_on_balance() {
        let mut rng = rand_chacha::ChaCha20Rng::seed_from_u64(5);
        let leaf = StateLeaf::random(&mut rng);
        let mut richer = leaf.clone();
        richer.voice_credit_balance += Fr::from(1u64);
        assert_ne!(leaf.hash(), richer.hash());
    }

    #[test]
    fn test_json() {
        let leaf = StateLeaf::new(PubKey::new(PAD_KEY), Fr::from(100u64), Fr::from(7u64));
        let json = serde_json::to_value(&leaf).unwrap();
        assert_eq!(json["voiceCreditBalance"], "100");
        assert_eq!(json["timestamp"], "7");
        assert!(json["pubKey"].as_str().unwrap().starts_with("macipk."));
        let back: StateLeaf = serde_json::from_value(json).unwrap();
        assert_eq!(back, leaf);
    }
}
