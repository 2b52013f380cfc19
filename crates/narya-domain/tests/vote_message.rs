//! a vote travels from voter to coordinator and back out as a tree leaf

use ark_ff::Zero;
use narya_crypto::Fr;
use narya_domain::{Command, Keypair, Message, MessageType, PCommand, PubKey, TCommand, PAD_KEY};
use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

#[test]
fn test_voter_to_coordinator() {
    let mut rng = ChaCha20Rng::seed_from_u64(2024);
    let coordinator = Keypair::random(&mut rng);
    let voter = Keypair::random(&mut rng);
    let ephemeral = Keypair::random(&mut rng);

    let command = PCommand::with_random_salt(&mut rng, 1, voter.pub_key, 0, 9, 1, 0).unwrap();
    let signature = command.sign(&voter.priv_key);
    let shared = Keypair::gen_ecdh_shared_key(&ephemeral.priv_key, &coordinator.pub_key);
    let message = command.encrypt(&signature, &shared).unwrap();

    // what lands on chain and in the message tree
    let leaf = message.hash(&ephemeral.pub_key).unwrap();
    assert_ne!(leaf, Fr::zero());

    let json = serde_json::to_string(&message).unwrap();
    let relayed: Message = serde_json::from_str(&json).unwrap();
    assert_eq!(relayed.hash(&ephemeral.pub_key).unwrap(), leaf);

    let coord_shared = Keypair::gen_ecdh_shared_key(&coordinator.priv_key, &ephemeral.pub_key);
    let (decrypted, sig) = PCommand::decrypt(&relayed, &coord_shared).unwrap();
    assert_eq!(decrypted, command);
    assert!(decrypted.verify_signature(&sig, &voter.pub_key));
}

#[test]
fn test_key_change_signed_by_old_key() {
    let mut rng = ChaCha20Rng::seed_from_u64(7);
    let old = Keypair::random(&mut rng);
    let new = Keypair::random(&mut rng);

    let command = PCommand::with_random_salt(&mut rng, 3, new.pub_key, 0, 0, 1, 0).unwrap();
    let sig = command.sign(&old.priv_key);
    assert!(command.verify_signature(&sig, &old.pub_key));
    assert!(!command.verify_signature(&sig, &new.pub_key));
}

#[test]
fn test_topup_is_plaintext() {
    let topup = TCommand::new(Fr::from(4u64), Fr::from(25u64), Fr::zero());
    let message = topup.to_message();
    assert_eq!(message.message_type(), Some(MessageType::Topup));
    assert_eq!(message.data()[1], Fr::from(25u64));
    assert!(message.hash(&PubKey::new(PAD_KEY)).is_ok());

    let command = Command::Topup(topup);
    assert_eq!(command.message_type(), MessageType::Topup);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn prop_command_fields_survive_encryption(
        state_index in 0u64..(1 << 50),
        vote_option in 0u64..(1 << 50),
        weight in 0u64..(1 << 50),
        nonce in 0u64..(1 << 50),
        seed in any::<u64>(),
    ) {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let voter = Keypair::random(&mut rng);
        let shared = Keypair::gen_ecdh_shared_key(&voter.priv_key, &PubKey::new(PAD_KEY));
        let command =
            PCommand::with_random_salt(&mut rng, state_index, voter.pub_key, vote_option, weight, nonce, 0)
                .unwrap();
        let message = command.encrypt(&command.sign(&voter.priv_key), &shared).unwrap();
        let (decrypted, _) = PCommand::decrypt(&message, &shared).unwrap();
        prop_assert_eq!(decrypted, command);
    }
}
