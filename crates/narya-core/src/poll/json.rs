//! poll export and import
//!
//! the export carries the published messages and the decoded commands
//! alongside every counter and salt needed to resume processing, tallying
//! or subsidy calculation where they stopped. trees and queues are not
//! exported; they are rebuilt from the leaves on import.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use narya_crypto::field::{serde_fr, serde_fr_map, serde_fr_vec, serde_u64_str, Fr};
use narya_crypto::tree::IncrementalMerkleTree;
use narya_domain::{Ballot, Command, Keypair, Message, PubKey, StateLeaf};

use super::Poll;
use crate::config::{BatchSizes, MaxValues, PollConfig, TreeDepths, STATE_TREE_ARITY};
use crate::error::{PollError, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollJson {
    pub poll_id: u64,
    pub duration: u64,
    #[serde(with = "serde_u64_str")]
    pub poll_end_timestamp: u64,
    pub tree_depths: TreeDepths,
    pub batch_sizes: BatchSizes,
    pub max_values: MaxValues,
    pub state_tree_depth: usize,

    pub messages: Vec<Message>,
    pub commands: Vec<Command>,
    pub ballots: Vec<Ballot>,
    pub enc_pub_keys: Vec<PubKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_message_batch_index: Option<usize>,
    pub state_leaves: Vec<StateLeaf>,
    #[serde(with = "serde_fr_vec")]
    pub results: Vec<Fr>,
    pub num_batches_processed: usize,

    #[serde(default)]
    pub state_copied: bool,
    #[serde(default)]
    pub num_sign_ups: usize,
    pub coordinator_pub_key: PubKey,
    #[serde(default, with = "serde_fr_map")]
    pub sb_salts: BTreeMap<usize, Fr>,

    #[serde(rename = "perVOSpentVoiceCredits", default, with = "serde_fr_vec")]
    pub per_vo_spent_voice_credits: Vec<Fr>,
    #[serde(default, with = "serde_fr")]
    pub total_spent_voice_credits: Fr,
    #[serde(default)]
    pub num_batches_tallied: usize,
    #[serde(default, with = "serde_fr_map")]
    pub result_root_salts: BTreeMap<usize, Fr>,
    #[serde(rename = "perVOSpentVoiceCreditsRootSalts", default, with = "serde_fr_map")]
    pub per_vo_spent_voice_credits_root_salts: BTreeMap<usize, Fr>,
    #[serde(default, with = "serde_fr_map")]
    pub spent_voice_credit_subtotal_salts: BTreeMap<usize, Fr>,

    #[serde(default, with = "serde_fr_vec")]
    pub subsidy: Vec<Fr>,
    #[serde(default, with = "serde_fr_map")]
    pub subsidy_salts: BTreeMap<String, Fr>,
    #[serde(default)]
    pub rbi: usize,
    #[serde(default)]
    pub cbi: usize,
}

/// an empty vector stands in for a column of zeros in older exports
fn zeros_if_empty(values: Vec<Fr>, len: usize, name: &str) -> Result<Vec<Fr>> {
    match values.len() {
        0 => Ok(vec![Fr::default(); len]),
        n if n == len => Ok(values),
        n => Err(PollError::InvalidExport(format!(
            "{name} has {n} entries, expected {len}"
        ))),
    }
}

impl Poll {
    pub fn to_json(&self) -> PollJson {
        PollJson {
            poll_id: self.poll_id,
            duration: self.config.duration,
            poll_end_timestamp: self.config.poll_end_timestamp,
            tree_depths: self.config.tree_depths,
            batch_sizes: self.config.batch_sizes,
            max_values: self.config.max_values,
            state_tree_depth: self.config.state_tree_depth,
            messages: self.messages.clone(),
            commands: self.commands.clone(),
            ballots: self.ballots.clone(),
            enc_pub_keys: self.enc_pub_keys.clone(),
            current_message_batch_index: self.current_message_batch_index,
            state_leaves: self.state_leaves.clone(),
            results: self.results.clone(),
            num_batches_processed: self.num_batches_processed,
            state_copied: self.state_copied,
            num_sign_ups: self.num_sign_ups,
            coordinator_pub_key: self.coordinator.pub_key,
            sb_salts: self.sb_salts.clone(),
            per_vo_spent_voice_credits: self.per_vo_spent.clone(),
            total_spent_voice_credits: self.total_spent,
            num_batches_tallied: self.num_batches_tallied,
            result_root_salts: self.result_root_salts.clone(),
            per_vo_spent_voice_credits_root_salts: self.per_vo_spent_salts.clone(),
            spent_voice_credit_subtotal_salts: self.spent_subtotal_salts.clone(),
            subsidy: self.subsidy.clone(),
            subsidy_salts: self.subsidy_salts.clone(),
            rbi: self.rbi,
            cbi: self.cbi,
        }
    }

    /// Rebuild a poll from its export. The coordinator keypair is not part
    /// of the export and must match the exported public key.
    pub fn from_json(json: PollJson, coordinator: Keypair) -> Result<Self> {
        if coordinator.pub_key != json.coordinator_pub_key {
            return Err(PollError::CoordinatorKeyMismatch);
        }
        let config = PollConfig {
            duration: json.duration,
            poll_end_timestamp: json.poll_end_timestamp,
            tree_depths: json.tree_depths,
            batch_sizes: json.batch_sizes,
            max_values: json.max_values,
            state_tree_depth: json.state_tree_depth,
        };
        let max_vote_options = config.max_values.max_vote_options;
        let mut poll = Poll::new(json.poll_id, config, coordinator, json.num_sign_ups)?;

        if json.messages.len() != json.enc_pub_keys.len()
            || json.messages.len() != json.commands.len()
        {
            return Err(PollError::InvalidExport(format!(
                "{} messages, {} encryption keys, {} commands",
                json.messages.len(),
                json.enc_pub_keys.len(),
                json.commands.len()
            )));
        }
        if json.messages.len() > poll.config.max_values.max_messages {
            return Err(PollError::TooManyMessages {
                max: poll.config.max_values.max_messages,
            });
        }
        for (i, (message, command)) in json.messages.iter().zip(&json.commands).enumerate() {
            if message.message_type() != Some(command.message_type()) {
                return Err(PollError::InvalidExport(format!(
                    "message {i} does not match its command type"
                )));
            }
        }
        for (message, enc_pub_key) in json.messages.iter().zip(&json.enc_pub_keys) {
            poll.insert_message_leaf(message, enc_pub_key)?;
        }
        poll.messages = json.messages;
        poll.enc_pub_keys = json.enc_pub_keys;
        poll.commands = json.commands;

        if json.state_copied {
            if json.ballots.len() != json.state_leaves.len() {
                return Err(PollError::InvalidExport(format!(
                    "{} ballots for {} state leaves",
                    json.ballots.len(),
                    json.state_leaves.len()
                )));
            }
            let state_hashes: Vec<Fr> = json.state_leaves.iter().map(StateLeaf::hash).collect();
            poll.state_tree = IncrementalMerkleTree::with_leaves(
                poll.config.state_tree_depth,
                StateLeaf::blank().hash(),
                STATE_TREE_ARITY,
                &state_hashes,
            )?;
            let ballot_hashes = json
                .ballots
                .iter()
                .map(Ballot::hash)
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let empty_hash = Ballot::new(
                max_vote_options,
                poll.config.tree_depths.vote_option_tree_depth,
            )?
            .hash()?;
            poll.ballot_tree = IncrementalMerkleTree::with_leaves(
                poll.config.state_tree_depth,
                empty_hash,
                STATE_TREE_ARITY,
                &ballot_hashes,
            )?;
            poll.state_leaves = json.state_leaves;
            poll.ballots = json.ballots;
            poll.state_copied = true;
        } else if json.num_batches_processed > 0 {
            return Err(PollError::InvalidExport(
                "batches processed without a state snapshot".into(),
            ));
        }

        poll.results = zeros_if_empty(json.results, max_vote_options, "results")?;
        poll.per_vo_spent = zeros_if_empty(
            json.per_vo_spent_voice_credits,
            max_vote_options,
            "perVOSpentVoiceCredits",
        )?;
        poll.subsidy = zeros_if_empty(json.subsidy, max_vote_options, "subsidy")?;
        poll.total_spent = json.total_spent_voice_credits;

        poll.num_batches_processed = json.num_batches_processed;
        poll.current_message_batch_index = json.current_message_batch_index;
        poll.sb_salts = json.sb_salts;
        poll.num_batches_tallied = json.num_batches_tallied;
        poll.result_root_salts = json.result_root_salts;
        poll.per_vo_spent_salts = json.per_vo_spent_voice_credits_root_salts;
        poll.spent_subtotal_salts = json.spent_voice_credit_subtotal_salts;
        poll.subsidy_salts = json.subsidy_salts;
        poll.rbi = json.rbi;
        poll.cbi = json.cbi;
        Ok(poll)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{ProcessingLock, SignupSnapshot};
    use narya_domain::PCommand;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn config() -> PollConfig {
        PollConfig::new(
            60,
            1_700_000_000,
            MaxValues {
                max_messages: 25,
                max_vote_options: 5,
            },
            TreeDepths {
                int_state_tree_depth: 1,
                message_tree_depth: 2,
                message_tree_sub_depth: 1,
                vote_option_tree_depth: 1,
            },
            5,
            3,
        )
    }

    struct Registry {
        leaves: Vec<StateLeaf>,
        tree: IncrementalMerkleTree,
        lock: ProcessingLock,
    }

    impl Registry {
        fn new(users: &[Keypair]) -> Self {
            let mut leaves = vec![StateLeaf::blank()];
            for user in users {
                leaves.push(StateLeaf::new(user.pub_key, Fr::from(50u64), Fr::from(1u64)));
            }
            let hashes: Vec<Fr> = leaves.iter().map(StateLeaf::hash).collect();
            let tree = IncrementalMerkleTree::with_leaves(3, StateLeaf::blank().hash(), 5, &hashes)
                .unwrap();
            Self {
                leaves,
                tree,
                lock: ProcessingLock::new(),
            }
        }

        fn snapshot(&mut self) -> SignupSnapshot<'_> {
            let n = self.leaves.len() - 1;
            SignupSnapshot::new(&self.leaves, &self.tree, n, &mut self.lock)
        }
    }

    fn publish_votes(rng: &mut ChaCha20Rng, poll: &mut Poll, users: &[Keypair]) {
        for (i, user) in users.iter().enumerate() {
            let ephemeral = Keypair::random(rng);
            let command =
                PCommand::with_random_salt(rng, i as u64 + 1, user.pub_key, 1, 3, 1, 0).unwrap();
            let sig = command.sign(&user.priv_key);
            let shared = Keypair::gen_ecdh_shared_key(&ephemeral.priv_key, poll.coordinator_pub_key());
            poll.publish_message(command.encrypt(&sig, &shared).unwrap(), ephemeral.pub_key)
                .unwrap();
        }
    }

    #[test]
    fn test_fresh_poll_round_trip() {
        let mut rng = ChaCha20Rng::seed_from_u64(21);
        let coordinator = Keypair::random(&mut rng);
        let users: Vec<Keypair> = (0..2).map(|_| Keypair::random(&mut rng)).collect();
        let mut poll = Poll::new(0, config(), coordinator.clone(), 0).unwrap();
        publish_votes(&mut rng, &mut poll, &users);

        let text = serde_json::to_string(&poll.to_json()).unwrap();
        let json: PollJson = serde_json::from_str(&text).unwrap();
        let back = Poll::from_json(json, coordinator).unwrap();
        assert_eq!(back, poll);
    }

    #[test]
    fn test_resume_after_import() {
        let mut rng = ChaCha20Rng::seed_from_u64(22);
        let coordinator = Keypair::random(&mut rng);
        let users: Vec<Keypair> = (0..6).map(|_| Keypair::random(&mut rng)).collect();
        let mut registry = Registry::new(&users);
        let mut poll = Poll::new(0, config(), coordinator.clone(), 0).unwrap();
        publish_votes(&mut rng, &mut poll, &users);

        // one of two message batches
        poll.process_messages(&mut registry.snapshot(), &mut rng)
            .unwrap();

        let text = serde_json::to_string(&poll.to_json()).unwrap();
        let mut restored =
            Poll::from_json(serde_json::from_str(&text).unwrap(), coordinator).unwrap();
        assert_eq!(restored, poll);

        let mut rng_a = ChaCha20Rng::seed_from_u64(99);
        let mut rng_b = ChaCha20Rng::seed_from_u64(99);
        let a = poll
            .process_messages(&mut registry.snapshot(), &mut rng_a)
            .unwrap();
        let b = restored
            .process_messages(&mut registry.snapshot(), &mut rng_b)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(poll.ballot_tree().root(), restored.ballot_tree().root());

        let ta = poll.tally_votes(&mut rng_a).unwrap();
        let tb = restored.tally_votes(&mut rng_b).unwrap();
        assert_eq!(ta, tb);
    }

    #[test]
    fn test_import_rejects_wrong_coordinator() {
        let mut rng = ChaCha20Rng::seed_from_u64(23);
        let poll = Poll::new(0, config(), Keypair::random(&mut rng), 0).unwrap();
        assert!(matches!(
            Poll::from_json(poll.to_json(), Keypair::random(&mut rng)),
            Err(PollError::CoordinatorKeyMismatch)
        ));
    }

    #[test]
    fn test_import_rejects_inconsistent_export() {
        let mut rng = ChaCha20Rng::seed_from_u64(24);
        let coordinator = Keypair::random(&mut rng);
        let users: Vec<Keypair> = (0..2).map(|_| Keypair::random(&mut rng)).collect();
        let mut poll = Poll::new(0, config(), coordinator.clone(), 0).unwrap();
        publish_votes(&mut rng, &mut poll, &users);

        let mut json = poll.to_json();
        json.enc_pub_keys.pop();
        assert!(matches!(
            Poll::from_json(json, coordinator.clone()),
            Err(PollError::InvalidExport(_))
        ));

        let mut json = poll.to_json();
        json.results.push(Fr::from(1u64));
        assert!(matches!(
            Poll::from_json(json, coordinator.clone()),
            Err(PollError::InvalidExport(_))
        ));

        let mut json = poll.to_json();
        json.commands.swap(0, 1);
        json.commands[0] = Command::Topup(narya_domain::TCommand::new(
            Fr::from(1u64),
            Fr::from(1u64),
            Fr::from(0u64),
        ));
        assert!(matches!(
            Poll::from_json(json, coordinator),
            Err(PollError::InvalidExport(_))
        ));
    }

    #[test]
    fn test_json_field_names() {
        let mut rng = ChaCha20Rng::seed_from_u64(25);
        let poll = Poll::new(4, config(), Keypair::random(&mut rng), 0).unwrap();
        let value = serde_json::to_value(poll.to_json()).unwrap();
        assert_eq!(value["pollId"], 4);
        assert_eq!(value["pollEndTimestamp"], "1700000000");
        assert_eq!(value["results"][0], "0");
        assert!(value.get("currentMessageBatchIndex").is_none());
        assert!(value.get("perVOSpentVoiceCredits").is_some());
        assert_eq!(value["numBatchesProcessed"], 0);
    }
}
