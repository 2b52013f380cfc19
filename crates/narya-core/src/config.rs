//! poll configuration
//!
//! depths and limits are fixed when a poll is deployed and must match the
//! circuits the coordinator later proves with.

use serde::{Deserialize, Serialize};

use narya_crypto::field::serde_u64_str;

use crate::error::{PollError, Result};

pub const STATE_TREE_ARITY: usize = 5;
pub const MESSAGE_TREE_ARITY: usize = 5;
pub const VOTE_OPTION_TREE_ARITY: usize = narya_domain::ballot::VOTE_OPTION_TREE_ARITY;

/// sub depth of the signup accumulator queue
pub const STATE_TREE_SUBDEPTH: usize = 2;

/// subsidy coefficient `MM * 10^WW / (MM + dot)`
pub const SUBSIDY_MM: u64 = 50;
pub const SUBSIDY_WW: u32 = 4;

fn pow5(exp: usize) -> u128 {
    5u128.saturating_pow(exp as u32)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeDepths {
    pub int_state_tree_depth: usize,
    pub message_tree_depth: usize,
    pub message_tree_sub_depth: usize,
    pub vote_option_tree_depth: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaxValues {
    pub max_messages: usize,
    pub max_vote_options: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSizes {
    pub tally_batch_size: usize,
    pub message_batch_size: usize,
    pub subsidy_batch_size: usize,
}

impl BatchSizes {
    /// Tally and subsidy batches cover one intermediate state subtree.
    pub fn new(tree_depths: &TreeDepths, message_batch_size: usize) -> Self {
        let int_batch = usize::try_from(pow5(tree_depths.int_state_tree_depth)).unwrap_or(usize::MAX);
        Self {
            tally_batch_size: int_batch,
            message_batch_size,
            subsidy_batch_size: int_batch,
        }
    }
}

/// Everything fixed at deploy time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollConfig {
    /// seconds
    pub duration: u64,
    #[serde(with = "serde_u64_str")]
    pub poll_end_timestamp: u64,
    pub tree_depths: TreeDepths,
    pub batch_sizes: BatchSizes,
    pub max_values: MaxValues,
    pub state_tree_depth: usize,
}

impl PollConfig {
    pub fn new(
        duration: u64,
        poll_end_timestamp: u64,
        max_values: MaxValues,
        tree_depths: TreeDepths,
        message_batch_size: usize,
        state_tree_depth: usize,
    ) -> Self {
        Self {
            duration,
            poll_end_timestamp,
            tree_depths,
            batch_sizes: BatchSizes::new(&tree_depths, message_batch_size),
            max_values,
            state_tree_depth,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let depths = &self.tree_depths;
        let invalid = |msg: String| Err(PollError::InvalidConfig(msg));

        if pow5(depths.vote_option_tree_depth) < self.max_values.max_vote_options as u128 {
            return invalid(format!(
                "vote option tree of depth {} cannot hold {} options",
                depths.vote_option_tree_depth, self.max_values.max_vote_options
            ));
        }

        let batch = self.batch_sizes.message_batch_size;
        if batch == 0 || pow5(depths.message_tree_sub_depth) != batch as u128 {
            return invalid(format!(
                "message batch size {} is not 5^{}",
                batch, depths.message_tree_sub_depth
            ));
        }
        if depths.message_tree_sub_depth > depths.message_tree_depth {
            return invalid("message batch exceeds message tree capacity".into());
        }
        if pow5(depths.message_tree_depth) < self.max_values.max_messages as u128 {
            return invalid(format!(
                "message tree of depth {} cannot hold {} messages",
                depths.message_tree_depth, self.max_values.max_messages
            ));
        }
        if self.batch_sizes != BatchSizes::new(depths, batch) {
            return invalid(format!(
                "tally and subsidy batches must be 5^{}",
                depths.int_state_tree_depth
            ));
        }
        if depths.int_state_tree_depth > self.state_tree_depth {
            return invalid("intermediate state tree deeper than state tree".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depths() -> TreeDepths {
        TreeDepths {
            int_state_tree_depth: 1,
            message_tree_depth: 2,
            message_tree_sub_depth: 1,
            vote_option_tree_depth: 2,
        }
    }

    fn config() -> PollConfig {
        PollConfig::new(
            30,
            1_700_000_000,
            MaxValues {
                max_messages: 25,
                max_vote_options: 25,
            },
            depths(),
            5,
            10,
        )
    }

    #[test]
    fn test_derived_batch_sizes() {
        let b = BatchSizes::new(&depths(), 5);
        assert_eq!(b.tally_batch_size, 5);
        assert_eq!(b.subsidy_batch_size, 5);
        assert_eq!(b.message_batch_size, 5);
    }

    #[test]
    fn test_validate() {
        assert!(config().validate().is_ok());

        let mut c = config();
        c.max_values.max_vote_options = 26;
        assert!(matches!(c.validate(), Err(PollError::InvalidConfig(_))));

        let mut c = config();
        c.batch_sizes.message_batch_size = 4;
        assert!(c.validate().is_err());

        let mut c = config();
        c.max_values.max_messages = 26;
        assert!(c.validate().is_err());

        let mut c = config();
        c.batch_sizes.tally_batch_size = 0;
        assert!(c.validate().is_err());

        let mut c = config();
        c.tree_depths.int_state_tree_depth = 11;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_json_layout() {
        let json = serde_json::to_value(config()).unwrap();
        assert_eq!(json["pollEndTimestamp"], "1700000000");
        assert_eq!(json["treeDepths"]["messageTreeSubDepth"], 1);
        assert_eq!(json["batchSizes"]["tallyBatchSize"], 5);
        assert_eq!(json["maxValues"]["maxVoteOptions"], 25);
        let back: PollConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config());
    }
}
