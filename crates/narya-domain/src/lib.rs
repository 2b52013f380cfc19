//! narya-domain: the values voters and coordinators exchange
//!
//! keys, signed and encrypted commands, the messages that carry them, and
//! the state leaves and ballots a poll keeps per voter. everything hashes
//! to the same leaves the contracts and circuits expect.

pub mod ballot;
pub mod command;
pub mod error;
pub mod keypair;
pub mod message;
pub mod state_leaf;

pub use ballot::Ballot;
pub use command::{Command, PCommand, TCommand};
pub use error::{DomainError, Result};
pub use keypair::{Keypair, PrivKey, PubKey};
pub use message::{Message, MessageType, MESSAGE_DATA_LENGTH};
pub use state_leaf::{StateLeaf, PAD_KEY};
