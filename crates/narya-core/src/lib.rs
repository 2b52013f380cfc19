//! narya-core: signup registry and poll engine
//!
//! replays what the contracts saw (signups, published messages, top-ups)
//! and produces, batch by batch, the state the coordinator proves:
//!
//! - message processing, newest batch first, updating state leaves and
//!   ballots
//! - tallying ballots into per-option results and spent credits
//! - the pairwise subsidy over all ballot pairs
//!
//! every batch returns a [`CircuitInputs`] record for the witness generator.
//!
//! ## usage
//!
//! ```rust,ignore
//! use narya_core::GlobalState;
//!
//! let mut state = GlobalState::new(10)?;
//! let index = state.sign_up(user.pub_key, balance, timestamp)?;
//! let poll_id = state.deploy_poll(duration, end, max_values, depths, 25, coordinator)?;
//!
//! state.poll_mut(poll_id)?.publish_message(message, enc_pub_key)?;
//! while state.poll(poll_id)?.has_unprocessed_messages() {
//!     let inputs = state.process_messages(poll_id, &mut rng)?;
//! }
//! let tally = state.poll_mut(poll_id)?.tally_votes(&mut rng)?;
//! ```

pub mod circuit_inputs;
pub mod config;
pub mod error;
pub mod lock;
pub mod packing;
pub mod poll;
pub mod state;

pub use circuit_inputs::{CircuitInputs, CircuitValue};
pub use config::{
    BatchSizes, MaxValues, PollConfig, TreeDepths, MESSAGE_TREE_ARITY, STATE_TREE_ARITY,
    STATE_TREE_SUBDEPTH, VOTE_OPTION_TREE_ARITY,
};
pub use error::{PollError, Result};
pub use lock::{ProcessingLock, SignupSnapshot};
pub use poll::{AcceptedCommand, CommandOutcome, Poll, PollJson, Rejection};
pub use state::{GlobalState, GlobalStateJson};
