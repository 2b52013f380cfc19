//! cross-poll processing lock and the signup view polls read from
//!
//! only one poll may be mid-way through message processing at a time. the
//! lock lives inside [`GlobalState`](crate::state::GlobalState) and reaches
//! a poll through a [`SignupSnapshot`] for the duration of one call.

use serde::{Deserialize, Serialize};
use tracing::debug;

use narya_crypto::tree::IncrementalMerkleTree;
use narya_domain::StateLeaf;

use crate::error::{PollError, Result};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingLock {
    holder: Option<u64>,
}

impl ProcessingLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `poll_id`. Re-acquiring by the holder is a no-op.
    pub fn acquire(&mut self, poll_id: u64) -> Result<()> {
        match self.holder {
            Some(holder) if holder != poll_id => Err(PollError::LockHeld {
                holder,
                requested: poll_id,
            }),
            Some(_) => Ok(()),
            None => {
                debug!(poll_id, "processing lock acquired");
                self.holder = Some(poll_id);
                Ok(())
            }
        }
    }

    /// Release if held by `poll_id`.
    pub fn release(&mut self, poll_id: u64) {
        if self.holder == Some(poll_id) {
            debug!(poll_id, "processing lock released");
            self.holder = None;
        }
    }

    pub fn holder(&self) -> Option<u64> {
        self.holder
    }

    pub fn is_held(&self) -> bool {
        self.holder.is_some()
    }
}

/// Borrowed view of the signup registry plus the processing lock.
pub struct SignupSnapshot<'a> {
    pub state_leaves: &'a [StateLeaf],
    pub state_tree: &'a IncrementalMerkleTree,
    pub num_sign_ups: usize,
    pub lock: &'a mut ProcessingLock,
}

impl<'a> SignupSnapshot<'a> {
    pub fn new(
        state_leaves: &'a [StateLeaf],
        state_tree: &'a IncrementalMerkleTree,
        num_sign_ups: usize,
        lock: &'a mut ProcessingLock,
    ) -> Self {
        Self {
            state_leaves,
            state_tree,
            num_sign_ups,
            lock,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release() {
        let mut lock = ProcessingLock::new();
        assert!(!lock.is_held());
        lock.acquire(3).unwrap();
        lock.acquire(3).unwrap();
        assert_eq!(lock.holder(), Some(3));

        assert!(matches!(
            lock.acquire(4),
            Err(PollError::LockHeld {
                holder: 3,
                requested: 4
            })
        ));

        // only the holder can release
        lock.release(4);
        assert_eq!(lock.holder(), Some(3));
        lock.release(3);
        assert!(!lock.is_held());
        lock.acquire(4).unwrap();
    }
}
