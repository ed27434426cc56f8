//! Cache types.

use serde::{Deserialize, Serialize};

/// Lifecycle of an in-progress write. Transitions only move forward:
/// `Writing` to `Committed` or `Discarded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteState {
    Writing,
    Committed,
    Discarded,
}

impl WriteState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WriteState::Writing)
    }
}

/// Progress snapshot published by a [`CacheWriter`](crate::CacheWriter).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteProgress {
    /// Bytes durably handed to the file so far.
    pub written: u64,
    pub state: WriteState,
}

impl WriteProgress {
    pub fn started() -> Self {
        Self {
            written: 0,
            state: WriteState::Writing,
        }
    }
}
