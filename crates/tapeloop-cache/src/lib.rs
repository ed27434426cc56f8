//! Keyed on-disk blob cache for Tapeloop.
//!
//! One blob per [`ContentKey`](tapeloop_core::ContentKey), no index file.
//! Entries are written under a `.part` name and renamed into place on
//! commit, so only successfully completed fetches are ever served.

pub mod reader;
pub mod store;
pub mod types;
pub mod writer;

pub use store::{CacheStore, DEFAULT_MIN_COMPLETE_BYTES};
pub use types::{WriteProgress, WriteState};
pub use writer::CacheWriter;
