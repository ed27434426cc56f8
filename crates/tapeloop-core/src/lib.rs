//! Tapeloop Core
//!
//! Core domain types, traits, and error handling for Tapeloop.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used across the cache, fetch, stream and API crates.

pub mod error;
pub mod key;
pub mod ports;
pub mod source;

pub use error::{Error, Result};
pub use key::ContentKey;
pub use ports::{ByteStream, CacheSink, MediaFetcher};
pub use source::{AudioFormat, FormatHint, Quality, SourceRequest, TrackInfo};
