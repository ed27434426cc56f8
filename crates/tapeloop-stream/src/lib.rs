//! Streaming core for Tapeloop.
//!
//! A live fetch is fanned out by a [`TeePipeline`] to two sinks, each with
//! its own bounded [`buffer`]: the HTTP response (must keep up) and the cache
//! writer (best effort). The [`StreamRouter`] decides per request whether to
//! serve from cache, join an in-flight session, or start a new one.

pub mod buffer;
pub mod range;
pub mod router;
pub mod session;
pub mod tee;

pub use buffer::{PushError, SinkReader, SinkWriter, StreamEnd, sink_buffer};
pub use range::{Negotiation, RangeSpec, ResourceLength, negotiate};
pub use router::{Delivery, DeliverySource, StreamRouter};
pub use session::{AttachGuard, Attachments, Claim, LiveSession, SessionRegistry};
pub use tee::{
    AbandonPolicy, AbortReason, SessionStatus, SinkPolicy, SinkState, TeeConfig, TeePipeline,
    TeeReport,
};
