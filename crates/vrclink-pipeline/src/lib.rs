//! Real-time friend presence over the VRChat pipeline.
//!
//! The pipeline is a WebSocket feed of friend and notification events. This
//! crate keeps a local friend roster in sync with it and hands every change to
//! an [`EventHandler`].
//!
//! ## Features
//!
//! - **Decoder**: the doubly-encoded `{type, content}` frame envelope
//! - **Cache**: friend roster partitioned into online, active and offline
//! - **Router**: applies events to the roster and builds callback arguments
//! - **Supervisor**: connection lifecycle with fixed-delay reconnect
//! - **Presence**: the session object tying the pieces together

pub mod cache;
pub mod decoder;
mod error;
pub mod handler;
pub mod presence;
pub mod router;
pub mod supervisor;

#[cfg(test)]
mod testing;

pub use cache::{BucketCounts, PresenceCache};
pub use decoder::{DecodedEvent, decode, encode};
pub use error::PipelineError;
pub use handler::{EventHandler, NoopHandler};
pub use presence::PresenceClient;
pub use router::{EventRouter, PresenceEvent};
pub use supervisor::{
    ConnectionState, ConnectionSupervisor, DEFAULT_PIPELINE_URL, SupervisorConfig,
};
