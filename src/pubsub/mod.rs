//! In-process Publish–Subscribe broker.
//!
//! - `broker`: channel and glob-pattern registration, fan-out delivery.
//! - `channel`: the literal/pattern subscription target.
//! - `message`: the inbound message every transport produces.
//! - `payload`: decode modes and the inbound/outbound payload forms.
//!
//! The broker plays the role of the remote server for
//! [`MemoryTransport`](crate::client::MemoryTransport): tests and
//! single-process deployments run the full multiplexer against it without a
//! network.

pub mod broker;
pub mod channel;
pub mod message;
pub mod payload;

pub use broker::*;
pub use channel::*;
pub use message::*;
pub use payload::*;
