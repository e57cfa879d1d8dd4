//! Subscription multiplexing.
//!
//! - `registry`: subscription ids and the id/channel maps.
//! - `handler`: the callback trait and the per-callback delivery.
//! - `dispatch`: the task that fans inbound messages out to callbacks.
//! - `multiplexer`: the public subscribe/unsubscribe/publish/stop surface.
//! - `named`: the name → subscription registry.
//! - `context`: pipelines and the context they run with.
//! - `targets`: single-or-list channel input.

pub mod context;
pub mod dispatch;
pub mod handler;
pub mod multiplexer;
pub mod named;
pub mod registry;
pub mod targets;

pub use context::{ChannelContext, Pipeline, PipelineHandler, StopHandle};
pub use dispatch::{DispatchStats, StatsSnapshot};
pub use handler::*;
pub use multiplexer::*;
pub use named::{Callback, MuxSource, NamedSubscription, NamedSubscriptions, SubscribeRequest};
pub use registry::*;
pub use targets::*;
