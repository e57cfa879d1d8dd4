/// Broker links: the `Transport` seam, RESP and in-process transports, and
/// the `Connection` that tracks wire subscriptions.
pub mod client;
/// Settings loading.
pub mod config;
/// Logging setup (filters, formats).
pub mod logging;
/// Subscription multiplexing: callback registry, dispatch, named
/// subscriptions, pipelines.
pub mod mux;
/// RESP2 framing and connection URIs.
pub mod network;
/// In-process broker, channel specs, messages and payloads.
pub mod pubsub;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Links to a broker.
pub use client::{
    ConnectOptions, Connection, ConnectionState, MemoryTransport, RespTransport, Transport,
};
/// Settings.
pub use crate::config::Settings;
/// Logging.
pub use logging::{init_logging, LogFormat, LoggingConfig};
/// Multiplexer API.
pub use mux::{
    handler, CallbackRegistry, Callback, ChannelContext, ChannelRequest, Delivery, Handler,
    MessageHandler, MuxSource, MuxState, Multiplexer, NamedSubscription, NamedSubscriptions,
    Pipeline, StatsSnapshot, StopHandle, SubscribeRequest, Subscribed, SubscriptionId, Targets,
};
/// Connection URIs.
pub use network::BrokerUri;
/// Pub/Sub primitives.
pub use pubsub::{Broker, ChannelSpec, DecodeMode, Message, Payload, PublishPayload};
/// Errors and result types.
pub use redmux_error::{ConnectionError, ErrorExt, MuxError, MuxResult, StatusCode};
