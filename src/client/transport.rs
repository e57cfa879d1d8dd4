use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use redmux_error::ConnectionError;
use tokio::sync::broadcast;

use crate::pubsub::{ChannelSpec, Message};

/// The physical side of a [`Connection`](super::Connection).
///
/// A transport knows how to reach one broker and how to move commands and
/// inbound messages over that link. Bookkeeping (state, the set of active
/// wire subscriptions, mode conflicts) belongs to `Connection`; transports
/// stay dumb.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Opens the link. Inbound messages must be pushed into `sink` for as
    /// long as the link lives.
    async fn open(
        &self,
        sink: broadcast::Sender<Message>,
    ) -> Result<(), ConnectionError>;

    /// Publishes one payload, returning the number of receivers reached.
    async fn publish(
        &self,
        channel: &str,
        payload: Bytes,
    ) -> Result<usize, ConnectionError>;

    /// Issues SUBSCRIBE or PSUBSCRIBE for a single spec and waits for the
    /// acknowledgement.
    async fn subscribe(
        &self,
        spec: &ChannelSpec,
    ) -> Result<(), ConnectionError>;

    /// Issues UNSUBSCRIBE or PUNSUBSCRIBE for a single spec.
    async fn unsubscribe(
        &self,
        spec: &ChannelSpec,
    ) -> Result<(), ConnectionError>;

    /// Tears the link down without waiting for in-flight commands.
    fn close(&self);

    /// Whether the link opened last is still up. Transports that cannot
    /// lose their link keep the default.
    fn is_alive(&self) -> bool {
        true
    }

    /// A fresh, unopened transport reaching the same broker.
    fn fresh(&self) -> Arc<dyn Transport>;

    /// Human-readable target, safe to log.
    fn describe(&self) -> String;
}
