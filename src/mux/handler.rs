use std::{fmt, future::Future, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;

use super::SubscriptionId;
use crate::pubsub::Payload;

/// One message as handed to one callback.
#[derive(Clone)]
pub struct Delivery {
    /// The subscription this delivery is for.
    pub id: SubscriptionId,
    /// Pattern that matched, for pattern subscriptions.
    pub pattern: Option<Arc<str>>,
    /// Concrete channel the message was published to.
    pub channel: Arc<str>,
    /// Payload decoded for the subscription's mode. Shared between every
    /// callback of the same mode.
    pub payload: Arc<Payload>,
    /// The wire bytes.
    pub raw: Bytes,
}

impl fmt::Debug for Delivery {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("id", &self.id.to_string())
            .field("pattern", &self.pattern)
            .field("channel", &self.channel)
            .field("len", &self.raw.len())
            .finish()
    }
}

/// A subscriber callback.
///
/// Errors and panics are contained by the dispatcher: they are logged and
/// counted, never propagated to the link or to sibling callbacks.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(
        &self,
        delivery: Delivery,
    ) -> anyhow::Result<()>;
}

/// Shared callback. Identity (for deduplication) is pointer identity.
pub type Handler = Arc<dyn MessageHandler>;

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(
        &self,
        delivery: Delivery,
    ) -> anyhow::Result<()> {
        (self)(delivery).await
    }
}

/// Wraps an async closure into a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(f)
}

/// Pointer equality of two handlers, ignoring vtables.
pub fn same_handler(
    a: &Handler,
    b: &Handler,
) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
