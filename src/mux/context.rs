use std::{fmt, sync::Arc, sync::Weak};

use async_trait::async_trait;
use bytes::Bytes;
use redmux_error::MuxResult;
use serde_json::Value;
use tracing::debug;

use super::{
    named::{NamedInner, NamedSubscriptions},
    Delivery, MessageHandler,
};
use crate::pubsub::{DecodeMode, Payload};

/// Everything a pipeline run gets to see about the message that
/// triggered it.
#[derive(Debug, Clone)]
pub struct ChannelContext {
    /// Pattern that matched, for pattern subscriptions.
    pub pattern: Option<String>,
    pub channel_name: String,
    /// Payload exactly as received.
    pub channel_msg: Bytes,
    /// JSON if the payload parses as JSON, otherwise the text as a string.
    pub channel_data: Value,
    /// Stops the subscription that started this run.
    pub stop: StopHandle,
}

/// A unit of work run once per received message.
#[async_trait]
pub trait Pipeline: Send + Sync + 'static {
    async fn run(
        &self,
        ctx: ChannelContext,
    ) -> anyhow::Result<()>;
}

/// Lets a running pipeline tear down the subscription that feeds it.
#[derive(Clone)]
pub struct StopHandle {
    target: StopTarget,
}

#[derive(Clone)]
enum StopTarget {
    Named {
        registry: Weak<NamedInner>,
        name: Arc<str>,
    },
    Detached,
}

impl StopHandle {
    pub(crate) fn named(
        registry: &NamedSubscriptions,
        name: &str,
    ) -> Self {
        Self {
            target: StopTarget::Named {
                registry: registry.downgrade(),
                name: Arc::from(name),
            },
        }
    }

    /// A handle whose `stop` does nothing.
    pub fn detached() -> Self {
        Self {
            target: StopTarget::Detached,
        }
    }

    /// Fully stops the subscription. Returns `false` when it was already
    /// gone.
    pub async fn stop(&self) -> MuxResult<bool> {
        match &self.target {
            StopTarget::Named { registry, name } => match registry.upgrade() {
                Some(inner) => {
                    debug!(name = %name, "stop requested by pipeline");
                    NamedSubscriptions::from_inner(inner).stop(name, false).await
                }
                None => Ok(false),
            },
            StopTarget::Detached => Ok(false),
        }
    }
}

impl fmt::Debug for StopHandle {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match &self.target {
            StopTarget::Named { name, .. } => write!(f, "StopHandle({name})"),
            StopTarget::Detached => f.write_str("StopHandle(detached)"),
        }
    }
}

/// Adapts a [`Pipeline`] to the callback interface.
pub struct PipelineHandler {
    pipeline: Arc<dyn Pipeline>,
    stop: StopHandle,
}

impl PipelineHandler {
    pub fn new(
        pipeline: Arc<dyn Pipeline>,
        stop: StopHandle,
    ) -> Self {
        Self { pipeline, stop }
    }
}

#[async_trait]
impl MessageHandler for PipelineHandler {
    async fn handle(
        &self,
        delivery: Delivery,
    ) -> anyhow::Result<()> {
        let channel_data = match &*delivery.payload {
            Payload::Binary(raw) => Payload::decode(DecodeMode::Text, raw).to_value(),
            decoded => decoded.to_value(),
        };
        let ctx = ChannelContext {
            pattern: delivery.pattern.as_deref().map(str::to_string),
            channel_name: delivery.channel.to_string(),
            channel_msg: delivery.raw,
            channel_data,
            stop: self.stop.clone(),
        };
        self.pipeline.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::{mux::SubscriptionId, pubsub::ChannelSpec};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<ChannelContext>>,
    }

    #[async_trait]
    impl Pipeline for Recorder {
        async fn run(
            &self,
            ctx: ChannelContext,
        ) -> anyhow::Result<()> {
            self.seen.lock().push(ctx);
            Ok(())
        }
    }

    fn delivery(
        mode: DecodeMode,
        raw: &'static [u8],
    ) -> Delivery {
        let raw = Bytes::from_static(raw);
        Delivery {
            id: SubscriptionId::new(mode, ChannelSpec::pattern("room-*"), 1, 0),
            pattern: Some(Arc::from("room-*")),
            channel: Arc::from("room-1"),
            payload: Arc::new(Payload::decode(mode, &raw)),
            raw,
        }
    }

    #[tokio::test]
    async fn test_context_fields() {
        let rec = Arc::new(Recorder::default());
        let h = PipelineHandler::new(rec.clone(), StopHandle::detached());
        h.handle(delivery(DecodeMode::Text, br#"{"n":1}"#))
            .await
            .unwrap();

        let seen = rec.seen.lock();
        let ctx = &seen[0];
        assert_eq!(ctx.pattern.as_deref(), Some("room-*"));
        assert_eq!(ctx.channel_name, "room-1");
        assert_eq!(ctx.channel_msg, Bytes::from_static(br#"{"n":1}"#));
        assert_eq!(ctx.channel_data, json!({"n": 1}));
    }

    /// Binary subscriptions still get a parsed view in `channel_data`.
    #[tokio::test]
    async fn test_binary_delivery_is_parsed_best_effort() {
        let rec = Arc::new(Recorder::default());
        let h = PipelineHandler::new(rec.clone(), StopHandle::detached());
        h.handle(delivery(DecodeMode::Binary, b"[1,2]")).await.unwrap();
        h.handle(delivery(DecodeMode::Binary, b"plain")).await.unwrap();

        let seen = rec.seen.lock();
        assert_eq!(seen[0].channel_data, json!([1, 2]));
        assert_eq!(seen[1].channel_data, json!("plain"));
    }

    #[tokio::test]
    async fn test_detached_stop_is_noop() {
        assert!(!StopHandle::detached().stop().await.unwrap());
    }
}
