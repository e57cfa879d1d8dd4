use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use redmux_error::ConnectionError;
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tracing::{debug, warn};

use super::Transport;
use crate::pubsub::{Broker, ChannelSpec, Message};

/// Transport attached to an in-process [`Broker`].
///
/// Every wire subscription becomes one forwarder task that copies messages
/// from the broker's receiver into the connection's event sink.
pub struct MemoryTransport {
    broker: Arc<Broker>,
    link: Mutex<MemoryLink>,
}

#[derive(Default)]
struct MemoryLink {
    sink: Option<broadcast::Sender<Message>>,
    forwarders: HashMap<ChannelSpec, JoinHandle<()>>,
}

impl MemoryTransport {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self {
            broker,
            link: Mutex::new(MemoryLink::default()),
        }
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    fn sink(&self) -> Result<broadcast::Sender<Message>, ConnectionError> {
        self.link
            .lock()
            .sink
            .clone()
            .ok_or(ConnectionError::NotConnected)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(
        &self,
        sink: broadcast::Sender<Message>,
    ) -> Result<(), ConnectionError> {
        self.link.lock().sink = Some(sink);
        Ok(())
    }

    async fn publish(
        &self,
        channel: &str,
        payload: Bytes,
    ) -> Result<usize, ConnectionError> {
        self.sink()?;
        Ok(self.broker.publish(channel, payload))
    }

    async fn subscribe(
        &self,
        spec: &ChannelSpec,
    ) -> Result<(), ConnectionError> {
        let sink = self.sink()?;
        let rx = match spec {
            ChannelSpec::Literal(name) => self.broker.subscribe(name),
            ChannelSpec::Pattern(glob) => self
                .broker
                .psubscribe(glob)
                .map_err(|e| ConnectionError::Server {
                    message: e.to_string(),
                })?,
        };
        let handle = tokio::spawn(forward(spec.clone(), rx, sink));
        if let Some(old) = self.link.lock().forwarders.insert(spec.clone(), handle) {
            old.abort();
        }
        Ok(())
    }

    async fn unsubscribe(
        &self,
        spec: &ChannelSpec,
    ) -> Result<(), ConnectionError> {
        let handle = {
            let mut link = self.link.lock();
            if link.sink.is_none() {
                return Err(ConnectionError::NotConnected);
            }
            link.forwarders.remove(spec)
        };
        // The broker receiver must be gone before the unsubscribe is
        // acknowledged.
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
        Ok(())
    }

    fn close(&self) {
        let mut link = self.link.lock();
        link.sink = None;
        for (_, handle) in link.forwarders.drain() {
            handle.abort();
        }
    }

    fn is_alive(&self) -> bool {
        self.link.lock().sink.is_some()
    }

    fn fresh(&self) -> Arc<dyn Transport> {
        Arc::new(MemoryTransport::new(self.broker.clone()))
    }

    fn describe(&self) -> String {
        "memory://".to_string()
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        for (_, handle) in self.link.get_mut().forwarders.drain() {
            handle.abort();
        }
    }
}

async fn forward(
    spec: ChannelSpec,
    mut rx: broadcast::Receiver<Message>,
    sink: broadcast::Sender<Message>,
) {
    loop {
        match rx.recv().await {
            Ok(msg) => {
                // No listeners yet is fine; the message is simply dropped.
                let _ = sink.send(msg);
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(%spec, skipped, "memory link lagged behind broker");
            }
            Err(RecvError::Closed) => {
                debug!(%spec, "broker closed subscription");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::{timeout, Duration};

    use super::*;

    #[tokio::test]
    async fn test_requires_open() {
        let t = MemoryTransport::new(Arc::new(Broker::default()));
        assert_eq!(
            t.publish("c", Bytes::from_static(b"x")).await,
            Err(ConnectionError::NotConnected)
        );
        assert_eq!(
            t.subscribe(&ChannelSpec::literal("c")).await,
            Err(ConnectionError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_forwards_until_unsubscribed() {
        let broker = Arc::new(Broker::default());
        let t = MemoryTransport::new(broker.clone());
        let (tx, mut rx) = broadcast::channel(16);
        t.open(tx).await.unwrap();

        let spec = ChannelSpec::pattern("room-*");
        t.subscribe(&spec).await.unwrap();
        assert_eq!(broker.publish("room-1", Bytes::from_static(b"a")), 1);

        let msg = timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("timed out")
            .unwrap();
        assert_eq!(msg.pattern.as_deref(), Some("room-*"));
        assert_eq!(&*msg.channel, "room-1");

        t.unsubscribe(&spec).await.unwrap();
        assert_eq!(broker.pattern_subscriber_count("room-*"), 0);
        broker.publish("room-1", Bytes::from_static(b"b"));
        assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_close_drops_sink() {
        let t = MemoryTransport::new(Arc::new(Broker::default()));
        let (tx, _rx) = broadcast::channel(4);
        t.open(tx).await.unwrap();
        t.close();
        assert!(t.publish("c", Bytes::new()).await.is_err());
    }
}
