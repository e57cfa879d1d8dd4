use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use redmux_error::{ConnectionError, MuxError, MuxResult};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{MemoryTransport, RespTransport, Transport};
use crate::{
    network::BrokerUri,
    pubsub::{Broker, ChannelSpec, Message, PublishPayload},
};

/// Link lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Connecting,
    Connected,
    Failed,
    Stopped,
}

impl fmt::Display for ConnectionState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            ConnectionState::Unconnected => "unconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
            ConnectionState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Connection options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Capacity of the inbound event channel. Slow dispatchers that fall
    /// further behind than this lose messages (and log the loss).
    pub event_capacity: usize,
    /// TCP connect timeout. Memory links ignore it.
    pub connect_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            event_capacity: 1024,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// One physical link to a broker.
///
/// Counts holders per wire-level subscription: a spec is subscribed at most
/// once per link no matter how many callers ask for it, and unsubscribed
/// only when the last holder releases it. Refuses to publish while any spec
/// is held (a subscribed RESP2 link accepts only (P)(UN)SUBSCRIBE, PING and
/// QUIT).
pub struct Connection {
    transport: Arc<dyn Transport>,
    options: ConnectOptions,
    state: Mutex<ConnectionState>,
    /// Spec -> number of holders.
    wire: Mutex<BTreeMap<ChannelSpec, usize>>,
    wire_count: AtomicUsize,
    /// Serializes connect and wire (un)subscribe commands.
    ops: tokio::sync::Mutex<()>,
    events: broadcast::Sender<Message>,
}

////////////////////////////////////////////////////////////////////////////////
// Own methods
////////////////////////////////////////////////////////////////////////////////

impl Connection {
    pub fn new(
        transport: Arc<dyn Transport>,
        options: ConnectOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        Self {
            transport,
            options,
            state: Mutex::new(ConnectionState::Unconnected),
            wire: Mutex::new(BTreeMap::new()),
            wire_count: AtomicUsize::new(0),
            ops: tokio::sync::Mutex::new(()),
            events,
        }
    }

    /// Unconnected link to a RESP broker at `uri`.
    pub fn from_uri(
        uri: &str,
        options: ConnectOptions,
    ) -> MuxResult<Self> {
        let uri: BrokerUri = uri.parse()?;
        let transport = RespTransport::new(uri, options.connect_timeout);
        Ok(Self::new(Arc::new(transport), options))
    }

    /// Unconnected link to an in-process broker.
    pub fn in_memory(
        broker: Arc<Broker>,
        options: ConnectOptions,
    ) -> Self {
        Self::new(Arc::new(MemoryTransport::new(broker)), options)
    }

    /// A new, unconnected link reaching the same broker with the same
    /// options.
    pub fn fresh(&self) -> Self {
        Self::new(self.transport.fresh(), self.options.clone())
    }

    /// Opens the link. No-op when already connected; reconnects from
    /// `Failed` and `Stopped`.
    pub async fn connect(&self) -> MuxResult<()> {
        let _ops = self.ops.lock().await;
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }
        self.set_state(ConnectionState::Connecting);
        self.clear_wire();

        match self.transport.open(self.events.clone()).await {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                info!("Link to {} established", self.transport.describe());
                Ok(())
            }
            Err(e) => {
                self.set_state(ConnectionState::Failed);
                warn!("Link to {} failed: {e}", self.transport.describe());
                Err(e.into())
            }
        }
    }

    /// Publishes the payload to every channel in turn and returns the total
    /// number of receivers reached.
    pub async fn publish<S: AsRef<str>>(
        &self,
        channels: &[S],
        payload: &PublishPayload,
    ) -> MuxResult<usize> {
        if channels.is_empty() {
            return Err(MuxError::invalid("publish needs at least one channel"));
        }
        self.ensure_connected()?;
        let active = self.wire_count();
        if active > 0 {
            return Err(MuxError::SubscribeModeConflict { active });
        }

        let bytes = payload.encode()?;
        let mut reached = 0;
        for channel in channels {
            let channel = channel.as_ref();
            reached += self
                .track(self.transport.publish(channel, bytes.clone()).await)?;
        }
        Ok(reached)
    }

    /// Takes one hold on the spec, subscribing it on the wire when it is the
    /// first. Returns whether a wire command was issued.
    pub async fn subscribe(
        &self,
        spec: &ChannelSpec,
    ) -> MuxResult<bool> {
        let _ops = self.ops.lock().await;
        self.ensure_connected()?;
        if let Some(holders) = self.wire.lock().get_mut(spec) {
            *holders += 1;
            debug!(%spec, holders = *holders, "already subscribed on the wire");
            return Ok(false);
        }
        self.track(self.transport.subscribe(spec).await)?;
        // A disconnect may have raced the acknowledgement.
        self.ensure_connected()?;
        self.insert_wire(spec);
        Ok(true)
    }

    /// Releases one hold on the spec. The wire command goes out when the
    /// last hold is released, and also for specs nobody holds so the broker
    /// converges. Returns whether a wire command was issued.
    pub async fn unsubscribe(
        &self,
        spec: &ChannelSpec,
    ) -> MuxResult<bool> {
        let _ops = self.ops.lock().await;
        self.ensure_connected()?;
        if self.release_hold(spec) {
            debug!(%spec, "still held on the wire");
            return Ok(false);
        }
        self.track(self.transport.unsubscribe(spec).await)?;
        self.remove_wire(spec);
        Ok(true)
    }

    /// Unsubscribes the spec on the wire only when nobody holds it. Returns
    /// whether a wire command was issued.
    pub async fn unsubscribe_unheld(
        &self,
        spec: &ChannelSpec,
    ) -> MuxResult<bool> {
        let _ops = self.ops.lock().await;
        self.ensure_connected()?;
        if self.holders(spec) > 0 {
            return Ok(false);
        }
        self.track(self.transport.unsubscribe(spec).await)?;
        Ok(true)
    }

    /// Drops the link without waiting for in-flight commands. Idempotent.
    pub fn disconnect(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), ConnectionState::Stopped);
        if previous != ConnectionState::Stopped {
            self.transport.close();
            info!("Link to {} closed", self.transport.describe());
        }
        self.clear_wire();
    }

    /// A new receiver of inbound messages. Only messages sent after this call
    /// are seen.
    pub fn events(&self) -> broadcast::Receiver<Message> {
        self.events.subscribe()
    }

    /// Current state. A connected link whose transport has died reports
    /// `Failed` (and stays there until the next `connect`).
    pub fn state(&self) -> ConnectionState {
        let mut state = self.state.lock();
        if *state == ConnectionState::Connected && !self.transport.is_alive() {
            *state = ConnectionState::Failed;
            warn!("Link to {} lost", self.transport.describe());
        }
        *state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Number of specs currently subscribed on the wire.
    pub fn wire_count(&self) -> usize {
        self.wire_count.load(Ordering::Acquire)
    }

    /// Snapshot of the wire-level subscriptions.
    pub fn wire_subscriptions(&self) -> Vec<ChannelSpec> {
        self.wire.lock().keys().cloned().collect()
    }

    /// Number of holds on the spec; zero when it is not subscribed.
    pub fn holders(
        &self,
        spec: &ChannelSpec,
    ) -> usize {
        self.wire.lock().get(spec).copied().unwrap_or(0)
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// Target description with the password redacted.
    pub fn describe(&self) -> String {
        self.transport.describe()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Internal helpers
////////////////////////////////////////////////////////////////////////////////

impl Connection {
    fn set_state(
        &self,
        state: ConnectionState,
    ) {
        *self.state.lock() = state;
    }

    fn ensure_connected(&self) -> Result<(), ConnectionError> {
        match self.state() {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Stopped => Err(ConnectionError::Stopped),
            _ => Err(ConnectionError::NotConnected),
        }
    }

    /// Moves the link to `Failed` on transport errors and lifts the error.
    fn track<T>(
        &self,
        result: Result<T, ConnectionError>,
    ) -> MuxResult<T> {
        result.map_err(|e| {
            if !matches!(e, ConnectionError::Server { .. }) {
                let mut state = self.state.lock();
                if *state == ConnectionState::Connected {
                    *state = ConnectionState::Failed;
                    warn!("Link to {} marked failed: {e}", self.transport.describe());
                }
            }
            MuxError::from(e)
        })
    }

    fn insert_wire(
        &self,
        spec: &ChannelSpec,
    ) {
        let mut wire = self.wire.lock();
        *wire.entry(spec.clone()).or_insert(0) += 1;
        self.wire_count.store(wire.len(), Ordering::Release);
    }

    /// Drops one hold unless it is the last. Returns `true` when holders
    /// remain afterwards.
    fn release_hold(
        &self,
        spec: &ChannelSpec,
    ) -> bool {
        match self.wire.lock().get_mut(spec) {
            Some(holders) if *holders > 1 => {
                *holders -= 1;
                true
            }
            _ => false,
        }
    }

    fn remove_wire(
        &self,
        spec: &ChannelSpec,
    ) {
        let mut wire = self.wire.lock();
        wire.remove(spec);
        self.wire_count.store(wire.len(), Ordering::Release);
    }

    fn clear_wire(&self) {
        let mut wire = self.wire.lock();
        wire.clear();
        self.wire_count.store(0, Ordering::Release);
    }
}

impl fmt::Debug for Connection {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Connection")
            .field("target", &self.transport.describe())
            .field("state", &self.state())
            .field("wire_count", &self.wire_count())
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if *self.state.get_mut() != ConnectionState::Stopped {
            self.transport.close();
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
