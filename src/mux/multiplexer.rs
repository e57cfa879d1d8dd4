use std::{collections::BTreeSet, fmt, sync::Arc};

use parking_lot::Mutex;
use redmux_error::{ConnectionError, MuxError, MuxResult};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

use super::{
    dispatch::spawn_dispatcher, CallbackRegistry, DispatchStats, Handler, StatsSnapshot,
    SubscriptionId, Targets,
};
use crate::{
    client::{ConnectOptions, Connection},
    pubsub::{Broker, ChannelSpec, DecodeMode, PublishPayload},
};

/// Observable multiplexer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxState {
    /// Running, no callbacks registered.
    Idle,
    /// Opening the connection.
    Connecting,
    /// Running with at least one callback registered.
    Active,
    /// `stop()` in progress.
    Draining,
    Stopped,
}

/// Ids handed back by a subscribe call, shaped like its input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subscribed {
    One(SubscriptionId),
    Many(Vec<SubscriptionId>),
    /// No handler was given; only wire interest was established.
    WireOnly,
}

impl Subscribed {
    pub fn ids(&self) -> &[SubscriptionId] {
        match self {
            Subscribed::One(id) => std::slice::from_ref(id),
            Subscribed::Many(ids) => ids,
            Subscribed::WireOnly => &[],
        }
    }

    pub fn into_ids(self) -> Vec<SubscriptionId> {
        match self {
            Subscribed::One(id) => vec![id],
            Subscribed::Many(ids) => ids,
            Subscribed::WireOnly => Vec::new(),
        }
    }

    /// The id of a single-channel subscribe.
    pub fn one(&self) -> Option<&SubscriptionId> {
        match self {
            Subscribed::One(id) => Some(id),
            _ => None,
        }
    }
}

/// One entry of a batch subscribe.
#[derive(Clone)]
pub struct ChannelRequest {
    pub channels: Targets,
    pub mode: DecodeMode,
    pub handler: Option<Handler>,
}

impl ChannelRequest {
    pub fn new(
        channels: impl Into<Targets>,
        mode: DecodeMode,
        handler: Handler,
    ) -> Self {
        Self {
            channels: channels.into(),
            mode,
            handler: Some(handler),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Connecting,
    Running,
    Draining,
    Stopped,
}

struct MuxInner {
    conn: Arc<Connection>,
    owned: bool,
    registry: Arc<CallbackRegistry>,
    stats: Arc<DispatchStats>,
    /// Specs this instance holds on the connection, one hold each.
    held: Mutex<BTreeSet<ChannelSpec>>,
    phase: Mutex<Phase>,
    /// Serializes subscribe, unsubscribe and stop.
    ops: tokio::sync::Mutex<()>,
    stop_tx: watch::Sender<bool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

/// Many logical subscriptions over one connection.
///
/// Every instance has its own callback registry and dispatch task. The
/// connection is either owned (created by the constructor, closed by
/// [`stop`](Self::stop)) or borrowed (supplied by the caller and left open).
///
/// The handle is cheap to clone; clones share the same instance.
#[derive(Clone)]
pub struct Multiplexer {
    inner: Arc<MuxInner>,
}

////////////////////////////////////////////////////////////////////////////////
// Construction
////////////////////////////////////////////////////////////////////////////////

impl Multiplexer {
    /// Connects to the RESP broker at `uri` over a private connection.
    pub async fn connect(
        uri: &str,
        options: ConnectOptions,
    ) -> MuxResult<Self> {
        let conn = Connection::from_uri(uri, options)?;
        Self::start(Arc::new(conn), true).await
    }

    /// Attaches to an in-process broker over a private connection.
    pub async fn in_memory(
        broker: Arc<Broker>,
        options: ConnectOptions,
    ) -> MuxResult<Self> {
        Self::start(Arc::new(Connection::in_memory(broker, options)), true).await
    }

    /// Runs on a caller-supplied connection. [`stop`](Self::stop) never
    /// disconnects it.
    pub async fn with_connection(conn: Arc<Connection>) -> MuxResult<Self> {
        Self::start(conn, false).await
    }

    /// A new instance with its own private connection to the same broker.
    pub async fn new_sibling(&self) -> MuxResult<Self> {
        Self::start(Arc::new(self.inner.conn.fresh()), true).await
    }

    async fn start(
        conn: Arc<Connection>,
        owned: bool,
    ) -> MuxResult<Self> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let events = conn.events();
        let inner = Arc::new(MuxInner {
            conn,
            owned,
            registry: Arc::new(CallbackRegistry::new()),
            stats: Arc::new(DispatchStats::default()),
            held: Mutex::new(BTreeSet::new()),
            phase: Mutex::new(Phase::Connecting),
            ops: tokio::sync::Mutex::new(()),
            stop_tx,
            dispatcher: Mutex::new(None),
        });

        inner.conn.connect().await?;
        let handle = spawn_dispatcher(
            inner.registry.clone(),
            inner.stats.clone(),
            events,
            stop_rx,
        );
        *inner.dispatcher.lock() = Some(handle);
        *inner.phase.lock() = Phase::Running;
        info!(
            broker = %inner.conn.describe(),
            owned,
            "multiplexer started"
        );
        Ok(Self { inner })
    }
}

////////////////////////////////////////////////////////////////////////////////
// Subscribe / unsubscribe
////////////////////////////////////////////////////////////////////////////////

impl Multiplexer {
    /// Subscribes to channels. Entries containing `*` are treated as
    /// patterns, everything else as literal channel names; use
    /// [`psubscribe`](Self::psubscribe) for globs built from `?` or `[`.
    ///
    /// With `handler = None` only wire interest is established.
    pub async fn subscribe(
        &self,
        channels: impl Into<Targets>,
        mode: DecodeMode,
        handler: Option<Handler>,
    ) -> MuxResult<Subscribed> {
        let targets: Targets = channels.into();
        let single = targets.is_single();
        let specs = targets.as_slice().iter().map(|c| ChannelSpec::parse(c)).collect();
        self.subscribe_inner(specs, single, mode, handler).await
    }

    /// Subscribes to glob patterns.
    pub async fn psubscribe(
        &self,
        patterns: impl Into<Targets>,
        mode: DecodeMode,
        handler: Option<Handler>,
    ) -> MuxResult<Subscribed> {
        let targets: Targets = patterns.into();
        let single = targets.is_single();
        let specs = targets
            .into_vec()
            .into_iter()
            .map(ChannelSpec::pattern)
            .collect();
        self.subscribe_inner(specs, single, mode, handler).await
    }

    /// Subscribes to already tagged specs.
    pub async fn subscribe_specs(
        &self,
        specs: Vec<ChannelSpec>,
        mode: DecodeMode,
        handler: Option<Handler>,
    ) -> MuxResult<Subscribed> {
        self.subscribe_inner(specs, false, mode, handler).await
    }

    /// Subscribes several independent requests, each with its own mode and
    /// handler. Stops at the first failure.
    pub async fn subscribe_many(
        &self,
        requests: Vec<ChannelRequest>,
    ) -> MuxResult<Vec<Subscribed>> {
        let mut out = Vec::with_capacity(requests.len());
        for req in requests {
            out.push(self.subscribe(req.channels, req.mode, req.handler).await?);
        }
        Ok(out)
    }

    /// Pattern counterpart of [`subscribe_many`](Self::subscribe_many).
    pub async fn psubscribe_many(
        &self,
        requests: Vec<ChannelRequest>,
    ) -> MuxResult<Vec<Subscribed>> {
        let mut out = Vec::with_capacity(requests.len());
        for req in requests {
            out.push(self.psubscribe(req.channels, req.mode, req.handler).await?);
        }
        Ok(out)
    }

    async fn subscribe_inner(
        &self,
        specs: Vec<ChannelSpec>,
        single: bool,
        mode: DecodeMode,
        handler: Option<Handler>,
    ) -> MuxResult<Subscribed> {
        validate(&specs)?;
        let _ops = self.inner.ops.lock().await;
        self.ensure_running()?;

        // Callbacks go in first so nothing published right after the wire
        // acknowledgement is missed.
        let nonce: u32 = rand::random();
        let ids: Vec<SubscriptionId> = match &handler {
            Some(h) => specs
                .iter()
                .map(|spec| self.inner.registry.add(mode, spec.clone(), h.clone(), nonce))
                .collect(),
            None => Vec::new(),
        };

        let mut seen = BTreeSet::new();
        for spec in &specs {
            if !seen.insert(spec.clone()) || self.inner.held.lock().contains(spec) {
                continue;
            }
            match self.inner.conn.subscribe(spec).await {
                Ok(issued) => {
                    debug!(%spec, issued, "subscribed");
                    self.inner.held.lock().insert(spec.clone());
                }
                Err(e) => {
                    for id in &ids {
                        self.inner.registry.remove_by_id(id);
                    }
                    warn!(%spec, "subscribe failed: {e}");
                    return Err(e);
                }
            }
        }

        Ok(match (handler.is_some(), single) {
            (false, _) => Subscribed::WireOnly,
            (true, true) => ids
                .into_iter()
                .next()
                .map(Subscribed::One)
                .unwrap_or(Subscribed::WireOnly),
            (true, false) => Subscribed::Many(ids),
        })
    }

    /// Unsubscribes channels on the wire (classified like
    /// [`subscribe`](Self::subscribe)). With `remove_callbacks` every
    /// callback of those channels is dropped too. Returns the number of
    /// callbacks removed.
    pub async fn unsubscribe(
        &self,
        channels: impl Into<Targets>,
        remove_callbacks: bool,
    ) -> MuxResult<usize> {
        let targets: Targets = channels.into();
        let specs = targets
            .as_slice()
            .iter()
            .map(|c| ChannelSpec::parse(c))
            .collect();
        self.unsubscribe_specs(specs, remove_callbacks).await
    }

    /// Pattern counterpart of [`unsubscribe`](Self::unsubscribe).
    pub async fn punsubscribe(
        &self,
        patterns: impl Into<Targets>,
        remove_callbacks: bool,
    ) -> MuxResult<usize> {
        let targets: Targets = patterns.into();
        let specs = targets
            .into_vec()
            .into_iter()
            .map(ChannelSpec::pattern)
            .collect();
        self.unsubscribe_specs(specs, remove_callbacks).await
    }

    pub async fn unsubscribe_specs(
        &self,
        specs: Vec<ChannelSpec>,
        remove_callbacks: bool,
    ) -> MuxResult<usize> {
        validate(&specs)?;
        let _ops = self.inner.ops.lock().await;
        self.ensure_running()?;

        let mut removed = 0;
        let distinct: BTreeSet<ChannelSpec> = specs.into_iter().collect();
        for spec in &distinct {
            self.release(spec).await?;
            if remove_callbacks {
                removed += self.inner.registry.remove_channel(spec);
            }
            debug!(%spec, remove_callbacks, "unsubscribed");
        }
        Ok(removed)
    }

    /// Removes exactly these callbacks; wire subscriptions are untouched so
    /// siblings keep receiving. Unknown ids are ignored.
    pub fn remove_callback(
        &self,
        ids: &[SubscriptionId],
    ) -> usize {
        ids.iter()
            .filter(|id| self.inner.registry.remove_by_id(id))
            .count()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Publish / stop / accessors
////////////////////////////////////////////////////////////////////////////////

impl Multiplexer {
    /// Publishes to every channel and returns the receivers reached.
    ///
    /// Fails with `SubscribeModeConflict` while this instance has any
    /// callback registered; publish from a sibling instance instead.
    pub async fn publish(
        &self,
        channels: impl Into<Targets>,
        payload: impl Into<PublishPayload>,
    ) -> MuxResult<usize> {
        self.ensure_running()?;
        if !self.inner.registry.is_empty() {
            return Err(MuxError::SubscribeModeConflict {
                active: self.inner.registry.len(),
            });
        }
        let targets: Targets = channels.into();
        if targets.is_empty() {
            return Err(MuxError::invalid("publish needs at least one channel"));
        }
        self.inner
            .conn
            .publish(targets.as_slice(), &payload.into())
            .await
    }

    /// Unsubscribes everything this instance holds, clears its callbacks,
    /// closes an owned connection and ends the dispatch task.
    ///
    /// Returns `false` when the instance was already stopped (or stopping,
    /// in which case it waits for that stop to finish). Wire errors during
    /// the teardown are logged, not returned.
    pub async fn stop(&self) -> bool {
        let already = {
            let mut phase = self.inner.phase.lock();
            match *phase {
                Phase::Draining | Phase::Stopped => true,
                _ => {
                    *phase = Phase::Draining;
                    false
                }
            }
        };
        if already {
            self.wait_until_stopped().await;
            return false;
        }

        let _ops = self.inner.ops.lock().await;
        let mut specs: BTreeSet<ChannelSpec> = self.inner.held.lock().clone();
        specs.extend(self.inner.registry.specs());
        if self.inner.conn.is_connected() {
            for spec in &specs {
                if let Err(e) = self.release(spec).await {
                    warn!(%spec, "unsubscribe during stop failed: {e}");
                }
            }
        }
        self.inner.held.lock().clear();
        let dropped = self.inner.registry.clear();
        if self.inner.owned {
            self.inner.conn.disconnect();
        }

        *self.inner.phase.lock() = Phase::Stopped;
        self.inner.stop_tx.send_replace(true);
        let dispatcher = self.inner.dispatcher.lock().take();
        if let Some(handle) = dispatcher {
            let _ = handle.await;
        }
        info!(
            specs = specs.len(),
            callbacks = dropped,
            owned = self.inner.owned,
            "multiplexer stopped"
        );
        true
    }

    /// Resolves once [`stop`](Self::stop) has run.
    pub async fn wait_until_stopped(&self) {
        let mut rx = self.inner.stop_tx.subscribe();
        // The sender lives in `inner`, which `self` keeps alive.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    pub fn state(&self) -> MuxState {
        match *self.inner.phase.lock() {
            Phase::Connecting => MuxState::Connecting,
            Phase::Draining => MuxState::Draining,
            Phase::Stopped => MuxState::Stopped,
            Phase::Running if self.inner.registry.is_empty() => MuxState::Idle,
            Phase::Running => MuxState::Active,
        }
    }

    /// The underlying link, for components that want to reuse it.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.inner.conn
    }

    /// Whether [`stop`](Self::stop) closes the connection.
    pub fn owns_connection(&self) -> bool {
        self.inner.owned
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Number of registered callbacks.
    pub fn callback_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Whether any callback (of any mode) is registered for the spec.
    pub fn has_callbacks(
        &self,
        spec: &ChannelSpec,
    ) -> bool {
        !self.inner.registry.modes_for(spec).is_empty()
    }

    /// Whether the id is still registered.
    pub fn contains(
        &self,
        id: &SubscriptionId,
    ) -> bool {
        self.inner.registry.contains(id)
    }

    /// Specs this instance subscribed on the wire.
    pub fn subscribed_specs(&self) -> Vec<ChannelSpec> {
        self.inner.held.lock().iter().cloned().collect()
    }

    /// Identity of the instance, stable while any handle lives.
    pub(crate) fn instance_key(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    /// Whether both handles point at the same instance.
    pub fn same_instance(
        &self,
        other: &Multiplexer,
    ) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Gives up this instance's hold on the spec. Specs it does not hold
    /// are unsubscribed only when no one else on the connection holds them.
    async fn release(
        &self,
        spec: &ChannelSpec,
    ) -> MuxResult<()> {
        let held = self.inner.held.lock().contains(spec);
        let issued = if held {
            let issued = self.inner.conn.unsubscribe(spec).await?;
            self.inner.held.lock().remove(spec);
            issued
        } else {
            self.inner.conn.unsubscribe_unheld(spec).await?
        };
        debug!(%spec, held, issued, "released");
        Ok(())
    }

    fn ensure_running(&self) -> MuxResult<()> {
        match *self.inner.phase.lock() {
            Phase::Running => Ok(()),
            Phase::Connecting => Err(ConnectionError::NotConnected.into()),
            Phase::Draining | Phase::Stopped => Err(ConnectionError::Stopped.into()),
        }
    }
}

impl fmt::Debug for Multiplexer {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Multiplexer")
            .field("state", &self.state())
            .field("owned", &self.inner.owned)
            .field("connection", &self.inner.conn)
            .field("registry", &self.inner.registry)
            .finish()
    }
}

fn validate(specs: &[ChannelSpec]) -> MuxResult<()> {
    if specs.is_empty() {
        return Err(MuxError::invalid("at least one channel is required"));
    }
    if specs.iter().any(|s| s.as_str().is_empty()) {
        return Err(MuxError::invalid("channel names must not be empty"));
    }
    Ok(())
}
