use std::{
    collections::BTreeSet,
    fmt,
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
};

use dashmap::DashMap;
use redmux_error::{MuxError, MuxResult};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::{
    same_handler, Handler, MuxState, Multiplexer, Pipeline, PipelineHandler, StopHandle,
    SubscriptionId, Targets,
};
use crate::{
    client::ConnectOptions,
    pubsub::{Broker, ChannelSpec, DecodeMode},
};

/// Where a named subscription gets its multiplexer from.
pub enum MuxSource {
    /// A caller-owned multiplexer. Full stop only unsubscribes channels no
    /// other name holds and no one else has callbacks on.
    Shared(Multiplexer),
    /// A private multiplexer on a RESP link, stopped on full stop.
    Uri {
        uri: String,
        options: ConnectOptions,
    },
    /// A private multiplexer on an in-process broker, stopped on full stop.
    Memory {
        broker: Arc<Broker>,
        options: ConnectOptions,
    },
}

impl MuxSource {
    async fn open(self) -> MuxResult<(Multiplexer, bool)> {
        match self {
            MuxSource::Shared(mux) => Ok((mux, false)),
            MuxSource::Uri { uri, options } => Ok((Multiplexer::connect(&uri, options).await?, true)),
            MuxSource::Memory { broker, options } => {
                Ok((Multiplexer::in_memory(broker, options).await?, true))
            }
        }
    }
}

impl From<&Multiplexer> for MuxSource {
    fn from(mux: &Multiplexer) -> Self {
        MuxSource::Shared(mux.clone())
    }
}

impl From<Multiplexer> for MuxSource {
    fn from(mux: Multiplexer) -> Self {
        MuxSource::Shared(mux)
    }
}

/// What runs for each message of a named subscription.
#[derive(Clone)]
pub enum Callback {
    Handler(Handler),
    Pipeline(Arc<dyn Pipeline>),
}

impl Callback {
    /// Pointer identity.
    fn same(
        &self,
        other: &Callback,
    ) -> bool {
        match (self, other) {
            (Callback::Handler(a), Callback::Handler(b)) => same_handler(a, b),
            (Callback::Pipeline(a), Callback::Pipeline(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            _ => false,
        }
    }
}

/// A subscribe call against the named registry.
#[derive(Clone)]
pub struct SubscribeRequest {
    pub channels: Targets,
    pub mode: DecodeMode,
    pub callback: Option<Callback>,
}

impl SubscribeRequest {
    pub fn new(channels: impl Into<Targets>) -> Self {
        Self {
            channels: channels.into(),
            mode: DecodeMode::Text,
            callback: None,
        }
    }

    pub fn mode(
        mut self,
        mode: DecodeMode,
    ) -> Self {
        self.mode = mode;
        self
    }

    pub fn handler(
        mut self,
        handler: Handler,
    ) -> Self {
        self.callback = Some(Callback::Handler(handler));
        self
    }

    pub fn pipeline(
        mut self,
        pipeline: Arc<dyn Pipeline>,
    ) -> Self {
        self.callback = Some(Callback::Pipeline(pipeline));
        self
    }
}

struct Contribution {
    callback: Callback,
    ids: Vec<SubscriptionId>,
}

/// A live subscription registered under a name.
///
/// The channel set is fixed by the first registration; later callers with
/// the same name only add their callbacks to it.
pub struct NamedSubscription {
    name: Arc<str>,
    mux: Multiplexer,
    owns_mux: bool,
    specs: Vec<ChannelSpec>,
    contributions: tokio::sync::Mutex<Vec<Contribution>>,
    stopped: AtomicBool,
}

impl NamedSubscription {
    fn new(
        name: &str,
        mux: Multiplexer,
        owns_mux: bool,
        specs: Vec<ChannelSpec>,
    ) -> Self {
        Self {
            name: Arc::from(name),
            mux,
            owns_mux,
            specs,
            contributions: tokio::sync::Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn multiplexer(&self) -> &Multiplexer {
        &self.mux
    }

    pub fn owns_multiplexer(&self) -> bool {
        self.owns_mux
    }

    pub fn specs(&self) -> &[ChannelSpec] {
        &self.specs
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Ids of every callback contributed under this name.
    pub async fn callback_ids(&self) -> Vec<SubscriptionId> {
        self.contributions
            .lock()
            .await
            .iter()
            .flat_map(|c| c.ids.iter().cloned())
            .collect()
    }

    /// Attaches a callback unless the same one (by pointer) already is.
    async fn attach(
        &self,
        callback: Callback,
        mode: DecodeMode,
        stop: StopHandle,
    ) -> MuxResult<bool> {
        let mut contributions = self.contributions.lock().await;
        if contributions.iter().any(|c| c.callback.same(&callback)) {
            debug!(name = %self.name, "callback already attached");
            return Ok(false);
        }
        let handler: Handler = match &callback {
            Callback::Handler(h) => h.clone(),
            Callback::Pipeline(p) => Arc::new(PipelineHandler::new(p.clone(), stop)),
        };
        let ids = self
            .mux
            .subscribe_specs(self.specs.clone(), mode, Some(handler))
            .await?
            .into_ids();
        contributions.push(Contribution { callback, ids });
        Ok(true)
    }

    /// Removes this name's callbacks, leaving the wire subscriptions.
    async fn remove_callbacks(&self) -> usize {
        let taken = std::mem::take(&mut *self.contributions.lock().await);
        let ids: Vec<SubscriptionId> = taken.into_iter().flat_map(|c| c.ids).collect();
        self.mux.remove_callback(&ids)
    }

    async fn shutdown(
        &self,
        registry: &NamedInner,
    ) -> MuxResult<bool> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        let removed = self.remove_callbacks().await;
        if self.owns_mux {
            self.mux.stop().await;
        } else {
            let orphaned: Vec<ChannelSpec> = registry
                .release(&self.mux, &self.specs)
                .into_iter()
                .filter(|spec| !self.mux.has_callbacks(spec))
                .collect();
            if !orphaned.is_empty() && self.mux.state() != MuxState::Stopped {
                self.mux.unsubscribe_specs(orphaned, true).await?;
            }
        }
        info!(name = %self.name, callbacks = removed, "named subscription stopped");
        Ok(true)
    }
}

impl fmt::Debug for NamedSubscription {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("NamedSubscription")
            .field("name", &self.name)
            .field("specs", &self.specs)
            .field("owns_mux", &self.owns_mux)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

type Slot = Arc<OnceCell<Arc<NamedSubscription>>>;

#[derive(Default)]
pub(crate) struct NamedInner {
    entries: DashMap<Arc<str>, Slot>,
    /// (shared multiplexer, spec) -> number of names holding the spec there.
    holders: DashMap<(usize, ChannelSpec), usize>,
}

impl NamedInner {
    fn hold(
        &self,
        mux: &Multiplexer,
        specs: &[ChannelSpec],
    ) {
        let key = mux.instance_key();
        for spec in specs.iter().collect::<BTreeSet<_>>() {
            *self.holders.entry((key, spec.clone())).or_insert(0) += 1;
        }
    }

    /// Drops one hold per spec and returns the specs no name holds any
    /// more.
    fn release(
        &self,
        mux: &Multiplexer,
        specs: &[ChannelSpec],
    ) -> Vec<ChannelSpec> {
        let key = mux.instance_key();
        let mut unheld = Vec::new();
        for spec in specs.iter().collect::<BTreeSet<_>>() {
            let entry = (key, spec.clone());
            let left = match self.holders.get_mut(&entry) {
                Some(mut holders) => {
                    *holders = holders.saturating_sub(1);
                    *holders
                }
                None => 0,
            };
            if left == 0 {
                self.holders.remove_if(&entry, |_, holders| *holders == 0);
                unheld.push(spec.clone());
            }
        }
        unheld
    }
}

/// Name → live subscription.
///
/// Registering a name that is already live reuses it, so unrelated call
/// sites using the same name share one wire subscription instead of
/// duplicating delivery. Cheap to clone; clones share the map.
#[derive(Clone, Default)]
pub struct NamedSubscriptions {
    inner: Arc<NamedInner>,
}

impl NamedSubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_inner(inner: Arc<NamedInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<NamedInner> {
        Arc::downgrade(&self.inner)
    }

    /// Returns the live subscription under `name`, creating it with
    /// `factory` when absent. The flag is `true` when this call created it.
    ///
    /// Concurrent callers for the same name wait for the first factory and
    /// share its result; a failed factory leaves the name free.
    pub async fn register_or_reuse<F, Fut>(
        &self,
        name: &str,
        factory: F,
    ) -> MuxResult<(Arc<NamedSubscription>, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = MuxResult<NamedSubscription>>,
    {
        if name.is_empty() {
            return Err(MuxError::invalid("subscription name must not be empty"));
        }
        let slot: Slot = self
            .inner
            .entries
            .entry(Arc::from(name))
            .or_default()
            .clone();

        let created = AtomicBool::new(false);
        let created_ref = &created;
        let result = slot
            .get_or_try_init(|| async move {
                let sub = factory().await?;
                created_ref.store(true, Ordering::Relaxed);
                Ok::<_, MuxError>(Arc::new(sub))
            })
            .await;

        match result {
            Ok(sub) => {
                let sub = sub.clone();
                let created = created.load(Ordering::Relaxed);
                if created {
                    // A failed concurrent factory may have evicted the slot.
                    self.inner
                        .entries
                        .entry(Arc::from(name))
                        .or_insert_with(|| slot.clone());
                }
                Ok((sub, created))
            }
            Err(e) => {
                self.inner
                    .entries
                    .remove_if(name, |_, s| Arc::ptr_eq(s, &slot) && !s.initialized());
                Err(e)
            }
        }
    }

    /// Subscribes under `name`: the first call creates the subscription on
    /// the given source, every call attaches the request's callback (once
    /// per distinct callback).
    pub async fn subscribe(
        &self,
        name: &str,
        source: impl Into<MuxSource>,
        request: SubscribeRequest,
    ) -> MuxResult<Arc<NamedSubscription>> {
        if request.channels.is_empty() {
            return Err(MuxError::invalid("at least one channel is required"));
        }
        let specs: Vec<ChannelSpec> = request
            .channels
            .as_slice()
            .iter()
            .map(|c| ChannelSpec::parse(c))
            .collect();
        let source = source.into();
        let mode = request.mode;
        let inner = self.inner.clone();

        let (sub, created) = self
            .register_or_reuse(name, || async move {
                let (mux, owned) = source.open().await?;
                if let Err(e) = mux.subscribe_specs(specs.clone(), mode, None).await {
                    if owned {
                        mux.stop().await;
                    }
                    return Err(e);
                }
                if !owned {
                    inner.hold(&mux, &specs);
                }
                Ok(NamedSubscription::new(name, mux, owned, specs))
            })
            .await?;
        if created {
            info!(name, specs = sub.specs.len(), "named subscription created");
        }

        if let Some(callback) = request.callback {
            sub.attach(callback, mode, StopHandle::named(self, name))
                .await?;
        }
        Ok(sub)
    }

    /// Stops the subscription under `name`.
    ///
    /// With `only_remove_callback` only the callbacks contributed under this
    /// name are removed and the name stays registered. Otherwise the
    /// subscription is torn down and the name removed. Returns `false` when
    /// there was nothing to tear down.
    pub async fn stop(
        &self,
        name: &str,
        only_remove_callback: bool,
    ) -> MuxResult<bool> {
        if name.is_empty() {
            return Err(MuxError::invalid("subscription name must not be empty"));
        }
        let Some(sub) = self.get(name) else {
            return Ok(false);
        };
        if only_remove_callback {
            return Ok(sub.remove_callbacks().await > 0);
        }
        self.inner
            .entries
            .remove_if(name, |_, slot| {
                slot.get().is_some_and(|s| Arc::ptr_eq(s, &sub))
            });
        sub.shutdown(&self.inner).await
    }

    /// Fully stops every registered name. Returns how many were stopped.
    pub async fn stop_all(&self) -> usize {
        let mut stopped = 0;
        for name in self.names() {
            match self.stop(&name, false).await {
                Ok(true) => stopped += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(name = %name, "stop failed: {e}"),
            }
        }
        stopped
    }

    /// The live subscription under `name`, if any.
    pub fn get(
        &self,
        name: &str,
    ) -> Option<Arc<NamedSubscription>> {
        let slot = self.inner.entries.get(name).map(|e| e.value().clone())?;
        slot.get().cloned()
    }

    pub fn contains(
        &self,
        name: &str,
    ) -> bool {
        self.get(name).is_some()
    }

    /// Names with a live subscription, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .entries
            .iter()
            .filter(|e| e.value().initialized())
            .map(|e| e.key().to_string())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.names().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for NamedSubscriptions {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("NamedSubscriptions")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::{handler, Delivery};

    fn noop() -> Handler {
        handler(|_d: Delivery| async { anyhow::Ok(()) })
    }

    fn memory(broker: &Arc<Broker>) -> MuxSource {
        MuxSource::Memory {
            broker: broker.clone(),
            options: ConnectOptions::default(),
        }
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let reg = NamedSubscriptions::new();
        let broker = Arc::new(Broker::default());
        assert!(matches!(
            reg.subscribe("", memory(&broker), SubscribeRequest::new("c"))
                .await,
            Err(MuxError::InvalidArgument(_))
        ));
        assert!(matches!(
            reg.stop("", false).await,
            Err(MuxError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_name_stop_is_false() {
        let reg = NamedSubscriptions::new();
        assert!(!reg.stop("ghost", false).await.unwrap());
        assert!(!reg.stop("ghost", true).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_factory_leaves_name_free() {
        let reg = NamedSubscriptions::new();
        let err = reg
            .register_or_reuse("n", || async { Err(MuxError::invalid("nope")) })
            .await
            .unwrap_err();
        assert!(matches!(err, MuxError::InvalidArgument(_)));
        assert!(!reg.contains("n"));
        assert!(reg.inner.entries.is_empty());
    }

    #[tokio::test]
    async fn test_reuse_and_dedupe() {
        let reg = NamedSubscriptions::new();
        let broker = Arc::new(Broker::default());
        let h = noop();

        let a = reg
            .subscribe("n", memory(&broker), SubscribeRequest::new("c").handler(h.clone()))
            .await
            .unwrap();
        let b = reg
            .subscribe("n", memory(&broker), SubscribeRequest::new("c").handler(h.clone()))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.callback_ids().await.len(), 1);
        assert_eq!(broker.subscriber_count("c"), 1);

        reg.subscribe("n", memory(&broker), SubscribeRequest::new("c").handler(noop()))
            .await
            .unwrap();
        assert_eq!(a.callback_ids().await.len(), 2);
    }

    #[tokio::test]
    async fn test_only_remove_callback_keeps_name() {
        let reg = NamedSubscriptions::new();
        let broker = Arc::new(Broker::default());
        let sub = reg
            .subscribe("n", memory(&broker), SubscribeRequest::new("c").handler(noop()))
            .await
            .unwrap();

        assert!(reg.stop("n", true).await.unwrap());
        assert!(reg.contains("n"));
        assert_eq!(sub.multiplexer().callback_count(), 0);
        assert_eq!(broker.subscriber_count("c"), 1);

        assert!(reg.stop("n", false).await.unwrap());
        assert!(!reg.contains("n"));
        assert!(sub.is_stopped());
        assert_eq!(sub.multiplexer().state(), MuxState::Stopped);
        assert!(!reg.stop("n", false).await.unwrap());
    }

    #[tokio::test]
    async fn test_shared_mux_keeps_sibling_channels() {
        let reg = NamedSubscriptions::new();
        let broker = Arc::new(Broker::default());
        let mux = Multiplexer::in_memory(broker.clone(), ConnectOptions::default())
            .await
            .unwrap();

        reg.subscribe("a", &mux, SubscribeRequest::new("c").handler(noop()))
            .await
            .unwrap();
        reg.subscribe("b", &mux, SubscribeRequest::new("c").handler(noop()))
            .await
            .unwrap();
        assert_eq!(mux.callback_count(), 2);

        assert!(reg.stop("a", false).await.unwrap());
        assert_eq!(mux.callback_count(), 1);
        assert_eq!(mux.subscribed_specs(), vec![ChannelSpec::literal("c")]);

        assert!(reg.stop("b", false).await.unwrap());
        assert!(mux.subscribed_specs().is_empty());
        assert_eq!(mux.state(), MuxState::Idle);
    }

    #[tokio::test]
    async fn test_shared_mux_keeps_wire_only_sibling() {
        let reg = NamedSubscriptions::new();
        let broker = Arc::new(Broker::default());
        let mux = Multiplexer::in_memory(broker.clone(), ConnectOptions::default())
            .await
            .unwrap();

        reg.subscribe("a", &mux, SubscribeRequest::new("c").handler(noop()))
            .await
            .unwrap();
        // Wire interest only, no callback.
        reg.subscribe("b", &mux, SubscribeRequest::new("c"))
            .await
            .unwrap();

        assert!(reg.stop("a", false).await.unwrap());
        assert_eq!(mux.callback_count(), 0);
        assert_eq!(mux.subscribed_specs(), vec![ChannelSpec::literal("c")]);
        assert_eq!(broker.subscriber_count("c"), 1);

        assert!(reg.stop("b", false).await.unwrap());
        assert!(mux.subscribed_specs().is_empty());
        assert_eq!(broker.subscriber_count("c"), 0);
        assert!(reg.inner.holders.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_registration_creates_once() {
        let reg = NamedSubscriptions::new();
        let broker = Arc::new(Broker::default());

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let reg = reg.clone();
            let broker = broker.clone();
            tasks.push(tokio::spawn(async move {
                reg.subscribe("same", memory(&broker), SubscribeRequest::new("c"))
                    .await
                    .unwrap()
            }));
        }
        let mut subs = Vec::new();
        for t in tasks {
            subs.push(t.await.unwrap());
        }
        assert!(subs.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(reg.len(), 1);
        assert_eq!(broker.subscriber_count("c"), 1);
    }
}
