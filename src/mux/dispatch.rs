use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use redmux_error::{ErrorExt, MuxError};
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        watch,
    },
    task::JoinHandle,
};
use tracing::{error, trace, warn};

use super::{CallbackRegistry, Delivery, Handler, SubscriptionId};
use crate::pubsub::{ChannelSpec, DecodeMode, Message, Payload};

/// Dispatch counters of one multiplexer.
#[derive(Debug, Default)]
pub struct DispatchStats {
    received: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    lagged: AtomicU64,
    in_flight: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Messages taken off the connection.
    pub received: u64,
    /// Callback invocations that returned `Ok`.
    pub delivered: u64,
    /// Messages nobody in this registry was subscribed to.
    pub dropped: u64,
    /// Callback invocations that returned an error.
    pub failed: u64,
    /// Callback invocations that panicked.
    pub panicked: u64,
    /// Messages skipped because the dispatcher fell behind.
    pub lagged: u64,
    /// Callbacks currently running.
    pub in_flight: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            lagged: self.lagged.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }
}

/// Starts the dispatch loop of one multiplexer. It runs until the stop gate
/// flips or the connection's event channel closes.
pub(crate) fn spawn_dispatcher(
    registry: Arc<CallbackRegistry>,
    stats: Arc<DispatchStats>,
    mut events: broadcast::Receiver<Message>,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if *stop.borrow_and_update() {
            return;
        }
        loop {
            tokio::select! {
                biased;
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                event = events.recv() => match event {
                    Ok(msg) => dispatch(&registry, &stats, msg),
                    Err(RecvError::Lagged(skipped)) => {
                        stats.lagged.fetch_add(skipped, Ordering::Relaxed);
                        warn!(skipped, "dispatcher fell behind the connection; messages lost");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        trace!("dispatcher exited");
    })
}

/// Resolves and fans out one inbound message. Decodes at most once per mode.
pub(crate) fn dispatch(
    registry: &CallbackRegistry,
    stats: &Arc<DispatchStats>,
    msg: Message,
) {
    stats.received.fetch_add(1, Ordering::Relaxed);
    let spec = match &msg.pattern {
        Some(pattern) => ChannelSpec::Pattern(pattern.clone()),
        None => ChannelSpec::Literal(msg.channel.clone()),
    };

    let mut invoked = 0;
    for mode in DecodeMode::ALL {
        let entries = registry.resolve_entries(mode, &spec);
        if entries.is_empty() {
            continue;
        }
        let payload = Arc::new(Payload::decode(mode, &msg.payload));
        for (id, handler) in entries {
            let delivery = Delivery {
                id: id.clone(),
                pattern: msg.pattern.clone(),
                channel: msg.channel.clone(),
                payload: payload.clone(),
                raw: msg.payload.clone(),
            };
            invoke(id, handler, delivery, stats.clone());
            invoked += 1;
        }
    }

    if invoked == 0 {
        stats.dropped.fetch_add(1, Ordering::Relaxed);
        trace!(%spec, "no callbacks; message dropped");
    }
}

/// Runs one callback on its own task. The inner task isolates panics; the
/// outer one reports the outcome.
fn invoke(
    id: SubscriptionId,
    handler: Handler,
    delivery: Delivery,
    stats: Arc<DispatchStats>,
) {
    stats.in_flight.fetch_add(1, Ordering::Relaxed);
    tokio::spawn(async move {
        let outcome = tokio::spawn(async move { handler.handle(delivery).await }).await;
        match outcome {
            Ok(Ok(())) => {
                stats.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                let err = MuxError::Callback {
                    id: id.to_string(),
                    reason: format!("{e:#}"),
                };
                warn!(subscription = %id, status = %err.status_code(), "{err}");
            }
            Err(join) if join.is_panic() => {
                stats.panicked.fetch_add(1, Ordering::Relaxed);
                error!(subscription = %id, "callback panicked");
            }
            Err(_) => trace!(subscription = %id, "callback cancelled"),
        }
        stats.in_flight.fetch_sub(1, Ordering::Relaxed);
    });
}
