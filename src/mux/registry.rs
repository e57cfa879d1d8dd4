use std::{
    collections::{BTreeSet, HashMap},
    fmt,
};

use parking_lot::Mutex;

use super::Handler;
use crate::pubsub::{ChannelSpec, DecodeMode};

/// Identifies one (spec, callback) pairing inside a registry.
///
/// Displays as `mode:tag:name:ordinal:nonce`, e.g. `text:L:news:3:2841`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId {
    mode: DecodeMode,
    spec: ChannelSpec,
    ordinal: u64,
    nonce: u32,
}

impl SubscriptionId {
    pub fn new(
        mode: DecodeMode,
        spec: ChannelSpec,
        ordinal: u64,
        nonce: u32,
    ) -> Self {
        Self {
            mode,
            spec,
            ordinal,
            nonce,
        }
    }

    pub fn mode(&self) -> DecodeMode {
        self.mode
    }

    pub fn spec(&self) -> &ChannelSpec {
        &self.spec
    }

    pub fn ordinal(&self) -> u64 {
        self.ordinal
    }

    pub fn nonce(&self) -> u32 {
        self.nonce
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.mode,
            self.spec.tag(),
            self.spec.as_str(),
            self.ordinal,
            self.nonce
        )
    }
}

type ChannelKey = (DecodeMode, ChannelSpec);

#[derive(Default)]
struct RegistryInner {
    next_ordinal: u64,
    by_id: HashMap<SubscriptionId, Handler>,
    by_channel: HashMap<ChannelKey, BTreeSet<SubscriptionId>>,
}

impl RegistryInner {
    fn detach(
        &mut self,
        id: &SubscriptionId,
    ) {
        let key = (id.mode, id.spec.clone());
        if let Some(set) = self.by_channel.get_mut(&key) {
            set.remove(id);
            if set.is_empty() {
                self.by_channel.remove(&key);
            }
        }
    }
}

/// Which callbacks fire for which (mode, spec).
///
/// Both maps live behind one lock, so every id in the id map is in exactly
/// one channel set and no channel set is ever left empty. The lock is never
/// held while a callback runs.
#[derive(Default)]
pub struct CallbackRegistry {
    inner: Mutex<RegistryInner>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback and returns its fresh id.
    pub fn add(
        &self,
        mode: DecodeMode,
        spec: ChannelSpec,
        handler: Handler,
        nonce: u32,
    ) -> SubscriptionId {
        let mut inner = self.inner.lock();
        inner.next_ordinal += 1;
        let id = SubscriptionId::new(mode, spec.clone(), inner.next_ordinal, nonce);
        inner.by_id.insert(id.clone(), handler);
        inner
            .by_channel
            .entry((mode, spec))
            .or_default()
            .insert(id.clone());
        id
    }

    /// Removes one id. Unknown ids are ignored.
    pub fn remove_by_id(
        &self,
        id: &SubscriptionId,
    ) -> bool {
        let mut inner = self.inner.lock();
        if inner.by_id.remove(id).is_none() {
            return false;
        }
        inner.detach(id);
        true
    }

    /// Removes every id registered for the spec, in every mode.
    pub fn remove_channel(
        &self,
        spec: &ChannelSpec,
    ) -> usize {
        let mut inner = self.inner.lock();
        let mut removed = 0;
        for mode in DecodeMode::ALL {
            if let Some(ids) = inner.by_channel.remove(&(mode, spec.clone())) {
                for id in &ids {
                    inner.by_id.remove(id);
                }
                removed += ids.len();
            }
        }
        removed
    }

    /// Current callbacks for (mode, spec). Empty when nothing is registered.
    pub fn resolve(
        &self,
        mode: DecodeMode,
        spec: &ChannelSpec,
    ) -> Vec<Handler> {
        self.resolve_entries(mode, spec)
            .into_iter()
            .map(|(_, h)| h)
            .collect()
    }

    /// Same as [`resolve`](Self::resolve), with the ids.
    pub fn resolve_entries(
        &self,
        mode: DecodeMode,
        spec: &ChannelSpec,
    ) -> Vec<(SubscriptionId, Handler)> {
        let inner = self.inner.lock();
        let Some(ids) = inner.by_channel.get(&(mode, spec.clone())) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| inner.by_id.get(id).map(|h| (id.clone(), h.clone())))
            .collect()
    }

    /// Modes with at least one callback for the spec.
    pub fn modes_for(
        &self,
        spec: &ChannelSpec,
    ) -> Vec<DecodeMode> {
        let inner = self.inner.lock();
        DecodeMode::ALL
            .into_iter()
            .filter(|mode| inner.by_channel.contains_key(&(*mode, spec.clone())))
            .collect()
    }

    pub fn contains(
        &self,
        id: &SubscriptionId,
    ) -> bool {
        self.inner.lock().by_id.contains_key(id)
    }

    /// Handler registered under the id.
    pub fn get(
        &self,
        id: &SubscriptionId,
    ) -> Option<Handler> {
        self.inner.lock().by_id.get(id).cloned()
    }

    /// Number of registered ids.
    pub fn len(&self) -> usize {
        self.inner.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().by_id.is_empty()
    }

    /// Distinct specs with at least one callback, sorted.
    pub fn specs(&self) -> Vec<ChannelSpec> {
        let inner = self.inner.lock();
        let specs: BTreeSet<ChannelSpec> =
            inner.by_channel.keys().map(|(_, s)| s.clone()).collect();
        specs.into_iter().collect()
    }

    /// Drops everything; returns how many ids were removed.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let n = inner.by_id.len();
        inner.by_id.clear();
        inner.by_channel.clear();
        n
    }

    #[cfg(test)]
    fn check_invariants(&self) {
        let inner = self.inner.lock();
        let mut seen = 0;
        for ((mode, spec), ids) in &inner.by_channel {
            assert!(!ids.is_empty(), "empty channel set left behind");
            for id in ids {
                assert_eq!(id.mode, *mode);
                assert_eq!(&id.spec, spec);
                assert!(inner.by_id.contains_key(id), "dangling id {id}");
            }
            seen += ids.len();
        }
        assert_eq!(seen, inner.by_id.len(), "id in more or fewer than one set");
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CallbackRegistry")
            .field("ids", &inner.by_id.len())
            .field("channels", &inner.by_channel.len())
            .finish()
    }
}
