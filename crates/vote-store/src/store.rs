use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;
use vote_core::{Voting, VotingId};

use crate::error::StoreError;

/// Expiry policy for the voting store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Sliding time-to-live in seconds, refreshed on every read. `0` disables expiry.
    pub ttl_secs: u64,
    /// Maximum number of votings kept. `0` means unbounded.
    pub capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 6 * 60 * 60,
            capacity: 10_000,
        }
    }
}

impl StoreConfig {
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_secs > 0).then(|| Duration::from_secs(self.ttl_secs))
    }
}

/// Why an entry left the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvictionReason {
    Expired,
    Capacity,
    Removed,
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Expired => "expired",
            Self::Capacity => "capacity",
            Self::Removed => "removed",
        })
    }
}

/// Subscriber notified after a voting has been dropped from the store.
///
/// Called on whichever task performed the eviction, with no store lock held.
/// Implementations must tolerate repeated notifications for the same id.
pub trait EvictionListener: Send + Sync {
    fn on_evict(&self, voting_id: &VotingId, reason: EvictionReason);
}

impl<F> EvictionListener for F
where
    F: Fn(&VotingId, EvictionReason) + Send + Sync,
{
    fn on_evict(&self, voting_id: &VotingId, reason: EvictionReason) {
        self(voting_id, reason);
    }
}

struct Entry {
    voting: Arc<Voting>,
    last_access: Mutex<Instant>,
}

impl Entry {
    fn new(voting: Arc<Voting>, now: Instant) -> Self {
        Self {
            voting,
            last_access: Mutex::new(now),
        }
    }

    fn touch(&self, now: Instant) {
        let mut last = self.last_access.lock();
        if now > *last {
            *last = now;
        }
    }

    fn last_access(&self) -> Instant {
        *self.last_access.lock()
    }

    fn is_expired(&self, ttl: Option<Duration>, now: Instant) -> bool {
        ttl.is_some_and(|ttl| now.saturating_duration_since(self.last_access()) >= ttl)
    }
}

/// In-memory voting cache keyed by voting id, bounded by TTL and capacity.
pub struct VotingStore {
    entries: DashMap<VotingId, Entry>,
    config: StoreConfig,
    listeners: RwLock<Vec<Arc<dyn EvictionListener>>>,
}

impl VotingStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Register a listener for every future eviction.
    pub fn subscribe(&self, listener: Arc<dyn EvictionListener>) {
        self.listeners.write().push(listener);
    }

    /// Insert a new voting. Fails if a live voting already has this id.
    pub fn create(&self, voting: Voting) -> Result<Arc<Voting>, StoreError> {
        let now = Instant::now();
        let id = voting.id().clone();
        self.evict_if_expired(&id, now);

        let voting = match self.entries.entry(id.clone()) {
            MapEntry::Occupied(_) => return Err(StoreError::DuplicateId(id)),
            MapEntry::Vacant(slot) => {
                let voting = Arc::new(voting);
                let _ = slot.insert(Entry::new(Arc::clone(&voting), now));
                voting
            }
        };

        self.enforce_capacity(&id);
        Ok(voting)
    }

    /// Look up a live voting, refreshing its sliding expiry.
    pub fn get(&self, id: &VotingId) -> Option<Arc<Voting>> {
        self.get_at(id, Instant::now())
    }

    pub fn contains(&self, id: &VotingId) -> bool {
        self.get(id).is_some()
    }

    /// Whether the id is present, without refreshing or expiring anything.
    pub fn contains_key(&self, id: &VotingId) -> bool {
        self.entries.contains_key(id)
    }

    /// Explicitly drop a voting. Listeners see [`EvictionReason::Removed`].
    pub fn remove(&self, id: &VotingId) -> Option<Arc<Voting>> {
        let (_, entry) = self.entries.remove(id)?;
        self.notify(id, EvictionReason::Removed);
        Some(entry.voting)
    }

    /// Evict everything whose TTL has elapsed. Returns the number evicted.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Instant::now())
    }

    /// [`Self::sweep_expired`] against an explicit clock reading.
    pub fn sweep_expired_at(&self, now: Instant) -> usize {
        let ttl = self.config.ttl();
        if ttl.is_none() {
            return 0;
        }
        let candidates: Vec<VotingId> = self
            .entries
            .iter()
            .filter(|e| e.value().is_expired(ttl, now))
            .map(|e| e.key().clone())
            .collect();

        candidates
            .into_iter()
            .filter(|id| self.evict_if_expired(id, now))
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn get_at(&self, id: &VotingId, now: Instant) -> Option<Arc<Voting>> {
        let ttl = self.config.ttl();
        {
            let entry = self.entries.get(id)?;
            if !entry.is_expired(ttl, now) {
                entry.touch(now);
                return Some(Arc::clone(&entry.voting));
            }
        }
        let _ = self.evict_if_expired(id, now);
        None
    }

    fn evict_if_expired(&self, id: &VotingId, now: Instant) -> bool {
        let ttl = self.config.ttl();
        let removed = self
            .entries
            .remove_if(id, |_, entry| entry.is_expired(ttl, now))
            .is_some();
        if removed {
            self.notify(id, EvictionReason::Expired);
        }
        removed
    }

    fn enforce_capacity(&self, keep: &VotingId) {
        let capacity = self.config.capacity;
        if capacity == 0 {
            return;
        }
        while self.entries.len() > capacity {
            let oldest = self
                .entries
                .iter()
                .filter(|e| e.key() != keep)
                .min_by_key(|e| e.value().last_access())
                .map(|e| e.key().clone());
            let Some(oldest) = oldest else {
                break;
            };
            if self.entries.remove(&oldest).is_some() {
                self.notify(&oldest, EvictionReason::Capacity);
            }
        }
    }

    fn notify(&self, id: &VotingId, reason: EvictionReason) {
        debug!(voting_id = %id, %reason, "voting evicted");
        let listeners: Vec<Arc<dyn EvictionListener>> = self.listeners.read().clone();
        for listener in listeners {
            listener.on_evict(id, reason);
        }
    }
}

impl Default for VotingStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vote_core::Variant;

    fn voting(id: &str) -> Voting {
        Voting::new(
            VotingId::from_raw(id),
            "Lunch?",
            vec![Variant { id: 1, text: "Pizza".into() }],
        )
    }

    fn recorder(store: &VotingStore) -> Arc<Mutex<Vec<(VotingId, EvictionReason)>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store.subscribe(Arc::new(move |id: &VotingId, reason: EvictionReason| {
            sink.lock().push((id.clone(), reason));
        }));
        seen
    }

    #[test]
    fn create_then_get() {
        let store = VotingStore::default();
        let created = store.create(voting("a")).unwrap();
        let fetched = store.get(&VotingId::from_raw("a")).unwrap();
        assert!(Arc::ptr_eq(&created, &fetched));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn create_duplicate_id_fails() {
        let store = VotingStore::default();
        store.create(voting("a")).unwrap();
        let err = store.create(voting("a")).unwrap_err();
        assert_eq!(err, StoreError::DuplicateId(VotingId::from_raw("a")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn get_unknown_is_none() {
        let store = VotingStore::default();
        assert!(store.get(&VotingId::from_raw("nope")).is_none());
        assert!(!store.contains(&VotingId::from_raw("nope")));
    }

    #[test]
    fn closed_voting_stays_readable() {
        let store = VotingStore::default();
        let v = store.create(voting("a")).unwrap();
        let _ = v.close();
        assert!(store.get(&VotingId::from_raw("a")).unwrap().is_closed());
    }

    #[test]
    fn remove_notifies_listeners() {
        let store = VotingStore::default();
        let seen = recorder(&store);
        store.create(voting("a")).unwrap();

        assert!(store.remove(&VotingId::from_raw("a")).is_some());
        assert!(store.remove(&VotingId::from_raw("a")).is_none());

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], (VotingId::from_raw("a"), EvictionReason::Removed));
    }

    #[test]
    fn sweep_evicts_expired_open_and_closed_votings() {
        let store = VotingStore::new(StoreConfig { ttl_secs: 60, capacity: 0 });
        let seen = recorder(&store);
        store.create(voting("open")).unwrap();
        let _ = store.create(voting("closed")).unwrap().close();

        assert_eq!(store.sweep_expired_at(Instant::now()), 0);
        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(store.sweep_expired_at(later), 2);
        assert!(store.is_empty());

        let reasons: Vec<EvictionReason> = seen.lock().iter().map(|(_, r)| *r).collect();
        assert_eq!(reasons, vec![EvictionReason::Expired, EvictionReason::Expired]);
    }

    #[test]
    fn read_refreshes_sliding_expiry() {
        let store = VotingStore::new(StoreConfig { ttl_secs: 60, capacity: 0 });
        store.create(voting("a")).unwrap();
        let id = VotingId::from_raw("a");

        let t1 = Instant::now() + Duration::from_secs(50);
        assert!(store.get_at(&id, t1).is_some());
        let t2 = t1 + Duration::from_secs(50);
        assert_eq!(store.sweep_expired_at(t2), 0);
        let t3 = t1 + Duration::from_secs(60);
        assert_eq!(store.sweep_expired_at(t3), 1);
    }

    #[test]
    fn expired_entry_reads_as_absent_and_is_evicted() {
        let store = VotingStore::new(StoreConfig { ttl_secs: 1, capacity: 0 });
        let seen = recorder(&store);
        store.create(voting("a")).unwrap();

        let later = Instant::now() + Duration::from_secs(5);
        assert!(store.get_at(&VotingId::from_raw("a"), later).is_none());
        assert!(store.is_empty());
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn zero_ttl_never_expires() {
        let store = VotingStore::new(StoreConfig { ttl_secs: 0, capacity: 0 });
        store.create(voting("a")).unwrap();
        let far = Instant::now() + Duration::from_secs(1_000_000);
        assert_eq!(store.sweep_expired_at(far), 0);
        assert!(store.get_at(&VotingId::from_raw("a"), far).is_some());
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let store = VotingStore::new(StoreConfig { ttl_secs: 0, capacity: 2 });
        let seen = recorder(&store);
        store.create(voting("a")).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        store.create(voting("b")).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        // touch "a" so "b" becomes the oldest
        assert!(store.get(&VotingId::from_raw("a")).is_some());
        std::thread::sleep(Duration::from_millis(5));
        store.create(voting("c")).unwrap();

        assert_eq!(store.len(), 2);
        assert!(store.contains_key(&VotingId::from_raw("a")));
        assert!(!store.contains_key(&VotingId::from_raw("b")));
        assert!(store.contains_key(&VotingId::from_raw("c")));
        assert_eq!(
            seen.lock().as_slice(),
            &[(VotingId::from_raw("b"), EvictionReason::Capacity)]
        );
    }

    #[test]
    fn listener_may_reenter_store() {
        let store = Arc::new(VotingStore::default());
        let inner = Arc::clone(&store);
        store.subscribe(Arc::new(move |id: &VotingId, _: EvictionReason| {
            assert!(!inner.contains_key(id));
        }));
        store.create(voting("a")).unwrap();
        assert!(store.remove(&VotingId::from_raw("a")).is_some());
    }

    #[test]
    fn config_defaults_and_partial_json() {
        let cfg = StoreConfig::default();
        assert_eq!(cfg.ttl(), Some(Duration::from_secs(6 * 60 * 60)));
        assert_eq!(cfg.capacity, 10_000);

        let cfg: StoreConfig = serde_json::from_str(r#"{"ttl_secs":0}"#).unwrap();
        assert_eq!(cfg.ttl(), None);
        assert_eq!(cfg.capacity, 10_000);
    }
}
