use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Process-local map with per-entry expiry. Expired entries are evicted
/// lazily on read and in bulk by [`TtlCache::sweep`].
pub struct TtlCache<K, V> {
    entries: Mutex<HashMap<K, (V, Instant)>>,
}

impl<K, V> Default for TtlCache<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn get(&self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    #[cfg(test)]
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        self.set_at(key, value, ttl, Instant::now());
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn get_at(&self, key: &K, now: Instant) -> Option<V> {
        let mut map = self.lock();
        match map.get(key) {
            Some((_, expires)) if *expires <= now => {
                map.remove(key);
                None
            }
            Some((v, _)) => Some(v.clone()),
            None => None,
        }
    }

    pub(crate) fn set_at(&self, key: K, value: V, ttl: Duration, now: Instant) {
        self.lock().insert(key, (value, now + ttl));
    }

    /// Read-modify-write under one lock. `f` sees the live value (expired
    /// entries read as `None`) and returns the value to store with its TTL;
    /// on `Err` the entry is left untouched.
    pub(crate) fn try_update_at<E>(
        &self,
        key: K,
        now: Instant,
        f: impl FnOnce(Option<&V>) -> Result<(V, Duration), E>,
    ) -> Result<V, E> {
        let mut map = self.lock();
        let live = map.get(&key).filter(|(_, expires)| *expires > now).map(|(v, _)| v);
        let (value, ttl) = f(live)?;
        map.insert(key, (value.clone(), now + ttl));
        Ok(value)
    }

    pub(crate) fn sweep_at(&self, now: Instant) -> usize {
        let mut map = self.lock();
        let before = map.len();
        map.retain(|_, (_, expires)| *expires > now);
        before - map.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<K, (V, Instant)>> {
        // a poisoned map only ever holds counters; keep serving it
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }
}
