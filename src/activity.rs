//! Per-device activity tracking.
//!
//! Every recorded measurement checks its device in. Devices that have not
//! checked in for longer than the configured `max_unseen` duration are
//! reported as inactive so their metrics can be evicted.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Tracks the last time each device (identified by its address) was seen.
///
/// Safe for concurrent use: check-ins and evictions take the write lock,
/// listing takes the read lock.
#[derive(Debug)]
pub struct ActivityTracker {
    /// Silence longer than this marks a device inactive
    max_unseen: Duration,
    /// Last check-in time for each address
    last_seen: RwLock<HashMap<String, Instant>>,
}

impl ActivityTracker {
    /// Create a tracker with the given inactivity threshold.
    ///
    /// # Example
    /// ```
    /// use std::time::Duration;
    /// use mi_thermometer_exporter::activity::ActivityTracker;
    ///
    /// let tracker = ActivityTracker::new(Duration::from_secs(300));
    /// assert!(tracker.is_empty());
    /// ```
    pub fn new(max_unseen: Duration) -> Self {
        ActivityTracker {
            max_unseen,
            last_seen: RwLock::new(HashMap::new()),
        }
    }

    /// Mark `address` as seen now. The last write wins.
    pub fn check_in(&self, address: &str) {
        let now = Instant::now();
        self.last_seen
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address.to_string(), now);
        debug!(device_address = address, "Device is active");
    }

    /// Every address silent for longer than `max_unseen` at the time of the call.
    pub fn list_inactive(&self) -> Vec<String> {
        let now = Instant::now();
        let last_seen = self.last_seen.read().unwrap_or_else(PoisonError::into_inner);

        last_seen
            .iter()
            .filter(|(_, seen)| self.is_stale(now, **seen))
            .map(|(address, _)| address.clone())
            .collect()
    }

    /// Remove `address` unconditionally. No-op if it is not tracked.
    pub fn forget(&self, address: &str) {
        self.last_seen
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(address);
        debug!(device_address = address, "Device is inactive");
    }

    /// Evict `address` if it is still inactive, running `delete` first.
    ///
    /// The staleness check, `delete` and the removal happen under the write
    /// lock, so a concurrent [`check_in`](Self::check_in) for the same device
    /// waits until the eviction is over. The record is kept when `delete`
    /// fails.
    ///
    /// Returns `Ok(None)` when the device is fresh or not tracked, and
    /// `Ok(Some(n))` with `delete`'s result once it is evicted.
    pub fn evict_if_inactive<E>(
        &self,
        address: &str,
        delete: impl FnOnce(&str) -> Result<usize, E>,
    ) -> Result<Option<usize>, E> {
        let mut last_seen = self.last_seen.write().unwrap_or_else(PoisonError::into_inner);

        let now = Instant::now();
        let stale = last_seen
            .get(address)
            .is_some_and(|seen| self.is_stale(now, *seen));
        if !stale {
            return Ok(None);
        }

        let deleted = delete(address)?;
        last_seen.remove(address);
        debug!(device_address = address, "Device is inactive");
        Ok(Some(deleted))
    }

    /// Last check-in time of `address`.
    pub fn last_seen(&self, address: &str) -> Option<Instant> {
        self.last_seen
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .copied()
    }

    pub fn len(&self) -> usize {
        self.last_seen
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn is_stale(&self, now: Instant, seen: Instant) -> bool {
        now.saturating_duration_since(seen) > self.max_unseen
    }
}
