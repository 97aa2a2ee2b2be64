//! Expiration Policy
//!
//! Decides when an entry is dead and enforces it at two points:
//!
//! - **Lazy expiry**: `get` and `keys` treat expired rows as absent and ask
//!   the engine to delete them before returning.
//! - **Bulk expiry**: `purge-expired` removes every expired row in every
//!   namespace in one statement. Rows nobody reads again only go away here.
//!
//! ## One Clock Per Invocation
//!
//! `now` is sampled once, when the invocation starts, and every liveness
//! check in that invocation uses the same value. An entry cannot flip from
//! live to expired halfway through a `keys` scan.
//!
//! ```text
//! set(ttl=1) at t=100   ->  expires_at = 101
//! get        at t=101   ->  live      (101 < 101 is false)
//! get        at t=102   ->  expired   (101 < 102), row deleted
//! ```

use crate::storage::engine::{StorageEngine, StorageResult};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// A second-resolution "now", captured once per invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clock {
    now: i64,
}

impl Clock {
    /// Samples the system clock.
    ///
    /// A clock set before the UNIX epoch reads as 0.
    pub fn system() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Self { now }
    }

    /// A clock frozen at `now` (UNIX seconds).
    pub const fn fixed(now: i64) -> Self {
        Self { now }
    }

    /// Returns the captured time in UNIX seconds.
    #[inline]
    pub const fn now(&self) -> i64 {
        self.now
    }

    /// Computes the stored expiry for a TTL given at this instant.
    #[inline]
    pub fn expires_at_for(&self, ttl: i64) -> Option<i64> {
        expires_at_for(ttl, self.now)
    }

    /// Checks an `expires_at` against this instant.
    #[inline]
    pub fn is_expired(&self, expires_at: Option<i64>) -> bool {
        is_expired(expires_at, self.now)
    }
}

/// Converts a TTL in seconds into an absolute expiry.
///
/// `ttl <= 0` means the entry never expires.
pub fn expires_at_for(ttl: i64, now: i64) -> Option<i64> {
    (ttl > 0).then(|| now.saturating_add(ttl))
}

/// An entry is expired once its expiry is strictly in the past.
#[inline]
pub fn is_expired(expires_at: Option<i64>, now: i64) -> bool {
    expires_at.is_some_and(|at| at < now)
}

/// Outcome of a single-key read under the expiry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// No row was stored
    Missing,
    /// A row was stored but had expired; it has been deleted
    Expired,
    /// A live row and its value
    Live(String),
}

/// Reads one entry, deleting it if it turns out to be expired.
///
/// The delete is conditional on the row still being expired, so a writer
/// that refreshed the key after our read keeps its value.
pub fn lookup(
    engine: &StorageEngine,
    namespace: &str,
    key: &str,
    clock: Clock,
) -> StorageResult<Lookup> {
    let entry = match engine.fetch(namespace, key)? {
        Some(entry) => entry,
        None => return Ok(Lookup::Missing),
    };

    if entry.is_expired_at(clock.now()) {
        engine.delete_if_expired(namespace, key, clock.now())?;
        debug!(ns = namespace, key = key, "Lazily expired entry on read");
        return Ok(Lookup::Expired);
    }

    Ok(Lookup::Live(entry.value))
}

/// Lists the live keys of a namespace, deleting any expired rows found.
///
/// A failure while deleting expired rows fails the whole listing.
pub fn live_keys(engine: &StorageEngine, namespace: &str, clock: Clock) -> StorageResult<Vec<String>> {
    let (expired, live): (Vec<_>, Vec<_>) = engine
        .list_keys(namespace)?
        .into_iter()
        .partition(|(_, expires_at)| clock.is_expired(*expires_at));

    let expired: Vec<String> = expired.into_iter().map(|(key, _)| key).collect();
    if !expired.is_empty() {
        let removed = engine.delete_expired_keys(namespace, &expired, clock.now())?;
        debug!(
            ns = namespace,
            found = expired.len(),
            removed = removed,
            "Lazily expired entries during key listing"
        );
    }

    Ok(live.into_iter().map(|(key, _)| key).collect())
}

/// Removes every expired row in every namespace.
///
/// # Returns
///
/// Returns the number of rows removed.
pub fn purge(engine: &StorageEngine, clock: Clock) -> StorageResult<u64> {
    let purged = engine.delete_where_expired_before(clock.now())?;
    if purged > 0 {
        debug!(purged = purged, now = clock.now(), "Purged expired entries");
    }
    Ok(purged)
}
