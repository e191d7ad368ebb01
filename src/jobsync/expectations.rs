//! Reconciliation expectations for in-flight job side-effects
//!
//! After the controller creates or deletes a job it takes a while for the
//! watch-backed read model to reflect the change. The ledger records how
//! many of the controller's own recent side-effects have not yet been
//! observed, so a sync that runs in that window can stand down instead of
//! acting twice on stale state.
//!
//! The ledger is a latency hint, not a correctness gate: every entry
//! carries a deadline past which it counts as satisfied, so a lost watch
//! event can delay progress but never block it. It lives only in process
//! memory; an empty ledger after restart is safe.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

/// Default time after which unfulfilled expectations count as satisfied
pub const EXPECTATIONS_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug)]
struct PendingOps {
    creations: i64,
    deletions: i64,
    recorded_at: Instant,
}

/// Per-owner-key ledger of unobserved create/delete side-effects.
///
/// Shared across concurrent reconciliations via `Arc`; all operations take
/// `&self` and synchronize internally.
#[derive(Debug)]
pub struct ExpectationsLedger {
    ttl: Duration,
    entries: Mutex<HashMap<String, PendingOps>>,
}

impl Default for ExpectationsLedger {
    fn default() -> Self {
        Self::new(EXPECTATIONS_TTL)
    }
}

impl ExpectationsLedger {
    /// Create a ledger whose entries expire after `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record that `n` job creations were just initiated for `key`
    pub fn expect_creations(&self, key: &str, n: i64) {
        self.record(key, n, 0);
    }

    /// Record that `n` job deletions were just initiated for `key`
    pub fn expect_deletions(&self, key: &str, n: i64) {
        self.record(key, 0, n);
    }

    fn record(&self, key: &str, creations: i64, deletions: i64) {
        let mut entries = self.entries.lock().expect("expectations lock poisoned");
        let entry = entries.entry(key.to_string()).or_insert(PendingOps {
            creations: 0,
            deletions: 0,
            recorded_at: Instant::now(),
        });
        entry.creations += creations;
        entry.deletions += deletions;
        entry.recorded_at = Instant::now();
        debug!(
            key,
            creations = entry.creations,
            deletions = entry.deletions,
            "raised expectations"
        );
    }

    /// Note that the read model exhibited a creation for `key`
    pub fn creation_observed(&self, key: &str) {
        let mut entries = self.entries.lock().expect("expectations lock poisoned");
        if let Some(entry) = entries.get_mut(key) {
            entry.creations -= 1;
        }
    }

    /// Note that the read model exhibited a deletion for `key`
    pub fn deletion_observed(&self, key: &str) {
        let mut entries = self.entries.lock().expect("expectations lock poisoned");
        if let Some(entry) = entries.get_mut(key) {
            entry.deletions -= 1;
        }
    }

    /// True iff the next observation of the world can be trusted: no entry,
    /// all recorded side-effects observed, or the entry is past its deadline.
    pub fn satisfied(&self, key: &str) -> bool {
        let entries = self.entries.lock().expect("expectations lock poisoned");
        match entries.get(key) {
            None => true,
            Some(entry) if entry.creations <= 0 && entry.deletions <= 0 => true,
            Some(entry) if entry.recorded_at.elapsed() > self.ttl => {
                debug!(key, "expectations expired, treating as satisfied");
                true
            }
            Some(_) => false,
        }
    }

    /// Drop all state for `key`; called when the owner is deleted
    pub fn delete(&self, key: &str) {
        let mut entries = self.entries.lock().expect("expectations lock poisoned");
        entries.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const KEY: &str = "default/prod";

    #[test]
    fn empty_ledger_is_satisfied() {
        let ledger = ExpectationsLedger::default();
        assert!(ledger.satisfied(KEY));
    }

    #[test]
    fn pending_creation_blocks_until_observed() {
        let ledger = ExpectationsLedger::default();
        ledger.expect_creations(KEY, 1);
        assert!(!ledger.satisfied(KEY));
        ledger.creation_observed(KEY);
        assert!(ledger.satisfied(KEY));
    }

    #[test]
    fn pending_deletions_accumulate() {
        let ledger = ExpectationsLedger::default();
        ledger.expect_deletions(KEY, 1);
        ledger.expect_deletions(KEY, 1);
        ledger.deletion_observed(KEY);
        assert!(!ledger.satisfied(KEY));
        ledger.deletion_observed(KEY);
        assert!(ledger.satisfied(KEY));
    }

    #[test]
    fn creations_and_deletions_are_tracked_separately() {
        let ledger = ExpectationsLedger::default();
        ledger.expect_creations(KEY, 1);
        ledger.expect_deletions(KEY, 1);
        ledger.creation_observed(KEY);
        assert!(!ledger.satisfied(KEY));
        ledger.deletion_observed(KEY);
        assert!(ledger.satisfied(KEY));
    }

    #[test]
    fn observations_for_unknown_keys_are_ignored() {
        let ledger = ExpectationsLedger::default();
        ledger.creation_observed("default/other");
        assert!(ledger.satisfied("default/other"));
    }

    #[test]
    fn extra_observations_keep_entry_satisfied() {
        let ledger = ExpectationsLedger::default();
        ledger.expect_creations(KEY, 1);
        ledger.creation_observed(KEY);
        ledger.creation_observed(KEY);
        assert!(ledger.satisfied(KEY));
    }

    #[test]
    fn expired_entries_count_as_satisfied() {
        let ledger = ExpectationsLedger::new(Duration::ZERO);
        ledger.expect_creations(KEY, 3);
        std::thread::sleep(Duration::from_millis(5));
        assert!(ledger.satisfied(KEY));
    }

    #[test]
    fn new_expectations_reset_the_deadline() {
        let ledger = ExpectationsLedger::new(Duration::from_secs(60));
        ledger.expect_creations(KEY, 1);
        ledger.expect_deletions(KEY, 1);
        assert!(!ledger.satisfied(KEY));
    }

    #[test]
    fn delete_drops_all_state_for_key() {
        let ledger = ExpectationsLedger::default();
        ledger.expect_creations(KEY, 5);
        ledger.delete(KEY);
        assert!(ledger.satisfied(KEY));
    }

    #[test]
    fn keys_are_independent() {
        let ledger = ExpectationsLedger::default();
        ledger.expect_creations("default/a", 1);
        assert!(!ledger.satisfied("default/a"));
        assert!(ledger.satisfied("default/b"));
    }

    #[test]
    fn concurrent_callers_do_not_lose_observations() {
        let ledger = Arc::new(ExpectationsLedger::default());
        ledger.expect_creations(KEY, 64);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || {
                    for _ in 0..8 {
                        ledger.creation_observed(KEY);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(ledger.satisfied(KEY));
    }
}
