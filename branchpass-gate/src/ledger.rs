//! Replay detection for handoff nonces.
//!
//! The ledger is process local. A handoff token is only ever redeemed by the
//! one instance it names, so per-instance single use is the guarantee.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum NonceError {
    #[error("nonce has already been consumed")]
    Replayed,
    #[error("nonce ledger is at capacity")]
    Saturated,
}

pub trait NonceStore: Send + Sync {
    /// Records `nonce` as consumed. Check and record happen atomically, so of
    /// any number of concurrent calls with one nonce exactly one succeeds.
    fn consume(&self, nonce: &str, expires_at: i64, now: i64) -> Result<(), NonceError>;

    /// Drops entries whose retention ended at or before `now`. Returns how many were removed.
    fn sweep(&self, now: i64) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bounded in-memory nonce ledger.
///
/// An entry is kept until `max(expires_at, now + window)`, so a nonce is
/// remembered for at least as long as its token could still verify.
pub struct InMemoryNonceLedger {
    entries: Mutex<HashMap<String, i64>>,
    capacity: usize,
    window: i64,
}

impl InMemoryNonceLedger {
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of remembered nonces
    /// * `window` - Minimum retention in seconds; at least the handoff TTL
    pub fn new(capacity: usize, window: i64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity,
            window,
        }
    }
}

impl NonceStore for InMemoryNonceLedger {
    fn consume(&self, nonce: &str, expires_at: i64, now: i64) -> Result<(), NonceError> {
        let mut entries = self.entries.lock();

        if entries.contains_key(nonce) {
            return Err(NonceError::Replayed);
        }

        if entries.len() >= self.capacity {
            entries.retain(|_, evict_after| *evict_after > now);
            if entries.len() >= self.capacity {
                warn!(
                    capacity = self.capacity,
                    "nonce ledger full, refusing redemption"
                );
                return Err(NonceError::Saturated);
            }
        }

        entries.insert(nonce.to_string(), expires_at.max(now + self.window));
        Ok(())
    }

    fn sweep(&self, now: i64) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, evict_after| *evict_after > now);
        before - entries.len()
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Spawns a task that sweeps `store` every `every`.
pub fn spawn_sweeper(store: Arc<dyn NonceStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let removed = store.sweep(Utc::now().timestamp());
            if removed > 0 {
                debug!(removed, remaining = store.len(), "swept nonce ledger");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_second_consume_is_replay() {
        let ledger = InMemoryNonceLedger::new(10, 30);
        assert_eq!(ledger.consume("n1", 1_030, 1_000), Ok(()));
        assert_eq!(
            ledger.consume("n1", 1_030, 1_001),
            Err(NonceError::Replayed)
        );
        assert_eq!(ledger.consume("n2", 1_030, 1_001), Ok(()));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_concurrent_consume_has_one_winner() {
        let ledger = Arc::new(InMemoryNonceLedger::new(100, 30));
        let wins = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ledger = ledger.clone();
                let wins = wins.clone();
                thread::spawn(move || {
                    if ledger.consume("shared", 1_030, 1_000).is_ok() {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_sweep_removes_only_retired_entries() {
        let ledger = InMemoryNonceLedger::new(10, 30);
        // Retained until max(1_010, 1_030) = 1_030.
        ledger.consume("short", 1_010, 1_000).unwrap();
        // Retained until max(1_100, 1_030) = 1_100.
        ledger.consume("long", 1_100, 1_000).unwrap();

        assert_eq!(ledger.sweep(1_029), 0);
        assert_eq!(ledger.sweep(1_030), 1);
        assert_eq!(ledger.len(), 1);
        assert_eq!(
            ledger.consume("long", 1_100, 1_050),
            Err(NonceError::Replayed)
        );
        assert_eq!(ledger.sweep(1_100), 1);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_full_ledger_sweeps_then_saturates() {
        let ledger = InMemoryNonceLedger::new(2, 30);
        ledger.consume("a", 1_030, 1_000).unwrap();
        ledger.consume("b", 1_030, 1_000).unwrap();

        assert_eq!(
            ledger.consume("c", 1_040, 1_010),
            Err(NonceError::Saturated)
        );

        // Both earlier entries have retired by now, so room is made.
        assert_eq!(ledger.consume("c", 1_070, 1_040), Ok(()));
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn test_sweeper_task_clears_retired_entries() {
        let ledger = Arc::new(InMemoryNonceLedger::new(10, 1));
        let past = Utc::now().timestamp() - 100;
        ledger.consume("old", past, past).unwrap();
        assert_eq!(ledger.len(), 1);

        let handle = spawn_sweeper(ledger.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        assert!(ledger.is_empty());
    }
}
