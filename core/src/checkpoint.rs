use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Current wall clock time in milliseconds since the unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Progress marker of a sync scope.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Highest block already scanned, inclusive. Zero when nothing was scanned.
    pub last_checked_block: u64,
    /// Time of the last successful fetch in milliseconds, zero when never fetched.
    pub last_fetch_time: i64,
}

impl Checkpoint {
    /// Record that every block up to `block` was scanned at `now`.
    ///
    /// The block height never moves backwards; a lower height only refreshes the fetch time.
    /// Returns true when the height advanced.
    pub fn advance(&mut self, block: u64, now: i64) -> bool {
        self.last_fetch_time = now;
        if block > self.last_checked_block {
            self.last_checked_block = block;
            true
        } else {
            false
        }
    }

    /// True when the last fetch is older than `threshold`, or there never was one.
    pub fn is_stale(&self, now: i64, threshold: Duration) -> bool {
        if self.last_fetch_time == 0 {
            return true;
        }
        now.saturating_sub(self.last_fetch_time) > threshold.as_millis() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_is_monotonic() {
        let mut cp = Checkpoint::default();
        assert!(cp.advance(100, 1));
        assert!(!cp.advance(50, 2));
        assert_eq!(cp.last_checked_block, 100);
        assert_eq!(cp.last_fetch_time, 2);
    }

    #[test]
    fn staleness() {
        let threshold = Duration::from_secs(300);
        let mut cp = Checkpoint::default();
        assert!(cp.is_stale(10, threshold));
        cp.advance(1, 1_000);
        assert!(!cp.is_stale(1_000 + 300_000, threshold));
        assert!(cp.is_stale(1_000 + 300_001, threshold));
    }
}
