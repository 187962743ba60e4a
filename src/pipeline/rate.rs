//! Post-rate budgeting.
//!
//! Two caps gate publishing independently:
//! - the hourly cap, tracked by a sliding [`RateWindow`]
//! - the interval cap, a per-cycle share of the hourly cap

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Hourly post counter with a sliding reset.
///
/// The counter resets the first time it is consulted at or after `resets_at`,
/// and the next reset is scheduled one hour after that moment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateWindow {
    pub count: u32,
    pub resets_at: DateTime<Utc>,
}

impl RateWindow {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            resets_at: now + Self::length(),
        }
    }

    fn length() -> Duration {
        Duration::hours(1)
    }

    fn roll(&mut self, now: DateTime<Utc>) {
        if now >= self.resets_at {
            log::debug!("Rate window elapsed after {} posts, resetting", self.count);
            self.count = 0;
            self.resets_at = now + Self::length();
        }
    }

    /// Whether another post fits in the window at `now`.
    pub fn has_capacity(&mut self, now: DateTime<Utc>, max_per_hour: u32) -> bool {
        self.roll(now);
        self.count < max_per_hour
    }

    /// Claim a slot. Returns `false` once the hourly cap is reached.
    pub fn try_acquire(&mut self, now: DateTime<Utc>, max_per_hour: u32) -> bool {
        if !self.has_capacity(now, max_per_hour) {
            return false;
        }
        self.count += 1;
        true
    }

    /// Give back a slot claimed for a post that never went out.
    pub fn release(&mut self) {
        self.count = self.count.saturating_sub(1);
    }
}

/// Per-cycle cap: the hourly cap split evenly across the polls in an hour,
/// rounded down and never below one. Polls per hour may be fractional.
pub fn max_posts_per_interval(max_posts_per_hour: u32, poll_interval_minutes: u64) -> usize {
    let interval = poll_interval_minutes.max(1) as f64;
    let share = f64::from(max_posts_per_hour) * interval / 60.0;
    (share.floor() as usize).max(1)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_interval_cap() {
        assert_eq!(max_posts_per_interval(30, 10), 5);
        assert_eq!(max_posts_per_interval(1, 60), 1);
        assert_eq!(max_posts_per_interval(60, 15), 15);
        assert_eq!(max_posts_per_interval(3, 10), 1);
        assert_eq!(max_posts_per_interval(10, 120), 20);
    }

    #[test]
    fn test_interval_cap_with_uneven_interval() {
        assert_eq!(max_posts_per_interval(10, 25), 4);
        assert_eq!(max_posts_per_interval(30, 45), 22);
        assert_eq!(max_posts_per_interval(1, 45), 1);
    }

    #[test]
    fn test_window_refuses_beyond_cap() {
        let now = start();
        let mut window = RateWindow::new(now);
        let results: Vec<bool> = (0..3)
            .map(|i| window.try_acquire(now + Duration::minutes(i), 2))
            .collect();
        assert_eq!(results, vec![true, true, false]);
    }

    #[test]
    fn test_window_resets_after_hour() {
        let now = start();
        let mut window = RateWindow::new(now);
        assert!(window.try_acquire(now, 2));
        assert!(window.try_acquire(now, 2));
        assert!(!window.try_acquire(now + Duration::minutes(59), 2));

        let later = now + Duration::hours(1);
        assert!(window.try_acquire(later, 2));
        assert_eq!(window.count, 1);
        assert_eq!(window.resets_at, later + Duration::hours(1));
    }

    #[test]
    fn test_reset_is_sliding() {
        let now = start();
        let mut window = RateWindow::new(now);
        let late = now + Duration::minutes(95);
        assert!(window.try_acquire(late, 1));
        assert_eq!(window.resets_at, late + Duration::hours(1));
        assert!(!window.try_acquire(late + Duration::minutes(30), 1));
    }

    #[test]
    fn test_release() {
        let now = start();
        let mut window = RateWindow::new(now);
        assert!(window.try_acquire(now, 1));
        window.release();
        assert!(window.try_acquire(now, 1));
        window.release();
        window.release();
        assert_eq!(window.count, 0);
    }
}
