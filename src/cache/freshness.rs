// Decides whether a cached listing can stand in for a network fetch.

use std::time::{Duration, Instant};

use super::ProgrammeListing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    forced_refresh_min_age_minutes: i64,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self::new(30)
    }
}

impl RefreshPolicy {
    pub fn new(forced_refresh_min_age_minutes: i64) -> Self {
        Self {
            forced_refresh_min_age_minutes,
        }
    }

    /// A listing is usable when it has programmes and either no refresh was
    /// forced or it is younger than the forced-refresh threshold. Repeated
    /// manual refreshes within the threshold are served from cache.
    pub fn listing_is_usable(&self, cached: Option<&ProgrammeListing>, force: bool) -> bool {
        match cached {
            Some(listing) if !listing.programmes.is_empty() => {
                !force || listing.age_minutes() < self.forced_refresh_min_age_minutes
            }
            _ => false,
        }
    }

    pub fn should_fetch_programmes(&self, cached: Option<&ProgrammeListing>, force: bool) -> bool {
        !self.listing_is_usable(cached, force)
    }

    /// The channel list carries no timestamp, so any refresh goes to the network.
    pub fn should_fetch_channels(&self, cached_found: bool, force: bool) -> bool {
        !cached_found || force
    }
}

/// Drops manual refresh requests that follow the previous one too closely.
#[derive(Debug)]
pub struct RefreshThrottle {
    min_interval: Duration,
    last_accepted: Option<Instant>,
}

impl Default for RefreshThrottle {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

impl RefreshThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_accepted: None,
        }
    }

    pub fn try_acquire(&mut self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    pub fn try_acquire_at(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_accepted {
            if now.saturating_duration_since(last) < self.min_interval {
                return false;
            }
        }
        self.last_accepted = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Programme;
    use chrono::{NaiveDate, Utc};

    fn listing_aged(minutes: i64, programmes: usize) -> ProgrammeListing {
        let start = NaiveDate::from_ymd_opt(2026, 10, 16)
            .unwrap()
            .and_hms_opt(18, 0, 0)
            .unwrap();
        ProgrammeListing {
            updated_at: Utc::now() - chrono::Duration::minutes(minutes),
            expires_at: None,
            programmes: (0..programmes)
                .map(|i| Programme {
                    id: i as i64,
                    channel_id: 1,
                    title: format!("Ohjelma {}", i),
                    description: String::new(),
                    start_time: start,
                    end_time: start,
                    flags: 0,
                })
                .collect(),
        }
    }

    #[test]
    fn forced_refresh_of_stale_listing_fetches() {
        let policy = RefreshPolicy::default();
        assert!(policy.should_fetch_programmes(Some(&listing_aged(40, 2)), true));
    }

    #[test]
    fn forced_refresh_of_recent_listing_uses_cache() {
        let policy = RefreshPolicy::default();
        assert!(!policy.should_fetch_programmes(Some(&listing_aged(10, 2)), true));
    }

    #[test]
    fn unforced_load_uses_any_cached_listing() {
        let policy = RefreshPolicy::default();
        assert!(!policy.should_fetch_programmes(Some(&listing_aged(600, 1)), false));
    }

    #[test]
    fn empty_or_missing_listing_always_fetches() {
        let policy = RefreshPolicy::default();
        assert!(policy.should_fetch_programmes(None, false));
        assert!(policy.should_fetch_programmes(Some(&listing_aged(0, 0)), false));
    }

    #[test]
    fn channels_fetch_on_miss_or_force() {
        let policy = RefreshPolicy::default();
        assert!(policy.should_fetch_channels(false, false));
        assert!(policy.should_fetch_channels(true, true));
        assert!(!policy.should_fetch_channels(true, false));
    }

    #[test]
    fn throttle_rejects_requests_inside_interval() {
        let mut throttle = RefreshThrottle::default();
        let start = Instant::now();

        assert!(throttle.try_acquire_at(start));
        assert!(!throttle.try_acquire_at(start + Duration::from_secs(1)));
        assert!(throttle.try_acquire_at(start + Duration::from_secs(3)));
    }
}
