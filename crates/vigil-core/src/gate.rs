//! Cooldown gate for operator-triggered refreshes.

use crate::entry::CacheEntry;
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};

/// Rate limiter for manual refreshes of a single cache.
///
/// Automatic, policy-driven refreshes never consult the gate.
#[derive(Debug, Clone, Copy)]
pub struct RefreshGate {
    cooldown: Duration,
}

impl RefreshGate {
    pub fn new(cooldown: Duration) -> Self {
        Self { cooldown }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn can_manual_refresh(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        match entry.cooldown_until {
            None => true,
            Some(until) => until <= now,
        }
    }

    /// Whole minutes left in the cooldown, rounded up; 0 when open.
    pub fn minutes_remaining(&self, entry: &CacheEntry, now: DateTime<Utc>) -> i64 {
        match entry.cooldown_until {
            Some(until) if until > now => {
                let secs = (until - now).num_seconds();
                (secs + 59) / 60
            }
            _ => 0,
        }
    }

    /// `Ok` when a manual refresh may proceed, `CooldownActive` otherwise.
    pub fn check(&self, entry: &CacheEntry, now: DateTime<Utc>) -> Result<()> {
        if self.can_manual_refresh(entry, now) {
            Ok(())
        } else {
            Err(Error::CooldownActive {
                name: entry.name.clone(),
                minutes_remaining: self.minutes_remaining(entry, now).max(1),
            })
        }
    }

    /// The `cooldown_until` a granted refresh at `now` installs.
    pub fn record_manual_refresh(&self, entry: &mut CacheEntry, now: DateTime<Utc>) -> DateTime<Utc> {
        let until = self.next_cooldown(now);
        entry.cooldown_until = Some(until);
        until
    }

    pub fn next_cooldown(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.cooldown
    }
}
