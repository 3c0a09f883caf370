//! Per-recipient send rate limiting
//!
//! One cooldown per destination number. The check-then-set is atomic: a send
//! reserves its slot under the map's per-entry lock before the gateway is
//! contacted, so two concurrent sends to the same number cannot both pass the
//! check. A failed gateway call rolls its reservation back, leaving the
//! cooldown unconsumed.
//!
//! The in-process map is only correct for a single-instance deployment;
//! multi-instance deployments need the same reserve semantics on an external
//! atomic store.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Minimum interval between outbound sends to the same number.
pub const DEFAULT_SEND_COOLDOWN: Duration = Duration::from_secs(10 * 60);

/// A claimed send slot. Hand it back via `rollback` if the send fails so the
/// recipient is not locked out by an attempt that never went through.
#[derive(Debug)]
pub struct SendReservation {
    number: String,
    previous: Option<Instant>,
}

/// Injected rate-limiter interface for the dispatcher.
pub trait RateLimiterLike: Send + Sync {
    /// Atomically claim the send slot for `number`. Returns the remaining
    /// cooldown when the number is still cooling down.
    fn try_reserve(&self, number: &str) -> Result<SendReservation, Duration>;

    /// Claim the slot without consulting the cooldown (administrative or
    /// flow-critical sends). Still stamps the entry on success.
    fn reserve_bypassing(&self, number: &str) -> SendReservation;

    /// Undo a reservation after a failed send.
    fn rollback(&self, reservation: SendReservation);

    /// Cooldown left for a number, for UI/diagnostic use.
    fn time_remaining(&self, number: &str) -> Option<Duration>;

    /// Administrative override: forget the number entirely.
    fn clear(&self, number: &str);
}

/// In-process limiter backed by a concurrent map keyed by phone number.
pub struct InMemoryRateLimiter {
    entries: DashMap<String, Instant>,
    cooldown: Duration,
}

impl InMemoryRateLimiter {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            cooldown,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}

impl Default for InMemoryRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_COOLDOWN)
    }
}

impl RateLimiterLike for InMemoryRateLimiter {
    fn try_reserve(&self, number: &str) -> Result<SendReservation, Duration> {
        // The entry guard holds the shard lock, making check-then-set atomic
        // per number.
        match self.entries.entry(number.to_string()) {
            Entry::Occupied(mut occupied) => {
                let elapsed = occupied.get().elapsed();
                if elapsed < self.cooldown {
                    return Err(self.cooldown - elapsed);
                }
                let previous = occupied.insert(Instant::now());
                Ok(SendReservation {
                    number: number.to_string(),
                    previous: Some(previous),
                })
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Instant::now());
                Ok(SendReservation {
                    number: number.to_string(),
                    previous: None,
                })
            }
        }
    }

    fn reserve_bypassing(&self, number: &str) -> SendReservation {
        let previous = self.entries.insert(number.to_string(), Instant::now());
        SendReservation {
            number: number.to_string(),
            previous,
        }
    }

    fn rollback(&self, reservation: SendReservation) {
        match reservation.previous {
            Some(previous) => {
                self.entries.insert(reservation.number, previous);
            }
            None => {
                self.entries.remove(&reservation.number);
            }
        }
    }

    fn time_remaining(&self, number: &str) -> Option<Duration> {
        let last = self.entries.get(number)?;
        let elapsed = last.elapsed();
        if elapsed < self.cooldown {
            Some(self.cooldown - elapsed)
        } else {
            None
        }
    }

    fn clear(&self, number: &str) {
        self.entries.remove(number);
    }
}
