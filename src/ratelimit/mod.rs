//! Per-client token-bucket admission control.
//!
//! One [`Visitor`] per client key, all behind a single mutex. Buckets start
//! full, refill continuously and are dropped once idle; a dropped visitor
//! and a never-seen one take the same path on the next request.

use crate::clock::Clock;
use crate::config::RateLimitConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Fallback cap on distinct visitors when config asks for zero.
pub const DEFAULT_MAX_VISITORS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Visitor {
    pub tokens: f64,
    pub last_refill: Instant,
    pub last_seen: Instant,
}

impl Visitor {
    fn full(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
            last_seen: now,
        }
    }

    fn refill(&mut self, capacity: f64, per_second: f64, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * per_second).min(capacity);
        self.last_refill = now;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// Rejected; `retry_after` is when the next token will be available.
    Denied { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

pub struct RateLimiter {
    capacity: u32,
    refill_per_second: f64,
    idle: Duration,
    max_visitors: usize,
    clock: Arc<dyn Clock>,
    visitors: Mutex<HashMap<String, Visitor>>,
}

impl RateLimiter {
    pub fn new(
        capacity: u32,
        refill_per_second: f64,
        idle: Duration,
        max_visitors: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            capacity,
            refill_per_second,
            idle,
            max_visitors: normalize_max_visitors(max_visitors),
            clock,
            visitors: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            config.capacity,
            config.refill_per_second,
            Duration::from_secs(config.idle_secs),
            config.max_visitors,
            clock,
        )
    }

    /// `false` when capacity is zero and every request is admitted.
    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    pub fn admit(&self, client: &str) -> Admission {
        if !self.is_enabled() {
            return Admission::Allowed;
        }

        let now = self.clock.now();
        let capacity = f64::from(self.capacity);
        let mut visitors = self.visitors.lock();

        if !visitors.contains_key(client) && visitors.len() >= self.max_visitors {
            self.make_room(&mut visitors, now);
        }

        let visitor = visitors
            .entry(client.to_owned())
            .or_insert_with(|| Visitor::full(capacity, now));
        visitor.refill(capacity, self.refill_per_second, now);
        visitor.last_seen = now;

        if visitor.tokens >= 1.0 {
            visitor.tokens -= 1.0;
            return Admission::Allowed;
        }

        Admission::Denied {
            retry_after: self.time_until_token(visitor.tokens),
        }
    }

    /// Drop every visitor idle for longer than the threshold. Returns how
    /// many were removed.
    pub fn sweep_idle(&self) -> usize {
        let now = self.clock.now();
        let mut visitors = self.visitors.lock();
        let before = visitors.len();
        visitors.retain(|_, v| now.saturating_duration_since(v.last_seen) <= self.idle);
        before - visitors.len()
    }

    pub fn len(&self) -> usize {
        self.visitors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn visitor(&self, client: &str) -> Option<Visitor> {
        self.visitors.lock().get(client).copied()
    }

    fn make_room(&self, visitors: &mut HashMap<String, Visitor>, now: Instant) {
        visitors.retain(|_, v| now.saturating_duration_since(v.last_seen) <= self.idle);
        if visitors.len() < self.max_visitors {
            return;
        }
        let oldest = visitors
            .iter()
            .min_by_key(|(_, v)| v.last_seen)
            .map(|(k, _)| k.clone());
        if let Some(key) = oldest {
            visitors.remove(&key);
        }
    }

    fn time_until_token(&self, tokens: f64) -> Duration {
        if self.refill_per_second <= 0.0 {
            return Duration::MAX;
        }
        let secs = ((1.0 - tokens) / self.refill_per_second).max(0.0);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

fn normalize_max_visitors(configured: usize) -> usize {
    if configured == 0 {
        DEFAULT_MAX_VISITORS
    } else {
        configured
    }
}
