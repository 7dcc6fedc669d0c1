//! Fixed-window rate limiting keyed by client identity and route
//!
//! Each `(identity, route)` pair owns one counter. A counter admits up to
//! `max_requests` hits per window; the window restarts on the first hit
//! after it has elapsed. Check-and-increment runs under the map shard lock
//! for that key, so concurrent requests for the same key never over-admit
//! while unrelated keys proceed in parallel.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::auth::ClientIdentity;
use crate::config::RateLimitConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::routes::{RateLimitDescriptor, RouteRule};

/// Counter key: who is calling which route
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub identity: ClientIdentity,
    pub route: String,
}

impl RateLimitKey {
    #[must_use] pub fn new(identity: ClientIdentity, route: &str) -> Self {
        Self {
            identity,
            route: route.to_string(),
        }
    }
}

/// Outcome of one check-and-increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Hits recorded in the current window, including this one
    pub count: u64,
    pub limit: u64,
    /// Time until the current window closes
    pub retry_after: Duration,
}

impl RateLimitDecision {
    #[must_use] pub const fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.count)
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    window_start: Instant,
    count: u64,
    last_seen: Instant,
}

impl WindowCounter {
    const fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            count: 0,
            last_seen: now,
        }
    }

    fn hit(&mut self, descriptor: RateLimitDescriptor, now: Instant) -> RateLimitDecision {
        if now.saturating_duration_since(self.window_start) >= descriptor.window {
            self.window_start = now;
            self.count = 0;
        }
        // Rejected hits still count toward the window
        self.count = self.count.saturating_add(1);
        self.last_seen = now;

        let elapsed = now.saturating_duration_since(self.window_start);
        RateLimitDecision {
            allowed: self.count <= descriptor.max_requests,
            count: self.count,
            limit: descriptor.max_requests,
            retry_after: descriptor.window.saturating_sub(elapsed),
        }
    }
}

/// Storage for window counters
#[async_trait]
pub trait RateLimiterStore: Send + Sync {
    /// Atomically advance the counter for `key` and report the decision
    async fn check_and_increment(
        &self,
        key: &RateLimitKey,
        descriptor: RateLimitDescriptor,
        now: Instant,
    ) -> RateLimitDecision;

    /// Drop counters untouched for at least `idle_for`; returns how many were removed
    async fn evict_idle(&self, idle_for: Duration, now: Instant) -> usize;

    /// Number of tracked keys
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local counter store
#[derive(Debug, Default)]
pub struct InMemoryStore {
    counters: DashMap<RateLimitKey, WindowCounter>,
}

impl InMemoryStore {
    #[must_use] pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimiterStore for InMemoryStore {
    async fn check_and_increment(
        &self,
        key: &RateLimitKey,
        descriptor: RateLimitDescriptor,
        now: Instant,
    ) -> RateLimitDecision {
        // Existing keys avoid cloning the key
        if let Some(mut counter) = self.counters.get_mut(key) {
            return counter.hit(descriptor, now);
        }
        self.counters
            .entry(key.clone())
            .or_insert_with(|| WindowCounter::new(now))
            .hit(descriptor, now)
    }

    async fn evict_idle(&self, idle_for: Duration, now: Instant) -> usize {
        let mut removed = 0;
        self.counters.retain(|_, counter| {
            let keep = now.saturating_duration_since(counter.last_seen) < idle_for;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    fn len(&self) -> usize {
        self.counters.len()
    }
}

/// Rate limiter for the API Gateway
pub struct RateLimiter {
    store: Arc<dyn RateLimiterStore>,
    enabled: bool,
    idle_expiry: Duration,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("enabled", &self.enabled)
            .field("idle_expiry", &self.idle_expiry)
            .field("tracked_keys", &self.store.len())
            .finish()
    }
}

impl RateLimiter {
    /// Create a limiter backed by the in-memory store
    #[must_use] pub fn new(config: &RateLimitConfig) -> Self {
        Self::with_store(config, Arc::new(InMemoryStore::new()))
    }

    #[must_use] pub fn with_store(config: &RateLimitConfig, store: Arc<dyn RateLimiterStore>) -> Self {
        Self {
            store,
            enabled: config.enabled,
            idle_expiry: Duration::from_secs(config.idle_expiry_seconds),
        }
    }

    #[must_use] pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Count a request against the rule's quota
    pub async fn check(
        &self,
        identity: &ClientIdentity,
        rule: &RouteRule,
    ) -> GatewayResult<RateLimitDecision> {
        self.check_at(identity, rule, Instant::now()).await
    }

    /// [`Self::check`] with an explicit clock reading
    pub async fn check_at(
        &self,
        identity: &ClientIdentity,
        rule: &RouteRule,
        now: Instant,
    ) -> GatewayResult<RateLimitDecision> {
        if !self.enabled {
            return Ok(RateLimitDecision {
                allowed: true,
                count: 0,
                limit: rule.limit.max_requests,
                retry_after: Duration::ZERO,
            });
        }

        let key = RateLimitKey::new(identity.clone(), &rule.name);
        let decision = self.store.check_and_increment(&key, rule.limit, now).await;

        if decision.allowed {
            debug!(
                identity = %identity,
                route = %rule.name,
                count = decision.count,
                limit = decision.limit,
                "Rate limit check passed"
            );
            Ok(decision)
        } else {
            warn!(
                identity = %identity,
                route = %rule.name,
                limit = %rule.limit,
                retry_after_ms = decision.retry_after.as_millis(),
                "Rate limit exceeded"
            );
            Err(GatewayError::QuotaExceeded {
                route: rule.name.clone(),
                limit: rule.limit.max_requests,
                window: rule.limit.window,
                retry_after: decision.retry_after,
            })
        }
    }

    /// Evict counters idle for longer than the configured expiry
    pub async fn cleanup_idle(&self) -> usize {
        self.cleanup_idle_at(Instant::now()).await
    }

    pub async fn cleanup_idle_at(&self, now: Instant) -> usize {
        let removed = self.store.evict_idle(self.idle_expiry, now).await;
        if removed > 0 {
            debug!(removed, remaining = self.store.len(), "Evicted idle rate limit counters");
        }
        removed
    }

    /// Get current rate limiting statistics
    #[must_use] pub fn stats(&self) -> RateLimitStats {
        RateLimitStats {
            enabled: self.enabled,
            tracked_keys: self.store.len(),
            idle_expiry_seconds: self.idle_expiry.as_secs(),
        }
    }
}

/// Rate limiting statistics
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStats {
    pub enabled: bool,
    pub tracked_keys: usize,
    pub idle_expiry_seconds: u64,
}
