//! Core rate limiter implementation.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::clock::{Clock, SystemClock};
use super::entry::{EntryKey, RateLimitEntry};
use super::memory::MemoryStore;
use super::policy::{Policy, PolicySet};
use super::store::{EntryStore, StoreResult};
use crate::error::{Result, TollgateError};

/// Outcome of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub admitted: bool,
    /// Admissions left in the current window after this call
    pub remaining: u32,
    /// The policy's `max_attempts`
    pub limit: u32,
    /// When the current window closes
    pub reset_at: DateTime<Utc>,
}

impl Decision {
    /// Decision returned when the store failed: admit, report no budget left.
    fn fail_open(policy: &Policy, now: DateTime<Utc>) -> Self {
        Self {
            admitted: true,
            remaining: 0,
            limit: policy.max_attempts(),
            reset_at: now + policy.window_delta(),
        }
    }

    /// Time left until the window closes.
    pub fn retry_after(&self, now: DateTime<Utc>) -> Duration {
        (self.reset_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Retry-after hint in whole seconds, rounded up.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let wait = self.retry_after(now);
        wait.as_secs() + u64::from(wait.subsec_nanos() > 0)
    }
}

/// Read-only view of one key's current window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Usage {
    /// Requests counted in the open window
    pub used: u32,
    /// The policy's `max_attempts`
    pub limit: u32,
    /// Admissions left in the open window
    pub remaining: u32,
    /// When the open window closes, if one is open
    pub reset_at: Option<DateTime<Utc>>,
}

/// The fixed-window rate limiter.
///
/// This struct is thread-safe and can be shared across tasks behind an `Arc`.
/// Each check is a plain read-modify-write against the store: concurrent
/// checks for the same key may both read the same count.
pub struct RateLimiter {
    store: Arc<dyn EntryStore>,
    clock: Arc<dyn Clock>,
    policies: RwLock<PolicySet>,
}

impl RateLimiter {
    /// Create a limiter over an in-memory store with built-in policies.
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), Arc::new(SystemClock))
    }

    /// Create a limiter over the given store and clock with built-in policies.
    pub fn with_store(store: Arc<dyn EntryStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            policies: RwLock::new(PolicySet::builtin()),
        }
    }

    /// Replace the named policies.
    pub fn set_policies(&self, policies: PolicySet) {
        *self.policies.write() = policies;
    }

    /// Get the current named policies.
    pub fn policies(&self) -> PolicySet {
        self.policies.read().clone()
    }

    /// Current time according to the limiter's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Count a request and decide whether it may proceed.
    ///
    /// Fails only when `max_attempts` or `window_secs` is zero. Store failures
    /// admit the request.
    pub async fn check(
        &self,
        scope: &str,
        identifier: &str,
        max_attempts: u32,
        window_secs: u64,
    ) -> Result<Decision> {
        let policy = Policy::new(max_attempts, window_secs)?;
        Ok(self.check_with(scope, identifier, &policy).await)
    }

    /// Count a request against a validated policy.
    pub async fn check_with(&self, scope: &str, identifier: &str, policy: &Policy) -> Decision {
        let key = EntryKey::new(scope, identifier);
        self.check_key(&key, policy).await
    }

    /// Count a request against several tiers checked in order.
    ///
    /// Each tier is kept under its own key. The first denying tier ends the
    /// check, so later tiers are not charged for a request that was refused.
    /// When every tier admits, the decision with the least budget left wins.
    pub async fn check_tiered(
        &self,
        scope: &str,
        identifier: &str,
        tiers: &[Policy],
    ) -> Decision {
        let mut tightest: Option<Decision> = None;

        for tier in tiers {
            let key = EntryKey::tiered(scope, tier.label(), identifier);
            let decision = self.check_key(&key, tier).await;

            if !decision.admitted {
                return decision;
            }

            tightest = match tightest {
                Some(current) if current.remaining <= decision.remaining => Some(current),
                _ => Some(decision),
            };
        }

        tightest.unwrap_or_else(|| Decision {
            admitted: true,
            remaining: 0,
            limit: 0,
            reset_at: self.clock.now(),
        })
    }

    /// Count a request against the scope's configured policies.
    pub async fn check_named(&self, scope: &str, identifier: &str) -> Result<Decision> {
        let policies = self.resolve(scope)?;
        match policies.as_slice() {
            [single] => Ok(self.check_with(scope, identifier, single).await),
            tiers => Ok(self.check_tiered(scope, identifier, tiers).await),
        }
    }

    /// Report a key's current window without counting.
    pub async fn usage(&self, scope: &str, identifier: &str, policy: &Policy) -> Result<Usage> {
        let key = EntryKey::new(scope, identifier);
        Ok(self.usage_key(&key, policy).await?)
    }

    /// Report every tier of the scope's configured policies.
    pub async fn usage_named(&self, scope: &str, identifier: &str) -> Result<Vec<(String, Usage)>> {
        let policies = self.resolve(scope)?;
        let mut report = Vec::with_capacity(policies.len());

        for (key, policy) in scoped_keys(scope, identifier, &policies) {
            let usage = self.usage_key(&key, policy).await?;
            report.push((policy.label(), usage));
        }

        Ok(report)
    }

    /// Drop the entry for a key.
    pub async fn reset(&self, scope: &str, identifier: &str) -> Result<()> {
        let key = EntryKey::new(scope, identifier);
        self.store.delete(&key).await?;
        debug!(key = %key, "Rate limit entry reset");
        Ok(())
    }

    /// Drop every entry of the scope's configured policies.
    pub async fn reset_named(&self, scope: &str, identifier: &str) -> Result<usize> {
        let policies = self.resolve(scope)?;
        let keys = scoped_keys(scope, identifier, &policies);

        for (key, _) in &keys {
            self.store.delete(key).await?;
            debug!(key = %key, "Rate limit entry reset");
        }

        Ok(keys.len())
    }

    /// Remove every entry whose window has closed.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let removed = self.store.purge_expired(now).await?;
        if removed > 0 {
            debug!(removed = removed, "Swept expired rate limit entries");
        }
        Ok(removed)
    }

    /// Get the number of stored entries.
    pub async fn entry_count(&self) -> Result<usize> {
        Ok(self.store.len().await?)
    }

    async fn check_key(&self, key: &EntryKey, policy: &Policy) -> Decision {
        let now = self.clock.now();

        trace!(
            key = %key,
            limit = policy.max_attempts(),
            window_secs = policy.window_secs(),
            "Checking rate limit"
        );

        match self.count_hit(key, policy, now).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(
                    key = %key,
                    error = %e,
                    "Rate limit store failed, admitting request"
                );
                Decision::fail_open(policy, now)
            }
        }
    }

    async fn count_hit(
        &self,
        key: &EntryKey,
        policy: &Policy,
        now: DateTime<Utc>,
    ) -> StoreResult<Decision> {
        let mut entry = match self.store.get(key).await? {
            Some(entry) if !entry.is_expired(now) => entry,
            _ => {
                debug!(
                    key = %key,
                    limit = policy.max_attempts(),
                    window_secs = policy.window_secs(),
                    "Opening new rate limit window"
                );
                RateLimitEntry::open(now, policy.window_delta())
            }
        };

        let count = entry.record_hit();
        let admitted = count <= policy.max_attempts();
        let remaining = policy.max_attempts().saturating_sub(count);

        self.store.set(key, &entry).await?;

        if !admitted {
            debug!(
                key = %key,
                count = count,
                limit = policy.max_attempts(),
                "Rate limit exceeded"
            );
        }

        Ok(Decision {
            admitted,
            remaining,
            limit: policy.max_attempts(),
            reset_at: entry.reset_at,
        })
    }

    async fn usage_key(&self, key: &EntryKey, policy: &Policy) -> StoreResult<Usage> {
        let now = self.clock.now();
        let live = self
            .store
            .get(key)
            .await?
            .filter(|entry| !entry.is_expired(now));

        Ok(match live {
            Some(entry) => Usage {
                used: entry.count,
                limit: policy.max_attempts(),
                remaining: policy.max_attempts().saturating_sub(entry.count),
                reset_at: Some(entry.reset_at),
            },
            None => Usage {
                used: 0,
                limit: policy.max_attempts(),
                remaining: policy.max_attempts(),
                reset_at: None,
            },
        })
    }

    fn resolve(&self, scope: &str) -> Result<Vec<Policy>> {
        self.policies
            .read()
            .resolve(scope)
            .map(<[Policy]>::to_vec)
            .ok_or_else(|| TollgateError::UnknownScope(scope.to_string()))
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Keys a named check touches: the bare scope for one policy, one key per tier otherwise.
fn scoped_keys<'a>(
    scope: &str,
    identifier: &str,
    policies: &'a [Policy],
) -> Vec<(EntryKey, &'a Policy)> {
    match policies {
        [single] => vec![(EntryKey::new(scope, identifier), single)],
        tiers => tiers
            .iter()
            .map(|tier| (EntryKey::tiered(scope, tier.label(), identifier), tier))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::store::StoreError;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use tokio_test::assert_ok;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn create_test_limiter() -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let limiter = RateLimiter::with_store(Arc::new(MemoryStore::new()), clock.clone());
        (limiter, clock)
    }

    /// A store whose every operation fails.
    struct UnreachableStore;

    #[async_trait]
    impl EntryStore for UnreachableStore {
        async fn get(&self, _key: &EntryKey) -> StoreResult<Option<RateLimitEntry>> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn set(&self, _key: &EntryKey, _entry: &RateLimitEntry) -> StoreResult<()> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn delete(&self, _key: &EntryKey) -> StoreResult<()> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn purge_expired(&self, _now: DateTime<Utc>) -> StoreResult<usize> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn len(&self) -> StoreResult<usize> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    /// Reads succeed, writes fail.
    struct ReadOnlyStore(MemoryStore);

    #[async_trait]
    impl EntryStore for ReadOnlyStore {
        async fn get(&self, key: &EntryKey) -> StoreResult<Option<RateLimitEntry>> {
            self.0.get(key).await
        }

        async fn set(&self, _key: &EntryKey, _entry: &RateLimitEntry) -> StoreResult<()> {
            Err(StoreError::Unavailable("read-only replica".to_string()))
        }

        async fn delete(&self, key: &EntryKey) -> StoreResult<()> {
            self.0.delete(key).await
        }

        async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<usize> {
            self.0.purge_expired(now).await
        }

        async fn len(&self) -> StoreResult<usize> {
            self.0.len().await
        }
    }

    /// Yields between reading a value and handing it back, like a network round trip.
    struct SlowReadStore(MemoryStore);

    #[async_trait]
    impl EntryStore for SlowReadStore {
        async fn get(&self, key: &EntryKey) -> StoreResult<Option<RateLimitEntry>> {
            let entry = self.0.get(key).await?;
            tokio::task::yield_now().await;
            Ok(entry)
        }

        async fn set(&self, key: &EntryKey, entry: &RateLimitEntry) -> StoreResult<()> {
            self.0.set(key, entry).await
        }

        async fn delete(&self, key: &EntryKey) -> StoreResult<()> {
            self.0.delete(key).await
        }

        async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<usize> {
            self.0.purge_expired(now).await
        }

        async fn len(&self) -> StoreResult<usize> {
            self.0.len().await
        }
    }

    #[tokio::test]
    async fn test_rate_limiter_creation() {
        let limiter = RateLimiter::new();
        assert_eq!(limiter.entry_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_login_policy_scenario() {
        let (limiter, clock) = create_test_limiter();

        for expected_remaining in [4, 3, 2, 1, 0] {
            let decision = limiter
                .check("login", "user@example.com", 5, 900)
                .await
                .unwrap();
            assert!(decision.admitted);
            assert_eq!(decision.remaining, expected_remaining);
            assert_eq!(decision.limit, 5);
        }

        // 6th request is denied
        let decision = limiter
            .check("login", "user@example.com", 5, 900)
            .await
            .unwrap();
        assert!(!decision.admitted);
        assert_eq!(decision.remaining, 0);

        clock.advance(Duration::from_secs(901));

        let decision = limiter
            .check("login", "user@example.com", 5, 900)
            .await
            .unwrap();
        assert!(decision.admitted);
        assert_eq!(decision.remaining, 4);
    }

    #[tokio::test]
    async fn test_signup_policy_scenario() {
        let (limiter, clock) = create_test_limiter();

        for expected_remaining in [2, 1, 0] {
            let decision = limiter.check("signup", "203.0.113.7", 3, 3600).await.unwrap();
            assert!(decision.admitted);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let decision = limiter.check("signup", "203.0.113.7", 3, 3600).await.unwrap();
        assert!(!decision.admitted);
        assert_eq!(decision.remaining, 0);

        clock.advance(Duration::from_secs(3601));

        let decision = limiter.check("signup", "203.0.113.7", 3, 3600).await.unwrap();
        assert!(decision.admitted);
        assert_eq!(decision.remaining, 2);
    }

    #[tokio::test]
    async fn test_remaining_never_increases_within_window() {
        let (limiter, clock) = create_test_limiter();
        let mut previous = u32::MAX;

        for _ in 0..12 {
            let decision = limiter.check("api", "key-1", 8, 60).await.unwrap();
            assert!(decision.remaining <= previous);
            previous = decision.remaining;
            clock.advance(Duration::from_secs(1));
        }

        assert_eq!(previous, 0);
    }

    #[tokio::test]
    async fn test_denied_requests_are_counted() {
        let (limiter, _clock) = create_test_limiter();
        let policy = Policy::new(2, 60).unwrap();

        for _ in 0..5 {
            limiter.check_with("login", "a", &policy).await;
        }

        let usage = limiter.usage("login", "a", &policy).await.unwrap();
        assert_eq!(usage.used, 5);
        assert_eq!(usage.remaining, 0);
    }

    #[tokio::test]
    async fn test_window_boundary_still_counts() {
        let (limiter, clock) = create_test_limiter();

        limiter.check("login", "a", 1, 60).await.unwrap();

        // Exactly at reset_at the window is still open
        clock.advance(Duration::from_secs(60));
        let decision = limiter.check("login", "a", 1, 60).await.unwrap();
        assert!(!decision.admitted);

        clock.advance(Duration::from_millis(1));
        let decision = limiter.check("login", "a", 1, 60).await.unwrap();
        assert!(decision.admitted);
    }

    #[tokio::test]
    async fn test_reset_at_is_fixed_for_the_window() {
        let (limiter, clock) = create_test_limiter();

        let first = limiter.check("login", "a", 5, 900).await.unwrap();
        assert_eq!(first.reset_at, start() + chrono::Duration::seconds(900));

        clock.advance(Duration::from_secs(100));
        let second = limiter.check("login", "a", 5, 900).await.unwrap();
        assert_eq!(second.reset_at, first.reset_at);
    }

    #[tokio::test]
    async fn test_boundary_burst_is_allowed() {
        let (limiter, clock) = create_test_limiter();

        clock.advance(Duration::from_secs(59));
        for _ in 0..3 {
            assert!(limiter.check("api", "a", 3, 60).await.unwrap().admitted);
        }

        // The window opened at t=59s, so it closes at t=119s
        clock.advance(Duration::from_secs(61));
        for _ in 0..3 {
            assert!(limiter.check("api", "a", 3, 60).await.unwrap().admitted);
        }
    }

    #[tokio::test]
    async fn test_identifiers_are_independent() {
        let (limiter, _clock) = create_test_limiter();

        for _ in 0..4 {
            limiter.check("login", "alice", 3, 60).await.unwrap();
        }
        assert!(!limiter.check("login", "alice", 3, 60).await.unwrap().admitted);

        let decision = limiter.check("login", "bob", 3, 60).await.unwrap();
        assert!(decision.admitted);
        assert_eq!(decision.remaining, 2);
    }

    #[tokio::test]
    async fn test_scopes_are_independent() {
        let (limiter, _clock) = create_test_limiter();

        for _ in 0..4 {
            limiter.check("login", "10.0.0.1", 3, 60).await.unwrap();
        }
        assert!(!limiter.check("login", "10.0.0.1", 3, 60).await.unwrap().admitted);

        let decision = limiter.check("signup", "10.0.0.1", 3, 60).await.unwrap();
        assert!(decision.admitted);
        assert_eq!(decision.remaining, 2);
        assert_eq!(limiter.entry_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_invalid_policy_is_rejected() {
        let (limiter, _clock) = create_test_limiter();

        let err = limiter.check("login", "a", 0, 60).await.unwrap_err();
        assert!(matches!(err, TollgateError::InvalidPolicy(_)));

        let err = limiter.check("login", "a", 5, 0).await.unwrap_err();
        assert!(matches!(err, TollgateError::InvalidPolicy(_)));

        // Nothing was counted
        assert_eq!(limiter.entry_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_open() {
        let clock = Arc::new(ManualClock::new(start()));
        let limiter = RateLimiter::with_store(Arc::new(UnreachableStore), clock);

        for _ in 0..10 {
            let decision = assert_ok!(limiter.check("login", "a", 1, 60).await);
            assert!(decision.admitted);
            assert_eq!(decision.remaining, 0);
            assert_eq!(decision.reset_at, start() + chrono::Duration::seconds(60));
        }
    }

    #[tokio::test]
    async fn test_failed_write_fails_open() {
        let clock = Arc::new(ManualClock::new(start()));
        let limiter = RateLimiter::with_store(Arc::new(ReadOnlyStore(MemoryStore::new())), clock);

        let decision = limiter.check("login", "a", 5, 60).await.unwrap();
        assert!(decision.admitted);
        assert_eq!(decision.remaining, 0);
    }

    #[tokio::test]
    async fn test_admin_operations_surface_store_errors() {
        let clock = Arc::new(ManualClock::new(start()));
        let limiter = RateLimiter::with_store(Arc::new(UnreachableStore), clock);

        assert!(matches!(
            limiter.reset("login", "a").await,
            Err(TollgateError::Store(_))
        ));
        assert!(limiter.sweep_expired().await.is_err());
        assert!(limiter.entry_count().await.is_err());
    }

    #[tokio::test]
    async fn test_split_read_write_can_overshoot() {
        let clock = Arc::new(ManualClock::new(start()));
        let limiter = RateLimiter::with_store(Arc::new(SlowReadStore(MemoryStore::new())), clock);
        let policy = Policy::new(1, 60).unwrap();

        // Both checks read the empty store before either writes back
        let (first, second) = tokio::join!(
            limiter.check_with("login", "a", &policy),
            limiter.check_with("login", "a", &policy),
        );

        assert!(first.admitted);
        assert!(second.admitted);

        // The lost update leaves a single counted request
        let usage = limiter.usage("login", "a", &policy).await.unwrap();
        assert_eq!(usage.used, 1);
    }

    #[tokio::test]
    async fn test_backwards_clock_extends_window() {
        let (limiter, clock) = create_test_limiter();

        limiter.check("login", "a", 1, 60).await.unwrap();
        clock.set(start() - chrono::Duration::seconds(3600));

        let decision = limiter.check("login", "a", 1, 60).await.unwrap();
        assert!(!decision.admitted);
        assert_eq!(decision.reset_at, start() + chrono::Duration::seconds(60));
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_entries() {
        let (limiter, clock) = create_test_limiter();

        for identifier in ["a", "b", "c"] {
            limiter.check("login", identifier, 5, 1).await.unwrap();
        }
        assert_eq!(limiter.entry_count().await.unwrap(), 3);

        clock.advance(Duration::from_secs(2));

        assert_eq!(limiter.sweep_expired().await.unwrap(), 3);
        assert_eq!(limiter.entry_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_keeps_open_windows() {
        let (limiter, clock) = create_test_limiter();

        limiter.check("login", "short", 5, 1).await.unwrap();
        limiter.check("login", "long", 5, 900).await.unwrap();
        clock.advance(Duration::from_secs(2));

        assert_eq!(limiter.sweep_expired().await.unwrap(), 1);
        assert_eq!(limiter.entry_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_tiered_stops_at_first_denial() {
        let (limiter, _clock) = create_test_limiter();
        let tiers = vec![
            Policy::new(2, 60).unwrap().named("minute"),
            Policy::new(100, 3600).unwrap().named("hour"),
        ];

        for _ in 0..2 {
            assert!(limiter.check_tiered("api_key", "k1", &tiers).await.admitted);
        }

        let decision = limiter.check_tiered("api_key", "k1", &tiers).await;
        assert!(!decision.admitted);
        assert_eq!(decision.limit, 2);

        // The hour tier only saw the two admitted requests
        let mut policies = PolicySet::new();
        policies.insert("api_key", tiers);
        limiter.set_policies(policies);

        let report = limiter.usage_named("api_key", "k1").await.unwrap();
        assert_eq!(report[1].0, "hour");
        assert_eq!(report[1].1.used, 2);
    }

    #[tokio::test]
    async fn test_tiers_do_not_share_counters_with_lookalike_scopes() {
        let (limiter, _clock) = create_test_limiter();
        let tiers = vec![
            Policy::new(3, 60).unwrap().named("minute"),
            Policy::new(100, 3600).unwrap().named("hour"),
        ];

        for _ in 0..3 {
            assert!(limiter.check("api_key:minute", "k1", 3, 60).await.unwrap().admitted);
        }

        let decision = limiter.check_tiered("api_key", "k1", &tiers).await;
        assert!(decision.admitted);
        assert_eq!(decision.remaining, 2);

        // Resetting the tiered scope leaves the lookalike scope alone
        let mut policies = PolicySet::new();
        policies.insert("api_key", tiers);
        limiter.set_policies(policies);
        limiter.reset_named("api_key", "k1").await.unwrap();

        let denied = limiter.check("api_key:minute", "k1", 3, 60).await.unwrap();
        assert!(!denied.admitted);
    }

    #[tokio::test]
    async fn test_tiered_reports_tightest_tier() {
        let (limiter, _clock) = create_test_limiter();
        let tiers = vec![
            Policy::new(60, 60).unwrap().named("minute"),
            Policy::new(3, 86400).unwrap().named("day"),
        ];

        let decision = limiter.check_tiered("api_key", "k1", &tiers).await;
        assert!(decision.admitted);
        assert_eq!(decision.remaining, 2);
        assert_eq!(decision.limit, 3);
    }

    #[tokio::test]
    async fn test_tiered_with_no_tiers_admits() {
        let (limiter, _clock) = create_test_limiter();
        let decision = limiter.check_tiered("api_key", "k1", &[]).await;
        assert!(decision.admitted);
        assert_eq!(limiter.entry_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_check_named_uses_builtin_policy() {
        let (limiter, _clock) = create_test_limiter();

        for _ in 0..5 {
            assert!(limiter.check_named("login", "a").await.unwrap().admitted);
        }
        assert!(!limiter.check_named("login", "a").await.unwrap().admitted);
    }

    #[tokio::test]
    async fn test_check_named_unknown_scope() {
        let (limiter, _clock) = create_test_limiter();
        limiter.set_policies(PolicySet::new());

        let err = limiter.check_named("login", "a").await.unwrap_err();
        assert!(matches!(err, TollgateError::UnknownScope(scope) if scope == "login"));
    }

    #[tokio::test]
    async fn test_named_tiers_usage_and_reset() {
        let (limiter, _clock) = create_test_limiter();
        let mut policies = PolicySet::new();
        policies.insert(
            "api_key",
            vec![
                Policy::new(10, 60).unwrap().named("minute"),
                Policy::new(100, 3600).unwrap().named("hour"),
            ],
        );
        limiter.set_policies(policies);

        for _ in 0..3 {
            limiter.check_named("api_key", "k1").await.unwrap();
        }

        let report = limiter.usage_named("api_key", "k1").await.unwrap();
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].0, "minute");
        assert_eq!(report[0].1.used, 3);
        assert_eq!(report[0].1.remaining, 7);
        assert_eq!(report[1].0, "hour");
        assert_eq!(report[1].1.remaining, 97);

        assert_eq!(limiter.reset_named("api_key", "k1").await.unwrap(), 2);
        assert_eq!(limiter.entry_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_usage_does_not_count() {
        let (limiter, clock) = create_test_limiter();
        let policy = Policy::new(5, 60).unwrap();

        let usage = limiter.usage("login", "a", &policy).await.unwrap();
        assert_eq!(usage.used, 0);
        assert_eq!(usage.remaining, 5);
        assert!(usage.reset_at.is_none());

        limiter.check_with("login", "a", &policy).await;
        limiter.usage("login", "a", &policy).await.unwrap();
        let usage = limiter.usage("login", "a", &policy).await.unwrap();
        assert_eq!(usage.used, 1);

        clock.advance(Duration::from_secs(61));
        let usage = limiter.usage("login", "a", &policy).await.unwrap();
        assert_eq!(usage.used, 0);
    }

    #[tokio::test]
    async fn test_reset_restores_budget() {
        let (limiter, _clock) = create_test_limiter();

        for _ in 0..4 {
            limiter.check("login", "a", 3, 900).await.unwrap();
        }
        limiter.reset("login", "a").await.unwrap();

        let decision = limiter.check("login", "a", 3, 900).await.unwrap();
        assert!(decision.admitted);
        assert_eq!(decision.remaining, 2);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let now = start();
        let decision = Decision {
            admitted: false,
            remaining: 0,
            limit: 5,
            reset_at: now + chrono::Duration::milliseconds(1500),
        };

        assert_eq!(decision.retry_after(now), Duration::from_millis(1500));
        assert_eq!(decision.retry_after_secs(now), 2);
        assert_eq!(decision.retry_after_secs(now + chrono::Duration::seconds(1)), 1);
        assert_eq!(decision.retry_after_secs(now + chrono::Duration::seconds(5)), 0);
    }
}
