//! Per-client token bucket registry.
//!
//! Maps each [`ClientIdentity`](super::ip::ClientIdentity) key to its own
//! governor direct rate limiter. Governor implements GCRA, which is equivalent
//! to a token bucket with `burst` capacity refilled continuously at `rate`
//! tokens per second, and keeps its state in a single atomic so the
//! check-and-consume step is lock-free and atomic per client.
//!
//! # Storage
//!
//! ```text
//!   acquire(id) ──► moka get_with (one init per key) ──► Arc<ClientLimiter>
//!                                                              │
//!   caller      ◄──────── check() (atomic CAS, no cache lock) ◄┘
//! ```
//!
//! Limiters live in a `moka::sync::Cache`. Racing first requests from one
//! identity always receive the same limiter, and token consumption never
//! serializes unrelated clients.
//!
//! # Bounded Growth
//!
//! The cache holds at most `max_clients` limiters, evicting the least recently
//! used one when full, and drops limiters idle for longer than `max_idle`.
//! The idle threshold is never shorter than the time a drained bucket needs
//! to refill, so expiry can only forget a bucket that is already full again.
//! A client evicted for capacity simply starts again with a full bucket.

use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use tracing::trace;

/// Limiter owned by a single client identity.
pub type ClientLimiter = DefaultDirectRateLimiter;

/// Longest idle expiry handed to the cache. Buckets that take longer to
/// refill are only ever evicted for capacity.
const MAX_IDLE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Error type for rate limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateLimitError {
    /// Rate must be a finite number greater than zero.
    InvalidRate(f64),
    /// Registry capacity must be at least one client.
    ZeroCapacity,
}

impl fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitError::InvalidRate(rate) => write!(
                f,
                "rate must be a finite number of requests per second greater than 0 (got {rate}); \
                 use RateLimitLayer::disabled() for no limiting"
            ),
            RateLimitError::ZeroCapacity => {
                write!(f, "rate limiter registry capacity must be greater than 0")
            }
        }
    }
}

impl std::error::Error for RateLimitError {}

/// Build a governor quota from a fractional requests-per-second rate.
///
/// A burst of 0 is treated as 1.
pub fn quota_for(rate: f64, burst: u32) -> Result<Quota, RateLimitError> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(RateLimitError::InvalidRate(rate));
    }

    // One token is replenished every `1 / rate` seconds.
    let period = Duration::try_from_secs_f64(rate.recip())
        .map_err(|_| RateLimitError::InvalidRate(rate))?;
    let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);

    Quota::with_period(period)
        .map(|quota| quota.allow_burst(burst))
        .ok_or(RateLimitError::InvalidRate(rate))
}

/// Time an empty bucket needs to refill to its full burst.
pub fn refill_time(quota: &Quota) -> Duration {
    quota
        .replenish_interval()
        .checked_mul(quota.burst_size().get())
        .unwrap_or(Duration::MAX)
}

/// Concurrency-safe, bounded map from client identity to its limiter.
pub struct TokenBucketRegistry {
    quota: Quota,
    rate: f64,
    burst: u32,
    max_clients: usize,
    max_idle: Duration,
    clients: Cache<String, Arc<ClientLimiter>>,
}

impl TokenBucketRegistry {
    /// Create a registry whose limiters refill at `rate` tokens per second up
    /// to `burst` tokens, tracking at most `max_clients` identities and
    /// forgetting those idle for longer than `max_idle`.
    ///
    /// `max_idle` is raised to the bucket refill time when shorter.
    ///
    /// # Errors
    ///
    /// [`RateLimitError::InvalidRate`] for a zero, negative, NaN or
    /// unrepresentably large rate; [`RateLimitError::ZeroCapacity`] when
    /// `max_clients` is 0.
    pub fn new(
        rate: f64,
        burst: u32,
        max_clients: usize,
        max_idle: Duration,
    ) -> Result<Self, RateLimitError> {
        if max_clients == 0 {
            return Err(RateLimitError::ZeroCapacity);
        }
        let quota = quota_for(rate, burst)?;
        let max_idle = max_idle.max(refill_time(&quota));

        let mut builder = Cache::builder()
            .max_capacity(u64::try_from(max_clients).unwrap_or(u64::MAX))
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(|client: Arc<String>, _, cause| {
                trace!(client = %client, ?cause, "Dropped rate limiter");
            });
        if max_idle <= MAX_IDLE {
            builder = builder.time_to_idle(max_idle);
        }

        Ok(Self {
            quota,
            rate,
            burst: burst.max(1),
            max_clients,
            max_idle,
            clients: builder.build(),
        })
    }

    /// Return the limiter for `identity`, creating it on first sight.
    ///
    /// Repeated calls with the same identity return the same instance for as
    /// long as it stays in the registry.
    pub fn acquire(&self, identity: &str) -> Arc<ClientLimiter> {
        self.clients.get_with_by_ref(identity, || {
            trace!(client = %identity, "Created rate limiter");
            Arc::new(RateLimiter::direct(self.quota))
        })
    }

    /// Apply pending evictions and idle expiry now instead of lazily.
    pub fn run_maintenance(&self) {
        self.clients.run_pending_tasks();
    }

    /// Number of tracked identities, after pending maintenance is applied.
    pub fn len(&self) -> usize {
        self.run_maintenance();
        usize::try_from(self.clients.entry_count()).unwrap_or(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.clients.contains_key(identity)
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn burst(&self) -> u32 {
        self.burst
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    /// Effective idle threshold after clamping to the refill time.
    pub fn max_idle(&self) -> Duration {
        self.max_idle
    }
}

impl fmt::Debug for TokenBucketRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBucketRegistry")
            .field("rate", &self.rate)
            .field("burst", &self.burst)
            .field("max_clients", &self.max_clients)
            .field("max_idle", &self.max_idle)
            .field("tracked", &self.clients.entry_count())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::thread;

    const IDLE: Duration = Duration::from_secs(600);

    fn registry(rate: f64, burst: u32, max_clients: usize) -> TokenBucketRegistry {
        TokenBucketRegistry::new(rate, burst, max_clients, IDLE).unwrap()
    }

    #[test]
    fn test_invalid_rates_rejected() {
        for rate in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                TokenBucketRegistry::new(rate, 1, 10, IDLE),
                Err(RateLimitError::InvalidRate(_))
            ));
        }
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            TokenBucketRegistry::new(1.0, 1, 0, IDLE),
            Err(RateLimitError::ZeroCapacity)
        ));
    }

    #[test]
    fn test_zero_burst_treated_as_one() {
        let registry = registry(0.1, 0, 10);
        assert_eq!(registry.burst(), 1);

        let limiter = registry.acquire("a");
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());
    }

    #[test]
    fn test_refill_time() {
        let quota = quota_for(0.5, 4).unwrap();
        assert_eq!(refill_time(&quota), Duration::from_secs(8));

        let quota = quota_for(4.0, 0).unwrap();
        assert_eq!(refill_time(&quota), Duration::from_millis(250));
    }

    #[test]
    fn test_same_identity_same_limiter() {
        let registry = registry(1.0, 5, 10);

        let first = registry.acquire("10.0.0.1");
        let second = registry.acquire("10.0.0.1");
        let other = registry.acquire("10.0.0.2");

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_burst_then_deny() {
        let limiter = registry(0.1, 3, 10).acquire("client");

        for _ in 0..3 {
            assert!(limiter.check().is_ok());
        }
        assert!(limiter.check().is_err());
    }

    #[test]
    fn test_fractional_rate_single_burst() {
        let registry = registry(0.1, 1, 10);

        assert!(registry.acquire("a").check().is_ok());
        assert!(registry.acquire("a").check().is_err());
        // A different identity has its own bucket.
        assert!(registry.acquire("b").check().is_ok());
    }

    #[test]
    fn test_tokens_refill_over_time() {
        // One token every 50ms.
        let limiter = registry(20.0, 1, 10).acquire("a");

        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());

        thread::sleep(Duration::from_millis(120));
        assert!(limiter.check().is_ok());
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        let registry = registry(1.0, 1, 2);

        registry.acquire("a");
        registry.acquire("b");
        registry.run_maintenance();
        // Touch "a" so "b" becomes the oldest.
        registry.acquire("a");
        registry.run_maintenance();
        registry.acquire("c");

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("a"));
        assert!(!registry.contains("b"));
        assert!(registry.contains("c"));
    }

    #[test]
    fn test_evicted_client_starts_fresh() {
        let registry = registry(0.1, 1, 1);

        assert!(registry.acquire("a").check().is_ok());
        assert!(registry.acquire("a").check().is_err());
        registry.run_maintenance();

        registry.acquire("b");
        registry.run_maintenance();
        assert!(!registry.contains("a"));
        assert!(registry.acquire("a").check().is_ok());
    }

    #[test]
    fn test_idle_clients_expire() {
        // Refills in 1ms, so the 20ms idle threshold applies as given.
        let registry = TokenBucketRegistry::new(1000.0, 1, 10, Duration::from_millis(20)).unwrap();
        registry.acquire("idle");

        thread::sleep(Duration::from_millis(60));
        registry.acquire("busy");

        assert_eq!(registry.len(), 1);
        assert!(!registry.contains("idle"));
        assert!(registry.contains("busy"));
    }

    #[test]
    fn test_idle_expiry_never_refills_a_drained_bucket() {
        // One token per 100s: the 20ms idle threshold is raised to 100s.
        let registry = TokenBucketRegistry::new(0.01, 1, 10, Duration::from_millis(20)).unwrap();
        assert_eq!(registry.max_idle(), Duration::from_secs(100));

        assert!(registry.acquire("a").check().is_ok());
        assert!(registry.acquire("a").check().is_err());

        thread::sleep(Duration::from_millis(30));
        registry.run_maintenance();

        assert!(registry.contains("a"));
        assert!(registry.acquire("a").check().is_err());
    }

    #[test]
    fn test_concurrent_first_access_creates_one_limiter() {
        let registry = Arc::new(registry(1.0, 1, 100));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.acquire("shared"))
            })
            .collect();

        let limiters: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(limiters.iter().all(|l| Arc::ptr_eq(l, &limiters[0])));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_concurrent_checks_never_over_admit() {
        let burst = 5;
        let registry = Arc::new(registry(0.01, burst, 100));

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.acquire("hammer").check().is_ok())
            })
            .collect();

        let allowed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(allowed, burst as usize);
    }
}
