//! Per-visitor identity and rate limiting
//!
//! A visitor is a source identity (IP, or the first X-Forwarded-For entry
//! when the server trusts its proxy). Each visitor carries its own limiters:
//! request and email token buckets, a bounded subscription counter, and a
//! bandwidth byte bucket for attachment downloads. A refused check consumes
//! nothing. Visitors on the exempt list bypass every limiter.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::core::config::Config;
use crate::domain::message::now_unix;

/// Rate-limited refusals, one per limiter dimension
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VisitorError {
    #[error("request limit reached")]
    RequestLimit,

    #[error("email limit reached")]
    EmailLimit,

    #[error("subscription limit reached")]
    SubscriptionLimit,

    #[error("bandwidth limit reached")]
    BandwidthLimit,

    #[error("attachment quota exceeded")]
    AttachmentQuota,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket: starts full, refills continuously. `take` either consumes
/// the full amount or nothing.
struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    fn new(capacity: u64, refill_per_sec: f64) -> Self {
        Self {
            capacity: capacity as f64,
            refill_per_sec,
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    fn take(&self, amount: u64) -> bool {
        let mut state = self.state.lock();
        let elapsed = state.last_refill.elapsed().as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = Instant::now();

        if state.tokens >= amount as f64 {
            state.tokens -= amount as f64;
            true
        } else {
            false
        }
    }
}

/// A single rate-limited client identity.
pub struct Visitor {
    ip: String,
    exempt: bool,
    requests: TokenBucket,
    emails: TokenBucket,
    bandwidth: TokenBucket,
    subscriptions: AtomicU64,
    subscription_limit: u64,
    last_seen: AtomicU64,
}

impl Visitor {
    fn new(ip: &str, exempt: bool, config: &Config) -> Self {
        let request_refill = 1.0 / config.visitor_request_limit_replenish.as_secs_f64().max(0.001);
        let email_refill = 1.0 / config.visitor_email_limit_replenish.as_secs_f64().max(0.001);
        // Bandwidth bucket refills its full capacity over a day
        let bandwidth_refill = config.visitor_attachment_bandwidth_limit as f64 / 86_400.0;

        Self {
            ip: ip.to_string(),
            exempt,
            requests: TokenBucket::new(config.visitor_request_limit_burst, request_refill),
            emails: TokenBucket::new(config.visitor_email_limit_burst, email_refill),
            bandwidth: TokenBucket::new(config.visitor_attachment_bandwidth_limit, bandwidth_refill),
            subscriptions: AtomicU64::new(0),
            subscription_limit: config.visitor_subscription_limit,
            last_seen: AtomicU64::new(now_unix()),
        }
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn request_allowed(&self) -> Result<(), VisitorError> {
        if self.exempt || self.requests.take(1) {
            Ok(())
        } else {
            Err(VisitorError::RequestLimit)
        }
    }

    pub fn email_allowed(&self) -> Result<(), VisitorError> {
        if self.exempt || self.emails.take(1) {
            Ok(())
        } else {
            Err(VisitorError::EmailLimit)
        }
    }

    /// Claim a subscription slot. Pair with [`Visitor::remove_subscription`].
    pub fn add_subscription(&self) -> Result<(), VisitorError> {
        if self.exempt {
            return Ok(());
        }
        let mut current = self.subscriptions.load(Ordering::Relaxed);
        loop {
            if current >= self.subscription_limit {
                return Err(VisitorError::SubscriptionLimit);
            }
            match self.subscriptions.compare_exchange_weak(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(observed) => current = observed,
            }
        }
    }

    /// Release a subscription slot. Saturates at zero.
    pub fn remove_subscription(&self) {
        let _ = self
            .subscriptions
            .fetch_update(Ordering::SeqCst, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn subscriptions(&self) -> u64 {
        self.subscriptions.load(Ordering::Relaxed)
    }

    /// Consume download bandwidth, all-or-nothing.
    pub fn bandwidth_allowed(&self, bytes: u64) -> Result<(), VisitorError> {
        if self.exempt || self.bandwidth.take(bytes) {
            Ok(())
        } else {
            Err(VisitorError::BandwidthLimit)
        }
    }

    pub fn is_exempt(&self) -> bool {
        self.exempt
    }

    /// Refresh the idle clock
    pub fn keepalive(&self) {
        self.last_seen.store(now_unix(), Ordering::Relaxed);
    }

    /// Idle longer than `expunge_after` and holding no subscriptions
    pub fn stale(&self, expunge_after: Duration) -> bool {
        self.subscriptions() == 0
            && now_unix().saturating_sub(self.last_seen.load(Ordering::Relaxed))
                > expunge_after.as_secs()
    }
}

/// Resolve the effective client IP. The forwarded header is only honored when
/// the server is explicitly configured behind a trusted proxy.
pub fn client_ip(remote: &str, forwarded_for: Option<&str>, behind_proxy: bool) -> String {
    if behind_proxy
        && let Some(forwarded) = forwarded_for
        && let Some(first) = forwarded.split(',').next()
    {
        let first = first.trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }
    remote.to_string()
}

/// Owns the IP → visitor map; prunes stale entries on manager ticks.
pub struct VisitorManager {
    visitors: Mutex<HashMap<String, Arc<Visitor>>>,
    config: Arc<Config>,
}

impl VisitorManager {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            visitors: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Get or create the visitor for an IP, refreshing its idle clock.
    pub fn visitor(&self, ip: &str) -> Arc<Visitor> {
        let mut visitors = self.visitors.lock();
        let visitor = visitors.entry(ip.to_string()).or_insert_with(|| {
            let exempt = self.config.visitor_exempt_ips.iter().any(|e| e == ip);
            Arc::new(Visitor::new(ip, exempt, &self.config))
        });
        visitor.keepalive();
        Arc::clone(visitor)
    }

    /// Remove visitors idle beyond the expunge window.
    pub fn prune_stale(&self) -> usize {
        let expunge_after = self.config.visitor_expunge_after;
        let mut visitors = self.visitors.lock();
        let before = visitors.len();
        visitors.retain(|_, v| !v.stale(expunge_after));
        before - visitors.len()
    }

    pub fn len(&self) -> usize {
        self.visitors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.visitors.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            visitor_request_limit_burst: 3,
            visitor_request_limit_replenish: Duration::from_secs(3600),
            visitor_email_limit_burst: 2,
            visitor_email_limit_replenish: Duration::from_secs(3600),
            visitor_subscription_limit: 2,
            visitor_attachment_bandwidth_limit: 1000,
            ..Config::default()
        })
    }

    #[test]
    fn test_request_bucket_exhausts() {
        let manager = VisitorManager::new(test_config());
        let visitor = manager.visitor("10.0.0.1");

        for _ in 0..3 {
            assert_eq!(visitor.request_allowed(), Ok(()));
        }
        assert_eq!(visitor.request_allowed(), Err(VisitorError::RequestLimit));
    }

    #[test]
    fn test_refused_request_consumes_nothing() {
        let config = test_config();
        let manager = VisitorManager::new(config);
        let visitor = manager.visitor("10.0.0.1");

        while visitor.request_allowed().is_ok() {}
        // Email budget is untouched by request refusals
        assert_eq!(visitor.email_allowed(), Ok(()));
        assert_eq!(visitor.email_allowed(), Ok(()));
        assert_eq!(visitor.email_allowed(), Err(VisitorError::EmailLimit));
    }

    #[test]
    fn test_subscription_slots() {
        let manager = VisitorManager::new(test_config());
        let visitor = manager.visitor("10.0.0.1");

        assert_eq!(visitor.add_subscription(), Ok(()));
        assert_eq!(visitor.add_subscription(), Ok(()));
        assert_eq!(
            visitor.add_subscription(),
            Err(VisitorError::SubscriptionLimit)
        );

        visitor.remove_subscription();
        assert_eq!(visitor.add_subscription(), Ok(()));
        assert_eq!(visitor.subscriptions(), 2);
    }

    #[test]
    fn test_remove_subscription_saturates() {
        let manager = VisitorManager::new(test_config());
        let visitor = manager.visitor("10.0.0.1");
        visitor.remove_subscription();
        assert_eq!(visitor.subscriptions(), 0);
    }

    #[test]
    fn test_bandwidth_all_or_nothing() {
        let manager = VisitorManager::new(test_config());
        let visitor = manager.visitor("10.0.0.1");

        assert_eq!(visitor.bandwidth_allowed(800), Ok(()));
        assert_eq!(
            visitor.bandwidth_allowed(800),
            Err(VisitorError::BandwidthLimit)
        );
        // The failed check left the remaining 200 bytes intact
        assert_eq!(visitor.bandwidth_allowed(200), Ok(()));
    }

    #[test]
    fn test_exempt_visitor_bypasses_limits() {
        let config = Arc::new(Config {
            visitor_exempt_ips: vec!["10.0.0.99".to_string()],
            ..(*test_config()).clone()
        });
        let manager = VisitorManager::new(config);
        let visitor = manager.visitor("10.0.0.99");

        assert!(visitor.is_exempt());
        for _ in 0..100 {
            assert_eq!(visitor.request_allowed(), Ok(()));
            assert_eq!(visitor.add_subscription(), Ok(()));
        }
    }

    #[test]
    fn test_visitor_identity_reused() {
        let manager = VisitorManager::new(test_config());
        let a = manager.visitor("10.0.0.1");
        let b = manager.visitor("10.0.0.1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_prune_stale() {
        let config = Arc::new(Config {
            visitor_expunge_after: Duration::from_secs(0),
            ..(*test_config()).clone()
        });
        let manager = VisitorManager::new(config);
        let keeper = manager.visitor("10.0.0.1");
        keeper.add_subscription().unwrap();
        manager.visitor("10.0.0.2");

        std::thread::sleep(Duration::from_millis(1100));
        let removed = manager.prune_stale();
        assert_eq!(removed, 1);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_client_ip_behind_proxy() {
        assert_eq!(
            client_ip("127.0.0.1", Some("203.0.113.9, 10.0.0.1"), true),
            "203.0.113.9"
        );
        assert_eq!(
            client_ip("127.0.0.1", Some("203.0.113.9"), false),
            "127.0.0.1"
        );
        assert_eq!(client_ip("127.0.0.1", None, true), "127.0.0.1");
        assert_eq!(client_ip("127.0.0.1", Some("  "), true), "127.0.0.1");
    }
}
