/// Rate Limiting System
///
/// Two independent limiters live here:
/// - `FailureLimiter`, a per-source sliding window over failed bearer key
///   attempts, consulted by the gatekeeper before any key is checked
/// - `SubmissionThrottle`, a governor quota per source address in front of
///   the endpoints that send login mail
use crate::config::RateLimitConfig;
use crate::context::AppContext;
use crate::error::{AuthError, AuthResult};
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter as GovernorLimiter};
use std::{
    collections::HashMap,
    net::SocketAddr,
    num::NonZeroU32,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

/// Sliding-window counter of failures per source address
///
/// Cloning shares the underlying window map.
#[derive(Clone)]
pub struct FailureLimiter {
    window: Duration,
    threshold: usize,
    failures: Arc<Mutex<HashMap<String, Vec<Instant>>>>,
}

impl FailureLimiter {
    pub fn new(window: Duration, threshold: usize) -> Self {
        Self {
            window,
            threshold,
            failures: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            Duration::from_secs(config.bearer_failure_window_secs),
            config.bearer_failure_threshold,
        )
    }

    /// How long a limited source should wait
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a failure from `source`; returns whether it is now limited
    pub fn record_failure(&self, source: &str) -> bool {
        self.record_failure_at(source, Instant::now())
    }

    /// Record a failure observed at `now`
    pub fn record_failure_at(&self, source: &str, now: Instant) -> bool {
        let mut failures = self.lock();
        let entries = failures.entry(source.to_string()).or_default();
        entries.push(now);
        prune(entries, now, self.window);
        entries.len() > self.threshold
    }

    /// Whether `source` is over the threshold right now
    pub fn is_limited(&self, source: &str) -> bool {
        self.is_limited_at(source, Instant::now())
    }

    pub fn is_limited_at(&self, source: &str, now: Instant) -> bool {
        let mut failures = self.lock();
        match failures.get_mut(source) {
            Some(entries) => {
                prune(entries, now, self.window);
                entries.len() > self.threshold
            }
            None => false,
        }
    }

    /// Forget sources with no failures left inside the window
    ///
    /// Returns the number of sources dropped.
    pub fn prune_idle(&self) -> usize {
        let now = Instant::now();
        let mut failures = self.lock();
        let before = failures.len();
        failures.retain(|_, entries| {
            prune(entries, now, self.window);
            !entries.is_empty()
        });
        before - failures.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Instant>>> {
        // Timestamps stay valid across a poisoned lock
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn prune(entries: &mut Vec<Instant>, now: Instant, window: Duration) {
    entries.retain(|at| now.saturating_duration_since(*at) < window);
}

/// Peer address a request came from
///
/// Without connect info every request shares the source `"unknown"`.
pub fn source_address(req: &Request) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Quota on login mail submissions, one bucket per source address
#[derive(Clone)]
pub struct SubmissionThrottle {
    limiter: Arc<DefaultKeyedRateLimiter<String>>,
}

impl SubmissionThrottle {
    pub fn new(per_minute: u32) -> Self {
        let per_minute = NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: Arc::new(GovernorLimiter::keyed(Quota::per_minute(per_minute))),
        }
    }

    /// Take one submission from `source`'s quota
    pub fn check(&self, source: &str) -> AuthResult<()> {
        match self.limiter.check_key(&source.to_string()) {
            Ok(_) => Ok(()),
            Err(_) => Err(AuthError::RateLimited {
                retry_after: Duration::from_secs(60),
            }),
        }
    }

    /// Drop buckets that have refilled completely
    ///
    /// Returns the number of sources still tracked.
    pub fn prune(&self) -> usize {
        self.limiter.retain_recent();
        self.limiter.len()
    }
}

/// Throttle mail-sending submissions
///
/// Only POSTs count; the GET pages behind the same paths are free.
pub async fn submission_throttle_middleware(
    State(ctx): State<AppContext>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    if request.method() == axum::http::Method::POST {
        let source = source_address(&request);
        if let Err(e) = ctx.submission_throttle.check(&source) {
            tracing::warn!(source = %source, path = %request.uri().path(), "Login submission throttled");
            return Err(e);
        }
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "203.0.113.7";

    #[test]
    fn test_eleventh_failure_is_limited() {
        let limiter = FailureLimiter::new(Duration::from_secs(60), 10);
        let start = Instant::now();

        for i in 0..10 {
            let limited = limiter.record_failure_at(SOURCE, start + Duration::from_millis(i));
            assert!(!limited, "failure {} should not be limited", i + 1);
        }

        assert!(limiter.record_failure_at(SOURCE, start + Duration::from_millis(10)));
        assert!(limiter.is_limited_at(SOURCE, start + Duration::from_millis(11)));
    }

    #[test]
    fn test_failure_after_window_is_not_limited() {
        let limiter = FailureLimiter::new(Duration::from_secs(60), 10);
        let start = Instant::now();

        for i in 0..11 {
            limiter.record_failure_at(SOURCE, start + Duration::from_millis(i));
        }
        assert!(limiter.is_limited_at(SOURCE, start + Duration::from_secs(1)));

        let later = start + Duration::from_secs(61);
        assert!(!limiter.record_failure_at(SOURCE, later));
        assert!(!limiter.is_limited_at(SOURCE, later));
    }

    #[test]
    fn test_sources_are_independent() {
        let limiter = FailureLimiter::new(Duration::from_secs(60), 2);

        for _ in 0..3 {
            limiter.record_failure(SOURCE);
        }

        assert!(limiter.is_limited(SOURCE));
        assert!(!limiter.is_limited("198.51.100.1"));
    }

    #[test]
    fn test_clones_share_state() {
        let limiter = FailureLimiter::new(Duration::from_secs(60), 1);
        let other = limiter.clone();

        limiter.record_failure(SOURCE);
        assert!(other.record_failure(SOURCE));
    }

    #[test]
    fn test_prune_idle_drops_quiet_sources() {
        let limiter = FailureLimiter::new(Duration::from_millis(0), 10);
        limiter.record_failure(SOURCE);

        assert_eq!(limiter.prune_idle(), 1);
        assert!(!limiter.is_limited(SOURCE));
    }

    #[test]
    fn test_concurrent_failures_are_not_lost() {
        let limiter = FailureLimiter::new(Duration::from_secs(60), 1000);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        limiter.record_failure(SOURCE);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let count = limiter.failures.lock().unwrap().get(SOURCE).map(Vec::len);
        assert_eq!(count, Some(400));
    }

    #[test]
    fn test_submission_throttle_exhausts_quota() {
        let throttle = SubmissionThrottle::new(2);

        assert!(throttle.check(SOURCE).is_ok());
        assert!(throttle.check(SOURCE).is_ok());
        assert!(matches!(
            throttle.check(SOURCE),
            Err(AuthError::RateLimited { .. })
        ));
    }

    #[test]
    fn test_submission_quota_is_per_source() {
        let throttle = SubmissionThrottle::new(3);

        for _ in 0..3 {
            throttle.check("6.6.6.6").unwrap();
        }
        assert!(throttle.check("6.6.6.6").is_err());

        // Another address still has its full quota
        for _ in 0..3 {
            assert!(throttle.check("10.0.0.1").is_ok());
        }
        assert_eq!(throttle.prune(), 2);
    }

    #[test]
    fn test_source_address_reads_connect_info() {
        let mut request = Request::new(axum::body::Body::empty());
        assert_eq!(source_address(&request), "unknown");

        let peer: SocketAddr = "198.51.100.4:5000".parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(peer));
        assert_eq!(source_address(&request), "198.51.100.4");
    }
}
