//! Per-client rate limiting with bounded memory.
//!
//! # Algorithm
//!
//! Every client key gets its own token bucket, implemented with Governor's
//! GCRA limiter (a continuous-refill token bucket): `burst` requests are
//! admitted back-to-back, after which tokens return at `rps` per second.
//! Decisions are immediate; a denied request is answered with 429, never
//! queued.
//!
//! # Memory Bound
//!
//! ```text
//! allow(key)
//!   ├─ known key ─────────────────────────────────► check bucket
//!   └─ new key ─► map full? ─► evict idle > 60s ──► insert full bucket ─► check
//!
//! sweep task (every 60s) ─► evict idle > 180s
//! ```
//!
//! Insertion at capacity pays for a synchronous scan instead of failing the
//! request. The background sweep keeps steady-state memory proportional to
//! recently active clients. Both paths take the same mutex; every critical
//! section is a map lookup plus arithmetic, except the capacity scan.
//!
//! # Lifecycle
//!
//! [`VisitorLimiter::new`] spawns the sweep task and must run inside a Tokio
//! runtime. [`VisitorLimiter::stop`] cancels the task and waits for it.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::response::IntoResponse;
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use thiserror::Error;
use tokio::time::{Instant, interval};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::{Layer, Service};
use tracing::debug;

use super::ip::{ClientIp, TrustedProxyConfig, client_ip_from_request};
use crate::error::AppError;
use crate::metrics;

/// Entries idle this long may be evicted when the map is full.
pub const CAPACITY_EVICTION_IDLE: Duration = Duration::from_secs(60);

/// Entries idle this long are removed by the background sweep.
pub const SWEEP_IDLE: Duration = Duration::from_secs(180);

/// How often the background sweep runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Error type for rate limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RateLimitError {
    #[error("RPS must be greater than 0; disable rate limiting instead")]
    ZeroRps,

    #[error("maximum visitor count must be greater than 0")]
    ZeroMaxVisitors,
}

/// Limiter parameters, fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct LimiterSettings {
    /// Sustained requests per second per client.
    pub rps: u32,
    /// Bucket capacity per client (0 is treated as 1).
    pub burst: u32,
    /// Hard cap on tracked clients before capacity eviction kicks in.
    pub max_visitors: usize,
}

struct Visitor {
    bucket: DefaultDirectRateLimiter,
    last_seen: Instant,
}

struct Shared {
    quota: Quota,
    max_visitors: usize,
    visitors: Mutex<HashMap<String, Visitor>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Visitor>> {
        // A panic while holding the lock cannot leave a bucket half-updated.
        self.visitors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Remove entries idle longer than `idle`; returns how many were removed.
    fn evict_idle(visitors: &mut HashMap<String, Visitor>, idle: Duration) -> usize {
        let before = visitors.len();
        let now = Instant::now();
        visitors.retain(|_, v| now.saturating_duration_since(v.last_seen) <= idle);
        before - visitors.len()
    }

    fn sweep(&self) -> usize {
        let mut visitors = self.lock();
        let evicted = Self::evict_idle(&mut visitors, SWEEP_IDLE);
        let remaining = visitors.len();
        drop(visitors);

        metrics::record_limiter_evictions("sweep", evicted);
        metrics::set_limiter_visitors(remaining);
        evicted
    }
}

/// Per-client token bucket limiter with a cancelable background sweep.
///
/// Cheap to clone; clones share the same map and sweep task.
#[derive(Clone)]
pub struct VisitorLimiter {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl VisitorLimiter {
    /// Create a limiter and start its sweep task.
    ///
    /// # Errors
    ///
    /// `RateLimitError` if `rps` or `max_visitors` is zero.
    pub fn new(settings: LimiterSettings) -> Result<Self, RateLimitError> {
        let rps = NonZeroU32::new(settings.rps).ok_or(RateLimitError::ZeroRps)?;
        if settings.max_visitors == 0 {
            return Err(RateLimitError::ZeroMaxVisitors);
        }
        let burst = NonZeroU32::new(settings.burst).unwrap_or(NonZeroU32::MIN);

        let limiter = Self {
            shared: Arc::new(Shared {
                quota: Quota::per_second(rps).allow_burst(burst),
                max_visitors: settings.max_visitors,
                visitors: Mutex::new(HashMap::new()),
            }),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        };
        limiter.spawn_sweep_task();
        Ok(limiter)
    }

    /// Admit or deny one request from `key`.
    pub fn allow(&self, key: &str) -> bool {
        self.check(key).is_ok()
    }

    /// Like [`allow`](Self::allow), but a denial carries the whole seconds
    /// until the next token (at least 1).
    pub fn check(&self, key: &str) -> Result<(), u64> {
        let mut visitors = self.shared.lock();
        let now = Instant::now();

        if !visitors.contains_key(key) && visitors.len() >= self.shared.max_visitors {
            let evicted = Shared::evict_idle(&mut visitors, CAPACITY_EVICTION_IDLE);
            metrics::record_limiter_evictions("capacity", evicted);
        }

        let visitor = visitors.entry(key.to_string()).or_insert_with(|| Visitor {
            bucket: RateLimiter::direct(self.shared.quota),
            last_seen: now,
        });
        visitor.last_seen = now;

        visitor.bucket.check().map_err(|not_until| {
            not_until
                .wait_time_from(DefaultClock::default().now())
                .as_secs()
                .max(1)
        })
    }

    /// Number of tracked client keys.
    pub fn len(&self) -> usize {
        self.shared.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run one sweep now. Returns the number of evicted entries.
    pub fn sweep(&self) -> usize {
        self.shared.sweep()
    }

    /// Stop the sweep task and wait for it to exit.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        debug!("Rate limiter sweep task stopped");
    }

    fn spawn_sweep_task(&self) {
        let shared = self.shared.clone();
        let cancel = self.cancel.clone();

        self.tracker.spawn(async move {
            let mut ticker = interval(SWEEP_INTERVAL);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = shared.sweep();
                        if evicted > 0 {
                            debug!(evicted, "Evicted idle rate limiter entries");
                        }
                    }
                }
            }
        });
    }

    /// Insert an entry that was last seen `idle` ago.
    #[cfg(test)]
    pub(crate) fn insert_idle(&self, key: &str, idle: Duration) {
        let last_seen = Instant::now()
            .checked_sub(idle)
            .unwrap_or_else(Instant::now);
        self.shared.lock().insert(
            key.to_string(),
            Visitor {
                bucket: RateLimiter::direct(self.shared.quota),
                last_seen,
            },
        );
    }
}

// =============================================================================
// Tower Layer
// =============================================================================

/// Rate limiting layer keyed by resolved client identity.
///
/// Pre-flight `OPTIONS` requests pass straight through. Denials are counted
/// in metrics and never logged individually.
///
/// # Example
///
/// ```rust,ignore
/// let limiter = VisitorLimiter::new(settings)?;
/// let app = Router::new()
///     .route("/api", get(handler))
///     .layer(RateLimitLayer::new(limiter, TrustedProxyConfig::new(&proxies)));
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: VisitorLimiter,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl RateLimitLayer {
    pub fn new(limiter: VisitorLimiter, trusted_proxies: TrustedProxyConfig) -> Self {
        Self {
            limiter,
            trusted_proxies: Arc::new(trusted_proxies),
        }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: VisitorLimiter,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        // Take the service that was driven to readiness; leave a fresh clone.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        if req.method() == Method::OPTIONS {
            return Box::pin(async move { inner.call(req).await });
        }

        let client_ip = client_ip_from_request(&req, &self.trusted_proxies);
        let decision = self.limiter.check(&client_ip);
        req.extensions_mut().insert(ClientIp(client_ip));

        Box::pin(async move {
            match decision {
                Ok(()) => inner.call(req).await,
                Err(retry_after_secs) => {
                    metrics::record_rate_limited();
                    Ok(AppError::RateLimited { retry_after_secs }.into_response())
                }
            }
        })
    }
}
