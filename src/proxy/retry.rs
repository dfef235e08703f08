//! Retry driver with exponential backoff and proxy rotation
//!
//! Every attempt asks the pool for a proxy, runs the caller's operation with it
//! and reports the outcome back, so a proxy that went bad in the meantime is
//! avoided on the next attempt. Attempts of one call are strictly sequential.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::{RetryError, RotaError};
use crate::models::ProxyEndpoint;
use crate::proxy::classify::Classify;
use crate::proxy::pool::{ProxyPolicy, ProxyPool};
use crate::proxy::session::SessionProvider;

/// Attempt count and exponential backoff law
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Total attempts per operation (not retries after the first)
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Sleep before attempt `attempt` (0-based):
    /// `min(initial * multiplier^(attempt-1), max)`, and nothing before the first.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_backoff.as_secs_f64());

        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_backoff
        }
    }

    /// Attempts actually made; at least one
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

/// Bookkeeping for one retried call, shared by the async, blocking and
/// session-scoped drivers.
struct RetryRun<'a> {
    pool: &'a ProxyPool,
    operation: &'a str,
    max_attempts: u32,
    tried_any: bool,
    reset_done: bool,
}

impl<'a> RetryRun<'a> {
    fn new(pool: &'a ProxyPool, operation: &'a str, max_retries: u32) -> Self {
        Self {
            pool,
            operation,
            max_attempts: max_retries.max(1),
            tried_any: false,
            reset_done: false,
        }
    }

    /// Pick the proxy for the next attempt.
    ///
    /// `Ok(None)` means a direct connection, which only an empty pool under
    /// [`ProxyPolicy::AllowDirect`] produces. If every circuit is open after a
    /// proxy was already tried in this call, the breakers are reset once.
    fn select_proxy(&mut self) -> std::result::Result<Option<Arc<ProxyEndpoint>>, RotaError> {
        if let Some(proxy) = self.pool.get_next_proxy() {
            self.tried_any = true;
            return Ok(Some(proxy));
        }

        if self.pool.is_empty() {
            return match self.pool.policy() {
                ProxyPolicy::AllowDirect => {
                    debug!("No proxies configured, {} uses a direct connection", self.operation);
                    Ok(None)
                }
                ProxyPolicy::Required => Err(RotaError::ProxiesRequired),
                ProxyPolicy::Permissive => Err(RotaError::NoProxiesConfigured),
            };
        }

        if self.tried_any && !self.reset_done {
            self.reset_done = true;
            warn!(
                "All proxies unavailable during {}, resetting circuit breakers",
                self.operation
            );
            self.pool.reset_circuit_breakers();
            if let Some(proxy) = self.pool.get_next_proxy() {
                return Ok(Some(proxy));
            }
        }

        Err(RotaError::NoHealthyProxies)
    }

    fn structural<E>(&self, err: RotaError, attempts: u32) -> RetryError<E> {
        error!(
            "{} aborted after {} attempt(s): {}",
            self.operation, attempts, err
        );
        RetryError::Pool(err)
    }

    fn cancelled<E>(&self, attempts: u32) -> RetryError<E> {
        warn!(
            "{} cancelled after {} attempt(s)",
            self.operation, attempts
        );
        RetryError::Cancelled {
            operation: self.operation.to_string(),
            attempts,
        }
    }

    fn succeeded(&self, proxy: Option<&ProxyEndpoint>, attempt: u32, latency: Duration) {
        match proxy {
            Some(proxy) => {
                self.pool.mark_success(proxy, latency);
                info!(
                    "{} succeeded via {} on attempt {}/{}",
                    self.operation,
                    proxy,
                    attempt + 1,
                    self.max_attempts
                );
            }
            None => info!(
                "{} succeeded on attempt {}/{} (direct)",
                self.operation,
                attempt + 1,
                self.max_attempts
            ),
        }
    }

    /// Account for a failed attempt. `Ok(())` means another attempt may follow.
    fn failed<E>(
        &self,
        proxy: Option<&ProxyEndpoint>,
        attempt: u32,
        err: E,
    ) -> std::result::Result<(), RetryError<E>>
    where
        E: Classify + Display,
    {
        let attempts = attempt + 1;

        if err.is_cancelled() {
            return Err(self.cancelled(attempts));
        }

        let category = err.category();
        if let Some(proxy) = proxy {
            self.pool.mark_failure(proxy, &category);
        }

        if attempts >= self.max_attempts {
            error!(
                "{} failed after {} attempt(s): {}",
                self.operation, attempts, err
            );
            return Err(RetryError::Exhausted {
                operation: self.operation.to_string(),
                attempts,
                source: err,
            });
        }

        warn!(
            "{} attempt {}/{} via {} failed ({}): {}",
            self.operation,
            attempts,
            self.max_attempts,
            proxy.map(|p| p.to_string()).unwrap_or_else(|| "direct".to_string()),
            category,
            err
        );
        Ok(())
    }
}

/// Runs operations with bounded retries, backoff and proxy rotation.
///
/// Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct RetryExecutor {
    pool: Arc<ProxyPool>,
    backoff: BackoffPolicy,
    shutdown: Option<watch::Receiver<bool>>,
}

impl RetryExecutor {
    /// Create an executor using the pool's configured backoff
    pub fn new(pool: Arc<ProxyPool>) -> Self {
        let backoff = pool.settings().backoff.clone();
        Self {
            pool,
            backoff,
            shutdown: None,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Stop retrying once `shutdown` flips to true. Backoff sleeps are cut short.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(false)
    }

    /// Sleep for `delay`; returns false if shutdown was requested meanwhile
    async fn backoff_sleep(&self, delay: Duration) -> bool {
        let Some(rx) = &self.shutdown else {
            tokio::time::sleep(delay).await;
            return true;
        };

        let mut rx = rx.clone();
        if *rx.borrow_and_update() {
            return false;
        }

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                changed = rx.changed() => match changed {
                    Ok(()) if *rx.borrow_and_update() => return false,
                    Ok(()) => continue,
                    // Sender gone: nobody can cancel us anymore
                    Err(_) => {
                        (&mut sleep).await;
                        return true;
                    }
                },
            }
        }
    }

    /// Run `op` with the executor's attempt budget
    pub async fn execute<T, E, F, Fut>(
        &self,
        operation: &str,
        op: F,
    ) -> std::result::Result<T, RetryError<E>>
    where
        F: FnMut(Option<Arc<ProxyEndpoint>>) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Classify + Display,
    {
        self.execute_with_retries(operation, self.backoff.max_retries, op)
            .await
    }

    /// Run `op` up to `max_retries` times, each attempt with a freshly selected proxy.
    ///
    /// Returns the first success. After the last failed attempt the operation's
    /// own error comes back inside [`RetryError::Exhausted`]. Structural pool
    /// failures are returned immediately as [`RetryError::Pool`].
    pub async fn execute_with_retries<T, E, F, Fut>(
        &self,
        operation: &str,
        max_retries: u32,
        op: F,
    ) -> std::result::Result<T, RetryError<E>>
    where
        F: FnMut(Option<Arc<ProxyEndpoint>>) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Classify + Display,
    {
        let span = info_span!(
            "execute_with_retry",
            operation = %operation,
            operation_id = %Uuid::new_v4()
        );
        self.run_attempts(operation, max_retries, op)
            .instrument(span)
            .await
    }

    async fn run_attempts<T, E, F, Fut>(
        &self,
        operation: &str,
        max_retries: u32,
        mut op: F,
    ) -> std::result::Result<T, RetryError<E>>
    where
        F: FnMut(Option<Arc<ProxyEndpoint>>) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Classify + Display,
    {
        let mut run = RetryRun::new(&self.pool, operation, max_retries);

        for attempt in 0..run.max_attempts {
            if self.is_shutdown() {
                return Err(run.cancelled(attempt));
            }

            let proxy = match run.select_proxy() {
                Ok(proxy) => proxy,
                Err(e) => return Err(run.structural(e, attempt)),
            };

            let delay = self.backoff.delay_for(attempt);
            if !delay.is_zero() {
                debug!(
                    "Backing off {:?} before attempt {}/{}",
                    delay,
                    attempt + 1,
                    run.max_attempts
                );
                if !self.backoff_sleep(delay).await {
                    return Err(run.cancelled(attempt));
                }
            }

            let started = tokio::time::Instant::now();
            match op(proxy.clone()).await {
                Ok(value) => {
                    run.succeeded(proxy.as_deref(), attempt, started.elapsed());
                    return Ok(value);
                }
                Err(err) => run.failed(proxy.as_deref(), attempt, err)?,
            }
        }

        Err(run.structural(
            RotaError::Internal("retry loop ended without an outcome".to_string()),
            run.max_attempts,
        ))
    }

    /// Blocking variant for synchronous callers.
    ///
    /// Sleeps the current thread between attempts, so do not call it from an
    /// async task; use `tokio::task::spawn_blocking` there.
    pub fn execute_blocking<T, E, F>(
        &self,
        operation: &str,
        mut op: F,
    ) -> std::result::Result<T, RetryError<E>>
    where
        F: FnMut(Option<&ProxyEndpoint>) -> std::result::Result<T, E>,
        E: Classify + Display,
    {
        let span = info_span!(
            "execute_with_retry",
            operation = %operation,
            operation_id = %Uuid::new_v4()
        );
        let _entered = span.enter();

        let mut run = RetryRun::new(&self.pool, operation, self.backoff.max_retries);

        for attempt in 0..run.max_attempts {
            if self.is_shutdown() {
                return Err(run.cancelled(attempt));
            }

            let proxy = match run.select_proxy() {
                Ok(proxy) => proxy,
                Err(e) => return Err(run.structural(e, attempt)),
            };

            let delay = self.backoff.delay_for(attempt);
            if !delay.is_zero() {
                debug!(
                    "Backing off {:?} before attempt {}/{}",
                    delay,
                    attempt + 1,
                    run.max_attempts
                );
                std::thread::sleep(delay);
            }

            let started = std::time::Instant::now();
            match op(proxy.as_deref()) {
                Ok(value) => {
                    run.succeeded(proxy.as_deref(), attempt, started.elapsed());
                    return Ok(value);
                }
                Err(err) => run.failed(proxy.as_deref(), attempt, err)?,
            }
        }

        Err(run.structural(
            RotaError::Internal("retry loop ended without an outcome".to_string()),
            run.max_attempts,
        ))
    }

    /// Retry an operation that needs a transport session bound to the proxy.
    ///
    /// Every attempt opens a fresh session through `provider` for the selected
    /// proxy; a failed attempt closes its session before the next one starts.
    /// On success the still-open session is returned with the result and the
    /// caller owns it from then on.
    pub async fn execute_with_session<P, T, E, F, Fut>(
        &self,
        operation: &str,
        provider: &P,
        op: F,
    ) -> std::result::Result<(P::Session, T), RetryError<E>>
    where
        P: SessionProvider,
        F: FnMut(P::Session) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Classify + Display + From<RotaError>,
    {
        let span = info_span!(
            "execute_with_session",
            operation = %operation,
            operation_id = %Uuid::new_v4()
        );
        self.run_session_attempts(operation, provider, op)
            .instrument(span)
            .await
    }

    async fn run_session_attempts<P, T, E, F, Fut>(
        &self,
        operation: &str,
        provider: &P,
        mut op: F,
    ) -> std::result::Result<(P::Session, T), RetryError<E>>
    where
        P: SessionProvider,
        F: FnMut(P::Session) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Classify + Display + From<RotaError>,
    {
        let mut run = RetryRun::new(&self.pool, operation, self.backoff.max_retries);

        for attempt in 0..run.max_attempts {
            if self.is_shutdown() {
                return Err(run.cancelled(attempt));
            }

            let proxy = match run.select_proxy() {
                Ok(proxy) => proxy,
                Err(e) => return Err(run.structural(e, attempt)),
            };

            let delay = self.backoff.delay_for(attempt);
            if !delay.is_zero() && !self.backoff_sleep(delay).await {
                return Err(run.cancelled(attempt));
            }

            let started = tokio::time::Instant::now();
            let session = match provider.open(proxy.as_deref()).await {
                Ok(session) => session,
                Err(e) => {
                    run.failed(proxy.as_deref(), attempt, E::from(e))?;
                    continue;
                }
            };

            match op(session.clone()).await {
                Ok(value) => {
                    run.succeeded(proxy.as_deref(), attempt, started.elapsed());
                    return Ok((session, value));
                }
                Err(err) => {
                    provider.close(session).await;
                    run.failed(proxy.as_deref(), attempt, err)?;
                }
            }
        }

        Err(run.structural(
            RotaError::Internal("retry loop ended without an outcome".to_string()),
            run.max_attempts,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::proxy::pool::PoolSettings;
    use crate::proxy::rotation::test_support::endpoints;
    use crate::proxy::rotation::RotationStrategy;

    fn executor(count: usize, settings: PoolSettings) -> RetryExecutor {
        let pool = ProxyPool::new(endpoints(count), settings).unwrap();
        RetryExecutor::new(Arc::new(pool))
    }

    fn round_robin(threshold: u32) -> PoolSettings {
        PoolSettings {
            strategy: RotationStrategy::RoundRobin,
            circuit_threshold: threshold,
            ..PoolSettings::default()
        }
    }

    fn fast_backoff(max_retries: u32) -> BackoffPolicy {
        BackoffPolicy {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_backoff_law() {
        let backoff = BackoffPolicy::default();
        assert_eq!(backoff.delay_for(0), Duration::ZERO);
        assert_eq!(backoff.delay_for(1), Duration::from_secs(1));
        assert_eq!(backoff.delay_for(2), Duration::from_secs(2));
        assert_eq!(backoff.delay_for(3), Duration::from_secs(4));
        assert_eq!(backoff.delay_for(6), Duration::from_secs(32));
        assert_eq!(backoff.delay_for(7), Duration::from_secs(60));
        assert_eq!(backoff.delay_for(u32::MAX), Duration::from_secs(60));

        let custom = BackoffPolicy {
            max_retries: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(3),
            multiplier: 3.0,
        };
        assert_eq!(custom.delay_for(1), Duration::from_millis(500));
        assert_eq!(custom.delay_for(2), Duration::from_millis(1500));
        assert_eq!(custom.delay_for(3), Duration::from_secs(3));
    }

    #[test]
    fn test_attempts_is_at_least_one() {
        let backoff = BackoffPolicy {
            max_retries: 0,
            ..BackoffPolicy::default()
        };
        assert_eq!(backoff.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_timeouts() {
        let executor = executor(2, PoolSettings::default());
        let mut calls = 0;

        let result = executor
            .execute_with_retries("scrape #rust", 3, |proxy| {
                calls += 1;
                let n = calls;
                async move {
                    assert!(proxy.is_some());
                    if n < 3 {
                        Err(RotaError::Timeout)
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);

        let stats = executor.pool().proxy_stats();
        let failures: u64 = stats.iter().map(|s| s.failed_requests).sum();
        let successes: u64 = stats.iter().map(|s| s.successful_requests).sum();
        assert_eq!(failures, 2);
        assert_eq!(successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_keeps_original_error() {
        let executor = executor(2, PoolSettings::default());
        let calls = AtomicUsize::new(0);

        let result: std::result::Result<(), RetryError<io::Error>> = executor
            .execute_with_retries("login", 2, |_proxy| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(io::Error::new(io::ErrorKind::TimedOut, "page load timed out")) }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(err.attempts(), 2);
        assert!(err.to_string().starts_with("login failed after 2 attempt(s)"));
        assert_eq!(
            err.into_source().map(|e| e.kind()),
            Some(io::ErrorKind::TimedOut)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sleeps_between_attempts() {
        let executor = executor(1, PoolSettings::default());
        let started = tokio::time::Instant::now();
        let mut gaps = Vec::new();
        let mut last = started;

        let result: std::result::Result<(), RetryError<RotaError>> = executor
            .execute("probe", |_proxy| {
                let now = tokio::time::Instant::now();
                gaps.push(now - last);
                last = now;
                async { Err(RotaError::ProxyConnectionFailed("refused".into())) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(
            gaps,
            vec![Duration::ZERO, Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotates_proxy_between_attempts() {
        let list = endpoints(2);
        let executor = executor(2, round_robin(5));
        let mut seen = Vec::new();

        let result = executor
            .execute("discover", |proxy| {
                let proxy = proxy.expect("pool has proxies");
                seen.push(proxy.server().to_string());
                let first = seen.len() == 1;
                async move {
                    if first {
                        Err(RotaError::ProxyAuthRejected)
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(
            seen,
            vec![list[0].server().to_string(), list[1].server().to_string()]
        );

        let stats = executor.pool().proxy_stats();
        assert_eq!(stats[0].health_score, 90.0);
        assert_eq!(stats[1].successful_requests, 1);
    }

    #[tokio::test]
    async fn test_empty_permissive_pool_is_structural() {
        let executor = executor(0, PoolSettings::default());
        let calls = AtomicUsize::new(0);

        let result: std::result::Result<(), RetryError<RotaError>> = executor
            .execute("fetch", |_proxy| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(matches!(
            result,
            Err(RetryError::Pool(RotaError::NoProxiesConfigured))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_pool_with_direct_fallback() {
        let settings = PoolSettings {
            policy: ProxyPolicy::AllowDirect,
            ..PoolSettings::default()
        };
        let executor = executor(0, settings);

        let result: std::result::Result<bool, RetryError<RotaError>> = executor
            .execute("fetch", |proxy| async move { Ok(proxy.is_none()) })
            .await;

        assert!(result.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resets_breakers_once_then_fails_fast() {
        let executor = executor(1, round_robin(1));
        let calls = AtomicUsize::new(0);

        let result: std::result::Result<(), RetryError<RotaError>> = executor
            .execute_with_retries("scrape", 5, |_proxy| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RotaError::ProxyConnectionFailed("reset".into())) }
            })
            .await;

        // Attempt 1 opens the circuit, attempt 2 runs after the one reset,
        // attempt 3 finds nothing and stops instead of looping.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(
            result,
            Err(RetryError::Pool(RotaError::NoHealthyProxies))
        ));
    }

    #[tokio::test]
    async fn test_all_circuits_open_before_first_attempt() {
        let list = endpoints(1);
        let executor = executor(1, round_robin(1));
        executor
            .pool()
            .mark_failure(&list[0], &crate::proxy::classify::ErrorCategory::Timeout);

        let result: std::result::Result<(), RetryError<RotaError>> = executor
            .execute("scrape", |_proxy| async { Ok(()) })
            .await;

        assert!(result.unwrap_err().is_structural());
    }

    #[tokio::test]
    async fn test_cancelled_operation_is_not_retried() {
        let executor = executor(2, PoolSettings::default());
        let calls = AtomicUsize::new(0);

        let result: std::result::Result<(), RetryError<RotaError>> = executor
            .execute("scrape", |_proxy| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RotaError::Cancelled) }
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.attempts(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let failures: u64 = executor
            .pool()
            .proxy_stats()
            .iter()
            .map(|s| s.failed_requests)
            .sum();
        assert_eq!(failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_backoff() {
        let (tx, rx) = watch::channel(false);
        let executor = executor(2, PoolSettings::default()).with_shutdown(rx);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let _ = tx.send(true);
        });

        let started = tokio::time::Instant::now();
        let mut calls = 0;
        let result: std::result::Result<(), RetryError<RotaError>> = executor
            .execute("scrape", |_proxy| {
                calls += 1;
                async { Err(RotaError::Timeout) }
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(calls, 1);
        // Woken at 500ms instead of sleeping the full second
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_further_attempts() {
        let (tx, rx) = watch::channel(false);
        let executor = executor(2, PoolSettings::default()).with_shutdown(rx);

        let result: std::result::Result<(), RetryError<RotaError>> = executor
            .execute("scrape", |_proxy| {
                let _ = tx.send(true);
                async { Err(RotaError::Timeout) }
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.attempts(), 1);
    }

    #[test]
    fn test_blocking_variant() {
        let executor = executor(2, PoolSettings::default()).with_backoff(fast_backoff(3));
        let mut calls = 0;

        let result = executor.execute_blocking("export", |proxy| {
            assert!(proxy.is_some());
            calls += 1;
            if calls < 2 {
                Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
            } else {
                Ok("done")
            }
        });

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_blocking_variant_exhausts() {
        let executor = executor(1, PoolSettings::default()).with_backoff(fast_backoff(2));

        let result: std::result::Result<(), RetryError<RotaError>> =
            executor.execute_blocking("export", |_proxy| Err(RotaError::Timeout));

        let err = result.unwrap_err();
        assert_eq!(err.attempts(), 2);
        assert!(matches!(err.into_source(), Some(RotaError::Timeout)));
    }

    #[derive(Default)]
    struct FakeSessions {
        opened: AtomicUsize,
        closed: Mutex<Vec<usize>>,
        fail_opens: usize,
    }

    #[async_trait]
    impl SessionProvider for FakeSessions {
        type Session = usize;

        async fn open(&self, proxy: Option<&ProxyEndpoint>) -> crate::error::Result<usize> {
            assert!(proxy.is_some());
            let n = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_opens {
                return Err(RotaError::ProxyConnectionFailed("context refused".into()));
            }
            Ok(n)
        }

        async fn close(&self, session: usize) {
            self.closed.lock().push(session);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_per_attempt() {
        let executor = executor(2, round_robin(5));
        let provider = FakeSessions::default();

        let (session, value) = executor
            .execute_with_session("login", &provider, |session| async move {
                if session < 3 {
                    Err(RotaError::ProxyAuthRejected)
                } else {
                    Ok("logged in")
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "logged in");
        assert_eq!(session, 3);
        assert_eq!(provider.opened.load(Ordering::SeqCst), 3);
        // Failed attempts released their sessions, the winner stays open
        assert_eq!(*provider.closed.lock(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_open_failure_counts_as_attempt() {
        let executor = executor(2, round_robin(5));
        let provider = FakeSessions {
            fail_opens: 1,
            ..FakeSessions::default()
        };
        let mut calls = 0;

        let result: std::result::Result<_, RetryError<RotaError>> = executor
            .execute_with_session("login", &provider, |session| {
                calls += 1;
                async move { Ok(session) }
            })
            .await;

        let (session, value) = result.unwrap();
        assert_eq!((session, value), (2, 2));
        assert_eq!(calls, 1);
        assert!(provider.closed.lock().is_empty());

        let failures: u64 = executor
            .pool()
            .proxy_stats()
            .iter()
            .map(|s| s.failed_requests)
            .sum();
        assert_eq!(failures, 1);
    }
}
