//! Failover Platform
//!
//! Wraps a list of platforms and rotates between them: a platform that
//! fails is skipped for a cooldown period, a full traversal with nothing
//! left to try costs one rate-limiter token and resets the marks, and an
//! empty token bucket fails the call loudly.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;

use crate::catalog::{FallbackCatalog, ModelCatalog};
use crate::error::PlatformError;
use crate::message::Input;
use crate::platform::Platform;
use crate::result::DeferredResult;

/// Failover policy knobs.
#[derive(Debug, Clone)]
pub struct FailoverConfig {
    /// How long a failed platform is skipped before it is eligible again.
    pub retry_period: Duration,
    /// Retry tokens per window; each full reset-and-retraverse costs one.
    pub rate_limit_tokens: u32,
    /// Token window length.
    pub rate_limit_window: Duration,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            retry_period: Duration::from_secs(60),
            rate_limit_tokens: 3,
            rate_limit_window: Duration::from_secs(60),
        }
    }
}

/// Fixed-window token counter.
pub struct RateLimiter {
    max_tokens: u32,
    window: Duration,
    state: Mutex<WindowState>,
}

struct WindowState {
    started: Instant,
    used: u32,
}

impl RateLimiter {
    /// Limiter granting `max_tokens` per `window`.
    pub fn new(max_tokens: u32, window: Duration) -> Self {
        Self {
            max_tokens,
            window,
            state: Mutex::new(WindowState {
                started: Instant::now(),
                used: 0,
            }),
        }
    }

    /// Take one token if any remain in the current window.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.started.elapsed() >= self.window {
            state.started = Instant::now();
            state.used = 0;
        }
        if state.used < self.max_tokens {
            state.used += 1;
            true
        } else {
            false
        }
    }
}

struct Record {
    platform: Arc<dyn Platform>,
    failed_at: Option<Instant>,
}

/// Platform that fails over across a list of equivalent platforms.
pub struct FailoverPlatform {
    records: AsyncMutex<Vec<Record>>,
    limiter: RateLimiter,
    retry_period: Duration,
}

impl std::fmt::Debug for FailoverPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailoverPlatform")
            .field("retry_period", &self.retry_period)
            .finish()
    }
}

impl FailoverPlatform {
    /// Wrap the given platforms. An empty list is a construction error.
    pub fn new(
        platforms: Vec<Arc<dyn Platform>>,
        config: FailoverConfig,
    ) -> Result<Self, PlatformError> {
        if platforms.is_empty() {
            return Err(PlatformError::InvalidInput(
                "failover requires at least one platform".to_string(),
            ));
        }

        Ok(Self {
            records: AsyncMutex::new(
                platforms
                    .into_iter()
                    .map(|platform| Record {
                        platform,
                        failed_at: None,
                    })
                    .collect(),
            ),
            limiter: RateLimiter::new(config.rate_limit_tokens, config.rate_limit_window),
            retry_period: config.retry_period,
        })
    }

    fn is_eligible(&self, record: &Record) -> bool {
        match record.failed_at {
            None => true,
            Some(failed_at) => failed_at.elapsed() >= self.retry_period,
        }
    }

    async fn eligible_indices(&self) -> Vec<usize> {
        let records = self.records.lock().await;
        records
            .iter()
            .enumerate()
            .filter(|(_, r)| self.is_eligible(r))
            .map(|(idx, _)| idx)
            .collect()
    }

    async fn platform_at(&self, idx: usize) -> Arc<dyn Platform> {
        self.records.lock().await[idx].platform.clone()
    }

    async fn mark_failed(&self, idx: usize) {
        self.records.lock().await[idx].failed_at = Some(Instant::now());
    }

    async fn mark_recovered(&self, idx: usize) {
        self.records.lock().await[idx].failed_at = None;
    }

    /// One more full traversal, bought with a rate-limiter token.
    async fn buy_retraversal(&self) -> bool {
        if !self.limiter.try_acquire() {
            return false;
        }
        tracing::info!("Retry token granted, clearing failover marks");
        let mut records = self.records.lock().await;
        for record in records.iter_mut() {
            record.failed_at = None;
        }
        true
    }
}

#[async_trait]
impl Platform for FailoverPlatform {
    async fn invoke(&self, input: Input) -> Result<DeferredResult, PlatformError> {
        loop {
            for idx in self.eligible_indices().await {
                let platform = self.platform_at(idx).await;
                match platform.invoke(input.clone()).await {
                    Ok(result) => {
                        self.mark_recovered(idx).await;
                        return Ok(result);
                    }
                    Err(e) => {
                        tracing::warn!(platform = idx, error = %e, "Platform failed, rotating");
                        self.mark_failed(idx).await;
                    }
                }
            }

            if !self.buy_retraversal().await {
                return Err(PlatformError::AllPlatformsFailed);
            }
        }
    }

    async fn model_catalog(&self) -> Result<Arc<dyn ModelCatalog>, PlatformError> {
        loop {
            for idx in self.eligible_indices().await {
                let platform = self.platform_at(idx).await;
                match platform.model_catalog().await {
                    Ok(_) => {
                        self.mark_recovered(idx).await;
                        // Which platform serves the next call is unknowable
                        // here, so hand back the permissive catalog.
                        return Ok(FallbackCatalog::shared());
                    }
                    Err(e) => {
                        tracing::warn!(platform = idx, error = %e, "Catalog fetch failed, rotating");
                        self.mark_failed(idx).await;
                    }
                }
            }

            if !self.buy_retraversal().await {
                return Err(PlatformError::AllPlatformsFailed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;
    use crate::platform::ResultConverter;
    use crate::result::{PlatformResult, RawResult};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct LabelConverter(String);

    impl ResultConverter for LabelConverter {
        fn supports(&self, _model: &Model) -> bool {
            true
        }

        fn convert(&self, _raw: RawResult) -> Result<PlatformResult, PlatformError> {
            Ok(PlatformResult::Text(self.0.clone()))
        }
    }

    /// Platform whose success is flipped by a shared flag.
    struct TogglePlatform {
        label: String,
        ok: Arc<AtomicBool>,
        invocations: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Platform for TogglePlatform {
        async fn invoke(&self, _input: Input) -> Result<DeferredResult, PlatformError> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            if self.ok.load(Ordering::SeqCst) {
                Ok(DeferredResult::new(
                    RawResult::Json(serde_json::json!({})),
                    Arc::new(LabelConverter(self.label.clone())),
                ))
            } else {
                Err(PlatformError::Client(format!("{} is down", self.label)))
            }
        }

        async fn model_catalog(&self) -> Result<Arc<dyn ModelCatalog>, PlatformError> {
            if self.ok.load(Ordering::SeqCst) {
                Ok(FallbackCatalog::shared())
            } else {
                Err(PlatformError::Client(format!("{} is down", self.label)))
            }
        }
    }

    struct Handle {
        ok: Arc<AtomicBool>,
        invocations: Arc<AtomicUsize>,
    }

    fn toggle(label: &str, ok: bool) -> (Arc<dyn Platform>, Handle) {
        let ok_flag = Arc::new(AtomicBool::new(ok));
        let invocations = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(TogglePlatform {
                label: label.to_string(),
                ok: ok_flag.clone(),
                invocations: invocations.clone(),
            }),
            Handle {
                ok: ok_flag,
                invocations,
            },
        )
    }

    fn input() -> Input {
        Input::text("any", "hello")
    }

    async fn resolve_label(result: DeferredResult) -> String {
        match result.resolve().await.unwrap() {
            PlatformResult::Text(label) => label,
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_construction_fails() {
        let err = FailoverPlatform::new(vec![], FailoverConfig::default()).unwrap_err();
        assert!(matches!(err, PlatformError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_rotation_under_cooldown_and_recovery() {
        let (a, a_handle) = toggle("A", false);
        let (b, b_handle) = toggle("B", true);
        let (c, c_handle) = toggle("C", true);

        let failover = FailoverPlatform::new(
            vec![a, b, c],
            FailoverConfig {
                retry_period: Duration::from_millis(150),
                rate_limit_tokens: 3,
                rate_limit_window: Duration::from_secs(60),
            },
        )
        .unwrap();

        // Phase 1: A fails, B answers.
        let result = failover.invoke(input()).await.unwrap();
        assert_eq!(resolve_label(result).await, "B");
        assert_eq!(a_handle.invocations.load(Ordering::SeqCst), 1);
        assert_eq!(c_handle.invocations.load(Ordering::SeqCst), 0);

        // Phase 2: within A's cooldown, B starts failing, C answers.
        // A must be skipped without another attempt.
        tokio::time::sleep(Duration::from_millis(40)).await;
        b_handle.ok.store(false, Ordering::SeqCst);
        let result = failover.invoke(input()).await.unwrap();
        assert_eq!(resolve_label(result).await, "C");
        assert_eq!(a_handle.invocations.load(Ordering::SeqCst), 1);
        assert_eq!(b_handle.invocations.load(Ordering::SeqCst), 2);

        // Phase 3: everything is down. Tokens buy three extra traversals,
        // then the call fails loudly.
        tokio::time::sleep(Duration::from_millis(40)).await;
        c_handle.ok.store(false, Ordering::SeqCst);
        let err = failover.invoke(input()).await.unwrap_err();
        assert!(matches!(err, PlatformError::AllPlatformsFailed));

        let total = a_handle.invocations.load(Ordering::SeqCst)
            + b_handle.invocations.load(Ordering::SeqCst)
            + c_handle.invocations.load(Ordering::SeqCst);
        // 3 platforms x (3 tokens + 1) is the hard ceiling.
        assert!(total <= 3 * 4 + 2, "too many invocations: {}", total);

        // Phase 4: cooldown elapsed, A recovered.
        tokio::time::sleep(Duration::from_millis(200)).await;
        a_handle.ok.store(true, Ordering::SeqCst);
        let result = failover.invoke(input()).await.unwrap();
        assert_eq!(resolve_label(result).await, "A");
    }

    #[tokio::test]
    async fn test_exhausted_limiter_fails_after_single_traversal() {
        let (a, a_handle) = toggle("A", false);
        let (b, b_handle) = toggle("B", false);

        let failover = FailoverPlatform::new(
            vec![a, b],
            FailoverConfig {
                retry_period: Duration::from_secs(60),
                rate_limit_tokens: 0,
                rate_limit_window: Duration::from_secs(60),
            },
        )
        .unwrap();

        let err = failover.invoke(input()).await.unwrap_err();
        assert!(matches!(err, PlatformError::AllPlatformsFailed));

        // With no tokens, every platform is tried exactly once.
        assert_eq!(a_handle.invocations.load(Ordering::SeqCst), 1);
        assert_eq!(b_handle.invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_success_clears_failure_mark() {
        let (a, a_handle) = toggle("A", false);

        let failover = FailoverPlatform::new(
            vec![a],
            FailoverConfig {
                retry_period: Duration::from_millis(50),
                rate_limit_tokens: 0,
                rate_limit_window: Duration::from_secs(60),
            },
        )
        .unwrap();

        assert!(failover.invoke(input()).await.is_err());

        tokio::time::sleep(Duration::from_millis(80)).await;
        a_handle.ok.store(true, Ordering::SeqCst);
        assert!(failover.invoke(input()).await.is_ok());

        // Mark cleared: the next call goes straight through.
        assert!(failover.invoke(input()).await.is_ok());
        assert_eq!(a_handle.invocations.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_catalog_is_permissive_fallback() {
        let (a, _a_handle) = toggle("A", true);

        let failover =
            FailoverPlatform::new(vec![a], FailoverConfig::default()).unwrap();

        let catalog = failover.model_catalog().await.unwrap();
        let model = catalog.get_model("anything-goes").await.unwrap();
        assert_eq!(model.name, "anything-goes");
    }

    #[test]
    fn test_rate_limiter_window() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }
}
