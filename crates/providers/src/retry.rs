//! Bounded retry around a single provider.
//!
//! Every attempt runs under its own timeout. Only errors a fresh attempt
//! could plausibly fix are retried; the last error is returned once the
//! attempts run out.

use async_trait::async_trait;
use pulsechat_core::error::ProviderError;
use pulsechat_core::provider::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Wraps a provider with a per-attempt timeout and a retry budget.
pub struct RetryProvider {
    inner: Arc<dyn pulsechat_core::Provider>,
    timeout: Duration,
    max_retries: u32,
    backoff: Duration,
}

impl RetryProvider {
    /// `max_retries` counts attempts after the first one.
    pub fn new(inner: Arc<dyn pulsechat_core::Provider>, timeout: Duration, max_retries: u32) -> Self {
        Self {
            inner,
            timeout,
            max_retries,
            backoff: Duration::from_millis(500),
        }
    }

    /// Base delay between attempts, doubled after each retry.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Total attempts this wrapper will make before giving up.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

#[async_trait]
impl pulsechat_core::Provider for RetryProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let attempts = self.max_attempts();
        let mut delay = self.backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error =
                match tokio::time::timeout(self.timeout, self.inner.complete(request.clone())).await
                {
                    Ok(Ok(response)) => {
                        if attempt > 1 {
                            info!(provider = %self.inner.name(), attempt, "Retry succeeded");
                        }
                        return Ok(response);
                    }
                    Ok(Err(e)) => e,
                    Err(_) => ProviderError::Timeout(format!(
                        "Provider '{}' timed out after {}s",
                        self.inner.name(),
                        self.timeout.as_secs_f64()
                    )),
                };

            if !error.is_retryable() || attempt >= attempts {
                warn!(
                    provider = %self.inner.name(),
                    attempt,
                    error = %error,
                    "Completion failed, giving up"
                );
                return Err(error);
            }

            warn!(
                provider = %self.inner.name(),
                attempt,
                total = attempts,
                error = %error,
                "Completion failed, retrying"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        self.inner.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulsechat_core::Provider;
    use pulsechat_core::message::Message;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replies from a fixed script, one entry per call.
    struct ScriptedProvider {
        script: Mutex<VecDeque<std::result::Result<&'static str, ProviderError>>>,
        call_count: Mutex<usize>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<std::result::Result<&'static str, ProviderError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                call_count: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.call_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl pulsechat_core::Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            _request: ProviderRequest,
        ) -> std::result::Result<ProviderResponse, ProviderError> {
            *self.call_count.lock().unwrap() += 1;
            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ProviderError::NotConfigured("script exhausted".into())));
            next.map(|text| ProviderResponse {
                message: Message::assistant(text),
                usage: None,
                model: "test-model".into(),
            })
        }
    }

    /// A mock provider that hangs forever (for timeout testing).
    struct HangingProvider {
        call_count: Mutex<usize>,
    }

    #[async_trait]
    impl pulsechat_core::Provider for HangingProvider {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn complete(
            &self,
            _request: ProviderRequest,
        ) -> std::result::Result<ProviderResponse, ProviderError> {
            *self.call_count.lock().unwrap() += 1;
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!()
        }
    }

    fn test_request() -> ProviderRequest {
        ProviderRequest {
            model: "test".into(),
            messages: vec![Message::user("hello")],
            sampling: SamplingConfig::default(),
        }
    }

    fn wrap(inner: Arc<dyn pulsechat_core::Provider>, retries: u32) -> RetryProvider {
        RetryProvider::new(inner, Duration::from_secs(5), retries).with_backoff(Duration::ZERO)
    }

    #[tokio::test]
    async fn first_attempt_succeeds() {
        let inner = Arc::new(ScriptedProvider::new(vec![Ok("hi")]));
        let provider = wrap(inner.clone(), 2);

        let response = provider.complete(test_request()).await.unwrap();
        assert_eq!(response.message.content, "hi");
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let inner = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::Network("conn reset".into())),
            Err(ProviderError::ApiError {
                status_code: 503,
                message: "unavailable".into(),
            }),
            Ok("third time"),
        ]));
        let provider = wrap(inner.clone(), 2);

        let response = provider.complete(test_request()).await.unwrap();
        assert_eq!(response.message.content, "third time");
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let inner = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::Network("a".into())),
            Err(ProviderError::Network("b".into())),
            Err(ProviderError::Network("c".into())),
            Ok("never reached"),
        ]));
        let provider = wrap(inner.clone(), 2);

        match provider.complete(test_request()).await {
            Err(ProviderError::Network(msg)) => assert_eq!(msg, "c"),
            other => panic!("Expected Network error, got: {other:?}"),
        }
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test]
    async fn final_errors_are_not_retried() {
        let inner = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::AuthenticationFailed("bad key".into())),
            Ok("never reached"),
        ]));
        let provider = wrap(inner.clone(), 2);

        assert!(matches!(
            provider.complete(test_request()).await,
            Err(ProviderError::AuthenticationFailed(_))
        ));
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test]
    async fn zero_retries_means_single_attempt() {
        let inner = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::Timeout("slow".into())),
            Ok("never reached"),
        ]));
        let provider = wrap(inner.clone(), 0);

        assert!(provider.complete(test_request()).await.is_err());
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn each_attempt_is_timed_out() {
        let inner = Arc::new(HangingProvider {
            call_count: Mutex::new(0),
        });
        let provider =
            RetryProvider::new(inner.clone(), Duration::from_millis(50), 1).with_backoff(Duration::ZERO);

        assert!(matches!(
            provider.complete(test_request()).await,
            Err(ProviderError::Timeout(_))
        ));
        assert_eq!(*inner.call_count.lock().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_between_attempts() {
        let inner = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::Network("a".into())),
            Err(ProviderError::Network("b".into())),
            Ok("ok"),
        ]));
        let provider = RetryProvider::new(inner.clone(), Duration::from_secs(5), 2)
            .with_backoff(Duration::from_millis(100));

        let start = tokio::time::Instant::now();
        provider.complete(test_request()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[test]
    fn name_passes_through() {
        let inner = Arc::new(ScriptedProvider::new(vec![]));
        assert_eq!(wrap(inner, 2).name(), "scripted");
    }
}
