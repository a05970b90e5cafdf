//! Language-model provider implementations for PulseChat.
//!
//! All providers implement the `pulsechat_core::Provider` trait.
//! [`build_from_config`] wires the HTTP client behind the retry policy.

pub mod openai_compat;
pub mod retry;

pub use openai_compat::OpenAiCompatProvider;
pub use retry::RetryProvider;

use pulsechat_config::AppConfig;
use pulsechat_core::Provider;
use std::sync::Arc;
use std::time::Duration;

/// Build the configured provider stack.
///
/// Fails with a configuration error when no API key is available.
pub fn build_from_config(config: &AppConfig) -> pulsechat_core::Result<Arc<dyn Provider>> {
    let api_key = config
        .require_api_key()
        .map_err(|e| pulsechat_core::Error::Config {
            message: e.to_string(),
        })?;

    let settings = &config.provider;
    let timeout = Duration::from_secs(settings.timeout_secs);
    let client = OpenAiCompatProvider::new(&settings.name, &settings.base_url, api_key, timeout)?;

    tracing::info!(
        provider = %settings.name,
        model = %settings.model,
        timeout_secs = settings.timeout_secs,
        max_retries = settings.max_retries,
        "Language-model provider configured"
    );

    Ok(Arc::new(RetryProvider::new(
        Arc::new(client),
        timeout,
        settings.max_retries,
    )))
}
