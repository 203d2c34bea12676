use std::env;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use dotenvy::dotenv;

/// Target origin that places no restriction on the receiver.
pub const ANY_ORIGIN: &str = "*";

/// Window a call is given when the caller does not pick one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Provider configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Origin the transport may deliver outbound requests to.
    pub target_origin: String,
    /// Timeout for calls issued without an explicit one.
    pub default_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            target_origin: ANY_ORIGIN.to_string(),
            default_timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ProviderConfig {
    pub fn with_target_origin(mut self, origin: impl Into<String>) -> Self {
        self.target_origin = origin.into();
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Load configuration from environment variables
    ///
    /// - `FRAME_PROVIDER_TARGET_ORIGIN` (default `*`)
    /// - `FRAME_PROVIDER_TIMEOUT_MS` (default `60000`)
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_vars(
            env::var("FRAME_PROVIDER_TARGET_ORIGIN").ok(),
            env::var("FRAME_PROVIDER_TIMEOUT_MS").ok(),
        )
    }

    fn from_vars(target_origin: Option<String>, timeout_ms: Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let default_timeout = match timeout_ms {
            Some(raw) => {
                let ms: u64 = raw
                    .trim()
                    .parse()
                    .context("FRAME_PROVIDER_TIMEOUT_MS must be a valid number")?;
                if ms == 0 {
                    bail!("FRAME_PROVIDER_TIMEOUT_MS must be greater than zero");
                }
                Duration::from_millis(ms)
            }
            None => defaults.default_timeout,
        };

        Ok(Self {
            target_origin: target_origin
                .filter(|origin| !origin.trim().is_empty())
                .unwrap_or(defaults.target_origin),
            default_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProviderConfig::default();
        assert_eq!(config.target_origin, "*");
        assert_eq!(config.default_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_builder() {
        let config = ProviderConfig::default()
            .with_target_origin("https://wallet.example")
            .with_default_timeout(Duration::from_secs(5));
        assert_eq!(config.target_origin, "https://wallet.example");
        assert_eq!(config.default_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_from_vars_unset_uses_defaults() {
        assert_eq!(
            ProviderConfig::from_vars(None, None).unwrap(),
            ProviderConfig::default()
        );
    }

    #[test]
    fn test_from_vars_reads_values() {
        let config = ProviderConfig::from_vars(
            Some("https://parent.example".into()),
            Some(" 1500 ".into()),
        )
        .unwrap();
        assert_eq!(config.target_origin, "https://parent.example");
        assert_eq!(config.default_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_from_vars_blank_origin_falls_back() {
        let config = ProviderConfig::from_vars(Some("  ".into()), None).unwrap();
        assert_eq!(config.target_origin, "*");
    }

    #[test]
    fn test_from_vars_rejects_bad_timeout() {
        let err = ProviderConfig::from_vars(None, Some("soon".into())).unwrap_err();
        assert!(err.to_string().contains("FRAME_PROVIDER_TIMEOUT_MS"));

        let err = ProviderConfig::from_vars(None, Some("0".into())).unwrap_err();
        assert!(err.to_string().contains("greater than zero"));
    }
}
