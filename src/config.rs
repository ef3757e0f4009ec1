//! Configuration types.
//!
//! Everything is read from the environment. Unset or unparsable values fall
//! back to defaults; only the provider key is mandatory, and only for the
//! binary.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::onboarding::model::UserRole;
use crate::onboarding::redirect::RedirectPaths;

/// Bounds for the orchestrator's per-turn model round-trips.
const MIN_ITERATIONS: u32 = 6;
const MAX_ITERATIONS: u32 = 10;

/// Conversation orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum model round-trips per inbound user turn.
    pub max_iterations: u32,
    /// Maximum synthetic "call it now" directives per user turn.
    pub max_nudges: u32,
    /// Timeout for a single provider call. Exceeding it is fatal.
    pub provider_timeout: Duration,
    /// Timeout for a single operation executor call. Exceeding it is fatal.
    pub operation_timeout: Duration,
    /// Max tokens requested per completion.
    pub max_tokens: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 8,
            max_nudges: 1,
            provider_timeout: Duration::from_secs(30),
            operation_timeout: Duration::from_secs(20),
            max_tokens: 1024,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_iterations: env_parse("ONBOARDING_MAX_ITERATIONS")
                .unwrap_or(defaults.max_iterations)
                .clamp(MIN_ITERATIONS, MAX_ITERATIONS),
            max_nudges: env_parse("ONBOARDING_MAX_NUDGES")
                .unwrap_or(defaults.max_nudges)
                .clamp(1, 2),
            provider_timeout: env_parse("ONBOARDING_PROVIDER_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.provider_timeout),
            operation_timeout: env_parse("ONBOARDING_OPERATION_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.operation_timeout),
            max_tokens: defaults.max_tokens,
        }
    }
}

/// Bounded retry for reads that may race a recent write.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first. Never more than 3.
    pub attempts: u32,
    /// Linear backoff step: attempt `n` waits `backoff * n` before running.
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            attempts: env_parse("ONBOARDING_READ_RETRY_ATTEMPTS")
                .unwrap_or(defaults.attempts)
                .clamp(1, 3),
            backoff: env_parse("ONBOARDING_READ_RETRY_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff),
        }
    }
}

/// Redirect decision configuration.
#[derive(Debug, Clone)]
pub struct RedirectConfig {
    /// Which role wins when a user matches both at the same priority.
    pub dual_role_preference: UserRole,
    pub paths: RedirectPaths,
    /// How long a redirect request waits for an in-flight authentication.
    pub auth_wait: Duration,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            dual_role_preference: UserRole::Owner,
            paths: RedirectPaths::default(),
            auth_wait: Duration::from_millis(2000),
        }
    }
}

impl RedirectConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let dual_role_preference = std::env::var("ONBOARDING_DUAL_ROLE_PREFERENCE")
            .ok()
            .and_then(|s| s.parse::<UserRole>().ok())
            .unwrap_or(defaults.dual_role_preference);
        Self {
            dual_role_preference,
            paths: defaults.paths,
            auth_wait: env_parse("ONBOARDING_AUTH_WAIT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.auth_wait),
        }
    }
}

/// Binary-only settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub api_key: SecretString,
    pub model: String,
    pub db_path: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("ANTHROPIC_API_KEY".to_string()))?;
        if api_key.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "ANTHROPIC_API_KEY".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        Ok(Self {
            api_key: SecretString::from(api_key),
            model: std::env::var("ONBOARDING_MODEL")
                .unwrap_or_else(|_| "claude-sonnet-4-20250514".to_string()),
            db_path: std::env::var("ONBOARDING_DB_PATH")
                .unwrap_or_else(|_| "./data/onboarding.db".to_string()),
            port: env_parse("ONBOARDING_PORT").unwrap_or(8080),
        })
    }
}

/// Everything the service needs, minus the binary's own settings.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub orchestrator: OrchestratorConfig,
    pub retry: RetryConfig,
    pub redirect: RedirectConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            orchestrator: OrchestratorConfig::from_env(),
            retry: RetryConfig::from_env(),
            redirect: RedirectConfig::from_env(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orchestrator_defaults_within_bounds() {
        let config = OrchestratorConfig::default();
        assert!((MIN_ITERATIONS..=MAX_ITERATIONS).contains(&config.max_iterations));
        assert!((1..=2).contains(&config.max_nudges));
    }

    #[test]
    fn orchestrator_from_env_clamps() {
        // SAFETY: These variables are only touched by this test.
        unsafe {
            std::env::set_var("ONBOARDING_MAX_ITERATIONS", "50");
            std::env::set_var("ONBOARDING_MAX_NUDGES", "9");
        }
        let config = OrchestratorConfig::from_env();
        assert_eq!(config.max_iterations, MAX_ITERATIONS);
        assert_eq!(config.max_nudges, 2);
        unsafe {
            std::env::remove_var("ONBOARDING_MAX_ITERATIONS");
            std::env::remove_var("ONBOARDING_MAX_NUDGES");
        }
    }

    #[test]
    fn retry_defaults() {
        let retry = RetryConfig::default();
        assert_eq!(retry.attempts, 3);
        assert_eq!(retry.backoff, Duration::from_millis(500));
    }

    #[test]
    fn redirect_defaults_prefer_owner() {
        assert_eq!(
            RedirectConfig::default().dual_role_preference,
            UserRole::Owner
        );
    }
}
