use std::env;
use std::time::Duration;

use anyhow::{bail, Result};

pub const DEFAULT_HEADER_KEY: &str = "x-jwt";
pub const DEFAULT_KEY_NAMESPACE: &str = "platform/app-key";
pub const DEFAULT_MAX_EXP_INTERVAL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_KEY_REFRESH_INTERVAL: Duration = Duration::from_secs(60);
pub const MIN_KEY_REFRESH_INTERVAL: Duration = Duration::from_secs(5);
/// Missed refreshes tolerated before issuer keys stop being trusted.
pub const KEY_STALENESS_REFRESHES: u32 = 3;

/// Header that carries the verified issuer to downstream handlers.
pub const APP_ID_HEADER: &str = "x-app-id";

/// Tunables for token verification. Immutable once the filter is built.
#[derive(Debug, Clone)]
pub struct VerificationPolicy {
    /// When false every request passes through uninspected.
    pub enabled: bool,
    /// Request header holding the raw token.
    pub header_key: String,
    /// Upper bound on `exp - now` for an accepted token.
    pub max_expiration_interval: Duration,
    /// Clock skew tolerated on the expiry check.
    pub leeway: Duration,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            header_key: DEFAULT_HEADER_KEY.to_string(),
            max_expiration_interval: DEFAULT_MAX_EXP_INTERVAL,
            leeway: Duration::ZERO,
        }
    }
}

impl VerificationPolicy {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    pub fn with_header_key(mut self, header_key: impl Into<String>) -> Self {
        self.header_key = header_key.into();
        self
    }

    pub fn with_max_expiration_interval(mut self, interval: Duration) -> Self {
        self.max_expiration_interval = interval;
        self
    }

    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }
}

/// Where issuer key records are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySourceLocation {
    File(String),
    Url(String),
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub policy: VerificationPolicy,
    /// Hierarchical location of the issuer records, e.g. `platform/app-key`.
    pub key_namespace: String,
    pub key_source: Option<KeySourceLocation>,
    pub key_refresh_interval: Duration,
    /// Age after which the key snapshot fails lookups closed. Defaults to
    /// [`KEY_STALENESS_REFRESHES`] refresh intervals.
    pub key_max_staleness: Duration,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`GatewayConfig::from_env`] with an explicit variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let enabled = lookup("ENABLE_JWT")
            .map(|value| parse_bool(&value))
            .unwrap_or(false);
        let header_key = lookup("JWT_KEY")
            .map(|value| value.trim().to_ascii_lowercase())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_HEADER_KEY.to_string());
        let key_namespace = lookup("JWT_CONFIG_PATH")
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_KEY_NAMESPACE.to_string());
        let max_exp_secs = lookup("JWT_MAX_EXP_INTERVAL_SECONDS")
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_MAX_EXP_INTERVAL.as_secs());
        let leeway_secs = lookup("JWT_LEEWAY_SECONDS")
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(0);
        let key_refresh_interval = lookup("JWT_KEYS_REFRESH_SECONDS")
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_KEY_REFRESH_INTERVAL)
            .max(MIN_KEY_REFRESH_INTERVAL);
        let key_max_staleness = lookup("JWT_KEYS_MAX_STALENESS_SECONDS")
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(key_refresh_interval * KEY_STALENESS_REFRESHES);

        let key_source = match (lookup("JWT_KEYS_FILE"), lookup("JWT_KEYS_URL")) {
            (Some(_), Some(_)) => bail!("JWT_KEYS_FILE and JWT_KEYS_URL are mutually exclusive"),
            (Some(path), None) => Some(KeySourceLocation::File(path)),
            (None, Some(url)) => Some(KeySourceLocation::Url(url)),
            (None, None) => None,
        };

        if enabled && key_source.is_none() {
            bail!("ENABLE_JWT is set but neither JWT_KEYS_FILE nor JWT_KEYS_URL is configured");
        }

        Ok(Self {
            policy: VerificationPolicy {
                enabled,
                header_key,
                max_expiration_interval: Duration::from_secs(max_exp_secs),
                leeway: Duration::from_secs(leeway_secs),
            },
            key_namespace,
            key_source,
            key_refresh_interval,
            key_max_staleness,
        })
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
