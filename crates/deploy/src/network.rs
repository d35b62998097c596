//! Target network identity and per-network settings.

use std::time::Duration;

use derive_more::{Deref, Display};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigurationError;

/// Default confirmation depth when a network does not set one.
pub const DEFAULT_CONFIRMATIONS: u64 = 1;
/// Default budget for a single confirmation wait.
pub const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 300;
/// Default interval between receipt polls.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
/// Default number of resubmissions after a transient submission error.
pub const DEFAULT_SUBMIT_RETRIES: usize = 3;
/// Default initial backoff between resubmissions.
pub const DEFAULT_RETRY_MIN_DELAY_MS: u64 = 500;

/// Name of a target network, e.g. `sepolia` or `baseSepolia`.
///
/// The name doubles as a ledger directory, so it is restricted to
/// ASCII letters, digits, `-` and `_`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Deref, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NetworkName(String);

impl NetworkName {
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigurationError> {
        let name = name.into();
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(name))
        } else {
            Err(ConfigurationError::InvalidIdentifier(name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for NetworkName {
    type Error = ConfigurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NetworkName> for String {
    fn from(value: NetworkName) -> Self {
        value.0
    }
}

/// Connection and finality settings for one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// JSON-RPC endpoint.
    pub rpc_url: Url,
    /// Expected chain id; checked against the node on connect when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    /// Blocks required on top of the inclusion block before a transaction is final.
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    /// Maximum time spent waiting for one transaction to reach its depth.
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
    /// Interval between receipt polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Resubmissions allowed after transient submission errors.
    #[serde(default = "default_submit_retries")]
    pub submit_retries: usize,
    /// First backoff delay between resubmissions; grows exponentially.
    #[serde(default = "default_retry_min_delay_ms")]
    pub retry_min_delay_ms: u64,
}

fn default_confirmations() -> u64 {
    DEFAULT_CONFIRMATIONS
}

fn default_confirmation_timeout_secs() -> u64 {
    DEFAULT_CONFIRMATION_TIMEOUT_SECS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_submit_retries() -> usize {
    DEFAULT_SUBMIT_RETRIES
}

fn default_retry_min_delay_ms() -> u64 {
    DEFAULT_RETRY_MIN_DELAY_MS
}

impl NetworkConfig {
    /// Settings for `rpc_url` with every other field at its default.
    pub fn new(rpc_url: Url) -> Self {
        Self {
            rpc_url,
            chain_id: None,
            confirmations: DEFAULT_CONFIRMATIONS,
            confirmation_timeout_secs: DEFAULT_CONFIRMATION_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            submit_retries: DEFAULT_SUBMIT_RETRIES,
            retry_min_delay_ms: DEFAULT_RETRY_MIN_DELAY_MS,
        }
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy {
            confirmations: self.confirmations,
            timeout: Duration::from_secs(self.confirmation_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            submit_retries: self.submit_retries,
            retry_min_delay: Duration::from_millis(self.retry_min_delay_ms),
        }
    }
}

/// Timing parameters the confirmation waiter runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub confirmations: u64,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub submit_retries: usize,
    pub retry_min_delay: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            confirmations: DEFAULT_CONFIRMATIONS,
            timeout: Duration::from_secs(DEFAULT_CONFIRMATION_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            submit_retries: DEFAULT_SUBMIT_RETRIES,
            retry_min_delay: Duration::from_millis(DEFAULT_RETRY_MIN_DELAY_MS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_name_validation() {
        assert!(NetworkName::new("baseSepolia").is_ok());
        assert!(NetworkName::new("arbitrum-one_2").is_ok());
        assert!(NetworkName::new("").is_err());
        assert!(NetworkName::new("../mainnet").is_err());
        assert!(NetworkName::new("main net").is_err());
    }

    #[test]
    fn test_network_config_defaults_from_toml() {
        let config: NetworkConfig =
            toml::from_str(r#"rpc_url = "http://localhost:8545""#).unwrap();
        assert_eq!(config.confirmations, DEFAULT_CONFIRMATIONS);
        assert_eq!(config.chain_id, None);

        let policy = config.wait_policy();
        assert_eq!(policy.poll_interval, Duration::from_millis(DEFAULT_POLL_INTERVAL_MS));
        assert_eq!(policy.submit_retries, DEFAULT_SUBMIT_RETRIES);
    }

    #[test]
    fn test_network_name_rejected_when_deserializing() {
        let result: Result<NetworkName, _> = serde_json::from_str(r#""bad/name""#);
        assert!(result.is_err());
    }
}
