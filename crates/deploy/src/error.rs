//! Error taxonomy for the deployment engine.

use std::{path::PathBuf, time::Duration};

use alloy_core::primitives::B256;

use crate::network::NetworkName;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Problems with the declared step graph or its configuration.
///
/// All of these are detected before the first network call.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("dependency cycle between steps: {}", .steps.join(" -> "))]
    CyclicDependency { steps: Vec<String> },

    #[error("step `{step}` depends on tag `{tag}` but no step provides it on network `{network}`")]
    UnresolvedDependency {
        step: String,
        tag: String,
        network: NetworkName,
    },

    #[error("step `{step}` depends on tag `{tag}` which no declared step provides")]
    UnknownTag { step: String, tag: String },

    #[error("step name `{0}` is declared more than once")]
    DuplicateName(String),

    #[error("`{0}` is not a valid identifier (expected ASCII letters, digits, `-`, `_` or `.`)")]
    InvalidIdentifier(String),

    #[error("step `{step}` references undeclared deployment `{reference}`")]
    UnknownDeployment { step: String, reference: String },

    #[error("step `{step}` references unknown account `{account}`")]
    UnknownAccount { step: String, account: String },

    #[error("network `{0}` is not configured")]
    UnknownNetwork(String),

    #[error("invalid value `{value}` in step `{step}`: {reason}")]
    InvalidValue {
        step: String,
        value: String,
        reason: String,
    },

    #[error(
        "step `{step}` needs the address of `{reference}` on `{network}`, \
         which is neither in the ledger nor deployed earlier in the plan"
    )]
    UnresolvedReference {
        step: String,
        reference: String,
        network: NetworkName,
    },

    #[error("selection `{0}` matches no declared step name or tag")]
    UnknownSelection(String),

    #[error("endpoint of network `{network}` serves chain {actual}, expected {expected}")]
    ChainIdMismatch {
        network: NetworkName,
        expected: u64,
        actual: u64,
    },
}

/// How a network client failure should be treated by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ClientErrorKind {
    /// Worth retrying: nonce races, timeouts, rate limiting, dropped connections.
    Transient,
    /// Deterministic rejection: gas estimation failure, invalid parameters.
    Rejected,
}

/// Error returned by a [`NetworkClient`](crate::NetworkClient).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} network error: {message}")]
pub struct ClientError {
    pub kind: ClientErrorKind,
    pub message: String,
}

impl ClientError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ClientErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            kind: ClientErrorKind::Rejected,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ClientErrorKind::Transient
    }
}

/// Top-level error of the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("deployment of `{name}` failed")]
    DeploymentFailed {
        name: String,
        #[source]
        cause: Box<Error>,
    },

    #[error("transaction {tx_hash} reverted in block {block_number}")]
    TransactionReverted { tx_hash: B256, block_number: u64 },

    #[error("transaction {tx_hash} did not reach {required} confirmation(s) within {waited:?}")]
    TransactionTimeout {
        tx_hash: B256,
        required: u64,
        waited: Duration,
    },

    #[error("creation transaction {tx_hash} succeeded but its receipt carries no contract address")]
    NoContractAddress { tx_hash: B256 },

    #[error("transaction submission failed")]
    Submission(#[from] ClientError),

    #[error("ledger persistence failed at {}", .path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger entry at {} is corrupted", .path.display())]
    CorruptedRecord {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("ledger already holds `{name}` on `{network}`")]
    DuplicateKey { network: NetworkName, name: String },

    #[error("no deployment of `{name}` recorded on `{network}`")]
    MissingDeployment { network: NetworkName, name: String },

    #[error("configuration batch `{batch}` failed at step {index}")]
    ConfigStepFailed {
        batch: String,
        index: usize,
        #[source]
        cause: Box<Error>,
    },

    #[error("configuration file {} is invalid: {reason}", .path.display())]
    Settings { path: PathBuf, reason: String },

    #[error("artifact `{contract}` is unusable: {reason}")]
    Artifact { contract: String, reason: String },

    #[error("account `{name}` cannot be resolved: {reason}")]
    Account { name: String, reason: String },

    #[error("{}", halted_message(.failed_step, .last_completed))]
    Halted {
        failed_step: String,
        last_completed: Option<String>,
        #[source]
        cause: Box<Error>,
    },
}

fn halted_message(failed_step: &str, last_completed: &Option<String>) -> String {
    match last_completed {
        Some(last) => format!("run halted at step `{failed_step}` (last completed step: `{last}`)"),
        None => format!("run halted at step `{failed_step}` (no step completed)"),
    }
}

impl Error {
    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn deployment_failed(name: impl Into<String>, cause: Error) -> Self {
        Self::DeploymentFailed {
            name: name.into(),
            cause: Box::new(cause),
        }
    }

    /// Walks the `DeploymentFailed`/`ConfigStepFailed`/`Halted` wrappers down to the root cause.
    pub fn root_cause(&self) -> &Error {
        match self {
            Self::DeploymentFailed { cause, .. }
            | Self::ConfigStepFailed { cause, .. }
            | Self::Halted { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}
