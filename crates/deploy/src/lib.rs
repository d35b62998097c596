//! shipyard-deploy - Idempotent, dependency-ordered contract deployment.
//!
//! This crate deploys a declared set of contracts and configuration calls to
//! a target network, recording each deployment in a durable ledger so that
//! reruns only perform what is missing.

mod accounts;
pub use accounts::{AccountSource, Accounts, SecretKey};

mod artifacts;
pub use artifacts::{Artifact, ArtifactSource, HardhatArtifacts, StaticArtifacts};

mod client;
pub use client::NetworkClient;

pub mod configure;
pub use configure::BatchReport;

mod context;
pub use context::ExecutionContext;

mod deployer;
pub use deployer::{DeployOptions, Deployer, ENV_PREFIX, SHIPYARD_FILENAME};

mod error;
pub use error::{ClientError, ClientErrorKind, ConfigurationError, Error, Result};

pub mod executor;
pub use executor::{DeployOutcome, Deployment};

pub mod fingerprint;
pub mod gate;

mod ledger;
pub use ledger::{DeploymentRecord, Ledger, PendingDeployment, ReceiptSummary};

mod manifest;
pub use manifest::{
    ArtifactSpec, ConfigBatch, ConfigGuard, ConfigStep, Manifest, Scheduled, Step, StepKind,
};

mod memory;
pub use memory::InMemoryNetwork;

mod network;
pub use network::{NetworkConfig, NetworkName, WaitPolicy};

pub mod resolver;
pub use resolver::{ExecutionPlan, PlanFilter, PlannedStep, StepId};

pub mod rpc;
pub use rpc::JsonRpcClient;

mod runner;
pub use runner::{ForceRedeploy, RunReport, Runner, StepOutcome, StepReport};

pub mod signing;

mod stale;
pub use stale::{StaleDependent, StaleReason, stale_dependents};

mod types;
pub use types::{
    ArgValue, NumberLiteral, PendingTx, Receipt, ResolvedValue, TransactionIntent, encode_call,
    encode_params, selector,
};

mod waiter;
pub use waiter::ConfirmationWaiter;
