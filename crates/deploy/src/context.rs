//! Execution context passed to the deploy executor and the configuration runner.

use alloy_core::primitives::Address;

use crate::{
    accounts::Accounts,
    artifacts::ArtifactSource,
    client::NetworkClient,
    error::{ConfigurationError, Error, Result},
    ledger::Ledger,
    network::NetworkName,
    types::{ArgValue, ResolvedValue},
    waiter::ConfirmationWaiter,
};

/// Everything a step needs to run against one network.
pub struct ExecutionContext<'a, C, A: ?Sized> {
    pub network: &'a NetworkName,
    pub ledger: &'a Ledger,
    pub waiter: &'a ConfirmationWaiter<C>,
    pub artifacts: &'a A,
    pub accounts: &'a Accounts,
    /// Sender of steps that do not name one.
    pub default_account: &'a str,
}

impl<C: NetworkClient, A: ArtifactSource + ?Sized> ExecutionContext<'_, C, A> {
    /// Confirmation depth configured for the network.
    pub fn confirmations(&self) -> u64 {
        self.waiter.policy().confirmations
    }

    /// Address of the step's sender, falling back to the default account.
    pub fn sender(&self, from: Option<&str>) -> Result<Address> {
        self.accounts.address(from.unwrap_or(self.default_account))
    }

    /// Resolves declared arguments against the ledger and the named accounts.
    pub fn resolve_args(&self, step: &str, args: &[ArgValue]) -> Result<Vec<ResolvedValue>> {
        args.iter().map(|arg| self.resolve(step, arg)).collect()
    }

    pub fn resolve(&self, step: &str, value: &ArgValue) -> Result<ResolvedValue> {
        let invalid = |value: String, reason: String| -> Error {
            ConfigurationError::InvalidValue {
                step: step.to_string(),
                value,
                reason,
            }
            .into()
        };

        Ok(match value {
            ArgValue::Address(address) => ResolvedValue::Address(*address),
            ArgValue::Uint(literal) => ResolvedValue::Uint(
                literal
                    .to_u256()
                    .map_err(|reason| invalid(literal.to_string(), reason))?,
            ),
            ArgValue::Int(literal) => ResolvedValue::Int(
                literal
                    .to_i256()
                    .map_err(|reason| invalid(literal.to_string(), reason))?,
            ),
            ArgValue::Bool(b) => ResolvedValue::Bool(*b),
            ArgValue::String(s) => ResolvedValue::String(s.clone()),
            ArgValue::Bytes(bytes) => ResolvedValue::Bytes(bytes.clone()),
            ArgValue::Array(items) => ResolvedValue::Array(self.resolve_args(step, items)?),
            ArgValue::Deployment(name) => ResolvedValue::Address(self.deployed_address(name)?),
            ArgValue::Account(name) => ResolvedValue::Address(self.accounts.address(name)?),
        })
    }

    /// Address recorded in the ledger for `name` on this network.
    pub fn deployed_address(&self, name: &str) -> Result<Address> {
        self.ledger
            .get(self.network, name)
            .map(|record| record.address)
            .ok_or_else(|| Error::MissingDeployment {
                network: self.network.clone(),
                name: name.to_string(),
            })
    }
}
