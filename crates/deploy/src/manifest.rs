//! Declared deployment and configuration steps.
//!
//! A manifest is the fixed, ordered set of steps a run may execute. Each step
//! provides tags, depends on tags, and may be restricted to a set of networks.
//! Declaration order is significant: it breaks ties when the resolver orders
//! steps that have no constraint between them.

use std::collections::BTreeSet;

use derive_more::Deref;
use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigurationError,
    network::NetworkName,
    types::{ArgValue, is_valid_signature},
};

/// Scheduling header shared by every kind of step.
///
/// The network gate and the dependency resolver only ever look at a step
/// through this trait.
pub trait Scheduled {
    /// Unique name of the step.
    fn name(&self) -> &str;
    /// Tags this step provides to its dependents.
    fn tags(&self) -> &BTreeSet<String>;
    /// Tags that must be fully scheduled before this step.
    fn depends_on(&self) -> &BTreeSet<String>;
    /// Networks this step applies to; empty means all.
    fn networks(&self) -> &BTreeSet<NetworkName>;
}

/// A named contract deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    /// Ledger key, unique per manifest.
    pub name: String,
    /// Contract type resolved through the artifact source; defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<String>,
    /// Constructor arguments, in order.
    #[serde(default)]
    pub args: Vec<ArgValue>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    #[serde(default)]
    pub networks: BTreeSet<NetworkName>,
    /// Sending account; defaults to the configured default account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

impl ArtifactSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contract: None,
            args: Vec::new(),
            tags: BTreeSet::new(),
            depends_on: BTreeSet::new(),
            networks: BTreeSet::new(),
            from: None,
        }
    }

    pub fn contract(mut self, contract: impl Into<String>) -> Self {
        self.contract = Some(contract.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = ArgValue>) -> Self {
        self.args = args.into_iter().collect();
        self
    }

    pub fn tags<I: IntoIterator<Item = S>, S: Into<String>>(mut self, tags: I) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn depends_on<I: IntoIterator<Item = S>, S: Into<String>>(mut self, tags: I) -> Self {
        self.depends_on = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Restricts the spec to `networks`. Invalid names are ignored here;
    /// manifests loaded from configuration are validated on deserialization.
    pub fn networks<I: IntoIterator<Item = S>, S: Into<String>>(mut self, networks: I) -> Self {
        self.networks = networks
            .into_iter()
            .filter_map(|n| NetworkName::new(n).ok())
            .collect();
        self
    }

    pub fn from_account(mut self, account: impl Into<String>) -> Self {
        self.from = Some(account.into());
        self
    }

    /// The declared contract type.
    pub fn contract_type(&self) -> &str {
        self.contract.as_deref().unwrap_or(&self.name)
    }
}

/// Read-only check that lets a configuration call be skipped when the
/// target already holds the expected state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigGuard {
    /// View function signature, e.g. `isInitialized()`.
    pub function: String,
    #[serde(default)]
    pub args: Vec<ArgValue>,
    /// The call is skipped when the view returns exactly this value.
    pub equals: ArgValue,
}

/// One post-deployment call against a ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigStep {
    /// Deployment name the call is sent to.
    pub target: String,
    /// Function signature, e.g. `approveToken(address,address)`.
    pub function: String,
    #[serde(default)]
    pub args: Vec<ArgValue>,
    /// Confirmation depth override; defaults to the network's depth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmations: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_if: Option<ConfigGuard>,
}

impl ConfigStep {
    pub fn new(target: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            function: function.into(),
            args: Vec::new(),
            confirmations: None,
            skip_if: None,
        }
    }

    pub fn args(mut self, args: impl IntoIterator<Item = ArgValue>) -> Self {
        self.args = args.into_iter().collect();
        self
    }

    pub fn confirmations(mut self, confirmations: u64) -> Self {
        self.confirmations = Some(confirmations);
        self
    }

    pub fn skip_if(mut self, guard: ConfigGuard) -> Self {
        self.skip_if = Some(guard);
        self
    }

    /// The target plus every deployment named in the arguments or the guard.
    pub fn deployment_refs(&self) -> BTreeSet<&str> {
        let guard = self.skip_if.iter().flat_map(|guard| {
            guard
                .args
                .iter()
                .chain(std::iter::once(&guard.equals))
                .flat_map(ArgValue::deployment_refs)
        });
        std::iter::once(self.target.as_str())
            .chain(self.args.iter().flat_map(ArgValue::deployment_refs))
            .chain(guard)
            .collect()
    }
}

/// An ordered batch of configuration calls scheduled like any other step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigBatch {
    pub name: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    #[serde(default)]
    pub networks: BTreeSet<NetworkName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub calls: Vec<ConfigStep>,
}

impl ConfigBatch {
    pub fn new(name: impl Into<String>, calls: impl IntoIterator<Item = ConfigStep>) -> Self {
        Self {
            name: name.into(),
            tags: BTreeSet::new(),
            depends_on: BTreeSet::new(),
            networks: BTreeSet::new(),
            from: None,
            calls: calls.into_iter().collect(),
        }
    }

    pub fn tags<I: IntoIterator<Item = S>, S: Into<String>>(mut self, tags: I) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn depends_on<I: IntoIterator<Item = S>, S: Into<String>>(mut self, tags: I) -> Self {
        self.depends_on = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn networks<I: IntoIterator<Item = S>, S: Into<String>>(mut self, networks: I) -> Self {
        self.networks = networks
            .into_iter()
            .filter_map(|n| NetworkName::new(n).ok())
            .collect();
        self
    }

    pub fn from_account(mut self, account: impl Into<String>) -> Self {
        self.from = Some(account.into());
        self
    }
}

/// A declared step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    Deploy(ArtifactSpec),
    Configure(ConfigBatch),
}

/// What a step does when executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum StepKind {
    Deploy,
    Configure,
}

impl Step {
    pub fn kind(&self) -> StepKind {
        match self {
            Step::Deploy(_) => StepKind::Deploy,
            Step::Configure(_) => StepKind::Configure,
        }
    }

    pub fn as_artifact(&self) -> Option<&ArtifactSpec> {
        match self {
            Step::Deploy(spec) => Some(spec),
            Step::Configure(_) => None,
        }
    }

    /// Sending account override of this step.
    pub fn from_account(&self) -> Option<&str> {
        match self {
            Step::Deploy(spec) => spec.from.as_deref(),
            Step::Configure(batch) => batch.from.as_deref(),
        }
    }

    /// Deployment names this step needs addresses of.
    pub fn deployment_refs(&self) -> BTreeSet<&str> {
        match self {
            Step::Deploy(spec) => spec.args.iter().flat_map(ArgValue::deployment_refs).collect(),
            Step::Configure(batch) => batch.calls.iter().flat_map(ConfigStep::deployment_refs).collect(),
        }
    }

    fn values(&self) -> Vec<&ArgValue> {
        match self {
            Step::Deploy(spec) => spec.args.iter().collect(),
            Step::Configure(batch) => batch
                .calls
                .iter()
                .flat_map(|call| {
                    call.args.iter().chain(
                        call.skip_if
                            .iter()
                            .flat_map(|g| g.args.iter().chain(std::iter::once(&g.equals))),
                    )
                })
                .collect(),
        }
    }
}

impl From<ArtifactSpec> for Step {
    fn from(spec: ArtifactSpec) -> Self {
        Step::Deploy(spec)
    }
}

impl From<ConfigBatch> for Step {
    fn from(batch: ConfigBatch) -> Self {
        Step::Configure(batch)
    }
}

impl Scheduled for ArtifactSpec {
    fn name(&self) -> &str {
        &self.name
    }

    fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    fn depends_on(&self) -> &BTreeSet<String> {
        &self.depends_on
    }

    fn networks(&self) -> &BTreeSet<NetworkName> {
        &self.networks
    }
}

impl Scheduled for ConfigBatch {
    fn name(&self) -> &str {
        &self.name
    }

    fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    fn depends_on(&self) -> &BTreeSet<String> {
        &self.depends_on
    }

    fn networks(&self) -> &BTreeSet<NetworkName> {
        &self.networks
    }
}

impl Scheduled for Step {
    fn name(&self) -> &str {
        match self {
            Step::Deploy(spec) => spec.name(),
            Step::Configure(batch) => batch.name(),
        }
    }

    fn tags(&self) -> &BTreeSet<String> {
        match self {
            Step::Deploy(spec) => spec.tags(),
            Step::Configure(batch) => batch.tags(),
        }
    }

    fn depends_on(&self) -> &BTreeSet<String> {
        match self {
            Step::Deploy(spec) => spec.depends_on(),
            Step::Configure(batch) => batch.depends_on(),
        }
    }

    fn networks(&self) -> &BTreeSet<NetworkName> {
        match self {
            Step::Deploy(spec) => spec.networks(),
            Step::Configure(batch) => batch.networks(),
        }
    }
}

/// The declared step set, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deref, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest(Vec<Step>);

impl Manifest {
    pub fn new(steps: impl IntoIterator<Item = impl Into<Step>>) -> Self {
        Self(steps.into_iter().map(Into::into).collect())
    }

    pub fn steps(&self) -> &[Step] {
        &self.0
    }

    pub fn get(&self, name: &str) -> Option<&Step> {
        self.0.iter().find(|step| step.name() == name)
    }

    /// Rejects graph and reference errors that can be found without a network.
    ///
    /// `accounts` holds every configured account name; `default_account` is
    /// used by steps without an explicit sender.
    pub fn validate(
        &self,
        accounts: &BTreeSet<String>,
        default_account: &str,
    ) -> Result<(), ConfigurationError> {
        let mut names = BTreeSet::new();
        for step in &self.0 {
            let name = step.name();
            if !is_valid_identifier(name) {
                return Err(ConfigurationError::InvalidIdentifier(name.to_string()));
            }
            if !names.insert(name) {
                return Err(ConfigurationError::DuplicateName(name.to_string()));
            }
        }

        let provided: BTreeSet<&str> = self
            .0
            .iter()
            .flat_map(|step| step.tags().iter().map(String::as_str))
            .collect();
        let deployments: BTreeSet<&str> = self
            .0
            .iter()
            .filter_map(Step::as_artifact)
            .map(|spec| spec.name.as_str())
            .collect();

        for step in &self.0 {
            let name = step.name();

            if let Some(tag) = step
                .depends_on()
                .iter()
                .find(|tag| !provided.contains(tag.as_str()))
            {
                return Err(ConfigurationError::UnknownTag {
                    step: name.to_string(),
                    tag: tag.clone(),
                });
            }

            if let Some(reference) = step
                .deployment_refs()
                .into_iter()
                .find(|r| !deployments.contains(r))
            {
                return Err(ConfigurationError::UnknownDeployment {
                    step: name.to_string(),
                    reference: reference.to_string(),
                });
            }

            let sender = step.from_account().unwrap_or(default_account);
            let account_refs = step.values().into_iter().flat_map(ArgValue::account_refs);
            if let Some(account) = std::iter::once(sender)
                .chain(account_refs)
                .find(|account| !accounts.contains(*account))
            {
                return Err(ConfigurationError::UnknownAccount {
                    step: name.to_string(),
                    account: account.to_string(),
                });
            }

            for value in step.values() {
                check_literals(name, value)?;
            }

            if let Step::Configure(batch) = step {
                let signatures = batch.calls.iter().flat_map(|call| {
                    std::iter::once(&call.function)
                        .chain(call.skip_if.iter().map(|guard| &guard.function))
                });
                if let Some(bad) = signatures.into_iter().find(|sig| !is_valid_signature(sig)) {
                    return Err(ConfigurationError::InvalidValue {
                        step: name.to_string(),
                        value: bad.clone(),
                        reason: "expected a function signature like `name(type,...)`".to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Checks that every selected name or tag exists somewhere in the manifest.
    pub fn check_selection<'a>(
        &self,
        selection: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), ConfigurationError> {
        for selected in selection {
            let known = self
                .0
                .iter()
                .any(|step| step.name() == selected || step.tags().contains(selected));
            if !known {
                return Err(ConfigurationError::UnknownSelection(selected.to_string()));
            }
        }
        Ok(())
    }
}

fn check_literals(step: &str, value: &ArgValue) -> Result<(), ConfigurationError> {
    match value {
        ArgValue::Uint(literal) => literal.to_u256().map(|_| ()).map_err(|reason| {
            ConfigurationError::InvalidValue {
                step: step.to_string(),
                value: literal.to_string(),
                reason,
            }
        }),
        ArgValue::Int(literal) => literal.to_i256().map(|_| ()).map_err(|reason| {
            ConfigurationError::InvalidValue {
                step: step.to_string(),
                value: literal.to_string(),
                reason,
            }
        }),
        ArgValue::Array(items) => items.iter().try_for_each(|item| check_literals(step, item)),
        _ => Ok(()),
    }
}

/// Step names become ledger file names.
pub(crate) fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NumberLiteral;

    fn accounts() -> BTreeSet<String> {
        ["deployer".to_string(), "manager".to_string()].into()
    }

    #[test]
    fn test_parse_manifest_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            steps: Manifest,
        }

        let Wrapper { steps } = toml::from_str(
            r#"
            [[steps]]
            kind = "deploy"
            name = "USDC"
            contract = "MockERC20"
            args = [{ account = "deployer" }, { uint = "10000000000000" }, { string = "USDC" }, { uint = 6 }]
            tags = ["mockTokens"]
            networks = ["baseSepolia"]

            [[steps]]
            kind = "configure"
            name = "approveUsdc"
            depends_on = ["mockTokens"]
            from = "manager"

            [[steps.calls]]
            target = "USDC"
            function = "approve(address,uint256)"
            args = [{ account = "manager" }, { uint = "0xff" }]
            confirmations = 2
            "#,
        )
        .unwrap();

        assert_eq!(steps.len(), 2);
        let usdc = steps[0].as_artifact().unwrap();
        assert_eq!(usdc.contract_type(), "MockERC20");
        assert_eq!(usdc.args[3], ArgValue::Uint(NumberLiteral::Int(6)));
        assert_eq!(steps[1].kind(), StepKind::Configure);
        assert_eq!(steps[1].from_account(), Some("manager"));
        steps.validate(&accounts(), "deployer").unwrap();
    }

    #[test]
    fn test_contract_type_defaults_to_name() {
        assert_eq!(ArtifactSpec::new("Controller").contract_type(), "Controller");
    }

    #[test]
    fn test_validate_rejects_duplicate_names() {
        let manifest = Manifest::new([ArtifactSpec::new("A"), ArtifactSpec::new("A")]);
        assert!(matches!(
            manifest.validate(&accounts(), "deployer"),
            Err(ConfigurationError::DuplicateName(name)) if name == "A"
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_tag() {
        let manifest = Manifest::new([ArtifactSpec::new("B").depends_on(["base"])]);
        assert!(matches!(
            manifest.validate(&accounts(), "deployer"),
            Err(ConfigurationError::UnknownTag { tag, .. }) if tag == "base"
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_references() {
        let manifest = Manifest::new([
            ArtifactSpec::new("Oracle").args([ArgValue::Deployment("Controller".into())])
        ]);
        assert!(matches!(
            manifest.validate(&accounts(), "deployer"),
            Err(ConfigurationError::UnknownDeployment { reference, .. }) if reference == "Controller"
        ));

        let manifest = Manifest::new([ConfigBatch::new(
            "init",
            [ConfigStep::new("Controller", "initialize()")],
        )]);
        assert!(matches!(
            manifest.validate(&accounts(), "deployer"),
            Err(ConfigurationError::UnknownDeployment { .. })
        ));

        let manifest =
            Manifest::new([ArtifactSpec::new("Controller").args([ArgValue::Account("ops".into())])]);
        assert!(matches!(
            manifest.validate(&accounts(), "deployer"),
            Err(ConfigurationError::UnknownAccount { account, .. }) if account == "ops"
        ));

        let manifest = Manifest::new([ArtifactSpec::new("Controller").from_account("ops")]);
        assert!(matches!(
            manifest.validate(&accounts(), "deployer"),
            Err(ConfigurationError::UnknownAccount { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_literals_and_signatures() {
        let manifest = Manifest::new([ArtifactSpec::new("Token")
            .args([ArgValue::Array(vec![ArgValue::Uint(NumberLiteral::Text("1e18".into()))])])]);
        assert!(matches!(
            manifest.validate(&accounts(), "deployer"),
            Err(ConfigurationError::InvalidValue { .. })
        ));

        let manifest = Manifest::new([
            Step::from(ArtifactSpec::new("Controller")),
            Step::from(ConfigBatch::new("init", [ConfigStep::new("Controller", "initialize")])),
        ]);
        assert!(matches!(
            manifest.validate(&accounts(), "deployer"),
            Err(ConfigurationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_path_like_names() {
        let manifest = Manifest::new([ArtifactSpec::new("../Controller")]);
        assert!(matches!(
            manifest.validate(&accounts(), "deployer"),
            Err(ConfigurationError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_check_selection() {
        let manifest = Manifest::new([ArtifactSpec::new("Controller").tags(["controller"])]);
        assert!(manifest.check_selection(["controller", "Controller"]).is_ok());
        assert!(matches!(
            manifest.check_selection(["oracle"]),
            Err(ConfigurationError::UnknownSelection(s)) if s == "oracle"
        ));
    }
}
