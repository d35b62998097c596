//! Detection of deployments left behind by a forced redeploy.
//!
//! Redeploying an artifact never cascades. Dependents keep pointing at the old
//! address until they are redeployed explicitly; this module lists them.

use std::{
    collections::{BTreeSet, VecDeque},
    fmt,
};

use alloy_core::primitives::Address;

use crate::{
    error::{Error, Result},
    gate,
    ledger::Ledger,
    manifest::{ArtifactSpec, Scheduled, Step, StepKind},
    network::NetworkName,
};

/// Why a dependent is considered stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    /// Its constructor arguments do not contain the dependency's current address.
    OutdatedAddress { current: Address },
    /// It was deployed in an earlier block than the dependency's current record.
    DeployedBefore { block: u64, dependency_block: u64 },
    /// It depends on another stale deployment and goes stale once that one is redeployed.
    Transitive { via: String },
    /// These guarded calls reference a stale deployment. Their guards may skip
    /// the call on the next run even though it was applied to an old address.
    GuardedCalls { calls: Vec<usize> },
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutdatedAddress { current } => {
                write!(f, "constructor arguments do not contain current address {current}")
            }
            Self::DeployedBefore {
                block,
                dependency_block,
            } => write!(
                f,
                "deployed in block {block}, before the dependency (block {dependency_block})"
            ),
            Self::Transitive { via } => write!(f, "depends on stale deployment `{via}`"),
            Self::GuardedCalls { calls } => {
                let calls: Vec<String> = calls.iter().map(usize::to_string).collect();
                write!(f, "guarded calls {} reference a stale deployment", calls.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleDependent {
    pub name: String,
    pub kind: StepKind,
    pub reason: StaleReason,
}

/// Steps on `network` left behind by the current record of `name`.
///
/// Reported, in this order:
/// - recorded deploy steps that depend directly on `name` and predate it;
/// - recorded deploy steps that depend on one of those, at any depth;
/// - configuration batches whose guarded calls reference any of the above.
///
/// A deploy step depends on another when it references its address in its
/// arguments or depends on a tag the other step provides. Unguarded calls are
/// not reported since every run sends them again.
pub fn stale_dependents(
    steps: &[Step],
    ledger: &Ledger,
    network: &NetworkName,
    name: &str,
) -> Result<Vec<StaleDependent>> {
    let dependency = ledger.get(network, name).ok_or_else(|| Error::MissingDeployment {
        network: network.clone(),
        name: name.to_string(),
    })?;
    let gated: Vec<&Step> = steps.iter().filter(|step| gate::applies(*step, network)).collect();

    let mut stale = Vec::new();
    let mut reported = BTreeSet::from([name.to_string()]);
    let mut queue = VecDeque::new();

    for spec in gated.iter().filter_map(|step| step.as_artifact()) {
        if reported.contains(&spec.name) {
            continue;
        }
        let (references, tagged) = dependency_edges(steps, spec, name);
        if !references && !tagged {
            continue;
        }
        let Some(record) = ledger.get(network, &spec.name) else {
            continue;
        };

        let reason = if references
            && !record
                .args
                .iter()
                .any(|arg| arg.contains_address(&dependency.address))
        {
            Some(StaleReason::OutdatedAddress {
                current: dependency.address,
            })
        } else if record.receipt.block_number < dependency.receipt.block_number {
            Some(StaleReason::DeployedBefore {
                block: record.receipt.block_number,
                dependency_block: dependency.receipt.block_number,
            })
        } else {
            None
        };

        if let Some(reason) = reason {
            report(&mut stale, &spec.name, StepKind::Deploy, reason, name);
            reported.insert(spec.name.clone());
            queue.push_back(spec.name.clone());
        }
    }

    while let Some(via) = queue.pop_front() {
        for spec in gated.iter().filter_map(|step| step.as_artifact()) {
            if reported.contains(&spec.name) || ledger.get(network, &spec.name).is_none() {
                continue;
            }
            let (references, tagged) = dependency_edges(steps, spec, &via);
            if references || tagged {
                report(
                    &mut stale,
                    &spec.name,
                    StepKind::Deploy,
                    StaleReason::Transitive { via: via.clone() },
                    name,
                );
                reported.insert(spec.name.clone());
                queue.push_back(spec.name.clone());
            }
        }
    }

    for step in &gated {
        let Step::Configure(batch) = step else {
            continue;
        };
        let calls: Vec<usize> = batch
            .calls
            .iter()
            .enumerate()
            .filter(|(_, call)| {
                call.skip_if.is_some() && call.deployment_refs().iter().any(|r| reported.contains(*r))
            })
            .map(|(index, _)| index)
            .collect();
        if !calls.is_empty() {
            report(
                &mut stale,
                &batch.name,
                StepKind::Configure,
                StaleReason::GuardedCalls { calls },
                name,
            );
        }
    }

    Ok(stale)
}

/// Whether `spec` references `provider` in its arguments, and whether it
/// depends on a tag `provider` provides.
fn dependency_edges(steps: &[Step], spec: &ArtifactSpec, provider: &str) -> (bool, bool) {
    let references = spec
        .args
        .iter()
        .any(|arg| arg.deployment_refs().contains(&provider));
    let tagged = steps
        .iter()
        .find(|step| step.name() == provider)
        .is_some_and(|step| spec.depends_on.iter().any(|tag| step.tags().contains(tag)));
    (references, tagged)
}

fn report(stale: &mut Vec<StaleDependent>, name: &str, kind: StepKind, reason: StaleReason, dependency: &str) {
    tracing::debug!(name, %kind, dependency, %reason, "Stale dependent");
    stale.push(StaleDependent {
        name: name.to_string(),
        kind,
        reason,
    });
}

#[cfg(test)]
mod tests {
    use alloy_core::primitives::B256;
    use tempdir::TempDir;

    use super::*;
    use crate::{
        ledger::{DeploymentRecord, ReceiptSummary},
        manifest::{ConfigBatch, ConfigGuard, ConfigStep},
        types::{ArgValue, ResolvedValue},
    };

    fn record(name: &str, address: Address, block: u64, args: Vec<ResolvedValue>) -> DeploymentRecord {
        DeploymentRecord {
            name: name.to_string(),
            contract: name.to_string(),
            address,
            receipt: ReceiptSummary {
                tx_hash: B256::ZERO,
                block_number: block,
                gas_used: 0,
            },
            args,
            fingerprint: String::new(),
            deployed_at: String::new(),
        }
    }

    fn steps() -> Vec<Step> {
        vec![
            ArtifactSpec::new("Controller").tags(["core"]).into(),
            ArtifactSpec::new("SetTokenCreator")
                .args([ArgValue::Deployment("Controller".to_string())])
                .into(),
            ArtifactSpec::new("IntegrationRegistry").depends_on(["core"]).into(),
            ArtifactSpec::new("Unrelated").into(),
        ]
    }

    #[test]
    fn test_reports_dependents_of_a_redeployed_artifact() {
        let dir = TempDir::new("stale").unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();
        let network = NetworkName::new("local").unwrap();
        let old = Address::repeat_byte(0x01);
        let new = Address::repeat_byte(0x02);

        ledger
            .put(&network, record("SetTokenCreator", Address::repeat_byte(0x10), 2, vec![ResolvedValue::Address(old)]), false)
            .unwrap();
        ledger
            .put(&network, record("IntegrationRegistry", Address::repeat_byte(0x11), 3, vec![]), false)
            .unwrap();
        ledger
            .put(&network, record("Unrelated", Address::repeat_byte(0x12), 1, vec![]), false)
            .unwrap();
        // Controller was redeployed after its dependents.
        ledger.put(&network, record("Controller", new, 9, vec![]), false).unwrap();

        let stale = stale_dependents(&steps(), &ledger, &network, "Controller").unwrap();

        assert_eq!(
            stale,
            vec![
                StaleDependent {
                    name: "SetTokenCreator".to_string(),
                    kind: StepKind::Deploy,
                    reason: StaleReason::OutdatedAddress { current: new },
                },
                StaleDependent {
                    name: "IntegrationRegistry".to_string(),
                    kind: StepKind::Deploy,
                    reason: StaleReason::DeployedBefore {
                        block: 3,
                        dependency_block: 9,
                    },
                },
            ]
        );
    }

    #[test]
    fn test_up_to_date_dependents_are_not_reported() {
        let dir = TempDir::new("stale").unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();
        let network = NetworkName::new("local").unwrap();
        let controller = Address::repeat_byte(0x01);

        ledger.put(&network, record("Controller", controller, 1, vec![]), false).unwrap();
        ledger
            .put(&network, record("SetTokenCreator", Address::repeat_byte(0x10), 2, vec![ResolvedValue::Address(controller)]), false)
            .unwrap();

        assert!(stale_dependents(&steps(), &ledger, &network, "Controller").unwrap().is_empty());
    }

    #[test]
    fn test_unrecorded_dependency_is_an_error() {
        let dir = TempDir::new("stale").unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();
        let network = NetworkName::new("local").unwrap();

        assert!(matches!(
            stale_dependents(&steps(), &ledger, &network, "Controller"),
            Err(Error::MissingDeployment { .. })
        ));
    }

    #[test]
    fn test_reports_transitive_dependents_and_guarded_calls() {
        let dir = TempDir::new("stale").unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();
        let network = NetworkName::new("local").unwrap();
        let old = Address::repeat_byte(0x01);
        let new = Address::repeat_byte(0x02);
        let creator = Address::repeat_byte(0x10);

        let steps: Vec<Step> = vec![
            ArtifactSpec::new("Controller").tags(["core"]).into(),
            ArtifactSpec::new("SetTokenCreator")
                .args([ArgValue::Deployment("Controller".to_string())])
                .tags(["creator"])
                .into(),
            ArtifactSpec::new("BasicIssuanceModule").depends_on(["creator"]).into(),
            ConfigBatch::new(
                "ControllerSetup",
                [
                    ConfigStep::new("Controller", "addFactory(address)")
                        .args([ArgValue::Deployment("SetTokenCreator".to_string())])
                        .skip_if(ConfigGuard {
                            function: "isFactory(address)".to_string(),
                            args: vec![ArgValue::Deployment("SetTokenCreator".to_string())],
                            equals: ArgValue::Bool(true),
                        }),
                    ConfigStep::new("Controller", "initialize(address)")
                        .args([ArgValue::Deployment("SetTokenCreator".to_string())]),
                ],
            )
            .into(),
        ];

        ledger
            .put(&network, record("SetTokenCreator", creator, 2, vec![ResolvedValue::Address(old)]), false)
            .unwrap();
        ledger
            .put(&network, record("BasicIssuanceModule", Address::repeat_byte(0x11), 3, vec![]), false)
            .unwrap();
        ledger.put(&network, record("Controller", new, 9, vec![]), false).unwrap();

        let stale = stale_dependents(&steps, &ledger, &network, "Controller").unwrap();

        assert_eq!(
            stale,
            vec![
                StaleDependent {
                    name: "SetTokenCreator".to_string(),
                    kind: StepKind::Deploy,
                    reason: StaleReason::OutdatedAddress { current: new },
                },
                StaleDependent {
                    name: "BasicIssuanceModule".to_string(),
                    kind: StepKind::Deploy,
                    reason: StaleReason::Transitive {
                        via: "SetTokenCreator".to_string(),
                    },
                },
                StaleDependent {
                    name: "ControllerSetup".to_string(),
                    kind: StepKind::Configure,
                    reason: StaleReason::GuardedCalls { calls: vec![0] },
                },
            ]
        );
    }
}
