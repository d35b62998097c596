//! Plan execution engine.

use std::collections::BTreeSet;

use crate::{
    artifacts::ArtifactSource,
    client::NetworkClient,
    configure::{self, BatchReport},
    context::ExecutionContext,
    error::{Error, Result},
    executor::{self, DeployOutcome, Deployment},
    manifest::{Scheduled, Step},
    resolver::{ExecutionPlan, StepId},
};

/// Which deploy steps ignore their existing ledger record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ForceRedeploy {
    #[default]
    None,
    All,
    Only(BTreeSet<String>),
}

impl ForceRedeploy {
    pub fn applies_to(&self, name: &str) -> bool {
        match self {
            Self::None => false,
            Self::All => true,
            Self::Only(names) => names.contains(name),
        }
    }
}

/// What a completed step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Deployed(Deployment),
    Configured(BatchReport),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub id: StepId,
    pub name: String,
    pub outcome: StepOutcome,
}

/// Steps completed by a successful run, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub steps: Vec<StepReport>,
}

impl RunReport {
    fn count_deployments(&self, outcome: DeployOutcome) -> usize {
        self.steps
            .iter()
            .filter(|step| matches!(&step.outcome, StepOutcome::Deployed(d) if d.outcome == outcome))
            .count()
    }

    pub fn deployed(&self) -> usize {
        self.count_deployments(DeployOutcome::Deployed)
    }

    pub fn skipped(&self) -> usize {
        self.count_deployments(DeployOutcome::Skipped)
    }

    pub fn recovered(&self) -> usize {
        self.count_deployments(DeployOutcome::Recovered)
    }

    pub fn configured(&self) -> usize {
        self.steps
            .iter()
            .filter(|step| matches!(step.outcome, StepOutcome::Configured(_)))
            .count()
    }
}

/// Runs an [`ExecutionPlan`] step by step.
pub struct Runner<'a, C, A: ?Sized> {
    ctx: ExecutionContext<'a, C, A>,
}

impl<'a, C: NetworkClient, A: ArtifactSource + ?Sized> Runner<'a, C, A> {
    pub fn new(ctx: ExecutionContext<'a, C, A>) -> Self {
        Self { ctx }
    }

    /// Executes `plan` sequentially.
    ///
    /// References are checked against the ledger before anything is sent.
    /// The first failing step halts the run with [`Error::Halted`], naming it
    /// and the last step that completed; later steps are not attempted.
    pub async fn run(&self, plan: &ExecutionPlan, force: &ForceRedeploy) -> Result<RunReport> {
        let ctx = &self.ctx;
        plan.check_references(|name| ctx.ledger.get(ctx.network, name).is_some())?;

        tracing::info!(network = %ctx.network, steps = plan.len(), "Starting run");

        let mut report = RunReport::default();
        for planned in plan.steps() {
            let name = planned.step.name();
            let outcome = match &planned.step {
                Step::Deploy(spec) => executor::execute(ctx, spec, force.applies_to(name))
                    .await
                    .map(StepOutcome::Deployed),
                Step::Configure(batch) => configure::run(ctx, batch).await.map(StepOutcome::Configured),
            };

            match outcome {
                Ok(outcome) => report.steps.push(StepReport {
                    id: planned.id,
                    name: name.to_string(),
                    outcome,
                }),
                Err(cause) => {
                    let last_completed = report.steps.last().map(|step| step.name.clone());
                    tracing::error!(
                        step = name,
                        last_completed = last_completed.as_deref().unwrap_or("none"),
                        error = %cause,
                        "Run halted"
                    );
                    return Err(Error::Halted {
                        failed_step: name.to_string(),
                        last_completed,
                        cause: Box::new(cause),
                    });
                }
            }
        }

        tracing::info!(
            network = %ctx.network,
            deployed = report.deployed(),
            recovered = report.recovered(),
            skipped = report.skipped(),
            configured = report.configured(),
            "Run complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_force_redeploy_selection() {
        assert!(!ForceRedeploy::None.applies_to("Controller"));
        assert!(ForceRedeploy::All.applies_to("Controller"));

        let only = ForceRedeploy::Only(BTreeSet::from(["Controller".to_string()]));
        assert!(only.applies_to("Controller"));
        assert!(!only.applies_to("SetTokenCreator"));
    }
}
