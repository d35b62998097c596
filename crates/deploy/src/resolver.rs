//! Dependency resolver: turns the declared step set into an execution plan.
//!
//! An edge runs from every step providing tag `T` to every step depending on
//! `T`. A step becomes eligible once all of its predecessors are scheduled;
//! among eligible steps the earliest declared one goes first.

use std::collections::{BTreeMap, BTreeSet};

use derive_more::Display;

use crate::{
    error::ConfigurationError,
    gate,
    manifest::{Scheduled, Step},
    network::NetworkName,
};

/// Position of a step in the manifest's declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[display("#{_0}")]
pub struct StepId(usize);

/// Which steps a plan is built for.
#[derive(Debug, Clone)]
pub struct PlanFilter {
    pub network: NetworkName,
    /// Step names or tags to run, together with everything they depend on.
    /// Empty selects every step that applies to the network.
    pub selection: Vec<String>,
}

impl PlanFilter {
    pub fn network(network: NetworkName) -> Self {
        Self {
            network,
            selection: Vec::new(),
        }
    }

    pub fn select(mut self, selection: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.selection = selection.into_iter().map(Into::into).collect();
        self
    }
}

/// A step scheduled at a position of the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStep {
    pub id: StepId,
    pub step: Step,
}

/// Ordered steps for one run on one network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    network: NetworkName,
    steps: Vec<PlannedStep>,
}

impl ExecutionPlan {
    pub fn network(&self) -> &NetworkName {
        &self.network
    }

    pub fn steps(&self) -> &[PlannedStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|p| p.step.name()).collect()
    }

    /// Checks that each deployment a step references is either already
    /// recorded or deployed by an earlier step of this plan.
    pub fn check_references(
        &self,
        is_recorded: impl Fn(&str) -> bool,
    ) -> Result<(), ConfigurationError> {
        let mut deployed = BTreeSet::new();
        for planned in &self.steps {
            for reference in planned.step.deployment_refs() {
                if !deployed.contains(reference) && !is_recorded(reference) {
                    return Err(ConfigurationError::UnresolvedReference {
                        step: planned.step.name().to_string(),
                        reference: reference.to_string(),
                        network: self.network.clone(),
                    });
                }
            }
            if let Some(spec) = planned.step.as_artifact() {
                deployed.insert(spec.name.as_str());
            }
        }
        Ok(())
    }
}

/// Orders the steps of `manifest` that pass the network gate and `filter`.
pub fn order(manifest: &[Step], filter: &PlanFilter) -> Result<ExecutionPlan, ConfigurationError> {
    let retained: Vec<usize> = manifest
        .iter()
        .enumerate()
        .filter(|(_, step)| gate::applies(*step, &filter.network))
        .map(|(i, _)| i)
        .collect();

    let graph = DependencyGraph::build(manifest, &retained, filter)?;
    let order = graph.topological_order(manifest)?;

    tracing::debug!(
        network = %filter.network,
        declared = manifest.len(),
        gated_in = retained.len(),
        planned = order.len(),
        "Execution plan built"
    );

    Ok(ExecutionPlan {
        network: filter.network.clone(),
        steps: order
            .into_iter()
            .map(|i| PlannedStep {
                id: StepId(i),
                step: manifest[i].clone(),
            })
            .collect(),
    })
}

/// Predecessor sets over manifest indices, restricted to the included steps.
struct DependencyGraph {
    included: BTreeSet<usize>,
    preds: BTreeMap<usize, BTreeSet<usize>>,
}

impl DependencyGraph {
    fn build(
        manifest: &[Step],
        retained: &[usize],
        filter: &PlanFilter,
    ) -> Result<Self, ConfigurationError> {
        let mut providers: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for &i in retained {
            for tag in manifest[i].tags() {
                providers.entry(tag.as_str()).or_default().push(i);
            }
        }

        let mut worklist: Vec<usize> = if filter.selection.is_empty() {
            retained.to_vec()
        } else {
            retained
                .iter()
                .copied()
                .filter(|&i| {
                    let step = &manifest[i];
                    filter
                        .selection
                        .iter()
                        .any(|s| step.name() == s || step.tags().contains(s))
                })
                .collect()
        };

        let mut included = BTreeSet::new();
        let mut preds = BTreeMap::new();
        while let Some(i) = worklist.pop() {
            if !included.insert(i) {
                continue;
            }
            let step = &manifest[i];
            let mut step_preds = BTreeSet::new();
            for tag in step.depends_on() {
                let Some(tag_providers) = providers.get(tag.as_str()) else {
                    return Err(ConfigurationError::UnresolvedDependency {
                        step: step.name().to_string(),
                        tag: tag.clone(),
                        network: filter.network.clone(),
                    });
                };
                step_preds.extend(tag_providers.iter().copied());
            }
            worklist.extend(step_preds.iter().copied());
            preds.insert(i, step_preds);
        }

        Ok(Self { included, preds })
    }

    fn topological_order(&self, manifest: &[Step]) -> Result<Vec<usize>, ConfigurationError> {
        let mut scheduled = BTreeSet::new();
        let mut order = Vec::with_capacity(self.included.len());

        while order.len() < self.included.len() {
            // `included` iterates in declaration order, which makes ties stable.
            let next = self
                .included
                .iter()
                .copied()
                .find(|i| !scheduled.contains(i) && self.preds[i].is_subset(&scheduled));

            match next {
                Some(i) => {
                    scheduled.insert(i);
                    order.push(i);
                }
                None => {
                    return Err(ConfigurationError::CyclicDependency {
                        steps: self
                            .find_cycle(&scheduled)
                            .into_iter()
                            .map(|i| manifest[i].name().to_string())
                            .collect(),
                    });
                }
            }
        }

        Ok(order)
    }

    /// Walks unscheduled predecessors from the first stuck step until a node
    /// repeats. Every stuck step has at least one unscheduled predecessor, so
    /// the walk always closes a cycle.
    fn find_cycle(&self, scheduled: &BTreeSet<usize>) -> Vec<usize> {
        let unscheduled = |i: &usize| !scheduled.contains(i);
        let Some(start) = self.included.iter().copied().find(unscheduled) else {
            return Vec::new();
        };

        let mut walk = vec![start];
        let mut current = start;
        loop {
            let Some(pred) = self.preds[&current].iter().copied().find(unscheduled) else {
                return walk;
            };
            if let Some(pos) = walk.iter().position(|&n| n == pred) {
                // `walk` follows edges backwards; flip it and close the loop.
                let mut cycle: Vec<usize> = walk[pos..].iter().rev().copied().collect();
                cycle.push(cycle[0]);
                return cycle;
            }
            walk.push(pred);
            current = pred;
        }
    }
}
