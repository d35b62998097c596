//! Idempotent deployment of a single artifact.

use crate::{
    artifacts::ArtifactSource,
    client::NetworkClient,
    context::ExecutionContext,
    error::{Error, Result},
    fingerprint,
    ledger::{DeploymentRecord, PendingDeployment, ReceiptSummary},
    manifest::ArtifactSpec,
    types::{PendingTx, Receipt, ResolvedValue, TransactionIntent, encode_params},
};

/// How a deployment step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum DeployOutcome {
    /// A record already existed; nothing was sent.
    Skipped,
    /// A new contract was deployed and recorded.
    Deployed,
    /// A transaction submitted by an earlier run was confirmed and recorded.
    Recovered,
}

/// Result of [`execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub record: DeploymentRecord,
    pub outcome: DeployOutcome,
}

/// Ensures `spec` is deployed on the context's network.
///
/// Without `force`, an existing ledger record is returned untouched and no
/// network call is made. Otherwise the artifact is deployed, confirmed and
/// recorded; with `force` the existing record is overwritten.
///
/// Failures are reported as [`Error::DeploymentFailed`] and leave the ledger
/// without a record for `spec.name` (or with the previous one when forced).
pub async fn execute<C, A>(ctx: &ExecutionContext<'_, C, A>, spec: &ArtifactSpec, force: bool) -> Result<Deployment>
where
    C: NetworkClient,
    A: ArtifactSource + ?Sized,
{
    run(ctx, spec, force).await.map_err(|e| match e {
        e @ (Error::Persistence { .. } | Error::CorruptedRecord { .. }) => e,
        e => Error::deployment_failed(&spec.name, e),
    })
}

async fn run<C, A>(ctx: &ExecutionContext<'_, C, A>, spec: &ArtifactSpec, force: bool) -> Result<Deployment>
where
    C: NetworkClient,
    A: ArtifactSource + ?Sized,
{
    let name = spec.name.as_str();

    if !force {
        if let Some(record) = ctx.ledger.get(ctx.network, name) {
            warn_on_drift(ctx, spec, &record);
            tracing::info!(
                name,
                network = %ctx.network,
                address = %record.address,
                "Already deployed, skipping"
            );
            return Ok(Deployment {
                record,
                outcome: DeployOutcome::Skipped,
            });
        }
    }

    if let Some(pending) = ctx.ledger.pending(ctx.network, name)? {
        if force {
            tracing::warn!(
                name,
                network = %ctx.network,
                tx_hash = %pending.tx_hash,
                "Discarding journaled deployment for forced redeploy"
            );
            ctx.ledger.clear_pending(ctx.network, name)?;
        } else if let Some(deployment) = recover(ctx, name, pending).await? {
            return Ok(deployment);
        }
    }

    let contract = spec.contract_type();
    let artifact = ctx.artifacts.resolve(contract)?;
    let args = ctx.resolve_args(name, &spec.args)?;
    let from = ctx.sender(spec.from.as_deref())?;
    let fingerprint = fingerprint::compute(contract, &args);

    let mut init_code = artifact.bytecode.to_vec();
    init_code.extend(encode_params(&args));
    let intent = TransactionIntent::create(from, init_code.into());

    tracing::info!(name, contract, network = %ctx.network, from = %from, "Deploying");

    let submitted = ctx
        .waiter
        .submit_and_wait_with(&intent, ctx.confirmations(), |pending| {
            ctx.ledger.mark_pending(
                ctx.network,
                name,
                &PendingDeployment {
                    tx_hash: pending.tx_hash,
                    contract: contract.to_string(),
                    args: args.clone(),
                    fingerprint: fingerprint.clone(),
                    submitted_at: chrono::Utc::now().to_rfc3339(),
                },
            )
        })
        .await;
    let receipt = match submitted {
        Ok(receipt) => receipt,
        Err(e @ Error::TransactionReverted { .. }) => {
            ctx.ledger.clear_pending(ctx.network, name)?;
            return Err(e);
        }
        // Anything else may still confirm; the journal lets the next run pick it up.
        Err(e) => return Err(e),
    };

    let record = build_record(name, contract, args, fingerprint, &receipt)?;
    ctx.ledger.put(ctx.network, record.clone(), force)?;
    ctx.ledger.clear_pending(ctx.network, name)?;

    tracing::info!(
        name,
        network = %ctx.network,
        address = %record.address,
        tx_hash = %receipt.tx_hash,
        block = receipt.block_number,
        "Deployed"
    );

    Ok(Deployment {
        record,
        outcome: DeployOutcome::Deployed,
    })
}

/// Settles a deployment journaled by an earlier, interrupted run.
///
/// Returns `None` when the journaled transaction reverted and the artifact
/// must be deployed again.
async fn recover<C, A>(ctx: &ExecutionContext<'_, C, A>, name: &str, pending: PendingDeployment) -> Result<Option<Deployment>>
where
    C: NetworkClient,
    A: ArtifactSource + ?Sized,
{
    tracing::info!(
        name,
        network = %ctx.network,
        tx_hash = %pending.tx_hash,
        submitted_at = %pending.submitted_at,
        "Resuming journaled deployment"
    );

    let tx = PendingTx {
        tx_hash: pending.tx_hash,
    };
    match ctx.waiter.wait_for(&tx, ctx.confirmations()).await {
        Ok(receipt) => {
            let record = build_record(name, &pending.contract, pending.args, pending.fingerprint, &receipt)?;
            ctx.ledger.put(ctx.network, record.clone(), false)?;
            ctx.ledger.clear_pending(ctx.network, name)?;
            tracing::info!(name, address = %record.address, "Recovered journaled deployment");
            Ok(Some(Deployment {
                record,
                outcome: DeployOutcome::Recovered,
            }))
        }
        Err(Error::TransactionReverted { tx_hash, block_number }) => {
            tracing::warn!(
                name,
                tx_hash = %tx_hash,
                block = block_number,
                "Journaled deployment reverted, deploying again"
            );
            ctx.ledger.clear_pending(ctx.network, name)?;
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn build_record(
    name: &str,
    contract: &str,
    args: Vec<ResolvedValue>,
    fingerprint: String,
    receipt: &Receipt,
) -> Result<DeploymentRecord> {
    let address = receipt.contract_address.ok_or(Error::NoContractAddress {
        tx_hash: receipt.tx_hash,
    })?;
    Ok(DeploymentRecord {
        name: name.to_string(),
        contract: contract.to_string(),
        address,
        receipt: ReceiptSummary::from(receipt),
        args,
        fingerprint,
        deployed_at: chrono::Utc::now().to_rfc3339(),
    })
}

/// Logs when the declared inputs no longer match what was deployed.
fn warn_on_drift<C, A>(ctx: &ExecutionContext<'_, C, A>, spec: &ArtifactSpec, record: &DeploymentRecord)
where
    C: NetworkClient,
    A: ArtifactSource + ?Sized,
{
    let Ok(args) = ctx.resolve_args(&spec.name, &spec.args) else {
        return;
    };
    let current = fingerprint::compute(spec.contract_type(), &args);
    if current != record.fingerprint {
        tracing::warn!(
            name = %spec.name,
            network = %ctx.network,
            recorded = %record.fingerprint,
            current = %current,
            "Declared inputs changed since deployment; redeploy explicitly to apply them"
        );
    }
}
