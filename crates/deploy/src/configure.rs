//! Ordered post-deployment configuration calls.

use crate::{
    artifacts::ArtifactSource,
    client::NetworkClient,
    context::ExecutionContext,
    error::{Error, Result},
    manifest::{ConfigBatch, ConfigGuard, ConfigStep},
    types::{TransactionIntent, encode_call, encode_params},
};

/// What happened to each call of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Indices of calls that were sent and confirmed.
    pub executed: Vec<usize>,
    /// Indices of calls whose guard showed they were already applied.
    pub skipped: Vec<usize>,
}

/// Runs the calls of `batch` strictly in order.
///
/// Each call is confirmed before the next is submitted. The first failure
/// stops the batch and is reported as [`Error::ConfigStepFailed`] with the
/// call's index; later calls are not attempted.
pub async fn run<C, A>(ctx: &ExecutionContext<'_, C, A>, batch: &ConfigBatch) -> Result<BatchReport>
where
    C: NetworkClient,
    A: ArtifactSource + ?Sized,
{
    let mut report = BatchReport::default();
    let from = ctx.sender(batch.from.as_deref())?;

    tracing::info!(batch = %batch.name, network = %ctx.network, calls = batch.calls.len(), "Configuring");

    for (index, call) in batch.calls.iter().enumerate() {
        let applied = run_call(ctx, &batch.name, from, call)
            .await
            .map_err(|cause| Error::ConfigStepFailed {
                batch: batch.name.clone(),
                index,
                cause: Box::new(cause),
            })?;
        if applied {
            report.executed.push(index);
        } else {
            report.skipped.push(index);
        }
    }

    tracing::info!(
        batch = %batch.name,
        executed = report.executed.len(),
        skipped = report.skipped.len(),
        "Configuration complete"
    );
    Ok(report)
}

/// Returns `false` when the call's guard says it is already applied.
async fn run_call<C, A>(
    ctx: &ExecutionContext<'_, C, A>,
    batch: &str,
    from: alloy_core::primitives::Address,
    call: &ConfigStep,
) -> Result<bool>
where
    C: NetworkClient,
    A: ArtifactSource + ?Sized,
{
    let target = ctx.deployed_address(&call.target)?;

    if let Some(guard) = &call.skip_if {
        if guard_holds(ctx, batch, target, guard).await? {
            tracing::info!(
                batch,
                target = %call.target,
                function = %call.function,
                "Already applied, skipping call"
            );
            return Ok(false);
        }
    }

    let args = ctx.resolve_args(batch, &call.args)?;
    let intent = TransactionIntent::call(from, target, encode_call(&call.function, &args));
    let confirmations = call.confirmations.unwrap_or_else(|| ctx.confirmations());

    let receipt = ctx.waiter.submit_and_wait(&intent, confirmations).await?;
    tracing::info!(
        batch,
        target = %call.target,
        function = %call.function,
        tx_hash = %receipt.tx_hash,
        block = receipt.block_number,
        "Call confirmed"
    );
    Ok(true)
}

async fn guard_holds<C, A>(
    ctx: &ExecutionContext<'_, C, A>,
    batch: &str,
    target: alloy_core::primitives::Address,
    guard: &ConfigGuard,
) -> Result<bool>
where
    C: NetworkClient,
    A: ArtifactSource + ?Sized,
{
    let args = ctx.resolve_args(batch, &guard.args)?;
    let expected = encode_params(&[ctx.resolve(batch, &guard.equals)?]);
    let actual = ctx
        .waiter
        .client()
        .read(target, &encode_call(&guard.function, &args))
        .await?;
    let holds = actual[..] == expected[..];
    tracing::debug!(batch, function = %guard.function, holds, "Guard evaluated");
    Ok(holds)
}
