//! Submission with retry, then polling until a transaction is buried deep enough.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use alloy_core::primitives::Address;
use backon::{ExponentialBuilder, Retryable};

use crate::{
    client::NetworkClient,
    error::{ClientError, Error, Result},
    network::WaitPolicy,
    types::{PendingTx, Receipt, TransactionIntent},
};

/// Drives transactions from intent to confirmed receipt.
///
/// At most one transaction per sender is in flight through a given waiter:
/// [`submit_and_wait`](Self::submit_and_wait) holds a per-sender lock from
/// submission until confirmation.
pub struct ConfirmationWaiter<C> {
    client: Arc<C>,
    policy: WaitPolicy,
    signers: Mutex<HashMap<Address, Arc<tokio::sync::Mutex<()>>>>,
}

impl<C> std::fmt::Debug for ConfirmationWaiter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfirmationWaiter")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<C: NetworkClient> ConfirmationWaiter<C> {
    pub fn new(client: Arc<C>, policy: WaitPolicy) -> Self {
        Self {
            client,
            policy,
            signers: Mutex::new(HashMap::new()),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn policy(&self) -> &WaitPolicy {
        &self.policy
    }

    fn signer_lock(&self, from: Address) -> Arc<tokio::sync::Mutex<()>> {
        self.signers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(from)
            .or_default()
            .clone()
    }

    /// Submits `intent`, retrying transient failures with exponential backoff.
    ///
    /// Rejections are returned immediately.
    pub async fn submit(&self, intent: &TransactionIntent) -> Result<PendingTx> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.policy.retry_min_delay)
            .with_max_times(self.policy.submit_retries);

        let pending = (|| async { self.client.submit(intent).await })
            .retry(backoff)
            .when(ClientError::is_transient)
            .notify(|err: &ClientError, delay| {
                tracing::warn!(
                    from = %intent.from,
                    error = %err,
                    delay = ?delay,
                    "Transaction submission failed, retrying"
                );
            })
            .await?;

        tracing::debug!(tx_hash = %pending.tx_hash, from = %intent.from, "Transaction accepted");
        Ok(pending)
    }

    /// Polls until `pending` is included and `confirmations` blocks deep.
    ///
    /// Fails with [`Error::TransactionReverted`] as soon as a failed receipt is
    /// seen and with [`Error::TransactionTimeout`] once the policy timeout
    /// elapses. The transaction is never resubmitted.
    pub async fn wait_for(&self, pending: &PendingTx, confirmations: u64) -> Result<Receipt> {
        let timeout = self.policy.timeout;
        match tokio::time::timeout(timeout, self.poll(pending, confirmations)).await {
            Ok(result) => result,
            Err(_) => Err(Error::TransactionTimeout {
                tx_hash: pending.tx_hash,
                required: confirmations,
                waited: timeout,
            }),
        }
    }

    async fn poll(&self, pending: &PendingTx, confirmations: u64) -> Result<Receipt> {
        loop {
            match self.client.receipt_for(pending).await {
                Ok(Some(receipt)) if !receipt.success => {
                    return Err(Error::TransactionReverted {
                        tx_hash: receipt.tx_hash,
                        block_number: receipt.block_number,
                    });
                }
                Ok(Some(receipt)) => {
                    if confirmations == 0 {
                        return Ok(receipt);
                    }
                    match self.client.current_block_height().await {
                        Ok(head) => {
                            let depth = head.saturating_sub(receipt.block_number);
                            if depth >= confirmations {
                                return Ok(receipt);
                            }
                            tracing::trace!(
                                tx_hash = %pending.tx_hash,
                                depth,
                                required = confirmations,
                                "Waiting for confirmations"
                            );
                        }
                        Err(e) if e.is_transient() => {
                            tracing::debug!(error = %e, "Block height query failed, retrying");
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Ok(None) => {
                    tracing::trace!(tx_hash = %pending.tx_hash, "Transaction not yet included");
                }
                Err(e) if e.is_transient() => {
                    tracing::debug!(tx_hash = %pending.tx_hash, error = %e, "Receipt query failed, retrying");
                }
                Err(e) => return Err(e.into()),
            }

            tokio::time::sleep(self.policy.poll_interval).await;
        }
    }

    /// Submits `intent` and waits for `confirmations`.
    pub async fn submit_and_wait(&self, intent: &TransactionIntent, confirmations: u64) -> Result<Receipt> {
        self.submit_and_wait_with(intent, confirmations, |_| Ok(())).await
    }

    /// Like [`submit_and_wait`](Self::submit_and_wait), calling `on_submitted`
    /// once the network accepted the transaction and before waiting.
    ///
    /// An error from `on_submitted` aborts the wait; the transaction stays
    /// submitted.
    pub async fn submit_and_wait_with<F>(
        &self,
        intent: &TransactionIntent,
        confirmations: u64,
        on_submitted: F,
    ) -> Result<Receipt>
    where
        F: FnOnce(&PendingTx) -> Result<()>,
    {
        let lock = self.signer_lock(intent.from);
        let _guard = lock.lock().await;

        let pending = self.submit(intent).await?;
        on_submitted(&pending)?;
        self.wait_for(&pending, confirmations).await
    }
}
