//! The network client seam.

use std::future::Future;

use alloy_core::primitives::{Address, Bytes};

use crate::{
    error::ClientError,
    types::{PendingTx, Receipt, TransactionIntent},
};

/// Operations the engine needs from a blockchain node.
///
/// Signing is the client's concern: `intent.from` names the account, and
/// the client (or the node behind it) is expected to hold its key.
pub trait NetworkClient: Send + Sync + 'static {
    /// Hands a transaction to the network.
    fn submit(
        &self,
        intent: &TransactionIntent,
    ) -> impl Future<Output = Result<PendingTx, ClientError>> + Send;

    /// The receipt of `pending`, or `None` while it is not included.
    fn receipt_for(
        &self,
        pending: &PendingTx,
    ) -> impl Future<Output = Result<Option<Receipt>, ClientError>> + Send;

    /// Number of the latest block.
    fn current_block_height(&self) -> impl Future<Output = Result<u64, ClientError>> + Send;

    /// Executes a read-only call against `to` at the latest block.
    fn read(
        &self,
        to: Address,
        data: &Bytes,
    ) -> impl Future<Output = Result<Bytes, ClientError>> + Send;
}
