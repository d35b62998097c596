//! Local signing of EIP-1559 transactions.

use alloy_consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy_core::primitives::{B256, Bytes, TxKind, U256, keccak256};
use alloy_eips::eip2718::Encodable2718;
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;

use crate::{error::ClientError, types::TransactionIntent};

/// Chain state a transaction is signed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxParams {
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_limit: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

/// An encoded transaction ready for `eth_sendRawTransaction`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub tx_hash: B256,
    pub raw: Bytes,
}

/// Signs `intent` as a type 2 transaction carrying no value.
pub fn sign_eip1559(
    signer: &PrivateKeySigner,
    intent: &TransactionIntent,
    params: &TxParams,
) -> Result<SignedTransaction, ClientError> {
    let tx = TxEip1559 {
        chain_id: params.chain_id,
        nonce: params.nonce,
        gas_limit: params.gas_limit,
        max_fee_per_gas: params.max_fee_per_gas,
        max_priority_fee_per_gas: params.max_priority_fee_per_gas,
        to: intent.to.map_or(TxKind::Create, TxKind::Call),
        value: U256::ZERO,
        input: intent.data.clone(),
        ..Default::default()
    };

    let signature = signer
        .sign_hash_sync(&tx.signature_hash())
        .map_err(|e| ClientError::rejected(format!("failed to sign transaction: {e}")))?;
    let raw = TxEnvelope::from(tx.into_signed(signature)).encoded_2718();

    Ok(SignedTransaction {
        tx_hash: keccak256(&raw),
        raw: raw.into(),
    })
}
