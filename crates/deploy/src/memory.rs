//! An in-process network for tests and dry runs.
//!
//! Every accepted transaction is mined into its own block immediately, and
//! every call to [`NetworkClient::current_block_height`] mines one empty block,
//! so a waiter polling for depth `n` sees it after `n` polls.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Mutex, MutexGuard, PoisonError},
};

use alloy_core::primitives::{Address, B256, Bytes, keccak256};

use crate::{
    client::NetworkClient,
    error::ClientError,
    types::{PendingTx, Receipt, TransactionIntent},
};

const GAS_PER_TX: u64 = 21_000;

type RevertRule = Box<dyn Fn(&TransactionIntent) -> bool + Send + Sync>;

#[derive(Default)]
struct ChainState {
    height: u64,
    nonces: HashMap<Address, u64>,
    receipts: HashMap<B256, Receipt>,
    code: HashMap<Address, Bytes>,
    sent: Vec<TransactionIntent>,
    reads: HashMap<(Address, Bytes), Bytes>,
    submit_faults: VecDeque<ClientError>,
    poll_faults: VecDeque<ClientError>,
    revert_rules: Vec<RevertRule>,
    withheld: HashSet<B256>,
    withhold_all: bool,
    frozen: bool,
    submit_attempts: usize,
}

/// Simulated chain implementing [`NetworkClient`].
#[derive(Default)]
pub struct InMemoryNetwork {
    state: Mutex<ChainState>,
}

impl std::fmt::Debug for InMemoryNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("InMemoryNetwork")
            .field("height", &state.height)
            .field("transactions", &state.sent.len())
            .finish_non_exhaustive()
    }
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fails the next submission with `error` before it reaches the chain.
    pub fn fail_next_submit(&self, error: ClientError) {
        self.state().submit_faults.push_back(error);
    }

    /// Fails the next receipt poll with `error`.
    pub fn fail_next_poll(&self, error: ClientError) {
        self.state().poll_faults.push_back(error);
    }

    /// Mines every transaction matching `rule` as reverted.
    pub fn revert_when<F>(&self, rule: F)
    where
        F: Fn(&TransactionIntent) -> bool + Send + Sync + 'static,
    {
        self.state().revert_rules.push(Box::new(rule));
    }

    /// Reverts calls whose calldata starts with the selector of `signature`.
    pub fn revert_calls_to(&self, signature: &str) {
        let selector = crate::types::selector(signature);
        self.revert_when(move |intent| intent.to.is_some() && intent.data.starts_with(&selector));
    }

    /// Hides receipts of every later transaction, as if they were never mined.
    pub fn withhold_receipts(&self, withhold: bool) {
        self.state().withhold_all = withhold;
    }

    /// Makes a withheld transaction visible again.
    pub fn release(&self, tx_hash: B256) {
        self.state().withheld.remove(&tx_hash);
    }

    /// Stops (or resumes) mining empty blocks on height queries.
    pub fn freeze_height(&self, frozen: bool) {
        self.state().frozen = frozen;
    }

    /// Answers `read(to, data)` with `response`.
    pub fn set_read(&self, to: Address, data: Bytes, response: Bytes) {
        self.state().reads.insert((to, data), response);
    }

    /// Transactions accepted so far, in submission order.
    pub fn sent(&self) -> Vec<TransactionIntent> {
        self.state().sent.clone()
    }

    /// Number of accepted transactions.
    pub fn submissions(&self) -> usize {
        self.state().sent.len()
    }

    /// Number of accepted contract creations.
    pub fn deployments(&self) -> usize {
        self.state().sent.iter().filter(|tx| tx.to.is_none()).count()
    }

    /// Number of submission attempts, including injected failures.
    pub fn submit_attempts(&self) -> usize {
        self.state().submit_attempts
    }

    /// Init code deployed at `address`, if any.
    pub fn code_at(&self, address: &Address) -> Option<Bytes> {
        self.state().code.get(address).cloned()
    }

    pub fn height(&self) -> u64 {
        self.state().height
    }
}

impl NetworkClient for InMemoryNetwork {
    async fn submit(&self, intent: &TransactionIntent) -> Result<PendingTx, ClientError> {
        let mut state = self.state();
        state.submit_attempts += 1;
        if let Some(error) = state.submit_faults.pop_front() {
            return Err(error);
        }

        let nonce = {
            let entry = state.nonces.entry(intent.from).or_default();
            let nonce = *entry;
            *entry += 1;
            nonce
        };

        let mut preimage = Vec::with_capacity(28 + intent.data.len());
        preimage.extend_from_slice(intent.from.as_slice());
        preimage.extend_from_slice(&nonce.to_be_bytes());
        let tx_hash = keccak256([preimage.as_slice(), &intent.data[..]].concat());

        let success = !state.revert_rules.iter().any(|rule| rule(intent));
        let contract_address = match (intent.to, success) {
            (None, true) => {
                let address = Address::from_slice(&keccak256(&preimage)[12..]);
                state.code.insert(address, intent.data.clone());
                Some(address)
            }
            _ => None,
        };

        state.height += 1;
        let receipt = Receipt {
            tx_hash,
            block_number: state.height,
            contract_address,
            success,
            gas_used: GAS_PER_TX,
        };
        state.receipts.insert(tx_hash, receipt);
        if state.withhold_all {
            state.withheld.insert(tx_hash);
        }
        state.sent.push(intent.clone());

        Ok(PendingTx { tx_hash })
    }

    async fn receipt_for(&self, pending: &PendingTx) -> Result<Option<Receipt>, ClientError> {
        let mut state = self.state();
        if let Some(error) = state.poll_faults.pop_front() {
            return Err(error);
        }
        if state.withheld.contains(&pending.tx_hash) {
            return Ok(None);
        }
        Ok(state.receipts.get(&pending.tx_hash).cloned())
    }

    async fn current_block_height(&self) -> Result<u64, ClientError> {
        let mut state = self.state();
        if !state.frozen {
            state.height += 1;
        }
        Ok(state.height)
    }

    async fn read(&self, to: Address, data: &Bytes) -> Result<Bytes, ClientError> {
        Ok(self
            .state()
            .reads
            .get(&(to, data.clone()))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> Address {
        Address::repeat_byte(0x11)
    }

    #[tokio::test]
    async fn test_creation_yields_distinct_addresses() {
        let network = InMemoryNetwork::new();
        let init = Bytes::from_static(&[0x60, 0x80]);

        let first = network.submit(&TransactionIntent::create(sender(), init.clone())).await.unwrap();
        let second = network.submit(&TransactionIntent::create(sender(), init)).await.unwrap();

        let a = network.receipt_for(&first).await.unwrap().unwrap();
        let b = network.receipt_for(&second).await.unwrap().unwrap();
        assert!(a.success && b.success);
        assert_ne!(a.contract_address, b.contract_address);
        assert_eq!(b.block_number, a.block_number + 1);
        assert_eq!(network.deployments(), 2);
    }

    #[tokio::test]
    async fn test_revert_rule_applies_to_matching_calls() {
        let network = InMemoryNetwork::new();
        network.revert_calls_to("approve(address,uint256)");

        let data = Bytes::from(crate::types::selector("approve(address,uint256)").to_vec());
        let pending = network
            .submit(&TransactionIntent::call(sender(), Address::repeat_byte(0x22), data))
            .await
            .unwrap();

        let receipt = network.receipt_for(&pending).await.unwrap().unwrap();
        assert!(!receipt.success);
        assert_eq!(receipt.contract_address, None);
    }

    #[tokio::test]
    async fn test_injected_submit_fault_is_consumed_once() {
        let network = InMemoryNetwork::new();
        network.fail_next_submit(ClientError::transient("nonce too low"));
        let intent = TransactionIntent::create(sender(), Bytes::new());

        assert!(network.submit(&intent).await.is_err());
        assert!(network.submit(&intent).await.is_ok());
        assert_eq!(network.submit_attempts(), 2);
        assert_eq!(network.submissions(), 1);
    }

    #[tokio::test]
    async fn test_withheld_receipts_stay_pending_until_released() {
        let network = InMemoryNetwork::new();
        network.withhold_receipts(true);
        let pending = network
            .submit(&TransactionIntent::create(sender(), Bytes::new()))
            .await
            .unwrap();

        assert_eq!(network.receipt_for(&pending).await.unwrap(), None);
        network.release(pending.tx_hash);
        assert!(network.receipt_for(&pending).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_height_advances_per_query_unless_frozen() {
        let network = InMemoryNetwork::new();
        assert_eq!(network.current_block_height().await.unwrap(), 1);
        assert_eq!(network.current_block_height().await.unwrap(), 2);
        network.freeze_height(true);
        assert_eq!(network.current_block_height().await.unwrap(), 2);
    }
}
