//! JSON-RPC implementation of [`NetworkClient`].

use std::{collections::HashMap, fmt, time::Duration};

use alloy_core::primitives::{Address, B256, Bytes};
use alloy_signer_local::PrivateKeySigner;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use url::Url;

use crate::{
    client::NetworkClient,
    error::{ClientError, ClientErrorKind, ConfigurationError, Error},
    network::NetworkName,
    signing::{TxParams, sign_eip1559},
    types::{PendingTx, Receipt, TransactionIntent},
};

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Headroom added to `eth_estimateGas`, in percent.
const GAS_LIMIT_MARGIN: u64 = 20;

/// Node error messages that describe a race or overload rather than a bad transaction.
const TRANSIENT_PATTERNS: &[&str] = &[
    "nonce too low",
    "replacement transaction underpriced",
    "already known",
    "transaction underpriced",
    "timeout",
    "timed out",
    "rate limit",
    "too many requests",
    "header not found",
    "try again",
];

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client, ClientError> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .map_err(|e| ClientError::rejected(format!("failed to create HTTP client: {e}")))
}

/// Classifies a node error message for the retry policy.
pub fn classify_rpc_message(message: &str) -> ClientErrorKind {
    let message = message.to_ascii_lowercase();
    if TRANSIENT_PATTERNS.iter().any(|p| message.contains(p)) {
        ClientErrorKind::Transient
    } else {
        ClientErrorKind::Rejected
    }
}

fn classify_http_error(method: &str, error: reqwest::Error) -> ClientError {
    let message = format!("{method} request failed: {error}");
    if error.is_timeout() || error.is_connect() || error.is_request() {
        ClientError::transient(message)
    } else {
        ClientError::rejected(message)
    }
}

/// Make a JSON-RPC call and deserialize the result.
///
/// # Arguments
/// * `client` - The HTTP client to use
/// * `url` - The RPC endpoint URL
/// * `method` - The RPC method name
/// * `params` - The method parameters
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &Url,
    method: &str,
    params: Vec<Value>,
) -> Result<T, ClientError> {
    let response = client
        .post(url.clone())
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .map_err(|e| classify_http_error(method, e))?;

    let status = response.status();
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(ClientError::transient(format!("{method} returned HTTP {status}")));
    }

    let result: Value = response
        .json()
        .await
        .map_err(|e| ClientError::rejected(format!("failed to parse {method} response: {e}")))?;

    if let Some(error) = result.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown");
        return Err(ClientError {
            kind: classify_rpc_message(message),
            message: format!("{method}: {message}"),
        });
    }

    let result_value = result
        .get("result")
        .cloned()
        .ok_or_else(|| ClientError::rejected(format!("no result in {method} response")))?;

    serde_json::from_value(result_value)
        .map_err(|e| ClientError::rejected(format!("failed to deserialize {method} result: {e}")))
}

/// Deserialize a u64 from a hex string (with 0x prefix).
fn deserialize_u64_from_hex<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: &str = Deserialize::deserialize(deserializer)?;
    parse_hex_u64(s).map_err(serde::de::Error::custom)
}

fn parse_hex_u64(s: &str) -> Result<u64, std::num::ParseIntError> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
}

fn parse_hex_u128(s: &str) -> Result<u128, std::num::ParseIntError> {
    u128::from_str_radix(s.trim_start_matches("0x"), 16)
}

fn hex_quantity<T, E: fmt::Display>(
    method: &str,
    hex: &str,
    parse: impl FnOnce(&str) -> Result<T, E>,
) -> Result<T, ClientError> {
    parse(hex).map_err(|e| ClientError::rejected(format!("invalid {method} result `{hex}`: {e}")))
}

/// Transaction object for `eth_sendTransaction` and `eth_estimateGas`.
#[derive(Debug, Serialize)]
struct RpcTransaction<'a> {
    from: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    to: Option<Address>,
    data: &'a Bytes,
}

/// Receipt object returned by `eth_getTransactionReceipt`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: B256,
    #[serde(deserialize_with = "deserialize_u64_from_hex")]
    block_number: u64,
    #[serde(default)]
    contract_address: Option<Address>,
    #[serde(deserialize_with = "deserialize_u64_from_hex")]
    status: u64,
    #[serde(deserialize_with = "deserialize_u64_from_hex")]
    gas_used: u64,
}

/// The part of `eth_getBlockByNumber` needed to price a transaction.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcBlock {
    #[serde(default)]
    base_fee_per_gas: Option<String>,
}

impl From<RpcReceipt> for Receipt {
    fn from(receipt: RpcReceipt) -> Self {
        Self {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number,
            contract_address: receipt.contract_address,
            success: receipt.status == 1,
            gas_used: receipt.gas_used,
        }
    }
}

/// Talks to a node over HTTP JSON-RPC.
///
/// Transactions from an account with a registered signer are signed locally
/// and sent with `eth_sendRawTransaction`. Any other sender must be managed by
/// the node (a local devnet or a signing proxy) and goes through
/// `eth_sendTransaction`.
#[derive(Clone)]
pub struct JsonRpcClient {
    http: reqwest::Client,
    url: Url,
    chain_id: Option<u64>,
    signers: HashMap<Address, PrivateKeySigner>,
}

impl fmt::Debug for JsonRpcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonRpcClient")
            .field("url", &self.url.as_str())
            .field("chain_id", &self.chain_id)
            .field("signers", &self.signers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl JsonRpcClient {
    pub fn new(url: Url) -> Result<Self, ClientError> {
        Ok(Self {
            http: create_client()?,
            url,
            chain_id: None,
            signers: HashMap::new(),
        })
    }

    /// Creates a client bound to the chain served at `url`, failing when it is
    /// not `expected_chain_id`.
    pub async fn connect(
        network: &NetworkName,
        url: Url,
        expected_chain_id: Option<u64>,
    ) -> Result<Self, Error> {
        let mut client = Self::new(url)?;

        let actual = client.chain_id().await?;
        match expected_chain_id {
            Some(expected) if expected != actual => {
                return Err(ConfigurationError::ChainIdMismatch {
                    network: network.clone(),
                    expected,
                    actual,
                }
                .into());
            }
            _ => {}
        }
        tracing::debug!(network = %network, chain_id = actual, "Chain id verified");
        client.chain_id = Some(actual);

        Ok(client)
    }

    /// Signs transactions from these accounts locally.
    pub fn with_signers<'s>(mut self, signers: impl IntoIterator<Item = &'s PrivateKeySigner>) -> Self {
        self.signers
            .extend(signers.into_iter().map(|signer| (signer.address(), signer.clone())));
        self
    }

    pub async fn chain_id(&self) -> Result<u64, ClientError> {
        if let Some(chain_id) = self.chain_id {
            return Ok(chain_id);
        }
        let hex: String = json_rpc_call(&self.http, &self.url, "eth_chainId", vec![]).await?;
        hex_quantity("eth_chainId", &hex, parse_hex_u64)
    }

    fn to_json<T: Serialize>(value: T) -> Result<Value, ClientError> {
        serde_json::to_value(value).map_err(|e| ClientError::rejected(e.to_string()))
    }

    async fn call_u64(&self, method: &str, params: Vec<Value>) -> Result<u64, ClientError> {
        let hex: String = json_rpc_call(&self.http, &self.url, method, params).await?;
        hex_quantity(method, &hex, parse_hex_u64)
    }

    /// Nonce, gas limit and fees for a transaction from `intent.from`.
    async fn tx_params(&self, intent: &TransactionIntent) -> Result<TxParams, ClientError> {
        let tx = Self::to_json(RpcTransaction {
            from: intent.from,
            to: intent.to,
            data: &intent.data,
        })?;
        let (chain_id, nonce, gas, priority_fee, block) = tokio::try_join!(
            self.chain_id(),
            self.call_u64(
                "eth_getTransactionCount",
                vec![Self::to_json(intent.from)?, Value::from("pending")],
            ),
            self.call_u64("eth_estimateGas", vec![tx]),
            async {
                let hex: String = json_rpc_call(&self.http, &self.url, "eth_maxPriorityFeePerGas", vec![]).await?;
                hex_quantity("eth_maxPriorityFeePerGas", &hex, parse_hex_u128)
            },
            json_rpc_call::<RpcBlock>(
                &self.http,
                &self.url,
                "eth_getBlockByNumber",
                vec![Value::from("latest"), Value::from(false)],
            ),
        )?;

        let base_fee = block
            .base_fee_per_gas
            .ok_or_else(|| ClientError::rejected("node does not report a base fee (pre-London chain)"))?;
        let base_fee = hex_quantity("eth_getBlockByNumber", &base_fee, parse_hex_u128)?;

        Ok(TxParams {
            chain_id,
            nonce,
            gas_limit: gas + gas * GAS_LIMIT_MARGIN / 100,
            max_fee_per_gas: base_fee * 2 + priority_fee,
            max_priority_fee_per_gas: priority_fee,
        })
    }
}

impl NetworkClient for JsonRpcClient {
    async fn submit(&self, intent: &TransactionIntent) -> Result<PendingTx, ClientError> {
        if let Some(signer) = self.signers.get(&intent.from) {
            let params = self.tx_params(intent).await?;
            let signed = sign_eip1559(signer, intent, &params)?;
            let tx_hash: B256 = json_rpc_call(
                &self.http,
                &self.url,
                "eth_sendRawTransaction",
                vec![Self::to_json(&signed.raw)?],
            )
            .await?;
            if tx_hash != signed.tx_hash {
                tracing::warn!(expected = %signed.tx_hash, reported = %tx_hash, "Node reported an unexpected transaction hash");
            }
            tracing::debug!(tx_hash = %tx_hash, from = %intent.from, nonce = params.nonce, "Signed transaction sent");
            return Ok(PendingTx { tx_hash });
        }

        let tx = Self::to_json(RpcTransaction {
            from: intent.from,
            to: intent.to,
            data: &intent.data,
        })?;
        let tx_hash: B256 = json_rpc_call(&self.http, &self.url, "eth_sendTransaction", vec![tx]).await?;
        tracing::debug!(tx_hash = %tx_hash, from = %intent.from, "Transaction sent");
        Ok(PendingTx { tx_hash })
    }

    async fn receipt_for(&self, pending: &PendingTx) -> Result<Option<Receipt>, ClientError> {
        let receipt: Option<RpcReceipt> = json_rpc_call(
            &self.http,
            &self.url,
            "eth_getTransactionReceipt",
            vec![Self::to_json(pending.tx_hash)?],
        )
        .await?;
        Ok(receipt.map(Receipt::from))
    }

    async fn current_block_height(&self) -> Result<u64, ClientError> {
        self.call_u64("eth_blockNumber", vec![]).await
    }

    async fn read(&self, to: Address, data: &Bytes) -> Result<Bytes, ClientError> {
        json_rpc_call(
            &self.http,
            &self.url,
            "eth_call",
            vec![
                serde_json::json!({ "to": to, "data": data }),
                serde_json::json!("latest"),
            ],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn url(server: &MockServer) -> Url {
        server.base_url().parse().unwrap()
    }

    fn network() -> NetworkName {
        NetworkName::new("sepolia").unwrap()
    }

    async fn call(server: &MockServer) -> Result<String, ClientError> {
        json_rpc_call(&create_client().unwrap(), &url(server), "eth_blockNumber", vec![]).await
    }

    #[test]
    fn test_classify_rpc_message() {
        assert_eq!(classify_rpc_message("nonce too low"), ClientErrorKind::Transient);
        assert_eq!(
            classify_rpc_message("Replacement transaction underpriced"),
            ClientErrorKind::Transient
        );
        assert_eq!(
            classify_rpc_message("execution reverted: Ownable: caller is not the owner"),
            ClientErrorKind::Rejected
        );
        assert_eq!(
            classify_rpc_message("gas required exceeds allowance"),
            ClientErrorKind::Rejected
        );
    }

    #[test]
    fn test_receipt_from_rpc_json() {
        let raw = serde_json::json!({
            "transactionHash": format!("0x{}", "ab".repeat(32)),
            "blockNumber": "0x1b4",
            "contractAddress": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
            "status": "0x1",
            "gasUsed": "0x5208",
            "logs": []
        });
        let receipt: Receipt = serde_json::from_value::<RpcReceipt>(raw).unwrap().into();

        assert_eq!(receipt.block_number, 436);
        assert_eq!(receipt.gas_used, 21_000);
        assert!(receipt.success);
        assert!(receipt.contract_address.is_some());
    }

    #[test]
    fn test_reverted_receipt_without_contract_address() {
        let raw = serde_json::json!({
            "transactionHash": format!("0x{}", "cd".repeat(32)),
            "blockNumber": "0x10",
            "contractAddress": null,
            "status": "0x0",
            "gasUsed": "0x1"
        });
        let receipt: Receipt = serde_json::from_value::<RpcReceipt>(raw).unwrap().into();

        assert!(!receipt.success);
        assert_eq!(receipt.contract_address, None);
    }

    #[test]
    fn test_transaction_object_omits_to_for_creations() {
        let data = Bytes::from_static(&[0x60, 0x80]);
        let create = serde_json::to_value(RpcTransaction {
            from: Address::ZERO,
            to: None,
            data: &data,
        })
        .unwrap();
        assert!(create.get("to").is_none());
        assert_eq!(create["data"], "0x6080");
    }

    #[tokio::test]
    async fn test_overloaded_node_is_transient() {
        for status in [503, 429] {
            let server = MockServer::start();
            server.mock(|when, then| {
                when.method(POST);
                then.status(status).body("busy");
            });

            let err = call(&server).await.unwrap_err();

            assert!(err.is_transient(), "HTTP {status} should be retried");
            assert!(err.message.contains(&status.to_string()));
        }
    }

    #[tokio::test]
    async fn test_rpc_errors_are_classified_by_message() {
        let cases = [
            ("nonce too low", ClientErrorKind::Transient),
            ("execution reverted: Ownable: caller is not the owner", ClientErrorKind::Rejected),
        ];
        for (message, kind) in cases {
            let server = MockServer::start();
            server.mock(|when, then| {
                when.method(POST).body_includes("eth_blockNumber");
                then.status(200).json_body(json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "error": { "code": -32000, "message": message }
                }));
            });

            let err = call(&server).await.unwrap_err();

            assert_eq!(err.kind, kind, "{message}");
            assert_eq!(err.message, format!("eth_blockNumber: {message}"));
        }
    }

    #[tokio::test]
    async fn test_response_without_result_is_rejected() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST);
            then.status(200).json_body(json!({ "jsonrpc": "2.0", "id": 1 }));
        });

        let err = call(&server).await.unwrap_err();

        assert_eq!(err.kind, ClientErrorKind::Rejected);
        assert!(err.message.contains("no result"));
    }

    #[tokio::test]
    async fn test_connect_rejects_another_chain() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).body_includes("eth_chainId");
            then.status(200).json_body(json!({ "jsonrpc": "2.0", "id": 1, "result": "0x1" }));
        });

        let err = JsonRpcClient::connect(&network(), url(&server), Some(11155111))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::ChainIdMismatch { expected: 11155111, actual: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_connect_remembers_the_chain_id() {
        let server = MockServer::start();
        let chain_id = server.mock(|when, then| {
            when.method(POST).body_includes("eth_chainId");
            then.status(200).json_body(json!({ "jsonrpc": "2.0", "id": 1, "result": "0xaa36a7" }));
        });

        let client = JsonRpcClient::connect(&network(), url(&server), Some(11155111))
            .await
            .unwrap();

        assert_eq!(client.chain_id().await.unwrap(), 11155111);
        assert_eq!(chain_id.calls(), 1);
    }

    #[tokio::test]
    async fn test_local_signer_sends_raw_transactions() {
        let server = MockServer::start();
        let reply = |method: &'static str, result: Value| {
            server.mock(move |when, then| {
                when.method(POST).body_includes(format!("\"{method}\""));
                then.status(200).json_body(json!({ "jsonrpc": "2.0", "id": 1, "result": result }));
            })
        };
        reply("eth_chainId", json!("0x7a69"));
        let nonce = reply("eth_getTransactionCount", json!("0x3"));
        reply("eth_estimateGas", json!("0x5208"));
        reply("eth_maxPriorityFeePerGas", json!("0x3b9aca00"));
        reply("eth_getBlockByNumber", json!({ "number": "0x10", "baseFeePerGas": "0x77359400" }));
        let tx_hash = B256::repeat_byte(0xab);
        let raw = server.mock(|when, then| {
            // Type 2 envelopes start with 0x02.
            when.method(POST)
                .body_includes("\"eth_sendRawTransaction\"")
                .body_includes("\"0x02");
            then.status(200).json_body(json!({ "jsonrpc": "2.0", "id": 1, "result": tx_hash }));
        });
        let unsigned = reply("eth_sendTransaction", json!(B256::ZERO));

        let signer = PrivateKeySigner::from_str(DEV_KEY).unwrap();
        let client = JsonRpcClient::connect(&network(), url(&server), Some(31337))
            .await
            .unwrap()
            .with_signers([&signer]);
        let intent = TransactionIntent::create(signer.address(), Bytes::from_static(&[0x60, 0x80]));

        let pending = client.submit(&intent).await.unwrap();

        assert_eq!(pending.tx_hash, tx_hash);
        assert_eq!(raw.calls(), 1);
        assert_eq!(nonce.calls(), 1);
        assert_eq!(unsigned.calls(), 0);
    }

    #[tokio::test]
    async fn test_node_managed_account_uses_send_transaction() {
        let server = MockServer::start();
        let tx_hash = B256::repeat_byte(0xcd);
        let unsigned = server.mock(|when, then| {
            when.method(POST).body_includes("\"eth_sendTransaction\"");
            then.status(200).json_body(json!({ "jsonrpc": "2.0", "id": 1, "result": tx_hash }));
        });

        let client = JsonRpcClient::new(url(&server)).unwrap();
        let intent = TransactionIntent::create(Address::repeat_byte(0x01), Bytes::from_static(&[0x60, 0x80]));

        assert_eq!(client.submit(&intent).await.unwrap().tx_hash, tx_hash);
        assert_eq!(unsigned.calls(), 1);
    }
}
