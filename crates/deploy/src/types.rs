//! Values, transactions and receipts exchanged between the engine and its collaborators.

use std::{fmt, str::FromStr};

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, B256, Bytes, I256, U256, keccak256},
};
use serde::{Deserialize, Serialize};

/// Numeric literal as written in the manifest: a TOML integer or a decimal/hex string.
///
/// Strings carry values wider than 64 bits, e.g. token amounts in wei.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumberLiteral {
    Int(i64),
    Text(String),
}

impl NumberLiteral {
    pub fn to_u256(&self) -> Result<U256, String> {
        match self {
            Self::Int(n) => u64::try_from(*n)
                .map(U256::from)
                .map_err(|_| "negative value for an unsigned integer".to_string()),
            Self::Text(s) => U256::from_str(s.trim()).map_err(|e| e.to_string()),
        }
    }

    pub fn to_i256(&self) -> Result<I256, String> {
        match self {
            Self::Int(n) => I256::from_dec_str(&n.to_string()).map_err(|e| e.to_string()),
            Self::Text(s) => {
                let s = s.trim();
                let parsed = if s.trim_start_matches('-').starts_with("0x") {
                    I256::from_hex_str(s)
                } else {
                    I256::from_dec_str(s)
                };
                parsed.map_err(|e| e.to_string())
            }
        }
    }
}

impl fmt::Display for NumberLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// An argument as declared in the manifest.
///
/// `Deployment` and `Account` are references resolved at execution time
/// against the ledger and the named accounts respectively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgValue {
    Address(Address),
    Uint(NumberLiteral),
    Int(NumberLiteral),
    Bool(bool),
    String(String),
    Bytes(Bytes),
    Array(Vec<ArgValue>),
    /// Address of a ledger entry on the current network.
    Deployment(String),
    /// Address of a named account.
    Account(String),
}

impl ArgValue {
    /// Every deployment name this value refers to, depth-first.
    pub fn deployment_refs(&self) -> Vec<&str> {
        let mut refs = Vec::new();
        self.collect_refs(&mut refs, RefKind::Deployment);
        refs
    }

    /// Every account name this value refers to, depth-first.
    pub fn account_refs(&self) -> Vec<&str> {
        let mut refs = Vec::new();
        self.collect_refs(&mut refs, RefKind::Account);
        refs
    }

    fn collect_refs<'a>(&'a self, out: &mut Vec<&'a str>, kind: RefKind) {
        match (self, kind) {
            (ArgValue::Array(items), _) => {
                for item in items {
                    item.collect_refs(out, kind);
                }
            }
            (ArgValue::Deployment(name), RefKind::Deployment)
            | (ArgValue::Account(name), RefKind::Account) => out.push(name),
            _ => {}
        }
    }
}

#[derive(Clone, Copy)]
enum RefKind {
    Deployment,
    Account,
}

/// A fully resolved argument: what is encoded on-chain and kept in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedValue {
    Address(Address),
    Uint(U256),
    Int(I256),
    Bool(bool),
    String(String),
    Bytes(Bytes),
    Array(Vec<ResolvedValue>),
}

impl ResolvedValue {
    pub fn to_sol(&self) -> DynSolValue {
        match self {
            Self::Address(address) => DynSolValue::Address(*address),
            Self::Uint(value) => DynSolValue::Uint(*value, 256),
            Self::Int(value) => DynSolValue::Int(*value, 256),
            Self::Bool(value) => DynSolValue::Bool(*value),
            Self::String(value) => DynSolValue::String(value.clone()),
            Self::Bytes(value) => DynSolValue::Bytes(value.to_vec()),
            Self::Array(items) => DynSolValue::Array(items.iter().map(Self::to_sol).collect()),
        }
    }

    /// Whether `address` appears anywhere in this value.
    pub fn contains_address(&self, address: &Address) -> bool {
        match self {
            Self::Address(a) => a == address,
            Self::Array(items) => items.iter().any(|item| item.contains_address(address)),
            _ => false,
        }
    }
}

/// ABI-encodes `values` as a parameter list (no selector).
pub fn encode_params(values: &[ResolvedValue]) -> Vec<u8> {
    DynSolValue::Tuple(values.iter().map(ResolvedValue::to_sol).collect()).abi_encode_params()
}

/// Four-byte selector of a human-readable signature such as `approve(address,uint256)`.
pub fn selector(signature: &str) -> [u8; 4] {
    let normalized: String = signature.chars().filter(|c| !c.is_whitespace()).collect();
    let hash = keccak256(normalized.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Calldata for calling `signature` with `args`.
pub fn encode_call(signature: &str, args: &[ResolvedValue]) -> Bytes {
    let mut data = selector(signature).to_vec();
    data.extend(encode_params(args));
    data.into()
}

/// Whether `signature` looks like `name(type,...)`.
pub fn is_valid_signature(signature: &str) -> bool {
    let Some(open) = signature.find('(') else {
        return false;
    };
    let name = &signature[..open];
    !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && signature.ends_with(')')
}

/// A transaction the engine wants included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionIntent {
    /// Sending account.
    pub from: Address,
    /// Callee; `None` creates a contract from `data`.
    pub to: Option<Address>,
    pub data: Bytes,
}

impl TransactionIntent {
    pub fn create(from: Address, init_code: Bytes) -> Self {
        Self {
            from,
            to: None,
            data: init_code,
        }
    }

    pub fn call(from: Address, to: Address, data: Bytes) -> Self {
        Self {
            from,
            to: Some(to),
            data,
        }
    }
}

/// Handle of a transaction accepted by the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingTx {
    pub tx_hash: B256,
}

/// Outcome of an included transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: B256,
    pub block_number: u64,
    /// Set for successful contract creations.
    pub contract_address: Option<Address>,
    pub success: bool,
    pub gas_used: u64,
}
