//! Named accounts and the local keys behind them.

use std::{collections::BTreeMap, fmt, str::FromStr};

use alloy_core::primitives::Address;
use alloy_signer_local::{MnemonicBuilder, PrivateKeySigner, coins_bip39::English};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{Error, Result};

/// A hex-encoded private key. Never printed nor written back to disk.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct SecretKey(String);

impl SecretKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

impl Serialize for SecretKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str("<redacted>")
    }
}

/// Where a named account comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountSource {
    /// Derivation index on the standard Ethereum path of the configured mnemonic.
    Index(u32),
    /// A raw private key, usually supplied as `SHIPYARD_ACCOUNTS__<NAME>__PRIVATE_KEY`.
    PrivateKey(SecretKey),
    /// A fixed address whose key is held by the node.
    Address(Address),
}

/// Resolved account names.
///
/// Accounts backed by a mnemonic index or a private key carry a signer, so
/// their transactions are signed locally. The others are sent unsigned for
/// the node to sign.
#[derive(Clone, Default)]
pub struct Accounts {
    addresses: BTreeMap<String, Address>,
    signers: BTreeMap<Address, PrivateKeySigner>,
}

impl fmt::Debug for Accounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accounts")
            .field("addresses", &self.addresses)
            .field("signers", &self.signers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Accounts {
    /// Resolves every declared account. `Index` sources require a mnemonic.
    pub fn resolve(declared: &BTreeMap<String, AccountSource>, mnemonic: Option<&str>) -> Result<Self> {
        let mut accounts = Self::default();
        for (name, source) in declared {
            let address = match source {
                AccountSource::Address(address) => *address,
                AccountSource::Index(index) => {
                    let phrase = mnemonic.ok_or_else(|| Error::Account {
                        name: name.clone(),
                        reason: "derived accounts need a mnemonic (set SHIPYARD_MNEMONIC)".to_string(),
                    })?;
                    accounts.add_signer(derive(name, phrase, *index)?)
                }
                AccountSource::PrivateKey(key) => {
                    let signer = PrivateKeySigner::from_str(&key.0).map_err(|e| Error::Account {
                        name: name.clone(),
                        reason: format!("invalid private key: {e}"),
                    })?;
                    accounts.add_signer(signer)
                }
            };
            tracing::debug!(
                account = %name,
                address = %address,
                local = accounts.signers.contains_key(&address),
                "Account resolved"
            );
            accounts.addresses.insert(name.clone(), address);
        }
        Ok(accounts)
    }

    pub fn from_addresses<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Address)>,
        S: Into<String>,
    {
        Self {
            addresses: entries.into_iter().map(|(name, address)| (name.into(), address)).collect(),
            signers: BTreeMap::new(),
        }
    }

    pub fn address(&self, name: &str) -> Result<Address> {
        self.addresses.get(name).copied().ok_or_else(|| Error::Account {
            name: name.to_string(),
            reason: "not declared".to_string(),
        })
    }

    /// Keys of the locally signing accounts.
    pub fn signers(&self) -> impl Iterator<Item = &PrivateKeySigner> {
        self.signers.values()
    }

    fn add_signer(&mut self, signer: PrivateKeySigner) -> Address {
        let address = signer.address();
        self.signers.insert(address, signer);
        address
    }
}

fn derive(name: &str, phrase: &str, index: u32) -> Result<PrivateKeySigner> {
    MnemonicBuilder::<English>::default()
        .phrase(phrase)
        .index(index)
        .and_then(|builder| builder.build())
        .map_err(|e| Error::Account {
            name: name.to_string(),
            reason: e.to_string(),
        })
}
