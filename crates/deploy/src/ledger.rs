//! Durable record of what has been deployed where.
//!
//! Layout under the ledger root:
//!
//! ```text
//! .lock                         advisory lock: exclusive for writers, shared for readers
//! <network>/<name>.json         one DeploymentRecord per artifact
//! <network>/.pending/<name>.json  submitted but unconfirmed deployments
//! ```
//!
//! Every write goes to a temporary file, is synced, renamed into place and the
//! directory synced before the call returns.

use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use alloy_core::primitives::{Address, B256};
use fs2::FileExt;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    error::{Error, Result},
    network::NetworkName,
    types::{Receipt, ResolvedValue},
};

const LOCK_FILE: &str = ".lock";
const PENDING_DIR: &str = ".pending";

/// Receipt fields kept in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptSummary {
    pub tx_hash: B256,
    pub block_number: u64,
    pub gas_used: u64,
}

impl From<&Receipt> for ReceiptSummary {
    fn from(receipt: &Receipt) -> Self {
        Self {
            tx_hash: receipt.tx_hash,
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
        }
    }
}

/// A confirmed deployment of one artifact on one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub name: String,
    /// Contract type the artifact was built from.
    pub contract: String,
    pub address: Address,
    pub receipt: ReceiptSummary,
    /// Constructor arguments as encoded on-chain.
    pub args: Vec<ResolvedValue>,
    /// See [`crate::fingerprint`].
    pub fingerprint: String,
    /// RFC 3339 timestamp of when the record was written.
    pub deployed_at: String,
}

/// A deployment that was accepted by the network but not yet confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDeployment {
    pub tx_hash: B256,
    pub contract: String,
    pub args: Vec<ResolvedValue>,
    pub fingerprint: String,
    pub submitted_at: String,
}

type Records = BTreeMap<NetworkName, BTreeMap<String, DeploymentRecord>>;

/// Persisted mapping from `(network, name)` to [`DeploymentRecord`].
pub struct Ledger {
    root: PathBuf,
    records: Mutex<Records>,
    _lock: Option<File>,
    writable: bool,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger").field("root", &self.root).finish_non_exhaustive()
    }
}

impl Ledger {
    /// Opens (creating if needed) the ledger at `root` and loads every record.
    ///
    /// Fails if another process holds the ledger lock.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| Error::persistence(&root, e))?;

        let lock_path = root.join(LOCK_FILE);
        let lock = File::create(&lock_path).map_err(|e| Error::persistence(&lock_path, e))?;
        lock.try_lock_exclusive().map_err(|e| {
            Error::persistence(
                &lock_path,
                io::Error::new(e.kind(), "ledger is locked by another process"),
            )
        })?;

        let records = load_all(&root)?;
        let count: usize = records.values().map(BTreeMap::len).sum();
        tracing::debug!(root = %root.display(), records = count, "Ledger loaded");

        Ok(Self {
            root,
            records: Mutex::new(records),
            _lock: Some(lock),
            writable: true,
        })
    }

    /// Opens the ledger at `root` for inspection only.
    ///
    /// A missing root reads as an empty ledger and is not created. A shared
    /// lock is taken when available; while a writer holds the lock the records
    /// are still read, each file being replaced atomically. Writes fail.
    pub fn open_read_only(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Ok(Self {
                root,
                records: Mutex::new(Records::new()),
                _lock: None,
                writable: false,
            });
        }

        let lock_path = root.join(LOCK_FILE);
        let lock = match File::open(&lock_path) {
            Ok(file) => match FileExt::try_lock_shared(&file) {
                Ok(()) => Some(file),
                Err(_) => {
                    tracing::warn!(root = %root.display(), "Ledger is being written by another process, reading a snapshot");
                    None
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(Error::persistence(&lock_path, e)),
        };

        let records = load_all(&root)?;
        Ok(Self {
            root,
            records: Mutex::new(records),
            _lock: lock,
            writable: false,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn get(&self, network: &NetworkName, name: &str) -> Option<DeploymentRecord> {
        self.records()
            .get(network)
            .and_then(|entries| entries.get(name))
            .cloned()
    }

    /// Stores `record` under `(network, record.name)`.
    ///
    /// Fails with [`Error::DuplicateKey`] when an entry exists and `overwrite`
    /// is false. The record is on disk when this returns `Ok`.
    pub fn put(&self, network: &NetworkName, record: DeploymentRecord, overwrite: bool) -> Result<()> {
        self.ensure_writable()?;
        // Held across the write: one writer per key at a time.
        let mut records = self.records();
        let entries = records.entry(network.clone()).or_default();

        if !overwrite && entries.contains_key(&record.name) {
            return Err(Error::DuplicateKey {
                network: network.clone(),
                name: record.name,
            });
        }

        let path = self.record_path(network, &record.name);
        write_json(&path, &record)?;
        tracing::debug!(
            network = %network,
            name = %record.name,
            address = %record.address,
            path = %path.display(),
            "Ledger entry persisted"
        );

        entries.insert(record.name.clone(), record);
        Ok(())
    }

    /// Every record on `network`, sorted by name.
    pub fn all(&self, network: &NetworkName) -> Vec<(String, DeploymentRecord)> {
        self.records()
            .get(network)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(name, record)| (name.clone(), record.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Journals a submitted deployment so a later run can adopt or resume it.
    pub fn mark_pending(&self, network: &NetworkName, name: &str, pending: &PendingDeployment) -> Result<()> {
        self.ensure_writable()?;
        let _guard = self.records();
        let path = self.pending_path(network, name);
        write_json(&path, pending)?;
        tracing::debug!(network = %network, name, tx_hash = %pending.tx_hash, "Pending deployment journaled");
        Ok(())
    }

    pub fn pending(&self, network: &NetworkName, name: &str) -> Result<Option<PendingDeployment>> {
        let path = self.pending_path(network, name);
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    pub fn clear_pending(&self, network: &NetworkName, name: &str) -> Result<()> {
        self.ensure_writable()?;
        let _guard = self.records();
        let path = self.pending_path(network, name);
        match fs::remove_file(&path) {
            Ok(()) => {
                if let Some(parent) = path.parent() {
                    sync_dir(parent).map_err(|e| Error::persistence(parent, e))?;
                }
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::persistence(&path, e)),
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(Error::persistence(
                &self.root,
                io::Error::new(io::ErrorKind::PermissionDenied, "ledger is opened read-only"),
            ))
        }
    }

    fn records(&self) -> MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_path(&self, network: &NetworkName, name: &str) -> PathBuf {
        self.root.join(network.as_str()).join(format!("{name}.json"))
    }

    fn pending_path(&self, network: &NetworkName, name: &str) -> PathBuf {
        self.root
            .join(network.as_str())
            .join(PENDING_DIR)
            .join(format!("{name}.json"))
    }
}

fn load_all(root: &Path) -> Result<Records> {
    let mut records = Records::new();

    for entry in fs::read_dir(root).map_err(|e| Error::persistence(root, e))? {
        let entry = entry.map_err(|e| Error::persistence(root, e))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(network) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| NetworkName::new(n).ok())
        else {
            tracing::warn!(path = %path.display(), "Ignoring directory that is not a network name");
            continue;
        };

        let entries = records.entry(network).or_default();
        for file in fs::read_dir(&path).map_err(|e| Error::persistence(&path, e))? {
            let file = file.map_err(|e| Error::persistence(&path, e))?.path();
            if file.extension().and_then(|e| e.to_str()) != Some("json") || !file.is_file() {
                continue;
            }
            let record: DeploymentRecord = read_json(&file)?;
            entries.insert(record.name.clone(), record);
        }
    }

    Ok(records)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path).map_err(|e| Error::persistence(path, e))?;
    serde_json::from_str(&content).map_err(|source| Error::CorruptedRecord {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| Error::persistence(path, e.into()))?;
    write_durably(path, &json).map_err(|e| Error::persistence(path, e))
}

fn write_durably(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(parent)?;

    let tmp = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    sync_dir(parent)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_core::primitives::U256;
    use tempdir::TempDir;

    fn net(name: &str) -> NetworkName {
        NetworkName::new(name).unwrap()
    }

    fn record(name: &str, byte: u8) -> DeploymentRecord {
        DeploymentRecord {
            name: name.to_string(),
            contract: name.to_string(),
            address: Address::repeat_byte(byte),
            receipt: ReceiptSummary {
                tx_hash: B256::repeat_byte(byte),
                block_number: byte as u64,
                gas_used: 21_000,
            },
            args: vec![ResolvedValue::Uint(U256::from(byte))],
            fingerprint: "f".repeat(64),
            deployed_at: "2026-01-01T00:00:00+00:00".to_string(),
        }
    }

    #[test]
    fn test_put_get_all() {
        let dir = TempDir::new("shipyard-ledger").unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();
        let x = net("x");

        assert!(ledger.get(&x, "A").is_none());
        ledger.put(&x, record("B", 2), false).unwrap();
        ledger.put(&x, record("A", 1), false).unwrap();

        assert_eq!(ledger.get(&x, "A"), Some(record("A", 1)));
        let names: Vec<_> = ledger.all(&x).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert!(ledger.all(&net("y")).is_empty());
        assert!(ledger.get(&net("y"), "A").is_none());
    }

    #[test]
    fn test_duplicate_key_without_overwrite() {
        let dir = TempDir::new("shipyard-ledger").unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();
        let x = net("x");

        ledger.put(&x, record("A", 1), false).unwrap();
        let err = ledger.put(&x, record("A", 9), false).unwrap_err();
        assert!(matches!(err, Error::DuplicateKey { ref name, .. } if name == "A"));
        assert_eq!(ledger.get(&x, "A"), Some(record("A", 1)));

        ledger.put(&x, record("A", 9), true).unwrap();
        assert_eq!(ledger.get(&x, "A"), Some(record("A", 9)));
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = TempDir::new("shipyard-ledger").unwrap();
        let x = net("x");
        {
            let ledger = Ledger::open(dir.path()).unwrap();
            ledger.put(&x, record("A", 1), false).unwrap();
        }

        let ledger = Ledger::open(dir.path()).unwrap();
        assert_eq!(ledger.get(&x, "A"), Some(record("A", 1)));
        assert!(dir.path().join("x/A.json").is_file());
        assert!(!dir.path().join("x/A.json.tmp").exists());
    }

    #[test]
    fn test_second_open_is_rejected_while_locked() {
        let dir = TempDir::new("shipyard-ledger").unwrap();
        let _ledger = Ledger::open(dir.path()).unwrap();
        let err = Ledger::open(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Persistence { .. }));
    }

    #[test]
    fn test_pending_journal() {
        let dir = TempDir::new("shipyard-ledger").unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();
        let x = net("x");
        let pending = PendingDeployment {
            tx_hash: B256::repeat_byte(7),
            contract: "Controller".to_string(),
            args: vec![],
            fingerprint: "00".repeat(32),
            submitted_at: "2026-01-01T00:00:00+00:00".to_string(),
        };

        assert_eq!(ledger.pending(&x, "Controller").unwrap(), None);
        ledger.mark_pending(&x, "Controller", &pending).unwrap();
        assert_eq!(ledger.pending(&x, "Controller").unwrap(), Some(pending));

        // Journal entries are not deployment records.
        drop(ledger);
        let ledger = Ledger::open(dir.path()).unwrap();
        assert!(ledger.get(&x, "Controller").is_none());

        ledger.clear_pending(&x, "Controller").unwrap();
        assert_eq!(ledger.pending(&x, "Controller").unwrap(), None);
        ledger.clear_pending(&x, "Controller").unwrap();
    }

    #[test]
    fn test_corrupted_record_is_reported() {
        let dir = TempDir::new("shipyard-ledger").unwrap();
        fs::create_dir_all(dir.path().join("x")).unwrap();
        fs::write(dir.path().join("x/A.json"), "{ invalid json }").unwrap();

        let err = Ledger::open(dir.path()).unwrap_err();
        assert!(matches!(err, Error::CorruptedRecord { .. }));
    }

    #[test]
    fn test_read_only_open_does_not_create_the_root() {
        let dir = TempDir::new("shipyard-ledger").unwrap();
        let root = dir.path().join("deployments");

        let ledger = Ledger::open_read_only(&root).unwrap();

        assert_eq!(ledger.root(), root);
        assert!(ledger.all(&net("x")).is_empty());
        assert!(!root.exists());
    }

    #[test]
    fn test_read_only_open_reads_alongside_a_writer() {
        let dir = TempDir::new("shipyard-ledger").unwrap();
        let x = net("x");
        let writer = Ledger::open(dir.path()).unwrap();
        writer.put(&x, record("A", 1), false).unwrap();

        let reader = Ledger::open_read_only(dir.path()).unwrap();

        assert_eq!(reader.get(&x, "A"), Some(record("A", 1)));
        let err = reader.put(&x, record("B", 2), false).unwrap_err();
        assert!(matches!(err, Error::Persistence { .. }));
        assert!(reader.clear_pending(&x, "A").is_err());
        assert!(writer.get(&x, "B").is_none());
    }

    #[test]
    fn test_readers_share_the_lock() {
        let dir = TempDir::new("shipyard-ledger").unwrap();
        drop(Ledger::open(dir.path()).unwrap());

        let first = Ledger::open_read_only(dir.path()).unwrap();
        let second = Ledger::open_read_only(dir.path()).unwrap();
        assert!(first._lock.is_some());
        assert!(second._lock.is_some());
        assert!(Ledger::open(dir.path()).is_err(), "a writer waits for readers");
    }
}
