//! Compiled contract artifacts.

use std::{
    collections::BTreeMap,
    fs,
    path::PathBuf,
};

use alloy_core::primitives::Bytes;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Directories produced by the compiler that never hold contract artifacts.
const SKIPPED_DIRS: &[&str] = &["build-info", "cache"];

/// Creation bytecode of one contract type.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub contract: String,
    pub bytecode: Bytes,
}

/// Resolves a contract type to its compiled artifact.
pub trait ArtifactSource: Send + Sync {
    fn resolve(&self, contract: &str) -> Result<Artifact>;
}

#[derive(Deserialize)]
struct RawArtifact {
    bytecode: RawBytecode,
}

/// Hardhat writes the bytecode as a string, Foundry as `{ "object": ... }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawBytecode {
    Hex(String),
    Object { object: String },
}

impl RawBytecode {
    fn as_str(&self) -> &str {
        match self {
            Self::Hex(s) | Self::Object { object: s } => s,
        }
    }
}

/// Artifacts laid out as `<root>/**/<Type>.json`, as Hardhat and Foundry emit them.
#[derive(Debug, Clone)]
pub struct HardhatArtifacts {
    root: PathBuf,
}

impl HardhatArtifacts {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn find(&self, contract: &str) -> Result<PathBuf> {
        let file_name = format!("{contract}.json");
        let mut found = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let entries = fs::read_dir(&dir).map_err(|e| artifact_error(contract, format!("cannot read {}: {e}", dir.display())))?;
            for entry in entries {
                let entry = entry.map_err(|e| artifact_error(contract, e.to_string()))?;
                let path = entry.path();
                let name = entry.file_name();
                if path.is_dir() {
                    if !SKIPPED_DIRS.iter().any(|skipped| name == *skipped) {
                        pending.push(path);
                    }
                } else if name == file_name.as_str() {
                    found.push(path);
                }
            }
        }

        match found.len() {
            0 => Err(artifact_error(
                contract,
                format!("no {file_name} under {}", self.root.display()),
            )),
            1 => Ok(found.remove(0)),
            _ => {
                found.sort();
                let paths: Vec<_> = found.iter().map(|p| p.display().to_string()).collect();
                Err(artifact_error(
                    contract,
                    format!("ambiguous, found {}", paths.join(", ")),
                ))
            }
        }
    }
}

impl ArtifactSource for HardhatArtifacts {
    fn resolve(&self, contract: &str) -> Result<Artifact> {
        let path = self.find(contract)?;
        let content = fs::read_to_string(&path).map_err(|e| Error::persistence(&path, e))?;
        let raw: RawArtifact = serde_json::from_str(&content)
            .map_err(|e| artifact_error(contract, format!("{} is not an artifact: {e}", path.display())))?;

        let hex_code = raw.bytecode.as_str().trim_start_matches("0x");
        if hex_code.is_empty() {
            return Err(artifact_error(
                contract,
                "empty bytecode (abstract contract or interface?)",
            ));
        }
        if hex_code.contains("__") {
            return Err(artifact_error(contract, "bytecode has unlinked library placeholders"));
        }
        let bytecode = hex::decode(hex_code)
            .map_err(|e| artifact_error(contract, format!("invalid bytecode hex: {e}")))?;

        tracing::debug!(contract, path = %path.display(), size = bytecode.len(), "Artifact resolved");

        Ok(Artifact {
            contract: contract.to_string(),
            bytecode: bytecode.into(),
        })
    }
}

/// Fixed in-memory artifacts.
#[derive(Debug, Clone, Default)]
pub struct StaticArtifacts {
    artifacts: BTreeMap<String, Artifact>,
}

impl StaticArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, contract: impl Into<String>, bytecode: impl Into<Bytes>) -> Self {
        let contract = contract.into();
        self.artifacts.insert(
            contract.clone(),
            Artifact {
                contract,
                bytecode: bytecode.into(),
            },
        );
        self
    }
}

impl ArtifactSource for StaticArtifacts {
    fn resolve(&self, contract: &str) -> Result<Artifact> {
        self.artifacts
            .get(contract)
            .cloned()
            .ok_or_else(|| artifact_error(contract, "unknown contract type"))
    }
}

fn artifact_error(contract: &str, reason: impl Into<String>) -> Error {
    Error::Artifact {
        contract: contract.to_string(),
        reason: reason.into(),
    }
}
