use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    sync::Arc,
};

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize, de::IgnoredAny};

use crate::{
    accounts::{AccountSource, Accounts},
    artifacts::HardhatArtifacts,
    context::ExecutionContext,
    error::{ConfigurationError, Error, Result},
    ledger::Ledger,
    manifest::{Manifest, Scheduled, Step},
    network::{NetworkConfig, NetworkName},
    resolver::{self, ExecutionPlan, PlanFilter},
    rpc::JsonRpcClient,
    runner::{ForceRedeploy, RunReport, Runner},
    waiter::ConfirmationWaiter,
};

/// The default name for the shipyard configuration file.
pub const SHIPYARD_FILENAME: &str = "Shipyard.toml";

/// Prefix of environment variables overriding configuration keys.
/// Nested keys are separated by `__`, e.g. `SHIPYARD_NETWORKS__SEPOLIA__RPC_URL`.
/// Network and account names match the declared ones case-insensitively.
pub const ENV_PREFIX: &str = "SHIPYARD_";

/// Network and account names declared in the configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
struct DeclaredNames {
    #[serde(default)]
    networks: BTreeMap<String, IgnoredAny>,
    #[serde(default)]
    accounts: BTreeMap<String, IgnoredAny>,
}

impl DeclaredNames {
    /// Turns `NETWORKS__BASESEPOLIA__RPC_URL` into `networks.baseSepolia.rpc_url`.
    ///
    /// Keys are lowercased except for a network or account name, which takes
    /// the case it was declared with.
    fn canonical_key(&self, key: &str) -> String {
        let mut segments: Vec<String> = key.split("__").map(str::to_ascii_lowercase).collect();
        if let [section, name, ..] = segments.as_mut_slice() {
            let declared = match section.as_str() {
                "networks" => Some(&self.networks),
                "accounts" => Some(&self.accounts),
                _ => None,
            };
            if let Some(found) = declared.and_then(|names| names.keys().find(|n| n.eq_ignore_ascii_case(name))) {
                *name = found.clone();
            }
        }
        segments.join(".")
    }
}

fn default_ledger_dir() -> PathBuf {
    PathBuf::from("deployments")
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_account() -> String {
    "deployer".to_string()
}

/// Options of a single `deploy` run.
#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub network: NetworkName,
    /// Step names or tags; empty runs every step that applies to the network.
    pub selection: Vec<String>,
    pub force: ForceRedeploy,
}

/// Project configuration: networks, accounts and the declared steps.
///
/// Loaded from a TOML file with environment overrides and serializable back
/// to TOML (without secrets).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployer {
    /// Root of the deployment ledger.
    #[serde(default = "default_ledger_dir")]
    pub ledger_dir: PathBuf,
    /// Root of the compiled contract artifacts.
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,
    /// Sender of steps that do not name one.
    #[serde(default = "default_account")]
    pub default_account: String,
    /// Seed phrase for derived accounts. Never written back to disk.
    #[serde(default, skip_serializing)]
    pub mnemonic: Option<String>,

    #[serde(default)]
    pub networks: BTreeMap<NetworkName, NetworkConfig>,
    #[serde(default)]
    pub accounts: BTreeMap<String, AccountSource>,
    #[serde(default)]
    pub steps: Manifest,
}

impl Deployer {
    /// Load the configuration from a TOML file (or a directory holding
    /// [`SHIPYARD_FILENAME`]), then apply `SHIPYARD_*` environment overrides.
    ///
    /// Relative directories are resolved against the file's directory and
    /// the declared steps are validated.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        Self::load_with_env_prefix(path, ENV_PREFIX)
    }

    fn load_with_env_prefix(path: &Path, prefix: &str) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Settings {
                path: path.to_path_buf(),
                reason: "configuration file or directory not found".to_string(),
            });
        }

        let config_path = if path.is_dir() {
            path.join(SHIPYARD_FILENAME)
        } else {
            path.to_path_buf()
        };
        if !config_path.is_file() {
            return Err(Error::Settings {
                path: config_path,
                reason: format!("no {SHIPYARD_FILENAME} in this directory"),
            });
        }

        let settings_error = |e: figment::Error| Error::Settings {
            path: config_path.clone(),
            reason: e.to_string(),
        };
        let declared: DeclaredNames = Figment::from(Toml::file(&config_path))
            .extract()
            .map_err(settings_error)?;
        let env = Env::prefixed(prefix)
            .lowercase(false)
            .map(move |key| declared.canonical_key(key.as_str()).into());

        let figment = Figment::new().merge(Toml::file(&config_path)).merge(env);
        let mut deployer: Self = figment.extract().map_err(settings_error)?;

        let base = config_path.parent().unwrap_or(Path::new("."));
        deployer.ledger_dir = base.join(&deployer.ledger_dir);
        deployer.artifacts_dir = base.join(&deployer.artifacts_dir);

        deployer.validate()?;
        tracing::info!(
            path = %config_path.display(),
            networks = deployer.networks.len(),
            steps = deployer.steps.len(),
            "Configuration loaded"
        );
        Ok(deployer)
    }

    /// The configuration as TOML, without the mnemonic.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Settings {
            path: PathBuf::from(SHIPYARD_FILENAME),
            reason: e.to_string(),
        })
    }

    /// Checks the declared steps against the configured accounts.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let accounts: BTreeSet<String> = self.accounts.keys().cloned().collect();
        self.steps.validate(&accounts, &self.default_account)
    }

    pub fn network(&self, name: &NetworkName) -> Result<&NetworkConfig, ConfigurationError> {
        self.networks
            .get(name)
            .ok_or_else(|| ConfigurationError::UnknownNetwork(name.to_string()))
    }

    /// Orders the steps selected for `network`.
    pub fn plan(&self, network: &NetworkName, selection: &[String]) -> Result<ExecutionPlan, ConfigurationError> {
        self.network(network)?;
        self.steps.check_selection(selection.iter().map(String::as_str))?;
        resolver::order(&self.steps, &PlanFilter::network(network.clone()).select(selection.iter().cloned()))
    }

    pub fn open_ledger(&self) -> Result<Ledger> {
        Ledger::open(&self.ledger_dir)
    }

    /// Opens the ledger for inspection without creating or locking it for writes.
    pub fn open_ledger_read_only(&self) -> Result<Ledger> {
        Ledger::open_read_only(&self.ledger_dir)
    }

    fn check_force(&self, force: &ForceRedeploy) -> Result<(), ConfigurationError> {
        if let ForceRedeploy::Only(names) = force {
            for name in names {
                if !matches!(self.steps.get(name), Some(Step::Deploy(_))) {
                    return Err(ConfigurationError::UnknownSelection(name.clone()));
                }
            }
        }
        Ok(())
    }

    /// Runs the selected steps against the configured node of `options.network`.
    pub async fn deploy(&self, options: &DeployOptions) -> Result<RunReport> {
        let config = self.network(&options.network)?;
        self.check_force(&options.force)?;
        let plan = self.plan(&options.network, &options.selection)?;
        if plan.is_empty() {
            tracing::warn!(network = %options.network, "No step applies to this network");
        }

        let ledger = self.open_ledger()?;
        let accounts = Accounts::resolve(&self.accounts, self.mnemonic.as_deref())?;
        let artifacts = HardhatArtifacts::new(&self.artifacts_dir);
        let client = JsonRpcClient::connect(&options.network, config.rpc_url.clone(), config.chain_id)
            .await?
            .with_signers(accounts.signers());
        let waiter = ConfirmationWaiter::new(Arc::new(client), config.wait_policy());

        tracing::info!(
            network = %options.network,
            rpc_url = %config.rpc_url,
            ledger = %self.ledger_dir.display(),
            planned = plan.len(),
            "Starting deployment process..."
        );

        let runner = Runner::new(ExecutionContext {
            network: &options.network,
            ledger: &ledger,
            waiter: &waiter,
            artifacts: &artifacts,
            accounts: &accounts,
            default_account: &self.default_account,
        });
        runner.run(&plan, &options.force).await
    }
}
