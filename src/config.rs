use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::reconciler::ContainerSettings;

pub const CONFIG_FILE: &str = "playground.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub records: RecordsConfig,
    #[serde(default)]
    pub container: ContainerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Where project host directories live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// One subdirectory per project is created under this root
    #[serde(default = "default_host_root")]
    pub root: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            root: default_host_root(),
        }
    }
}

impl HostConfig {
    pub fn root(&self) -> Result<PathBuf> {
        expand_path(&self.root)
    }
}

/// Durable object storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory backing the object namespace
    #[serde(default = "default_storage_root")]
    pub root: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

impl StorageConfig {
    pub fn root(&self) -> Result<PathBuf> {
        expand_path(&self.root)
    }
}

/// Project and template records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordsConfig {
    #[serde(default = "default_records_path")]
    pub path: String,
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            path: default_records_path(),
        }
    }
}

impl RecordsConfig {
    pub fn path(&self) -> Result<PathBuf> {
        expand_path(&self.path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Prepended to the short project id to name containers
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    /// Mount point of the project directory inside the container
    #[serde(default = "default_container_path")]
    pub path: String,

    /// Memory limit (e.g., "512m", "1g")
    #[serde(default = "default_memory")]
    pub memory: String,

    #[serde(default = "default_cpu_quota")]
    pub cpu_quota: i64,

    #[serde(default = "default_cpu_period")]
    pub cpu_period: i64,

    /// Keeps the container alive between commands
    #[serde(default = "default_command")]
    pub command: String,

    /// Seconds the engine waits before killing a stopping container
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,

    /// Hard bound on a whole stop call
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    /// User to run as: "uid:gid", "auto" for the owner of the host root,
    /// unset for the image default
    #[serde(default)]
    pub user: Option<String>,

    /// Docker socket, local defaults if unset
    #[serde(default)]
    pub docker_socket: Option<String>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            name_prefix: default_name_prefix(),
            path: default_container_path(),
            memory: default_memory(),
            cpu_quota: default_cpu_quota(),
            cpu_period: default_cpu_period(),
            command: default_command(),
            stop_grace_secs: default_stop_grace(),
            stop_timeout_secs: default_stop_timeout(),
            user: None,
            docker_socket: None,
        }
    }
}

impl ContainerConfig {
    /// Resolves the settings applied to every project container.
    pub(crate) fn settings(&self, host_root: &Path) -> Result<ContainerSettings> {
        let command = shell_words::split(&self.command)
            .with_context(|| format!("Invalid container command: {}", self.command))?;
        if command.is_empty() {
            bail!("Container command must not be empty");
        }
        if self.cpu_quota <= 0 || self.cpu_period <= 0 {
            bail!("CPU quota and period must be positive");
        }

        Ok(ContainerSettings {
            name_prefix: self.name_prefix.clone(),
            container_path: self.path.clone(),
            memory_bytes: parse_memory_limit(&self.memory)?,
            cpu_quota: self.cpu_quota,
            cpu_period: self.cpu_period,
            command,
            user: self.resolve_user(host_root)?,
        })
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    fn resolve_user(&self, host_root: &Path) -> Result<Option<String>> {
        match self.user.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some("auto") => owner_of(host_root).map(Some),
            Some(user) => Ok(Some(user.to_string())),
        }
    }
}

#[cfg(unix)]
fn owner_of(path: &Path) -> Result<String> {
    use std::os::unix::fs::MetadataExt;

    let meta = fs::metadata(path)
        .with_context(|| format!("Failed to read owner of {}", path.display()))?;
    Ok(format!("{}:{}", meta.uid(), meta.gid()))
}

#[cfg(not(unix))]
fn owner_of(path: &Path) -> Result<String> {
    bail!("user = \"auto\" is only supported on unix ({})", path.display())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Engine calls allowed in flight at once
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Time bound for ordinary engine calls, 0 = unbounded
    #[serde(default = "default_worker_timeout")]
    pub timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            timeout_secs: default_worker_timeout(),
        }
    }
}

impl WorkerConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

// Default value functions
fn default_host_root() -> String {
    "~/.playground/projects".to_string()
}

fn default_storage_root() -> String {
    "~/.playground/storage".to_string()
}

fn default_records_path() -> String {
    "~/.playground/records.toml".to_string()
}

fn default_name_prefix() -> String {
    "playground-".to_string()
}

fn default_container_path() -> String {
    "/app/project".to_string()
}

fn default_memory() -> String {
    "512m".to_string()
}

fn default_cpu_quota() -> i64 {
    25_000
}

fn default_cpu_period() -> i64 {
    100_000
}

fn default_command() -> String {
    "tail -f /dev/null".to_string()
}

fn default_stop_grace() -> u64 {
    5
}

fn default_stop_timeout() -> u64 {
    9
}

fn default_pool_size() -> usize {
    8
}

fn default_worker_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from `path`, or `playground.toml` in the current
    /// directory, using defaults if the file is not found
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map_or_else(|| PathBuf::from(CONFIG_FILE), Path::to_path_buf);

        if !config_path.exists() {
            if path.is_some() {
                warn!(path = %config_path.display(), "Config file not found, using defaults");
            }
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        Ok(config)
    }
}

/// Expand a leading `~` to the home directory
fn expand_path(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir().context("Could not determine home directory")?;
            Ok(home.join(rest))
        }
        None if path == "~" => dirs::home_dir().context("Could not determine home directory"),
        None => Ok(PathBuf::from(path)),
    }
}

/// Parse memory limit string (e.g., "8g", "512m") to bytes
fn parse_memory_limit(limit: &str) -> Result<i64> {
    let limit = limit.trim().to_lowercase();

    let (num, unit) = if let Some(num) = limit.strip_suffix('g') {
        (num, 1024 * 1024 * 1024)
    } else if let Some(num) = limit.strip_suffix('m') {
        (num, 1024 * 1024)
    } else if let Some(num) = limit.strip_suffix('k') {
        (num, 1024)
    } else {
        (limit.as_str(), 1)
    };

    let value: i64 = num
        .parse()
        .with_context(|| format!("Invalid memory limit: {limit}"))?;
    value
        .checked_mul(unit)
        .filter(|bytes| *bytes > 0)
        .with_context(|| format!("Memory limit out of range: {limit}"))
}
