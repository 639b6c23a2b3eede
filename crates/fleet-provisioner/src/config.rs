//! Configuration file support for the provisioner
//!
//! Loads and validates provisioner configuration from TOML files.
//! Every section and field is optional.

use fleet_dashboard::{AuthStyle, ClientConfig, PollConfig, DEFAULT_BASE_URL, MAX_ACTIONS_PER_BATCH};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::{ProvisionError, ProvisionResult};

/// Dashboard connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    /// API base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Organization to provision into
    #[serde(default)]
    pub organization_id: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// How the API key is sent
    #[serde(default)]
    pub auth_style: AuthStyle,
}

/// Action batch sizing and polling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchingConfig {
    /// Per-batch action cap
    #[serde(default = "default_max_actions")]
    pub max_actions_per_batch: usize,

    /// Poll interval in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Poll attempt limit; unbounded when absent
    #[serde(default)]
    pub max_poll_attempts: Option<u32>,
}

/// Settings phase scheduling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsConfig {
    /// Minimum delay between per-site submissions in seconds
    #[serde(default = "default_inter_batch_delay")]
    pub inter_batch_delay_secs: u64,

    /// Concurrent site workers
    #[serde(default = "default_workers")]
    pub workers: usize,
}

/// Inventory, ledger and payload content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    /// Ledger file
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,

    /// Inventory file
    #[serde(default = "default_inventory_path")]
    pub inventory_path: PathBuf,

    /// Name of the network site networks are copied from
    #[serde(default = "default_template_network_name")]
    pub template_network_name: String,

    /// Product types of created networks
    #[serde(default = "default_network_type")]
    pub network_type: String,

    /// Time zone of created networks
    #[serde(default = "default_time_zone")]
    pub time_zone: String,

    /// Written into device notes
    #[serde(default = "default_operator_name")]
    pub operator_name: String,

    /// Extra tags sampled alongside the built-in ones
    #[serde(default)]
    pub custom_tags: Vec<String>,

    /// Seed for tag and VLAN sampling; random when absent
    #[serde(default)]
    pub tag_seed: Option<u64>,

    /// DNS servers for static management interfaces
    #[serde(default = "default_dns_servers")]
    pub dns_servers: Vec<Ipv4Addr>,

    /// Directory for submitted batch bodies
    #[serde(default)]
    pub payload_dump_dir: Option<PathBuf>,
}

/// Complete provisioner configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisionerConfig {
    /// Dashboard connection
    #[serde(default)]
    pub dashboard: DashboardConfig,

    /// Batch sizing and polling
    #[serde(default)]
    pub batching: BatchingConfig,

    /// Settings phase scheduling
    #[serde(default)]
    pub settings: SettingsConfig,

    /// Inventory, ledger and payload content
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_actions() -> usize {
    MAX_ACTIONS_PER_BATCH
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_inter_batch_delay() -> u64 {
    10
}

fn default_workers() -> usize {
    1
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("networks_data.json")
}

fn default_inventory_path() -> PathBuf {
    PathBuf::from("inventory.json")
}

fn default_template_network_name() -> String {
    "ISP".to_string()
}

fn default_network_type() -> String {
    "appliance switch wireless camera systemsManager".to_string()
}

fn default_time_zone() -> String {
    "America/Los_Angeles".to_string()
}

fn default_operator_name() -> String {
    "provisioner".to_string()
}

fn default_dns_servers() -> Vec<Ipv4Addr> {
    vec![Ipv4Addr::new(208, 67, 220, 220), Ipv4Addr::new(208, 67, 222, 222)]
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            organization_id: String::new(),
            request_timeout_secs: default_request_timeout(),
            auth_style: AuthStyle::default(),
        }
    }
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            max_actions_per_batch: default_max_actions(),
            poll_interval_ms: default_poll_interval(),
            max_poll_attempts: None,
        }
    }
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            inter_batch_delay_secs: default_inter_batch_delay(),
            workers: default_workers(),
        }
    }
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            ledger_path: default_ledger_path(),
            inventory_path: default_inventory_path(),
            template_network_name: default_template_network_name(),
            network_type: default_network_type(),
            time_zone: default_time_zone(),
            operator_name: default_operator_name(),
            custom_tags: Vec::new(),
            tag_seed: None,
            dns_servers: default_dns_servers(),
            payload_dump_dir: None,
        }
    }
}

impl ProvisionerConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> ProvisionResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content).map_err(|e| match e {
                ProvisionError::Config { message, .. } => {
                    ProvisionError::config(path.display().to_string(), message)
                }
                other => other,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(ProvisionError::config(
                path.display().to_string(),
                e.to_string(),
            )),
        }
    }

    /// Parses configuration from TOML text
    pub fn from_toml(content: &str) -> ProvisionResult<Self> {
        toml::from_str(content).map_err(|e| ProvisionError::config("config", e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> ProvisionResult<()> {
        if self.dashboard.organization_id.trim().is_empty() {
            return Err(ProvisionError::config(
                "dashboard.organization_id",
                "must be set in the config file or with --org",
            ));
        }

        if self.dashboard.base_url.trim().is_empty() {
            return Err(ProvisionError::config("dashboard.base_url", "must not be empty"));
        }

        if self.dashboard.request_timeout_secs == 0 {
            return Err(ProvisionError::config(
                "dashboard.request_timeout_secs",
                "must be > 0",
            ));
        }

        let cap = self.batching.max_actions_per_batch;
        if cap == 0 || cap > MAX_ACTIONS_PER_BATCH {
            return Err(ProvisionError::config(
                "batching.max_actions_per_batch",
                format!("must be 1-{}, got {}", MAX_ACTIONS_PER_BATCH, cap),
            ));
        }

        if self.batching.max_poll_attempts == Some(0) {
            return Err(ProvisionError::config(
                "batching.max_poll_attempts",
                "must be > 0 when set",
            ));
        }

        if self.settings.workers == 0 {
            return Err(ProvisionError::config("settings.workers", "must be >= 1"));
        }

        if self.provisioning.template_network_name.trim().is_empty() {
            return Err(ProvisionError::config(
                "provisioning.template_network_name",
                "must not be empty",
            ));
        }

        Ok(())
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.dashboard.request_timeout_secs)
    }

    /// Get inter-batch delay as Duration
    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_secs(self.settings.inter_batch_delay_secs)
    }

    /// Poller configuration
    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(self.batching.poll_interval_ms),
            max_attempts: self.batching.max_poll_attempts,
        }
    }

    /// HTTP client configuration for the given API key
    pub fn client_config(&self, api_key: impl Into<String>) -> ClientConfig {
        ClientConfig::new(api_key)
            .with_base_url(self.dashboard.base_url.clone())
            .with_auth_style(self.dashboard.auth_style)
            .with_request_timeout(self.request_timeout())
    }
}
