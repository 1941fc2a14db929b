//! Settings file management

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub log_json: bool,

    /// Tenant the deployment store serves
    #[serde(default = "default_tenant_id")]
    pub tenant_id: String,

    /// Storage adapter configuration, local in-memory storage when unset
    #[serde(default)]
    pub storage_adapter: StorageAdapterSettings,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Enable the HTTP server
    #[serde(default = "default_true")]
    pub enable_server: bool,

    /// Enable the tenant operation reconciler
    #[serde(default = "default_true")]
    pub enable_reconciler: bool,

    /// Enable the hub provisioning monitor
    #[serde(default = "default_true")]
    pub enable_hub_monitor: bool,

    #[serde(default)]
    pub reconciler: WorkerSettings,

    #[serde(default)]
    pub hub_monitor: WorkerSettings,

    #[serde(default)]
    pub lifecycle: LifecycleSettings,
}

fn default_true() -> bool {
    true
}

fn default_tenant_id() -> String {
    "default".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            tenant_id: default_tenant_id(),
            storage_adapter: StorageAdapterSettings::default(),
            server: ServerSettings::default(),
            enable_server: true,
            enable_reconciler: true,
            enable_hub_monitor: true,
            reconciler: WorkerSettings::default(),
            hub_monitor: WorkerSettings::default(),
            lifecycle: LifecycleSettings::default(),
        }
    }
}

/// Storage adapter settings
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct StorageAdapterSettings {
    /// Base URL of the storage adapter service
    #[serde(default)]
    pub base_url: Option<String>,

    /// Bearer token for the storage adapter
    #[serde(default)]
    pub api_key: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    30
}

impl std::fmt::Debug for StorageAdapterSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageAdapterSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9002
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Background worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Delay between two cycles in seconds
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
}

fn default_interval() -> u64 {
    15
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
        }
    }
}

/// Process lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleSettings {
    /// Grace period for a graceful shutdown in seconds
    #[serde(default = "default_max_shutdown_delay")]
    pub max_shutdown_delay_secs: u64,
}

fn default_max_shutdown_delay() -> u64 {
    5
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            max_shutdown_delay_secs: default_max_shutdown_delay(),
        }
    }
}
