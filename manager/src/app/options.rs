//! Application configuration options

use std::time::Duration;

use crate::http::client::HttpClientOptions;
use crate::storage::settings::Settings;
use crate::workers::{hub_monitor, reconciler};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Tenant the deployment store serves
    pub tenant_id: String,

    /// Remote storage adapter, in-memory storage when `None`
    pub storage_adapter: Option<HttpClientOptions>,

    /// Enable HTTP server
    pub enable_server: bool,

    /// Enable tenant operation reconciler
    pub enable_reconciler: bool,

    /// Enable hub provisioning monitor
    pub enable_hub_monitor: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// Reconciler worker options
    pub reconciler: reconciler::Options,

    /// Hub monitor worker options
    pub hub_monitor: hub_monitor::Options,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            tenant_id: "default".to_string(),
            storage_adapter: None,
            enable_server: true,
            enable_reconciler: true,
            enable_hub_monitor: true,
            server: ServerOptions::default(),
            reconciler: reconciler::Options::default(),
            hub_monitor: hub_monitor::Options::default(),
        }
    }
}

impl AppOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        let storage_adapter = settings
            .storage_adapter
            .base_url
            .as_ref()
            .filter(|url| !url.trim().is_empty())
            .map(|base_url| HttpClientOptions {
                base_url: base_url.clone(),
                api_key: settings.storage_adapter.api_key.clone(),
                tenant_id: settings.tenant_id.clone(),
                timeout: Duration::from_secs(settings.storage_adapter.timeout_secs),
            });

        Self {
            lifecycle: LifecycleOptions {
                max_shutdown_delay: Duration::from_secs(settings.lifecycle.max_shutdown_delay_secs),
            },
            tenant_id: settings.tenant_id.clone(),
            storage_adapter,
            enable_server: settings.enable_server,
            enable_reconciler: settings.enable_reconciler,
            enable_hub_monitor: settings.enable_hub_monitor,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            reconciler: reconciler::Options {
                interval: Duration::from_secs(settings.reconciler.interval_secs),
            },
            hub_monitor: hub_monitor::Options {
                interval: Duration::from_secs(settings.hub_monitor.interval_secs),
            },
        }
    }
}

/// Lifecycle options for the manager
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(5),
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9002,
        }
    }
}
