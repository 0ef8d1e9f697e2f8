//! Configuration for the hookpool dispatcher binary.

use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use hookpool_core::{EventType, HookDescriptor, HookRegistry, TenantId};
use hookpool_delivery::{
    client::default_user_agent, ClientConfig, DispatcherConfig, DEFAULT_BUFFER_SIZE,
    DEFAULT_TIMEOUT_SECONDS, DEFAULT_WORKER_COUNT,
};
use reqwest::Url;
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "hookpool.toml";

/// Dispatcher configuration with defaults, file, and environment overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables (highest priority)
/// 2. Configuration file (`hookpool.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// Hooks can only be declared in the configuration file:
///
/// ```toml
/// [[hooks]]
/// tenant = "game1"
/// event_type = 1
/// url = "https://example.com/hooks/player-joined"
/// name = "player-joined"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Number of delivery workers.
    ///
    /// Environment variable: `WORKER_POOL_SIZE`
    #[serde(default = "default_worker_pool_size", alias = "WORKER_POOL_SIZE")]
    pub worker_pool_size: usize,
    /// Capacity of the job queue.
    ///
    /// Environment variable: `WORKER_QUEUE_SIZE`
    #[serde(default = "default_worker_queue_size", alias = "WORKER_QUEUE_SIZE")]
    pub worker_queue_size: usize,
    /// Timeout for each hook POST in seconds.
    ///
    /// Environment variable: `WEBHOOKS_TIMEOUT_SECONDS`
    #[serde(default = "default_webhooks_timeout", alias = "WEBHOOKS_TIMEOUT_SECONDS")]
    pub webhooks_timeout_seconds: u64,
    /// Time allowed for workers to finish their current job at shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECONDS`
    #[serde(default = "default_shutdown_timeout", alias = "SHUTDOWN_TIMEOUT_SECONDS")]
    pub shutdown_timeout_seconds: u64,
    /// User agent sent with every hook POST.
    ///
    /// Environment variable: `USER_AGENT`
    #[serde(default = "default_user_agent", alias = "USER_AGENT")]
    pub user_agent: String,
    /// Log filter used when `RUST_LOG` is not set.
    ///
    /// Environment variable: `RUST_LOG`
    #[serde(default = "default_log_level", alias = "RUST_LOG")]
    pub rust_log: String,
    /// Registered hooks, in delivery order per tenant and event type.
    #[serde(default)]
    pub hooks: Vec<HookConfig>,
}

/// One hook subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookConfig {
    /// Tenant whose events are delivered.
    pub tenant: String,
    /// Event type the hook subscribes to.
    pub event_type: i32,
    /// Endpoint receiving the POST.
    pub url: String,
    /// Optional label used in logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Config {
    /// Load configuration from defaults, `hookpool.toml`, and environment
    /// variable overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(CONFIG_FILE)
    }

    /// Same as [`Config::load`] with an explicit configuration file. A
    /// missing file is treated as empty.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(""));

        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Convert to the dispatcher's configuration.
    pub fn to_dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            worker_count: self.worker_pool_size,
            buffer_size: self.worker_queue_size,
            client_config: self.to_client_config(),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_seconds),
        }
    }

    /// Convert to client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_secs(self.webhooks_timeout_seconds),
            user_agent: self.user_agent.clone(),
            ..ClientConfig::default()
        }
    }

    /// Builds the hook registry from the configured hooks.
    pub fn to_hook_registry(&self) -> HookRegistry {
        HookRegistry::from_hooks(self.hooks.iter().map(|hook| {
            let descriptor = HookDescriptor::new(hook.url.clone());
            let descriptor = match &hook.name {
                Some(name) => descriptor.with_name(name.clone()),
                None => descriptor,
            };
            (TenantId::new(hook.tenant.clone()), EventType(hook.event_type), descriptor)
        }))
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<()> {
        if self.worker_pool_size == 0 {
            anyhow::bail!("worker_pool_size must be greater than 0");
        }

        if self.worker_queue_size == 0 {
            anyhow::bail!("worker_queue_size must be greater than 0");
        }

        if self.webhooks_timeout_seconds == 0 {
            anyhow::bail!("webhooks_timeout_seconds must be greater than 0");
        }

        if self.shutdown_timeout_seconds == 0 {
            anyhow::bail!("shutdown_timeout_seconds must be greater than 0");
        }

        for hook in &self.hooks {
            let url = Url::parse(&hook.url)
                .with_context(|| format!("hook for tenant {} has an invalid url", hook.tenant))?;
            if !matches!(url.scheme(), "http" | "https") {
                anyhow::bail!("hook url {} must use http or https", hook.url);
            }
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            worker_queue_size: default_worker_queue_size(),
            webhooks_timeout_seconds: default_webhooks_timeout(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
            user_agent: default_user_agent(),
            rust_log: default_log_level(),
            hooks: Vec::new(),
        }
    }
}

fn default_worker_pool_size() -> usize {
    DEFAULT_WORKER_COUNT
}

fn default_worker_queue_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_webhooks_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info,hookpool=debug".to_string()
}
