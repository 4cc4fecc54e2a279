//! Host-wide configuration (`hostkit.toml`), merged with CLI overrides.
//!
//! TOML file provides defaults, `Option` fields on [`CliOverrides`] mean
//! "flag not passed" and fall back to the file, `bool` flags are OR'd
//! together. Per-project
//! rate-limit/auto-pause settings (configurable later via `hostkit limits
//! set`) start from these defaults but are then owned by the metadata store,
//! not re-read from this file on every invocation.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use hostkit_retry::{PerErrorConfig, RetryPolicy, RetryStrategyConfig, RetryStrategyType};
use hostkit_types::{AutoPauseConfig, RateLimitConfig};
use hostkit_webhook::WebhookConfig;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE_NAME: &str = "hostkit.toml";

/// Nested rate-limit defaults, applied to newly-provisioned projects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    pub max_deploys: u32,
    pub window_minutes: u32,
    pub failure_cooldown_minutes: u32,
    pub consecutive_failure_limit: u32,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        let defaults = RateLimitConfig::default();
        Self {
            max_deploys: defaults.max_deploys,
            window_minutes: defaults.window_minutes,
            failure_cooldown_minutes: defaults.failure_cooldown_minutes,
            consecutive_failure_limit: defaults.consecutive_failure_limit,
        }
    }
}

impl RateLimitSection {
    pub fn to_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_deploys: self.max_deploys,
            window_minutes: self.window_minutes,
            failure_cooldown_minutes: self.failure_cooldown_minutes,
            consecutive_failure_limit: self.consecutive_failure_limit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoPauseSection {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub window_minutes: u32,
}

impl Default for AutoPauseSection {
    fn default() -> Self {
        let defaults = AutoPauseConfig::default();
        Self {
            enabled: defaults.enabled,
            failure_threshold: defaults.failure_threshold,
            window_minutes: defaults.window_minutes,
        }
    }
}

impl AutoPauseSection {
    pub fn to_config(&self) -> AutoPauseConfig {
        AutoPauseConfig {
            enabled: self.enabled,
            failure_threshold: self.failure_threshold,
            window_minutes: self.window_minutes,
        }
    }
}

/// Retry policy used by health-probe polling and provisioning steps
/// (DNS propagation, SSL issuance) — see `hostkit-retry`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub policy: RetryPolicy,
    #[serde(flatten)]
    pub custom: RetryStrategyConfig,
    pub per_error: PerErrorConfig,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::Default,
            custom: RetryStrategyConfig::default(),
            per_error: PerErrorConfig::default(),
        }
    }
}

impl RetrySection {
    /// Effective config: the named policy's numbers, unless `policy = "custom"`.
    pub fn effective(&self) -> RetryStrategyConfig {
        match self.policy {
            RetryPolicy::Custom => self.custom.clone(),
            other => other.to_config(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub deploy_root: PathBuf,
    pub db_path: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            deploy_root: PathBuf::from("/srv/hostkit"),
            db_path: PathBuf::from("/var/lib/hostkit/hostkit.db"),
        }
    }
}

/// The TCP range the Provisioning Orchestrator allocates project (and
/// sidecar) ports from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsSection {
    pub range_start: u16,
    pub range_end: u16,
}

impl Default for PortsSection {
    fn default() -> Self {
        Self {
            range_start: 4000,
            range_end: 4999,
        }
    }
}

impl PortsSection {
    pub fn range(&self) -> std::ops::RangeInclusive<u16> {
        self.range_start..=self.range_end
    }
}

/// Top-level `hostkit.toml` contents.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HostKitConfig {
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub ports: PortsSection,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
    #[serde(default)]
    pub auto_pause: AutoPauseSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub webhook: WebhookConfig,
}

/// CLI overrides for merging with config file values. `Option` means "flag
/// not passed"; `bool` flags mean "explicitly set" and are OR'd with the file.
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub deploy_root: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub max_deploys: Option<u32>,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub webhook_enabled: bool,
}

/// Effective, fully-merged settings used by `hostkit-core` and the CLI.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub deploy_root: PathBuf,
    pub db_path: PathBuf,
    pub port_range: std::ops::RangeInclusive<u16>,
    pub rate_limit: RateLimitConfig,
    pub auto_pause: AutoPauseConfig,
    pub retry: RetryStrategyConfig,
    pub retry_per_error: PerErrorConfig,
    pub webhook: WebhookConfig,
}

impl HostKitConfig {
    /// Searches, in order, `./hostkit.toml` then `/etc/hostkit/hostkit.toml`.
    /// Returns `Ok(None)` if neither exists — callers fall back to defaults.
    pub fn discover() -> Result<Option<Self>> {
        for candidate in [
            PathBuf::from(CONFIG_FILE_NAME),
            PathBuf::from("/etc/hostkit").join(CONFIG_FILE_NAME),
        ] {
            if candidate.exists() {
                return Self::load_from_file(&candidate).map(Some);
            }
        }
        Ok(None)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: HostKitConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.max_deploys == 0 {
            bail!("rate_limit.max_deploys must be greater than 0");
        }
        if self.rate_limit.window_minutes == 0 {
            bail!("rate_limit.window_minutes must be greater than 0");
        }
        if self.auto_pause.failure_threshold == 0 {
            bail!("auto_pause.failure_threshold must be greater than 0");
        }
        if self.ports.range_start > self.ports.range_end {
            bail!("ports.range_start must be less than or equal to ports.range_end");
        }
        let retry = self.retry.effective();
        if retry.max_attempts == 0 {
            bail!("retry.max_attempts must be greater than 0");
        }
        if retry.max_delay < retry.base_delay {
            bail!("retry.max_delay must be greater than or equal to retry.base_delay");
        }
        Ok(())
    }

    /// Merges this file (or defaults, if none was found) with CLI overrides.
    pub fn build_runtime_config(&self, cli: CliOverrides) -> RuntimeConfig {
        let mut webhook = self.webhook.clone();
        if let Some(url) = cli.webhook_url {
            webhook.url = Some(url);
            webhook.enabled = true;
        }
        if let Some(secret) = cli.webhook_secret {
            webhook.secret = Some(secret);
        }
        webhook.enabled = webhook.enabled || cli.webhook_enabled;

        let mut rate_limit = self.rate_limit.to_config();
        if let Some(max_deploys) = cli.max_deploys {
            rate_limit.max_deploys = max_deploys;
        }

        RuntimeConfig {
            deploy_root: cli.deploy_root.unwrap_or_else(|| self.paths.deploy_root.clone()),
            db_path: cli.db_path.unwrap_or_else(|| self.paths.db_path.clone()),
            port_range: self.ports.range(),
            rate_limit,
            auto_pause: self.auto_pause.to_config(),
            retry: self.retry.effective(),
            retry_per_error: self.retry.per_error.clone(),
            webhook,
        }
    }

    pub fn default_toml_template() -> String {
        r#"# HostKit host configuration.
# Place at ./hostkit.toml or /etc/hostkit/hostkit.toml.

[paths]
deploy_root = "/srv/hostkit"
db_path = "/var/lib/hostkit/hostkit.db"

[ports]
range_start = 4000
range_end = 4999

[rate_limit]
max_deploys = 10
window_minutes = 60
failure_cooldown_minutes = 5
consecutive_failure_limit = 3

[auto_pause]
enabled = true
failure_threshold = 5
window_minutes = 10

[retry]
policy = "default"

[webhook]
enabled = false
# url = "https://your-endpoint.example.com/hostkit"
# secret = "your-webhook-secret"
"#
        .to_string()
    }
}
