use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8787;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_BATCH_SIZE: usize = 200;
pub const MAX_BATCH_SIZE: usize = 1000;
pub const DEFAULT_DETAIL_LIMIT: usize = 50;
pub const DEFAULT_SECRET_HEADER: &str = "x-scheduler-secret";

/// Top-level config (upkeep.toml + UPKEEP_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpkeepConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            auth: AuthConfig::default(),
        }
    }
}

/// Scheduler-only authentication for the trigger and status endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_auth_mode")]
    pub mode: AuthMode,
    /// Expected value of `Authorization: Bearer <token>` in `token` mode.
    pub token: Option<String>,
    /// Expected value of the shared-secret header in `shared-secret` mode.
    pub shared_secret: Option<String>,
    /// Header carrying the shared secret.
    #[serde(default = "default_secret_header")]
    pub header: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Token,
            token: None,
            shared_secret: None,
            header: DEFAULT_SECRET_HEADER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    /// Static bearer token, typically injected by the cron collaborator.
    Token,
    /// Shared secret in a custom header (see `AuthConfig::header`).
    SharedSecret,
    /// No authentication. Only for loopback binds and local testing.
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Tuning knobs for a scheduler pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Batch size used when the trigger does not pass one.
    #[serde(default = "default_batch_size")]
    pub default_batch_size: usize,
    /// Upper clamp for caller-supplied batch sizes.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Number of rules processed concurrently within one pass (1 = sequential).
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Per-rule details kept in a run summary.
    #[serde(default = "default_detail_limit")]
    pub detail_limit: usize,
    /// Due query selects rules with `next_due <= now + lookahead_days`.
    #[serde(default)]
    pub lookahead_days: i64,
    /// Skip demo organizations in fleet-wide passes.
    #[serde(default = "bool_true")]
    pub exclude_demo_organizations: bool,
    /// Built-in periodic pass interval in seconds; 0 disables it.
    #[serde(default)]
    pub tick_interval_secs: u64,
    /// Window used by the status endpoint's `recent_evaluations` counter.
    #[serde(default = "default_recent_window_hours")]
    pub recent_window_hours: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_batch_size: DEFAULT_BATCH_SIZE,
            max_batch_size: MAX_BATCH_SIZE,
            concurrency: default_concurrency(),
            detail_limit: DEFAULT_DETAIL_LIMIT,
            lookahead_days: 0,
            exclude_demo_organizations: true,
            tick_interval_secs: 0,
            recent_window_hours: default_recent_window_hours(),
        }
    }
}

impl SchedulerConfig {
    /// Resolve a caller-supplied batch size against the configured bounds.
    ///
    /// `None` yields the default; anything above `max_batch_size` is clamped.
    /// Zero is rejected.
    pub fn resolve_batch_size(&self, requested: Option<usize>) -> Option<usize> {
        match requested {
            None => Some(self.default_batch_size.clamp(1, self.max_batch_size.max(1))),
            Some(0) => None,
            Some(n) => Some(n.min(self.max_batch_size.max(1))),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_auth_mode() -> AuthMode {
    AuthMode::Token
}
fn default_secret_header() -> String {
    DEFAULT_SECRET_HEADER.to_string()
}
fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_max_batch_size() -> usize {
    MAX_BATCH_SIZE
}
fn default_concurrency() -> usize {
    1
}
fn default_detail_limit() -> usize {
    DEFAULT_DETAIL_LIMIT
}
fn default_recent_window_hours() -> i64 {
    24
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.upkeep/upkeep.db", home)
}

impl UpkeepConfig {
    /// Load config from a TOML file with UPKEEP_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `UPKEEP_SCHEDULER__DEFAULT_BATCH_SIZE=100`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::from_figment(
            Figment::new()
                .merge(Toml::file(&path))
                .merge(Env::prefixed("UPKEEP_").split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> crate::error::Result<Self> {
        figment
            .extract()
            .map_err(|e| crate::error::UpkeepError::Config(e.to_string()))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.upkeep/upkeep.toml", home)
}
