//! # Controller Configuration
//!
//! Operator settings loaded from environment variables.

use crate::constants::{
    DEFAULT_ARM_ENDPOINT, DEFAULT_BACKOFF_MAX_SECS, DEFAULT_BACKOFF_MIN_SECS,
    DEFAULT_DRAIN_TIMEOUT_SECS, DEFAULT_METRICS_PORT, DEFAULT_STEADY_REQUEUE_SECS,
    DEFAULT_TEMPLATE_DIR, DEFAULT_TRANSITION_REQUEUE_SECS, DEFAULT_WATCHDOG_COOLDOWN_SECS,
    DEFAULT_WATCHDOG_WORKERS,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Output format of the tracing subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" | "plain" => Ok(Self::Text),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Operator configuration
///
/// All settings have defaults and can be overridden via environment variables.
#[derive(Clone)]
pub struct ControllerConfig {
    /// HTTP port for `/metrics`, `/healthz` and `/readyz`
    pub metrics_port: u16,
    /// Requeue interval when the state machine stayed where it was (seconds)
    pub steady_requeue_secs: u64,
    /// Requeue interval after the state machine advanced (seconds)
    pub transition_requeue_secs: u64,
    /// Fibonacci backoff floor for failing passes (seconds)
    pub backoff_min_secs: u64,
    /// Fibonacci backoff ceiling for failing passes (seconds)
    pub backoff_max_secs: u64,
    /// Number of watchdog worker tasks
    pub watchdog_workers: usize,
    /// Cooldown between two runs of the same watchdog job (seconds)
    pub watchdog_cooldown_secs: u64,
    /// Per-node drain timeout written into drain requests (seconds)
    pub drain_timeout_secs: u64,
    /// Azure subscription holding every resource group this operator manages
    pub subscription_id: String,
    /// Azure Resource Manager endpoint (overridable for sovereign clouds and tests)
    pub arm_endpoint: String,
    /// Static bearer token for local runs; Azure identity is used when unset
    pub static_access_token: Option<String>,
    /// Client ID for Azure Workload Identity; Managed Identity is used when unset
    pub azure_client_id: Option<String>,
    /// Directory holding `master.json` and `worker.json`
    pub template_dir: PathBuf,
    /// Log output format
    pub log_format: LogFormat,
}

impl std::fmt::Debug for ControllerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerConfig")
            .field("metrics_port", &self.metrics_port)
            .field("steady_requeue_secs", &self.steady_requeue_secs)
            .field("transition_requeue_secs", &self.transition_requeue_secs)
            .field("watchdog_workers", &self.watchdog_workers)
            .field("subscription_id", &self.subscription_id)
            .field("arm_endpoint", &self.arm_endpoint)
            .field(
                "static_access_token",
                &self.static_access_token.as_ref().map(|_| "***"),
            )
            .field("template_dir", &self.template_dir)
            .finish_non_exhaustive()
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            metrics_port: DEFAULT_METRICS_PORT,
            steady_requeue_secs: DEFAULT_STEADY_REQUEUE_SECS,
            transition_requeue_secs: DEFAULT_TRANSITION_REQUEUE_SECS,
            backoff_min_secs: DEFAULT_BACKOFF_MIN_SECS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            watchdog_workers: DEFAULT_WATCHDOG_WORKERS,
            watchdog_cooldown_secs: DEFAULT_WATCHDOG_COOLDOWN_SECS,
            drain_timeout_secs: DEFAULT_DRAIN_TIMEOUT_SECS,
            subscription_id: String::new(),
            arm_endpoint: DEFAULT_ARM_ENDPOINT.to_string(),
            static_access_token: None,
            azure_client_id: None,
            template_dir: PathBuf::from(DEFAULT_TEMPLATE_DIR),
            log_format: LogFormat::Json,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let config = Self {
            metrics_port: env_var_or_default("METRICS_PORT", defaults.metrics_port),
            steady_requeue_secs: env_var_or_default(
                "STEADY_REQUEUE_SECS",
                defaults.steady_requeue_secs,
            ),
            transition_requeue_secs: env_var_or_default(
                "TRANSITION_REQUEUE_SECS",
                defaults.transition_requeue_secs,
            ),
            backoff_min_secs: env_var_or_default("BACKOFF_MIN_SECS", defaults.backoff_min_secs),
            backoff_max_secs: env_var_or_default("BACKOFF_MAX_SECS", defaults.backoff_max_secs),
            watchdog_workers: env_var_or_default("WATCHDOG_WORKERS", defaults.watchdog_workers),
            watchdog_cooldown_secs: env_var_or_default(
                "WATCHDOG_COOLDOWN_SECS",
                defaults.watchdog_cooldown_secs,
            ),
            drain_timeout_secs: env_var_or_default(
                "DRAIN_TIMEOUT_SECS",
                defaults.drain_timeout_secs,
            ),
            subscription_id: env_var_or_default_str("AZURE_SUBSCRIPTION_ID", ""),
            arm_endpoint: env_var_or_default_str("AZURE_ARM_ENDPOINT", DEFAULT_ARM_ENDPOINT),
            static_access_token: std::env::var("AZURE_ACCESS_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
            azure_client_id: std::env::var("AZURE_CLIENT_ID")
                .ok()
                .filter(|id| !id.is_empty()),
            template_dir: std::env::var("TEMPLATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.template_dir),
            log_format: env_var_or_default("LOG_FORMAT", defaults.log_format),
        };
        config.sanitized()
    }

    /// Replace values that would stall the operator with their defaults
    fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if self.watchdog_workers == 0 {
            warn!("WATCHDOG_WORKERS must be at least 1, using default");
            self.watchdog_workers = defaults.watchdog_workers;
        }
        if self.backoff_min_secs == 0 || self.backoff_min_secs > self.backoff_max_secs {
            warn!(
                min = self.backoff_min_secs,
                max = self.backoff_max_secs,
                "invalid backoff bounds, using defaults"
            );
            self.backoff_min_secs = defaults.backoff_min_secs;
            self.backoff_max_secs = defaults.backoff_max_secs;
        }
        self
    }

    /// Requeue delay for a pass that left the state unchanged
    pub fn steady_requeue(&self) -> Duration {
        Duration::from_secs(self.steady_requeue_secs)
    }

    /// Requeue delay for a pass that advanced the state machine
    pub fn transition_requeue(&self) -> Duration {
        Duration::from_secs(self.transition_requeue_secs)
    }

    /// Cooldown between two runs of one watchdog job
    pub fn watchdog_cooldown(&self) -> Duration {
        Duration::from_secs(self.watchdog_cooldown_secs)
    }

    /// Timeout handed to the drain controller for each node
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "invalid value in environment, using default");
            default
        }),
        Err(_) => default,
    }
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
