//! Configuration loading and management
//!
//! # Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Config file passed with `--config`
//! 3. Environment variables: `KO_OPERATOR_*`
//! 4. CLI flags (command-specific)
//!
//! # Example Config
//!
//! ```toml
//! namespace = "builds"
//! log_filter = "info,kube=warn"
//!
//! [job]
//! image = "feloy/ko-builder:release-1.4.0"
//!
//! [controller]
//! error_requeue_secs = 5
//! active_requeue_secs = 30
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ═══════════════════════════════════════════════════════════════════════════
// CONFIGURATION STRUCTURES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OperatorConfig {
    /// Namespace to watch; all namespaces when `None`.
    pub namespace: Option<String>,
    /// Fallback tracing filter when `RUST_LOG` is unset.
    pub log_filter: String,
    pub job: JobConfig,
    pub controller: ControllerConfig,
}

/// Fixed parts of the Job pod template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JobConfig {
    pub image: String,
    pub service_account: String,
    pub credentials_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ControllerConfig {
    /// Delay before a failed reconcile pass is retried.
    pub error_requeue_secs: u64,
    /// Requeue interval while a job is still running, if any.
    pub active_requeue_secs: Option<u64>,
}

// ═══════════════════════════════════════════════════════════════════════════
// DEFAULT IMPLEMENTATIONS
// ═══════════════════════════════════════════════════════════════════════════

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            log_filter: "info".to_string(),
            job: JobConfig::default(),
            controller: ControllerConfig::default(),
        }
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            image: "feloy/ko-builder:release-1.4.0".to_string(),
            service_account: "ko-builder".to_string(),
            credentials_secret: "gcloud".to_string(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            error_requeue_secs: 5,
            active_requeue_secs: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// LOADING
// ═══════════════════════════════════════════════════════════════════════════

impl OperatorConfig {
    /// Load configuration: defaults, then `path` if given, then the
    /// process environment.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The config file cannot be read
    /// - TOML is malformed
    /// - An environment override or the merged result is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => load_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `KO_OPERATOR_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if a numeric override does not parse.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("KO_OPERATOR_NAMESPACE") {
            self.namespace = Some(value).filter(|ns| !ns.is_empty());
        }

        if let Some(value) = lookup("KO_OPERATOR_LOG_FILTER") {
            self.log_filter = value;
        }

        if let Some(value) = lookup("KO_OPERATOR_JOB_IMAGE") {
            self.job.image = value;
        }

        if let Some(value) = lookup("KO_OPERATOR_JOB_SERVICE_ACCOUNT") {
            self.job.service_account = value;
        }

        if let Some(value) = lookup("KO_OPERATOR_CREDENTIALS_SECRET") {
            self.job.credentials_secret = value;
        }

        if let Some(value) = lookup("KO_OPERATOR_ERROR_REQUEUE_SECS") {
            self.controller.error_requeue_secs = value.parse().map_err(|e| {
                Error::invalid_config(format!("Invalid KO_OPERATOR_ERROR_REQUEUE_SECS value: {e}"))
            })?;
        }

        if let Some(value) = lookup("KO_OPERATOR_ACTIVE_REQUEUE_SECS") {
            self.controller.active_requeue_secs = Some(value.parse().map_err(|e| {
                Error::invalid_config(format!("Invalid KO_OPERATOR_ACTIVE_REQUEUE_SECS value: {e}"))
            })?);
        }

        Ok(())
    }

    /// Check invariants that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.controller.error_requeue_secs == 0 {
            return Err(Error::invalid_config(
                "controller.error_requeue_secs must be greater than zero",
            ));
        }
        if self.controller.active_requeue_secs == Some(0) {
            return Err(Error::invalid_config(
                "controller.active_requeue_secs must be greater than zero when set",
            ));
        }
        if self.job.image.trim().is_empty() {
            return Err(Error::invalid_config("job.image must not be empty"));
        }
        if self.job.service_account.trim().is_empty() {
            return Err(Error::invalid_config("job.service_account must not be empty"));
        }
        if self.job.credentials_secret.trim().is_empty() {
            return Err(Error::invalid_config("job.credentials_secret must not be empty"));
        }
        Ok(())
    }
}

impl ControllerConfig {
    pub const fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_secs)
    }

    pub fn active_requeue(&self) -> Option<Duration> {
        self.active_requeue_secs.map(Duration::from_secs)
    }
}

/// Load a TOML file into a Config
///
/// # Errors
///
/// Returns error if:
/// - File cannot be read
/// - TOML is malformed
fn load_toml_file(path: &Path) -> Result<OperatorConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::file_read_failed(path, e.to_string()))?;

    toml::from_str(&content).map_err(|e| Error::toml_parse_failed(path, e.to_string()))
}
