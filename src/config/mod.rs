//! Runtime configuration.
//!
//! A single [`RuntimeConfig`] is installed process-wide. Monitors read the
//! deadlock delay from it on every contended entry, branches read their thread
//! naming and child limits when they spawn, and the finalizer thread reads its
//! name when it is first started.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `deadlock_delay` | 1 s |
//! | `branch_thread_name_prefix` | `"threadtools-branch"` |
//! | `branch_stack_size` | `None` (OS default) |
//! | `max_branch_children` | 0 (unbounded) |
//! | `finalizer_thread_name` | `"threadtools-finalizer"` |
//! | `log_deadlocks` | true |
//!
//! See [`env_config`] for environment variable and TOML overrides. The
//! process-wide configuration starts out as [`RuntimeConfig::from_env`];
//! [`RuntimeConfig::load`] layers a TOML file underneath the environment.

pub mod env_config;

use crate::tracing_compat::warn;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

pub use env_config::apply_env_overrides;

/// Default time a contended monitor entrant waits before consulting the
/// deadlock detector.
pub const DEFAULT_DEADLOCK_DELAY: Duration = Duration::from_secs(1);

const DEFAULT_BRANCH_PREFIX: &str = "threadtools-branch";
const DEFAULT_FINALIZER_NAME: &str = "threadtools-finalizer";

/// Errors produced while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable held an unparseable value.
    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    InvalidEnv {
        /// Variable name.
        var: &'static str,
        /// Human description of the expected type.
        expected: &'static str,
        /// The raw value.
        value: String,
    },
    /// A configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A configuration file could not be parsed.
    #[error("failed to parse TOML config: {0}")]
    Parse(String),
    /// A configuration file was given but file support is not compiled in.
    #[error("cannot load {path}: built without the `config-file` feature")]
    FileUnsupported {
        /// Path that was requested.
        path: String,
    },
}

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// How long a contended monitor entrant blocks before the wait-for graph
    /// is walked.
    pub deadlock_delay: Duration,
    /// Name prefix for branch child threads (`{prefix}-{index}`).
    pub branch_thread_name_prefix: String,
    /// Stack size for branch child threads (`None` = OS default).
    pub branch_stack_size: Option<usize>,
    /// Maximum children per branch (0 = unbounded).
    pub max_branch_children: usize,
    /// Name of the process-wide finalizer thread.
    pub finalizer_thread_name: String,
    /// Emit a warning event for every detected deadlock.
    pub log_deadlocks: bool,
}

impl RuntimeConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.branch_thread_name_prefix.is_empty() {
            self.branch_thread_name_prefix = DEFAULT_BRANCH_PREFIX.to_string();
        }
        if self.finalizer_thread_name.is_empty() {
            self.finalizer_thread_name = DEFAULT_FINALIZER_NAME.to_string();
        }
        if self.branch_stack_size == Some(0) {
            self.branch_stack_size = None;
        }
    }

    /// Builds a configuration from defaults plus `THREADTOOLS_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        apply_env_overrides(&mut config)?;
        config.normalize();
        Ok(config)
    }

    /// Builds a configuration from defaults, then the TOML file at `path`
    /// (if any), then `THREADTOOLS_*` variables.
    ///
    /// Fails with [`ConfigError::FileUnsupported`] when a path is given but
    /// the crate was built without the `config-file` feature.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(path) = path {
            apply_file(&mut config, path)?;
        }
        apply_env_overrides(&mut config)?;
        config.normalize();
        Ok(config)
    }

    /// Sets the deadlock delay.
    #[must_use]
    pub fn deadlock_delay(mut self, delay: Duration) -> Self {
        self.deadlock_delay = delay;
        self
    }

    /// Sets the child limit per branch.
    #[must_use]
    pub fn max_branch_children(mut self, limit: usize) -> Self {
        self.max_branch_children = limit;
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            deadlock_delay: DEFAULT_DEADLOCK_DELAY,
            branch_thread_name_prefix: DEFAULT_BRANCH_PREFIX.to_string(),
            branch_stack_size: None,
            max_branch_children: 0,
            finalizer_thread_name: DEFAULT_FINALIZER_NAME.to_string(),
            log_deadlocks: true,
        }
    }
}

#[cfg(feature = "config-file")]
fn apply_file(config: &mut RuntimeConfig, path: &Path) -> Result<(), ConfigError> {
    let toml = env_config::parse_toml_file(path)?;
    env_config::apply_toml_config(config, &toml);
    Ok(())
}

#[cfg(not(feature = "config-file"))]
fn apply_file(_config: &mut RuntimeConfig, path: &Path) -> Result<(), ConfigError> {
    Err(ConfigError::FileUnsupported {
        path: path.display().to_string(),
    })
}

fn global() -> &'static RwLock<RuntimeConfig> {
    static GLOBAL: OnceLock<RwLock<RuntimeConfig>> = OnceLock::new();
    GLOBAL.get_or_init(|| {
        let config = RuntimeConfig::from_env().unwrap_or_else(|err| {
            warn!(error = %err, "ignoring THREADTOOLS_* environment, using defaults");
            RuntimeConfig::default()
        });
        RwLock::new(config)
    })
}

/// Installs `config` as the process-wide configuration.
///
/// Programmatic configuration replaces whatever the environment supplied.
pub fn configure(mut config: RuntimeConfig) {
    config.normalize();
    *global().write() = config;
}

/// Returns a snapshot of the process-wide configuration.
#[must_use]
pub fn current() -> RuntimeConfig {
    global().read().clone()
}

/// Changes only the deadlock delay of the process-wide configuration.
pub fn set_deadlock_delay(delay: Duration) {
    global().write().deadlock_delay = delay;
}

pub(crate) fn deadlock_delay() -> Duration {
    global().read().deadlock_delay
}

pub(crate) fn log_deadlocks() -> bool {
    global().read().log_deadlocks
}
