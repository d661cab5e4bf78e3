//! Environment variable and config file support for [`RuntimeConfig`].
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values passed to [`configure`](super::configure)
//! 2. **Environment variables**: values from `THREADTOOLS_*` env vars
//! 3. **Config file**: values loaded from a TOML file (requires `config-file` feature)
//! 4. **Defaults**: built-in defaults from [`RuntimeConfig::default()`]
//!
//! [`RuntimeConfig::load`] layers 4 through 2 in one call.
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `THREADTOOLS_DEADLOCK_DELAY_MS` | `u64` | `deadlock_delay` |
//! | `THREADTOOLS_BRANCH_THREAD_PREFIX` | `String` | `branch_thread_name_prefix` |
//! | `THREADTOOLS_BRANCH_STACK_SIZE` | `usize` | `branch_stack_size` |
//! | `THREADTOOLS_MAX_BRANCH_CHILDREN` | `usize` | `max_branch_children` |
//! | `THREADTOOLS_FINALIZER_THREAD_NAME` | `String` | `finalizer_thread_name` |
//! | `THREADTOOLS_LOG_DEADLOCKS` | `bool` | `log_deadlocks` |

use super::{ConfigError, RuntimeConfig};
use std::time::Duration;

/// Environment variable name for the deadlock detection delay in milliseconds.
pub const ENV_DEADLOCK_DELAY_MS: &str = "THREADTOOLS_DEADLOCK_DELAY_MS";
/// Environment variable name for the branch child thread name prefix.
pub const ENV_BRANCH_THREAD_PREFIX: &str = "THREADTOOLS_BRANCH_THREAD_PREFIX";
/// Environment variable name for the branch child stack size.
pub const ENV_BRANCH_STACK_SIZE: &str = "THREADTOOLS_BRANCH_STACK_SIZE";
/// Environment variable name for the per-branch child limit.
pub const ENV_MAX_BRANCH_CHILDREN: &str = "THREADTOOLS_MAX_BRANCH_CHILDREN";
/// Environment variable name for the finalizer thread name.
pub const ENV_FINALIZER_THREAD_NAME: &str = "THREADTOOLS_FINALIZER_THREAD_NAME";
/// Environment variable name for the deadlock warning toggle.
pub const ENV_LOG_DEADLOCKS: &str = "THREADTOOLS_LOG_DEADLOCKS";

/// Apply environment variable overrides to a [`RuntimeConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut RuntimeConfig) -> Result<(), ConfigError> {
    if let Some(val) = read_env(ENV_DEADLOCK_DELAY_MS) {
        config.deadlock_delay = Duration::from_millis(parse_u64(ENV_DEADLOCK_DELAY_MS, &val)?);
    }
    if let Some(val) = read_env(ENV_BRANCH_THREAD_PREFIX) {
        config.branch_thread_name_prefix = val;
    }
    if let Some(val) = read_env(ENV_BRANCH_STACK_SIZE) {
        let size = parse_usize(ENV_BRANCH_STACK_SIZE, &val)?;
        config.branch_stack_size = (size > 0).then_some(size);
    }
    if let Some(val) = read_env(ENV_MAX_BRANCH_CHILDREN) {
        config.max_branch_children = parse_usize(ENV_MAX_BRANCH_CHILDREN, &val)?;
    }
    if let Some(val) = read_env(ENV_FINALIZER_THREAD_NAME) {
        config.finalizer_thread_name = val;
    }
    if let Some(val) = read_env(ENV_LOG_DEADLOCKS) {
        config.log_deadlocks = parse_bool(ENV_LOG_DEADLOCKS, &val)?;
    }
    Ok(())
}

/// Read an environment variable, returning `None` if unset.
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var: &'static str, val: &str) -> Result<usize, ConfigError> {
    val.trim().parse::<usize>().map_err(|_| ConfigError::InvalidEnv {
        var,
        expected: "unsigned integer",
        value: val.to_string(),
    })
}

fn parse_u64(var: &'static str, val: &str) -> Result<u64, ConfigError> {
    val.trim().parse::<u64>().map_err(|_| ConfigError::InvalidEnv {
        var,
        expected: "milliseconds as u64",
        value: val.to_string(),
    })
}

fn parse_bool(var: &'static str, val: &str) -> Result<bool, ConfigError> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var,
            expected: "bool (true/false/1/0/yes/no)",
            value: val.to_string(),
        }),
    }
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable runtime configuration.
///
/// ```toml
/// [monitor]
/// deadlock_delay_ms = 250
/// log_deadlocks = true
///
/// [branch]
/// thread_name_prefix = "myapp-branch"
/// stack_size = 2097152
/// max_children = 64
///
/// [finalizer]
/// thread_name = "myapp-finalizer"
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct RuntimeTomlConfig {
    /// Monitor settings.
    #[serde(default)]
    pub monitor: MonitorToml,
    /// Branch settings.
    #[serde(default)]
    pub branch: BranchToml,
    /// Finalizer settings.
    #[serde(default)]
    pub finalizer: FinalizerToml,
}

/// Monitor section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct MonitorToml {
    /// Deadlock detection delay in milliseconds.
    pub deadlock_delay_ms: Option<u64>,
    /// Emit a warning for every detected deadlock.
    pub log_deadlocks: Option<bool>,
}

/// Branch section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct BranchToml {
    /// Name prefix for child threads.
    pub thread_name_prefix: Option<String>,
    /// Stack size per child thread in bytes (0 = OS default).
    pub stack_size: Option<usize>,
    /// Maximum children per branch (0 = unbounded).
    pub max_children: Option<usize>,
}

/// Finalizer section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct FinalizerToml {
    /// Name of the finalizer thread.
    pub thread_name: Option<String>,
}

/// Apply a parsed TOML config to a [`RuntimeConfig`].
///
/// Only fields that are `Some` in the TOML struct override the config.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut RuntimeConfig, toml: &RuntimeTomlConfig) {
    if let Some(ms) = toml.monitor.deadlock_delay_ms {
        config.deadlock_delay = Duration::from_millis(ms);
    }
    if let Some(v) = toml.monitor.log_deadlocks {
        config.log_deadlocks = v;
    }
    if let Some(ref v) = toml.branch.thread_name_prefix {
        config.branch_thread_name_prefix.clone_from(v);
    }
    if let Some(v) = toml.branch.stack_size {
        config.branch_stack_size = (v > 0).then_some(v);
    }
    if let Some(v) = toml.branch.max_children {
        config.max_branch_children = v;
    }
    if let Some(ref v) = toml.finalizer.thread_name {
        config.finalizer_thread_name.clone_from(v);
    }
}

/// Parse a TOML string into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<RuntimeTomlConfig, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Read and parse a TOML file into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<RuntimeTomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_toml_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_clean_env<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = crate::test_utils::env_lock();
        // The process-wide config reads the environment once; settle it
        // before any variable is touched.
        let _ = super::super::current();
        clean_env_locked();
        f()
    }

    // Helper: set env var for the duration of a closure, then unset.
    fn with_env<F, R>(var: &str, val: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        with_clean_env(|| {
            std::env::set_var(var, val);
            let result = f();
            std::env::remove_var(var);
            result
        })
    }

    fn clean_env_locked() {
        for var in &[
            ENV_DEADLOCK_DELAY_MS,
            ENV_BRANCH_THREAD_PREFIX,
            ENV_BRANCH_STACK_SIZE,
            ENV_MAX_BRANCH_CHILDREN,
            ENV_FINALIZER_THREAD_NAME,
            ENV_LOG_DEADLOCKS,
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn parse_usize_rejects_garbage() {
        assert_eq!(super::parse_usize("TEST", " 12 ").unwrap(), 12);
        assert!(super::parse_usize("TEST", "-1").is_err());
        assert!(super::parse_usize("TEST", "").is_err());
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        for val in &["true", "1", "yes", "ON"] {
            assert!(super::parse_bool("TEST", val).unwrap(), "expected true for {val}");
        }
        for val in &["false", "0", "No", "off"] {
            assert!(!super::parse_bool("TEST", val).unwrap(), "expected false for {val}");
        }
        assert!(super::parse_bool("TEST", "maybe").is_err());
    }

    #[test]
    fn env_overrides_deadlock_delay() {
        with_env(ENV_DEADLOCK_DELAY_MS, "40", || {
            let mut config = RuntimeConfig::default();
            apply_env_overrides(&mut config).unwrap();
            assert_eq!(config.deadlock_delay, Duration::from_millis(40));
        });
    }

    #[test]
    fn env_overrides_branch_prefix() {
        with_env(ENV_BRANCH_THREAD_PREFIX, "job", || {
            let config = RuntimeConfig::from_env().unwrap();
            assert_eq!(config.branch_thread_name_prefix, "job");
        });
    }

    #[test]
    fn env_zero_stack_size_means_default() {
        with_env(ENV_BRANCH_STACK_SIZE, "0", || {
            let mut config = RuntimeConfig::default();
            apply_env_overrides(&mut config).unwrap();
            assert_eq!(config.branch_stack_size, None);
        });
    }

    #[test]
    fn env_invalid_value_reports_variable() {
        with_env(ENV_MAX_BRANCH_CHILDREN, "lots", || {
            let mut config = RuntimeConfig::default();
            let err = apply_env_overrides(&mut config).unwrap_err();
            let msg = err.to_string();
            assert!(msg.contains(ENV_MAX_BRANCH_CHILDREN), "{msg}");
            assert!(msg.contains("lots"), "{msg}");
        });
    }

    #[test]
    fn env_log_deadlocks_toggle() {
        with_env(ENV_LOG_DEADLOCKS, "off", || {
            let config = RuntimeConfig::from_env().unwrap();
            assert!(!config.log_deadlocks);
        });
    }

    #[test]
    fn no_env_leaves_defaults() {
        with_clean_env(|| {
            let config = RuntimeConfig::from_env().unwrap();
            assert_eq!(config, RuntimeConfig::default());
        });
    }

    #[test]
    fn load_without_file_matches_from_env() {
        with_env(ENV_FINALIZER_THREAD_NAME, "reaper", || {
            let loaded = RuntimeConfig::load(None).unwrap();
            assert_eq!(loaded, RuntimeConfig::from_env().unwrap());
            assert_eq!(loaded.finalizer_thread_name, "reaper");
        });
    }

    #[cfg(not(feature = "config-file"))]
    #[test]
    fn load_with_file_needs_feature() {
        let err = RuntimeConfig::load(Some(std::path::Path::new("threadtools.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileUnsupported { .. }));
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn env_overrides_file_value() {
        let path = std::env::temp_dir().join(format!(
            "threadtools-load-{}.toml",
            std::process::id()
        ));
        std::fs::write(
            &path,
            "[branch]\nthread_name_prefix = \"from-file\"\nmax_children = 4\n",
        )
        .unwrap();

        let config = with_env(ENV_MAX_BRANCH_CHILDREN, "9", || {
            RuntimeConfig::load(Some(path.as_path())).unwrap()
        });
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.max_branch_children, 9);
        assert_eq!(config.branch_thread_name_prefix, "from-file");
        assert_eq!(config.deadlock_delay, Duration::from_secs(1));
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn toml_sections_apply() {
        let toml = parse_toml_str(
            r#"
            [monitor]
            deadlock_delay_ms = 250

            [branch]
            thread_name_prefix = "worker"
            max_children = 8

            [finalizer]
            thread_name = "reaper"
            "#,
        )
        .unwrap();
        let mut config = RuntimeConfig::default();
        apply_toml_config(&mut config, &toml);
        assert_eq!(config.deadlock_delay, Duration::from_millis(250));
        assert_eq!(config.branch_thread_name_prefix, "worker");
        assert_eq!(config.max_branch_children, 8);
        assert_eq!(config.finalizer_thread_name, "reaper");
        assert!(config.log_deadlocks);
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn toml_parse_error_is_reported() {
        let err = parse_toml_str("[monitor\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn toml_missing_file_is_io_error() {
        let err = parse_toml_file(std::path::Path::new("/nonexistent/threadtools.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
