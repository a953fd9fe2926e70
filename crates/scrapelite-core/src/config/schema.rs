//! Domain-grouped configuration structs, loaded from the environment.

use super::env_keys::{limits as limit_keys, observability as obv_keys, provisioning as prov_keys};
use super::loader::{env_bool, env_optional, env_or, env_u64};
use std::path::PathBuf;
use std::time::Duration;

/// Observability: quiet, log level, JSON logs, audit log path.
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub quiet: bool,
    pub log_level: String,
    pub log_json: bool,
    pub audit_log: Option<String>,
}

impl ObservabilityConfig {
    pub fn from_env() -> &'static Self {
        use std::sync::OnceLock;
        static CACHE: OnceLock<ObservabilityConfig> = OnceLock::new();
        CACHE.get_or_init(|| {
            super::loader::load_dotenv();
            Self {
                quiet: env_bool(obv_keys::SCRAPELITE_QUIET, &[], false),
                log_level: env_or(obv_keys::SCRAPELITE_LOG_LEVEL, &[], || {
                    "scrapelite=info".to_string()
                }),
                log_json: env_bool(obv_keys::SCRAPELITE_LOG_JSON, &[], false),
                audit_log: env_optional(obv_keys::SCRAPELITE_AUDIT_LOG, &[]),
            }
        })
    }
}

/// Workspace provisioning: where workspaces live, per-step install timeouts,
/// and the virtual display settings.
#[derive(Debug, Clone)]
pub struct ProvisioningConfig {
    /// Parent of the per-request workspaces. `None` means the system temp dir.
    pub work_root: Option<PathBuf>,
    /// Shared npm cache (content-addressed, safe to share between requests).
    pub npm_cache_dir: Option<PathBuf>,
    pub install_timeout: Duration,
    pub stealth_install_timeout: Duration,
    pub browser_install_timeout: Duration,
    pub browser_retry_timeout: Duration,
    pub skip_browser_install: bool,
    /// Display bound inside the script (`process.env.DISPLAY`, `DISPLAY`).
    pub display: String,
    /// Virtual display geometry, `WxHxDEPTH`.
    pub screen: String,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            work_root: None,
            npm_cache_dir: None,
            install_timeout: Duration::from_secs(120),
            stealth_install_timeout: Duration::from_secs(120),
            browser_install_timeout: Duration::from_secs(300),
            browser_retry_timeout: Duration::from_secs(180),
            skip_browser_install: false,
            display: ":99".to_string(),
            screen: "1024x768x24".to_string(),
        }
    }
}

impl ProvisioningConfig {
    pub fn from_env() -> Self {
        super::loader::load_dotenv();
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            Duration::from_secs(env_u64(key, &[], default.as_secs()))
        };
        Self {
            work_root: env_optional(prov_keys::SCRAPELITE_WORK_DIR, prov_keys::WORK_DIR_ALIASES)
                .map(PathBuf::from),
            npm_cache_dir: env_optional(prov_keys::SCRAPELITE_NPM_CACHE_DIR, &[])
                .map(PathBuf::from)
                .or_else(|| dirs::cache_dir().map(|d| d.join("scrapelite").join("npm"))),
            install_timeout: secs(
                prov_keys::SCRAPELITE_INSTALL_TIMEOUT_SECS,
                defaults.install_timeout,
            ),
            stealth_install_timeout: secs(
                prov_keys::SCRAPELITE_STEALTH_INSTALL_TIMEOUT_SECS,
                defaults.stealth_install_timeout,
            ),
            browser_install_timeout: secs(
                prov_keys::SCRAPELITE_BROWSER_INSTALL_TIMEOUT_SECS,
                defaults.browser_install_timeout,
            ),
            browser_retry_timeout: secs(
                prov_keys::SCRAPELITE_BROWSER_RETRY_TIMEOUT_SECS,
                defaults.browser_retry_timeout,
            ),
            skip_browser_install: env_bool(prov_keys::SCRAPELITE_SKIP_BROWSER_INSTALL, &[], false),
            display: env_or(prov_keys::SCRAPELITE_DISPLAY, &[], || defaults.display.clone()),
            screen: env_or(prov_keys::SCRAPELITE_SCREEN, &[], || defaults.screen.clone()),
        }
    }
}

/// Default execution limits. Per-request `timeout_seconds` overrides the timeout.
#[derive(Debug, Clone, Copy)]
pub struct LimitsConfig {
    pub max_memory_mb: u64,
    pub timeout_secs: u64,
}

/// Default process-group memory bound in MB.
pub const DEFAULT_MAX_MEMORY_MB: u64 = 2048;

/// Default script timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_memory_mb: DEFAULT_MAX_MEMORY_MB,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl LimitsConfig {
    pub fn from_env() -> Self {
        super::loader::load_dotenv();
        Self {
            max_memory_mb: env_u64(limit_keys::SCRAPELITE_MAX_MEMORY_MB, &[], DEFAULT_MAX_MEMORY_MB),
            timeout_secs: env_u64(limit_keys::SCRAPELITE_TIMEOUT_SECS, &[], DEFAULT_TIMEOUT_SECS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provisioning_defaults_match_install_budget() {
        let cfg = ProvisioningConfig::default();
        assert_eq!(cfg.install_timeout, Duration::from_secs(120));
        assert_eq!(cfg.browser_install_timeout, Duration::from_secs(300));
        assert_eq!(cfg.browser_retry_timeout, Duration::from_secs(180));
        assert_eq!(cfg.display, ":99");
        assert_eq!(cfg.screen, "1024x768x24");
    }

    #[test]
    fn test_limits_defaults() {
        let limits = LimitsConfig::default();
        assert_eq!(limits.max_memory_mb, 2048);
        assert_eq!(limits.timeout_secs, 300);
    }
}
