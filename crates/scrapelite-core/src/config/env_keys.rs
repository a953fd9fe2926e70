//! Environment variable keys and allow-lists.
//!
//! Executor settings use the `SCRAPELITE_*` prefix. Credential names are the
//! ones the hosting platform injects and are forwarded to scripts verbatim.

/// Observability and logging
pub mod observability {
    pub const SCRAPELITE_QUIET: &str = "SCRAPELITE_QUIET";
    pub const SCRAPELITE_LOG_LEVEL: &str = "SCRAPELITE_LOG_LEVEL";
    pub const SCRAPELITE_LOG_JSON: &str = "SCRAPELITE_LOG_JSON";
    pub const SCRAPELITE_AUDIT_LOG: &str = "SCRAPELITE_AUDIT_LOG";
}

/// Workspace provisioning
pub mod provisioning {
    pub const SCRAPELITE_WORK_DIR: &str = "SCRAPELITE_WORK_DIR";
    pub const WORK_DIR_ALIASES: &[&str] = &["SCRAPELITE_TMPDIR"];

    pub const SCRAPELITE_NPM_CACHE_DIR: &str = "SCRAPELITE_NPM_CACHE_DIR";

    pub const SCRAPELITE_INSTALL_TIMEOUT_SECS: &str = "SCRAPELITE_INSTALL_TIMEOUT_SECS";
    pub const SCRAPELITE_STEALTH_INSTALL_TIMEOUT_SECS: &str =
        "SCRAPELITE_STEALTH_INSTALL_TIMEOUT_SECS";
    pub const SCRAPELITE_BROWSER_INSTALL_TIMEOUT_SECS: &str =
        "SCRAPELITE_BROWSER_INSTALL_TIMEOUT_SECS";
    pub const SCRAPELITE_BROWSER_RETRY_TIMEOUT_SECS: &str = "SCRAPELITE_BROWSER_RETRY_TIMEOUT_SECS";

    /// Skip the browser binary step (images with browsers baked in).
    pub const SCRAPELITE_SKIP_BROWSER_INSTALL: &str = "SCRAPELITE_SKIP_BROWSER_INSTALL";

    pub const SCRAPELITE_DISPLAY: &str = "SCRAPELITE_DISPLAY";
    pub const SCRAPELITE_SCREEN: &str = "SCRAPELITE_SCREEN";
}

/// Execution limits
pub mod limits {
    pub const SCRAPELITE_MAX_MEMORY_MB: &str = "SCRAPELITE_MAX_MEMORY_MB";
    pub const SCRAPELITE_TIMEOUT_SECS: &str = "SCRAPELITE_TIMEOUT_SECS";
}

/// Credentials forwarded from the host into the script environment.
pub mod credentials {
    pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
    pub const ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";

    /// Fixed allow-list. Anything else in the host environment stays on the host.
    pub const ALLOW_LIST: &[&str] = &[
        ANTHROPIC_API_KEY,
        "BROWSERBASE_API_KEY",
        "BROWSERBASE_PROJECT_ID",
        "NEXT_PUBLIC_SUPABASE_URL",
        "NEXT_PUBLIC_SUPABASE_ANON_KEY",
        "SUPABASE_SERVICE_ROLE_KEY",
        OPENAI_API_KEY,
        "OPENAI_MODEL",
        "ANTHROPIC_MODEL",
    ];

    /// At least one of these must be set when the script drives an LLM.
    pub const LLM_KEYS: &[&str] = &[OPENAI_API_KEY, ANTHROPIC_API_KEY];
}

/// Non-secret host variables the toolchain needs to function (PATH lookup,
/// npm cache/registry, locale, proxies, pre-installed browsers).
pub const SYSTEM_PASSTHROUGH: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LANG",
    "LC_ALL",
    "TERM",
    "DISPLAY",
    "PLAYWRIGHT_BROWSERS_PATH",
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "NO_PROXY",
    "http_proxy",
    "https_proxy",
    "no_proxy",
    "NPM_CONFIG_REGISTRY",
    "npm_config_registry",
];
