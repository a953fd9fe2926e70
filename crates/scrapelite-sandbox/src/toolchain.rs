//! Toolchain trait: extension point for the package manager and script launcher.
//!
//! The provisioner and runner never name `npm` or `npx` directly; they ask
//! the toolchain for a [`LaunchSpec`] and run it in the workspace. The default
//! is [`NodeToolchain`]. Alternative managers (pnpm, bun) or test doubles
//! implement the same trait.

use crate::common::LaunchSpec;

/// Name of the script file inside a workspace.
pub const SCRIPT_FILE: &str = "scraper.ts";

/// Extension point for installing dependencies and launching scripts.
///
/// All specs run with the workspace as working directory and the resolved
/// execution environment.
pub trait Toolchain: Send + Sync {
    /// Toolchain name for logging and diagnostics.
    fn name(&self) -> &str;

    /// Install everything listed in the workspace `package.json`.
    fn install(&self) -> LaunchSpec;

    /// Install additional packages by name.
    fn install_packages(&self, packages: &[&str]) -> LaunchSpec;

    /// Install the Chromium browser binary, optionally with system libraries.
    fn browser_install(&self, with_deps: bool) -> LaunchSpec;

    /// Launch `script_file` (relative to the workspace).
    fn script_launch(&self, script_file: &str) -> LaunchSpec;

    /// Wrap `inner` so it runs against a virtual display of `screen` geometry.
    /// Returns `None` when no display wrapper is available on this host.
    fn display_wrapper(&self, inner: LaunchSpec, screen: &str) -> Option<LaunchSpec>;
}

/// npm / npx / ts-node, with `xvfb-run` as the display wrapper.
#[derive(Debug, Clone)]
pub struct NodeToolchain {
    npm: String,
    npx: String,
}

impl NodeToolchain {
    /// Resolve `npm` and `npx` on PATH. Unresolved tools keep their bare
    /// names so the spawn error names what is missing.
    pub fn detect() -> Self {
        let resolve = |name: &str| {
            which::which(name)
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_else(|_| {
                    tracing::warn!("{} not found on PATH", name);
                    name.to_string()
                })
        };
        Self {
            npm: resolve("npm"),
            npx: resolve("npx"),
        }
    }
}

impl Default for NodeToolchain {
    fn default() -> Self {
        Self {
            npm: "npm".to_string(),
            npx: "npx".to_string(),
        }
    }
}

impl Toolchain for NodeToolchain {
    fn name(&self) -> &str {
        "node"
    }

    fn install(&self) -> LaunchSpec {
        LaunchSpec::new(&self.npm, ["install"])
    }

    fn install_packages(&self, packages: &[&str]) -> LaunchSpec {
        LaunchSpec::new(
            &self.npm,
            std::iter::once("install").chain(packages.iter().copied()),
        )
    }

    fn browser_install(&self, with_deps: bool) -> LaunchSpec {
        let mut args = vec!["playwright", "install", "chromium"];
        if with_deps {
            args.push("--with-deps");
        }
        LaunchSpec::new(&self.npx, args)
    }

    fn script_launch(&self, script_file: &str) -> LaunchSpec {
        LaunchSpec::new(&self.npx, ["ts-node", script_file])
    }

    fn display_wrapper(&self, inner: LaunchSpec, screen: &str) -> Option<LaunchSpec> {
        let xvfb = which::which("xvfb-run").ok()?;
        Some(inner.wrapped_in(
            xvfb.to_string_lossy().to_string(),
            ["-a".to_string(), format!("--server-args=-screen 0 {}", screen)],
        ))
    }
}
