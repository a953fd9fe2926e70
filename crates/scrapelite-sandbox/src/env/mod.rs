//! Per-request environment: host variable policy and workspace provisioning.
//!
//! `host` decides which host variables a script may see; `builder` turns a
//! manifest and a transformed script into a ready-to-run workspace. The
//! runner receives only the resulting `ProvisionedWorkspace` and `ExecutionEnv`.

pub mod builder;
pub mod host;

pub use builder::{EnvironmentProvisioner, ProvisionError, ProvisionedWorkspace};
pub use host::{resolve_execution_env, ExecutionEnv, HostEnv};
