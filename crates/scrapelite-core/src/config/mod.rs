//! Unified configuration layer.
//!
//! Every environment variable the executor reads goes through this module;
//! business code uses the structured configs instead of `std::env::var`.
//!
//! - `loader`: `env_or`, `env_optional`, `env_bool`, `.env` loading
//! - `schema`: `ObservabilityConfig`, `ProvisioningConfig`, `LimitsConfig`
//! - `env_keys`: key constants, credential and passthrough allow-lists

pub mod env_keys;
pub mod loader;
pub mod schema;

pub use loader::{env_bool, env_optional, env_or, env_u64, load_dotenv, load_dotenv_from_dir};
pub use schema::{LimitsConfig, ObservabilityConfig, ProvisioningConfig};
