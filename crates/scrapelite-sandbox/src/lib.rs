pub mod common;
pub mod env;
pub mod extract;
pub mod log;
pub mod manifest;
pub mod runner;
pub mod toolchain;
pub mod transform;
