//! Host environment policy.
//!
//! Scripts never inherit the host environment. A [`HostEnv`] snapshot keeps
//! only the credential allow-list plus the system variables the toolchain
//! needs; [`resolve_execution_env`] turns it into the variables every child
//! process of a request receives.

use std::collections::BTreeMap;

use scrapelite_core::config::env_keys::{credentials, SYSTEM_PASSTHROUGH};

use super::builder::ProvisionError;

fn is_forwarded(key: &str) -> bool {
    credentials::ALLOW_LIST.contains(&key) || SYSTEM_PASSTHROUGH.contains(&key)
}

/// Immutable snapshot of the forwardable host variables.
#[derive(Debug, Clone, Default)]
pub struct HostEnv {
    vars: BTreeMap<String, String>,
}

impl HostEnv {
    /// Snapshot the current process environment. Take this once at startup
    /// and share it; it is not re-read per request.
    pub fn from_process() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Build from explicit pairs. Keys outside the allow-list and the system
    /// passthrough list are dropped.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| is_forwarded(k))
            .collect();
        Self { vars }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Set and non-empty.
    pub fn is_set(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| !v.is_empty())
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Variables handed to every child process of one request.
#[derive(Debug, Clone, Default)]
pub struct ExecutionEnv {
    vars: Vec<(String, String)>,
}

impl ExecutionEnv {
    pub fn vars(&self) -> &[(String, String)] {
        &self.vars
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Copy with `key` set, replacing any existing value.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.vars.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.vars.push((key, value)),
        }
        self
    }

    /// Set `key` only when it is absent or empty.
    pub fn with_default(self, key: &str, value: impl Into<String>) -> Self {
        if self.get(key).is_some_and(|v| !v.is_empty()) {
            self
        } else {
            self.with(key, value)
        }
    }
}

/// Resolve the child environment for a request.
///
/// Logs which credentials are present (never their values). When the script
/// drives an LLM, at least one of `OPENAI_API_KEY` / `ANTHROPIC_API_KEY` must
/// be non-empty.
pub fn resolve_execution_env(
    host: &HostEnv,
    requires_llm: bool,
) -> Result<ExecutionEnv, ProvisionError> {
    for key in credentials::ALLOW_LIST {
        if host.is_set(key) {
            tracing::debug!(credential = key, "credential present");
        } else {
            tracing::debug!(credential = key, "credential not set");
        }
    }

    if requires_llm && !credentials::LLM_KEYS.iter().any(|k| host.is_set(k)) {
        tracing::warn!(
            "LLM configuration missing: neither {} nor {} is set",
            credentials::OPENAI_API_KEY,
            credentials::ANTHROPIC_API_KEY
        );
        return Err(ProvisionError::MissingLlmCredentials);
    }

    Ok(ExecutionEnv {
        vars: host
            .vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    })
}
