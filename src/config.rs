//! Session configuration
//!
//! Environment variables:
//! - `ACCEL_BRIDGE_WORK_DIR`: directory for generated files (default: a
//!   fresh temporary directory per session)
//! - `ACCEL_BRIDGE_KEEP_ARTIFACTS`: keep the temporary directory after the
//!   session (any value)
//! - `ACCEL_BRIDGE_KEY_POLICY`: `positional` or `session`

use std::ffi::OsString;
use std::path::PathBuf;

use log::warn;

use crate::shm::KeyPolicy;

pub const ENV_WORK_DIR: &str = "ACCEL_BRIDGE_WORK_DIR";
pub const ENV_KEEP_ARTIFACTS: &str = "ACCEL_BRIDGE_KEEP_ARTIFACTS";
pub const ENV_KEY_POLICY: &str = "ACCEL_BRIDGE_KEY_POLICY";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Directory for generated files; `None` uses a temporary directory
    pub work_dir: Option<PathBuf>,
    /// Keep the temporary directory instead of deleting it
    pub keep_artifacts: bool,
    pub key_policy: KeyPolicy,
    /// Spaces per indentation level in emitted code
    pub indent: usize,
    /// Override of the target's host source file name
    pub host_file: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            work_dir: None,
            keep_artifacts: false,
            key_policy: KeyPolicy::default(),
            indent: 2,
            host_file: None,
        }
    }
}

impl SessionConfig {
    /// Defaults overlaid with the process environment
    pub fn from_env() -> Self {
        Self::default().with_env(|name| std::env::var_os(name))
    }

    /// Overlay variables looked up through `var`
    pub fn with_env<F>(mut self, var: F) -> Self
    where
        F: Fn(&str) -> Option<OsString>,
    {
        if let Some(dir) = var(ENV_WORK_DIR) {
            self.work_dir = Some(PathBuf::from(dir));
        }
        if var(ENV_KEEP_ARTIFACTS).is_some() {
            self.keep_artifacts = true;
        }
        if let Some(policy) = var(ENV_KEY_POLICY) {
            match policy.to_string_lossy().parse() {
                Ok(policy) => self.key_policy = policy,
                Err(e) => warn!("Ignoring {ENV_KEY_POLICY}: {e}"),
            }
        }
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    pub fn with_keep_artifacts(mut self, keep: bool) -> Self {
        self.keep_artifacts = keep;
        self
    }

    pub fn with_key_policy(mut self, policy: KeyPolicy) -> Self {
        self.key_policy = policy;
        self
    }

    pub fn with_indent(mut self, indent: usize) -> Self {
        self.indent = indent;
        self
    }

    pub fn with_host_file(mut self, name: impl Into<String>) -> Self {
        self.host_file = Some(name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<OsString> {
        let map: HashMap<String, OsString> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), OsString::from(v)))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.indent, 2);
        assert_eq!(config.key_policy, KeyPolicy::Session);
        assert!(config.work_dir.is_none());
    }

    #[test]
    fn test_env_overlay() {
        let config = SessionConfig::default().with_env(env(&[
            (ENV_WORK_DIR, "/tmp/accel"),
            (ENV_KEEP_ARTIFACTS, "1"),
            (ENV_KEY_POLICY, "positional"),
        ]));
        assert_eq!(config.work_dir, Some(PathBuf::from("/tmp/accel")));
        assert!(config.keep_artifacts);
        assert_eq!(config.key_policy, KeyPolicy::Positional);
    }

    #[test]
    fn test_invalid_policy_is_ignored() {
        let config = SessionConfig::default()
            .with_key_policy(KeyPolicy::Positional)
            .with_env(env(&[(ENV_KEY_POLICY, "random")]));
        assert_eq!(config.key_policy, KeyPolicy::Positional);
    }
}
