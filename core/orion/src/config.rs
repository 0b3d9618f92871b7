// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0
//
// ConfigLoader reads the configuration file once and exposes lazy, cached
// accessors for tracing, runtime and service settings. Absent sections fall
// back to their defaults.

use std::collections::HashSet;
use std::fmt::Debug;

use lazy_static::lazy_static;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value, from_str};
use thiserror::Error;
use tracing::{debug, warn};

use crate::runtime::RuntimeConfiguration;
use orion_service::ServiceConfiguration;
use orion_tracing::TracingConfiguration;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid configuration - impossible to parse yaml")]
    InvalidYaml,
    #[error("invalid configuration - key {0} not valid")]
    InvalidKey(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("yaml parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

lazy_static! {
    static ref CONFIG_KEYS: HashSet<&'static str> = {
        let mut s = HashSet::new();
        s.insert("tracing");
        s.insert("runtime");
        s.insert("service");
        s
    };
}

#[derive(Debug)]
pub struct ConfigLoader {
    root: Value,
    tracing: Option<TracingConfiguration>,
    runtime: Option<RuntimeConfiguration>,
}

impl Default for ConfigLoader {
    /// A loader without file, every section at its default.
    fn default() -> Self {
        ConfigLoader {
            root: Value::Mapping(Mapping::new()),
            tracing: None,
            runtime: None,
        }
    }
}

impl ConfigLoader {
    pub fn new(file_path: &str) -> Result<Self, ConfigError> {
        let config_str =
            std::fs::read_to_string(file_path).map_err(|e| ConfigError::NotFound(e.to_string()))?;
        Self::parse(&config_str)
    }

    pub fn parse(config_str: &str) -> Result<Self, ConfigError> {
        let root: Value = from_str(config_str).map_err(|_| ConfigError::InvalidYaml)?;

        // an empty file is a valid, empty configuration
        let root = match root {
            Value::Null => Value::Mapping(Mapping::new()),
            other => other,
        };

        let mapping = root.as_mapping().ok_or(ConfigError::InvalidYaml)?;
        for key in mapping.keys() {
            let k = key.as_str().ok_or(ConfigError::InvalidYaml)?;
            if !CONFIG_KEYS.contains(k) {
                return Err(ConfigError::InvalidKey(k.to_string()));
            }
        }

        Ok(ConfigLoader {
            root,
            ..Default::default()
        })
    }

    pub fn tracing(&mut self) -> &TracingConfiguration {
        let root = &self.root;
        self.tracing
            .get_or_insert_with(|| lenient_section(root, "tracing"))
    }

    pub fn runtime(&mut self) -> &RuntimeConfiguration {
        let root = &self.root;
        self.runtime
            .get_or_insert_with(|| lenient_section(root, "runtime"))
    }

    /// Service settings. Unlike the other sections an invalid one is an
    /// error, since running with unintended timeouts is worse than not
    /// running.
    pub fn service(&self) -> Result<ServiceConfiguration, ConfigError> {
        let config: ServiceConfiguration = match self.root.get("service") {
            Some(value) => serde_yaml::from_value(value.clone())?,
            None => ServiceConfiguration::default(),
        };
        config
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        debug!(?config, "service configuration loaded");
        Ok(config)
    }
}

/// Section `key` of `root`, the default when absent or invalid.
fn lenient_section<T>(root: &Value, key: &str) -> T
where
    T: DeserializeOwned + Default + Debug,
{
    let cfg = root
        .get(key)
        .cloned()
        .map(|v| {
            serde_yaml::from_value(v).unwrap_or_else(|e| {
                warn!(error = ?e, section = key, "invalid config section, falling back to default");
                T::default()
            })
        })
        .unwrap_or_default();
    debug!(?cfg, section = key, "configuration loaded");
    cfg
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn testdata_path() -> String {
        concat!(env!("CARGO_MANIFEST_DIR"), "/testdata").to_string()
    }

    #[test]
    #[traced_test]
    fn test_full_config() {
        let path = format!("{}/config.yaml", testdata_path());
        let mut loader = ConfigLoader::new(&path).expect("loader init should succeed");

        assert_eq!(loader.tracing().log_level(), "debug");
        assert_eq!(loader.runtime().n_cores(), 1);
        assert_eq!(loader.runtime().drain_timeout(), Duration::from_secs(2));

        let service = loader.service().expect("service should load");
        assert_eq!(service.timeout, Duration::from_millis(250));
        assert_eq!(service.timeouts["/time/shouldNotTimeout"], Duration::from_millis(400));
    }

    #[test]
    #[traced_test]
    fn test_empty_config() {
        let path = format!("{}/config-empty.yaml", testdata_path());
        let mut loader = ConfigLoader::new(&path).expect("loader init should succeed");

        assert_eq!(loader.tracing().log_level(), "info");
        assert_eq!(loader.runtime().thread_name(), "orion");
        assert_eq!(loader.service().unwrap(), ServiceConfiguration::default());
    }

    #[test]
    #[traced_test]
    fn test_invalid_tracing_falls_back() {
        let mut loader = ConfigLoader::parse("tracing:\n  display_thread_ids: maybe\n").unwrap();
        assert!(!loader.tracing().display_thread_ids());
        assert!(logs_contain("falling back to default"));
    }

    #[test]
    fn test_invalid_service_is_an_error() {
        let loader = ConfigLoader::parse("service:\n  timeout: 0s\n").unwrap();
        assert!(matches!(loader.service(), Err(ConfigError::Invalid(_))));

        let loader = ConfigLoader::parse("service:\n  timeout: whenever\n").unwrap();
        assert!(matches!(loader.service(), Err(ConfigError::YamlError(_))));
    }

    #[test]
    fn test_unknown_key() {
        let res = ConfigLoader::parse("services:\n  calc: {}\n");
        assert!(matches!(res, Err(ConfigError::InvalidKey(k)) if k == "services"));
    }

    #[test]
    fn test_invalid_yaml() {
        let path = format!("{}/config-invalid-yaml.yaml", testdata_path());
        assert!(matches!(
            ConfigLoader::new(&path),
            Err(ConfigError::InvalidYaml)
        ));
        assert!(matches!(
            ConfigLoader::new("/does/not/exist.yaml"),
            Err(ConfigError::NotFound(_))
        ));
    }
}
