// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::time::Duration;

use duration_str::deserialize_duration;
use serde::{Deserialize, Deserializer};

use crate::codec::CodecKind;
use crate::errors::ServiceError;
use crate::logger::gelf::{DEFAULT_HOST, DEFAULT_PORT};
use crate::route;

/// Endpoint of the GELF logging sink.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggerConfiguration {
    #[serde(default = "default_logger_host")]
    pub host: String,
    #[serde(default = "default_logger_port")]
    pub port: u16,
}

impl Default for LoggerConfiguration {
    fn default() -> Self {
        LoggerConfiguration {
            host: default_logger_host(),
            port: default_logger_port(),
        }
    }
}

fn default_logger_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_logger_port() -> u16 {
    DEFAULT_PORT
}

/// Settings of one service. Immutable once the service is built.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServiceConfiguration {
    /// timeout of calls without a more specific one
    #[serde(default = "default_timeout", deserialize_with = "deserialize_duration")]
    pub timeout: Duration,

    /// per-route timeouts, keyed by path in either form
    #[serde(default, deserialize_with = "deserialize_timeouts")]
    pub timeouts: HashMap<String, Duration>,

    /// namespace prepended to every outgoing route
    #[serde(default)]
    pub service: Option<String>,

    #[serde(default)]
    pub codec: CodecKind,

    /// sampling decision of new traces
    #[serde(default = "default_sampled")]
    pub sampled: bool,

    /// Zipkin collector base URL, spans are only logged when unset
    #[serde(default)]
    pub tracer_endpoint: Option<String>,

    /// GELF sink, records go to the diagnostics log when unset
    #[serde(default)]
    pub logger: Option<LoggerConfiguration>,
}

impl Default for ServiceConfiguration {
    fn default() -> Self {
        ServiceConfiguration {
            timeout: default_timeout(),
            timeouts: HashMap::new(),
            service: None,
            codec: CodecKind::default(),
            sampled: default_sampled(),
            tracer_endpoint: None,
            logger: None,
        }
    }
}

fn default_timeout() -> Duration {
    Duration::from_millis(200)
}

fn default_sampled() -> bool {
    true
}

fn deserialize_timeouts<'de, D>(deserializer: D) -> Result<HashMap<String, Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = HashMap::<String, String>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(path, value)| {
            duration_str::parse(&value)
                .map(|d| (path, d))
                .map_err(serde::de::Error::custom)
        })
        .collect()
}

impl ServiceConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        ServiceConfiguration { timeout, ..self }
    }

    pub fn with_route_timeout(mut self, path: &str, timeout: Duration) -> Self {
        self.timeouts.insert(path.to_string(), timeout);
        self
    }

    pub fn with_namespace(self, namespace: impl Into<String>) -> Self {
        ServiceConfiguration {
            service: Some(namespace.into()),
            ..self
        }
    }

    pub fn with_codec(self, codec: CodecKind) -> Self {
        ServiceConfiguration { codec, ..self }
    }

    pub fn with_sampled(self, sampled: bool) -> Self {
        ServiceConfiguration { sampled, ..self }
    }

    pub fn with_tracer_endpoint(self, endpoint: impl Into<String>) -> Self {
        ServiceConfiguration {
            tracer_endpoint: Some(endpoint.into()),
            ..self
        }
    }

    pub fn with_logger(self, logger: LoggerConfiguration) -> Self {
        ServiceConfiguration {
            logger: Some(logger),
            ..self
        }
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.timeout.is_zero() {
            return Err(ServiceError::ConfigError(
                "timeout must be greater than zero".to_string(),
            ));
        }
        if let Some((path, _)) = self.timeouts.iter().find(|(_, t)| t.is_zero()) {
            return Err(ServiceError::ConfigError(format!(
                "timeout of route {} must be greater than zero",
                path
            )));
        }
        if self.service.as_deref().is_some_and(str::is_empty) {
            return Err(ServiceError::ConfigError(
                "service namespace must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Per-route timeouts keyed by normalized route.
    pub(crate) fn route_timeouts(&self) -> HashMap<String, Duration> {
        self.timeouts
            .iter()
            .map(|(path, timeout)| (route::normalize(path), *timeout))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServiceConfiguration::default();
        assert_eq!(config.timeout, Duration::from_millis(200));
        assert!(config.timeouts.is_empty());
        assert_eq!(config.codec, CodecKind::MsgPack);
        assert!(config.sampled);
        assert!(config.validate().is_ok());

        let config: ServiceConfiguration = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, ServiceConfiguration::default());
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
timeout: 300ms
timeouts:
  /calc/sum: 1s
  time.get: 50ms
service: ns
codec: json
sampled: false
tracer_endpoint: http://localhost:9411
logger:
  port: 12202
"#;
        let config: ServiceConfiguration = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.timeout, Duration::from_millis(300));
        assert_eq!(config.timeouts["/calc/sum"], Duration::from_secs(1));
        assert_eq!(config.service.as_deref(), Some("ns"));
        assert_eq!(config.codec, CodecKind::Json);
        assert!(!config.sampled);
        assert_eq!(
            config.logger,
            Some(LoggerConfiguration {
                host: "127.0.0.1".to_string(),
                port: 12202
            })
        );

        let routes = config.route_timeouts();
        assert_eq!(routes["calc.sum"], Duration::from_secs(1));
        assert_eq!(routes["time.get"], Duration::from_millis(50));
    }

    #[test]
    fn test_invalid_duration() {
        let res: Result<ServiceConfiguration, _> =
            serde_yaml::from_str("timeouts:\n  calc.sum: soon\n");
        assert!(res.is_err());
    }

    #[test]
    fn test_validate() {
        let config = ServiceConfiguration::new().with_timeout(Duration::ZERO);
        assert!(matches!(config.validate(), Err(ServiceError::ConfigError(_))));

        let config = ServiceConfiguration::new().with_route_timeout("calc.sum", Duration::ZERO);
        assert!(config.validate().is_err());

        let config = ServiceConfiguration::new().with_namespace("");
        assert!(config.validate().is_err());
    }
}
