// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use clap::Parser;

use orion_service::ServiceConfiguration;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE", env = "ORION_CONFIG")]
    config: Option<String>,

    /// Base URL of the Zipkin collector
    #[arg(long, value_name = "URL", env = "ORION_TRACER_ENDPOINT")]
    tracer_endpoint: Option<String>,

    /// Host of the GELF logging sink
    #[arg(long, env = "ORION_LOGGER_HOST")]
    logger_host: Option<String>,

    /// Port of the GELF logging sink
    #[arg(long, env = "ORION_LOGGER_PORT")]
    logger_port: Option<u16>,

    /// Default call timeout, e.g. 200ms
    #[arg(long, env = "ORION_TIMEOUT", value_parser = parse_duration)]
    timeout: Option<Duration>,
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    duration_str::parse(value).map_err(|e| e.to_string())
}

impl Args {
    pub fn config(&self) -> Option<&str> {
        self.config.as_deref()
    }

    pub fn tracer_endpoint(&self) -> Option<&str> {
        self.tracer_endpoint.as_deref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Overlay the command line settings on `config`.
    pub fn apply(&self, mut config: ServiceConfiguration) -> ServiceConfiguration {
        if let Some(endpoint) = &self.tracer_endpoint {
            config.tracer_endpoint = Some(endpoint.clone());
        }
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }
        if self.logger_host.is_some() || self.logger_port.is_some() {
            let mut logger = config.logger.take().unwrap_or_default();
            if let Some(host) = &self.logger_host {
                logger.host = host.clone();
            }
            if let Some(port) = self.logger_port {
                logger.port = port;
            }
            config.logger = Some(logger);
        }
        config
    }
}
