// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use duration_str::deserialize_duration;
use serde::{Deserialize, Serialize};
use tokio::runtime::{Builder, Runtime};
use tracing::{info, warn};

/// The `runtime` section of the configuration file.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct RuntimeConfiguration {
    /// worker threads, 0 for one per available core
    #[serde(default)]
    n_cores: usize,

    #[serde(default = "default_thread_name")]
    thread_name: String,

    /// how long the services get to close on shutdown
    #[serde(
        default = "default_drain_timeout",
        deserialize_with = "deserialize_duration"
    )]
    drain_timeout: Duration,
}

impl Default for RuntimeConfiguration {
    fn default() -> Self {
        RuntimeConfiguration {
            n_cores: 0,
            thread_name: default_thread_name(),
            drain_timeout: default_drain_timeout(),
        }
    }
}

fn default_thread_name() -> String {
    "orion".to_string()
}

fn default_drain_timeout() -> Duration {
    Duration::from_secs(10)
}

impl RuntimeConfiguration {
    pub fn n_cores(&self) -> usize {
        self.n_cores
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }
}

pub struct OrionRuntime {
    pub config: RuntimeConfiguration,
    /// worker threads actually started
    pub cores: usize,
    pub runtime: Runtime,
}

/// Cores to use for `requested`, capped at what the machine has.
fn effective_cores(requested: usize, available: usize) -> usize {
    match requested {
        0 => available,
        n if n > available => {
            warn!(requested = n, %available, "not enough cores, using all of them");
            available
        }
        n => n,
    }
}

/// Build the tokio runtime. A single core runs everything on the calling
/// thread, more cores get a work-stealing pool of that size.
pub fn build(config: &RuntimeConfiguration) -> std::io::Result<OrionRuntime> {
    let cores = effective_cores(config.n_cores, num_cpus::get().max(1));

    let mut builder = if cores == 1 {
        Builder::new_current_thread()
    } else {
        let mut builder = Builder::new_multi_thread();
        builder.worker_threads(cores).max_blocking_threads(cores);
        builder
    };
    let runtime = builder
        .enable_all()
        .thread_name(config.thread_name())
        .build()?;
    info!(%cores, thread_name = config.thread_name(), "runtime built");

    Ok(OrionRuntime {
        config: config.clone(),
        cores,
        runtime,
    })
}
