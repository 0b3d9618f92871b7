// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info};

use orion_service::{
    LocalTransport, Request, Response, Service, ServiceConfiguration, TRANSPORT_ERROR_CODE,
};

use crate::args::Args;
use crate::config::ConfigLoader;
use crate::runtime;

/// Time the slow handler of the demo takes to answer.
const SLOW_HANDLER_DELAY: Duration = Duration::from_millis(201);

/// Timeout the demo grants to the slow handler.
const SLOW_CALL_TIMEOUT: Duration = Duration::from_millis(300);

/// Start the `calc` and `time` services on `transport`.
pub async fn start_services(
    transport: &LocalTransport,
    config: &ServiceConfiguration,
) -> Result<Vec<Service>> {
    let calc = Service::builder("calc", Arc::new(transport.clone()))
        .with_configuration(config.clone())
        .build()
        .context("failed to build calc service")?;

    calc.handle_async("sum", |req: Request| async move {
        let a = req.params()["a"].as_f64().unwrap_or_default();
        let b = req.params()["b"].as_f64().unwrap_or_default();
        Response::new(json!(a + b))
    })
    .await?;

    let time = Service::builder("time", Arc::new(transport.clone()))
        .with_configuration(config.clone())
        .build()
        .context("failed to build time service")?;

    time.handle_async("get", |_: Request| async move {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Response::new(json!(now))
    })
    .await?;

    // the reply is dropped, callers always time out
    time.handle("shouldTimeout", |_, reply| {
        debug!(route = reply.route(), "dropping reply");
    })
    .await?;

    time.handle("shouldNotTimeout", |_, reply| {
        tokio::spawn(async move {
            tokio::time::sleep(SLOW_HANDLER_DELAY).await;
            reply.send(Response::new(json!("done")));
        });
    })
    .await?;

    for service in [&calc, &time] {
        service.listen().await?;
        info!(service = %service, "service started");
    }

    Ok(vec![calc, time])
}

/// Exercise every interaction pattern against the demo services.
pub async fn run_scenario(client: &Service) -> Result<()> {
    let response = client
        .call(&mut Request::new("/calc/sum").with_params(json!({"a": 1, "b": 2})))
        .await?;
    if response.payload.as_f64() != Some(3.0) {
        bail!("unexpected sum: {:?}", response);
    }
    info!(payload = %response.payload, "calc.sum");

    let response = client.call(&mut Request::new("time.get")).await?;
    if response.is_error() {
        bail!("time.get failed: {:?}", response.error);
    }
    info!(payload = %response.payload, "time.get");

    let response = client.call(&mut Request::new("/time/shouldTimeout")).await?;
    match &response.error {
        Some(err) if err.code == TRANSPORT_ERROR_CODE => {
            info!(message = %err.message, "time.shouldTimeout timed out as expected")
        }
        _ => bail!("time.shouldTimeout did not time out: {:?}", response),
    }

    let response = client
        .call(&mut Request::new("/time/shouldNotTimeout").with_timeout(SLOW_CALL_TIMEOUT))
        .await?;
    if response.is_error() {
        bail!("time.shouldNotTimeout failed: {:?}", response.error);
    }
    info!(payload = %response.payload, "time.shouldNotTimeout");

    // push based subscription
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    let sub = client
        .on(
            "topic",
            move |value| {
                let _ = tx.send(value);
            },
            false,
        )
        .await?;
    client
        .emit(&client.subject("topic"), &json!({"hello": "world"}))
        .await?;
    let event = rx.recv().await.context("no event received on topic")?;
    info!(%event, "topic");
    client.unsubscribe(sub).await?;

    // pull based subscription
    let (sub, consumer) = client.on_async("topic2", true).await?;
    client.emit(&client.subject("topic2"), "first").await?;
    client.emit(&client.subject("topic2"), "second").await?;
    for expected in ["first", "second"] {
        let event = consumer.consume().await.context("topic2 closed")?;
        if event != json!(expected) {
            bail!("unexpected event on topic2: {}", event);
        }
        info!(%event, "topic2");
    }
    client.unsubscribe(sub).await?;

    Ok(())
}

/// Run the demo: start the services, drive them from an `e2e` client and
/// close everything within `drain_timeout`.
pub async fn run_demo(config: ServiceConfiguration, drain_timeout: Duration) -> Result<()> {
    let transport = LocalTransport::new();
    let services = start_services(&transport, &config).await?;

    let client = Service::builder("e2e", Arc::new(transport.clone()))
        .with_configuration(config)
        .build()
        .context("failed to build client")?;
    client.on_close(|| info!("transport closed"));

    let outcome = run_scenario(&client).await;

    let close = async {
        client.close().await;
        for service in &services {
            service.close().await;
        }
    };
    if tokio::time::timeout(drain_timeout, close).await.is_err() {
        bail!("timeout waiting for services to close");
    }

    outcome
}

/// Entry point of the binary.
pub fn run(args: &Args) -> Result<()> {
    let mut loader = match args.config() {
        Some(path) => ConfigLoader::new(path).context("failed to load configuration")?,
        None => ConfigLoader::default(),
    };

    loader
        .tracing()
        .setup_tracing_subscriber()
        .context("failed to set up tracing")?;

    let config = args.apply(loader.service().context("invalid service configuration")?);
    config
        .validate()
        .context("invalid service configuration")?;

    let runtime_config = loader.runtime().clone();
    let rt = runtime::build(&runtime_config).context("failed to build runtime")?;
    info!(
        thread_name = runtime_config.thread_name(),
        "runtime started"
    );

    rt.runtime
        .block_on(run_demo(config, runtime_config.drain_timeout()))
}
