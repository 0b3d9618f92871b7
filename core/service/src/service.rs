// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, warn};

use crate::codec::{Codec, CodecError};
use crate::config::ServiceConfiguration;
use crate::errors::ServiceError;
use crate::handler::{AsyncHandler, CallbackHandler, Handler, HandlerOptions};
use crate::logger::{GelfLogger, Level, Logger, TracingLogger};
use crate::producer::Producer;
use crate::reply::Reply;
use crate::request::{Request, TRACE_ID_KEY};
use crate::response::Response;
use crate::route;
use crate::tracer::{B3Tracer, LogRecorder, SpanKind, SpanRecorder, Tracer, ZipkinRecorder};
use crate::transport::{ReplyFn, RequestCallback, SubscriptionId, Transport};
use crate::utils::{ID_LEN, generate_id};

/// Assembles a [`Service`]. Collaborators that are not given explicitly are
/// built from the configuration.
pub struct ServiceBuilder {
    name: String,
    transport: Arc<dyn Transport>,
    config: ServiceConfiguration,
    codec: Option<Arc<dyn Codec>>,
    tracer: Option<Arc<dyn Tracer>>,
    logger: Option<Arc<dyn Logger>>,
}

impl ServiceBuilder {
    pub fn new(name: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        ServiceBuilder {
            name: name.into(),
            transport,
            config: ServiceConfiguration::default(),
            codec: None,
            tracer: None,
            logger: None,
        }
    }

    pub fn with_configuration(self, config: ServiceConfiguration) -> Self {
        ServiceBuilder { config, ..self }
    }

    pub fn with_codec(self, codec: Arc<dyn Codec>) -> Self {
        ServiceBuilder {
            codec: Some(codec),
            ..self
        }
    }

    pub fn with_tracer(self, tracer: Arc<dyn Tracer>) -> Self {
        ServiceBuilder {
            tracer: Some(tracer),
            ..self
        }
    }

    pub fn with_logger(self, logger: Arc<dyn Logger>) -> Self {
        ServiceBuilder {
            logger: Some(logger),
            ..self
        }
    }

    pub fn build(self) -> Result<Service, ServiceError> {
        if self.name.is_empty() {
            return Err(ServiceError::ConfigError(
                "service name must not be empty".to_string(),
            ));
        }
        self.config.validate()?;

        let codec = match self.codec {
            Some(codec) => codec,
            None => Arc::from(self.config.codec.build()),
        };

        let tracer = match self.tracer {
            Some(tracer) => tracer,
            None => {
                let recorder: Arc<dyn SpanRecorder> = match &self.config.tracer_endpoint {
                    Some(endpoint) => Arc::new(ZipkinRecorder::new(endpoint)?),
                    None => Arc::new(LogRecorder),
                };
                Arc::new(
                    B3Tracer::new(self.name.as_str())
                        .with_sampled(self.config.sampled)
                        .with_recorder(recorder),
                )
            }
        };

        let logger: Arc<dyn Logger> = match (self.logger, &self.config.logger) {
            (Some(logger), _) => logger,
            (None, Some(sink)) => Arc::new(GelfLogger::new(
                self.name.as_str(),
                &sink.host,
                sink.port,
            )?),
            (None, None) => Arc::new(TracingLogger::new(self.name.as_str())),
        };

        let id = generate_id(ID_LEN);
        debug!(name = %self.name, %id, "service built");

        Ok(Service {
            inner: Arc::new(ServiceInner {
                route_timeouts: self.config.route_timeouts(),
                name: self.name,
                id,
                config: self.config,
                codec,
                transport: self.transport,
                tracer,
                logger,
                consumers: Mutex::new(HashMap::new()),
            }),
        })
    }
}

struct ServiceInner {
    name: String,
    id: String,
    config: ServiceConfiguration,
    /// per-route timeouts keyed by normalized route
    route_timeouts: HashMap<String, Duration>,
    codec: Arc<dyn Codec>,
    transport: Arc<dyn Transport>,
    tracer: Arc<dyn Tracer>,
    logger: Arc<dyn Logger>,
    /// queues fed by `on_async` subscriptions, closed on unsubscribe
    consumers: Mutex<HashMap<SubscriptionId, Producer<Value>>>,
}

/// A named participant on the transport: calls other services, serves
/// requests and exchanges topic events.
///
/// Cloning is cheap and clones share everything.
#[derive(Clone)]
pub struct Service {
    inner: Arc<ServiceInner>,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.inner.name)
            .field("id", &self.inner.id)
            .field("config", &self.inner.config)
            .finish()
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.inner.name, self.inner.id)
    }
}

impl Service {
    pub fn builder(name: impl Into<String>, transport: Arc<dyn Transport>) -> ServiceBuilder {
        ServiceBuilder::new(name, transport)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn configuration(&self) -> &ServiceConfiguration {
        &self.inner.config
    }

    pub fn logger(&self) -> &dyn Logger {
        self.inner.logger.as_ref()
    }

    /// Subject the subscriptions of this service listen on for `topic`.
    pub fn subject(&self, topic: &str) -> String {
        route::subject(&self.inner.name, topic)
    }

    pub async fn listen(&self) -> Result<(), ServiceError> {
        debug!(service = %self, "listen");
        Ok(self.inner.transport.listen().await?)
    }

    pub async fn close(&self) {
        debug!(service = %self, "close");
        self.inner.transport.close().await;
        for (_, producer) in self.inner.consumers.lock().drain() {
            producer.close();
        }
    }

    pub fn on_close<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let name = self.to_string();
        self.inner.transport.on_close(Box::new(move || {
            debug!(service = %name, "connection closed");
            callback();
        }));
    }

    /// Subscribe to `topic` of this service. Unless `disable_group` is set,
    /// replicas of the service share the messages, each delivered to one of
    /// them only.
    pub async fn on<F>(
        &self,
        topic: &str,
        callback: F,
        disable_group: bool,
    ) -> Result<SubscriptionId, ServiceError>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let subject = self.subject(topic);
        let group = (!disable_group).then_some(self.inner.name.as_str());
        debug!(%subject, ?group, "on");

        let codec = self.inner.codec.clone();
        let id = self
            .inner
            .transport
            .subscribe(
                &subject,
                group,
                Arc::new(move |bytes: Vec<u8>| {
                    callback(codec.decode(&bytes).unwrap_or(Value::Null));
                }),
            )
            .await?;
        Ok(id)
    }

    /// Like [`Service::on`], with messages queued for pull-based consumption.
    /// Unsubscribing closes the queue, waking pending consumers with `None`.
    pub async fn on_async(
        &self,
        topic: &str,
        disable_group: bool,
    ) -> Result<(SubscriptionId, Producer<Value>), ServiceError> {
        let producer = Producer::new();
        let sink = producer.clone();
        let id = self
            .on(topic, move |value| sink.produce(value), disable_group)
            .await?;
        self.inner.consumers.lock().insert(id, producer.clone());
        Ok((id, producer))
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), ServiceError> {
        let res = self.inner.transport.unsubscribe(id).await;
        if let Some(producer) = self.inner.consumers.lock().remove(&id) {
            producer.close();
        }
        Ok(res?)
    }

    /// Publish `payload` on `topic`. The topic is used as given, so events
    /// for another service are addressed as `service:topic`.
    pub async fn emit<T>(&self, topic: &str, payload: &T) -> Result<(), ServiceError>
    where
        T: Serialize + ?Sized,
    {
        debug!(%topic, "emit");
        let value = serde_json::to_value(payload).map_err(CodecError::from)?;
        let bytes = self.inner.codec.encode(&value)?;
        Ok(self.inner.transport.publish(topic, bytes).await?)
    }

    /// Timeout of `request`: its own, else the one configured for its
    /// route, else the default.
    pub fn resolve_timeout(&self, request: &Request) -> Duration {
        request
            .timeout
            .or_else(|| {
                self.inner
                    .route_timeouts
                    .get(&route::normalize(&request.path))
                    .copied()
            })
            .unwrap_or(self.inner.config.timeout)
    }

    /// Call the handler bound to `request.path`.
    ///
    /// The trace headers go out on a copy of the request, so the inbound
    /// context of `request` stays the parent of every call made with it.
    /// Only its trace id is written back. Timeouts and transport failures
    /// come back as a response carrying an `ORION_TRANSPORT` error. An
    /// empty route fails before anything is sent.
    pub async fn call(&self, request: &mut Request) -> Result<Response, ServiceError> {
        let route = route::resolve(&request.path, self.inner.config.service.as_deref())?;
        let timeout = self.resolve_timeout(request);

        let mut outbound = request.clone();
        let span = self.inner.tracer.trace(&mut outbound);
        if let Some(trace_id) = outbound.id() {
            request
                .meta
                .insert(TRACE_ID_KEY.to_string(), trace_id.to_string());
        }

        let bytes = match outbound
            .to_envelope()
            .and_then(|envelope| Ok(self.inner.codec.encode(&envelope)?))
        {
            Ok(bytes) => bytes,
            Err(e) => {
                span.close();
                return Err(e);
            }
        };

        debug!(%route, ?timeout, trace_id = ?request.id(), "calling");
        let response = match self
            .inner
            .transport
            .request(&route, bytes, timeout)
            .instrument(span.span().clone())
            .await
        {
            Ok(bytes) => self.decode_response(&route, &bytes),
            Err(e) => {
                debug!(%route, error = %e, "call failed");
                Response::transport_failure(&e)
            }
        };
        span.close();

        Ok(response)
    }

    /// Callback flavour of [`Service::call`]. The call runs on its own task.
    pub fn call_with_callback<F>(&self, request: Request, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<Response, ServiceError>) + Send + 'static,
    {
        let service = self.clone();
        tokio::spawn(async move {
            let mut request = request;
            callback(service.call(&mut request).await);
        })
    }

    fn decode_response(&self, route: &str, bytes: &[u8]) -> Response {
        match self
            .inner
            .codec
            .decode(bytes)
            .and_then(Response::from_envelope)
        {
            Some(response) => response,
            None => {
                warn!(%route, size = bytes.len(), "undecodable response");
                Response::default()
            }
        }
    }

    /// Serve `path` with a handler completing through its [`Reply`].
    pub async fn handle<F>(&self, path: &str, handler: F) -> Result<SubscriptionId, ServiceError>
    where
        F: Fn(Request, Reply) + Send + Sync + 'static,
    {
        self.register(path, HandlerOptions::default(), CallbackHandler(handler))
            .await
    }

    pub async fn handle_without_logging<F>(
        &self,
        path: &str,
        handler: F,
    ) -> Result<SubscriptionId, ServiceError>
    where
        F: Fn(Request, Reply) + Send + Sync + 'static,
    {
        self.register(path, HandlerOptions::without_logging(), CallbackHandler(handler))
            .await
    }

    /// Serve `path` with a handler resolving to its response.
    pub async fn handle_async<F, Fut>(
        &self,
        path: &str,
        handler: F,
    ) -> Result<SubscriptionId, ServiceError>
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.register(path, HandlerOptions::default(), AsyncHandler(handler))
            .await
    }

    /// Bind `handler` on `{prefix}.{path}`, the prefix being the service
    /// name unless set in `options`. Replicas of the service share the
    /// load of a route.
    pub async fn register<H>(
        &self,
        path: &str,
        options: HandlerOptions,
        handler: H,
    ) -> Result<SubscriptionId, ServiceError>
    where
        H: Handler,
    {
        let prefix = options.prefix.as_deref().unwrap_or(&self.inner.name);
        let route = format!("{}.{}", prefix, path);
        debug!(%route, logging = options.logging, "register handler");

        let dispatcher = Arc::new(Dispatcher {
            route: route.clone(),
            path: path.to_string(),
            logging: options.logging,
            codec: self.inner.codec.clone(),
            tracer: self.inner.tracer.clone(),
            logger: self.inner.logger.clone(),
            handler: Arc::new(handler),
        });

        let callback: RequestCallback = Arc::new(move |bytes: Vec<u8>, send: ReplyFn| {
            dispatcher.clone().dispatch(bytes, send).boxed()
        });

        Ok(self
            .inner
            .transport
            .handle(&route, &self.inner.name, callback)
            .await?)
    }
}

/// Serves the inbound requests of one route.
struct Dispatcher {
    route: String,
    path: String,
    logging: bool,
    codec: Arc<dyn Codec>,
    tracer: Arc<dyn Tracer>,
    logger: Arc<dyn Logger>,
    handler: Arc<dyn Handler>,
}

impl Dispatcher {
    async fn dispatch(self: Arc<Self>, bytes: Vec<u8>, send: ReplyFn) {
        let mut request = Request::from_envelope(self.codec.decode(&bytes));
        let span = self.tracer.start_span(&mut request, SpanKind::Server);
        let trace_id = request.id().map(str::to_string);

        if self.logging {
            self.logger
                .create_message(&self.path)
                .set_level(Level::Info)
                .set_id(trace_id.as_deref())
                .set_params(request.params())
                .send();
        }
        debug!(route = %self.route, trace_id = ?trace_id, "incoming request");

        let (reply, rx) = Reply::channel(&self.route);
        // the handler runs on its own task so that a fatal second reply
        // cannot take the delivery of the first one down with it
        let handler = self.handler.clone();
        tokio::spawn(
            async move { handler.call(request, reply).await }.instrument(span.span().clone()),
        );

        let response = match rx.await {
            Ok(response) => response,
            Err(_) => {
                warn!(route = %self.route, trace_id = ?trace_id, "handler finished without replying");
                span.close();
                return;
            }
        };

        if self.logging {
            if let Some(err) = &response.error {
                self.logger
                    .create_message(&self.path)
                    .set_level(Level::Error)
                    .set_id(trace_id.as_deref())
                    .set_params(err)
                    .send();
            }
        }

        match response
            .to_envelope()
            .and_then(|envelope| Ok(self.codec.encode(&envelope)?))
        {
            Ok(bytes) => send(bytes),
            Err(e) => error!(route = %self.route, error = %e, "cannot encode response"),
        }
        span.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::tests::MemoryLogger;
    use crate::response::{OrionError, TRANSPORT_ERROR_CODE};
    use crate::transport::LocalTransport;
    use serde_json::json;

    fn service(name: &str, transport: &LocalTransport) -> Service {
        ServiceBuilder::new(name, Arc::new(transport.clone()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_identity() {
        let transport = LocalTransport::new();
        let svc = service("calc", &transport);
        assert_eq!(svc.name(), "calc");
        assert_eq!(svc.id().len(), ID_LEN);
        assert_eq!(svc.to_string(), format!("calc-{}", svc.id()));
        assert_eq!(svc.subject("topic"), "calc:topic");

        let other = service("calc", &transport);
        assert_ne!(svc.id(), other.id());
    }

    #[test]
    fn test_build_rejects_invalid_configuration() {
        let transport = Arc::new(LocalTransport::new());
        assert!(ServiceBuilder::new("", transport.clone()).build().is_err());
        assert!(
            ServiceBuilder::new("calc", transport)
                .with_configuration(ServiceConfiguration::new().with_timeout(Duration::ZERO))
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_timeout_resolution() {
        let transport = LocalTransport::new();
        let svc = ServiceBuilder::new("client", Arc::new(transport))
            .with_configuration(
                ServiceConfiguration::new()
                    .with_timeout(Duration::from_millis(200))
                    .with_route_timeout("/calc/sum", Duration::from_millis(300)),
            )
            .build()
            .unwrap();

        let req = Request::new("calc.sum");
        assert_eq!(svc.resolve_timeout(&req), Duration::from_millis(300));

        let req = Request::new("/calc/sum").with_timeout(Duration::from_millis(50));
        assert_eq!(svc.resolve_timeout(&req), Duration::from_millis(50));

        let req = Request::new("/calc/other");
        assert_eq!(svc.resolve_timeout(&req), Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_call_round_trip() {
        let transport = LocalTransport::new();
        let calc = service("calc", &transport);
        let client = service("client", &transport);

        calc.handle("sum", |req, reply| {
            let a = req.params()["a"].as_i64().unwrap_or_default();
            let b = req.params()["b"].as_i64().unwrap_or_default();
            reply.send(Response::new(a + b));
        })
        .await
        .unwrap();

        let mut req = Request::new("/calc/sum").with_params(json!({"a": 1, "b": 2}));
        let res = client.call(&mut req).await.unwrap();
        assert_eq!(res.payload, json!(3));
        assert!(res.error.is_none());
        assert!(req.id().is_some());
    }

    #[tokio::test]
    async fn test_call_with_namespace() {
        let transport = LocalTransport::new();
        let calc = service("calc", &transport);
        calc.register(
            "sum",
            HandlerOptions::default().with_prefix("ns.calc"),
            AsyncHandler(|_: Request| async { Response::new("namespaced") }),
        )
        .await
        .unwrap();

        let client = ServiceBuilder::new("client", Arc::new(transport.clone()))
            .with_configuration(ServiceConfiguration::new().with_namespace("ns"))
            .build()
            .unwrap();
        let res = client.call(&mut Request::new("/calc/sum")).await.unwrap();
        assert_eq!(res.payload, json!("namespaced"));
    }

    #[tokio::test]
    async fn test_invalid_path() {
        let transport = LocalTransport::new();
        let client = service("client", &transport);
        let mut req = Request::new("/");
        assert!(matches!(
            client.call(&mut req).await,
            Err(ServiceError::InvalidPath(_))
        ));
        // never traced either
        assert_eq!(req.id(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_response() {
        let transport = LocalTransport::new();
        let client = service("client", &transport);

        let res = client
            .call(&mut Request::new("/nobody/home"))
            .await
            .unwrap();
        assert_eq!(res.payload, Value::Null);
        assert_eq!(res.error.unwrap().code, TRANSPORT_ERROR_CODE);
    }

    #[tokio::test]
    async fn test_call_with_callback() {
        let transport = LocalTransport::new();
        let time = service("time", &transport);
        time.handle_async("get", |_| async { Response::new("now") })
            .await
            .unwrap();

        let client = service("client", &transport);
        let (tx, rx) = tokio::sync::oneshot::channel();
        client
            .call_with_callback(Request::new("/time/get"), move |res| {
                let _ = tx.send(res);
            })
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap().unwrap().payload, json!("now"));
    }

    #[tokio::test]
    async fn test_handler_logging() {
        let transport = LocalTransport::new();
        let logger = Arc::new(MemoryLogger::default());
        let calc = ServiceBuilder::new("calc", Arc::new(transport.clone()))
            .with_logger(logger.clone())
            .build()
            .unwrap();
        calc.handle("fail", |_, reply| {
            reply.send(Response::error(OrionError::new("404", Some("Not Found"))));
        })
        .await
        .unwrap();
        calc.handle_without_logging("quiet", |_, reply| {
            reply.send(Response::error(OrionError::new("500", None)));
        })
        .await
        .unwrap();

        let client = service("client", &transport);
        let mut req = Request::new("/calc/fail").with_params(json!({"x": 1}));
        let res = client.call(&mut req).await.unwrap();
        assert_eq!(res.error.as_ref().unwrap().code, "404");
        client.call(&mut Request::new("/calc/quiet")).await.unwrap();

        let records = logger.records.lock();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].message, "fail");
        assert_eq!(records[0].level, Some(Level::Info));
        assert_eq!(records[0].params, Some(json!({"x": 1})));
        assert_eq!(records[0].trace_id.as_deref(), req.id());
        assert_eq!(records[1].level, Some(Level::Error));
        assert_eq!(records[1].params.as_ref().unwrap()["code"], "404");
    }

    #[tokio::test]
    async fn test_emit_and_on() {
        let transport = LocalTransport::new();
        let listener = service("examples", &transport);
        let (_, events) = listener.on_async("node", false).await.unwrap();

        let emitter = service("emitter", &transport);
        emitter
            .emit("examples:node", &json!({"nested": {"n": 1}}))
            .await
            .unwrap();
        // other subjects are not delivered
        emitter.emit("examples:go", &json!(2)).await.unwrap();
        emitter.emit("examples:node", &json!(3)).await.unwrap();

        assert_eq!(events.consume().await, Some(json!({"nested": {"n": 1}})));
        assert_eq!(events.consume().await, Some(json!(3)));
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let transport = LocalTransport::new();
        let listener = service("examples", &transport);
        let (id, events) = listener.on_async("node", true).await.unwrap();
        listener.unsubscribe(id).await.unwrap();

        listener.emit("examples:node", &1).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_wakes_waiting_consumer() {
        let transport = LocalTransport::new();
        let listener = service("examples", &transport);
        let (id, events) = listener.on_async("node", true).await.unwrap();

        let consumer = events.clone();
        let waiting = tokio::spawn(async move { consumer.consume().await });
        while events.waiting() == 0 {
            tokio::task::yield_now().await;
        }

        listener.unsubscribe(id).await.unwrap();
        assert_eq!(waiting.await.unwrap(), None);
        // a second unsubscribe is unknown to the transport
        assert!(listener.unsubscribe(id).await.is_err());

        let (_, events) = listener.on_async("other", true).await.unwrap();
        listener.close().await;
        assert_eq!(events.consume().await, None);
    }
}
