// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Request handler adapters.
//!
//! A handler either completes the call through the [`Reply`] it is given or
//! returns a future resolving to the [`Response`]. Both shapes are adapted
//! to [`Handler`], which the service drives uniformly.

use std::future::Future;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::reply::Reply;
use crate::request::Request;
use crate::response::Response;

pub trait Handler: Send + Sync + 'static {
    fn call(&self, request: Request, reply: Reply) -> BoxFuture<'static, ()>;
}

/// Handler completing the call through its reply, possibly later from
/// another task.
pub struct CallbackHandler<F>(pub F);

impl<F> Handler for CallbackHandler<F>
where
    F: Fn(Request, Reply) + Send + Sync + 'static,
{
    fn call(&self, request: Request, reply: Reply) -> BoxFuture<'static, ()> {
        (self.0)(request, reply);
        futures::future::ready(()).boxed()
    }
}

/// Handler resolving to its response.
pub struct AsyncHandler<F>(pub F);

impl<F, Fut> Handler for AsyncHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn call(&self, request: Request, reply: Reply) -> BoxFuture<'static, ()> {
        let fut = (self.0)(request);
        async move {
            reply.send(fut.await);
        }
        .boxed()
    }
}

/// Registration options of a handler.
#[derive(Debug, Clone)]
pub struct HandlerOptions {
    /// log inbound requests and failed responses
    pub logging: bool,
    /// route prefix, the service name when unset
    pub prefix: Option<String>,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        HandlerOptions {
            logging: true,
            prefix: None,
        }
    }
}

impl HandlerOptions {
    pub fn without_logging() -> Self {
        HandlerOptions {
            logging: false,
            ..Default::default()
        }
    }

    pub fn with_prefix(self, prefix: impl Into<String>) -> Self {
        HandlerOptions {
            prefix: Some(prefix.into()),
            ..self
        }
    }
}
