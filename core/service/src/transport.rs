// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Transport contract.
//!
//! The transport owns connection management, subject routing, queue-group
//! load balancing and the matching of a reply to its request. The service
//! facade only hands it encoded bytes, a timeout and callbacks.

pub mod local;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;

pub use local::LocalTransport;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport timeout: {0}")]
    Timeout(String),
    #[error("transport connection closed")]
    Closed,
    #[error("unknown subscription: {0}")]
    UnknownSubscription(u64),
    #[error("transport failure: {0}")]
    Failure(String),
}

/// Handle of a registered subscription or handler binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receives every message published on a subscribed topic.
pub type MessageCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Sends the encoded reply of one inbound request back to its caller.
pub type ReplyFn = Box<dyn FnOnce(Vec<u8>) + Send>;

/// Serves one inbound request. The future runs on its own task.
pub type RequestCallback = Arc<dyn Fn(Vec<u8>, ReplyFn) -> BoxFuture<'static, ()> + Send + Sync>;

pub type CloseCallback = Box<dyn FnOnce() + Send>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Resolves once the connection is ready to serve traffic.
    async fn listen(&self) -> Result<(), TransportError>;

    async fn close(&self);

    /// Register a callback fired once when the connection closes.
    fn on_close(&self, callback: CloseCallback);

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Subscribe to `topic`. With a group, each message goes to one member
    /// of the group only.
    async fn subscribe(
        &self,
        topic: &str,
        group: Option<&str>,
        callback: MessageCallback,
    ) -> Result<SubscriptionId, TransportError>;

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), TransportError>;

    /// Bind a request handler on `route` inside the load-balancing `group`.
    async fn handle(
        &self,
        route: &str,
        group: &str,
        callback: RequestCallback,
    ) -> Result<SubscriptionId, TransportError>;

    /// Send a request and wait for the first reply, at most `timeout`.
    async fn request(
        &self,
        route: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError>;
}
