// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! In-process broker.
//!
//! Services sharing one `LocalTransport` talk to each other exactly as they
//! would through a networked broker: subjects, queue groups and a
//! request/reply primitive with a timeout. Used by tests and the demo.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tracing::{debug, trace};

use super::{
    CloseCallback, MessageCallback, ReplyFn, RequestCallback, SubscriptionId, Transport,
    TransportError,
};

#[derive(Clone)]
enum Binding {
    Topic(MessageCallback),
    Request(RequestCallback),
}

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    group: Option<String>,
    binding: Binding,
}

#[derive(Default)]
struct LocalTransportInternal {
    /// subscriptions by subject, in registration order
    subjects: RwLock<HashMap<String, Vec<Subscription>>>,
    next_id: AtomicU64,
    round_robin: AtomicUsize,
    closed: AtomicBool,
    close_callbacks: Mutex<Vec<CloseCallback>>,
}

#[derive(Clone, Default)]
pub struct LocalTransport {
    internal: Arc<LocalTransportInternal>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.internal.closed.load(Ordering::Acquire)
    }

    /// Number of live subscriptions and handler bindings on `subject`.
    pub fn subscription_count(&self, subject: &str) -> usize {
        self.internal
            .subjects
            .read()
            .get(subject)
            .map_or(0, |subs| subs.len())
    }

    fn check_open(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn add(&self, subject: &str, group: Option<&str>, binding: Binding) -> SubscriptionId {
        let id = SubscriptionId(self.internal.next_id.fetch_add(1, Ordering::Relaxed));
        self.internal
            .subjects
            .write()
            .entry(subject.to_string())
            .or_default()
            .push(Subscription {
                id,
                group: group.map(str::to_string),
                binding,
            });
        id
    }

    /// Pick the receivers of one message: every ungrouped subscriber and a
    /// single member of each queue group.
    fn receivers(&self, subject: &str, requests: bool) -> Vec<Binding> {
        let subjects = self.internal.subjects.read();
        let Some(subs) = subjects.get(subject) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        let mut groups: Vec<(&str, Vec<&Subscription>)> = Vec::new();
        for sub in subs {
            if matches!(sub.binding, Binding::Request(_)) != requests {
                continue;
            }
            match &sub.group {
                None => out.push(sub.binding.clone()),
                Some(g) => match groups.iter_mut().find(|(name, _)| name == g) {
                    Some((_, members)) => members.push(sub),
                    None => groups.push((g.as_str(), vec![sub])),
                },
            }
        }

        for (_, members) in groups {
            let n = self.internal.round_robin.fetch_add(1, Ordering::Relaxed);
            out.push(members[n % members.len()].binding.clone());
        }
        out
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn listen(&self) -> Result<(), TransportError> {
        self.check_open()
    }

    async fn close(&self) {
        if self.internal.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("closing local transport");
        self.internal.subjects.write().clear();

        let callbacks = std::mem::take(&mut *self.internal.close_callbacks.lock());
        for callback in callbacks {
            callback();
        }
    }

    fn on_close(&self, callback: CloseCallback) {
        self.internal.close_callbacks.lock().push(callback);
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.check_open()?;

        // topic callbacks run inline so each subscriber sees publish order
        for binding in self.receivers(topic, false) {
            if let Binding::Topic(callback) = binding {
                callback(payload.clone());
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: Option<&str>,
        callback: MessageCallback,
    ) -> Result<SubscriptionId, TransportError> {
        self.check_open()?;
        let id = self.add(topic, group, Binding::Topic(callback));
        debug!(%topic, ?group, %id, "subscribed");
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), TransportError> {
        self.check_open()?;
        let mut subjects = self.internal.subjects.write();
        for subs in subjects.values_mut() {
            if let Some(pos) = subs.iter().position(|s| s.id == id) {
                subs.remove(pos);
                return Ok(());
            }
        }
        Err(TransportError::UnknownSubscription(id.0))
    }

    async fn handle(
        &self,
        route: &str,
        group: &str,
        callback: RequestCallback,
    ) -> Result<SubscriptionId, TransportError> {
        self.check_open()?;
        let id = self.add(route, Some(group), Binding::Request(callback));
        debug!(%route, %group, %id, "handler registered");
        Ok(id)
    }

    async fn request(
        &self,
        route: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        self.check_open()?;

        let (tx, rx) = oneshot::channel();
        // the first reply takes the sender, later ones find the slot empty.
        // holding the slot here keeps the channel open until the deadline
        // even if every handler drops its reply.
        let slot = Arc::new(Mutex::new(Some(tx)));

        for binding in self.receivers(route, true) {
            let Binding::Request(callback) = binding else {
                continue;
            };
            let reply_slot = slot.clone();
            let reply: ReplyFn = Box::new(move |bytes| match reply_slot.lock().take() {
                Some(tx) => {
                    let _ = tx.send(bytes);
                }
                None => trace!("late or duplicate reply discarded"),
            });
            tokio::spawn(callback(payload.clone(), reply));
        }

        let res = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(_)) => Err(TransportError::Failure(format!(
                "reply channel dropped: {}",
                route
            ))),
            Err(_) => {
                debug!(%route, ?timeout, "request timeout");
                Err(TransportError::Timeout(route.to_string()))
            }
        };
        slot.lock().take();
        res
    }
}
