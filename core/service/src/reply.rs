// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::errors::ServiceError;
use crate::response::Response;

/// Completion of one inbound call.
///
/// Every handler style completes through a `Reply`. Clones share the same
/// one-shot slot, so whichever clone sends first delivers the response and
/// any later send is a [`ServiceError::DuplicateReply`].
#[derive(Clone)]
pub struct Reply {
    route: Arc<str>,
    slot: Arc<Mutex<Option<oneshot::Sender<Response>>>>,
}

impl Reply {
    pub(crate) fn channel(route: &str) -> (Reply, oneshot::Receiver<Response>) {
        let (tx, rx) = oneshot::channel();
        let reply = Reply {
            route: Arc::from(route),
            slot: Arc::new(Mutex::new(Some(tx))),
        };
        (reply, rx)
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn is_sent(&self) -> bool {
        self.slot.lock().is_none()
    }

    /// Complete the call with `response`.
    ///
    /// Fails if the call was already completed or if the response is
    /// malformed. Either way the call is over: a malformed response is never
    /// delivered and the caller runs into its timeout.
    pub fn try_send(&self, response: Response) -> Result<(), ServiceError> {
        let tx = self
            .slot
            .lock()
            .take()
            .ok_or_else(|| ServiceError::DuplicateReply(self.route.to_string()))?;

        response.validate()?;

        if tx.send(response).is_err() {
            debug!(route = %self.route, "call dropped before reply");
        }
        Ok(())
    }

    /// Complete the call with `response`, panicking on a duplicate reply or a
    /// malformed response. Both are handler bugs.
    pub fn send(&self, response: Response) {
        if let Err(e) = self.try_send(response) {
            error!(route = %self.route, error = %e, "fatal reply error");
            panic!("{}", e);
        }
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reply")
            .field("route", &self.route)
            .field("sent", &self.is_sent())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::OrionError;

    #[tokio::test]
    async fn test_first_send_is_delivered() {
        let (reply, rx) = Reply::channel("calc.sum");
        assert!(!reply.is_sent());

        reply.try_send(Response::new(3)).unwrap();
        assert!(reply.is_sent());
        assert_eq!(rx.await.unwrap(), Response::new(3));
    }

    #[tokio::test]
    async fn test_duplicate_send_fails_on_any_clone() {
        let (reply, rx) = Reply::channel("calc.sum");
        let other = reply.clone();

        reply.try_send(Response::new(1)).unwrap();
        assert!(matches!(
            other.try_send(Response::new(2)),
            Err(ServiceError::DuplicateReply(route)) if route == "calc.sum"
        ));
        assert_eq!(rx.await.unwrap(), Response::new(1));
    }

    #[test]
    #[should_panic(expected = "reply already sent for route calc.sum")]
    fn test_send_panics_on_duplicate() {
        let (reply, _rx) = Reply::channel("calc.sum");
        reply.send(Response::new(1));
        reply.send(Response::new(2));
    }

    #[tokio::test]
    async fn test_malformed_response_is_not_delivered() {
        let (reply, rx) = Reply::channel("calc.sum");
        let mut err = OrionError::new("E", None);
        err.uuid.clear();

        assert!(matches!(
            reply.try_send(Response::error(err)),
            Err(ServiceError::ProtocolViolation(_))
        ));
        assert!(rx.await.is_err());
    }

    #[test]
    fn test_send_after_caller_left() {
        let (reply, rx) = Reply::channel("calc.sum");
        drop(rx);
        assert!(reply.try_send(Response::new(1)).is_ok());
    }
}
