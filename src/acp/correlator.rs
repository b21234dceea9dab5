//! Request/response correlation.
//!
//! The [`Correlator`] owns the table of outstanding requests. Each registered
//! id gets a single-resolution [`PendingResponse`]; the first matching inbound
//! Response settles it and removes the entry. Duplicate or unmatched Responses
//! are ignored. Entries survive reconnects: nothing here times out.

use super::frame::{RequestId, Response, RpcError};
use crate::error::{ConnectionError, Error, Result};

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::oneshot;

type Completion = std::result::Result<Value, RpcError>;

#[derive(Debug, Default)]
pub struct Correlator {
    pending: HashMap<RequestId, oneshot::Sender<Completion>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `id` and hand back the handle that settles when its Response arrives.
    pub fn register(&mut self, id: RequestId) -> PendingResponse {
        let (sender, receiver) = oneshot::channel();
        if self.pending.insert(id.clone(), sender).is_some() {
            tracing::warn!(request_id = %id, "request id registered twice, dropping older waiter");
        }
        PendingResponse { id, receiver }
    }

    /// Settle the waiter for `response.id`. Returns `false` when nothing was waiting.
    pub fn resolve(&mut self, response: Response) -> bool {
        let Some(sender) = self.pending.remove(&response.id) else {
            tracing::debug!(request_id = %response.id, "ignoring response with no pending request");
            return false;
        };

        if sender.send(response.outcome).is_err() {
            tracing::debug!(request_id = %response.id, "response arrived after waiter went away");
        }
        true
    }

    /// Drop the waiter for `id` without settling it, e.g. when its Request was never sent.
    pub fn forget(&mut self, id: &RequestId) -> bool {
        self.pending.remove(id).is_some()
    }

    /// Drop every waiter; each fails with [`ConnectionError::Closed`].
    pub fn abandon_all(&mut self) -> usize {
        let abandoned = self.pending.len();
        self.pending.clear();
        abandoned
    }

    pub fn is_pending(&self, id: &RequestId) -> bool {
        self.pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Completion handle for one outstanding request.
#[derive(Debug)]
pub struct PendingResponse {
    id: RequestId,
    receiver: oneshot::Receiver<Completion>,
}

impl PendingResponse {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Wait for the raw result value. A protocol error surfaces as [`Error::Rpc`].
    pub async fn value(self) -> Result<Value> {
        let id = self.id;
        match self.receiver.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(error.into()),
            Err(_) => Err(ConnectionError::Closed { id: id.to_string() }.into()),
        }
    }

    /// Wait for the result and decode it into `T`.
    pub async fn decode<T: DeserializeOwned>(self, method: &str) -> Result<T> {
        let value = self.value().await?;
        serde_json::from_value(value).map_err(|source| Error::Decode {
            method: method.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acp::types::PromptResult;
    use serde_json::json;

    fn ok(id: i64, result: Value) -> Response {
        Response {
            id: RequestId::Number(id),
            outcome: Ok(result),
        }
    }

    #[tokio::test]
    async fn matching_response_resolves_and_removes_entry() {
        let mut correlator = Correlator::new();
        let pending = correlator.register(RequestId::Number(1));
        assert!(correlator.is_pending(&RequestId::Number(1)));

        assert!(correlator.resolve(ok(1, json!({"stopReason": "end_turn"}))));
        assert!(correlator.is_empty());

        let result: PromptResult = pending.decode("session/prompt").await.expect("resolved");
        assert_eq!(result.stop_reason.as_deref(), Some("end_turn"));
    }

    #[tokio::test]
    async fn duplicate_response_is_ignored() {
        let mut correlator = Correlator::new();
        let pending = correlator.register(RequestId::Number(5));

        assert!(correlator.resolve(ok(5, json!("first"))));
        assert!(!correlator.resolve(ok(5, json!("second"))));

        assert_eq!(pending.value().await.expect("resolved"), json!("first"));
    }

    #[tokio::test]
    async fn unmatched_response_is_not_an_error() {
        let mut correlator = Correlator::new();
        let _pending = correlator.register(RequestId::Number(2));

        assert!(!correlator.resolve(ok(99, json!(null))));
        assert_eq!(correlator.len(), 1);
    }

    #[tokio::test]
    async fn each_response_settles_at_most_one_request() {
        let mut correlator = Correlator::new();
        let first = correlator.register(RequestId::Number(1));
        let second = correlator.register(RequestId::Number(2));

        // Out of order arrival.
        assert!(correlator.resolve(ok(2, json!("two"))));
        assert!(correlator.is_pending(&RequestId::Number(1)));
        assert!(correlator.resolve(ok(1, json!("one"))));

        assert_eq!(first.value().await.expect("first"), json!("one"));
        assert_eq!(second.value().await.expect("second"), json!("two"));
    }

    #[tokio::test]
    async fn error_response_rejects_with_verbatim_code() {
        let mut correlator = Correlator::new();
        let pending = correlator.register(RequestId::Number(3));

        correlator.resolve(Response {
            id: RequestId::Number(3),
            outcome: Err(RpcError::new(-32000, "authentication required")),
        });

        match pending.value().await {
            Err(Error::Rpc { code, message }) => {
                assert_eq!(code, -32000);
                assert_eq!(message, "authentication required");
            }
            other => panic!("expected rpc error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn mismatched_result_shape_is_a_decode_error() {
        let mut correlator = Correlator::new();
        let pending = correlator.register(RequestId::Number(4));
        correlator.resolve(ok(4, json!({"unexpected": true})));

        let error = pending
            .decode::<crate::acp::types::SessionNewResult>("session/new")
            .await
            .expect_err("missing sessionId must fail");
        assert!(matches!(error, Error::Decode { ref method, .. } if method == "session/new"));
    }

    #[tokio::test]
    async fn forgotten_request_reports_closed() {
        let mut correlator = Correlator::new();
        let pending = correlator.register(RequestId::Number(6));
        assert!(correlator.forget(&RequestId::Number(6)));
        assert!(!correlator.resolve(ok(6, json!(null))));

        let error = pending.value().await.expect_err("sender dropped");
        assert!(matches!(
            error,
            Error::Connection(ConnectionError::Closed { ref id }) if id == "6"
        ));
    }

    #[tokio::test]
    async fn abandoned_requests_report_closed() {
        let mut correlator = Correlator::new();
        let first = correlator.register(RequestId::Number(1));
        let second = correlator.register(RequestId::Number(2));

        assert_eq!(correlator.abandon_all(), 2);
        assert!(correlator.is_empty());
        assert!(first.value().await.is_err());
        assert!(matches!(
            second.value().await,
            Err(Error::Connection(ConnectionError::Closed { .. }))
        ));
    }

    #[test]
    fn unresolved_request_stays_pending() {
        let mut correlator = Correlator::new();
        let pending = correlator.register(RequestId::Number(8));
        assert_eq!(pending.id(), &RequestId::Number(8));

        let mut waiter = tokio_test::task::spawn(pending.value());
        tokio_test::assert_pending!(waiter.poll());
        assert_eq!(correlator.len(), 1);
    }
}
