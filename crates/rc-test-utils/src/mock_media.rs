//! Mock media endpoint for relay testing.
//!
//! Counts negotiation calls and can be put into a failing mode where offers
//! are rejected, which is how media-plane outage handling is exercised.
//! Clones share state, so a test can hand one clone to the relay and keep
//! another for assertions.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use room_controller::errors::RcError;
use room_controller::signaling::MediaEndpoint;

#[derive(Debug, Default)]
struct Inner {
    fail_answers: bool,
    answer_calls: usize,
    candidate_calls: usize,
    release_calls: usize,
}

/// Mock implementation of `MediaEndpoint`.
#[derive(Debug, Clone)]
pub struct MockMediaEndpoint {
    inner: Arc<Mutex<Inner>>,
}

impl MockMediaEndpoint {
    /// Endpoint that answers every offer.
    #[must_use]
    pub fn answering() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Endpoint whose `create_answer` always fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                fail_answers: true,
                ..Inner::default()
            })),
        }
    }

    /// Number of `create_answer` calls, failed ones included.
    #[must_use]
    pub fn answer_calls(&self) -> usize {
        self.inner.lock().unwrap().answer_calls
    }

    /// Number of `apply_candidate` calls.
    #[must_use]
    pub fn candidate_calls(&self) -> usize {
        self.inner.lock().unwrap().candidate_calls
    }

    /// Number of `release` calls.
    #[must_use]
    pub fn release_calls(&self) -> usize {
        self.inner.lock().unwrap().release_calls
    }
}

#[async_trait]
impl MediaEndpoint for MockMediaEndpoint {
    async fn create_answer(
        &self,
        _user_id: &str,
        _room_id: Uuid,
        _offer: &Value,
    ) -> Result<Value, RcError> {
        let mut inner = self.inner.lock().unwrap();
        inner.answer_calls += 1;
        if inner.fail_answers {
            return Err(RcError::Negotiation("mock media endpoint is down".to_string()));
        }
        Ok(serde_json::json!({
            "type": "answer",
            "sdp": "v=0 mock",
        }))
    }

    async fn apply_candidate(
        &self,
        _user_id: &str,
        _room_id: Uuid,
        _candidate: &Value,
    ) -> Result<(), RcError> {
        self.inner.lock().unwrap().candidate_calls += 1;
        Ok(())
    }

    async fn release(&self, _user_id: &str) {
        self.inner.lock().unwrap().release_calls += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_answering_endpoint_counts_calls_across_clones() {
        let media = MockMediaEndpoint::answering();
        let clone = media.clone();

        let answer = clone
            .create_answer("alice", Uuid::new_v4(), &serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(answer.get("type").and_then(Value::as_str), Some("answer"));
        assert_eq!(media.answer_calls(), 1);
    }

    #[tokio::test]
    async fn test_failing_endpoint_rejects_offers_but_still_counts() {
        let media = MockMediaEndpoint::failing();

        let err = media
            .create_answer("alice", Uuid::new_v4(), &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, RcError::Negotiation(_)));
        assert_eq!(media.answer_calls(), 1);
    }
}
