//! Seam between signaling and the media plane.
//!
//! The relay tracks negotiation phase and candidate accumulation; producing
//! an actual answer descriptor and wiring up the audio path belongs to the
//! media plane behind this trait.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::RcError;

/// Media-plane operations the relay needs during negotiation.
#[async_trait]
pub trait MediaEndpoint: Send + Sync {
    /// Produce the local answer descriptor for a remote offer. Called again
    /// for the same user on renegotiation.
    async fn create_answer(
        &self,
        user_id: &str,
        room_id: Uuid,
        offer: &Value,
    ) -> Result<Value, RcError>;

    /// Feed one remote ICE candidate into the media path.
    async fn apply_candidate(
        &self,
        user_id: &str,
        room_id: Uuid,
        candidate: &Value,
    ) -> Result<(), RcError>;

    /// Tear down media resources held for `user_id`. Must be idempotent.
    async fn release(&self, user_id: &str);
}

/// Media endpoint backed by a fixed mixer descriptor.
///
/// The audio mixer in front of this service listens on a stable address, so
/// every negotiation gets the same operator-provided answer descriptor and
/// trickle candidates need no per-user handling. Deployments without a
/// configured descriptor reject offers instead of handing out a dead path.
pub struct StaticDescriptorEndpoint {
    descriptor: Option<String>,
}

impl StaticDescriptorEndpoint {
    pub fn new(descriptor: Option<String>) -> Self {
        StaticDescriptorEndpoint { descriptor }
    }
}

#[async_trait]
impl MediaEndpoint for StaticDescriptorEndpoint {
    async fn create_answer(
        &self,
        user_id: &str,
        room_id: Uuid,
        _offer: &Value,
    ) -> Result<Value, RcError> {
        let sdp = self.descriptor.as_ref().ok_or_else(|| {
            tracing::warn!(
                target: "rc.signaling",
                user_id = %user_id,
                room_id = %room_id,
                "offer received but no mixer descriptor is configured"
            );
            RcError::Negotiation("media endpoint is not configured".to_string())
        })?;

        Ok(serde_json::json!({
            "type": "answer",
            "sdp": sdp,
        }))
    }

    async fn apply_candidate(
        &self,
        _user_id: &str,
        _room_id: Uuid,
        _candidate: &Value,
    ) -> Result<(), RcError> {
        // The mixer's address is fixed; inbound trickle candidates carry no
        // information it needs.
        Ok(())
    }

    async fn release(&self, _user_id: &str) {}
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_endpoint_answers_with_configured_descriptor() {
        let endpoint = StaticDescriptorEndpoint::new(Some("v=0 mixer".to_string()));
        let offer = serde_json::json!({"type": "offer", "sdp": "v=0 client"});

        let answer = endpoint
            .create_answer("alice", Uuid::new_v4(), &offer)
            .await
            .unwrap();

        assert_eq!(answer.get("type").and_then(Value::as_str), Some("answer"));
        assert_eq!(answer.get("sdp").and_then(Value::as_str), Some("v=0 mixer"));
    }

    #[tokio::test]
    async fn test_static_endpoint_without_descriptor_rejects_offers() {
        let endpoint = StaticDescriptorEndpoint::new(None);
        let offer = serde_json::json!({"type": "offer", "sdp": "v=0 client"});

        let err = endpoint
            .create_answer("alice", Uuid::new_v4(), &offer)
            .await
            .unwrap_err();
        assert!(matches!(err, RcError::Negotiation(_)));
    }
}
