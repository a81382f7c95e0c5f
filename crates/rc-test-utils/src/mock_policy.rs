//! Scriptable access policy for authorization testing.
//!
//! Allows everything by default; specific users can be denied up front.
//! Every `authorize` call is recorded so tests can assert that the check
//! actually ran before the guarded operation.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use room_controller::errors::RcError;
use room_controller::policy::{AccessPolicy, RoomAction};

#[derive(Debug, Default)]
struct Inner {
    denied_users: HashSet<String>,
    /// (user_id, room_id, action) per authorize call, in order.
    calls: Vec<(String, Uuid, RoomAction)>,
}

/// Mock implementation of `AccessPolicy`.
#[derive(Debug, Clone)]
pub struct MockPolicy {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MockPolicy {
    fn default() -> Self {
        Self::allowing()
    }
}

impl MockPolicy {
    /// Policy that allows every action.
    #[must_use]
    pub fn allowing() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Deny all actions by `user_id` from now on.
    pub fn deny_user(&self, user_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.denied_users.insert(user_id.to_string());
    }

    /// Total number of `authorize` calls.
    #[must_use]
    pub fn authorize_calls(&self) -> usize {
        self.inner.lock().unwrap().calls.len()
    }

    /// Actions checked for `user_id`, in call order.
    #[must_use]
    pub fn actions_for(&self, user_id: &str) -> Vec<RoomAction> {
        let inner = self.inner.lock().unwrap();
        inner
            .calls
            .iter()
            .filter(|(user, _, _)| user == user_id)
            .map(|(_, _, action)| *action)
            .collect()
    }
}

#[async_trait]
impl AccessPolicy for MockPolicy {
    async fn authorize(
        &self,
        user_id: &str,
        room_id: Uuid,
        action: RoomAction,
    ) -> Result<(), RcError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push((user_id.to_string(), room_id, action));
        if inner.denied_users.contains(user_id) {
            return Err(RcError::Forbidden(format!(
                "user {user_id} may not {} this room",
                action.as_str()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_denied_user_is_rejected_and_recorded() {
        let policy = MockPolicy::allowing();
        policy.deny_user("mallory");

        let room = Uuid::new_v4();
        assert!(policy.authorize("alice", room, RoomAction::Join).await.is_ok());
        let err = policy
            .authorize("mallory", room, RoomAction::Join)
            .await
            .unwrap_err();
        assert!(matches!(err, RcError::Forbidden(_)));

        assert_eq!(policy.authorize_calls(), 2);
        assert_eq!(policy.actions_for("mallory"), vec![RoomAction::Join]);
    }
}
