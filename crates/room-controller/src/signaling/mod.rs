//! Per-user peer-link negotiation.
//!
//! One signaling session per user at a time. The relay owns the negotiation
//! state machine, `negotiating -> established -> closed` with `closed` as the
//! terminal phase, and delegates answer production and candidate handling to
//! the [`MediaEndpoint`] seam. A closed session never reopens; a fresh
//! `create_session` replaces it.
//!
//! The session map lock is never held across a media call: the relay records
//! intent, drops the lock, awaits the media plane, then re-checks that the
//! session still exists before committing the result.

mod media;

pub use media::{MediaEndpoint, StaticDescriptorEndpoint};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::instrument;
use uuid::Uuid;

use crate::errors::RcError;
use crate::observability::metrics;

/// Candidates retained per session for late media-path replay. Once full,
/// the oldest recorded candidate is dropped; the media plane has already
/// consumed every candidate by then.
const MAX_RETAINED_CANDIDATES: usize = 256;

/// Negotiation phase of one peer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkPhase {
    Negotiating,
    Established,
    Closed,
}

impl LinkPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkPhase::Negotiating => "negotiating",
            LinkPhase::Established => "established",
            LinkPhase::Closed => "closed",
        }
    }
}

/// Observable snapshot of one user's signaling session.
#[derive(Debug, Clone, Serialize)]
pub struct PeerLinkState {
    pub user_id: String,
    pub room_id: Uuid,
    pub phase: LinkPhase,
    pub candidate_count: usize,
    pub created_at: DateTime<Utc>,
}

struct PeerLink {
    room_id: Uuid,
    phase: LinkPhase,
    remote_desc: Option<Value>,
    local_desc: Option<Value>,
    candidates: Vec<Value>,
    created_at: DateTime<Utc>,
}

impl PeerLink {
    fn snapshot(&self, user_id: &str) -> PeerLinkState {
        PeerLinkState {
            user_id: user_id.to_string(),
            room_id: self.room_id,
            phase: self.phase,
            candidate_count: self.candidates.len(),
            created_at: self.created_at,
        }
    }
}

/// Relay coordinating offer/answer/candidate exchange per user.
pub struct SignalingRelay {
    links: Mutex<HashMap<String, PeerLink>>,
    media: Arc<dyn MediaEndpoint>,
}

impl SignalingRelay {
    pub fn new(media: Arc<dyn MediaEndpoint>) -> Self {
        SignalingRelay {
            links: Mutex::new(HashMap::new()),
            media,
        }
    }

    /// Start a fresh negotiation for `user_id`. A previous closed session is
    /// replaced; a live one makes this fail with `AlreadyNegotiating`.
    #[instrument(skip_all, fields(user_id = %user_id, room_id = %room_id))]
    pub async fn create_session(
        &self,
        user_id: &str,
        room_id: Uuid,
    ) -> Result<PeerLinkState, RcError> {
        let mut links = self.links.lock().await;

        if let Some(existing) = links.get(user_id) {
            if existing.phase != LinkPhase::Closed {
                return Err(RcError::AlreadyNegotiating(format!(
                    "user {user_id} already has a {} session",
                    existing.phase.as_str()
                )));
            }
        }

        let link = PeerLink {
            room_id,
            phase: LinkPhase::Negotiating,
            remote_desc: None,
            local_desc: None,
            candidates: Vec::new(),
            created_at: Utc::now(),
        };
        let state = link.snapshot(user_id);
        links.insert(user_id.to_string(), link);
        metrics::set_signaling_sessions(live_count(&links));

        tracing::debug!(
            target: "rc.signaling",
            user_id = %user_id,
            room_id = %room_id,
            "signaling session created"
        );
        Ok(state)
    }

    /// Process a remote offer and return the local answer descriptor.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn handle_offer(&self, user_id: &str, offer: &Value) -> Result<Value, RcError> {
        validate_offer(offer)?;

        let room_id = {
            let mut links = self.links.lock().await;
            let link = live_link(&mut links, user_id)?;
            link.remote_desc = Some(offer.clone());
            // Renegotiation from an established link re-enters negotiating.
            link.phase = LinkPhase::Negotiating;
            link.room_id
        };

        let answer = self.media.create_answer(user_id, room_id, offer).await?;

        let mut links = self.links.lock().await;
        match links.get_mut(user_id) {
            Some(link) if link.phase != LinkPhase::Closed => {
                link.local_desc = Some(answer.clone());
            }
            // Closed or torn down while the media plane was producing the
            // answer. The answer belongs to nobody; release its resources.
            _ => {
                drop(links);
                self.media.release(user_id).await;
                return Err(RcError::NotFound(format!(
                    "signaling session for user {user_id}"
                )));
            }
        }

        tracing::debug!(target: "rc.signaling", user_id = %user_id, "offer answered");
        Ok(answer)
    }

    /// Record one remote ICE candidate and feed it to the media plane.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn handle_ice_candidate(
        &self,
        user_id: &str,
        candidate: &Value,
    ) -> Result<(), RcError> {
        validate_candidate(candidate)?;

        let room_id = {
            let mut links = self.links.lock().await;
            live_link(&mut links, user_id)?.room_id
        };

        self.media
            .apply_candidate(user_id, room_id, candidate)
            .await?;

        let mut links = self.links.lock().await;
        let link = live_link(&mut links, user_id)?;
        if link.candidates.len() == MAX_RETAINED_CANDIDATES {
            link.candidates.remove(0);
        }
        link.candidates.push(candidate.clone());
        Ok(())
    }

    /// Flip a negotiating link to established. Driven by the client's
    /// answer acknowledgement; repeated acks are a no-op.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn mark_established(&self, user_id: &str) -> Result<(), RcError> {
        let mut links = self.links.lock().await;
        let link = live_link(&mut links, user_id)?;

        if link.phase == LinkPhase::Negotiating {
            link.phase = LinkPhase::Established;
            tracing::debug!(target: "rc.signaling", user_id = %user_id, "peer link established");
        }
        Ok(())
    }

    /// Close a session, releasing its media resources. Closing an already
    /// closed session is a no-op; a session that never existed is an error.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn close_session(&self, user_id: &str) -> Result<(), RcError> {
        {
            let mut links = self.links.lock().await;
            let link = links.get_mut(user_id).ok_or_else(|| {
                RcError::NotFound(format!("signaling session for user {user_id}"))
            })?;

            if link.phase == LinkPhase::Closed {
                return Ok(());
            }
            link.phase = LinkPhase::Closed;
            link.remote_desc = None;
            link.local_desc = None;
            link.candidates.clear();
            metrics::set_signaling_sessions(live_count(&links));
        }

        self.media.release(user_id).await;
        metrics::record_session_closed("explicit");
        tracing::debug!(target: "rc.signaling", user_id = %user_id, "signaling session closed");
        Ok(())
    }

    /// Drop whatever session `user_id` holds, releasing media resources if
    /// it was still live. Connection teardown calls this unconditionally.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn release_user(&self, user_id: &str) {
        let was_live = {
            let mut links = self.links.lock().await;
            let removed = links.remove(user_id);
            metrics::set_signaling_sessions(live_count(&links));
            matches!(removed, Some(link) if link.phase != LinkPhase::Closed)
        };

        if was_live {
            self.media.release(user_id).await;
            metrics::record_session_closed("teardown");
            tracing::debug!(target: "rc.signaling", user_id = %user_id, "signaling session released");
        }
    }

    /// Current state of one user's session, if any.
    pub async fn snapshot(&self, user_id: &str) -> Option<PeerLinkState> {
        let links = self.links.lock().await;
        links.get(user_id).map(|link| link.snapshot(user_id))
    }

    /// Number of sessions that are not closed.
    pub async fn live_session_count(&self) -> usize {
        live_count(&*self.links.lock().await)
    }
}

fn live_count(links: &HashMap<String, PeerLink>) -> usize {
    links
        .values()
        .filter(|link| link.phase != LinkPhase::Closed)
        .count()
}

/// The live (non-closed) link for `user_id`, or `NotFound`. A closed session
/// is indistinguishable from an absent one to every operation except
/// `close_session` and `create_session`.
fn live_link<'a>(
    links: &'a mut HashMap<String, PeerLink>,
    user_id: &str,
) -> Result<&'a mut PeerLink, RcError> {
    match links.get_mut(user_id) {
        Some(link) if link.phase != LinkPhase::Closed => Ok(link),
        _ => Err(RcError::NotFound(format!(
            "signaling session for user {user_id}"
        ))),
    }
}

fn validate_offer(offer: &Value) -> Result<(), RcError> {
    match offer.get("sdp").and_then(Value::as_str) {
        Some(sdp) if !sdp.trim().is_empty() => Ok(()),
        _ => Err(RcError::Negotiation(
            "offer carries no sdp descriptor".to_string(),
        )),
    }
}

fn validate_candidate(candidate: &Value) -> Result<(), RcError> {
    // An empty candidate string is the trickle end-of-candidates marker and
    // is accepted as-is.
    if candidate.get("candidate").map(Value::is_string) == Some(true) {
        Ok(())
    } else {
        Err(RcError::MalformedInput(
            "candidate payload carries no candidate field".to_string(),
        ))
    }
}

// Unit tests for the relay live in `tests/signaling_unit.rs`: the
// rc-test-utils mocks implement the externally linked copy of this
// crate, so they cannot be used inside the lib-test build.
