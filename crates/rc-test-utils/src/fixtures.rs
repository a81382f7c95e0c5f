//! Pre-configured test data for room-controller testing.

use std::time::Duration;

use room_controller::hub::LivenessSettings;
use room_controller::registry::RoomSpec;

/// Baseline room attributes: public, permanent, owned by "owner".
#[must_use]
pub fn room_spec(title: impl Into<String>) -> RoomSpec {
    RoomSpec {
        title: title.into(),
        description: String::new(),
        owner_id: "owner".to_string(),
        language: "en".to_string(),
        is_private: false,
        is_temporary: false,
        auto_delete: false,
    }
}

/// Temporary room that ends itself when the last participant leaves.
#[must_use]
pub fn ephemeral_room_spec(title: impl Into<String>) -> RoomSpec {
    let mut spec = room_spec(title);
    spec.is_temporary = true;
    spec.auto_delete = true;
    spec
}

/// Private room with an explicit owner, for authorization paths.
#[must_use]
pub fn private_room_spec(title: impl Into<String>, owner: impl Into<String>) -> RoomSpec {
    let mut spec = room_spec(title);
    spec.owner_id = owner.into();
    spec.is_private = true;
    spec
}

/// Liveness settings long enough that no timer fires during a test unless
/// the test advances the clock itself.
#[must_use]
pub fn calm_liveness() -> LivenessSettings {
    LivenessSettings {
        pong_timeout: Duration::from_secs(60),
        ping_interval: Duration::from_secs(20),
        write_timeout: Duration::from_secs(5),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_spec_defaults() {
        let spec = room_spec("standup");
        assert_eq!(spec.title, "standup");
        assert_eq!(spec.owner_id, "owner");
        assert!(!spec.is_private);
        assert!(!spec.is_temporary);
        assert!(!spec.auto_delete);
    }

    #[test]
    fn test_ephemeral_room_spec_flags() {
        let spec = ephemeral_room_spec("scratch");
        assert!(spec.is_temporary);
        assert!(spec.auto_delete);
    }

    #[test]
    fn test_private_room_spec_owner() {
        let spec = private_room_spec("board", "alice");
        assert_eq!(spec.owner_id, "alice");
        assert!(spec.is_private);
    }
}
