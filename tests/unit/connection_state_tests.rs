//! Unit tests for connection lifecycle states.

use interview_link::connection::{ChannelStatus, ConnectionState};

use ConnectionState::{Authenticating, Connecting, Idle, Open, Ready, Reconnecting};

#[test]
fn handshake_path_is_allowed() {
    assert!(Idle.can_transition_to(Connecting));
    assert!(Connecting.can_transition_to(Open));
    assert!(Open.can_transition_to(Authenticating));
    assert!(Authenticating.can_transition_to(Ready));
}

#[test]
fn skipping_handshake_steps_is_not_allowed() {
    assert!(!Idle.can_transition_to(Ready));
    assert!(!Connecting.can_transition_to(Ready));
    assert!(!Open.can_transition_to(Ready));
    assert!(!Idle.can_transition_to(Reconnecting));
    assert!(!Reconnecting.can_transition_to(Ready));
}

#[test]
fn every_active_state_can_fall_back() {
    for state in [Connecting, Open, Authenticating, Ready, Reconnecting] {
        assert!(state.can_transition_to(Idle), "{state:?} -> Idle");
        assert!(state.can_transition_to(Connecting), "{state:?} -> Connecting");
        assert!(state.is_active());
    }
    assert!(!Idle.is_active());
}

#[test]
fn only_ready_accepts_publishes() {
    assert!(Ready.is_ready());
    for state in [Idle, Connecting, Open, Authenticating, Reconnecting] {
        assert!(!state.is_ready());
    }
}

#[test]
fn status_serializes_snake_case() {
    let status = ChannelStatus {
        state: Reconnecting,
        attempt: 2,
    };
    let json = serde_json::to_value(status).unwrap();
    assert_eq!(json["state"], "reconnecting");
    assert_eq!(json["attempt"], 2);
    assert_eq!(ChannelStatus::idle().state, Idle);
}
