use mender_core::state_machine::{allowed_transitions, validate_transition};
use mender_core::SessionStatus;
use proptest::prelude::*;

#[test]
fn test_running_transitions() {
    assert!(validate_transition(SessionStatus::Running, SessionStatus::Succeeded).is_ok());
    assert!(validate_transition(SessionStatus::Running, SessionStatus::Failed).is_ok());
    assert!(validate_transition(SessionStatus::Running, SessionStatus::Exhausted).is_ok());

    assert!(validate_transition(SessionStatus::Running, SessionStatus::Running).is_err());
}

#[test]
fn test_terminal_statuses_are_sinks() {
    for from in [SessionStatus::Succeeded, SessionStatus::Failed, SessionStatus::Exhausted] {
        assert!(from.is_terminal());
        assert!(allowed_transitions(from).is_empty());
        for to in SessionStatus::ALL {
            assert!(validate_transition(from, to).is_err(), "{from} -> {to}");
        }
    }
}

fn status() -> impl Strategy<Value = SessionStatus> {
    prop_oneof![
        Just(SessionStatus::Running),
        Just(SessionStatus::Succeeded),
        Just(SessionStatus::Failed),
        Just(SessionStatus::Exhausted),
    ]
}

proptest! {
    #[test]
    fn prop_all_transitions_are_subset_of_allowed(from in status(), to in status()) {
        let res = validate_transition(from, to);
        let allowed = allowed_transitions(from);

        if res.is_ok() {
            prop_assert!(allowed.contains(&to));
        } else {
            prop_assert!(!allowed.contains(&to));
        }
    }

    #[test]
    fn prop_status_is_monotone(path in prop::collection::vec(status(), 0..12)) {
        let mut current = SessionStatus::Running;
        for next in path {
            if validate_transition(current, next).is_ok() {
                prop_assert!(!current.is_terminal());
                prop_assert!(next.is_terminal());
                current = next;
            }
        }
        prop_assert!(current == SessionStatus::Running || current.is_terminal());
    }
}
