//! Assertions on manager status.

use crate::core::{ManagerPhase, ManagerStatus};

/// Asserts that the run finished successfully.
pub fn assert_status_done(status: &ManagerStatus) {
    assert!(
        !status.error,
        "Expected success but got error: {:?}",
        status.error_message
    );
    assert_eq!(status.phase, ManagerPhase::Done, "Expected phase Done");
    assert_eq!(status.progress, 100, "Expected progress 100");
}

/// Asserts that the run failed in `phase` with a message containing `needle`.
pub fn assert_status_failed(status: &ManagerStatus, phase: ManagerPhase, needle: &str) {
    assert!(status.error, "Expected failure but status has no error");
    assert_eq!(status.phase, phase, "Expected failure in phase {phase}");
    let message = status.error_message.as_deref().unwrap_or_default();
    assert!(
        message.contains(needle),
        "Expected error containing '{needle}', got '{message}'"
    );
}
