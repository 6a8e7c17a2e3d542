//! Batch job state machine
//!
//! Valid transitions:
//! - Idle → Running (Start)
//! - Running → Completed (Drained)
//! - Running → Cancelled (CancelDrained)
//! - Running → Failed (Abort)
//! - Completed | Cancelled | Failed → Idle (Reset)
//! - Completed | Cancelled | Failed → Running (Start, during the grace interval)
//! - Idle → Idle (Reset, no-op)

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::OrchestrationError;

/// Lifecycle of one scope's batch job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    /// No batch; progress shows zeros
    Idle,
    /// Tasks are being dispatched or are in flight
    Running,
    /// Every requirement resolved (terminal)
    Completed,
    /// Cancellation observed and in-flight work drained (terminal)
    Cancelled,
    /// Abnormal termination (terminal)
    Failed,
}

/// Events that move a batch between states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchEvent {
    Start,
    Drained,
    CancelDrained,
    Abort,
    Reset,
}

impl BatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchState::Completed | BatchState::Cancelled | BatchState::Failed
        )
    }

    pub fn is_running(&self) -> bool {
        matches!(self, BatchState::Running)
    }

    /// Attempt a transition
    pub fn transition(&self, event: BatchEvent) -> Result<BatchState, OrchestrationError> {
        use BatchEvent::*;
        use BatchState::*;

        let next = match (self, event) {
            (Idle, Start) => Running,
            (Idle, Reset) => Idle,

            (Running, Drained) => Completed,
            (Running, CancelDrained) => Cancelled,
            (Running, Abort) => Failed,

            (Completed | Cancelled | Failed, Reset) => Idle,
            (Completed | Cancelled | Failed, Start) => Running,

            (from, event) => {
                return Err(OrchestrationError::InvalidTransition {
                    from: from.to_string(),
                    event: format!("{:?}", event),
                })
            }
        };

        Ok(next)
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchState::Idle => "idle",
            BatchState::Running => "running",
            BatchState::Completed => "completed",
            BatchState::Cancelled => "cancelled",
            BatchState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let state = BatchState::Idle;
        let state = state.transition(BatchEvent::Start).unwrap();
        assert!(state.is_running());
        let state = state.transition(BatchEvent::Drained).unwrap();
        assert_eq!(state, BatchState::Completed);
        assert!(state.is_terminal());
        assert_eq!(state.transition(BatchEvent::Reset).unwrap(), BatchState::Idle);
    }

    #[test]
    fn test_every_terminal_state_resets() {
        for terminal in [BatchState::Completed, BatchState::Cancelled, BatchState::Failed] {
            assert_eq!(terminal.transition(BatchEvent::Reset).unwrap(), BatchState::Idle);
            assert_eq!(
                terminal.transition(BatchEvent::Start).unwrap(),
                BatchState::Running
            );
        }
    }

    #[test]
    fn test_running_cannot_restart_or_reset() {
        assert!(BatchState::Running.transition(BatchEvent::Start).is_err());
        assert!(BatchState::Running.transition(BatchEvent::Reset).is_err());
        assert!(BatchState::Idle.transition(BatchEvent::Drained).is_err());
    }

    #[test]
    fn test_abort_and_cancel() {
        assert_eq!(
            BatchState::Running.transition(BatchEvent::Abort).unwrap(),
            BatchState::Failed
        );
        assert_eq!(
            BatchState::Running
                .transition(BatchEvent::CancelDrained)
                .unwrap(),
            BatchState::Cancelled
        );
    }
}
