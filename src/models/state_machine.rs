// Deploy action status transition validation

use crate::models::DeployStatus;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Invalid status transition from {from:?} to {to:?}")]
    InvalidTransition { from: DeployStatus, to: DeployStatus },

    #[error("Action already in terminal status: {0:?}")]
    AlreadyTerminal(DeployStatus),
}

/// Validate a deploy action status transition.
///
/// Transitions are monotonic: pending -> batched -> executing ->
/// {completed | failed}. Terminal statuses are final; a terminal action is
/// never re-queued by this engine.
pub fn validate_transition(from: DeployStatus, to: DeployStatus) -> Result<(), TransitionError> {
    use DeployStatus::*;

    if from.is_terminal() {
        return Err(TransitionError::AlreadyTerminal(from));
    }

    let valid = matches!(
        (from, to),
        (Pending, Batched)
            | (Batched, Executing)
            | (Executing, Completed)
            | (Executing, Failed)
    );

    if valid {
        Ok(())
    } else {
        Err(TransitionError::InvalidTransition { from, to })
    }
}
