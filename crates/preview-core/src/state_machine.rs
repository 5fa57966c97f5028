use crate::error::StateMachineError;
use crate::types::SchemaStatus;

/// Validates a schema status transition.
///
/// Deletion of a row is not a status and is never checked here.
pub fn validate_transition(from: SchemaStatus, to: SchemaStatus) -> Result<(), StateMachineError> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(StateMachineError::IllegalTransition { from, to })
    }
}

pub fn allowed_transitions(from: SchemaStatus) -> Vec<SchemaStatus> {
    use SchemaStatus as S;
    match from {
        S::None => vec![S::Provisioning],
        S::Provisioning => vec![S::Ready, S::Failed],
        S::Ready => vec![S::Dropped],
        S::Failed | S::Dropped => vec![],
    }
}

fn allowed(from: SchemaStatus, to: SchemaStatus) -> bool {
    allowed_transitions(from).into_iter().any(|s| s == to)
}
