//! Status transition tables. Every status change in the engine goes
//! through `check_appointment` or `check_message`.

use crate::model::{AppointmentStatus, MessageStatus};

use super::EngineError;

/// Outcome of a transition check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Already in the target state; nothing to write.
    Noop,
    Apply,
}

pub fn appointment_allows(from: AppointmentStatus, to: AppointmentStatus) -> bool {
    use AppointmentStatus::*;
    matches!(
        (from, to),
        (Pending, Booked | Confirmed | Cancelled)
            | (Booked, Confirmed | Cancelled)
            | (Confirmed, Cancelled | Completed | NoShow)
    )
}

pub fn check_appointment(from: AppointmentStatus, to: AppointmentStatus) -> Result<Step, EngineError> {
    if from == to {
        return Ok(Step::Noop);
    }
    if appointment_allows(from, to) {
        Ok(Step::Apply)
    } else {
        Err(EngineError::InvalidTransition {
            from: from.as_str(),
            to: to.as_str(),
        })
    }
}

pub fn message_allows(from: MessageStatus, to: MessageStatus) -> bool {
    use MessageStatus::*;
    matches!(
        (from, to),
        (Draft, Pending) | (Pending, Approved | Draft) | (Approved, Sent)
    )
}

pub fn check_message(from: MessageStatus, to: MessageStatus) -> Result<Step, EngineError> {
    if from == to {
        return Ok(Step::Noop);
    }
    if message_allows(from, to) {
        Ok(Step::Apply)
    } else {
        Err(EngineError::InvalidTransition {
            from: from.as_str(),
            to: to.as_str(),
        })
    }
}
