//! Human-review gate for new appointments and bot-authored chat replies.
//!
//! Both entity types share one rule shape; only the accepted/held states differ.
//! The flagged signal comes from an external classifier and is taken as-is.

use crate::model::{AppointmentStatus, MessageStatus, ReviewMode};

/// Whether a new entity must wait for a human under `mode`.
pub fn requires_review(mode: ReviewMode, flagged: bool) -> bool {
    match mode {
        ReviewMode::Always => true,
        ReviewMode::Never => false,
        ReviewMode::OnRedflag => flagged,
    }
}

/// Initial status of a new appointment. Callers never pick it themselves.
pub fn decide_initial_status(mode: ReviewMode, flagged: bool) -> AppointmentStatus {
    if requires_review(mode, flagged) {
        AppointmentStatus::Pending
    } else {
        AppointmentStatus::Booked
    }
}

/// Initial status of a submitted chat reply.
pub fn decide_message_status(mode: ReviewMode, flagged: bool) -> MessageStatus {
    if requires_review(mode, flagged) {
        MessageStatus::Pending
    } else {
        MessageStatus::Approved
    }
}
