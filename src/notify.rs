use tokio::sync::broadcast;

use crate::model::{AccountId, Appointment, ChatDraftMessage};

const CHANNEL_CAPACITY: usize = 256;

/// What the outbound side of an account needs to hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// An appointment reached `booked` or `confirmed`.
    AppointmentAccepted { appointment: Appointment },
    /// A bot-authored reply cleared review.
    MessageApproved { message: ChatDraftMessage },
}

impl Notice {
    pub fn kind(&self) -> &'static str {
        match self {
            Notice::AppointmentAccepted { .. } => "appointment_accepted",
            Notice::MessageApproved { .. } => "message_approved",
        }
    }

    pub fn account_id(&self) -> &AccountId {
        match self {
            Notice::AppointmentAccepted { appointment } => &appointment.account_id,
            Notice::MessageApproved { message } => &message.account_id,
        }
    }
}

/// Per-account broadcast hub. Sending never blocks the commit path.
pub struct NotifyHub {
    sender: broadcast::Sender<Notice>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.sender.subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, notice: Notice) {
        let _ = self.sender.send(notice);
    }
}
