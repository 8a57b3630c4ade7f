use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;
use crate::limits::MAX_ACCOUNT_ID_LEN;
use crate::schedule::{BlackoutDate, WeeklySchedule};

/// Unix milliseconds — the only instant type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const DAY_MS: Ms = 86_400_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

// ── Accounts ─────────────────────────────────────────────────────

/// Tenant identifier. Doubles as the WAL file stem, so it is validated
/// rather than sanitized: two distinct inputs never name the same account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(raw: impl Into<String>) -> Result<Self, EngineError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(EngineError::validation("account id must not be empty"));
        }
        if raw.len() > MAX_ACCOUNT_ID_LEN {
            return Err(EngineError::LimitExceeded("account id too long"));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(EngineError::validation(format!(
                "account id {raw:?} may only contain [A-Za-z0-9_-]"
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    /// IANA zone name; day boundaries are computed in this zone.
    pub timezone: String,
}

pub fn parse_timezone(name: &str) -> Result<Tz, EngineError> {
    name.parse::<Tz>()
        .map_err(|e| EngineError::validation(format!("unknown timezone {name:?}: {e}")))
}

/// Everything a core call needs to know about its tenant, captured once per call.
#[derive(Debug, Clone)]
pub struct AccountContext {
    pub account_id: AccountId,
    pub timezone: Tz,
    pub review_policy: ReviewPolicy,
}

// ── Review policy ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReviewMode {
    /// Every new entity waits for a human.
    Always,
    /// Nothing waits for a human.
    Never,
    /// Only entities the external classifier flagged wait for a human.
    OnRedflag,
}

impl ReviewMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewMode::Always => "always",
            ReviewMode::Never => "never",
            ReviewMode::OnRedflag => "on_redflag",
        }
    }
}

impl FromStr for ReviewMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" => Ok(ReviewMode::Always),
            "never" => Ok(ReviewMode::Never),
            "on_redflag" => Ok(ReviewMode::OnRedflag),
            other => Err(EngineError::validation(format!("unknown review mode: {other}"))),
        }
    }
}

impl fmt::Display for ReviewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewPolicy {
    pub appointment_review: ReviewMode,
    pub message_review: ReviewMode,
}

impl Default for ReviewPolicy {
    fn default() -> Self {
        Self {
            appointment_review: ReviewMode::Never,
            message_review: ReviewMode::OnRedflag,
        }
    }
}

// ── Services ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub name: String,
    pub duration_minutes: u32,
    pub is_active: bool,
}

// ── Appointments ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Pending,
    Booked,
    Confirmed,
    Cancelled,
    Completed,
    NoShow,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 6] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Booked,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Cancelled,
        AppointmentStatus::Completed,
        AppointmentStatus::NoShow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Booked => "booked",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::NoShow => "noshow",
        }
    }

    /// Active appointments occupy their interval on the calendar.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Pending | AppointmentStatus::Booked | AppointmentStatus::Confirmed
        )
    }

    /// Accepted appointments are authoritative and go out to the customer.
    pub fn is_accepted(&self) -> bool {
        matches!(self, AppointmentStatus::Booked | AppointmentStatus::Confirmed)
    }
}

impl FromStr for AppointmentStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        AppointmentStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == lower)
            .ok_or_else(|| EngineError::validation(format!("unknown appointment status: {s}")))
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub account_id: AccountId,
    pub customer: Customer,
    /// Stored in UTC; `span.end - span.start == duration_minutes * MINUTE_MS`.
    pub span: Span,
    pub duration_minutes: u32,
    pub service_id: Option<Ulid>,
    pub status: AppointmentStatus,
    pub flagged: bool,
    pub created_at: Ms,
    pub updated_at: Ms,
    pub last_actor: Option<String>,
}

/// Input of the booking path. The initial status is never part of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub id: Ulid,
    pub customer: Customer,
    pub start: Ms,
    pub duration_minutes: Option<u32>,
    pub service_id: Option<Ulid>,
    /// Opaque signal from the external classifier.
    pub flagged: bool,
}

// ── Bot-authored chat replies ────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageStatus {
    Draft,
    Pending,
    Approved,
    Sent,
}

impl MessageStatus {
    pub const ALL: [MessageStatus; 4] = [
        MessageStatus::Draft,
        MessageStatus::Pending,
        MessageStatus::Approved,
        MessageStatus::Sent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Draft => "draft",
            MessageStatus::Pending => "pending",
            MessageStatus::Approved => "approved",
            MessageStatus::Sent => "sent",
        }
    }
}

impl FromStr for MessageStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        MessageStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == lower)
            .ok_or_else(|| EngineError::validation(format!("unknown message status: {s}")))
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatDraftMessage {
    pub id: Ulid,
    pub account_id: AccountId,
    pub content: String,
    pub status: MessageStatus,
    pub flagged: bool,
    pub created_at: Ms,
    pub updated_at: Ms,
    pub last_actor: Option<String>,
}

/// The WAL record format. One log per account, so no record carries a
/// tenant key except the bootstrap `AccountCreated`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    AccountCreated {
        account: Account,
    },
    AccountUpdated {
        name: String,
        timezone: String,
    },
    ScheduleReplaced {
        schedule: WeeklySchedule,
    },
    BlackoutsReplaced {
        blackouts: Vec<BlackoutDate>,
    },
    ServiceUpserted {
        service: Service,
    },
    PolicyUpdated {
        policy: ReviewPolicy,
    },
    AppointmentCreated {
        appointment: Appointment,
    },
    AppointmentTransitioned {
        id: Ulid,
        to: AppointmentStatus,
        actor: Option<String>,
        at: Ms,
    },
    MessageCreated {
        message: ChatDraftMessage,
    },
    MessageTransitioned {
        id: Ulid,
        to: MessageStatus,
        actor: Option<String>,
        at: Ms,
    },
}

/// Query filter for appointment listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppointmentFilter {
    pub status: Option<AppointmentStatus>,
    pub window: Option<Span>,
}

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
