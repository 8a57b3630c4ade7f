use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;
use crate::schedule::{BlackoutDate, WeeklySchedule};

use super::availability::{free_slots, open_intervals, validate_range};
use super::conflict::validate_duration;
use super::{Engine, EngineError};

impl Engine {
    pub async fn context(&self) -> AccountContext {
        self.account.read().await.context()
    }

    pub async fn account(&self) -> Account {
        self.account.read().await.account.clone()
    }

    pub async fn schedule(&self) -> WeeklySchedule {
        self.account.read().await.schedule.clone()
    }

    pub async fn blackouts(&self) -> Vec<BlackoutDate> {
        let mut blackouts = self.account.read().await.blackouts.clone();
        blackouts.sort_by_key(|b| (b.date, b.recurring));
        blackouts
    }

    /// Ordered by id.
    pub async fn services(&self) -> Vec<Service> {
        self.account.read().await.services.values().cloned().collect()
    }

    pub async fn review_policy(&self) -> ReviewPolicy {
        self.account.read().await.policy
    }

    /// Bookable intervals of at least `duration_minutes` on the local dates
    /// `[from, to]`. Takes no write lock.
    pub async fn free_slots(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        duration_minutes: u32,
    ) -> Result<Vec<Span>, EngineError> {
        validate_duration(duration_minutes)?;
        validate_range(from, to)?;

        let open = {
            let state = self.account.read().await;
            open_intervals(&state.tz, &state.schedule, &state.blackouts, from, to)
        };
        let (Some(first), Some(last)) = (open.first(), open.last()) else {
            return Ok(Vec::new());
        };
        let window = Span::new(first.start, last.end);
        let occupied: Vec<Span> = self
            .appointments
            .iter()
            .filter(|a| a.status.is_active() && a.span.overlaps(&window))
            .map(|a| a.span)
            .collect();

        Ok(free_slots(&open, &occupied, duration_minutes as Ms * MINUTE_MS))
    }

    pub fn get_appointment(&self, id: &Ulid) -> Result<Appointment, EngineError> {
        self.appointments
            .get(id)
            .map(|a| a.value().clone())
            .ok_or_else(|| EngineError::not_found("appointment", id))
    }

    /// Ordered by start time.
    pub fn list_appointments(&self, filter: AppointmentFilter) -> Vec<Appointment> {
        let mut result: Vec<Appointment> = self
            .appointments
            .iter()
            .filter(|a| filter.status.is_none_or(|s| a.status == s))
            .filter(|a| filter.window.is_none_or(|w| a.span.overlaps(&w)))
            .map(|a| a.value().clone())
            .collect();
        result.sort_by_key(|a| (a.span.start, a.id));
        result
    }

    pub fn get_message(&self, id: &Ulid) -> Result<ChatDraftMessage, EngineError> {
        self.messages
            .get(id)
            .map(|m| m.value().clone())
            .ok_or_else(|| EngineError::not_found("message", id))
    }

    /// Ordered by creation.
    pub fn list_messages(&self, status: Option<MessageStatus>) -> Vec<ChatDraftMessage> {
        let mut result: Vec<ChatDraftMessage> = self
            .messages
            .iter()
            .filter(|m| status.is_none_or(|s| m.status == s))
            .map(|m| m.value().clone())
            .collect();
        result.sort_by_key(|m| (m.created_at, m.id));
        result
    }
}
