use chrono::{NaiveDate, TimeDelta};
use dashmap::DashSet;
use serde_json::Value;
use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::Notice;
use crate::observability::{BOOKINGS_TOTAL, MESSAGES_TOTAL, TRANSITIONS_TOTAL};
use crate::policy::{decide_initial_status, decide_message_status};
use crate::repair::backfill_weekdays;
use crate::schedule::{validate_blackouts, BlackoutDate, WeeklySchedule};

use super::availability::{local_date, open_intervals};
use super::conflict::{check_no_conflict, now_ms, validate_customer, validate_duration, validate_instant};
use super::lifecycle::{check_appointment, check_message, Step};
use super::{
    apply_appointment_transition, apply_message_transition, Engine, EngineError, Occupancy,
    WalCommand,
};

/// Exclusive hold on an appointment id, released on drop.
struct IdClaim<'a> {
    claimed: &'a DashSet<Ulid>,
    id: Ulid,
}

impl<'a> IdClaim<'a> {
    fn take(claimed: &'a DashSet<Ulid>, id: Ulid) -> Option<Self> {
        claimed.insert(id).then_some(Self { claimed, id })
    }
}

impl Drop for IdClaim<'_> {
    fn drop(&mut self) {
        self.claimed.remove(&self.id);
    }
}

pub(super) fn validate_account_fields(name: &str, timezone: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::validation("account name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("account name too long"));
    }
    parse_timezone(timezone)?;
    Ok(())
}

fn validate_actor(actor: &Option<String>) -> Result<(), EngineError> {
    if let Some(a) = actor
        && a.len() > MAX_ACTOR_LEN {
            return Err(EngineError::LimitExceeded("actor too long"));
        }
    Ok(())
}

impl Engine {
    // ── Account configuration ────────────────────────────

    pub async fn update_account(&self, name: String, timezone: String) -> Result<Account, EngineError> {
        validate_account_fields(&name, &timezone)?;
        let mut state = self.account.write().await;
        self.persist_and_apply(&mut state, Event::AccountUpdated { name, timezone })
            .await?;
        Ok(state.account.clone())
    }

    pub async fn replace_schedule(&self, schedule: WeeklySchedule) -> Result<(), EngineError> {
        let mut state = self.account.write().await;
        self.persist_and_apply(&mut state, Event::ScheduleReplaced { schedule })
            .await
    }

    /// Import a schedule in its persisted JSON layout. With `repair`, missing
    /// `dayOfWeek` tags are backfilled first. Returns the number of repaired
    /// entries.
    pub async fn import_schedule(&self, mut doc: Value, repair: bool) -> Result<usize, EngineError> {
        let repaired = if repair { backfill_weekdays(&mut doc)? } else { 0 };
        let schedule = WeeklySchedule::from_value(&doc)?;
        self.replace_schedule(schedule).await?;
        if repaired > 0 {
            tracing::info!("account {}: backfilled {repaired} weekday tags", self.id);
        }
        Ok(repaired)
    }

    pub async fn replace_blackouts(&self, blackouts: Vec<BlackoutDate>) -> Result<(), EngineError> {
        validate_blackouts(&blackouts)?;
        let mut state = self.account.write().await;
        self.persist_and_apply(&mut state, Event::BlackoutsReplaced { blackouts })
            .await
    }

    pub async fn add_blackouts(&self, added: Vec<BlackoutDate>) -> Result<(), EngineError> {
        let mut state = self.account.write().await;
        let mut blackouts = state.blackouts.clone();
        blackouts.extend(added);
        validate_blackouts(&blackouts)?;
        self.persist_and_apply(&mut state, Event::BlackoutsReplaced { blackouts })
            .await
    }

    /// Remove every blackout entry (absolute or recurring) declared on `date`.
    pub async fn remove_blackout(&self, date: NaiveDate) -> Result<usize, EngineError> {
        let mut state = self.account.write().await;
        let before = state.blackouts.len();
        let blackouts: Vec<BlackoutDate> = state
            .blackouts
            .iter()
            .filter(|b| b.date != date)
            .cloned()
            .collect();
        let removed = before - blackouts.len();
        if removed == 0 {
            return Err(EngineError::not_found("blackout", format_date(date)));
        }
        self.persist_and_apply(&mut state, Event::BlackoutsReplaced { blackouts })
            .await?;
        Ok(removed)
    }

    pub async fn upsert_service(&self, service: Service) -> Result<(), EngineError> {
        if service.name.trim().is_empty() {
            return Err(EngineError::validation("service name must not be empty"));
        }
        if service.name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("service name too long"));
        }
        validate_duration(service.duration_minutes)?;
        let mut state = self.account.write().await;
        if !state.services.contains_key(&service.id) && state.services.len() >= MAX_SERVICES {
            return Err(EngineError::LimitExceeded("too many services"));
        }
        self.persist_and_apply(&mut state, Event::ServiceUpserted { service })
            .await
    }

    pub async fn set_review_policy(&self, policy: ReviewPolicy) -> Result<(), EngineError> {
        let mut state = self.account.write().await;
        self.persist_and_apply(&mut state, Event::PolicyUpdated { policy })
            .await
    }

    // ── Booking ──────────────────────────────────────────

    /// Book an appointment. The request is checked against open time
    /// optimistically, then re-checked against occupancy under the day-shard
    /// locks, so of two overlapping requests exactly one commits.
    pub async fn book(&self, req: BookingRequest) -> Result<Appointment, EngineError> {
        let result = self.book_inner(req).await;
        let outcome = match &result {
            Ok(appt) => appt.status.as_str(),
            Err(EngineError::Conflict(_)) => "conflict",
            Err(_) => "rejected",
        };
        metrics::counter!(BOOKINGS_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn book_inner(&self, req: BookingRequest) -> Result<Appointment, EngineError> {
        validate_customer(&req.customer)?;
        validate_instant(req.start)?;
        // Held until the appointment is in `appointments` or the booking
        // fails, so one id can never occupy two sets of shards.
        let _claim = IdClaim::take(&self.booking_ids, req.id)
            .ok_or_else(|| EngineError::already_exists("appointment", req.id))?;
        if self.appointments.contains_key(&req.id) {
            return Err(EngineError::already_exists("appointment", req.id));
        }

        let state = self.account.read().await;
        let ctx = state.context();

        let duration_minutes = match req.service_id {
            Some(service_id) => {
                let service = state
                    .services
                    .get(&service_id)
                    .filter(|s| s.is_active)
                    .ok_or_else(|| {
                        EngineError::validation(format!("unknown or inactive service {service_id}"))
                    })?;
                req.duration_minutes.unwrap_or(service.duration_minutes)
            }
            None => req
                .duration_minutes
                .ok_or_else(|| EngineError::validation("duration or service is required"))?,
        };
        validate_duration(duration_minutes)?;
        let span = Span::new(req.start, req.start + duration_minutes as Ms * MINUTE_MS);
        validate_instant(span.end - 1)?;

        // A slot may start on the previous local day and run past midnight.
        let out_of_range = || EngineError::validation("requested time is out of range");
        let first = local_date(&ctx.timezone, span.start)
            .and_then(|d| d.checked_sub_signed(TimeDelta::days(1)))
            .ok_or_else(out_of_range)?;
        let last = local_date(&ctx.timezone, span.end).ok_or_else(out_of_range)?;
        let open = open_intervals(&ctx.timezone, &state.schedule, &state.blackouts, first, last);
        if !open.iter().any(|o| o.contains_span(&span)) {
            return Err(EngineError::validation("requested time is outside availability"));
        }

        let mut guards = self.lock_shards(&span).await;
        check_no_conflict(&guards, &span)?;

        let now = now_ms();
        let status = decide_initial_status(ctx.review_policy.appointment_review, req.flagged);
        let appointment = Appointment {
            id: req.id,
            account_id: ctx.account_id.clone(),
            customer: req.customer,
            span,
            duration_minutes,
            service_id: req.service_id,
            status,
            flagged: req.flagged,
            created_at: now,
            updated_at: now,
            last_actor: None,
        };

        self.wal_append(&Event::AppointmentCreated {
            appointment: appointment.clone(),
        })
        .await?;
        for guard in guards.iter_mut() {
            guard.occupied.push(Occupancy { id: appointment.id, span });
        }
        self.appointments.insert(appointment.id, appointment.clone());
        drop(guards);
        drop(state);

        tracing::debug!(
            "account {}: booked {} [{}, {}) as {}",
            self.id,
            appointment.id,
            span.start,
            span.end,
            status
        );
        if status.is_accepted() {
            self.notify.send(Notice::AppointmentAccepted {
                appointment: appointment.clone(),
            });
        }
        Ok(appointment)
    }

    // ── Appointment lifecycle ────────────────────────────

    pub async fn transition(
        &self,
        id: Ulid,
        to: AppointmentStatus,
        actor: Option<String>,
    ) -> Result<Appointment, EngineError> {
        validate_actor(&actor)?;
        let span = self
            .appointments
            .get(&id)
            .map(|a| a.span)
            .ok_or_else(|| EngineError::not_found("appointment", id))?;

        let mut guards = self.lock_shards(&span).await;
        let mut appointment = self
            .appointments
            .get(&id)
            .map(|a| a.value().clone())
            .ok_or_else(|| EngineError::not_found("appointment", id))?;
        let from = appointment.status;
        if check_appointment(from, to)? == Step::Noop {
            return Ok(appointment);
        }

        let at = now_ms();
        self.wal_append(&Event::AppointmentTransitioned {
            id,
            to,
            actor: actor.clone(),
            at,
        })
        .await?;
        if !to.is_active() {
            for guard in guards.iter_mut() {
                guard.occupied.retain(|o| o.id != id);
            }
        }
        apply_appointment_transition(&mut appointment, to, &actor, at);
        self.appointments.insert(id, appointment.clone());
        drop(guards);

        metrics::counter!(TRANSITIONS_TOTAL, "from" => from.as_str(), "to" => to.as_str())
            .increment(1);
        if to.is_accepted() {
            self.notify.send(Notice::AppointmentAccepted {
                appointment: appointment.clone(),
            });
        }
        Ok(appointment)
    }

    pub async fn approve(&self, id: Ulid, actor: Option<String>) -> Result<Appointment, EngineError> {
        self.transition(id, AppointmentStatus::Confirmed, actor).await
    }

    pub async fn reject(&self, id: Ulid, actor: Option<String>) -> Result<Appointment, EngineError> {
        self.transition(id, AppointmentStatus::Cancelled, actor).await
    }

    pub async fn cancel(&self, id: Ulid, actor: Option<String>) -> Result<Appointment, EngineError> {
        self.transition(id, AppointmentStatus::Cancelled, actor).await
    }

    // ── Chat replies ─────────────────────────────────────

    pub async fn submit_message(
        &self,
        id: Ulid,
        content: String,
        flagged: bool,
        actor: Option<String>,
    ) -> Result<ChatDraftMessage, EngineError> {
        if content.trim().is_empty() {
            return Err(EngineError::validation("message content must not be empty"));
        }
        if content.len() > MAX_MESSAGE_LEN {
            return Err(EngineError::LimitExceeded("message too long"));
        }
        validate_actor(&actor)?;
        let mode = self.account.read().await.policy.message_review;

        let _guard = self.message_lock.lock().await;
        if self.messages.contains_key(&id) {
            return Err(EngineError::already_exists("message", id));
        }
        let now = now_ms();
        let message = ChatDraftMessage {
            id,
            account_id: self.id.clone(),
            content,
            status: decide_message_status(mode, flagged),
            flagged,
            created_at: now,
            updated_at: now,
            last_actor: actor,
        };
        self.wal_append(&Event::MessageCreated {
            message: message.clone(),
        })
        .await?;
        self.messages.insert(id, message.clone());

        metrics::counter!(MESSAGES_TOTAL, "status" => message.status.as_str()).increment(1);
        if message.status == MessageStatus::Approved {
            self.notify.send(Notice::MessageApproved {
                message: message.clone(),
            });
        }
        Ok(message)
    }

    pub async fn transition_message(
        &self,
        id: Ulid,
        to: MessageStatus,
        actor: Option<String>,
    ) -> Result<ChatDraftMessage, EngineError> {
        validate_actor(&actor)?;
        let _guard = self.message_lock.lock().await;
        let mut message = self
            .messages
            .get(&id)
            .map(|m| m.value().clone())
            .ok_or_else(|| EngineError::not_found("message", id))?;
        if check_message(message.status, to)? == Step::Noop {
            return Ok(message);
        }

        let at = now_ms();
        self.wal_append(&Event::MessageTransitioned {
            id,
            to,
            actor: actor.clone(),
            at,
        })
        .await?;
        apply_message_transition(&mut message, to, &actor, at);
        self.messages.insert(id, message.clone());

        if to == MessageStatus::Approved {
            self.notify.send(Notice::MessageApproved {
                message: message.clone(),
            });
        }
        Ok(message)
    }

    // ── WAL maintenance ──────────────────────────────────

    /// Rewrite the WAL with the minimal event set that recreates current
    /// state. Holds every lock in order while snapshotting so no append can
    /// slip between the snapshot and the swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let state = self.account.write().await;
        let mut keys: Vec<i64> = self.shards.iter().map(|e| *e.key()).collect();
        keys.sort_unstable();
        let mut shard_guards = Vec::with_capacity(keys.len());
        for key in keys {
            let shard = self.shards.get(&key).map(|e| e.value().clone());
            if let Some(shard) = shard {
                shard_guards.push(shard.write_owned().await);
            }
        }
        let messages_guard = self.message_lock.lock().await;

        let mut events = vec![
            Event::AccountCreated {
                account: state.account.clone(),
            },
            Event::ScheduleReplaced {
                schedule: state.schedule.clone(),
            },
            Event::BlackoutsReplaced {
                blackouts: state.blackouts.clone(),
            },
            Event::PolicyUpdated {
                policy: state.policy,
            },
        ];
        events.extend(state.services.values().map(|s| Event::ServiceUpserted { service: s.clone() }));

        let mut appointments: Vec<Appointment> =
            self.appointments.iter().map(|e| e.value().clone()).collect();
        appointments.sort_by_key(|a| a.id);
        events.extend(appointments.into_iter().map(|appointment| Event::AppointmentCreated { appointment }));

        let mut messages: Vec<ChatDraftMessage> =
            self.messages.iter().map(|e| e.value().clone()).collect();
        messages.sort_by_key(|m| m.id);
        events.extend(messages.into_iter().map(|message| Event::MessageCreated { message }));

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(super::wal_err);

        drop(messages_guard);
        drop(shard_guards);
        drop(state);
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
