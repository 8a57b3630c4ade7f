mod availability;
mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod queries;

pub use availability::{
    free_slots, local_date, local_instant, merge_overlapping, open_intervals, subtract_intervals,
};
pub use error::EngineError;
pub use lifecycle::{appointment_allows, check_appointment, check_message, message_allows, Step};

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono_tz::Tz;
use dashmap::{DashMap, DashSet};
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::schedule::{BlackoutDate, WeeklySchedule};
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it and drain every Append already queued behind it.
/// 3. One fsync for the whole batch, then answer every sender.
///
/// A non-append command ends the batch; it runs after the flush so it
/// observes every append queued before it.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut trailing = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    trailing = Some(other);
                    break;
                }
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        flush_batch(&mut wal, batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());

        if let Some(cmd) = trailing {
            handle_non_append(&mut wal, cmd);
        }
    }
}

/// Encode every event first; one that cannot be encoded fails alone.
/// The rest go out in a single `append_batch` and share its result.
fn flush_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    let mut entries = Vec::with_capacity(batch.len());
    let mut waiting = Vec::with_capacity(batch.len());
    for (event, tx) in batch {
        match Wal::encode_entry(&event) {
            Ok(entry) => {
                entries.push(entry);
                waiting.push(tx);
            }
            Err(e) => {
                tracing::warn!("WAL refused event for {}: {e}", wal.path().display());
                let _ = tx.send(Err(e));
            }
        }
    }
    if entries.is_empty() {
        return;
    }
    let result = wal.append_batch(&entries);
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {}: {e}", wal.path().display());
    }
    for tx in waiting {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            flush_batch(wal, vec![(event, response)]);
        }
    }
}

pub(super) fn wal_err(e: io::Error) -> EngineError {
    EngineError::WalError(e.to_string())
}

// ── Account state ────────────────────────────────────────

/// Administrator-owned configuration of one account. Read-only to the
/// booking path.
#[derive(Debug, Clone)]
pub struct AccountState {
    pub account: Account,
    pub tz: Tz,
    pub schedule: WeeklySchedule,
    pub blackouts: Vec<BlackoutDate>,
    pub services: BTreeMap<Ulid, Service>,
    pub policy: ReviewPolicy,
}

impl AccountState {
    fn new(account: Account) -> Result<Self, EngineError> {
        let tz = parse_timezone(&account.timezone)?;
        Ok(Self {
            account,
            tz,
            schedule: WeeklySchedule::default(),
            blackouts: Vec::new(),
            services: BTreeMap::new(),
            policy: ReviewPolicy::default(),
        })
    }

    pub fn context(&self) -> AccountContext {
        AccountContext {
            account_id: self.account.id.clone(),
            timezone: self.tz,
            review_policy: self.policy,
        }
    }

    /// Apply a configuration event. Appointment and message events are
    /// not account state and are ignored here.
    fn apply(&mut self, event: &Event) {
        match event {
            Event::AccountUpdated { name, timezone } => {
                // Validated before it was logged; a bad zone on replay keeps the old one.
                if let Ok(tz) = parse_timezone(timezone) {
                    self.tz = tz;
                    self.account.timezone = timezone.clone();
                }
                self.account.name = name.clone();
            }
            Event::ScheduleReplaced { schedule } => self.schedule = schedule.clone(),
            Event::BlackoutsReplaced { blackouts } => self.blackouts = blackouts.clone(),
            Event::ServiceUpserted { service } => {
                self.services.insert(service.id, service.clone());
            }
            Event::PolicyUpdated { policy } => self.policy = *policy,
            Event::AccountCreated { .. }
            | Event::AppointmentCreated { .. }
            | Event::AppointmentTransitioned { .. }
            | Event::MessageCreated { .. }
            | Event::MessageTransitioned { .. } => {}
        }
    }
}

// ── Calendar shards ──────────────────────────────────────

/// An active appointment's claim on the calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupancy {
    pub id: Ulid,
    pub span: Span,
}

/// Occupancy of one UTC day. An appointment crossing midnight is listed
/// in both shards it touches.
#[derive(Debug, Default)]
pub struct Shard {
    pub occupied: Vec<Occupancy>,
}

pub type SharedShard = Arc<RwLock<Shard>>;

/// Keys of every UTC day shard `span` touches, ascending.
pub(super) fn shard_keys(span: &Span) -> std::ops::RangeInclusive<i64> {
    span.start.div_euclid(DAY_MS)..=(span.end - 1).div_euclid(DAY_MS)
}

pub(super) fn apply_appointment_transition(
    appointment: &mut Appointment,
    to: AppointmentStatus,
    actor: &Option<String>,
    at: Ms,
) {
    appointment.status = to;
    appointment.updated_at = at;
    appointment.last_actor = actor.clone();
}

pub(super) fn apply_message_transition(
    message: &mut ChatDraftMessage,
    to: MessageStatus,
    actor: &Option<String>,
    at: Ms,
) {
    message.status = to;
    message.updated_at = at;
    message.last_actor = actor.clone();
}

/// Scheduling engine of a single account.
///
/// Lock order: `account`, then day shards in ascending key order, then
/// `message_lock`. Bookings on disjoint days never contend.
pub struct Engine {
    pub id: AccountId,
    pub(super) account: RwLock<AccountState>,
    pub(super) shards: DashMap<i64, SharedShard>,
    pub(super) appointments: DashMap<Ulid, Appointment>,
    /// Appointment ids with a booking in flight.
    pub(super) booking_ids: DashSet<Ulid>,
    pub(super) messages: DashMap<Ulid, ChatDraftMessage>,
    pub(super) message_lock: Mutex<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
}

impl Engine {
    /// Create a new account log at `wal_path`. Fails if one already exists.
    pub fn create(wal_path: PathBuf, account: Account, notify: Arc<NotifyHub>) -> Result<Self, EngineError> {
        mutations::validate_account_fields(&account.name, &account.timezone)?;
        if wal_path.exists() {
            return Err(EngineError::already_exists("account", &account.id));
        }
        let mut wal = Wal::open(&wal_path).map_err(wal_err)?;
        Wal::encode_entry(&Event::AccountCreated { account })
            .and_then(|entry| wal.append_batch(&[entry]))
            .map_err(wal_err)?;
        drop(wal);
        Self::open(wal_path, notify)
    }

    /// Rebuild an account from its log. A missing or empty log is an
    /// unknown account.
    pub fn open(wal_path: PathBuf, notify: Arc<NotifyHub>) -> Result<Self, EngineError> {
        let events = Wal::replay(&wal_path).map_err(wal_err)?;
        let mut events = events.into_iter();
        let mut state = match events.next() {
            Some(Event::AccountCreated { account }) => AccountState::new(account)?,
            Some(_) => {
                return Err(EngineError::WalError(format!(
                    "{} does not start with an account record",
                    wal_path.display()
                )));
            }
            None => {
                let stem = wal_path.file_stem().map(|s| s.to_string_lossy().into_owned());
                return Err(EngineError::not_found("account", stem.unwrap_or_default()));
            }
        };

        let mut appointments: HashMap<Ulid, Appointment> = HashMap::new();
        let mut messages: HashMap<Ulid, ChatDraftMessage> = HashMap::new();
        for event in events {
            match &event {
                Event::AppointmentCreated { appointment } => {
                    appointments.insert(appointment.id, appointment.clone());
                }
                Event::AppointmentTransitioned { id, to, actor, at } => {
                    if let Some(appt) = appointments.get_mut(id) {
                        apply_appointment_transition(appt, *to, actor, *at);
                    }
                }
                Event::MessageCreated { message } => {
                    messages.insert(message.id, message.clone());
                }
                Event::MessageTransitioned { id, to, actor, at } => {
                    if let Some(msg) = messages.get_mut(id) {
                        apply_message_transition(msg, *to, actor, *at);
                    }
                }
                other => state.apply(other),
            }
        }

        let shards: DashMap<i64, SharedShard> = DashMap::new();
        for appt in appointments.values().filter(|a| a.status.is_active()) {
            for key in shard_keys(&appt.span) {
                let shard = shards.entry(key).or_default().value().clone();
                // Sole owner during replay; the lock is always free.
                if let Ok(mut guard) = shard.try_write() {
                    guard.occupied.push(Occupancy { id: appt.id, span: appt.span });
                }
            }
        }

        let wal = Wal::open(&wal_path).map_err(wal_err)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            id: state.account.id.clone(),
            account: RwLock::new(state),
            shards,
            appointments: appointments.into_iter().collect(),
            booking_ids: DashSet::new(),
            messages: messages.into_iter().collect(),
            message_lock: Mutex::new(()),
            wal_tx,
            notify,
        })
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(wal_err)
    }

    /// Append a configuration event and apply it to account state.
    pub(super) async fn persist_and_apply(
        &self,
        state: &mut AccountState,
        event: Event,
    ) -> Result<(), EngineError> {
        self.wal_append(&event).await?;
        state.apply(&event);
        Ok(())
    }

    /// Write-lock every day shard `span` touches, in ascending key order.
    pub(super) async fn lock_shards(&self, span: &Span) -> Vec<OwnedRwLockWriteGuard<Shard>> {
        let mut guards = Vec::with_capacity(2);
        for key in shard_keys(span) {
            let shard = self.shards.entry(key).or_default().value().clone();
            guards.push(shard.write_owned().await);
        }
        guards
    }
}
