use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::compactor;
use crate::dispatch::{self, Outbound};
use crate::engine::{Engine, EngineError};
use crate::limits::*;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::schedule::{BlackoutDate, WeeklySchedule};

/// Owns one engine per account. Every call names its account first; an
/// id that belongs to a different account is simply not found.
///
/// Accounts are loaded lazily from `<data_dir>/<account_id>.wal`.
pub struct Scheduler {
    engines: DashMap<AccountId, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    outbound: Arc<dyn Outbound>,
    /// Serializes loading so two connections never replay the same log twice.
    opening: Mutex<()>,
}

impl Scheduler {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, outbound: Arc<dyn Outbound>) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            outbound,
            opening: Mutex::new(()),
        }
    }

    fn wal_path(&self, id: &AccountId) -> PathBuf {
        self.data_dir.join(format!("{id}.wal"))
    }

    pub fn loaded(&self) -> usize {
        self.engines.len()
    }

    /// Resolve an account, loading it from disk on first use.
    pub async fn account(&self, id: &AccountId) -> Result<Arc<Engine>, EngineError> {
        if let Some(engine) = self.engines.get(id) {
            return Ok(engine.value().clone());
        }
        let _guard = self.opening.lock().await;
        if let Some(engine) = self.engines.get(id) {
            return Ok(engine.value().clone());
        }
        self.check_capacity()?;
        let engine = Engine::open(self.wal_path(id), Arc::new(NotifyHub::new()))?;
        if &engine.id != id {
            return Err(EngineError::WalError(format!(
                "log for {id} belongs to account {}",
                engine.id
            )));
        }
        tracing::info!("loaded account {id}");
        Ok(self.start(engine))
    }

    pub async fn create_account(&self, account: Account) -> Result<Arc<Engine>, EngineError> {
        let _guard = self.opening.lock().await;
        if self.engines.contains_key(&account.id) {
            return Err(EngineError::already_exists("account", &account.id));
        }
        self.check_capacity()?;
        let id = account.id.clone();
        let engine = Engine::create(self.wal_path(&id), account, Arc::new(NotifyHub::new()))?;
        tracing::info!("created account {id}");
        Ok(self.start(engine))
    }

    /// Create the account, or update its name and timezone if it exists.
    pub async fn upsert_account(&self, account: Account) -> Result<Account, EngineError> {
        match self.account(&account.id).await {
            Ok(engine) => engine.update_account(account.name, account.timezone).await,
            Err(EngineError::NotFound { .. }) => {
                let id = account.id.clone();
                let (name, timezone) = (account.name.clone(), account.timezone.clone());
                match self.create_account(account).await {
                    Ok(engine) => Ok(engine.account().await),
                    // Another connection created it first.
                    Err(EngineError::AlreadyExists { .. }) => {
                        self.account(&id).await?.update_account(name, timezone).await
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    fn check_capacity(&self) -> Result<(), EngineError> {
        if self.engines.len() >= MAX_ACCOUNTS {
            return Err(EngineError::LimitExceeded("too many accounts"));
        }
        Ok(())
    }

    /// Register a freshly opened engine and spawn its compactor and dispatcher.
    fn start(&self, engine: Engine) -> Arc<Engine> {
        let engine = Arc::new(engine);

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        let rx = engine.notify.subscribe();
        let outbound = self.outbound.clone();
        tokio::spawn(async move {
            dispatch::run_dispatcher(rx, outbound).await;
        });

        self.engines.insert(engine.id.clone(), engine.clone());
        metrics::gauge!(crate::observability::ACCOUNTS_ACTIVE).set(self.engines.len() as f64);
        engine
    }

    // ── Account-scoped operations ────────────────────────

    pub async fn free_slots(
        &self,
        account: &AccountId,
        from: NaiveDate,
        to: NaiveDate,
        duration_minutes: u32,
    ) -> Result<Vec<Span>, EngineError> {
        self.account(account).await?.free_slots(from, to, duration_minutes).await
    }

    pub async fn book(&self, account: &AccountId, req: BookingRequest) -> Result<Appointment, EngineError> {
        self.account(account).await?.book(req).await
    }

    pub async fn transition(
        &self,
        account: &AccountId,
        id: Ulid,
        to: AppointmentStatus,
        actor: Option<String>,
    ) -> Result<Appointment, EngineError> {
        self.account(account).await?.transition(id, to, actor).await
    }

    pub async fn replace_schedule(&self, account: &AccountId, schedule: WeeklySchedule) -> Result<(), EngineError> {
        self.account(account).await?.replace_schedule(schedule).await
    }

    pub async fn replace_blackouts(
        &self,
        account: &AccountId,
        blackouts: Vec<BlackoutDate>,
    ) -> Result<(), EngineError> {
        self.account(account).await?.replace_blackouts(blackouts).await
    }

    pub async fn review_policy(&self, account: &AccountId) -> Result<ReviewPolicy, EngineError> {
        Ok(self.account(account).await?.review_policy().await)
    }

    pub async fn set_review_policy(&self, account: &AccountId, policy: ReviewPolicy) -> Result<(), EngineError> {
        self.account(account).await?.set_review_policy(policy).await
    }

    pub async fn submit_message(
        &self,
        account: &AccountId,
        id: Ulid,
        content: String,
        flagged: bool,
        actor: Option<String>,
    ) -> Result<ChatDraftMessage, EngineError> {
        self.account(account).await?.submit_message(id, content, flagged, actor).await
    }

    pub async fn transition_message(
        &self,
        account: &AccountId,
        id: Ulid,
        to: MessageStatus,
        actor: Option<String>,
    ) -> Result<ChatDraftMessage, EngineError> {
        self.account(account).await?.transition_message(id, to, actor).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::LogOutbound;
    use crate::schedule::{DayAvailability, TimeSlot, WEEKDAYS};
    use chrono::{TimeZone, Utc};
    use std::fs;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotgate_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn scheduler(dir: PathBuf) -> Scheduler {
        Scheduler::new(dir, 1000, Arc::new(LogOutbound))
    }

    fn id(raw: &str) -> AccountId {
        AccountId::new(raw).unwrap()
    }

    fn account(raw: &str) -> Account {
        Account {
            id: id(raw),
            name: raw.to_uppercase(),
            timezone: "UTC".into(),
        }
    }

    fn open_weekdays() -> WeeklySchedule {
        let days = WEEKDAYS
            .into_iter()
            .map(|d| {
                DayAvailability::new(d, true, vec![TimeSlot::parse("09:00", "17:00").unwrap()]).unwrap()
            })
            .collect();
        WeeklySchedule::new(days).unwrap()
    }

    fn at(h: u32) -> Ms {
        Utc.with_ymd_and_hms(2030, 1, 7, h, 0, 0).unwrap().timestamp_millis()
    }

    fn request(start: Ms) -> BookingRequest {
        BookingRequest {
            id: Ulid::new(),
            customer: Customer {
                name: "Grace".into(),
                phone: None,
                email: Some("grace@example.com".into()),
            },
            start,
            duration_minutes: Some(60),
            service_id: None,
            flagged: false,
        }
    }

    #[tokio::test]
    async fn accounts_are_isolated() {
        let sched = scheduler(test_data_dir("isolation"));
        let a = id("salon_a");
        let b = id("salon_b");
        sched.create_account(account("salon_a")).await.unwrap();
        sched.create_account(account("salon_b")).await.unwrap();
        sched.replace_schedule(&a, open_weekdays()).await.unwrap();
        sched.replace_schedule(&b, open_weekdays()).await.unwrap();

        let appt = sched.book(&a, request(at(10))).await.unwrap();

        // Same slot is free in the other account.
        sched.book(&b, request(at(10))).await.unwrap();

        // A's appointment is invisible through B.
        let err = sched
            .transition(&b, appt.id, AppointmentStatus::Cancelled, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
        let day = NaiveDate::from_ymd_opt(2030, 1, 7).unwrap();
        let free_b = sched.free_slots(&b, day, day, 60).await.unwrap();
        assert_eq!(free_b.len(), 2);
        assert_eq!(
            sched.account(&a).await.unwrap().get_appointment(&appt.id).unwrap().status,
            AppointmentStatus::Booked
        );
    }

    #[tokio::test]
    async fn unknown_account_is_not_found() {
        let dir = test_data_dir("unknown");
        let sched = scheduler(dir.clone());
        let err = sched.review_policy(&id("ghost")).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { entity: "account", .. }));
        assert!(!dir.join("ghost.wal").exists());
    }

    #[tokio::test]
    async fn same_engine_returned() {
        let sched = scheduler(test_data_dir("same_engine"));
        sched.create_account(account("foo")).await.unwrap();
        let e1 = sched.account(&id("foo")).await.unwrap();
        let e2 = sched.account(&id("foo")).await.unwrap();
        assert!(Arc::ptr_eq(&e1, &e2));
        assert!(matches!(
            sched.create_account(account("foo")).await,
            Err(EngineError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn accounts_reload_from_disk() {
        let dir = test_data_dir("reload");
        {
            let sched = scheduler(dir.clone());
            sched.create_account(account("persisted")).await.unwrap();
            sched
                .set_review_policy(
                    &id("persisted"),
                    ReviewPolicy {
                        appointment_review: ReviewMode::Always,
                        message_review: ReviewMode::Never,
                    },
                )
                .await
                .unwrap();
        }
        let sched = scheduler(dir);
        assert_eq!(sched.loaded(), 0);
        let policy = sched.review_policy(&id("persisted")).await.unwrap();
        assert_eq!(policy.appointment_review, ReviewMode::Always);
        assert_eq!(sched.loaded(), 1);
    }

    #[tokio::test]
    async fn upsert_account_creates_then_updates() {
        let sched = scheduler(test_data_dir("upsert"));
        let created = sched.upsert_account(account("studio")).await.unwrap();
        assert_eq!(created.name, "STUDIO");

        let mut renamed = account("studio");
        renamed.name = "Studio Nord".into();
        renamed.timezone = "Europe/Oslo".into();
        let updated = sched.upsert_account(renamed).await.unwrap();
        assert_eq!(updated.name, "Studio Nord");
        assert_eq!(updated.timezone, "Europe/Oslo");
        assert_eq!(sched.loaded(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_upserts_of_new_account_all_succeed() {
        let sched = Arc::new(scheduler(test_data_dir("upsert_race")));
        let mut handles = Vec::new();
        for i in 0..8 {
            let sched = sched.clone();
            handles.push(tokio::spawn(async move {
                let mut acct = account("studio");
                acct.name = format!("Studio {i}");
                sched.upsert_account(acct).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(sched.loaded(), 1);
        let stored = sched.account(&id("studio")).await.unwrap().account().await;
        assert!(stored.name.starts_with("Studio "));
    }

    #[tokio::test]
    async fn messages_scoped_per_account() {
        let sched = scheduler(test_data_dir("messages"));
        sched.create_account(account("m_a")).await.unwrap();
        sched.create_account(account("m_b")).await.unwrap();
        let msg = sched
            .submit_message(&id("m_a"), Ulid::new(), "Hi!".into(), true, None)
            .await
            .unwrap();
        assert_eq!(msg.status, MessageStatus::Pending);
        let err = sched
            .transition_message(&id("m_b"), msg.id, MessageStatus::Approved, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }
}
