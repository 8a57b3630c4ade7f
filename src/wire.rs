use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::DateTime;
use chrono_tz::Tz;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::SlotgateAuthSource;
use crate::engine::{local_date, EngineError};
use crate::model::*;
use crate::observability::{self, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::schedule::{format_minute, weekday_name};
use crate::sql::{self, Command, SqlError};
use crate::tenant::Scheduler;

/// Who is talking: the account comes from the connection's database name,
/// the actor recorded on state changes from its user name.
struct Session {
    account: AccountId,
    actor: Option<String>,
}

pub struct SlotgateHandler {
    scheduler: Arc<Scheduler>,
    query_parser: Arc<SlotgateQueryParser>,
}

impl SlotgateHandler {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self {
            scheduler,
            query_parser: Arc::new(SlotgateQueryParser),
        }
    }

    fn session<C: ClientInfo>(&self, client: &C) -> PgWireResult<Session> {
        let metadata = client.metadata();
        let db = metadata.get("database").ok_or_else(|| {
            user_error("3D000", "no database given; connect with the account id as database".into())
        })?;
        let account = AccountId::new(db.as_str())
            .map_err(|e| user_error("3D000", format!("invalid account {db:?}: {e}")))?;
        Ok(Session {
            account,
            actor: metadata.get("user").cloned(),
        })
    }

    async fn run(&self, session: &Session, sql: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(session, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, session: &Session, cmd: Command) -> PgWireResult<Response> {
        // Creating an account is the one statement valid before the account exists.
        if let Command::UpsertAccount { name, timezone } = cmd {
            self.scheduler
                .upsert_account(Account {
                    id: session.account.clone(),
                    name,
                    timezone,
                })
                .await
                .map_err(engine_err)?;
            return Ok(inserted(1));
        }

        let engine = self.scheduler.account(&session.account).await.map_err(engine_err)?;
        let actor = session.actor.clone();

        match cmd {
            Command::UpsertAccount { name, timezone } => {
                engine.update_account(name, timezone).await.map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::SelectAccount => {
                let account = engine.account().await;
                encode_rows(account_schema(), vec![account], |row, a| {
                    row.encode_field(&a.id.to_string())?;
                    row.encode_field(&a.name)?;
                    row.encode_field(&a.timezone)
                })
            }
            Command::ImportSchedule { body, repair } => {
                let doc: serde_json::Value = serde_json::from_str(&body)
                    .map_err(|e| engine_err(EngineError::validation(format!("schedule is not JSON: {e}"))))?;
                let repaired = engine.import_schedule(doc, repair).await.map_err(engine_err)?;
                if repaired > 0 {
                    tracing::info!("account {}: backfilled weekday on {repaired} schedule entries", engine.id);
                }
                Ok(inserted(1))
            }
            Command::SelectSchedule => {
                let schedule = engine.schedule().await;
                let mut rows = Vec::new();
                for day in schedule.days() {
                    let name = weekday_name(day.weekday);
                    if day.time_slots.is_empty() {
                        rows.push((name.to_string(), day.is_available, None, None));
                    }
                    for slot in &day.time_slots {
                        rows.push((
                            name.to_string(),
                            day.is_available,
                            Some(format_minute(slot.start)),
                            Some(format_minute(slot.end)),
                        ));
                    }
                }
                encode_rows(schedule_schema(), rows, |row, (name, open, start, end)| {
                    row.encode_field(name)?;
                    row.encode_field(open)?;
                    row.encode_field(start)?;
                    row.encode_field(end)
                })
            }
            Command::InsertBlackouts { blackouts } => {
                let count = blackouts.len();
                engine.add_blackouts(blackouts).await.map_err(engine_err)?;
                Ok(inserted(count))
            }
            Command::DeleteBlackout { date } => {
                let removed = engine.remove_blackout(date).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(removed)))
            }
            Command::SelectBlackouts => {
                let blackouts = engine.blackouts().await;
                encode_rows(blackout_schema(), blackouts, |row, b| {
                    row.encode_field(&format_date(b.date))?;
                    row.encode_field(&b.reason)?;
                    row.encode_field(&b.recurring)
                })
            }
            Command::UpsertService { service } => {
                engine.upsert_service(service).await.map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::SelectServices => {
                let services = engine.services().await;
                encode_rows(service_schema(), services, |row, s| {
                    row.encode_field(&s.id.to_string())?;
                    row.encode_field(&s.name)?;
                    row.encode_field(&(s.duration_minutes as i64))?;
                    row.encode_field(&s.is_active)
                })
            }
            Command::SelectAvailability {
                from,
                to,
                duration_minutes,
            } => {
                let slots = engine
                    .free_slots(from, to, duration_minutes)
                    .await
                    .map_err(engine_err)?;
                let tz = engine.context().await.timezone;
                encode_rows(availability_schema(), slots, |row, slot| {
                    row.encode_field(&local_date(&tz, slot.start).map(format_date))?;
                    row.encode_field(&slot.start)?;
                    row.encode_field(&slot.end)?;
                    row.encode_field(&local_clock(&tz, slot.start))?;
                    row.encode_field(&local_clock(&tz, slot.end))
                })
            }
            Command::InsertAppointment { request } => {
                engine.book(request).await.map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::SelectAppointments { id, filter } => {
                let appointments: Vec<Appointment> = match id {
                    Some(id) => engine
                        .get_appointment(&id)
                        .ok()
                        .into_iter()
                        .filter(|a| filter.status.is_none_or(|s| a.status == s))
                        .filter(|a| filter.window.is_none_or(|w| a.span.overlaps(&w)))
                        .collect(),
                    None => engine.list_appointments(filter),
                };
                encode_rows(appointment_schema(), appointments, encode_appointment)
            }
            Command::CancelAppointment { id } => {
                engine.cancel(id, actor).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::TransitionAppointment { id, status } => {
                engine.transition(id, status, actor).await.map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::SelectPolicy => {
                let policy = engine.review_policy().await;
                encode_rows(policy_schema(), vec![policy], |row, p| {
                    row.encode_field(&p.appointment_review.to_string())?;
                    row.encode_field(&p.message_review.to_string())
                })
            }
            Command::UpdatePolicy {
                appointment_review,
                message_review,
            } => {
                let mut policy = engine.review_policy().await;
                if let Some(mode) = appointment_review {
                    policy.appointment_review = mode;
                }
                if let Some(mode) = message_review {
                    policy.message_review = mode;
                }
                engine.set_review_policy(policy).await.map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::InsertMessage { id, content, flagged } => {
                engine
                    .submit_message(id, content, flagged, actor)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::SelectMessages { id, status } => {
                let messages: Vec<ChatDraftMessage> = match id {
                    Some(id) => engine
                        .get_message(&id)
                        .ok()
                        .into_iter()
                        .filter(|m| status.is_none_or(|s| m.status == s))
                        .collect(),
                    None => engine.list_messages(status),
                };
                encode_rows(message_schema(), messages, |row, m| {
                    row.encode_field(&m.id.to_string())?;
                    row.encode_field(&m.content)?;
                    row.encode_field(&m.status.to_string())?;
                    row.encode_field(&m.flagged)?;
                    row.encode_field(&m.created_at)?;
                    row.encode_field(&m.updated_at)?;
                    row.encode_field(&m.last_actor)
                })
            }
            Command::TransitionMessage { id, status } => {
                engine
                    .transition_message(id, status, actor)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
        }
    }
}

fn inserted(rows: usize) -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(rows))
}

fn encode_appointment(row: &mut DataRowEncoder, a: &Appointment) -> PgWireResult<()> {
    row.encode_field(&a.id.to_string())?;
    row.encode_field(&a.status.to_string())?;
    row.encode_field(&a.span.start)?;
    row.encode_field(&a.span.end)?;
    row.encode_field(&(a.duration_minutes as i64))?;
    row.encode_field(&a.service_id.map(|s| s.to_string()))?;
    row.encode_field(&a.customer.name)?;
    row.encode_field(&a.customer.phone)?;
    row.encode_field(&a.customer.email)?;
    row.encode_field(&a.flagged)?;
    row.encode_field(&a.created_at)?;
    row.encode_field(&a.updated_at)?;
    row.encode_field(&a.last_actor)
}

fn encode_rows<T>(
    schema: Vec<FieldInfo>,
    items: Vec<T>,
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> PgWireResult<Response> {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

/// `HH:MM` in the account's zone.
fn local_clock(tz: &Tz, at: Ms) -> Option<String> {
    DateTime::from_timestamp_millis(at).map(|utc| utc.with_timezone(tz).format("%H:%M").to_string())
}

// ── Result schemas ───────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn account_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("timezone", Type::VARCHAR),
    ]
}

fn schedule_schema() -> Vec<FieldInfo> {
    vec![
        field("weekday", Type::VARCHAR),
        field("is_available", Type::BOOL),
        field("start", Type::VARCHAR),
        field("end", Type::VARCHAR),
    ]
}

fn blackout_schema() -> Vec<FieldInfo> {
    vec![
        field("date", Type::VARCHAR),
        field("reason", Type::VARCHAR),
        field("recurring", Type::BOOL),
    ]
}

fn service_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("duration_minutes", Type::INT8),
        field("active", Type::BOOL),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        field("date", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
        field("start_time", Type::VARCHAR),
        field("end_time", Type::VARCHAR),
    ]
}

fn appointment_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("status", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
        field("duration_minutes", Type::INT8),
        field("service_id", Type::VARCHAR),
        field("customer_name", Type::VARCHAR),
        field("customer_phone", Type::VARCHAR),
        field("customer_email", Type::VARCHAR),
        field("flagged", Type::BOOL),
        field("created_at", Type::INT8),
        field("updated_at", Type::INT8),
        field("last_actor", Type::VARCHAR),
    ]
}

fn policy_schema() -> Vec<FieldInfo> {
    vec![
        field("appointment_review", Type::VARCHAR),
        field("message_review", Type::VARCHAR),
    ]
}

fn message_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("content", Type::VARCHAR),
        field("status", Type::VARCHAR),
        field("flagged", Type::BOOL),
        field("created_at", Type::INT8),
        field("updated_at", Type::INT8),
        field("last_actor", Type::VARCHAR),
    ]
}

/// Result columns of a statement, known before its parameters are bound.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let Some(table) = select_table(sql) else {
        return vec![];
    };
    match table.as_str() {
        "account" => account_schema(),
        "schedule" => schedule_schema(),
        "blackouts" => blackout_schema(),
        "services" => service_schema(),
        "availability" => availability_schema(),
        "appointments" => appointment_schema(),
        "policy" => policy_schema(),
        "messages" => message_schema(),
        _ => vec![],
    }
}

/// Table named after the first FROM of a SELECT.
fn select_table(sql: &str) -> Option<String> {
    let lower = sql.to_lowercase();
    let mut words = lower.split_whitespace();
    if words.next()? != "select" {
        return None;
    }
    words.find(|w| *w == "from")?;
    let table = words.next()?;
    Some(table.trim_matches(|c| c == '"' || c == ';').to_string())
}

#[async_trait]
impl SimpleQueryHandler for SlotgateHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let session = self.session(client)?;
        Ok(vec![self.run(&session, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SlotgateQueryParser;

#[async_trait]
impl QueryParser for SlotgateQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SlotgateHandler {
    type Statement = String;
    type QueryParser = SlotgateQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let session = self.session(client)?;
        let sql = substitute_params(portal);
        self.run(&session, &sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// `$N` placeholders outside quoted literals and identifiers, as
/// (byte range, N) in statement order.
fn placeholders(sql: &str) -> Vec<(std::ops::Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                // A doubled quote inside the literal is an escape and
                // leaves it open.
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == quote {
                        if bytes.get(i + 1) == Some(&quote) {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'$' => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if let Ok(n) = sql[start..end].parse::<usize>() {
                    found.push((i..end, n));
                }
                i = end;
            }
            _ => i += 1,
        }
    }
    found
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Inline bound parameters (text format) as quoted literals in one pass,
/// so text inside a bound value is never read as a placeholder.
fn bind_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut copied = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        result.push_str(&sql[copied..range.start]);
        match param {
            Some(bytes) => {
                result.push('\'');
                result.push_str(&String::from_utf8_lossy(bytes.as_ref()).replace('\'', "''"));
                result.push('\'');
            }
            None => result.push_str("NULL"),
        }
        copied = range.end;
    }
    result.push_str(&sql[copied..]);
    result
}

fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SlotgateFactory {
    handler: Arc<SlotgateHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SlotgateAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SlotgateFactory {
    pub fn new(scheduler: Arc<Scheduler>, password: String) -> Self {
        Self {
            handler: Arc::new(SlotgateHandler::new(scheduler)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                SlotgateAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotgateFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client socket until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    scheduler: Arc<Scheduler>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = SlotgateFactory::new(scheduler, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Error mapping ────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

/// SQLSTATE for an engine failure.
pub fn engine_sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation(_) | EngineError::LimitExceeded(_) => "22023",
        EngineError::NotFound { .. } => "P0002",
        EngineError::AlreadyExists { .. } => "23505",
        EngineError::Conflict(_) => "23P01",
        EngineError::InvalidTransition { .. } => "55000",
        EngineError::WalError(_) => "XX000",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if matches!(e, EngineError::WalError(_)) {
        tracing::error!("internal error: {e}");
    }
    user_error(engine_sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = match &e {
        SqlError::UnknownTable(_) => "42P01",
        SqlError::UnknownColumn(..) => "42703",
        e if e.is_invalid_value() => "22023",
        _ => "42601",
    };
    user_error(code, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn count_params_finds_highest() {
        assert_eq!(count_params("SELECT * FROM messages"), 0);
        assert_eq!(count_params("INSERT INTO transitions VALUES ($1, $2)"), 2);
        assert_eq!(count_params("VALUES ($2, $10, $1)"), 10);
        assert_eq!(count_params("price $ 5"), 0);
        assert_eq!(count_params("VALUES ('costs $3', $1)"), 1);
    }

    #[test]
    fn bound_values_are_not_rescanned() {
        let sql = "INSERT INTO messages (id, content, flagged) VALUES ($1, $2, $3)";
        let params = [Some("01J0000000000000000000000A"), Some("Deposit is $1 per seat"), Some("false")];
        assert_eq!(
            bind_params(sql, &params),
            "INSERT INTO messages (id, content, flagged) VALUES \
             ('01J0000000000000000000000A', 'Deposit is $1 per seat', 'false')"
        );
    }

    #[test]
    fn bind_params_skips_quoted_text_and_escapes() {
        let params = [Some("it's"), None];
        assert_eq!(
            bind_params("SELECT '$1', \"$2\", $1, $2, $3", &params),
            "SELECT '$1', \"$2\", 'it''s', NULL, $3"
        );
        assert_eq!(bind_params("VALUES ('a''$1', $1)", &params), "VALUES ('a''$1', 'it''s')");
        // Two-digit placeholders are matched whole.
        let many: Vec<Option<&str>> = (1..=10).map(|i| Some(if i == 10 { "ten" } else { "x" })).collect();
        assert_eq!(bind_params("$10 $1", &many), "'ten' 'x'");
    }

    #[test]
    fn result_schema_follows_from_table() {
        assert_eq!(result_schema("SELECT * FROM availability WHERE date = $1").len(), 5);
        assert_eq!(result_schema("select * from \"appointments\";").len(), 13);
        assert!(result_schema("INSERT INTO policy VALUES ('never', 'never')").is_empty());
        assert!(result_schema("SELECT * FROM nowhere").is_empty());
    }

    #[test]
    fn sqlstates_distinguish_failures() {
        assert_eq!(engine_sqlstate(&EngineError::Conflict(Ulid::new())), "23P01");
        assert_eq!(engine_sqlstate(&EngineError::validation("x")), "22023");
        assert_eq!(engine_sqlstate(&EngineError::not_found("appointment", "x")), "P0002");
        assert_eq!(
            engine_sqlstate(&EngineError::InvalidTransition {
                from: "completed",
                to: "pending"
            }),
            "55000"
        );
        assert_eq!(engine_sqlstate(&EngineError::WalError("disk".into())), "XX000");
    }

    #[test]
    fn local_clock_uses_account_zone() {
        let tz: Tz = "Europe/Berlin".parse().unwrap();
        // 2030-01-07T10:00:00Z
        assert_eq!(local_clock(&tz, 1_894_010_400_000).as_deref(), Some("11:00"));
    }
}
