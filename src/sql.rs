use chrono::{DateTime, NaiveDate};
use sqlparser::ast::{
    self, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

use crate::model::*;
use crate::schedule::BlackoutDate;

/// Parsed command from SQL input. The account is never part of a command;
/// it comes from the connection.
#[derive(Debug, PartialEq)]
pub enum Command {
    UpsertAccount {
        name: String,
        timezone: String,
    },
    SelectAccount,
    ImportSchedule {
        body: String,
        repair: bool,
    },
    SelectSchedule,
    InsertBlackouts {
        blackouts: Vec<BlackoutDate>,
    },
    DeleteBlackout {
        date: NaiveDate,
    },
    SelectBlackouts,
    UpsertService {
        service: Service,
    },
    SelectServices,
    SelectAvailability {
        from: NaiveDate,
        to: NaiveDate,
        duration_minutes: u32,
    },
    InsertAppointment {
        request: BookingRequest,
    },
    SelectAppointments {
        id: Option<Ulid>,
        filter: AppointmentFilter,
    },
    CancelAppointment {
        id: Ulid,
    },
    TransitionAppointment {
        id: Ulid,
        status: AppointmentStatus,
    },
    SelectPolicy,
    UpdatePolicy {
        appointment_review: Option<ReviewMode>,
        message_review: Option<ReviewMode>,
    },
    InsertMessage {
        id: Ulid,
        content: String,
        flagged: bool,
    },
    SelectMessages {
        id: Option<Ulid>,
        status: Option<MessageStatus>,
    },
    TransitionMessage {
        id: Ulid,
        status: MessageStatus,
    },
}

/// Column order assumed when an INSERT names no columns.
fn default_columns(table: &str) -> Option<&'static [&'static str]> {
    let columns: &'static [&'static str] = match table {
        "account" => &["name", "timezone"],
        "schedule" => &["body", "repair"],
        "blackouts" => &["date", "reason", "recurring"],
        "services" => &["id", "name", "duration_minutes", "active"],
        "appointments" => &[
            "id",
            "service_id",
            "start",
            "duration_minutes",
            "customer_name",
            "customer_phone",
            "customer_email",
            "flagged",
        ],
        "transitions" => &["appointment_id", "status"],
        "policy" => &["appointment_review", "message_review"],
        "messages" => &["id", "content", "flagged"],
        "message_transitions" => &["message_id", "status"],
        _ => return None,
    };
    Some(columns)
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row addressed by column name.
struct Row<'a> {
    table: &'static str,
    columns: &'a [String],
    values: &'a [Expr],
}

impl<'a> Row<'a> {
    fn get(&self, name: &str) -> Option<&'a Expr> {
        let idx = self.columns.iter().position(|c| c == name)?;
        self.values.get(idx).filter(|e| !is_null(e))
    }

    fn required(&self, name: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(name).ok_or(SqlError::MissingColumn(self.table, name))
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let defaults = default_columns(&table).ok_or_else(|| SqlError::UnknownTable(table.clone()))?;
    let table: &'static str = known_table(&table);

    let columns: Vec<String> = if insert.columns.is_empty() {
        defaults.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if let Some(unknown) = columns.iter().find(|c| !defaults.iter().any(|d| *d == c.as_str())) {
        return Err(SqlError::UnknownColumn(table, unknown.clone()));
    }

    let rows = extract_insert_rows(insert)?;
    let mut parsed = Vec::with_capacity(rows.len());
    for values in &rows {
        if values.len() != columns.len() {
            return Err(SqlError::WrongArity(table, columns.len(), values.len()));
        }
        parsed.push(Row {
            table,
            columns: &columns,
            values,
        });
    }

    if table == "blackouts" {
        let blackouts = parsed
            .iter()
            .enumerate()
            .map(|(i, row)| parse_blackout(row).map_err(|e| SqlError::Row(i, Box::new(e))))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Command::InsertBlackouts { blackouts });
    }

    let [row] = parsed.as_slice() else {
        return Err(SqlError::Unsupported(format!("multi-row INSERT into {table}")));
    };

    match table {
        "account" => Ok(Command::UpsertAccount {
            name: parse_string(row.required("name")?)?,
            timezone: parse_string(row.required("timezone")?)?,
        }),
        "schedule" => Ok(Command::ImportSchedule {
            body: parse_string(row.required("body")?)?,
            repair: row.get("repair").map(parse_bool).transpose()?.unwrap_or(false),
        }),
        "services" => Ok(Command::UpsertService {
            service: Service {
                id: parse_ulid(row.required("id")?)?,
                name: parse_string(row.required("name")?)?,
                duration_minutes: parse_u32(row.required("duration_minutes")?)?,
                is_active: row.get("active").map(parse_bool).transpose()?.unwrap_or(true),
            },
        }),
        "appointments" => Ok(Command::InsertAppointment {
            request: BookingRequest {
                id: row.get("id").map(parse_ulid).transpose()?.unwrap_or_else(Ulid::new),
                customer: Customer {
                    name: parse_string(row.required("customer_name")?)?,
                    phone: row.get("customer_phone").map(parse_string).transpose()?,
                    email: row.get("customer_email").map(parse_string).transpose()?,
                },
                start: parse_instant(row.required("start")?)?,
                duration_minutes: row.get("duration_minutes").map(parse_u32).transpose()?,
                service_id: row.get("service_id").map(parse_ulid).transpose()?,
                flagged: row.get("flagged").map(parse_bool).transpose()?.unwrap_or(false),
            },
        }),
        "transitions" => Ok(Command::TransitionAppointment {
            id: parse_ulid(row.required("appointment_id")?)?,
            status: parse_enum(row.required("status")?)?,
        }),
        "policy" => Ok(Command::UpdatePolicy {
            appointment_review: row.get("appointment_review").map(parse_enum).transpose()?,
            message_review: row.get("message_review").map(parse_enum).transpose()?,
        }),
        "messages" => Ok(Command::InsertMessage {
            id: row.get("id").map(parse_ulid).transpose()?.unwrap_or_else(Ulid::new),
            content: parse_string(row.required("content")?)?,
            flagged: row.get("flagged").map(parse_bool).transpose()?.unwrap_or(false),
        }),
        "message_transitions" => Ok(Command::TransitionMessage {
            id: parse_ulid(row.required("message_id")?)?,
            status: parse_enum(row.required("status")?)?,
        }),
        other => Err(SqlError::Unsupported(format!("INSERT into {other}"))),
    }
}

fn parse_blackout(row: &Row<'_>) -> Result<BlackoutDate, SqlError> {
    Ok(BlackoutDate {
        date: parse_date(row.required("date")?)?,
        reason: row.get("reason").map(parse_string).transpose()?,
        recurring: row.get("recurring").map(parse_bool).transpose()?.unwrap_or(false),
    })
}

/// Intern a table name already checked by `default_columns`.
fn known_table(name: &str) -> &'static str {
    const TABLES: [&str; 9] = [
        "account",
        "schedule",
        "blackouts",
        "services",
        "appointments",
        "transitions",
        "policy",
        "messages",
        "message_transitions",
    ];
    TABLES.into_iter().find(|t| *t == name).unwrap_or("unknown")
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let conditions = where_conditions(delete.selection.as_ref());

    match table.as_str() {
        "appointments" => Ok(Command::CancelAppointment {
            id: parse_ulid(find_eq(&conditions, "id").ok_or(SqlError::MissingFilter("id"))?)?,
        }),
        "blackouts" => Ok(Command::DeleteBlackout {
            date: parse_date(find_eq(&conditions, "date").ok_or(SqlError::MissingFilter("date"))?)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;
    let conditions = where_conditions(select.selection.as_ref());

    match table.as_str() {
        "account" => Ok(Command::SelectAccount),
        "schedule" => Ok(Command::SelectSchedule),
        "blackouts" => Ok(Command::SelectBlackouts),
        "services" => Ok(Command::SelectServices),
        "policy" => Ok(Command::SelectPolicy),
        "availability" => parse_availability(&conditions),
        "appointments" => {
            let start = find_op(&conditions, "start", &BinaryOperator::GtEq).map(parse_instant).transpose()?;
            let end = find_op(&conditions, "end", &BinaryOperator::LtEq).map(parse_instant).transpose()?;
            let window = match (start, end) {
                (Some(s), Some(e)) if s < e => Some(Span::new(s, e)),
                (None, None) => None,
                _ => return Err(SqlError::InvalidValue("appointment window needs start >= and \"end\" <=, in order".into())),
            };
            Ok(Command::SelectAppointments {
                id: find_eq(&conditions, "id").map(parse_ulid).transpose()?,
                filter: AppointmentFilter {
                    status: find_eq(&conditions, "status").map(parse_enum).transpose()?,
                    window,
                },
            })
        }
        "messages" => Ok(Command::SelectMessages {
            id: find_eq(&conditions, "id").map(parse_ulid).transpose()?,
            status: find_eq(&conditions, "status").map(parse_enum).transpose()?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_availability(conditions: &[Condition<'_>]) -> Result<Command, SqlError> {
    let (from, to) = match find_eq(conditions, "date") {
        Some(day) => {
            let day = parse_date(day)?;
            (day, day)
        }
        None => (
            parse_date(find_op(conditions, "date", &BinaryOperator::GtEq).ok_or(SqlError::MissingFilter("date >="))?)?,
            parse_date(find_op(conditions, "date", &BinaryOperator::LtEq).ok_or(SqlError::MissingFilter("date <="))?)?,
        ),
    };
    let duration = find_eq(conditions, "duration").ok_or(SqlError::MissingFilter("duration"))?;
    Ok(Command::SelectAvailability {
        from,
        to,
        duration_minutes: parse_u32(duration)?,
    })
}

type Condition<'a> = (String, BinaryOperator, &'a Expr);

/// Flatten a conjunction of `column <op> value` comparisons.
fn where_conditions(selection: Option<&Expr>) -> Vec<Condition<'_>> {
    fn walk<'a>(expr: &'a Expr, out: &mut Vec<Condition<'a>>) {
        match expr {
            Expr::BinaryOp {
                left,
                op: BinaryOperator::And,
                right,
            } => {
                walk(left, out);
                walk(right, out);
            }
            Expr::BinaryOp { left, op, right } => {
                if let Some(col) = expr_column_name(left) {
                    out.push((col, op.clone(), right.as_ref()));
                }
            }
            Expr::Nested(inner) => walk(inner, out),
            _ => {}
        }
    }
    let mut out = Vec::new();
    if let Some(expr) = selection {
        walk(expr, &mut out);
    }
    out
}

fn find_op<'a>(conditions: &[Condition<'a>], col: &str, op: &BinaryOperator) -> Option<&'a Expr> {
    conditions
        .iter()
        .find(|(c, o, _)| c == col && o == op)
        .map(|(_, _, e)| *e)
}

fn find_eq<'a>(conditions: &[Condition<'a>], col: &str) -> Option<&'a Expr> {
    find_op(conditions, col, &BinaryOperator::Eq)
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) if !values.rows.is_empty() => Ok(values.rows.clone()),
        SetExpr::Values(_) => Err(SqlError::Parse("empty VALUES".into())),
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::DollarQuotedString(ast::DollarQuotedString { value: s, .. })) => {
            Ok(s.clone())
        }
        Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::InvalidValue(format!("bad ULID {s:?}: {e}")))
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64(expr)?);
    }
    let s = parse_string(expr)?;
    s.trim()
        .parse()
        .map_err(|e| SqlError::InvalidValue(format!("bad integer {s:?}: {e}")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::InvalidValue(format!("{v} out of range")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" | "yes" => Ok(true),
            "false" | "f" | "0" | "no" => Ok(false),
            _ => Err(SqlError::InvalidValue(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(other) => Err(SqlError::Parse(format!("expected bool, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| SqlError::InvalidValue(format!("bad date {s:?} (expected YYYY-MM-DD): {e}")))
}

/// Unix milliseconds, or an RFC 3339 timestamp with offset.
fn parse_instant(expr: &Expr) -> Result<Ms, SqlError> {
    if let Some(Value::SingleQuotedString(s)) = extract_value(expr)
        && s.contains('T')
    {
        return DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| dt.timestamp_millis())
            .map_err(|e| SqlError::InvalidValue(format!("bad timestamp {s:?}: {e}")));
    }
    parse_i64(expr)
}

fn parse_enum<T>(expr: &Expr) -> Result<T, SqlError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    parse_string(expr)?
        .parse()
        .map_err(|e: T::Err| SqlError::InvalidValue(e.to_string()))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("{0}: unknown column {1}")]
    UnknownColumn(&'static str, String),
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("{0}: missing column {1}")]
    MissingColumn(&'static str, &'static str),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    /// Well-formed SQL carrying a value the domain rejects.
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("row {0}: {1}")]
    Row(usize, Box<SqlError>),
}

impl SqlError {
    /// True when the statement parsed but a value in it is unacceptable.
    pub fn is_invalid_value(&self) -> bool {
        match self {
            SqlError::InvalidValue(_) => true,
            SqlError::Row(_, inner) => inner.is_invalid_value(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    #[test]
    fn parse_upsert_account() {
        let cmd = parse_sql("INSERT INTO account (name, timezone) VALUES ('Acme', 'Europe/Berlin')").unwrap();
        assert_eq!(
            cmd,
            Command::UpsertAccount {
                name: "Acme".into(),
                timezone: "Europe/Berlin".into()
            }
        );
    }

    #[test]
    fn parse_schedule_import_with_repair() {
        let sql = r#"INSERT INTO schedule (body, repair) VALUES ('{"monday": {"isAvailable": true, "timeSlots": []}}', true)"#;
        match parse_sql(sql).unwrap() {
            Command::ImportSchedule { body, repair } => {
                assert!(body.contains("monday"));
                assert!(repair);
            }
            other => panic!("expected ImportSchedule, got {other:?}"),
        }
    }

    #[test]
    fn parse_multi_row_blackouts() {
        let sql = "INSERT INTO blackouts (date, reason, recurring) VALUES ('2030-12-24', 'Holiday', false), ('2030-01-01', NULL, true)";
        match parse_sql(sql).unwrap() {
            Command::InsertBlackouts { blackouts } => {
                assert_eq!(blackouts.len(), 2);
                assert_eq!(blackouts[0].reason.as_deref(), Some("Holiday"));
                assert_eq!(blackouts[1].reason, None);
                assert!(blackouts[1].recurring);
            }
            other => panic!("expected InsertBlackouts, got {other:?}"),
        }
    }

    #[test]
    fn blackout_row_errors_name_the_row() {
        let sql = "INSERT INTO blackouts (date) VALUES ('2030-12-24'), ('24.12.2030')";
        let err = parse_sql(sql).unwrap_err();
        assert!(err.to_string().starts_with("row 1:"), "{err}");
        assert!(err.is_invalid_value());
    }

    #[test]
    fn parse_service_defaults_active() {
        let sql = format!("INSERT INTO services (id, name, duration_minutes) VALUES ('{ID}', 'Cut', 45)");
        match parse_sql(&sql).unwrap() {
            Command::UpsertService { service } => {
                assert_eq!(service.duration_minutes, 45);
                assert!(service.is_active);
            }
            other => panic!("expected UpsertService, got {other:?}"),
        }
    }

    #[test]
    fn parse_appointment_named_columns() {
        let sql = format!(
            "INSERT INTO appointments (id, start, duration_minutes, customer_name, customer_email, flagged) \
             VALUES ('{ID}', '2030-01-07T10:00:00Z', 30, 'Ada', 'ada@example.com', true)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertAppointment { request } => {
                assert_eq!(request.id.to_string(), ID);
                assert_eq!(request.start, 1_894_010_400_000);
                assert_eq!(request.duration_minutes, Some(30));
                assert_eq!(request.customer.email.as_deref(), Some("ada@example.com"));
                assert_eq!(request.customer.phone, None);
                assert_eq!(request.service_id, None);
                assert!(request.flagged);
            }
            other => panic!("expected InsertAppointment, got {other:?}"),
        }
    }

    #[test]
    fn parse_appointment_positional_with_ms() {
        let sql = format!(
            "INSERT INTO appointments VALUES ('{ID}', NULL, 1894010400000, 30, 'Ada', '+1555', NULL, false)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertAppointment { request } => {
                assert_eq!(request.start, 1_894_010_400_000);
                assert_eq!(request.customer.phone.as_deref(), Some("+1555"));
                assert!(!request.flagged);
            }
            other => panic!("expected InsertAppointment, got {other:?}"),
        }
    }

    #[test]
    fn appointment_requires_customer_name() {
        let sql = "INSERT INTO appointments (start, duration_minutes) VALUES (1894010400000, 30)";
        assert!(matches!(
            parse_sql(sql),
            Err(SqlError::MissingColumn("appointments", "customer_name"))
        ));
    }

    #[test]
    fn parse_transition() {
        let sql = format!("INSERT INTO transitions (appointment_id, status) VALUES ('{ID}', 'confirmed')");
        match parse_sql(&sql).unwrap() {
            Command::TransitionAppointment { status, .. } => assert_eq!(status, AppointmentStatus::Confirmed),
            other => panic!("expected TransitionAppointment, got {other:?}"),
        }
        let bad = format!("INSERT INTO transitions (appointment_id, status) VALUES ('{ID}', 'archived')");
        assert!(parse_sql(&bad).unwrap_err().is_invalid_value());
    }

    #[test]
    fn parse_partial_policy_update() {
        let cmd = parse_sql("INSERT INTO policy (message_review) VALUES ('always')").unwrap();
        assert_eq!(
            cmd,
            Command::UpdatePolicy {
                appointment_review: None,
                message_review: Some(ReviewMode::Always)
            }
        );
    }

    #[test]
    fn parse_select_availability_range() {
        let sql = "SELECT * FROM availability WHERE date >= '2030-01-07' AND date <= '2030-01-13' AND duration = 30";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectAvailability {
                from: NaiveDate::from_ymd_opt(2030, 1, 7).unwrap(),
                to: NaiveDate::from_ymd_opt(2030, 1, 13).unwrap(),
                duration_minutes: 30,
            }
        );
    }

    #[test]
    fn parse_select_availability_single_day() {
        let sql = "SELECT * FROM availability WHERE date = '2030-01-07' AND duration = 60";
        match parse_sql(sql).unwrap() {
            Command::SelectAvailability { from, to, .. } => assert_eq!(from, to),
            other => panic!("expected SelectAvailability, got {other:?}"),
        }
        assert!(matches!(
            parse_sql("SELECT * FROM availability WHERE date = '2030-01-07'"),
            Err(SqlError::MissingFilter("duration"))
        ));
    }

    #[test]
    fn parse_select_appointments_filters() {
        let cmd = parse_sql("SELECT * FROM appointments WHERE status = 'pending'").unwrap();
        assert_eq!(
            cmd,
            Command::SelectAppointments {
                id: None,
                filter: AppointmentFilter {
                    status: Some(AppointmentStatus::Pending),
                    window: None
                }
            }
        );
        let cmd = parse_sql(r#"SELECT * FROM appointments WHERE start >= 1000 AND "end" <= 2000"#).unwrap();
        match cmd {
            Command::SelectAppointments { filter, .. } => assert_eq!(filter.window, Some(Span::new(1000, 2000))),
            other => panic!("expected SelectAppointments, got {other:?}"),
        }
    }

    #[test]
    fn parse_deletes() {
        let cmd = parse_sql(&format!("DELETE FROM appointments WHERE id = '{ID}'")).unwrap();
        assert!(matches!(cmd, Command::CancelAppointment { .. }));
        let cmd = parse_sql("DELETE FROM blackouts WHERE date = '2030-12-24'").unwrap();
        assert!(matches!(cmd, Command::DeleteBlackout { .. }));
        assert!(matches!(
            parse_sql("DELETE FROM appointments"),
            Err(SqlError::MissingFilter("id"))
        ));
    }

    #[test]
    fn parse_messages() {
        let cmd = parse_sql("INSERT INTO messages (content, flagged) VALUES ('Hi there', true)").unwrap();
        assert!(matches!(cmd, Command::InsertMessage { flagged: true, .. }));
        let cmd = parse_sql(&format!("INSERT INTO message_transitions VALUES ('{ID}', 'sent')")).unwrap();
        assert!(matches!(cmd, Command::TransitionMessage { status: MessageStatus::Sent, .. }));
        let cmd = parse_sql("SELECT * FROM messages WHERE status = 'pending'").unwrap();
        assert_eq!(cmd, Command::SelectMessages { id: None, status: Some(MessageStatus::Pending) });
    }

    #[test]
    fn unknown_table_and_column_rejected() {
        assert!(matches!(
            parse_sql("INSERT INTO foobar (id) VALUES (1)"),
            Err(SqlError::UnknownTable(_))
        ));
        assert!(matches!(
            parse_sql("INSERT INTO account (name, owner) VALUES ('a', 'b')"),
            Err(SqlError::UnknownColumn("account", _))
        ));
        assert!(matches!(
            parse_sql("INSERT INTO account (name, timezone) VALUES ('a')"),
            Err(SqlError::WrongArity("account", 2, 1))
        ));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
