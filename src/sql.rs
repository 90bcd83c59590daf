use std::collections::HashMap;

use chrono::{NaiveDate, Weekday};
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertBusiness {
        id: Ulid,
        slug: String,
        name: String,
    },
    UpdateBusiness {
        id: Ulid,
        policy: PolicyPatch,
        disable: bool,
    },
    InsertService {
        id: Ulid,
        business_id: Ulid,
        name: String,
        duration_minutes: Minutes,
        price_cents: i64,
    },
    UpdateService {
        id: Ulid,
        patch: ServicePatch,
    },
    InsertCollaborator {
        id: Ulid,
        business_id: Ulid,
        name: String,
    },
    UpdateCollaborator {
        id: Ulid,
        active: bool,
    },
    InsertEligibility {
        collaborator_id: Ulid,
        service_id: Ulid,
    },
    DeleteEligibility {
        collaborator_id: Ulid,
        service_id: Ulid,
    },
    InsertWeeklySchedule {
        owner_id: Ulid,
        weekday: Weekday,
        day: DaySchedule,
    },
    /// Reverts a collaborator to the business week.
    DeleteWeeklySchedule {
        owner_id: Ulid,
    },
    InsertOverride {
        owner_id: Ulid,
        date: NaiveDate,
        scope: OverrideScope,
        day: DaySchedule,
    },
    DeleteOverride {
        owner_id: Ulid,
        date: NaiveDate,
    },
    InsertClient {
        id: Ulid,
        business_id: Ulid,
        name: String,
        phone: Option<String>,
    },
    InsertAppointment {
        id: Ulid,
        request: BookingRequest,
    },
    UpdateAppointmentStatus {
        id: Ulid,
        status: AppointmentStatus,
    },
    SelectSlots {
        business_id: Ulid,
        service_id: Ulid,
        collaborator: CollaboratorChoice,
        date: NaiveDate,
    },
    SelectEligibleCollaborators {
        service_id: Ulid,
    },
    SelectAppointments {
        collaborator_id: Ulid,
        date: NaiveDate,
    },
    SelectSchedule {
        business_id: Ulid,
        date: NaiveDate,
        collaborator_id: Option<Ulid>,
    },
    SelectClient {
        id: Ulid,
    },
    SelectBusiness {
        slug: String,
    },
    SelectServices {
        business_id: Ulid,
    },
}

/// Policy columns present in an `UPDATE businesses`; absent ones keep their value.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PolicyPatch {
    pub buffer_minutes: Option<Minutes>,
    pub min_advance_hours: Option<u32>,
    pub max_future_days: Option<u32>,
}

impl PolicyPatch {
    pub fn is_empty(&self) -> bool {
        self.buffer_minutes.is_none() && self.min_advance_hours.is_none() && self.max_future_days.is_none()
    }

    pub fn apply(&self, policy: BookingPolicy) -> BookingPolicy {
        BookingPolicy {
            buffer_minutes: self.buffer_minutes.unwrap_or(policy.buffer_minutes),
            min_advance_hours: self.min_advance_hours.unwrap_or(policy.min_advance_hours),
            max_future_days: self.max_future_days.unwrap_or(policy.max_future_days),
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ServicePatch {
    pub name: Option<String>,
    pub duration_minutes: Option<Minutes>,
    pub price_cents: Option<i64>,
    pub active: Option<bool>,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let v = extract_insert_values(insert)?;
    let need = |n: usize, name: &'static str| {
        if v.len() < n {
            Err(SqlError::WrongArity(name, n, v.len()))
        } else {
            Ok(())
        }
    };

    match table.as_str() {
        "businesses" => {
            need(3, "businesses")?;
            Ok(Command::InsertBusiness {
                id: parse_ulid_expr(&v[0])?,
                slug: parse_string(&v[1])?,
                name: parse_string(&v[2])?,
            })
        }
        "services" => {
            need(5, "services")?;
            Ok(Command::InsertService {
                id: parse_ulid_expr(&v[0])?,
                business_id: parse_ulid_expr(&v[1])?,
                name: parse_string(&v[2])?,
                duration_minutes: parse_minutes(&v[3])?,
                price_cents: parse_i64_expr(&v[4])?,
            })
        }
        "collaborators" => {
            need(3, "collaborators")?;
            Ok(Command::InsertCollaborator {
                id: parse_ulid_expr(&v[0])?,
                business_id: parse_ulid_expr(&v[1])?,
                name: parse_string(&v[2])?,
            })
        }
        "collaborator_services" => {
            need(2, "collaborator_services")?;
            Ok(Command::InsertEligibility {
                collaborator_id: parse_ulid_expr(&v[0])?,
                service_id: parse_ulid_expr(&v[1])?,
            })
        }
        "weekly_schedules" => {
            need(5, "weekly_schedules")?;
            Ok(Command::InsertWeeklySchedule {
                owner_id: parse_ulid_expr(&v[0])?,
                weekday: parse_weekday_expr(&v[1])?,
                day: parse_day(&v[2..])?,
            })
        }
        "schedule_overrides" => {
            need(6, "schedule_overrides")?;
            Ok(Command::InsertOverride {
                owner_id: parse_ulid_expr(&v[0])?,
                date: parse_date(&v[1])?,
                scope: parse_string(&v[2])?.parse()?,
                day: parse_day(&v[3..])?,
            })
        }
        "clients" => {
            need(3, "clients")?;
            Ok(Command::InsertClient {
                id: parse_ulid_expr(&v[0])?,
                business_id: parse_ulid_expr(&v[1])?,
                name: parse_string(&v[2])?,
                phone: v.get(3).map(parse_opt_string).transpose()?.flatten(),
            })
        }
        "appointments" => {
            need(7, "appointments")?;
            let client = match parse_ulid_or_null(&v[6])? {
                Some(id) => ClientRef::Registered(id),
                None => ClientRef::Guest {
                    name: v
                        .get(7)
                        .map(parse_opt_string)
                        .transpose()?
                        .flatten()
                        .ok_or(SqlError::Parse("guest bookings need client_name".into()))?,
                    contact: v.get(8).map(parse_opt_string).transpose()?.flatten(),
                },
            };
            Ok(Command::InsertAppointment {
                id: parse_ulid_expr(&v[0])?,
                request: BookingRequest {
                    business_id: parse_ulid_expr(&v[1])?,
                    service_id: parse_ulid_expr(&v[2])?,
                    collaborator: parse_choice(&v[3])?,
                    date: parse_date(&v[4])?,
                    start: parse_time(&v[5])?,
                    client,
                    notes: v.get(9).map(parse_opt_string).transpose()?.flatten(),
                },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `active, start, end[, breaks]`
fn parse_day(values: &[Expr]) -> Result<DaySchedule, SqlError> {
    let breaks = match values.get(3).map(parse_opt_string).transpose()?.flatten() {
        Some(text) => parse_breaks(&text)?,
        None => Vec::new(),
    };
    Ok(DaySchedule {
        active: parse_bool(&values[0])?,
        start: parse_time(&values[1])?,
        end: parse_time(&values[2])?,
        breaks,
    })
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;
    let mut set: HashMap<String, &Expr> = HashMap::new();
    for assignment in assignments {
        let AssignmentTarget::ColumnName(name) = &assignment.target else {
            return Err(SqlError::Unsupported("tuple assignment".into()));
        };
        let column = object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))?;
        set.insert(column, &assignment.value);
    }
    let unknown = |allowed: &[&str]| set.keys().find(|k| !allowed.contains(&k.as_str())).cloned();

    match table.as_str() {
        "businesses" => {
            if let Some(column) = unknown(&["buffer_minutes", "min_advance_hours", "max_future_days", "active"]) {
                return Err(SqlError::Unsupported(format!("cannot set {column}")));
            }
            let disable = match set.get("active") {
                Some(expr) if parse_bool(expr)? => {
                    return Err(SqlError::Unsupported("businesses cannot be re-enabled".into()));
                }
                Some(_) => true,
                None => false,
            };
            let policy = PolicyPatch {
                buffer_minutes: set.get("buffer_minutes").map(|e| parse_minutes(e)).transpose()?,
                min_advance_hours: set.get("min_advance_hours").map(|e| parse_u32(e)).transpose()?,
                max_future_days: set.get("max_future_days").map(|e| parse_u32(e)).transpose()?,
            };
            Ok(Command::UpdateBusiness { id, policy, disable })
        }
        "services" => {
            if let Some(column) = unknown(&["name", "duration_minutes", "price_cents", "active"]) {
                return Err(SqlError::Unsupported(format!("cannot set {column}")));
            }
            let patch = ServicePatch {
                name: set.get("name").map(|e| parse_string(e)).transpose()?,
                duration_minutes: set.get("duration_minutes").map(|e| parse_minutes(e)).transpose()?,
                price_cents: set.get("price_cents").map(|e| parse_i64_expr(e)).transpose()?,
                active: set.get("active").map(|e| parse_bool(e)).transpose()?,
            };
            Ok(Command::UpdateService { id, patch })
        }
        "collaborators" => {
            let active = set.get("active").ok_or(SqlError::MissingFilter("active"))?;
            Ok(Command::UpdateCollaborator {
                id,
                active: parse_bool(active)?,
            })
        }
        "appointments" => {
            let status = set.get("status").ok_or(SqlError::MissingFilter("status"))?;
            Ok(Command::UpdateAppointmentStatus {
                id,
                status: parse_string(status)?.parse()?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = Filters::from_selection(&delete.selection)?;

    match table.as_str() {
        "collaborator_services" => Ok(Command::DeleteEligibility {
            collaborator_id: filters.ulid("collaborator_id")?,
            service_id: filters.ulid("service_id")?,
        }),
        "weekly_schedules" => Ok(Command::DeleteWeeklySchedule {
            owner_id: filters.ulid("owner_id")?,
        }),
        "schedule_overrides" => Ok(Command::DeleteOverride {
            owner_id: filters.ulid("owner_id")?,
            date: filters.date("date")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let from = select
        .from
        .first()
        .ok_or_else(|| SqlError::Parse("SELECT without FROM".into()))?;
    let table = table_factor_name(&from.relation)?;
    let filters = Filters::from_selection(&select.selection)?;

    match table.as_str() {
        "slots" => Ok(Command::SelectSlots {
            business_id: filters.ulid("business_id")?,
            service_id: filters.ulid("service_id")?,
            collaborator: match filters.get("collaborator_id") {
                Some(expr) => parse_choice(expr)?,
                None => CollaboratorChoice::Any,
            },
            date: filters.date("date")?,
        }),
        "eligible_collaborators" => Ok(Command::SelectEligibleCollaborators {
            service_id: filters.ulid("service_id")?,
        }),
        "appointments" => Ok(Command::SelectAppointments {
            collaborator_id: filters.ulid("collaborator_id")?,
            date: filters.date("date")?,
        }),
        "schedule" => Ok(Command::SelectSchedule {
            business_id: filters.ulid("business_id")?,
            date: filters.date("date")?,
            collaborator_id: filters.get("collaborator_id").map(parse_ulid_expr).transpose()?,
        }),
        "clients" => Ok(Command::SelectClient { id: filters.ulid("id")? }),
        "businesses" => Ok(Command::SelectBusiness {
            slug: parse_string(filters.require("slug")?)?,
        }),
        "services" => Ok(Command::SelectServices {
            business_id: filters.ulid("business_id")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `col = value` pairs from an AND-only WHERE clause.
struct Filters<'a> {
    eq: HashMap<String, &'a Expr>,
}

impl<'a> Filters<'a> {
    fn from_selection(selection: &'a Option<Expr>) -> Result<Self, SqlError> {
        let mut eq = HashMap::new();
        if let Some(expr) = selection {
            collect_eq(expr, &mut eq)?;
        }
        Ok(Self { eq })
    }

    fn get(&self, column: &str) -> Option<&'a Expr> {
        self.eq.get(column).copied()
    }

    fn require(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingFilter(column))
    }

    fn ulid(&self, column: &'static str) -> Result<Ulid, SqlError> {
        parse_ulid_expr(self.require(column)?)
    }

    fn date(&self, column: &'static str) -> Result<NaiveDate, SqlError> {
        parse_date(self.require(column)?)
    }
}

fn collect_eq<'a>(expr: &'a Expr, out: &mut HashMap<String, &'a Expr>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_eq(left, out)?;
            collect_eq(right, out)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let column = expr_column_name(left).ok_or_else(|| SqlError::Parse(format!("expected column, got {left}")))?;
            out.insert(column, right.as_ref());
            Ok(())
        }
        Expr::Nested(inner) => collect_eq(inner, out),
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
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
    let tables = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    let first = tables
        .first()
        .ok_or_else(|| SqlError::Parse("DELETE without table".into()))?;
    table_factor_name(&first.relation)
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [row] => Ok(row.clone()),
            [] => Err(SqlError::Parse("empty VALUES".into())),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    Filters::from_selection(selection)?.ulid("id")
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Result<&Value, SqlError> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Ok(value),
        _ => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr)? {
        Value::SingleQuotedString(s) | Value::Number(s, _) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
        }
        other => Err(SqlError::Parse(format!("expected ULID, got {other}"))),
    }
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    match extract_value(expr)? {
        Value::Null => Ok(None),
        _ => parse_ulid_expr(expr).map(Some),
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64_expr(expr)?);
    }
    match extract_value(expr)? {
        Value::Number(s, _) | Value::SingleQuotedString(s) => s
            .trim()
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
        other => Err(SqlError::Parse(format!("expected number, got {other}"))),
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

fn parse_minutes(expr: &Expr) -> Result<Minutes, SqlError> {
    let v = parse_i64_expr(expr)?;
    Minutes::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr)? {
        Value::Boolean(b) => Ok(*b),
        Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Value::Number(n, _) => Ok(n != "0"),
        other => Err(SqlError::Parse(format!("expected bool, got {other}"))),
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr)? {
        Value::SingleQuotedString(s) => Ok(s.clone()),
        other => Err(SqlError::Parse(format!("expected string, got {other}"))),
    }
}

fn parse_opt_string(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr)? {
        Value::Null => Ok(None),
        _ => parse_string(expr).map(Some),
    }
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    s.parse()
        .map_err(|e| SqlError::Parse(format!("bad date {s:?} (expected YYYY-MM-DD): {e}")))
}

fn parse_time(expr: &Expr) -> Result<Minutes, SqlError> {
    Ok(parse_hhmm(&parse_string(expr)?)?)
}

/// Weekday name, or ISO number 1 (Monday) to 7 (Sunday).
fn parse_weekday_expr(expr: &Expr) -> Result<Weekday, SqlError> {
    if let Value::Number(..) = extract_value(expr)? {
        let n = parse_i64_expr(expr)?;
        return match n {
            1..=7 => Ok(Weekday::try_from((n - 1) as u8).map_err(|_| SqlError::Parse(format!("bad weekday {n}")))?),
            _ => Err(SqlError::Parse(format!("weekday {n} outside 1..=7"))),
        };
    }
    Ok(parse_weekday(&parse_string(expr)?)?)
}

fn parse_choice(expr: &Expr) -> Result<CollaboratorChoice, SqlError> {
    if let Value::SingleQuotedString(s) = extract_value(expr)?
        && s.eq_ignore_ascii_case("any")
    {
        return Ok(CollaboratorChoice::Any);
    }
    if let Value::Null = extract_value(expr)? {
        return Ok(CollaboratorChoice::Any);
    }
    parse_ulid_expr(expr).map(CollaboratorChoice::Specific)
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
}

impl From<ParseError> for SqlError {
    fn from(e: ParseError) -> Self {
        SqlError::Parse(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const B: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    #[test]
    fn insert_business() {
        let cmd = parse_sql(&format!("INSERT INTO businesses (id, slug, name) VALUES ('{A}', 'barbearia-do-ze', 'Barbearia do Zé')")).unwrap();
        assert_eq!(
            cmd,
            Command::InsertBusiness {
                id: ulid(A),
                slug: "barbearia-do-ze".into(),
                name: "Barbearia do Zé".into(),
            }
        );
    }

    #[test]
    fn update_policy_partial() {
        let cmd = parse_sql(&format!("UPDATE businesses SET buffer_minutes = 10, max_future_days = 30 WHERE id = '{A}'")).unwrap();
        match cmd {
            Command::UpdateBusiness { id, policy, disable } => {
                assert_eq!(id, ulid(A));
                assert!(!disable);
                assert_eq!(policy.buffer_minutes, Some(10));
                assert_eq!(policy.min_advance_hours, None);
                let merged = policy.apply(BookingPolicy::default());
                assert_eq!(merged.min_advance_hours, 2);
                assert_eq!(merged.max_future_days, 30);
            }
            _ => panic!("expected UpdateBusiness, got {cmd:?}"),
        }
    }

    #[test]
    fn update_business_active_false_disables() {
        let cmd = parse_sql(&format!("UPDATE businesses SET active = false WHERE id = '{A}'")).unwrap();
        assert!(matches!(cmd, Command::UpdateBusiness { disable: true, .. }));
        assert!(parse_sql(&format!("UPDATE businesses SET active = true WHERE id = '{A}'")).is_err());
        assert!(parse_sql(&format!("UPDATE businesses SET slug = 'x' WHERE id = '{A}'")).is_err());
    }

    #[test]
    fn insert_service_and_collaborator() {
        let cmd = parse_sql(&format!(
            "INSERT INTO services (id, business_id, name, duration_minutes, price_cents) VALUES ('{A}', '{B}', 'Corte', 30, 4500)"
        ))
        .unwrap();
        assert!(matches!(
            cmd,
            Command::InsertService {
                duration_minutes: 30,
                price_cents: 4500,
                ..
            }
        ));
        let cmd = parse_sql(&format!("INSERT INTO collaborators (id, business_id, name) VALUES ('{A}', '{B}', 'Carlos')")).unwrap();
        assert!(matches!(cmd, Command::InsertCollaborator { .. }));
    }

    #[test]
    fn update_service_patch() {
        let cmd = parse_sql(&format!("UPDATE services SET price_cents = 5000, active = false WHERE id = '{A}'")).unwrap();
        assert_eq!(
            cmd,
            Command::UpdateService {
                id: ulid(A),
                patch: ServicePatch {
                    price_cents: Some(5000),
                    active: Some(false),
                    ..Default::default()
                },
            }
        );
    }

    #[test]
    fn eligibility_link_and_unlink() {
        let cmd = parse_sql(&format!("INSERT INTO collaborator_services (collaborator_id, service_id) VALUES ('{A}', '{B}')")).unwrap();
        assert_eq!(
            cmd,
            Command::InsertEligibility {
                collaborator_id: ulid(A),
                service_id: ulid(B),
            }
        );
        let cmd = parse_sql(&format!("DELETE FROM collaborator_services WHERE collaborator_id = '{A}' AND service_id = '{B}'")).unwrap();
        assert!(matches!(cmd, Command::DeleteEligibility { .. }));
    }

    #[test]
    fn weekly_schedule_with_breaks() {
        let cmd = parse_sql(&format!(
            r#"INSERT INTO weekly_schedules (owner_id, weekday, active, start, "end", breaks) VALUES ('{A}', 'mon', true, '09:00', '18:00', '12:00-13:00')"#
        ))
        .unwrap();
        match cmd {
            Command::InsertWeeklySchedule { owner_id, weekday, day } => {
                assert_eq!(owner_id, ulid(A));
                assert_eq!(weekday, Weekday::Mon);
                assert_eq!(day, DaySchedule::open(540, 1080).with_break(720, 780));
            }
            _ => panic!("expected InsertWeeklySchedule, got {cmd:?}"),
        }
    }

    #[test]
    fn weekday_as_iso_number() {
        let cmd = parse_sql(&format!(
            r#"INSERT INTO weekly_schedules (owner_id, weekday, active, start, "end") VALUES ('{A}', 7, false, '09:00', '18:00')"#
        ))
        .unwrap();
        assert!(matches!(cmd, Command::InsertWeeklySchedule { weekday: Weekday::Sun, .. }));
        assert!(parse_sql(&format!(
            r#"INSERT INTO weekly_schedules (owner_id, weekday, active, start, "end") VALUES ('{A}', 8, false, '09:00', '18:00')"#
        ))
        .is_err());
    }

    #[test]
    fn override_with_scope() {
        let cmd = parse_sql(&format!(
            r#"INSERT INTO schedule_overrides (owner_id, date, scope, active, start, "end", breaks) VALUES ('{A}', '2024-02-12', 'week', true, '10:00', '14:00', NULL)"#
        ))
        .unwrap();
        match cmd {
            Command::InsertOverride { date, scope, day, .. } => {
                assert_eq!(date, "2024-02-12".parse::<NaiveDate>().unwrap());
                assert_eq!(scope, OverrideScope::Week);
                assert_eq!(day, DaySchedule::open(600, 840));
            }
            _ => panic!("expected InsertOverride, got {cmd:?}"),
        }
        let cmd = parse_sql(&format!("DELETE FROM schedule_overrides WHERE owner_id = '{A}' AND date = '2024-02-12'")).unwrap();
        assert!(matches!(cmd, Command::DeleteOverride { .. }));
    }

    #[test]
    fn appointment_for_guest_with_any() {
        let cmd = parse_sql(&format!(
            "INSERT INTO appointments (id, business_id, service_id, collaborator_id, date, start, client_id, client_name, client_contact) \
             VALUES ('{A}', '{B}', '{B}', 'any', '2024-01-15', '09:30', NULL, 'Ana', '11 99999-0000')"
        ))
        .unwrap();
        match cmd {
            Command::InsertAppointment { id, request } => {
                assert_eq!(id, ulid(A));
                assert_eq!(request.collaborator, CollaboratorChoice::Any);
                assert_eq!(request.start, 570);
                assert_eq!(
                    request.client,
                    ClientRef::Guest {
                        name: "Ana".into(),
                        contact: Some("11 99999-0000".into()),
                    }
                );
            }
            _ => panic!("expected InsertAppointment, got {cmd:?}"),
        }
    }

    #[test]
    fn appointment_for_registered_client() {
        let cmd = parse_sql(&format!(
            "INSERT INTO appointments (id, business_id, service_id, collaborator_id, date, start, client_id) \
             VALUES ('{A}', '{B}', '{B}', '{A}', '2024-01-15', '09:30', '{B}')"
        ))
        .unwrap();
        match cmd {
            Command::InsertAppointment { request, .. } => {
                assert_eq!(request.collaborator, CollaboratorChoice::Specific(ulid(A)));
                assert_eq!(request.client, ClientRef::Registered(ulid(B)));
            }
            _ => panic!("expected InsertAppointment, got {cmd:?}"),
        }
    }

    #[test]
    fn guest_without_name_is_rejected() {
        let sql = format!(
            "INSERT INTO appointments (id, business_id, service_id, collaborator_id, date, start, client_id) \
             VALUES ('{A}', '{B}', '{B}', 'any', '2024-01-15', '09:30', NULL)"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn status_update_accepts_portuguese() {
        let cmd = parse_sql(&format!("UPDATE appointments SET status = 'faltou' WHERE id = '{A}'")).unwrap();
        assert_eq!(
            cmd,
            Command::UpdateAppointmentStatus {
                id: ulid(A),
                status: AppointmentStatus::NoShow,
            }
        );
        assert!(parse_sql(&format!("UPDATE appointments SET status = 'done' WHERE id = '{A}'")).is_err());
    }

    #[test]
    fn select_slots() {
        let cmd = parse_sql(&format!(
            "SELECT * FROM slots WHERE business_id = '{A}' AND service_id = '{B}' AND collaborator_id = 'any' AND date = '2024-01-15'"
        ))
        .unwrap();
        assert_eq!(
            cmd,
            Command::SelectSlots {
                business_id: ulid(A),
                service_id: ulid(B),
                collaborator: CollaboratorChoice::Any,
                date: "2024-01-15".parse().unwrap(),
            }
        );
    }

    #[test]
    fn select_schedule_optional_collaborator() {
        let cmd = parse_sql(&format!("SELECT * FROM schedule WHERE business_id = '{A}' AND date = '2024-01-15'")).unwrap();
        assert!(matches!(cmd, Command::SelectSchedule { collaborator_id: None, .. }));
        let cmd = parse_sql(&format!(
            "SELECT * FROM schedule WHERE business_id = '{A}' AND date = '2024-01-15' AND collaborator_id = '{B}'"
        ))
        .unwrap();
        assert!(matches!(cmd, Command::SelectSchedule { collaborator_id: Some(_), .. }));
    }

    #[test]
    fn select_missing_filter() {
        let err = parse_sql(&format!("SELECT * FROM appointments WHERE collaborator_id = '{A}'")).unwrap_err();
        assert!(matches!(err, SqlError::MissingFilter("date")));
    }

    #[test]
    fn select_business_by_slug() {
        let cmd = parse_sql("SELECT * FROM businesses WHERE slug = 'salao-da-ana'").unwrap();
        assert_eq!(cmd, Command::SelectBusiness { slug: "salao-da-ana".into() });
    }

    #[test]
    fn bad_values_are_parse_errors() {
        assert!(parse_sql("INSERT INTO businesses (id, slug, name) VALUES ('nope', 'a', 'b')").is_err());
        assert!(parse_sql(&format!("SELECT * FROM slots WHERE business_id = '{A}' AND service_id = '{A}' AND date = '15/01/2024'")).is_err());
        assert!(parse_sql(&format!(
            r#"INSERT INTO weekly_schedules (owner_id, weekday, active, start, "end") VALUES ('{A}', 'mon', true, '9h', '18:00')"#
        ))
        .is_err());
    }

    #[test]
    fn unknown_table_and_empty() {
        assert!(matches!(
            parse_sql(&format!("INSERT INTO foobar (id) VALUES ('{A}')")),
            Err(SqlError::UnknownTable(_))
        ));
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
