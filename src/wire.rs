use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo, QueryResponse,
    Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::messages::data::DataRow;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::SharedPasswordAuth;
use crate::engine::{Engine, EngineError, ResolvedDay};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};
use crate::tenant::TenantManager;

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(AgenndoFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

pub struct AgenndoHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<AgenndoQueryParser>,
}

impl AgenndoHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(AgenndoQueryParser),
        }
    }

    /// The connection's database name selects the tenant.
    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("tenant error: {e}")))
    }

    async fn run(&self, engine: &Engine, query: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertBusiness { id, slug, name } => {
                engine.create_business(id, &slug, &name).await.map_err(engine_err)?;
                Ok(vec![inserted()])
            }
            Command::UpdateBusiness { id, policy, disable } => {
                if !policy.is_empty() {
                    let current = engine
                        .business(id)
                        .await
                        .ok_or_else(|| engine_err(EngineError::NotFound(id)))?
                        .policy;
                    engine
                        .set_booking_policy(id, policy.apply(current))
                        .await
                        .map_err(engine_err)?;
                }
                if disable {
                    engine.disable_business(id).await.map_err(engine_err)?;
                }
                Ok(vec![updated()])
            }
            Command::InsertService {
                id,
                business_id,
                name,
                duration_minutes,
                price_cents,
            } => {
                engine
                    .create_service(id, business_id, &name, duration_minutes, price_cents)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![inserted()])
            }
            Command::UpdateService { id, patch } => {
                let business_id = engine
                    .owner_of(&id)
                    .ok_or_else(|| engine_err(EngineError::NotFound(id)))?;
                let current = engine
                    .list_services(business_id)
                    .await
                    .map_err(engine_err)?
                    .into_iter()
                    .find(|s| s.id == id)
                    .ok_or_else(|| engine_err(EngineError::NotFound(id)))?;
                engine
                    .update_service(
                        id,
                        patch.name.as_deref().unwrap_or(&current.name),
                        patch.duration_minutes.unwrap_or(current.duration_minutes),
                        patch.price_cents.unwrap_or(current.price_cents),
                        patch.active.unwrap_or(current.active),
                    )
                    .await
                    .map_err(engine_err)?;
                Ok(vec![updated()])
            }
            Command::InsertCollaborator { id, business_id, name } => {
                engine
                    .create_collaborator(id, business_id, &name)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![inserted()])
            }
            Command::UpdateCollaborator { id, active } => {
                engine.set_collaborator_active(id, active).await.map_err(engine_err)?;
                Ok(vec![updated()])
            }
            Command::InsertEligibility {
                collaborator_id,
                service_id,
            } => {
                engine
                    .grant_eligibility(collaborator_id, service_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![inserted()])
            }
            Command::DeleteEligibility {
                collaborator_id,
                service_id,
            } => {
                engine
                    .revoke_eligibility(collaborator_id, service_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![deleted(1)])
            }
            Command::InsertWeeklySchedule { owner_id, weekday, day } => {
                let owner = engine.schedule_owner(owner_id).map_err(engine_err)?;
                engine.set_weekday(owner, weekday, day).await.map_err(engine_err)?;
                Ok(vec![inserted()])
            }
            Command::DeleteWeeklySchedule { owner_id } => {
                engine
                    .set_collaborator_schedule(owner_id, None)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![deleted(1)])
            }
            Command::InsertOverride {
                owner_id,
                date,
                scope,
                day,
            } => {
                let owner = engine.schedule_owner(owner_id).map_err(engine_err)?;
                let dates = engine
                    .apply_override(owner, date, scope, day)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(dates.len()))])
            }
            Command::DeleteOverride { owner_id, date } => {
                let owner = engine.schedule_owner(owner_id).map_err(engine_err)?;
                let removed = engine.clear_override(owner, date).await.map_err(engine_err)?;
                Ok(vec![deleted(usize::from(removed))])
            }
            Command::InsertClient {
                id,
                business_id,
                name,
                phone,
            } => {
                engine
                    .create_client(id, business_id, &name, phone, None)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![inserted()])
            }
            Command::InsertAppointment { id, request } => {
                let appointment = engine.admit(id, request).await.map_err(engine_err)?;
                let schema = Arc::new(appointment_schema());
                let rows = vec![appointment_row(&schema, &appointment)];
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::UpdateAppointmentStatus { id, status } => {
                engine
                    .transition_appointment(id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![updated()])
            }
            Command::SelectSlots {
                business_id,
                service_id,
                collaborator,
                date,
            } => {
                let slots = engine
                    .available_slots(business_id, service_id, collaborator, date)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(slot_schema());
                let rows: Vec<PgWireResult<_>> = slots
                    .iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&format_hhmm(slot.span.start))?;
                        encoder.encode_field(&format_hhmm(slot.span.end))?;
                        encoder.encode_field(&id_list(&slot.collaborators))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectEligibleCollaborators { service_id } => {
                let ids = engine
                    .eligible_collaborators(service_id)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(vec![text_field("collaborator_id")]);
                let rows: Vec<PgWireResult<_>> = ids
                    .iter()
                    .map(|id| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&id.to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectAppointments { collaborator_id, date } => {
                let appointments = engine
                    .appointments_on(collaborator_id, date)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(appointment_schema());
                let rows: Vec<PgWireResult<_>> = appointments.iter().map(|a| appointment_row(&schema, a)).collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectSchedule {
                business_id,
                date,
                collaborator_id,
            } => {
                let resolved = engine
                    .resolve_schedule(business_id, collaborator_id, date)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(schedule_schema());
                let rows = vec![schedule_row(&schema, date, &resolved)];
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectClient { id } => {
                let schema = Arc::new(client_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .get_client(id)
                    .iter()
                    .map(|c| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&c.id.to_string())?;
                        encoder.encode_field(&c.business_id.to_string())?;
                        encoder.encode_field(&c.name)?;
                        encoder.encode_field(&c.phone)?;
                        encoder.encode_field(&c.email)?;
                        encoder.encode_field(&(c.stats.total_appointments as i64))?;
                        encoder.encode_field(&c.stats.total_spent_cents)?;
                        encoder.encode_field(&c.stats.last_appointment.map(|d| d.to_string()))?;
                        encoder.encode_field(&(c.stats.no_shows as i64))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectBusiness { slug } => {
                let schema = Arc::new(business_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .business_by_slug(&slug)
                    .await
                    .iter()
                    .map(|b| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&b.id.to_string())?;
                        encoder.encode_field(&b.slug)?;
                        encoder.encode_field(&b.name)?;
                        encoder.encode_field(&b.active)?;
                        encoder.encode_field(&i64::from(b.policy.buffer_minutes))?;
                        encoder.encode_field(&i64::from(b.policy.min_advance_hours))?;
                        encoder.encode_field(&i64::from(b.policy.max_future_days))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectServices { business_id } => {
                let services = engine.list_services(business_id).await.map_err(engine_err)?;
                let schema = Arc::new(service_schema());
                let rows: Vec<PgWireResult<_>> = services
                    .iter()
                    .map(|s| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&s.id.to_string())?;
                        encoder.encode_field(&s.name)?;
                        encoder.encode_field(&i64::from(s.duration_minutes))?;
                        encoder.encode_field(&s.price_cents)?;
                        encoder.encode_field(&s.active)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
        }
    }
}

fn inserted() -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(1))
}

fn updated() -> Response {
    Response::Execution(Tag::new("UPDATE").with_rows(1))
}

fn deleted(rows: usize) -> Response {
    Response::Execution(Tag::new("DELETE").with_rows(rows))
}

/// JSON array of ULID strings.
fn id_list(ids: &[ulid::Ulid]) -> String {
    let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    serde_json::to_string(&ids).unwrap_or_else(|_| "[]".into())
}

fn appointment_row(schema: &Arc<Vec<FieldInfo>>, a: &Appointment) -> PgWireResult<DataRow> {
    let (client_id, client_name) = match &a.client {
        ClientRef::Registered(id) => (Some(id.to_string()), None),
        ClientRef::Guest { name, .. } => (None, Some(name.clone())),
    };
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&a.id.to_string())?;
    encoder.encode_field(&a.service_id.to_string())?;
    encoder.encode_field(&a.collaborator_id.to_string())?;
    encoder.encode_field(&a.date.to_string())?;
    encoder.encode_field(&format_hhmm(a.span.start))?;
    encoder.encode_field(&format_hhmm(a.span.end))?;
    encoder.encode_field(&a.status.to_string())?;
    encoder.encode_field(&client_id)?;
    encoder.encode_field(&client_name)?;
    encoder.encode_field(&a.price_cents)?;
    encoder.encode_field(&a.notes)?;
    Ok(encoder.take_row())
}

fn schedule_row(schema: &Arc<Vec<FieldInfo>>, date: NaiveDate, resolved: &ResolvedDay) -> PgWireResult<DataRow> {
    let day = &resolved.day;
    let breaks: Vec<String> = day.breaks.iter().map(|b| b.to_string()).collect();
    let breaks = serde_json::to_string(&breaks).map_err(|e| user_error("XX000", e.to_string()))?;
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&date.to_string())?;
    encoder.encode_field(&resolved.source.as_str().to_string())?;
    encoder.encode_field(&day.active)?;
    encoder.encode_field(&format_hhmm(day.start))?;
    encoder.encode_field(&format_hhmm(day.end))?;
    encoder.encode_field(&breaks)?;
    Ok(encoder.take_row())
}

// ── Result schemas ───────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn bool_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::BOOL, FieldFormat::Text)
}

fn slot_schema() -> Vec<FieldInfo> {
    vec![text_field("start"), text_field("end"), text_field("collaborators")]
}

fn appointment_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("service_id"),
        text_field("collaborator_id"),
        text_field("date"),
        text_field("start"),
        text_field("end"),
        text_field("status"),
        text_field("client_id"),
        text_field("client_name"),
        int_field("price_cents"),
        text_field("notes"),
    ]
}

fn schedule_schema() -> Vec<FieldInfo> {
    vec![
        text_field("date"),
        text_field("source"),
        bool_field("active"),
        text_field("start"),
        text_field("end"),
        text_field("breaks"),
    ]
}

fn client_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("business_id"),
        text_field("name"),
        text_field("phone"),
        text_field("email"),
        int_field("total_appointments"),
        int_field("total_spent_cents"),
        text_field("last_appointment"),
        int_field("no_shows"),
    ]
}

fn business_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("slug"),
        text_field("name"),
        bool_field("active"),
        int_field("buffer_minutes"),
        int_field("min_advance_hours"),
        int_field("max_future_days"),
    ]
}

fn service_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("name"),
        int_field("duration_minutes"),
        int_field("price_cents"),
        bool_field("active"),
    ]
}

/// Result columns for a statement that may still hold `$N` placeholders.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .filter(|w| !w.is_empty())
        .collect();
    match words.as_slice() {
        ["insert", "into", "appointments", ..] => appointment_schema(),
        ["select", rest @ ..] => {
            let table = rest.iter().skip_while(|w| **w != "from").nth(1).copied();
            match table {
                Some("slots") => slot_schema(),
                Some("eligible_collaborators") => vec![text_field("collaborator_id")],
                Some("appointments") => appointment_schema(),
                Some("schedule") => schedule_schema(),
                Some("clients") => client_schema(),
                Some("businesses") => business_schema(),
                Some("services") => service_schema(),
                _ => vec![],
            }
        }
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for AgenndoHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        self.run(&engine, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct AgenndoQueryParser;

#[async_trait]
impl QueryParser for AgenndoQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(&self, stmt: &String, _column_format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for AgenndoHandler {
    type Statement = String;
    type QueryParser = AgenndoQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(&self, client: &mut C, portal: &Portal<Self::Statement>, _max_rows: usize) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        let responses = self.run(&engine, &sql).await?;
        responses
            .into_iter()
            .next()
            .ok_or_else(|| user_error("XX000", "statement produced no response".into()))
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
        Ok(DescribeStatementResponse::new(param_types, result_schema(&target.statement)))
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
        Ok(DescribePortalResponse::new(result_schema(&target.statement.statement)))
    }
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    // Highest index first so `$1` never eats the prefix of `$10`.
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct AgenndoFactory {
    handler: Arc<AgenndoHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<SharedPasswordAuth, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl AgenndoFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        Self {
            handler: Arc::new(AgenndoHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                SharedPasswordAuth::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for AgenndoFactory {
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

// ── Errors ───────────────────────────────────────────────────────

/// SQLSTATE for each engine refusal. Clients retry 40001 by re-fetching slots.
pub fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::SlotConflict => "40001",
        EngineError::NotFound(_) => "P0002",
        EngineError::AlreadyExists(_) | EngineError::SlugTaken(_) => "23505",
        EngineError::MalformedSchedule(_) => "22007",
        EngineError::Timeout => "55P03",
        EngineError::CrossTenant(..) => "42501",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
        EngineError::BusinessDisabled(_)
        | EngineError::InvalidService(_)
        | EngineError::CollaboratorNotEligible { .. }
        | EngineError::OutsideAdvanceWindow
        | EngineError::PastMaxFutureWindow(_)
        | EngineError::DayClosed(_)
        | EngineError::OffSchedule { .. }
        | EngineError::InvalidDuration(_)
        | EngineError::InvalidPolicy(_)
        | EngineError::InvalidTransition { .. } => "22023",
    }
}

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_params_finds_highest() {
        assert_eq!(count_params("SELECT * FROM slots"), 0);
        assert_eq!(count_params("SELECT * FROM slots WHERE business_id = $1 AND date = $4"), 4);
        assert_eq!(count_params("VALUES ($10, $2)"), 10);
        assert_eq!(count_params("price $"), 0);
    }

    #[test]
    fn schema_by_statement_shape() {
        assert_eq!(result_schema("SELECT * FROM slots WHERE date = $1").len(), 3);
        assert_eq!(result_schema("select * from eligible_collaborators where service_id = $1").len(), 1);
        assert_eq!(result_schema("INSERT INTO appointments (id) VALUES ($1)").len(), 11);
        assert!(result_schema("INSERT INTO businesses (id, slug, name) VALUES ($1, $2, $3)").is_empty());
        assert!(result_schema("UPDATE appointments SET status = $1 WHERE id = $2").is_empty());
    }

    #[test]
    fn conflict_and_validation_states() {
        assert_eq!(sqlstate(&EngineError::SlotConflict), "40001");
        assert_eq!(sqlstate(&EngineError::Timeout), "55P03");
        assert_eq!(sqlstate(&EngineError::SlugTaken("x".into())), "23505");
        assert_eq!(sqlstate(&EngineError::MalformedSchedule("x".into())), "22007");
        assert_eq!(sqlstate(&EngineError::OutsideAdvanceWindow), "22023");
        assert_eq!(sqlstate(&EngineError::NotFound(ulid::Ulid::nil())), "P0002");
    }

    #[test]
    fn id_list_is_json() {
        let a = ulid::Ulid::from_string("01ARZ3NDEKTSV4RRFFQ69G5FAV").unwrap();
        assert_eq!(id_list(&[a]), r#"["01ARZ3NDEKTSV4RRFFQ69G5FAV"]"#);
        assert_eq!(id_list(&[]), "[]");
    }
}
