use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
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
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::debug;

use crate::auth::TallyAuthSource;
use crate::engine::{Engine, EngineError, NewBooking};
use crate::model::*;
use crate::observability::{self, command_label};
use crate::sql::{self, BookingFilter, Command, SqlError};
use crate::tenant::TenantManager;

/// Shown to end users when the time they picked is gone.
pub const UNAVAILABLE_MESSAGE: &str = "this time is no longer available, please choose another";

pub struct TallyHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<TallyQueryParser>,
}

impl TallyHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(TallyQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    /// Run one command with query metrics around it.
    async fn run(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = execute_command(engine, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = match &result {
            Ok(_) => "ok",
            Err(_) => "error",
        };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }
}

async fn execute_command(engine: &Engine, cmd: Command) -> PgWireResult<Response> {
    match cmd {
        Command::InsertSlots { slots } => {
            let count = slots.len();
            for slot in slots {
                let span = Span { start: slot.start, end: slot.end };
                engine
                    .create_slot(slot.id, slot.service_id, span, slot.capacity)
                    .await
                    .map_err(engine_err)?;
            }
            Ok(Response::Execution(Tag::new("INSERT").with_rows(count)))
        }
        Command::UpdateSlotCapacity { id, capacity } => {
            engine.set_capacity(id, capacity).await.map_err(engine_err)?;
            Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
        }
        Command::DeleteSlot { id } => {
            engine.delete_slot(id).await.map_err(engine_err)?;
            Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
        }
        Command::InsertLock {
            id,
            slot_id,
            session_id,
            units,
            ttl_ms,
        } => {
            engine
                .acquire_lock(id, slot_id, &session_id, units, ttl_ms)
                .await
                .map_err(engine_err)?;
            Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
        }
        Command::ExtendLock { id, ttl_ms } => match engine.extend_lock(id, ttl_ms).await {
            Ok(_) => Ok(Response::Execution(Tag::new("UPDATE").with_rows(1))),
            Err(e) if e.is_benign() => {
                debug!(lock_id = %id, error = %e, "extend missed");
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(0)))
            }
            Err(e) => Err(engine_err(e)),
        },
        Command::DeleteLock { id } => {
            let released = engine.release_lock(id).await.map_err(engine_err)?;
            Ok(Response::Execution(
                Tag::new("DELETE").with_rows(usize::from(released)),
            ))
        }
        Command::InsertPackageUsage {
            subscription_id,
            service_id,
            quantity,
        } => {
            engine
                .create_package_usage(subscription_id, service_id, quantity)
                .await
                .map_err(engine_err)?;
            Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
        }
        Command::InsertBooking {
            id,
            slot_id,
            visitor_count,
            status,
            subscription_id,
            lock_id,
            payment_status,
        } => {
            let req = NewBooking {
                id,
                slot_id,
                visitor_count,
                status,
                payment_status,
                subscription_id,
                lock_id,
            };
            engine.create_booking(req).await.map_err(engine_err)?;
            Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
        }
        Command::UpdateBookingStatus {
            id,
            status,
            expected_version,
        } => {
            engine
                .transition_booking(id, status, expected_version)
                .await
                .map_err(engine_err)?;
            Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
        }
        Command::UpdatePaymentStatus {
            id,
            payment_status,
            expected_version,
        } => {
            engine
                .set_payment_status(id, payment_status, expected_version)
                .await
                .map_err(engine_err)?;
            Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
        }
        Command::SelectSlots { id } => {
            let slots: Vec<SlotInfo> = match id {
                Some(id) => engine.get_slot(&id).await.into_iter().collect(),
                None => engine.list_slots().await,
            };
            let schema = Arc::new(slot_schema());
            let rows: Vec<_> = slots.iter().map(|s| encode_slot(&schema, s)).collect();
            Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
        }
        Command::SelectLocks { slot_id } => {
            let locks = engine.locks_for_slot(&slot_id).await.map_err(engine_err)?;
            let schema = Arc::new(lock_schema());
            let rows: Vec<_> = locks.iter().map(|l| encode_lock(&schema, l)).collect();
            Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
        }
        Command::SelectBookings { filter } => {
            let bookings: Vec<Booking> = match filter {
                BookingFilter::All => engine.list_bookings().await,
                BookingFilter::Id(id) => engine.get_booking(&id).await.into_iter().collect(),
                BookingFilter::Slot(slot_id) => {
                    engine.bookings_for_slot(&slot_id).await.map_err(engine_err)?
                }
            };
            let schema = Arc::new(booking_schema());
            let rows: Vec<_> = bookings.iter().map(|b| encode_booking(&schema, b)).collect();
            Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
        }
        Command::SelectPackageUsage { subscription_id } => {
            let usage = engine.usage_for_subscription(&subscription_id).await;
            let schema = Arc::new(usage_schema());
            let rows: Vec<_> = usage.iter().map(|u| encode_usage(&schema, u)).collect();
            Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
        }
    }
}

// ── Result schemas ───────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn slot_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("service_id", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
        field("total_capacity", Type::INT8),
        field("available_capacity", Type::INT8),
        field("booked_count", Type::INT8),
        field("original_capacity", Type::INT8),
        field("held", Type::INT8),
        field("is_overbooked", Type::BOOL),
    ]
}

fn lock_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("slot_id", Type::VARCHAR),
        field("session_id", Type::VARCHAR),
        field("units", Type::INT8),
        field("acquired_at", Type::INT8),
        field("expires_at", Type::INT8),
    ]
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("slot_id", Type::VARCHAR),
        field("service_id", Type::VARCHAR),
        field("visitor_count", Type::INT8),
        field("status", Type::VARCHAR),
        field("payment_status", Type::VARCHAR),
        field("subscription_id", Type::VARCHAR),
        field("package_covered", Type::INT8),
        field("paid_quantity", Type::INT8),
        field("version", Type::INT8),
        field("created_at", Type::INT8),
    ]
}

fn usage_schema() -> Vec<FieldInfo> {
    vec![
        field("subscription_id", Type::VARCHAR),
        field("service_id", Type::VARCHAR),
        field("original_quantity", Type::INT8),
        field("remaining_quantity", Type::INT8),
        field("used_quantity", Type::INT8),
    ]
}

/// Schema for a statement before its parameters are bound.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_ascii_lowercase();
    if !lower.trim_start().starts_with("select") {
        return vec![];
    }
    let table = lower
        .split_whitespace()
        .skip_while(|w| *w != "from")
        .nth(1)
        .map(|t| t.trim_end_matches(';').trim_matches('"'));
    match table {
        Some("slots") => slot_schema(),
        Some("locks") => lock_schema(),
        Some("bookings") => booking_schema(),
        Some("package_usage") => usage_schema(),
        _ => vec![],
    }
}

// ── Row encoding ─────────────────────────────────────────────────

fn encode_slot(schema: &Arc<Vec<FieldInfo>>, s: &SlotInfo) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&s.id.to_string())?;
    encoder.encode_field(&s.service_id.to_string())?;
    encoder.encode_field(&s.start)?;
    encoder.encode_field(&s.end)?;
    encoder.encode_field(&i64::from(s.total_capacity))?;
    encoder.encode_field(&i64::from(s.available_capacity))?;
    encoder.encode_field(&i64::from(s.booked_count))?;
    encoder.encode_field(&i64::from(s.original_capacity))?;
    encoder.encode_field(&i64::from(s.held))?;
    encoder.encode_field(&s.is_overbooked)?;
    Ok(encoder.take_row())
}

fn encode_lock(schema: &Arc<Vec<FieldInfo>>, l: &ReservationLock) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&l.id.to_string())?;
    encoder.encode_field(&l.slot_id.to_string())?;
    encoder.encode_field(&l.session_id)?;
    encoder.encode_field(&i64::from(l.reserved_capacity))?;
    encoder.encode_field(&l.acquired_at)?;
    encoder.encode_field(&l.expires_at)?;
    Ok(encoder.take_row())
}

fn encode_booking(schema: &Arc<Vec<FieldInfo>>, b: &Booking) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&b.id.to_string())?;
    encoder.encode_field(&b.slot_id.to_string())?;
    encoder.encode_field(&b.service_id.to_string())?;
    encoder.encode_field(&i64::from(b.visitor_count))?;
    encoder.encode_field(&b.status.to_string())?;
    encoder.encode_field(&b.payment_status.to_string())?;
    encoder.encode_field(&b.subscription_id.map(|s| s.to_string()))?;
    encoder.encode_field(&i64::from(b.package_covered))?;
    encoder.encode_field(&i64::from(b.paid_quantity()))?;
    encoder.encode_field(&(b.version as i64))?;
    encoder.encode_field(&b.created_at)?;
    Ok(encoder.take_row())
}

fn encode_usage(schema: &Arc<Vec<FieldInfo>>, u: &PackageUsage) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&u.key.subscription_id.to_string())?;
    encoder.encode_field(&u.key.service_id.to_string())?;
    encoder.encode_field(&i64::from(u.counters.original))?;
    encoder.encode_field(&i64::from(u.counters.remaining))?;
    encoder.encode_field(&i64::from(u.counters.used))?;
    Ok(encoder.take_row())
}

#[async_trait]
impl SimpleQueryHandler for TallyHandler {
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
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        Ok(vec![self.run(&engine, cmd).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct TallyQueryParser;

#[async_trait]
impl QueryParser for TallyQueryParser {
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
impl ExtendedQueryHandler for TallyHandler {
    type Statement = String;
    type QueryParser = TallyQueryParser;

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
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        self.run(&engine, cmd).await
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

/// Byte ranges of `$N` placeholders with their N, outside quoted literals.
fn placeholders(sql: &str) -> Vec<(usize, usize, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut in_literal = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            // A doubled quote inside a literal toggles twice and stays inside.
            b'\'' => {
                in_literal = !in_literal;
                i += 1;
            }
            b'$' if !in_literal => {
                let start = i;
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if let Ok(n) = sql[start + 1..i].parse::<usize>() {
                    found.push((start, i, n));
                }
            }
            _ => i += 1,
        }
    }
    found
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    placeholders(sql).iter().map(|&(_, _, n)| n).max().unwrap_or(0)
}

fn substitute_params(portal: &Portal<String>) -> String {
    substitute(&portal.statement.statement, &portal.parameters)
}

/// Replace $1, $2, ... with bound values (text format) in one pass over the
/// statement. Inserted values are never rescanned; unbound indexes stay as
/// written.
fn substitute<P: AsRef<[u8]>>(sql: &str, params: &[Option<P>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    for (start, end, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        out.push_str(&sql[copied..start]);
        match param {
            Some(bytes) => out.push_str(&quote_param(&String::from_utf8_lossy(bytes.as_ref()))),
            None => out.push_str("NULL"),
        }
        copied = end;
    }
    out.push_str(&sql[copied..]);
    out
}

/// Integers go in bare so they still parse as numbers; everything else is quoted.
fn quote_param(text: &str) -> String {
    if !text.is_empty() && text.parse::<i64>().is_ok() {
        text.to_string()
    } else {
        format!("'{}'", text.replace('\'', "''"))
    }
}

// ── Factory ──────────────────────────────────────────────────────

pub struct TallyFactory {
    handler: Arc<TallyHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<TallyAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl TallyFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = TallyAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(TallyHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for TallyFactory {
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

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(TallyFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

/// SQLSTATE for an engine error.
fn sqlstate(e: &EngineError) -> &'static str {
    if e.is_unavailable() {
        "53400"
    } else if e.is_conflict() {
        "40001"
    } else {
        match e {
            EngineError::NotFound(_) | EngineError::LockNotFound(_) => "02000",
            EngineError::AlreadyExists(_) => "23505",
            EngineError::InvalidArgument(_) => "22023",
            EngineError::LimitExceeded(_) => "54000",
            EngineError::WalError(_) => "58030",
            _ => "P0001",
        }
    }
}

fn error_message(e: &EngineError) -> String {
    if e.is_unavailable() {
        UNAVAILABLE_MESSAGE.to_string()
    } else {
        e.to_string()
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if e.is_unavailable() {
        debug!(error = %e, "capacity refused");
    }
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        error_message(&e),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn unavailable_errors_share_one_message() {
        let id = Ulid::new();
        let full = EngineError::SlotFull { slot_id: id, requested: 1, booked: 1, held: 1, total: 2 };
        let short = EngineError::InsufficientCapacity { slot_id: id, requested: 3, available: 1 };
        assert_eq!(sqlstate(&full), "53400");
        assert_eq!(sqlstate(&short), "53400");
        assert_eq!(error_message(&full), UNAVAILABLE_MESSAGE);
        assert_eq!(error_message(&EngineError::LockNotFound(id)), format!("lock not found: {id}"));
    }

    #[test]
    fn conflicts_map_to_serialization_failure() {
        let e = EngineError::VersionConflict { id: Ulid::new(), expected: 1, actual: 2 };
        assert_eq!(sqlstate(&e), "40001");
        let e = EngineError::InvalidTransition {
            from: BookingStatus::Cancelled,
            to: BookingStatus::Confirmed,
        };
        assert_eq!(sqlstate(&e), "40001");
        assert_eq!(sqlstate(&EngineError::NotFound(Ulid::new())), "02000");
        assert_eq!(sqlstate(&EngineError::HasOutstandingBookings(Ulid::new())), "P0001");
    }

    #[test]
    fn count_params_finds_highest() {
        assert_eq!(count_params("SELECT * FROM slots"), 0);
        assert_eq!(count_params("UPDATE bookings SET status = $2 WHERE id = $1"), 2);
        assert_eq!(count_params("VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)"), 10);
        assert_eq!(count_params("SELECT * FROM slots WHERE id = '$3' AND x = $1"), 1);
    }

    #[test]
    fn bound_values_are_not_rescanned() {
        let params = [Some("s$1"), Some("x")];
        assert_eq!(substitute("VALUES ($2, $1)", &params), "VALUES ('x', 's$1')");

        let params = [Some("$2' OR '1'='1"), Some("7")];
        assert_eq!(
            substitute("SELECT * FROM slots WHERE id = $1 AND capacity = $2", &params),
            "SELECT * FROM slots WHERE id = '$2'' OR ''1''=''1' AND capacity = 7"
        );
    }

    #[test]
    fn substitution_respects_indexes_and_literals() {
        let mut params = vec![Some("a"); 10];
        params[9] = Some("ten");
        params[0] = None;
        assert_eq!(substitute("($1, $10)", &params), "(NULL, 'ten')");
        // Out of range and quoted placeholders are left alone.
        assert_eq!(substitute("($11, '$2')", &params), "($11, '$2')");
    }

    #[test]
    fn params_quoted_by_shape() {
        assert_eq!(quote_param("42"), "42");
        assert_eq!(quote_param("-5"), "-5");
        assert_eq!(quote_param("o'brien"), "'o''brien'");
        assert_eq!(quote_param(""), "''");
    }

    #[test]
    fn schema_follows_from_table() {
        assert_eq!(result_schema("SELECT * FROM slots WHERE id = $1").len(), 10);
        assert_eq!(result_schema("select id from bookings").len(), 11);
        assert_eq!(result_schema("SELECT * FROM package_usage;").len(), 5);
        assert!(result_schema("INSERT INTO slots VALUES ($1)").is_empty());
    }
}
