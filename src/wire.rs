use std::fmt::Debug;
use std::ops::Range;
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
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::debug;

use crate::auth::RoombookAuthSource;
use crate::engine::{Engine, EngineError, RoomSummary};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, SqlError};

pub struct RoombookHandler {
    engine: Arc<Engine>,
    query_parser: Arc<RoombookQueryParser>,
}

fn done(tag: &str, rows: usize) -> Vec<Response> {
    vec![Response::Execution(Tag::new(tag).with_rows(rows))]
}

impl RoombookHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(RoombookQueryParser),
        }
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.dispatch(cmd).await;
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    async fn dispatch(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::InsertRoom(room) => {
                engine.create_room(room).await.map_err(engine_err)?;
                Ok(done("INSERT", 1))
            }
            Command::InsertImage { id, room_id } => {
                engine.attach_image(id, room_id).await.map_err(engine_err)?;
                Ok(done("INSERT", 1))
            }
            Command::InsertReservation {
                id,
                room_id,
                guest_id,
                start,
                end,
            } => {
                let span = Span::new(start, end).map_err(|e| engine_err(e.into()))?;
                engine
                    .reserve(NewGuestReservation {
                        id,
                        room_id,
                        guest_id,
                        span,
                    })
                    .await
                    .map_err(engine_err)?;
                Ok(done("INSERT", 1))
            }
            Command::InsertHostReservation {
                id,
                room_id,
                host_id,
                start,
                end,
            } => {
                let span = Span::new(start, end).map_err(|e| engine_err(e.into()))?;
                engine
                    .open_interval(NewHostInterval {
                        id,
                        room_id,
                        host_id,
                        span,
                    })
                    .await
                    .map_err(engine_err)?;
                Ok(done("INSERT", 1))
            }
            Command::UpdateRoom { id, patch } => {
                engine.update_room(id, patch).await.map_err(engine_err)?;
                Ok(done("UPDATE", 1))
            }
            Command::UpdateReservation { id, patch } => {
                engine
                    .update_reservation(id, patch)
                    .await
                    .map_err(engine_err)?;
                Ok(done("UPDATE", 1))
            }
            Command::UpdateHostReservation { id, patch } => {
                engine
                    .update_host_interval(id, patch)
                    .await
                    .map_err(engine_err)?;
                Ok(done("UPDATE", 1))
            }
            Command::DeleteRoom { id, host_id } => {
                engine.delete_room(id, host_id).await.map_err(engine_err)?;
                Ok(done("DELETE", 1))
            }
            Command::DeleteImage { id } => {
                engine.detach_image(id).await.map_err(engine_err)?;
                Ok(done("DELETE", 1))
            }
            Command::DeleteReservation { id } => {
                engine.cancel_reservation(id).await.map_err(engine_err)?;
                Ok(done("DELETE", 1))
            }
            Command::DeleteHostReservation { id } => {
                engine.close_interval(id).await.map_err(engine_err)?;
                Ok(done("DELETE", 1))
            }
            Command::SelectAvailability {
                room_id,
                check_in,
                check_out,
            } => {
                let available = engine
                    .is_available(room_id, check_in, check_out)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(availability_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&room_id.to_string())?;
                encoder.encode_field(&available)?;
                let rows: Vec<PgWireResult<_>> = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectRooms(filter) => {
                let rooms = engine.search(&filter).await.map_err(engine_err)?;
                Ok(vec![room_rows(rooms)])
            }
            Command::SelectReservations(scope) => {
                let reservations = engine.get_reservations(scope).await;
                let schema = Arc::new(reservation_schema());
                let rows: Vec<PgWireResult<_>> = reservations
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id.to_string())?;
                        encoder.encode_field(&r.room_id.to_string())?;
                        encoder.encode_field(&r.guest_id.to_string())?;
                        encoder.encode_field(&r.host_id.to_string())?;
                        encoder.encode_field(&r.span.start)?;
                        encoder.encode_field(&r.span.end)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectHostReservations(scope) => {
                let windows = engine.get_host_intervals(scope).await;
                let schema = Arc::new(host_reservation_schema());
                let rows: Vec<PgWireResult<_>> = windows
                    .into_iter()
                    .map(|w| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&w.id.to_string())?;
                        encoder.encode_field(&w.room_id.to_string())?;
                        encoder.encode_field(&w.host_id.to_string())?;
                        encoder.encode_field(&w.span.start)?;
                        encoder.encode_field(&w.span.end)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
        }
    }
}

fn room_rows(rooms: Vec<RoomSummary>) -> Response {
    let schema = Arc::new(room_schema());
    let rows: Vec<PgWireResult<_>> = rooms
        .into_iter()
        .map(|room| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&room.id.to_string())?;
            encoder.encode_field(&room.title)?;
            encoder.encode_field(&room.subtitle)?;
            encoder.encode_field(&room.image_url)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![field("room_id", Type::VARCHAR), field("available", Type::BOOL)]
}

fn room_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("title", Type::VARCHAR),
        field("subtitle", Type::VARCHAR),
        field("image_url", Type::VARCHAR),
    ]
}

fn reservation_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("room_id", Type::VARCHAR),
        field("guest_id", Type::VARCHAR),
        field("host_id", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
    ]
}

fn host_reservation_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("room_id", Type::VARCHAR),
        field("host_id", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
    ]
}

fn table_schema(table: &str) -> Vec<FieldInfo> {
    match table {
        "availability" => availability_schema(),
        "rooms" => room_schema(),
        "reservations" => reservation_schema(),
        "host_reservations" => host_reservation_schema(),
        _ => vec![],
    }
}

/// Result columns for a statement, decided before any parameters are bound.
/// Statements sqlparser rejects fall back to a keyword scan of the text.
fn describe_schema(sql: &str) -> Vec<FieldInfo> {
    match sql::select_table(sql) {
        Ok(Some(table)) => table_schema(&table),
        Ok(None) => vec![],
        Err(_) => guess_schema(sql),
    }
}

fn guess_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if !upper.trim_start().starts_with("SELECT") {
        return vec![];
    }
    if upper.contains("HOST_RESERVATIONS") {
        host_reservation_schema()
    } else if upper.contains("RESERVATIONS") {
        reservation_schema()
    } else if upper.contains("AVAILABILITY") {
        availability_schema()
    } else if upper.contains("ROOMS") {
        room_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for RoombookHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.execute_command(cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RoombookQueryParser;

#[async_trait]
impl QueryParser for RoombookQueryParser {
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
        Ok(describe_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for RoombookHandler {
    type Statement = String;
    type QueryParser = RoombookQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = inline_params(&portal.statement.statement, &portal.parameters);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.execute_command(cmd).await?;
        Ok(responses.remove(0))
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
            describe_schema(&target.statement),
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
        Ok(DescribePortalResponse::new(describe_schema(
            &target.statement.statement,
        )))
    }
}

/// `$N` placeholders outside quoted literals and identifiers, as
/// (byte range, N).
fn placeholders(sql: &str) -> Vec<(Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut out = Vec::new();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                // A doubled quote closes and reopens, which leaves us inside.
                if b == q {
                    quote = None;
                }
                i += 1;
            }
            None if b == b'\'' || b == b'"' => {
                quote = Some(b);
                i += 1;
            }
            None if b == b'$' => {
                let start = i;
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if let Ok(n) = sql[start + 1..i].parse::<usize>() {
                    out.push((start..i, n));
                }
            }
            None => i += 1,
        }
    }
    out
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Inline bound text parameters as quoted literals in one left-to-right
/// pass. Inlined values are never rescanned.
fn inline_params<P: AsRef<[u8]>>(sql: &str, params: &[Option<P>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        out.push_str(&sql[copied..range.start]);
        match param {
            Some(bytes) => {
                out.push('\'');
                out.push_str(&String::from_utf8_lossy(bytes.as_ref()).replace('\'', "''"));
                out.push('\'');
            }
            None => out.push_str("NULL"),
        }
        copied = range.end;
    }
    out.push_str(&sql[copied..]);
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct RoombookFactory {
    handler: Arc<RoombookHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<RoombookAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl RoombookFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        Self {
            handler: Arc::new(RoombookHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                RoombookAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RoombookFactory {
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
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let factory = RoombookFactory::new(engine, password);
    pgwire::tokio::process_socket(socket, tls, factory).await?;
    Ok(())
}

// ── Errors ───────────────────────────────────────────────────────

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::InvalidRange { .. } | EngineError::InPast(_) => "22023",
        EngineError::NotFound(_) => "P0002",
        EngineError::BookingConflict { .. } => "23P01",
        EngineError::NotRoomHost { .. } | EngineError::OwnRoom(_) => "42501",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if e.is_client_error() {
        debug!("request refused: {e}");
    } else {
        tracing::error!("engine failure: {e}");
    }
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
