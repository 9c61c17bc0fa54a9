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
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::CajaAuthSource;
use crate::engine::Engine;
use crate::model::*;
use crate::money::format_cents;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

pub struct CajaHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<CajaQueryParser>,
}

impl CajaHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(CajaQueryParser),
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

    /// Parse, execute and record RED metrics for one statement.
    async fn run(&self, engine: &Engine, sql: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(|e| {
            metrics::counter!(QUERIES_TOTAL, "command" => "invalid", "status" => "error").increment(1);
            tracing::debug!("rejected statement {sql:?}: {e}");
            sql_err(e)
        })?;
        let label = command_label(&cmd);
        let start = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            Command::InsertSocio(socio) => {
                engine.create_socio(socio).await.map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::InsertRonda {
                id,
                nombre,
                monto_aporte,
                fecha_inicio,
                ahorro_objetivo,
                intervalo_dias,
                multa,
            } => {
                engine
                    .create_ronda(
                        id,
                        nombre,
                        monto_aporte,
                        fecha_inicio,
                        ahorro_objetivo,
                        intervalo_dias,
                        multa,
                    )
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::AssignParticipants { ronda_id, rows } => {
                let orden = engine
                    .assign_participants(ronda_id, rows)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(orden.len()))
            }
            Command::Reorder { ronda_id, orden } => {
                let count = orden.len();
                engine.reorder(ronda_id, orden).await.map_err(engine_err)?;
                Ok(inserted(count))
            }
            Command::SetResponsable {
                ronda_id,
                socio_id,
                semana,
            } => {
                engine
                    .set_responsable(ronda_id, socio_id, semana)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::InsertAporte {
                ronda_id,
                socio_id,
                semana,
                monto,
                multa,
                observaciones,
            } => {
                engine
                    .record_aporte(ronda_id, socio_id, semana, monto, multa, observaciones)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::InsertAhorro {
                id,
                ronda_id,
                socio_id,
                semana,
                monto,
            } => {
                engine
                    .record_ahorro(id, ronda_id, socio_id, semana, monto)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::Deposit {
                id,
                socio_id,
                monto,
                fecha,
            } => {
                engine
                    .deposit(id, socio_id, monto, fecha)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::Withdraw {
                id,
                socio_id,
                monto,
                fecha,
            } => {
                engine
                    .withdraw(id, socio_id, monto, fecha)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::InsertPrestamo {
                id,
                ronda_id,
                socio_id,
                semana,
                principal,
                interes,
                observaciones,
            } => {
                engine
                    .grant_prestamo(id, ronda_id, socio_id, semana, principal, interes, observaciones)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::SettlePrestamo { id } => {
                engine.settle_prestamo(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::CancelPrestamo {
                id,
                revertir_aporte,
            } => {
                engine
                    .cancel_prestamo(id, revertir_aporte)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::CerrarSemana { ronda_id } => {
                let cierre = engine.cerrar_semana(ronda_id).await.map_err(engine_err)?;
                Ok(cierre_response(cierre))
            }
            Command::SelectSocios { ronda_id } => {
                let socios = engine.socios(ronda_id).await.map_err(engine_err)?;
                Ok(rows_response(socios_schema(), socios, |enc, s| {
                    enc.encode_field(&s.socio.id.to_string())?;
                    enc.encode_field(&s.socio.numero_cuenta)?;
                    enc.encode_field(&s.socio.cedula)?;
                    enc.encode_field(&s.socio.nombres)?;
                    enc.encode_field(&s.socio.apellidos)?;
                    enc.encode_field(&s.socio.edad.and_then(|e| i32::try_from(e).ok()))?;
                    enc.encode_field(&format_cents(s.ahorros))?;
                    enc.encode_field(&format_cents(s.multas))
                }))
            }
            Command::SelectRondas { activa } => {
                let rondas = engine.rondas(activa).await;
                Ok(rows_response(rondas_schema(), rondas, |enc, r| encode_ronda(enc, &r)))
            }
            Command::SelectNextCodigo => {
                let codigo = engine.next_codigo().await;
                Ok(rows_response(next_codigo_schema(), vec![codigo], |enc, c| {
                    enc.encode_field(&c)
                }))
            }
            Command::SelectParticipantes { ronda_id } => {
                let rows = engine.participantes(ronda_id).await.map_err(engine_err)?;
                Ok(rows_response(participantes_schema(), rows, |enc, p| {
                    enc.encode_field(&p.ronda_id.to_string())?;
                    enc.encode_field(&p.socio_id.to_string())?;
                    enc.encode_field(&(p.orden as i32))?;
                    enc.encode_field(&p.nombres)?;
                    enc.encode_field(&p.apellidos)?;
                    enc.encode_field(&p.numero_cuenta)
                }))
            }
            Command::SelectTurno { ronda_id, semana } => {
                let turno = engine.turno(ronda_id, semana).await.map_err(engine_err)?;
                Ok(rows_response(turno_schema(), vec![turno], |enc, t| {
                    enc.encode_field(&t.ronda_id.to_string())?;
                    enc.encode_field(&(t.semana as i32))?;
                    enc.encode_field(&t.beneficiario_id.to_string())?;
                    enc.encode_field(&(t.orden as i32))?;
                    enc.encode_field(&format_cents(t.pozo))?;
                    enc.encode_field(&opt_id(t.responsable_id))
                }))
            }
            Command::SelectSemana { ronda_id, semana } => {
                let rows = engine.semana(ronda_id, semana).await.map_err(engine_err)?;
                Ok(rows_response(semana_schema(), rows, |enc, e| {
                    enc.encode_field(&e.socio_id.to_string())?;
                    enc.encode_field(&(e.orden as i32))?;
                    enc.encode_field(&e.pagado)?;
                    enc.encode_field(&e.monto.map(format_cents))?;
                    enc.encode_field(&format_cents(e.multa))?;
                    enc.encode_field(&opt_id(e.prestamo_id))?;
                    enc.encode_field(&format_cents(e.ahorro_acumulado))?;
                    enc.encode_field(&format_cents(e.ahorro_restante))?;
                    enc.encode_field(&e.ahorro_semana)?;
                    enc.encode_field(&e.beneficiario)
                }))
            }
            Command::SelectSemanas { ronda_id } => {
                let rows = engine.semanas(ronda_id).await.map_err(engine_err)?;
                Ok(rows_response(semanas_schema(), rows, |enc, s| {
                    enc.encode_field(&(s.semana as i32))?;
                    enc.encode_field(&format_cents(s.total_aportes))?;
                    enc.encode_field(&format_cents(s.total_multas))?;
                    enc.encode_field(&format_cents(s.total_ahorros))?;
                    enc.encode_field(&opt_id(s.beneficiario_id))?;
                    enc.encode_field(&opt_id(s.responsable_id))
                }))
            }
            Command::SelectResultados { ronda_id } => {
                let rows = engine.resultados(ronda_id).await.map_err(engine_err)?;
                Ok(rows_response(resultados_schema(), rows, |enc, r| {
                    enc.encode_field(&r.socio_id.to_string())?;
                    enc.encode_field(&(r.orden as i32))?;
                    enc.encode_field(&format_cents(r.aportes))?;
                    enc.encode_field(&format_cents(r.multas))?;
                    enc.encode_field(&format_cents(r.ahorros))
                }))
            }
            Command::SelectResumen { ronda_id } => {
                let resumen = engine.resumen(ronda_id).await.map_err(engine_err)?;
                Ok(rows_response(resumen_schema(), vec![resumen], |enc, r| {
                    encode_ronda(enc, &r.ronda)?;
                    enc.encode_field(&(r.duracion_semanas as i32))?;
                    enc.encode_field(&format_cents(r.total_recaudado))?;
                    enc.encode_field(&format_cents(r.total_multas))?;
                    enc.encode_field(&format_cents(r.total_ahorros))
                }))
            }
            Command::SelectAhorros {
                socio_id,
                desde,
                hasta,
            } => {
                let rows = engine
                    .ahorro_history(socio_id, desde, hasta)
                    .await
                    .map_err(engine_err)?;
                Ok(rows_response(ahorros_schema(), rows, |enc, m| {
                    enc.encode_field(&m.id.to_string())?;
                    enc.encode_field(&m.socio_id.to_string())?;
                    enc.encode_field(&opt_id(m.ronda_id))?;
                    enc.encode_field(&m.semana.map(|s| s as i32))?;
                    enc.encode_field(&format_cents(m.monto))?;
                    enc.encode_field(&m.fecha)
                }))
            }
            Command::SelectSaldo { socio_id } => {
                let saldo = engine.saldo(socio_id).await.map_err(engine_err)?;
                Ok(rows_response(saldos_schema(), vec![saldo], |enc, saldo| {
                    enc.encode_field(&socio_id.to_string())?;
                    enc.encode_field(&format_cents(saldo))
                }))
            }
            Command::SelectPrestamos { estado } => {
                let rows = engine.prestamos(estado).await;
                Ok(rows_response(prestamos_schema(), rows, |enc, p| {
                    enc.encode_field(&p.id.to_string())?;
                    enc.encode_field(&p.ronda_id.to_string())?;
                    enc.encode_field(&p.socio_id.to_string())?;
                    enc.encode_field(&(p.semana as i32))?;
                    enc.encode_field(&format_cents(p.principal))?;
                    enc.encode_field(&format_cents(p.interes))?;
                    enc.encode_field(&format_cents(p.total()))?;
                    enc.encode_field(&p.estado.as_str())?;
                    enc.encode_field(&p.observaciones)?;
                    enc.encode_field(&p.creado)
                }))
            }
        }
    }
}

fn inserted(rows: usize) -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(rows))
}

fn opt_id(id: Option<Ulid>) -> Option<String> {
    id.map(|id| id.to_string())
}

fn encode_ronda(enc: &mut DataRowEncoder, r: &RondaInfo) -> PgWireResult<()> {
    enc.encode_field(&r.id.to_string())?;
    enc.encode_field(&r.codigo)?;
    enc.encode_field(&r.nombre)?;
    enc.encode_field(&format_cents(r.monto_aporte))?;
    enc.encode_field(&format_cents(r.ahorro_objetivo))?;
    enc.encode_field(&format_cents(r.multa))?;
    enc.encode_field(&r.fecha_inicio)?;
    enc.encode_field(&r.fecha_fin)?;
    enc.encode_field(&r.activa)?;
    enc.encode_field(&(r.semana_actual as i32))?;
    enc.encode_field(&(r.participantes as i32))
}

/// One row per pending member when the week stays open, otherwise a single
/// row describing the transition.
fn cierre_response(cierre: CierreSemana) -> Response {
    type CierreRow = (&'static str, u32, Option<u32>, Option<PendienteInfo>);
    let rows: Vec<CierreRow> = match cierre {
        CierreSemana::Pendiente { semana, pendientes } => pendientes
            .into_iter()
            .map(|p| ("PENDIENTE", semana, None, Some(p)))
            .collect(),
        CierreSemana::Avanzada { semana, siguiente } => vec![("AVANZADA", semana, Some(siguiente), None)],
        CierreSemana::Finalizada { semana } => vec![("FINALIZADA", semana, None, None)],
    };
    rows_response(cierre_schema(), rows, |enc, (estado, semana, siguiente, pendiente)| {
        enc.encode_field(&estado)?;
        enc.encode_field(&(semana as i32))?;
        enc.encode_field(&siguiente.map(|s| s as i32))?;
        enc.encode_field(&pendiente.as_ref().map(|p| p.socio_id.to_string()))?;
        enc.encode_field(&pendiente.as_ref().map(|p| format_cents(p.monto_aporte)))?;
        enc.encode_field(&pendiente.as_ref().map(|p| format_cents(p.multa)))?;
        enc.encode_field(&pendiente.as_ref().map(|p| format_cents(p.total_adeudado())))
    })
}

fn rows_response<T>(
    schema: Vec<FieldInfo>,
    items: Vec<T>,
    encode: impl Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

// ── Result schemas ───────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn text(name: &str) -> FieldInfo {
    field(name, Type::VARCHAR)
}

fn socios_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("numero_cuenta"),
        text("cedula"),
        text("nombres"),
        text("apellidos"),
        field("edad", Type::INT4),
        text("ahorros"),
        text("multas"),
    ]
}

fn rondas_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("codigo"),
        text("nombre"),
        text("monto_aporte"),
        text("ahorro_objetivo"),
        text("multa"),
        field("fecha_inicio", Type::INT8),
        field("fecha_fin", Type::INT8),
        field("activa", Type::BOOL),
        field("semana_actual", Type::INT4),
        field("participantes", Type::INT4),
    ]
}

fn next_codigo_schema() -> Vec<FieldInfo> {
    vec![text("codigo")]
}

fn participantes_schema() -> Vec<FieldInfo> {
    vec![
        text("ronda_id"),
        text("socio_id"),
        field("orden", Type::INT4),
        text("nombres"),
        text("apellidos"),
        text("numero_cuenta"),
    ]
}

fn turno_schema() -> Vec<FieldInfo> {
    vec![
        text("ronda_id"),
        field("semana", Type::INT4),
        text("beneficiario_id"),
        field("orden", Type::INT4),
        text("pozo"),
        text("responsable_id"),
    ]
}

fn semana_schema() -> Vec<FieldInfo> {
    vec![
        text("socio_id"),
        field("orden", Type::INT4),
        field("pagado", Type::BOOL),
        text("monto"),
        text("multa"),
        text("prestamo_id"),
        text("ahorro_acumulado"),
        text("ahorro_restante"),
        field("ahorro_semana", Type::BOOL),
        field("beneficiario", Type::BOOL),
    ]
}

fn semanas_schema() -> Vec<FieldInfo> {
    vec![
        field("semana", Type::INT4),
        text("total_aportes"),
        text("total_multas"),
        text("total_ahorros"),
        text("beneficiario_id"),
        text("responsable_id"),
    ]
}

fn resultados_schema() -> Vec<FieldInfo> {
    vec![
        text("socio_id"),
        field("orden", Type::INT4),
        text("aportes"),
        text("multas"),
        text("ahorros"),
    ]
}

fn resumen_schema() -> Vec<FieldInfo> {
    let mut schema = rondas_schema();
    schema.extend([
        field("duracion_semanas", Type::INT4),
        text("total_recaudado"),
        text("total_multas"),
        text("total_ahorros"),
    ]);
    schema
}

fn ahorros_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("socio_id"),
        text("ronda_id"),
        field("semana", Type::INT4),
        text("monto"),
        field("fecha", Type::INT8),
    ]
}

fn saldos_schema() -> Vec<FieldInfo> {
    vec![text("socio_id"), text("saldo")]
}

fn prestamos_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("ronda_id"),
        text("socio_id"),
        field("semana", Type::INT4),
        text("principal"),
        text("interes"),
        text("total"),
        text("estado"),
        text("observaciones"),
        field("creado", Type::INT8),
    ]
}

fn cierre_schema() -> Vec<FieldInfo> {
    vec![
        text("estado"),
        field("semana", Type::INT4),
        field("siguiente", Type::INT4),
        text("socio_id"),
        text("monto_aporte"),
        text("multa"),
        text("total_adeudado"),
    ]
}

/// Columns a statement returns, judged from its text alone.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    match sql::result_source(sql).as_deref() {
        Some("socios") => socios_schema(),
        Some("rondas") => rondas_schema(),
        Some("next_codigo") => next_codigo_schema(),
        Some("participantes") => participantes_schema(),
        Some("turno") => turno_schema(),
        Some("semana") => semana_schema(),
        Some("semanas") => semanas_schema(),
        Some("resultados") => resultados_schema(),
        Some("resumen") => resumen_schema(),
        Some("ahorros") => ahorros_schema(),
        Some("saldos") => saldos_schema(),
        Some("prestamos") => prestamos_schema(),
        Some("cerrar_semana") => cierre_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for CajaHandler {
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
        Ok(vec![self.run(&engine, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct CajaQueryParser;

#[async_trait]
impl QueryParser for CajaQueryParser {
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
impl ExtendedQueryHandler for CajaHandler {
    type Statement = String;
    type QueryParser = CajaQueryParser;

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
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
        self.run(&engine, &sql).await
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

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text
/// format). Values become quoted literals; the SQL layer accepts quoted
/// numbers, amounts and booleans.
fn substitute_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut result = sql.to_string();
    // Highest index first so $1 never matches the prefix of $10.
    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct CajaFactory {
    handler: Arc<CajaHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<CajaAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl CajaFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = CajaAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(CajaHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for CajaFactory {
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
    let factory = Arc::new(CajaFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: crate::engine::EngineError) -> PgWireError {
    tracing::debug!("rejected: {e}");
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "P0001".into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
