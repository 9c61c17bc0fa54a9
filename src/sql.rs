use std::collections::HashMap;

use sqlparser::ast::{
    self, AssignmentTarget, Expr, FunctionArg, FunctionArgExpr, FunctionArguments, ObjectNamePart,
    SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::limits::MAX_BATCH_SIZE;
use crate::model::*;
use crate::money::parse_cents;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertSocio(Socio),
    InsertRonda {
        id: Ulid,
        nombre: String,
        monto_aporte: Cents,
        fecha_inicio: Ms,
        ahorro_objetivo: Option<Cents>,
        intervalo_dias: Option<u32>,
        multa: Option<Cents>,
    },
    AssignParticipants {
        ronda_id: Ulid,
        rows: Vec<(Ulid, Option<u32>)>, // (socio_id, orden)
    },
    Reorder {
        ronda_id: Ulid,
        orden: Vec<Ulid>,
    },
    SetResponsable {
        ronda_id: Ulid,
        socio_id: Ulid,
        semana: Option<u32>,
    },
    InsertAporte {
        ronda_id: Ulid,
        socio_id: Ulid,
        semana: u32,
        monto: Option<Cents>,
        multa: Cents,
        observaciones: Option<String>,
    },
    InsertAhorro {
        id: Ulid,
        ronda_id: Ulid,
        socio_id: Ulid,
        semana: u32,
        monto: Cents,
    },
    Deposit {
        id: Ulid,
        socio_id: Ulid,
        monto: Cents,
        fecha: Option<Ms>,
    },
    Withdraw {
        id: Ulid,
        socio_id: Ulid,
        monto: Cents,
        fecha: Option<Ms>,
    },
    InsertPrestamo {
        id: Ulid,
        ronda_id: Ulid,
        socio_id: Ulid,
        semana: u32,
        principal: Cents,
        interes: Cents,
        observaciones: Option<String>,
    },
    SettlePrestamo {
        id: Ulid,
    },
    CancelPrestamo {
        id: Ulid,
        revertir_aporte: bool,
    },
    CerrarSemana {
        ronda_id: Ulid,
    },
    SelectSocios {
        ronda_id: Option<Ulid>,
    },
    SelectRondas {
        activa: Option<bool>,
    },
    SelectNextCodigo,
    SelectParticipantes {
        ronda_id: Ulid,
    },
    SelectTurno {
        ronda_id: Ulid,
        semana: Option<u32>,
    },
    SelectSemana {
        ronda_id: Ulid,
        semana: u32,
    },
    SelectSemanas {
        ronda_id: Ulid,
    },
    SelectResultados {
        ronda_id: Ulid,
    },
    SelectResumen {
        ronda_id: Ulid,
    },
    SelectAhorros {
        socio_id: Ulid,
        desde: Option<Ms>,
        hasta: Option<Ms>,
    },
    SelectSaldo {
        socio_id: Ulid,
    },
    SelectPrestamos {
        estado: Option<EstadoPrestamo>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection.as_ref()),
        Statement::Call(function) => parse_call(function),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Name of the row set a statement returns: the FROM table of a SELECT or
/// the procedure of a CALL. Works on statements with `$n` placeholders,
/// so it can be used before parameters are bound.
pub fn result_source(sql: &str) -> Option<String> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    match stmts.first()? {
        Statement::Query(query) => match query.body.as_ref() {
            SetExpr::Select(select) => table_factor_name(&select.from.first()?.relation).ok(),
            _ => None,
        },
        Statement::Call(function) => object_name_last(&function.name),
        _ => None,
    }
}

// ── INSERT ────────────────────────────────────────────────────

const SOCIO_COLUMNS: &[&str] = &["id", "numero_cuenta", "cedula", "nombres", "apellidos", "edad"];
const RONDA_COLUMNS: &[&str] = &[
    "id",
    "nombre",
    "monto_aporte",
    "fecha_inicio",
    "ahorro_objetivo",
    "intervalo_dias",
    "multa",
];
const PARTICIPANTE_COLUMNS: &[&str] = &["ronda_id", "socio_id", "orden"];
const ORDEN_COLUMNS: &[&str] = &["ronda_id", "socio_id"];
const RESPONSABLE_COLUMNS: &[&str] = &["ronda_id", "socio_id", "semana"];
const APORTE_COLUMNS: &[&str] = &["ronda_id", "socio_id", "semana", "monto", "multa", "observaciones"];
const AHORRO_COLUMNS: &[&str] = &["id", "ronda_id", "socio_id", "semana", "monto"];
const MOVIMIENTO_COLUMNS: &[&str] = &["id", "socio_id", "monto", "fecha"];
const PRESTAMO_COLUMNS: &[&str] = &[
    "id",
    "ronda_id",
    "socio_id",
    "semana",
    "principal",
    "interes",
    "observaciones",
];

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let all_rows = extract_all_insert_rows(insert)?;
    let columns: Vec<String> = insert.columns.iter().map(|c| c.value.to_lowercase()).collect();

    match table.as_str() {
        "socios" => {
            let row = single_row("socios", SOCIO_COLUMNS, &columns, &all_rows)?;
            Ok(Command::InsertSocio(Socio {
                id: parse_ulid(row.required("id")?)?,
                numero_cuenta: parse_text(row.required("numero_cuenta")?)?,
                cedula: parse_text(row.required("cedula")?)?,
                nombres: parse_text(row.required("nombres")?)?,
                apellidos: parse_text(row.required("apellidos")?)?,
                edad: row.optional("edad").map(parse_u32).transpose()?,
            }))
        }
        "rondas" => {
            let row = single_row("rondas", RONDA_COLUMNS, &columns, &all_rows)?;
            Ok(Command::InsertRonda {
                id: parse_ulid(row.required("id")?)?,
                nombre: parse_text(row.required("nombre")?)?,
                monto_aporte: parse_money(row.required("monto_aporte")?)?,
                fecha_inicio: parse_i64(row.required("fecha_inicio")?)?,
                ahorro_objetivo: row.optional("ahorro_objetivo").map(parse_money).transpose()?,
                intervalo_dias: row.optional("intervalo_dias").map(parse_u32).transpose()?,
                multa: row.optional("multa").map(parse_money).transpose()?,
            })
        }
        "participantes" => {
            let rows = named_rows("participantes", PARTICIPANTE_COLUMNS, &columns, &all_rows)?;
            let mut ronda_id = None;
            let mut out = Vec::with_capacity(rows.len());
            for (i, row) in rows.iter().enumerate() {
                same_ronda(&mut ronda_id, parse_ulid(row.required("ronda_id")?)?)?;
                out.push((
                    parse_ulid(row.required("socio_id")?).map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?,
                    row.optional("orden").map(parse_u32).transpose()?,
                ));
            }
            Ok(Command::AssignParticipants {
                ronda_id: ronda_id.ok_or(SqlError::Parse("empty VALUES".into()))?,
                rows: out,
            })
        }
        "orden" => {
            let rows = named_rows("orden", ORDEN_COLUMNS, &columns, &all_rows)?;
            let mut ronda_id = None;
            let mut orden = Vec::with_capacity(rows.len());
            for row in &rows {
                same_ronda(&mut ronda_id, parse_ulid(row.required("ronda_id")?)?)?;
                orden.push(parse_ulid(row.required("socio_id")?)?);
            }
            Ok(Command::Reorder {
                ronda_id: ronda_id.ok_or(SqlError::Parse("empty VALUES".into()))?,
                orden,
            })
        }
        "responsables" => {
            let row = single_row("responsables", RESPONSABLE_COLUMNS, &columns, &all_rows)?;
            Ok(Command::SetResponsable {
                ronda_id: parse_ulid(row.required("ronda_id")?)?,
                socio_id: parse_ulid(row.required("socio_id")?)?,
                semana: row.optional("semana").map(parse_u32).transpose()?,
            })
        }
        "aportes" => {
            let row = single_row("aportes", APORTE_COLUMNS, &columns, &all_rows)?;
            Ok(Command::InsertAporte {
                ronda_id: parse_ulid(row.required("ronda_id")?)?,
                socio_id: parse_ulid(row.required("socio_id")?)?,
                semana: parse_u32(row.required("semana")?)?,
                monto: row.optional("monto").map(parse_money).transpose()?,
                multa: row.optional("multa").map(parse_money).transpose()?.unwrap_or(0),
                observaciones: row.optional("observaciones").map(parse_text).transpose()?,
            })
        }
        "ahorros" => {
            let row = single_row("ahorros", AHORRO_COLUMNS, &columns, &all_rows)?;
            Ok(Command::InsertAhorro {
                id: parse_ulid(row.required("id")?)?,
                ronda_id: parse_ulid(row.required("ronda_id")?)?,
                socio_id: parse_ulid(row.required("socio_id")?)?,
                semana: parse_u32(row.required("semana")?)?,
                monto: parse_money(row.required("monto")?)?,
            })
        }
        "depositos" | "retiros" => {
            let name = if table == "depositos" { "depositos" } else { "retiros" };
            let row = single_row(name, MOVIMIENTO_COLUMNS, &columns, &all_rows)?;
            let id = parse_ulid(row.required("id")?)?;
            let socio_id = parse_ulid(row.required("socio_id")?)?;
            let monto = parse_money(row.required("monto")?)?;
            let fecha = row.optional("fecha").map(parse_i64).transpose()?;
            if name == "depositos" {
                Ok(Command::Deposit { id, socio_id, monto, fecha })
            } else {
                Ok(Command::Withdraw { id, socio_id, monto, fecha })
            }
        }
        "prestamos" => {
            let row = single_row("prestamos", PRESTAMO_COLUMNS, &columns, &all_rows)?;
            Ok(Command::InsertPrestamo {
                id: parse_ulid(row.required("id")?)?,
                ronda_id: parse_ulid(row.required("ronda_id")?)?,
                socio_id: parse_ulid(row.required("socio_id")?)?,
                semana: parse_u32(row.required("semana")?)?,
                principal: parse_money(row.required("principal")?)?,
                interes: row.optional("interes").map(parse_money).transpose()?.unwrap_or(0),
                observaciones: row.optional("observaciones").map(parse_text).transpose()?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn same_ronda(current: &mut Option<Ulid>, ronda_id: Ulid) -> Result<(), SqlError> {
    match current {
        Some(id) if *id != ronda_id => Err(SqlError::Parse(
            "all rows must target the same ronda".into(),
        )),
        _ => {
            *current = Some(ronda_id);
            Ok(())
        }
    }
}

/// One VALUES row keyed by column name.
struct Row<'a> {
    table: &'static str,
    values: HashMap<&'a str, &'a Expr>,
}

impl<'a> Row<'a> {
    fn required(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.values
            .get(col)
            .copied()
            .ok_or(SqlError::MissingColumn(self.table, col))
    }

    /// Absent and NULL are the same thing.
    fn optional(&self, col: &str) -> Option<&'a Expr> {
        self.values
            .get(col)
            .copied()
            .filter(|e| !matches!(extract_value(e), Some(Value::Null)))
    }
}

/// Pair every value with its column: the explicit column list when given,
/// otherwise the table's columns in declaration order.
fn named_rows<'a>(
    table: &'static str,
    known: &'static [&'static str],
    columns: &'a [String],
    rows: &'a [Vec<Expr>],
) -> Result<Vec<Row<'a>>, SqlError> {
    if rows.len() > MAX_BATCH_SIZE {
        return Err(SqlError::Parse(format!("at most {MAX_BATCH_SIZE} rows per INSERT")));
    }
    let names: Vec<&str> = if columns.is_empty() {
        known.to_vec()
    } else {
        for c in columns {
            if !known.contains(&c.as_str()) {
                return Err(SqlError::UnknownColumn(table, c.clone()));
            }
        }
        columns.iter().map(String::as_str).collect()
    };

    rows.iter()
        .map(|row| {
            if row.len() > names.len() || (!columns.is_empty() && row.len() != names.len()) {
                return Err(SqlError::WrongArity(table, names.len(), row.len()));
            }
            Ok(Row {
                table,
                values: names.iter().copied().zip(row.iter()).collect(),
            })
        })
        .collect()
}

fn single_row<'a>(
    table: &'static str,
    known: &'static [&'static str],
    columns: &'a [String],
    rows: &'a [Vec<Expr>],
) -> Result<Row<'a>, SqlError> {
    if rows.len() != 1 {
        return Err(SqlError::Unsupported(format!("multi-row INSERT into {table}")));
    }
    named_rows(table, known, columns, rows)?
        .pop()
        .ok_or(SqlError::Parse("empty VALUES".into()))
}

// ── UPDATE / CALL ─────────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: Option<&Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    if table != "prestamos" {
        return Err(SqlError::Unsupported(format!("UPDATE {table}")));
    }
    let id = extract_where_id(selection)?;

    let mut estado = None;
    let mut revertir_aporte = None;
    for a in assignments {
        let col = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            _ => None,
        };
        match col.as_deref() {
            Some("estado") => {
                let s = parse_text(&a.value)?;
                estado = Some(
                    EstadoPrestamo::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad estado: {s}")))?,
                );
            }
            Some("revertir_aporte") => revertir_aporte = Some(parse_bool(&a.value)?),
            Some(other) => return Err(SqlError::UnknownColumn("prestamos", other.to_string())),
            None => return Err(SqlError::Parse("unsupported assignment target".into())),
        }
    }

    match (estado, revertir_aporte) {
        (Some(EstadoPrestamo::Pagado), None) => Ok(Command::SettlePrestamo { id }),
        (Some(EstadoPrestamo::Cancelado), revertir) => Ok(Command::CancelPrestamo {
            id,
            revertir_aporte: revertir.unwrap_or(false),
        }),
        (Some(EstadoPrestamo::Pagado), Some(_)) => Err(SqlError::Parse(
            "revertir_aporte only applies to CANCELADO".into(),
        )),
        (Some(EstadoPrestamo::Pendiente), _) => {
            Err(SqlError::Unsupported("setting a prestamo back to PENDIENTE".into()))
        }
        (None, _) => Err(SqlError::MissingColumn("prestamos", "estado")),
    }
}

fn parse_call(function: &ast::Function) -> Result<Command, SqlError> {
    let name = object_name_last(&function.name).unwrap_or_default();
    let args: Vec<&Expr> = match &function.args {
        FunctionArguments::List(list) => list
            .args
            .iter()
            .map(|arg| match arg {
                FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => Ok(e),
                _ => Err(SqlError::Parse("only positional arguments are supported".into())),
            })
            .collect::<Result<_, _>>()?,
        FunctionArguments::None => Vec::new(),
        FunctionArguments::Subquery(_) => {
            return Err(SqlError::Unsupported("subquery argument".into()));
        }
    };

    match name.as_str() {
        "cerrar_semana" => {
            if args.len() != 1 {
                return Err(SqlError::WrongArity("cerrar_semana", 1, args.len()));
            }
            Ok(Command::CerrarSemana {
                ronda_id: parse_ulid(args[0])?,
            })
        }
        _ => Err(SqlError::Unsupported(format!("CALL {name}"))),
    }
}

// ── SELECT ────────────────────────────────────────────────────

/// Conditions of a WHERE clause, ANDed together.
#[derive(Default)]
struct Filters {
    eq: HashMap<String, Expr>,
    gte: HashMap<String, Expr>,
    lte: HashMap<String, Expr>,
}

impl Filters {
    fn required(&self, col: &'static str) -> Result<&Expr, SqlError> {
        self.eq.get(col).ok_or(SqlError::MissingFilter(col))
    }

    fn ronda_id(&self) -> Result<Ulid, SqlError> {
        parse_ulid(self.required("ronda_id")?)
    }

    fn socio_id(&self) -> Result<Ulid, SqlError> {
        parse_ulid(self.required("socio_id")?)
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut f = Filters::default();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut f)?;
    }

    match table.as_str() {
        "socios" => Ok(Command::SelectSocios {
            ronda_id: f.eq.get("ronda_id").map(parse_ulid).transpose()?,
        }),
        "rondas" => Ok(Command::SelectRondas {
            activa: f.eq.get("activa").map(parse_bool).transpose()?,
        }),
        "next_codigo" => Ok(Command::SelectNextCodigo),
        "participantes" => Ok(Command::SelectParticipantes { ronda_id: f.ronda_id()? }),
        "turno" => Ok(Command::SelectTurno {
            ronda_id: f.ronda_id()?,
            semana: f.eq.get("semana").map(parse_u32).transpose()?,
        }),
        "semana" => Ok(Command::SelectSemana {
            ronda_id: f.ronda_id()?,
            semana: parse_u32(f.required("semana")?)?,
        }),
        "semanas" => Ok(Command::SelectSemanas { ronda_id: f.ronda_id()? }),
        "resultados" => Ok(Command::SelectResultados { ronda_id: f.ronda_id()? }),
        "resumen" => Ok(Command::SelectResumen { ronda_id: f.ronda_id()? }),
        "ahorros" => Ok(Command::SelectAhorros {
            socio_id: f.socio_id()?,
            desde: f.gte.get("fecha").map(parse_i64).transpose()?,
            hasta: f.lte.get("fecha").map(parse_i64).transpose()?,
        }),
        "saldos" => Ok(Command::SelectSaldo { socio_id: f.socio_id()? }),
        "prestamos" => {
            let estado = f
                .eq
                .get("estado")
                .map(|e| {
                    let s = parse_text(e)?;
                    EstadoPrestamo::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad estado: {s}")))
                })
                .transpose()?;
            Ok(Command::SelectPrestamos { estado })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn collect_filters(expr: &Expr, f: &mut Filters) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, f),
        Expr::BinaryOp { left, op, right } => {
            let target = match op {
                ast::BinaryOperator::And => {
                    collect_filters(left, f)?;
                    return collect_filters(right, f);
                }
                ast::BinaryOperator::Eq => &mut f.eq,
                ast::BinaryOperator::GtEq => &mut f.gte,
                ast::BinaryOperator::LtEq => &mut f.lte,
                other => return Err(SqlError::Unsupported(format!("operator {other}"))),
            };
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Parse(format!("expected column, got {left}")))?;
            target.insert(col, right.as_ref().clone());
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
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

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: Option<&Expr>) -> Result<Ulid, SqlError> {
    let mut f = Filters::default();
    collect_filters(selection.ok_or(SqlError::MissingFilter("id"))?, &mut f)?;
    parse_ulid(f.required("id")?)
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

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected ULID string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64(expr)?);
    }
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => s
            .trim()
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad integer {s}: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

/// Decimal amount, as a number literal or a quoted string.
fn parse_money(expr: &Expr) -> Result<Cents, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_money(expr)?);
    }
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => {
            parse_cents(s).map_err(|e| SqlError::Parse(e.to_string()))
        }
        Some(value) => Err(SqlError::Parse(format!("expected amount, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    MissingColumn(&'static str, &'static str),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "{t}: unknown column {c}"),
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing value for {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
