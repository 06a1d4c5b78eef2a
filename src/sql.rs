use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::{HostIntervalScope, ReservationScope, RoomFilter, StructuralFilter};
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRoom(Room),
    InsertImage {
        id: Ulid,
        room_id: Ulid,
    },
    InsertReservation {
        id: Ulid,
        room_id: Ulid,
        guest_id: Ulid,
        start: Ms,
        end: Ms,
    },
    InsertHostReservation {
        id: Ulid,
        room_id: Ulid,
        host_id: Ulid,
        start: Ms,
        end: Ms,
    },
    UpdateRoom {
        id: Ulid,
        patch: RoomPatch,
    },
    UpdateReservation {
        id: Ulid,
        patch: SpanPatch,
    },
    UpdateHostReservation {
        id: Ulid,
        patch: SpanPatch,
    },
    DeleteRoom {
        id: Ulid,
        host_id: Ulid,
    },
    DeleteImage {
        id: Ulid,
    },
    DeleteReservation {
        id: Ulid,
    },
    DeleteHostReservation {
        id: Ulid,
    },
    SelectAvailability {
        room_id: Ulid,
        check_in: Ms,
        check_out: Ms,
    },
    SelectRooms(RoomFilter),
    SelectReservations(ReservationScope),
    SelectHostReservations(HostIntervalScope),
}

const ROOM_COLUMNS: &[&str] = &[
    "id",
    "host_id",
    "title",
    "subtitle",
    "description",
    "price",
    "rooms_count",
    "location",
    "room_type",
    "rate",
];
const IMAGE_COLUMNS: &[&str] = &["id", "room_id"];
const RESERVATION_COLUMNS: &[&str] = &["id", "room_id", "guest_id", "start", "end"];
const HOST_RESERVATION_COLUMNS: &[&str] = &["id", "room_id", "host_id", "start", "end"];

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
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Table a SELECT reads from, or `None` for statements that return no rows.
/// Only the statement shape is looked at, so `$N` placeholders are fine.
pub fn select_table(sql: &str) -> Result<Option<String>, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(Statement::Query(query)) = stmts.first() else {
        return Ok(None);
    };
    let SetExpr::Select(select) = query.body.as_ref() else {
        return Ok(None);
    };
    match select.from.first() {
        Some(from) => table_factor_name(&from.relation).map(Some),
        None => Ok(None),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row laid out in a table's canonical column order.
struct Row<'a> {
    table: &'static str,
    columns: &'static [&'static str],
    values: Vec<Option<&'a Expr>>,
}

impl<'a> Row<'a> {
    /// Accepts positional values, or any subset of columns when the INSERT
    /// names them. The first `required` columns must be present.
    fn from_insert(
        insert: &'a ast::Insert,
        table: &'static str,
        columns: &'static [&'static str],
        required: usize,
    ) -> Result<Self, SqlError> {
        let exprs = single_values_row(insert)?;
        let mut values = vec![None; columns.len()];

        if insert.columns.is_empty() {
            if exprs.len() > columns.len() || exprs.len() < required {
                return Err(SqlError::WrongArity(table, required, exprs.len()));
            }
            for (slot, expr) in values.iter_mut().zip(exprs) {
                *slot = Some(expr);
            }
        } else {
            if insert.columns.len() != exprs.len() {
                return Err(SqlError::WrongArity(table, insert.columns.len(), exprs.len()));
            }
            for (ident, expr) in insert.columns.iter().zip(exprs) {
                let name = ident.value.to_lowercase();
                let pos = columns
                    .iter()
                    .position(|c| *c == name)
                    .ok_or(SqlError::UnknownColumn(name))?;
                values[pos] = Some(expr);
            }
        }

        let row = Self {
            table,
            columns,
            values,
        };
        for &col in &columns[..required] {
            row.required(col)?;
        }
        Ok(row)
    }

    fn get(&self, col: &str) -> Option<&'a Expr> {
        let pos = self.columns.iter().position(|c| *c == col)?;
        self.values[pos].filter(|e| !is_null(e))
    }

    fn required(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(col).ok_or(SqlError::MissingColumn(self.table, col))
    }

    fn ulid(&self, col: &'static str) -> Result<Ulid, SqlError> {
        parse_ulid_expr(self.required(col)?)
    }

    fn timestamp(&self, col: &'static str) -> Result<Ms, SqlError> {
        parse_timestamp_expr(self.required(col)?)
    }

    fn text(&self, col: &str) -> Result<Option<String>, SqlError> {
        self.get(col).map(parse_string_expr).transpose()
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;

    match table.as_str() {
        "rooms" => {
            let row = Row::from_insert(insert, "rooms", ROOM_COLUMNS, 3)?;
            let mut room = Room::new(
                row.ulid("id")?,
                row.ulid("host_id")?,
                parse_string_expr(row.required("title")?)?,
            );
            room.subtitle = row.text("subtitle")?;
            room.description = row.text("description")?;
            room.price = row.get("price").map(parse_i64_expr).transpose()?;
            room.rooms_count = row.get("rooms_count").map(parse_u32_expr).transpose()?;
            room.location = row.text("location")?;
            room.room_type = row.text("room_type")?;
            room.rate = row.get("rate").map(parse_f64_expr).transpose()?;
            Ok(Command::InsertRoom(room))
        }
        "room_images" => {
            let row = Row::from_insert(insert, "room_images", IMAGE_COLUMNS, 2)?;
            Ok(Command::InsertImage {
                id: row.ulid("id")?,
                room_id: row.ulid("room_id")?,
            })
        }
        "reservations" => {
            let row = Row::from_insert(insert, "reservations", RESERVATION_COLUMNS, 5)?;
            Ok(Command::InsertReservation {
                id: row.ulid("id")?,
                room_id: row.ulid("room_id")?,
                guest_id: row.ulid("guest_id")?,
                start: row.timestamp("start")?,
                end: row.timestamp("end")?,
            })
        }
        "host_reservations" => {
            let row = Row::from_insert(insert, "host_reservations", HOST_RESERVATION_COLUMNS, 5)?;
            Ok(Command::InsertHostReservation {
                id: row.ulid("id")?,
                room_id: row.ulid("room_id")?,
                host_id: row.ulid("host_id")?,
                start: row.timestamp("start")?,
                end: row.timestamp("end")?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let id = extract_where_id(selection)?;

    let mut set = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let AssignmentTarget::ColumnName(name) = &assignment.target else {
            return Err(SqlError::Unsupported("tuple assignment".into()));
        };
        let column =
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))?;
        // SET col = NULL leaves the column as it is.
        if !is_null(&assignment.value) {
            set.push((column, &assignment.value));
        }
    }

    match table.as_str() {
        "rooms" => {
            let mut patch = RoomPatch::default();
            for (column, value) in set {
                match column.as_str() {
                    "title" => patch.title = Some(parse_string_expr(value)?),
                    "subtitle" => patch.subtitle = Some(parse_string_expr(value)?),
                    "description" => patch.description = Some(parse_string_expr(value)?),
                    "price" => patch.price = Some(parse_i64_expr(value)?),
                    "rooms_count" => patch.rooms_count = Some(parse_u32_expr(value)?),
                    "location" => patch.location = Some(parse_string_expr(value)?),
                    "room_type" => patch.room_type = Some(parse_string_expr(value)?),
                    "rate" => patch.rate = Some(parse_f64_expr(value)?),
                    _ => return Err(SqlError::ReadOnlyColumn("rooms", column)),
                }
            }
            Ok(Command::UpdateRoom { id, patch })
        }
        "reservations" => Ok(Command::UpdateReservation {
            id,
            patch: span_patch("reservations", set)?,
        }),
        "host_reservations" => Ok(Command::UpdateHostReservation {
            id,
            patch: span_patch("host_reservations", set)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn span_patch(table: &'static str, set: Vec<(String, &Expr)>) -> Result<SpanPatch, SqlError> {
    let mut patch = SpanPatch::default();
    for (column, value) in set {
        match column.as_str() {
            "start" => patch.start = Some(parse_timestamp_expr(value)?),
            "end" => patch.end = Some(parse_timestamp_expr(value)?),
            _ => return Err(SqlError::ReadOnlyColumn(table, column)),
        }
    }
    Ok(patch)
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = collect_eq_filters(delete.selection.as_ref())?;
    let id = filters.ulid("id")?;

    match table.as_str() {
        "rooms" => Ok(Command::DeleteRoom {
            id,
            host_id: filters.ulid("host_id")?,
        }),
        "room_images" => Ok(Command::DeleteImage { id }),
        "reservations" => Ok(Command::DeleteReservation { id }),
        "host_reservations" => Ok(Command::DeleteHostReservation { id }),
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
    let filters = collect_eq_filters(select.selection.as_ref())?;

    match table.as_str() {
        "availability" => Ok(Command::SelectAvailability {
            room_id: filters.ulid("room_id")?,
            check_in: filters.timestamp("check_in")?,
            check_out: filters.timestamp("check_out")?,
        }),
        "rooms" => Ok(Command::SelectRooms(RoomFilter {
            structure: StructuralFilter {
                room_type: filters.get("room_type").map(parse_string_expr).transpose()?,
                rooms_count: filters.get("rooms_count").map(parse_u32_expr).transpose()?,
                location: filters.get("location").map(parse_string_expr).transpose()?,
            },
            check_in: filters.get("check_in").map(parse_timestamp_expr).transpose()?,
            check_out: filters.get("check_out").map(parse_timestamp_expr).transpose()?,
        })),
        "reservations" => {
            let scope = match filters.one_of(&["room_id", "guest_id", "host_id"])? {
                ("room_id", id) => ReservationScope::Room(id),
                ("guest_id", id) => ReservationScope::Guest(id),
                (_, id) => ReservationScope::Host(id),
            };
            Ok(Command::SelectReservations(scope))
        }
        "host_reservations" => {
            let scope = match filters.one_of(&["room_id", "host_id"])? {
                ("room_id", id) => HostIntervalScope::Room(id),
                (_, id) => HostIntervalScope::Host(id),
            };
            Ok(Command::SelectHostReservations(scope))
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `col = value` terms from a WHERE clause made only of ANDed equalities.
struct EqFilters<'a> {
    terms: Vec<(String, &'a Expr)>,
}

impl<'a> EqFilters<'a> {
    fn get(&self, col: &str) -> Option<&'a Expr> {
        self.terms
            .iter()
            .find(|(name, _)| name == col)
            .map(|(_, expr)| *expr)
    }

    fn required(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(col).ok_or(SqlError::MissingFilter(col))
    }

    fn ulid(&self, col: &'static str) -> Result<Ulid, SqlError> {
        parse_ulid_expr(self.required(col)?)
    }

    fn timestamp(&self, col: &'static str) -> Result<Ms, SqlError> {
        parse_timestamp_expr(self.required(col)?)
    }

    /// Exactly one of `cols` must be filtered on.
    fn one_of(&self, cols: &[&'static str]) -> Result<(&'static str, Ulid), SqlError> {
        let present: Vec<&'static str> = cols
            .iter()
            .copied()
            .filter(|c| self.get(c).is_some())
            .collect();
        match present.as_slice() {
            &[col] => Ok((col, self.ulid(col)?)),
            [] => Err(SqlError::MissingFilter(cols[0])),
            _ => Err(SqlError::Unsupported(format!(
                "filter on one of {} at a time",
                cols.join(", ")
            ))),
        }
    }
}

fn collect_eq_filters(selection: Option<&Expr>) -> Result<EqFilters<'_>, SqlError> {
    let mut terms = Vec::new();
    if let Some(expr) = selection {
        collect_eq_terms(expr, &mut terms)?;
    }
    Ok(EqFilters { terms })
}

fn collect_eq_terms<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_eq_terms(inner, out),
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_eq_terms(left, out)?;
            collect_eq_terms(right, out)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.push((col, right.as_ref()));
            Ok(())
        }
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

fn single_values_row(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [row] => Ok(row),
            [] => Err(SqlError::Parse("empty VALUES".into())),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    collect_eq_filters(selection.as_ref())?.ulid("id")
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

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected ULID, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
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
    match extract_value(expr) {
        Some(Value::Number(s, _) | Value::SingleQuotedString(s)) => s
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_u32_expr(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_f64_expr(expr: &Expr) -> Result<f64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_f64_expr(expr)?);
    }
    match extract_value(expr) {
        Some(Value::Number(s, _) | Value::SingleQuotedString(s)) => s
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad number {s:?}: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

/// Unix milliseconds, either as a number or an RFC 3339 string.
fn parse_timestamp_expr(expr: &Expr) -> Result<Ms, SqlError> {
    if let Some(Value::SingleQuotedString(s)) = extract_value(expr)
        && let Some(ms) = parse_timestamp(s)
    {
        return Ok(ms);
    }
    parse_i64_expr(expr).map_err(|_| SqlError::Parse(format!("bad timestamp: {expr}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    ReadOnlyColumn(&'static str, String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str, &'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::ReadOnlyColumn(t, c) => write!(f, "{t}.{c} cannot be updated"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing value for {c}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
