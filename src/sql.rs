use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

use crate::limits::MAX_BATCH_SIZE;
use crate::model::*;

#[derive(Debug, Clone, PartialEq)]
pub struct NewSlot {
    pub id: Ulid,
    pub service_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub capacity: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BookingFilter {
    All,
    Id(Ulid),
    Slot(Ulid),
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertSlots {
        slots: Vec<NewSlot>,
    },
    UpdateSlotCapacity {
        id: Ulid,
        capacity: u32,
    },
    DeleteSlot {
        id: Ulid,
    },
    InsertLock {
        id: Ulid,
        slot_id: Ulid,
        session_id: String,
        units: u32,
        ttl_ms: Option<Ms>,
    },
    ExtendLock {
        id: Ulid,
        ttl_ms: Option<Ms>,
    },
    DeleteLock {
        id: Ulid,
    },
    InsertPackageUsage {
        subscription_id: Ulid,
        service_id: Ulid,
        quantity: u32,
    },
    InsertBooking {
        id: Ulid,
        slot_id: Ulid,
        visitor_count: u32,
        status: BookingStatus,
        subscription_id: Option<Ulid>,
        lock_id: Option<Ulid>,
        payment_status: PaymentStatus,
    },
    UpdateBookingStatus {
        id: Ulid,
        status: BookingStatus,
        expected_version: Option<u64>,
    },
    UpdatePaymentStatus {
        id: Ulid,
        payment_status: PaymentStatus,
        expected_version: Option<u64>,
    },
    SelectSlots {
        id: Option<Ulid>,
    },
    SelectLocks {
        slot_id: Ulid,
    },
    SelectBookings {
        filter: BookingFilter,
    },
    SelectPackageUsage {
        subscription_id: Ulid,
    },
}

/// Column order used when an INSERT names no columns.
const SLOT_COLUMNS: &[&str] = &["id", "service_id", "start", "end", "capacity"];
const LOCK_COLUMNS: &[&str] = &["id", "slot_id", "session_id", "units", "ttl_ms"];
const USAGE_COLUMNS: &[&str] = &["subscription_id", "service_id", "quantity"];
const BOOKING_COLUMNS: &[&str] = &[
    "id",
    "slot_id",
    "visitor_count",
    "status",
    "subscription_id",
    "lock_id",
    "payment_status",
];

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

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row keyed by column name.
struct Row<'a> {
    columns: Vec<String>,
    values: &'a [Expr],
}

impl<'a> Row<'a> {
    fn new(columns: &[String], canonical: &[&str], values: &'a [Expr]) -> Result<Self, SqlError> {
        let columns: Vec<String> = if columns.is_empty() {
            canonical.iter().take(values.len()).map(|c| c.to_string()).collect()
        } else {
            columns.to_vec()
        };
        if columns.len() != values.len() {
            return Err(SqlError::Parse(format!(
                "{} columns but {} values",
                columns.len(),
                values.len()
            )));
        }
        if let Some(unknown) = columns.iter().find(|c| !canonical.contains(&c.as_str())) {
            return Err(SqlError::UnknownColumn(unknown.clone()));
        }
        Ok(Self { columns, values })
    }

    fn get(&self, name: &str) -> Option<&'a Expr> {
        self.columns
            .iter()
            .position(|c| c == name)
            .map(|i| &self.values[i])
            .filter(|e| !is_null(e))
    }

    fn require(&self, name: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(name).ok_or(SqlError::MissingColumn(name))
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let columns: Vec<String> = insert
        .columns
        .iter()
        .map(|c| c.value.to_lowercase())
        .collect();
    let rows = extract_insert_rows(insert)?;

    match table.as_str() {
        "slots" => {
            if rows.len() > MAX_BATCH_SIZE {
                return Err(SqlError::BatchTooLarge(rows.len()));
            }
            let mut slots = Vec::with_capacity(rows.len());
            for (i, values) in rows.iter().enumerate() {
                let row = Row::new(&columns, SLOT_COLUMNS, values)?;
                let slot = parse_slot_row(&row).map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?;
                slots.push(slot);
            }
            Ok(Command::InsertSlots { slots })
        }
        "locks" => {
            let row = Row::new(&columns, LOCK_COLUMNS, single_row(&rows)?)?;
            Ok(Command::InsertLock {
                id: parse_ulid_expr(row.require("id")?)?,
                slot_id: parse_ulid_expr(row.require("slot_id")?)?,
                session_id: parse_string_expr(row.require("session_id")?)?,
                units: row.get("units").map(parse_u32).transpose()?.unwrap_or(1),
                ttl_ms: row.get("ttl_ms").map(parse_i64_expr).transpose()?,
            })
        }
        "package_usage" => {
            let row = Row::new(&columns, USAGE_COLUMNS, single_row(&rows)?)?;
            Ok(Command::InsertPackageUsage {
                subscription_id: parse_ulid_expr(row.require("subscription_id")?)?,
                service_id: parse_ulid_expr(row.require("service_id")?)?,
                quantity: parse_u32(row.require("quantity")?)?,
            })
        }
        "bookings" => {
            let row = Row::new(&columns, BOOKING_COLUMNS, single_row(&rows)?)?;
            Ok(Command::InsertBooking {
                id: parse_ulid_expr(row.require("id")?)?,
                slot_id: parse_ulid_expr(row.require("slot_id")?)?,
                visitor_count: parse_u32(row.require("visitor_count")?)?,
                status: row
                    .get("status")
                    .map(parse_status)
                    .transpose()?
                    .unwrap_or(BookingStatus::Confirmed),
                subscription_id: row.get("subscription_id").map(parse_ulid_expr).transpose()?,
                lock_id: row.get("lock_id").map(parse_ulid_expr).transpose()?,
                payment_status: row
                    .get("payment_status")
                    .map(parse_payment_status)
                    .transpose()?
                    .unwrap_or(PaymentStatus::Unpaid),
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_slot_row(row: &Row<'_>) -> Result<NewSlot, SqlError> {
    Ok(NewSlot {
        id: parse_ulid_expr(row.require("id")?)?,
        service_id: parse_ulid_expr(row.require("service_id")?)?,
        start: parse_i64_expr(row.require("start")?)?,
        end: parse_i64_expr(row.require("end")?)?,
        capacity: parse_u32(row.require("capacity")?)?,
    })
}

fn single_row(rows: &[Vec<Expr>]) -> Result<&[Expr], SqlError> {
    match rows {
        [row] => Ok(row),
        _ => Err(SqlError::Unsupported("multi-row INSERT on this table".into())),
    }
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let [assignment] = assignments else {
        return Err(SqlError::Unsupported("UPDATE must set exactly one column".into()));
    };
    let column = match &assignment.target {
        AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))?
        }
        AssignmentTarget::Tuple(_) => {
            return Err(SqlError::Unsupported("tuple assignment".into()));
        }
    };
    let value = &assignment.value;

    let filters = where_filters(selection)?;
    let id = filter_ulid(&filters, "id")?.ok_or(SqlError::MissingFilter("id"))?;
    let expected_version = filter_i64(&filters, "version")?
        .map(|v| u64::try_from(v).map_err(|_| SqlError::Parse(format!("bad version: {v}"))))
        .transpose()?;

    match (table.as_str(), column.as_str()) {
        ("slots", "capacity") => Ok(Command::UpdateSlotCapacity {
            id,
            capacity: parse_u32(value)?,
        }),
        ("locks", "ttl_ms") => Ok(Command::ExtendLock {
            id,
            ttl_ms: if is_null(value) { None } else { Some(parse_i64_expr(value)?) },
        }),
        ("bookings", "status") => Ok(Command::UpdateBookingStatus {
            id,
            status: parse_status(value)?,
            expected_version,
        }),
        ("bookings", "payment_status") => Ok(Command::UpdatePaymentStatus {
            id,
            payment_status: parse_payment_status(value)?,
            expected_version,
        }),
        ("slots" | "locks" | "bookings", _) => Err(SqlError::UnknownColumn(column)),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = where_filters(&delete.selection)?;
    let id = filter_ulid(&filters, "id")?.ok_or(SqlError::MissingFilter("id"))?;

    match table.as_str() {
        "slots" => Ok(Command::DeleteSlot { id }),
        "locks" => Ok(Command::DeleteLock { id }),
        "bookings" => Err(SqlError::Unsupported(
            "bookings are never deleted; set status = 'cancelled'".into(),
        )),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filters = where_filters(&select.selection)?;

    match table.as_str() {
        "slots" => Ok(Command::SelectSlots {
            id: filter_ulid(&filters, "id")?,
        }),
        "locks" => Ok(Command::SelectLocks {
            slot_id: filter_ulid(&filters, "slot_id")?.ok_or(SqlError::MissingFilter("slot_id"))?,
        }),
        "bookings" => {
            let filter = match (filter_ulid(&filters, "id")?, filter_ulid(&filters, "slot_id")?) {
                (Some(id), _) => BookingFilter::Id(id),
                (None, Some(slot_id)) => BookingFilter::Slot(slot_id),
                (None, None) => BookingFilter::All,
            };
            Ok(Command::SelectBookings { filter })
        }
        "package_usage" => Ok(Command::SelectPackageUsage {
            subscription_id: filter_ulid(&filters, "subscription_id")?
                .ok_or(SqlError::MissingFilter("subscription_id"))?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Helpers ───────────────────────────────────────────────────

/// `col = value` terms of a WHERE clause joined by AND.
fn where_filters(selection: &Option<Expr>) -> Result<Vec<(String, &Expr)>, SqlError> {
    let mut out = Vec::new();
    if let Some(expr) = selection {
        collect_eq_filters(expr, &mut out)?;
    }
    Ok(out)
}

fn collect_eq_filters<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_eq_filters(left, out)?;
                collect_eq_filters(right, out)
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                out.push((col, right.as_ref()));
                Ok(())
            }
            _ => Err(SqlError::Unsupported(format!("operator {op} in WHERE"))),
        },
        _ => Err(SqlError::Unsupported(format!("WHERE {expr}"))),
    }
}

fn filter_ulid(filters: &[(String, &Expr)], col: &str) -> Result<Option<Ulid>, SqlError> {
    filters
        .iter()
        .find(|(c, _)| c == col)
        .map(|(_, e)| parse_ulid_expr(e))
        .transpose()
}

fn filter_i64(filters: &[(String, &Expr)], col: &str) -> Result<Option<i64>, SqlError> {
    filters
        .iter()
        .find(|(c, _)| c == col)
        .map(|(_, e)| parse_i64_expr(e))
        .transpose()
}

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
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
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
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
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

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_status(expr: &Expr) -> Result<BookingStatus, SqlError> {
    parse_string_expr(expr)?.parse().map_err(SqlError::Parse)
}

fn parse_payment_status(expr: &Expr) -> Result<PaymentStatus, SqlError> {
    parse_string_expr(expr)?.parse().map_err(SqlError::Parse)
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
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("missing column: {0}")]
    MissingColumn(&'static str),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error("batch of {0} rows exceeds the limit of {MAX_BATCH_SIZE}")]
    BatchTooLarge(usize),
}
