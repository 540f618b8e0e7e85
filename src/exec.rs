//!
//! Operator engine: a visitor that turns plan nodes into pull-based row
//! streams. Scans stay lazy; Sort and the joins materialize what they
//! must. Scans on the read path validate a shared lock per yielded row;
//! write operators validate exclusive locks and append their log entry
//! before the storage mutation it describes ( write-ahead ).
//!
//! Operators hold the transaction only by id and look state up through
//! the transaction manager; one that observes an aborted transaction
//! propagates the abort up the pipeline.

use crate::err::{Error, Result};
use crate::lock::{Action, LockManager};
use crate::plan::{JoinAlgo, PlanKind, PlanNode};
use crate::query::{ArithOp, Condition, JoinType, SetExpr};
use crate::record::Row;
use crate::storage::StorageEngine;
use crate::txn::TransactionManager;
use crate::value::{DataType, Value};
use crate::wal::{LogEntry, LogManager};
use std::cmp::Ordering;
use std::sync::Arc;

/// A pulled stream of rows.
pub type Rows = Box<dyn Iterator<Item = Result<Row>>>;

/// Everything an operator needs: the engine's shared subsystems plus the
/// id of the transaction this statement runs under.
#[derive(Clone)]
pub struct ExecCtx {
    pub storage: Arc<StorageEngine>,
    pub locks: Arc<LockManager>,
    pub log: Arc<LogManager>,
    pub txns: Arc<TransactionManager>,
    pub txn: u64,
    /// Shared-lock each scanned row. On for the read path; the update
    /// and delete operators turn it off for their input scans and lock
    /// the rows they actually touch exclusively instead.
    pub read_locks: bool,
}

impl ExecCtx {
    fn ensure_active(&self) -> Result<()> {
        self.txns.ensure_active(self.txn)
    }

    fn for_write_input(&self) -> ExecCtx {
        ExecCtx {
            read_locks: false,
            ..self.clone()
        }
    }
}

/// Execute a plan node, yielding its row stream.
pub fn execute(ctx: &ExecCtx, node: &PlanNode) -> Result<Rows> {
    ctx.ensure_active()?;
    match &node.kind {
        PlanKind::TableScan { table } => scan(ctx, table, Vec::new()),
        PlanKind::IndexScan { table, column } => index_scan(ctx, table, column),
        PlanKind::IndexSeek {
            table,
            column: _,
            conditions,
        } => {
            // Seek conditions are normalized by stripping this table's
            // qualifier so the storage layer sees bare column names.
            let conds: Vec<Condition> = conditions
                .iter()
                .map(|c| strip_table_prefix(c, table))
                .collect();
            scan(ctx, table, conds)
        }
        PlanKind::Filter { input, conditions } => {
            let inner = execute(ctx, input)?;
            let conds = conditions.clone();
            Ok(Box::new(inner.filter(move |item| match item {
                Ok(row) => conds.iter().all(|c| c.matches(row)),
                Err(_) => true,
            })))
        }
        PlanKind::Project { input, columns } => {
            let inner = execute(ctx, input)?;
            let cols = columns.clone();
            Ok(Box::new(inner.map(move |item| {
                let row = item?;
                let mut out = Row::new(&row.rid);
                for c in &cols {
                    match row.get(c) {
                        Some(v) => out.cols.push((c.clone(), v.clone())),
                        None => {
                            return Err(Error::SchemaMismatch(format!(
                                "projected column {} is absent",
                                c
                            )))
                        }
                    }
                }
                Ok(out)
            })))
        }
        PlanKind::Sort { input, keys } => {
            let rows = collect(execute(ctx, input)?)?;
            let sorted = sort_rows(rows, keys);
            Ok(Box::new(sorted.into_iter().map(Ok)))
        }
        PlanKind::Aggregate { input, group_by } => {
            let rows = collect(execute(ctx, input)?)?;
            Ok(Box::new(group_rows(rows, group_by).into_iter().map(Ok)))
        }
        PlanKind::Join {
            left,
            right,
            algo,
            join_type,
            on,
        } => {
            let lrows = collect(execute(ctx, left)?)?;
            let rrows = collect(execute(ctx, right)?)?;
            let out = match (algo, on) {
                (JoinAlgo::Cross, _) | (_, None) => cross_join(&lrows, &rrows),
                (JoinAlgo::NestedLoop, Some((lc, rc))) => {
                    nested_loop_join(&lrows, &rrows, lc, rc, *join_type)
                }
                (JoinAlgo::Hash, Some((lc, rc))) => hash_join(&lrows, &rrows, lc, rc, *join_type),
                (JoinAlgo::Merge, Some((lc, rc))) => merge_join(lrows, rrows, lc, rc, *join_type),
            };
            Ok(Box::new(out.into_iter().map(Ok)))
        }
        PlanKind::Insert {
            table,
            columns,
            rows,
            input,
        } => run_insert(ctx, table, columns, rows, input.as_deref()),
        PlanKind::Update {
            table,
            input,
            sets,
        } => run_update(ctx, table, input, sets),
        PlanKind::Delete { table, input } => run_delete(ctx, table, input),
    }
}

/// Drain a stream, failing on the first error.
fn collect(rows: Rows) -> Result<Vec<Row>> {
    rows.collect()
}

/// Lazy scan with cancellation checks, keys qualified `Table.Column`.
/// Each emitted row is read under a shared lock, held to the end of the
/// transaction per strict 2PL.
fn scan(ctx: &ExecCtx, table: &str, conds: Vec<Condition>) -> Result<Rows> {
    let inner = ctx.storage.read(table, &conds)?;
    let ctx = ctx.clone();
    let table = table.to_string();
    Ok(Box::new(inner.map(move |item| {
        ctx.ensure_active()?;
        let row = item?;
        if ctx.read_locks {
            ctx.locks.validate(Action::Read, &row.rid, ctx.txn)?;
        }
        Ok(row.qualified(&table))
    })))
}

/// Index scans feed ORDER BY elision, so they emit rows ordered by the
/// indexed column ascending.
fn index_scan(ctx: &ExecCtx, table: &str, column: &str) -> Result<Rows> {
    let mut rows: Vec<Row> = ctx
        .storage
        .read(table, &[])?
        .collect::<Result<Vec<Row>>>()?;
    if ctx.read_locks {
        for r in &rows {
            ctx.locks.validate(Action::Read, &r.rid, ctx.txn)?;
        }
    }
    let col = column.to_string();
    rows.sort_by(|a, b| match (a.get(&col), b.get(&col)) {
        (Some(x), Some(y)) => x.cmp_total(y),
        _ => Ordering::Equal,
    });
    let table = table.to_string();
    let ctx = ctx.clone();
    Ok(Box::new(rows.into_iter().map(move |r| {
        ctx.ensure_active()?;
        Ok(r.qualified(&table))
    })))
}

fn strip_table_prefix(c: &Condition, table: &str) -> Condition {
    use crate::query::Operand;
    let strip = |o: &Operand| match o {
        Operand::Column(col) => {
            let stripped = col
                .strip_prefix(&format!("{}.", table))
                .unwrap_or(col.as_str());
            Operand::Column(stripped.to_string())
        }
        lit => lit.clone(),
    };
    Condition::new(strip(&c.left), c.op, strip(&c.right))
}

/// Bottom-up merge sort, lexicographic over the key list with each key
/// ascending or descending independently.
fn sort_rows(rows: Vec<Row>, keys: &[(String, bool)]) -> Vec<Row> {
    if rows.len() <= 1 {
        return rows;
    }
    let mid = rows.len() / 2;
    let mut right = rows;
    let left = sort_rows(right.drain(..mid).collect(), keys);
    let right = sort_rows(right, keys);
    merge_runs(left, right, keys)
}

fn merge_runs(left: Vec<Row>, right: Vec<Row>, keys: &[(String, bool)]) -> Vec<Row> {
    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut l = left.into_iter().peekable();
    let mut r = right.into_iter().peekable();
    loop {
        match (l.peek(), r.peek()) {
            (Some(a), Some(b)) => {
                if order_by_keys(a, b, keys) != Ordering::Greater {
                    out.push(l.next().expect("peeked"));
                } else {
                    out.push(r.next().expect("peeked"));
                }
            }
            (Some(_), None) => out.push(l.next().expect("peeked")),
            (None, Some(_)) => out.push(r.next().expect("peeked")),
            (None, None) => return out,
        }
    }
}

fn order_by_keys(a: &Row, b: &Row, keys: &[(String, bool)]) -> Ordering {
    for (col, asc) in keys {
        let ord = match (a.get(col), b.get(col)) {
            (Some(x), Some(y)) => x.cmp_total(y),
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
        };
        let ord = if *asc { ord } else { ord.reverse() };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// GROUP BY without aggregate functions: one representative row per
/// distinct grouping key, first occurrence order.
fn group_rows(rows: Vec<Row>, group_by: &[String]) -> Vec<Row> {
    let mut seen = rustc_hash::FxHashSet::default();
    let mut out = Vec::new();
    for row in rows {
        let key: Vec<String> = group_by
            .iter()
            .map(|c| row.get(c).map(|v| v.key()).unwrap_or_default())
            .collect();
        if seen.insert(key) {
            out.push(row);
        }
    }
    out
}

/// Merge two rows; the result's identifier concatenates both with `;`.
fn merge_rows(l: &Row, r: &Row) -> Row {
    let mut out = Row::new(&format!("{};{}", l.rid, r.rid));
    out.cols.extend(l.cols.iter().cloned());
    out.cols.extend(r.cols.iter().cloned());
    out
}

/// Outer row plus null-valued columns for the missing side.
fn pad_row(outer: &Row, missing_cols: &[String], outer_first: bool) -> Row {
    let mut out = Row::new(&outer.rid);
    if outer_first {
        out.cols.extend(outer.cols.iter().cloned());
    }
    for c in missing_cols {
        out.cols.push((c.clone(), Value::Null));
    }
    if !outer_first {
        out.cols.extend(outer.cols.iter().cloned());
    }
    out
}

fn column_names(rows: &[Row]) -> Vec<String> {
    rows.first()
        .map(|r| r.cols.iter().map(|(k, _)| k.clone()).collect())
        .unwrap_or_default()
}

fn join_key(row: &Row, col: &str) -> Option<String> {
    match row.get(col) {
        Some(Value::Null) | None => None,
        Some(v) => Some(v.key()),
    }
}

/// Cartesian product.
fn cross_join(left: &[Row], right: &[Row]) -> Vec<Row> {
    let mut out = Vec::with_capacity(left.len() * right.len());
    for l in left {
        for r in right {
            out.push(merge_rows(l, r));
        }
    }
    out
}

/// Nested loop join. RIGHT joins swap the loops and re-emit in the
/// original column orientation; FULL keeps a remainder of unmatched
/// right rows emitted after the main loop.
fn nested_loop_join(
    left: &[Row],
    right: &[Row],
    lc: &str,
    rc: &str,
    jt: JoinType,
) -> Vec<Row> {
    if jt == JoinType::Right {
        // Swapped run with the left loop outer over the right input.
        let mut out = Vec::new();
        let left_cols = column_names(left);
        for r in right {
            let rk = join_key(r, rc);
            let mut matched = false;
            for l in left {
                if rk.is_some() && join_key(l, lc) == rk {
                    out.push(merge_rows(l, r));
                    matched = true;
                }
            }
            if !matched {
                out.push(pad_row(r, &left_cols, false));
            }
        }
        return out;
    }
    let right_cols = column_names(right);
    let left_cols = column_names(left);
    let mut right_matched = vec![false; right.len()];
    let mut out = Vec::new();
    for l in left {
        let lk = join_key(l, lc);
        let mut matched = false;
        for (j, r) in right.iter().enumerate() {
            if lk.is_some() && join_key(r, rc) == lk {
                out.push(merge_rows(l, r));
                matched = true;
                right_matched[j] = true;
            }
        }
        if !matched && matches!(jt, JoinType::Left | JoinType::Full) {
            out.push(pad_row(l, &right_cols, true));
        }
    }
    if jt == JoinType::Full {
        for (j, r) in right.iter().enumerate() {
            if !right_matched[j] {
                out.push(pad_row(r, &left_cols, false));
            }
        }
    }
    out
}

/// Hash join: build a multimap over the left, probe with the right.
fn hash_join(left: &[Row], right: &[Row], lc: &str, rc: &str, jt: JoinType) -> Vec<Row> {
    let mut buckets: rustc_hash::FxHashMap<String, Vec<usize>> = rustc_hash::FxHashMap::default();
    for (i, l) in left.iter().enumerate() {
        if let Some(k) = join_key(l, lc) {
            buckets.entry(k).or_default().push(i);
        }
    }
    let left_cols = column_names(left);
    let right_cols = column_names(right);
    let mut left_matched = vec![false; left.len()];
    let mut out = Vec::new();
    for r in right {
        let hits = join_key(r, rc).and_then(|k| buckets.get(&k).cloned());
        match hits {
            Some(idx) if !idx.is_empty() => {
                for i in idx {
                    out.push(merge_rows(&left[i], r));
                    left_matched[i] = true;
                }
            }
            _ => {
                if matches!(jt, JoinType::Right | JoinType::Full) {
                    out.push(pad_row(r, &left_cols, false));
                }
            }
        }
    }
    if matches!(jt, JoinType::Left | JoinType::Full) {
        for (i, l) in left.iter().enumerate() {
            if !left_matched[i] {
                out.push(pad_row(l, &right_cols, true));
            }
        }
    }
    out
}

/// Sort-merge join: order both inputs by their join key ascending, then
/// walk two cursors cross-emitting equal runs.
fn merge_join(left: Vec<Row>, right: Vec<Row>, lc: &str, rc: &str, jt: JoinType) -> Vec<Row> {
    let left = sort_rows(left, &[(lc.to_string(), true)]);
    let right = sort_rows(right, &[(rc.to_string(), true)]);
    let left_cols = column_names(&left);
    let right_cols = column_names(&right);
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        let lk = left[i].get(lc).cloned().unwrap_or(Value::Null);
        let rk = right[j].get(rc).cloned().unwrap_or(Value::Null);
        match lk.cmp_total(&rk) {
            Ordering::Less => {
                if matches!(jt, JoinType::Left | JoinType::Full) {
                    out.push(pad_row(&left[i], &right_cols, true));
                }
                i += 1;
            }
            Ordering::Greater => {
                if matches!(jt, JoinType::Right | JoinType::Full) {
                    out.push(pad_row(&right[j], &left_cols, false));
                }
                j += 1;
            }
            Ordering::Equal => {
                let i2 = run_end(&left, i, lc);
                let j2 = run_end(&right, j, rc);
                for l in &left[i..i2] {
                    for r in &right[j..j2] {
                        out.push(merge_rows(l, r));
                    }
                }
                i = i2;
                j = j2;
            }
        }
    }
    if matches!(jt, JoinType::Left | JoinType::Full) {
        for l in &left[i..] {
            out.push(pad_row(l, &right_cols, true));
        }
    }
    if matches!(jt, JoinType::Right | JoinType::Full) {
        for r in &right[j..] {
            out.push(pad_row(r, &left_cols, false));
        }
    }
    out
}

fn run_end(rows: &[Row], start: usize, col: &str) -> usize {
    let key = rows[start].get(col).cloned().unwrap_or(Value::Null);
    let mut end = start + 1;
    while end < rows.len() {
        let k = rows[end].get(col).cloned().unwrap_or(Value::Null);
        if k.cmp_total(&key) != Ordering::Equal {
            break;
        }
        end += 1;
    }
    end
}

/// INSERT: build the typed row via the schema ( allocating its row id ),
/// validate the write lock, append the INSERT entry with the after-image,
/// then place the row in storage and yield it. The entry reaches the
/// buffer before the mutation, keeping the write-ahead order.
fn run_insert(
    ctx: &ExecCtx,
    table: &str,
    columns: &[String],
    literal_rows: &[Vec<Value>],
    input: Option<&PlanNode>,
) -> Result<Rows> {
    let schema = ctx.storage.schema(table)?;
    let target: Vec<String> = if columns.is_empty() {
        schema.columns.iter().map(|c| c.name.clone()).collect()
    } else {
        columns.to_vec()
    };
    let mut incoming: Vec<Vec<Value>> = literal_rows.to_vec();
    if let Some(src) = input {
        for row in collect(execute(ctx, src)?)? {
            incoming.push(row.cols.iter().map(|(_, v)| v.clone()).collect());
        }
    }
    let mut out = Vec::with_capacity(incoming.len());
    for vals in incoming {
        ctx.ensure_active()?;
        if vals.len() != target.len() {
            return Err(Error::SchemaMismatch(format!(
                "{} values for {} columns in {}",
                vals.len(),
                target.len(),
                table
            )));
        }
        let values: Vec<(String, Value)> =
            target.iter().cloned().zip(vals.into_iter()).collect();
        let row = ctx.storage.build_row(table, &values)?;
        ctx.locks.validate(Action::Write, &row.rid, ctx.txn)?;
        let entry = LogEntry::insert(ctx.txn, table, row.clone());
        ctx.log.append(entry.clone());
        ctx.txns.record_write(ctx.txn, entry)?;
        ctx.storage.insert_row(table, &row)?;
        out.push(row);
    }
    Ok(Box::new(out.into_iter().map(Ok)))
}

/// UPDATE over a scan: per component row id, validate the exclusive
/// lock, re-read the row under it, compute the new values, append the
/// UPDATE entry with both images, then mutate storage and yield.
fn run_update(
    ctx: &ExecCtx,
    table: &str,
    input: &PlanNode,
    sets: &[(String, SetExpr)],
) -> Result<Rows> {
    let schema = ctx.storage.schema(table)?;
    let rows = collect(execute(&ctx.for_write_input(), input)?)?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        ctx.ensure_active()?;
        let rid = lock_components(ctx, &row, table)?;
        let before = ctx.storage.get_row(table, &rid)?;
        let mut values = Vec::with_capacity(sets.len());
        for (col, expr) in sets {
            let c = schema.col_required(col)?;
            values.push((c.name.clone(), eval_set(expr, &before, c.typ)?));
        }
        let mut after = before.clone();
        for (name, val) in &values {
            after.set(name, val.clone());
        }
        let entry = LogEntry::update(ctx.txn, table, before, after.clone());
        ctx.log.append(entry.clone());
        ctx.txns.record_write(ctx.txn, entry)?;
        ctx.storage.update_row(table, &rid, &values)?;
        out.push(after);
    }
    Ok(Box::new(out.into_iter().map(Ok)))
}

/// DELETE over a scan: symmetric to update with the before-image only.
fn run_delete(ctx: &ExecCtx, table: &str, input: &PlanNode) -> Result<Rows> {
    let rows = collect(execute(&ctx.for_write_input(), input)?)?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        ctx.ensure_active()?;
        let rid = lock_components(ctx, &row, table)?;
        let before = ctx.storage.get_row(table, &rid)?;
        let entry = LogEntry::delete(ctx.txn, table, before.clone());
        ctx.log.append(entry.clone());
        ctx.txns.record_write(ctx.txn, entry)?;
        ctx.storage.delete_row(table, &rid)?;
        out.push(before);
    }
    Ok(Box::new(out.into_iter().map(Ok)))
}

/// Validate an exclusive lock on every component of a ( possibly
/// composite ) row id; return the component belonging to `table`.
fn lock_components(ctx: &ExecCtx, row: &Row, table: &str) -> Result<String> {
    let mut target = None;
    for part in row.rid.split(';') {
        if part.is_empty() {
            continue;
        }
        ctx.locks.validate(Action::Write, part, ctx.txn)?;
        if part.starts_with(&format!("{}-", table)) {
            target = Some(part.to_string());
        }
    }
    Ok(target.unwrap_or_else(|| row.rid.clone()))
}

/// Evaluate the right side of `SET col =`, coercing to the column's
/// declared type when possible.
fn eval_set(expr: &SetExpr, row: &Row, typ: DataType) -> Result<Value> {
    match expr {
        SetExpr::Literal(v) => v.coerce(typ),
        SetExpr::Column(c) => match row.get(c) {
            Some(v) => v.coerce(typ),
            None => Err(Error::SchemaMismatch(format!("no column {} in row", c))),
        },
        SetExpr::Arith(c, op, operand) => {
            let base = row
                .get(c)
                .cloned()
                .ok_or_else(|| Error::SchemaMismatch(format!("no column {} in row", c)))?;
            arith(&base, *op, operand)?.coerce(typ)
        }
    }
}

fn arith(a: &Value, op: ArithOp, b: &Value) -> Result<Value> {
    let (x, float) = match a {
        Value::Int(x) => (*x as f64, false),
        Value::Float(x) => (*x as f64, true),
        other => {
            return Err(Error::SchemaMismatch(format!(
                "arithmetic on non-numeric value {}",
                other
            )))
        }
    };
    let y = match b {
        Value::Int(y) => *y as f64,
        Value::Float(y) => *y as f64,
        other => {
            return Err(Error::SchemaMismatch(format!(
                "arithmetic on non-numeric value {}",
                other
            )))
        }
    };
    let float = float || matches!(b, Value::Float(_));
    let r = match op {
        ArithOp::Add => x + y,
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Div => {
            if y == 0.0 {
                return Err(Error::SchemaMismatch("division by zero".to_string()));
            }
            x / y
        }
    };
    Ok(if float {
        Value::Float(r as f32)
    } else {
        Value::Int(r as i32)
    })
}

/// Helper used by the engine façade: is this plan a write?
pub fn is_dml(node: &PlanNode) -> bool {
    matches!(
        node.kind,
        PlanKind::Insert { .. } | PlanKind::Update { .. } | PlanKind::Delete { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimize::Optimizer;
    use crate::parse::parse;
    use crate::record::{Column, Schema};
    use crate::wal::LogOp;
    use tempfile::TempDir;

    fn ctx() -> (TempDir, ExecCtx) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(StorageEngine::new(dir.path()).unwrap());
        let log = Arc::new(LogManager::open(&dir.path().join("wal.log"), 10).unwrap());
        let locks = Arc::new(LockManager::new());
        let txns = Arc::new(TransactionManager::new());
        let txn = txns.begin(&log);
        (
            dir,
            ExecCtx {
                storage,
                locks,
                log,
                txns,
                txn,
                read_locks: true,
            },
        )
    }

    fn seed(ctx: &ExecCtx) {
        ctx.storage
            .create_table(&Schema::new(
                "employees",
                vec![
                    Column::new("id", DataType::Int),
                    Column::new("name", DataType::Str(16)),
                    Column::new("dept", DataType::Int),
                ],
            ))
            .unwrap();
        ctx.storage
            .create_table(&Schema::new(
                "departments",
                vec![
                    Column::new("id", DataType::Int),
                    Column::new("name", DataType::Str(16)),
                ],
            ))
            .unwrap();
        for (id, name, dept) in [(1, "ann", 10), (2, "bob", 20), (3, "cal", 10), (4, "dee", 99)] {
            ctx.storage
                .insert(
                    "employees",
                    &[
                        ("id".to_string(), Value::Int(id)),
                        ("name".to_string(), Value::Str(name.to_string())),
                        ("dept".to_string(), Value::Int(dept)),
                    ],
                )
                .unwrap();
        }
        for (id, name) in [(10, "eng"), (20, "ops"), (30, "hr")] {
            ctx.storage
                .insert(
                    "departments",
                    &[
                        ("id".to_string(), Value::Int(id)),
                        ("name".to_string(), Value::Str(name.to_string())),
                    ],
                )
                .unwrap();
        }
    }

    fn run(ctx: &ExecCtx, sql: &str) -> Vec<Row> {
        let stmt = parse(sql).unwrap();
        let plan = Optimizer::new(&ctx.storage).optimize(&stmt).unwrap();
        collect(execute(ctx, &plan.root).unwrap()).unwrap()
    }

    #[test]
    fn scan_qualifies_columns() {
        let (_d, ctx) = ctx();
        seed(&ctx);
        let rows = run(&ctx, "SELECT * FROM departments");
        assert_eq!(rows.len(), 3);
        assert!(rows[0].cols.iter().any(|(k, _)| k == "departments.id"));
    }

    #[test]
    fn filter_and_project() {
        let (_d, ctx) = ctx();
        seed(&ctx);
        let rows = run(&ctx, "SELECT name FROM employees WHERE dept = 10");
        assert_eq!(rows.len(), 2);
        for r in &rows {
            assert_eq!(r.cols.len(), 1);
            assert_eq!(r.cols[0].0, "name");
        }
    }

    #[test]
    fn project_missing_column_errors() {
        let (_d, ctx) = ctx();
        seed(&ctx);
        let stmt = parse("SELECT ghost FROM employees").unwrap();
        let plan = Optimizer::new(&ctx.storage).optimize(&stmt).unwrap();
        let got = collect(execute(&ctx, &plan.root).unwrap());
        assert!(matches!(got, Err(Error::SchemaMismatch(_))));
    }

    #[test]
    fn sort_ascending_and_descending() {
        let (_d, ctx) = ctx();
        seed(&ctx);
        let rows = run(&ctx, "SELECT name FROM employees ORDER BY name DESC");
        let names: Vec<&Value> = rows.iter().map(|r| r.get("name").unwrap()).collect();
        assert_eq!(
            names,
            vec![
                &Value::Str("dee".into()),
                &Value::Str("cal".into()),
                &Value::Str("bob".into()),
                &Value::Str("ann".into())
            ]
        );
    }

    #[test]
    fn group_by_dedups() {
        let (_d, ctx) = ctx();
        seed(&ctx);
        let rows = run(&ctx, "SELECT dept FROM employees GROUP BY dept");
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn inner_join_matches() {
        let (_d, ctx) = ctx();
        seed(&ctx);
        let rows = run(
            &ctx,
            "SELECT employees.name, departments.name FROM employees \
             JOIN departments ON employees.dept = departments.id",
        );
        assert_eq!(rows.len(), 3); // dee (dept 99) drops out
        assert!(rows.iter().all(|r| r.rid.contains(';')));
    }

    #[test]
    fn left_join_pads_with_null() {
        let (_d, ctx) = ctx();
        seed(&ctx);
        let rows = run(
            &ctx,
            "SELECT * FROM employees LEFT JOIN departments ON employees.dept = departments.id",
        );
        assert_eq!(rows.len(), 4);
        let dee = rows
            .iter()
            .find(|r| r.get("employees.name") == Some(&Value::Str("dee".into())))
            .unwrap();
        assert_eq!(dee.get("departments.name"), Some(&Value::Null));
    }

    #[test]
    fn full_join_keeps_both_remainders() {
        let (_d, ctx) = ctx();
        seed(&ctx);
        let rows = run(
            &ctx,
            "SELECT * FROM employees FULL JOIN departments ON employees.dept = departments.id",
        );
        // 3 matches + dee + hr.
        assert_eq!(rows.len(), 5);
        let hr = rows
            .iter()
            .find(|r| r.get("departments.name") == Some(&Value::Str("hr".into())))
            .unwrap();
        assert_eq!(hr.get("employees.name"), Some(&Value::Null));
    }

    #[test]
    fn join_algorithms_agree() {
        let (_d, ctx) = ctx();
        seed(&ctx);
        let l = collect(scan(&ctx, "employees", Vec::new()).unwrap()).unwrap();
        let r = collect(scan(&ctx, "departments", Vec::new()).unwrap()).unwrap();
        for jt in [JoinType::Inner, JoinType::Left, JoinType::Right, JoinType::Full] {
            let nl = nested_loop_join(&l, &r, "employees.dept", "departments.id", jt);
            let hj = hash_join(&l, &r, "employees.dept", "departments.id", jt);
            let mj = merge_join(
                l.clone(),
                r.clone(),
                "employees.dept",
                "departments.id",
                jt,
            );
            let key = |rows: &[Row]| {
                let mut k: Vec<String> = rows.iter().map(|r| r.rid.clone()).collect();
                k.sort();
                k
            };
            assert_eq!(key(&nl), key(&hj), "{:?}", jt);
            assert_eq!(key(&nl), key(&mj), "{:?}", jt);
        }
    }

    #[test]
    fn cross_join_concatenates_rids() {
        let (_d, ctx) = ctx();
        seed(&ctx);
        let rows = run(&ctx, "SELECT * FROM employees CROSS JOIN departments");
        assert_eq!(rows.len(), 12);
        assert!(rows[0].rid.contains(';'));
    }

    #[test]
    fn insert_locks_and_logs() {
        let (_d, ctx) = ctx();
        seed(&ctx);
        let rows = run(&ctx, "INSERT INTO departments VALUES (40, 'lab')");
        assert_eq!(rows.len(), 1);
        let rid = &rows[0].rid;
        assert!(ctx.locks.locks_held(ctx.txn).contains(rid));
        // Log entry is buffered until commit forces it.
        ctx.txns.commit(ctx.txn, &ctx.log, &ctx.locks).unwrap();
        let entries = ctx.log.read_entries().unwrap();
        let ins = entries.iter().find(|e| e.op == LogOp::Insert).unwrap();
        assert_eq!(&ins.rid, rid);
        assert!(ins.after.is_some() && ins.before.is_none());
    }

    #[test]
    fn update_applies_arithmetic_and_logs_images() {
        let (_d, ctx) = ctx();
        seed(&ctx);
        let rows = run(&ctx, "UPDATE employees SET dept = dept + 1 WHERE id = 1");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("dept"), Some(&Value::Int(11)));
        let after = run(&ctx, "SELECT dept FROM employees WHERE id = 1");
        assert_eq!(after[0].get("dept"), Some(&Value::Int(11)));
        ctx.txns.commit(ctx.txn, &ctx.log, &ctx.locks).unwrap();
        let entries = ctx.log.read_entries().unwrap();
        let upd = entries.iter().find(|e| e.op == LogOp::Update).unwrap();
        assert_eq!(upd.before.as_ref().unwrap().get("dept"), Some(&Value::Int(10)));
        assert_eq!(upd.after.as_ref().unwrap().get("dept"), Some(&Value::Int(11)));
    }

    #[test]
    fn delete_yields_before_images() {
        let (_d, ctx) = ctx();
        seed(&ctx);
        let rows = run(&ctx, "DELETE FROM employees WHERE dept = 10");
        assert_eq!(rows.len(), 2);
        let left = run(&ctx, "SELECT * FROM employees");
        assert_eq!(left.len(), 2);
    }

    #[test]
    fn insert_select_copies_rows() {
        let (_d, ctx) = ctx();
        seed(&ctx);
        ctx.storage
            .create_table(&Schema::new(
                "dept_copy",
                vec![
                    Column::new("id", DataType::Int),
                    Column::new("name", DataType::Str(16)),
                ],
            ))
            .unwrap();
        let rows = run(&ctx, "INSERT INTO dept_copy SELECT * FROM departments");
        assert_eq!(rows.len(), 3);
        let copied = run(&ctx, "SELECT * FROM dept_copy");
        assert_eq!(copied.len(), 3);
    }

    #[test]
    fn select_takes_shared_locks() {
        let (_d, ctx) = ctx();
        seed(&ctx);
        run(&ctx, "SELECT * FROM departments");
        let held = ctx.locks.locks_held(ctx.txn);
        assert_eq!(held.len(), 3);
        assert!(held.iter().all(|o| o.starts_with("departments-")));
    }

    #[test]
    fn dml_scan_locks_only_touched_rows() {
        let (_d, ctx) = ctx();
        seed(&ctx);
        run(&ctx, "UPDATE employees SET dept = 11 WHERE id = 1");
        assert_eq!(ctx.locks.locks_held(ctx.txn), vec!["employees-1".to_string()]);
    }

    #[test]
    fn aborted_transaction_propagates() {
        let (_d, ctx) = ctx();
        seed(&ctx);
        let stmt = parse("SELECT * FROM employees").unwrap();
        let plan = Optimizer::new(&ctx.storage).optimize(&stmt).unwrap();
        let iter = execute(&ctx, &plan.root).unwrap();
        ctx.txns
            .abort(ctx.txn, &ctx.log, &ctx.locks, &ctx.storage)
            .unwrap();
        let got: Result<Vec<Row>> = iter.collect();
        assert!(matches!(got, Err(Error::Aborted(_))));
    }
}
