//!
//! Logical query model: what the parser produces and the optimizer
//! consumes. The WHERE clause arrives as a raw string and is decomposed
//! into [`Condition`] conjuncts by the optimizer.

use crate::record::Row;
use crate::value::{DataType, Value};
use std::cmp::Ordering;
use std::fmt;

/// Comparison operator of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    /// Apply to an ordering between left and right operands.
    pub fn eval(self, ord: Ordering) -> bool {
        match self {
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::Ne => ord != Ordering::Equal,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Le => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Ge => ord != Ordering::Less,
        }
    }

    /// Mirror image, for normalizing `value op column` into `column op value`.
    pub fn flip(self) -> CmpOp {
        match self {
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Le => CmpOp::Ge,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Ge => CmpOp::Le,
            other => other,
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "<>",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        };
        write!(f, "{}", s)
    }
}

/// One side of a condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Column(String),
    Literal(Value),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operand::Column(c) => write!(f, "{}", c),
            Operand::Literal(v) => write!(f, "{}", v),
        }
    }
}

/// A single conjunct of a WHERE clause. Supported shapes:
/// column ~ value, value ~ column, column ~ column.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub left: Operand,
    pub op: CmpOp,
    pub right: Operand,
}

impl Condition {
    pub fn new(left: Operand, op: CmpOp, right: Operand) -> Condition {
        Condition { left, op, right }
    }

    /// Normalize to ( column, op, literal ) when exactly one side is a
    /// column, flipping the operator as needed.
    pub fn as_column_literal(&self) -> Option<(&str, CmpOp, &Value)> {
        match (&self.left, &self.right) {
            (Operand::Column(c), Operand::Literal(v)) => Some((c, self.op, v)),
            (Operand::Literal(v), Operand::Column(c)) => Some((c, self.op.flip(), v)),
            _ => None,
        }
    }

    /// Column ~ column conditions ( join candidates ).
    pub fn as_column_pair(&self) -> Option<(&str, CmpOp, &str)> {
        match (&self.left, &self.right) {
            (Operand::Column(a), Operand::Column(b)) => Some((a, self.op, b)),
            _ => None,
        }
    }

    /// Evaluate against a row. Unknown columns and incomparable values
    /// make the condition false.
    pub fn matches(&self, row: &Row) -> bool {
        let left = match self.resolve(&self.left, row) {
            Some(v) => v,
            None => return false,
        };
        let right = match self.resolve(&self.right, row) {
            Some(v) => v,
            None => return false,
        };
        // The literal side adopts the column side's runtime type, so
        // WHERE id = '5' works against an int column.
        let (left, right) = match (&self.left, &self.right) {
            (Operand::Column(_), Operand::Literal(_)) => {
                let r = coerce_like(&right, &left);
                (left, r)
            }
            (Operand::Literal(_), Operand::Column(_)) => {
                let l = coerce_like(&left, &right);
                (l, right)
            }
            _ => (left, right),
        };
        match left.compare(&right) {
            Some(ord) => self.op.eval(ord),
            None => false,
        }
    }

    fn resolve(&self, side: &Operand, row: &Row) -> Option<Value> {
        match side {
            Operand::Column(c) => row.get(c).cloned(),
            Operand::Literal(v) => Some(v.clone()),
        }
    }
}

/// Convert `v` to the runtime type of `like` when possible.
pub fn coerce_like(v: &Value, like: &Value) -> Value {
    let target = match like {
        Value::Int(_) => DataType::Int,
        Value::Float(_) => DataType::Float,
        Value::Str(_) => DataType::Str(0),
        Value::Null => return v.clone(),
    };
    v.coerce(target).unwrap_or_else(|_| v.clone())
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} {}", self.left, self.op, self.right)
    }
}

/// Join flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            JoinType::Inner => "JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Right => "RIGHT JOIN",
            JoinType::Full => "FULL JOIN",
            JoinType::Cross => "CROSS JOIN",
        };
        write!(f, "{}", s)
    }
}

/// `[LEFT|RIGHT|FULL|CROSS] JOIN table ON left = right`.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub table: String,
    pub join_type: JoinType,
    /// Qualified equi-join columns; empty strings for CROSS.
    pub left_col: String,
    pub right_col: String,
}

/// SELECT statement before optimization.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectQuery {
    /// Projection list; empty means `*`.
    pub columns: Vec<String>,
    /// FROM tables; more than one forms a Cartesian base the optimizer
    /// may convert to joins using WHERE equalities.
    pub tables: Vec<String>,
    pub joins: Vec<JoinClause>,
    /// WHERE clause text, decomposed later by the optimizer.
    pub where_raw: Option<String>,
    pub group_by: Vec<String>,
    /// ( column, ascending ).
    pub order_by: Vec<(String, bool)>,
}

/// Value expression on the right of `SET col =`.
#[derive(Debug, Clone, PartialEq)]
pub enum SetExpr {
    Literal(Value),
    Column(String),
    /// `col op literal`, e.g. `bal = bal - 100`.
    Arith(String, ArithOp, Value),
}

///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for SetExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SetExpr::Literal(v) => write!(f, "{}", v),
            SetExpr::Column(c) => write!(f, "{}", c),
            SetExpr::Arith(c, op, v) => write!(f, "{} {} {}", c, op, v),
        }
    }
}

/// INSERT statement: literal rows or a source SELECT.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertQuery {
    pub table: String,
    /// Explicit column list; empty means schema order.
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub select: Option<Box<SelectQuery>>,
}

/// UPDATE statement.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateQuery {
    pub table: String,
    pub sets: Vec<(String, SetExpr)>,
    pub where_raw: Option<String>,
}

/// DELETE statement.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteQuery {
    pub table: String,
    pub where_raw: Option<String>,
}

/// A parsed statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(SelectQuery),
    Insert(InsertQuery),
    Update(UpdateQuery),
    Delete(DeleteQuery),
}

impl Statement {
    /// Canonical signature: the pretty-printed form, used as the plan
    /// cache key. Whitespace and keyword case are already canonical.
    pub fn signature(&self) -> String {
        self.to_string()
    }
}

/// Collapse runs of whitespace to single spaces.
pub fn canonical_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl fmt::Display for SelectQuery {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SELECT ")?;
        if self.columns.is_empty() {
            write!(f, "*")?;
        } else {
            write!(f, "{}", self.columns.join(", "))?;
        }
        write!(f, " FROM {}", self.tables.join(", "))?;
        for j in &self.joins {
            if j.join_type == JoinType::Cross {
                write!(f, " CROSS JOIN {}", j.table)?;
            } else {
                write!(
                    f,
                    " {} {} ON {} = {}",
                    j.join_type, j.table, j.left_col, j.right_col
                )?;
            }
        }
        if let Some(w) = &self.where_raw {
            write!(f, " WHERE {}", canonical_ws(w))?;
        }
        if !self.group_by.is_empty() {
            write!(f, " GROUP BY {}", self.group_by.join(", "))?;
        }
        if !self.order_by.is_empty() {
            let keys: Vec<String> = self
                .order_by
                .iter()
                .map(|(c, asc)| format!("{} {}", c, if *asc { "ASC" } else { "DESC" }))
                .collect();
            write!(f, " ORDER BY {}", keys.join(", "))?;
        }
        Ok(())
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Statement::Select(q) => write!(f, "{}", q),
            Statement::Insert(q) => {
                write!(f, "INSERT INTO {}", q.table)?;
                if !q.columns.is_empty() {
                    write!(f, " ({})", q.columns.join(", "))?;
                }
                if let Some(sel) = &q.select {
                    write!(f, " {}", sel)
                } else {
                    let rows: Vec<String> = q
                        .rows
                        .iter()
                        .map(|r| {
                            let vals: Vec<String> = r.iter().map(|v| v.to_string()).collect();
                            format!("({})", vals.join(", "))
                        })
                        .collect();
                    write!(f, " VALUES {}", rows.join(", "))
                }
            }
            Statement::Update(q) => {
                let sets: Vec<String> = q
                    .sets
                    .iter()
                    .map(|(c, e)| format!("{} = {}", c, e))
                    .collect();
                write!(f, "UPDATE {} SET {}", q.table, sets.join(", "))?;
                if let Some(w) = &q.where_raw {
                    write!(f, " WHERE {}", canonical_ws(w))?;
                }
                Ok(())
            }
            Statement::Delete(q) => {
                write!(f, "DELETE FROM {}", q.table)?;
                if let Some(w) = &q.where_raw {
                    write!(f, " WHERE {}", canonical_ws(w))?;
                }
                Ok(())
            }
        }
    }
}
