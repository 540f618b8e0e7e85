//!
//! Physical plan tree: one closed enumeration of node kinds, each with
//! its payload, dispatched by the operator engine's visitor. There are
//! no parent pointers; re-parent by walking downward.

use crate::query::{Condition, JoinType, SetExpr, Statement};
use crate::value::Value;
use std::fmt;
use std::time::SystemTime;

/// Join algorithm chosen by the optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinAlgo {
    NestedLoop,
    Hash,
    Merge,
    Cross,
}

impl fmt::Display for JoinAlgo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            JoinAlgo::NestedLoop => "NestedLoop",
            JoinAlgo::Hash => "Hash",
            JoinAlgo::Merge => "Merge",
            JoinAlgo::Cross => "Cross",
        };
        write!(f, "{}", s)
    }
}

/// A plan node: kind plus the estimates costing fills in.
#[derive(Debug, Clone)]
pub struct PlanNode {
    pub kind: PlanKind,
    pub estimated_rows: f64,
    pub node_cost: f64,
}

/// Node kinds. Leaves carry tables, unary nodes carry their input,
/// Join carries two.
#[derive(Debug, Clone)]
pub enum PlanKind {
    TableScan {
        table: String,
    },
    IndexScan {
        table: String,
        column: String,
    },
    IndexSeek {
        table: String,
        column: String,
        conditions: Vec<Condition>,
    },
    Filter {
        input: Box<PlanNode>,
        conditions: Vec<Condition>,
    },
    Project {
        input: Box<PlanNode>,
        columns: Vec<String>,
    },
    Sort {
        input: Box<PlanNode>,
        keys: Vec<(String, bool)>,
    },
    Aggregate {
        input: Box<PlanNode>,
        group_by: Vec<String>,
    },
    Join {
        left: Box<PlanNode>,
        right: Box<PlanNode>,
        algo: JoinAlgo,
        join_type: JoinType,
        /// ( column in left input, column in right input ).
        on: Option<(String, String)>,
    },
    Insert {
        table: String,
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
        /// INSERT ... SELECT source.
        input: Option<Box<PlanNode>>,
    },
    Update {
        table: String,
        input: Box<PlanNode>,
        sets: Vec<(String, SetExpr)>,
    },
    Delete {
        table: String,
        input: Box<PlanNode>,
    },
}

impl PlanNode {
    pub fn new(kind: PlanKind) -> PlanNode {
        PlanNode {
            kind,
            estimated_rows: 0.0,
            node_cost: 0.0,
        }
    }

    /// Child nodes, leaves first order not guaranteed.
    pub fn children(&self) -> Vec<&PlanNode> {
        match &self.kind {
            PlanKind::Filter { input, .. }
            | PlanKind::Project { input, .. }
            | PlanKind::Sort { input, .. }
            | PlanKind::Aggregate { input, .. }
            | PlanKind::Update { input, .. }
            | PlanKind::Delete { input, .. } => vec![input],
            PlanKind::Join { left, right, .. } => vec![left, right],
            PlanKind::Insert { input, .. } => input.iter().map(|b| b.as_ref()).collect(),
            _ => Vec::new(),
        }
    }

    /// Sum of node costs over the whole tree.
    pub fn total_cost(&self) -> f64 {
        self.node_cost
            + self
                .children()
                .iter()
                .map(|c| c.total_cost())
                .sum::<f64>()
    }

    /// The table a scan leaf reads, if this is one.
    pub fn scan_table(&self) -> Option<&str> {
        match &self.kind {
            PlanKind::TableScan { table }
            | PlanKind::IndexScan { table, .. }
            | PlanKind::IndexSeek { table, .. } => Some(table),
            _ => None,
        }
    }

    fn label(&self) -> String {
        match &self.kind {
            PlanKind::TableScan { table } => format!("TableScan {}", table),
            PlanKind::IndexScan { table, column } => format!("IndexScan {} ({})", table, column),
            PlanKind::IndexSeek {
                table,
                column,
                conditions,
            } => {
                let conds: Vec<String> = conditions.iter().map(|c| c.to_string()).collect();
                format!("IndexSeek {} ({}) [{}]", table, column, conds.join(" AND "))
            }
            PlanKind::Filter { conditions, .. } => {
                let conds: Vec<String> = conditions.iter().map(|c| c.to_string()).collect();
                format!("Filter [{}]", conds.join(" AND "))
            }
            PlanKind::Project { columns, .. } => format!("Project [{}]", columns.join(", ")),
            PlanKind::Sort { keys, .. } => {
                let keys: Vec<String> = keys
                    .iter()
                    .map(|(c, asc)| format!("{} {}", c, if *asc { "ASC" } else { "DESC" }))
                    .collect();
                format!("Sort [{}]", keys.join(", "))
            }
            PlanKind::Aggregate { group_by, .. } => {
                format!("Aggregate [{}]", group_by.join(", "))
            }
            PlanKind::Join {
                algo,
                join_type,
                on,
                ..
            } => match on {
                Some((l, r)) => format!("{}Join {:?} {} = {}", algo, join_type, l, r),
                None => format!("{}Join {:?}", algo, join_type),
            },
            PlanKind::Insert { table, rows, .. } => {
                format!("Insert {} ({} rows)", table, rows.len())
            }
            PlanKind::Update { table, sets, .. } => {
                let sets: Vec<String> = sets.iter().map(|(c, e)| format!("{} = {}", c, e)).collect();
                format!("Update {} [{}]", table, sets.join(", "))
            }
            PlanKind::Delete { table, .. } => format!("Delete {}", table),
        }
    }

    fn fmt_tree(&self, f: &mut fmt::Formatter, depth: usize) -> fmt::Result {
        writeln!(
            f,
            "{}{} (rows={:.0}, cost={:.2})",
            "  ".repeat(depth),
            self.label(),
            self.estimated_rows,
            self.node_cost
        )?;
        for c in self.children() {
            c.fmt_tree(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for PlanNode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.fmt_tree(f, 0)
    }
}

/// A costed plan for one statement.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub query: Statement,
    pub root: PlanNode,
    pub total_cost: f64,
    /// Which candidate won: full-scan, index, pushdown, join-aware,
    /// order-aware, or dml.
    pub strategy: &'static str,
    pub created: SystemTime,
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "plan [{}] cost={:.2} for: {}",
            self.strategy, self.total_cost, self.query
        )?;
        write!(f, "{}", self.root)
    }
}
