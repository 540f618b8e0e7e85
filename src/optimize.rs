//!
//! Query optimizer. Two passes over the logical query: heuristic
//! rewrites ( conjunctive decomposition, predicate pushdown, projection
//! pruning, join reordering ), then candidate plan construction and
//! bottom-up costing. The lowest-cost candidate wins, ties broken by
//! generation order.

use crate::err::{Error, Result};
use crate::parse::parse_conditions;
use crate::plan::{JoinAlgo, PlanKind, PlanNode, QueryPlan};
use crate::query::*;
use crate::record::Schema;
use crate::storage::{StorageEngine, TableStats};
use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};
use std::time::SystemTime;

/// Assumed selectivity of a join unless overridden.
pub const JOIN_SELECTIVITY: f64 = 0.1;

/// Default selectivity of an inequality predicate.
pub const INEQ_SELECTIVITY: f64 = 1.0 / 3.0;

/// Below this many rows on both sides a hash join always wins.
pub const HASH_JOIN_THRESHOLD: f64 = 1000.0;

/// One relation mentioned by the query.
struct Rel {
    name: String,
    stats: TableStats,
    schema: Schema,
    /// Single-table conjuncts pushed down to this relation's scan.
    pushed: Vec<Condition>,
}

/// Candidate construction switches.
#[derive(Clone, Copy)]
struct BuildOpts {
    use_index: bool,
    pushdown: bool,
    reorder: bool,
    order_scan: bool,
}

/// The optimizer borrows the storage engine for statistics and index
/// information.
pub struct Optimizer<'a> {
    storage: &'a StorageEngine,
}

impl<'a> Optimizer<'a> {
    pub fn new(storage: &'a StorageEngine) -> Optimizer<'a> {
        Optimizer { storage }
    }

    /// Produce the costed plan for a statement.
    pub fn optimize(&self, stmt: &Statement) -> Result<QueryPlan> {
        let (root, strategy) = match stmt {
            Statement::Select(q) => self.optimize_select(q)?,
            Statement::Insert(q) => (self.plan_insert(q)?, "dml"),
            Statement::Update(q) => (self.plan_update(q)?, "dml"),
            Statement::Delete(q) => (self.plan_delete(q)?, "dml"),
        };
        let total_cost = root.total_cost();
        Ok(QueryPlan {
            query: stmt.clone(),
            root,
            total_cost,
            strategy,
            created: SystemTime::now(),
        })
    }

    fn optimize_select(&self, q: &SelectQuery) -> Result<(PlanNode, &'static str)> {
        let conds = match &q.where_raw {
            Some(raw) => parse_conditions(raw)?,
            None => Vec::new(),
        };
        let mut rels = Vec::new();
        for t in q.tables.iter().chain(q.joins.iter().map(|j| &j.table)) {
            rels.push(Rel {
                name: t.clone(),
                stats: self.storage.stats(t)?,
                schema: self.storage.schema(t)?,
                pushed: Vec::new(),
            });
        }

        // Heuristic 1+2: decompose the conjunction, push single-table
        // predicates down to their table's scan; equality pairs across
        // two base tables become join conditions.
        let mut base_joins: Vec<(String, String, String, String)> = Vec::new(); // (lt, lc, rt, rc)
        let mut residual = Vec::new();
        for c in conds {
            if let Some((lc, op, rc)) = c.as_column_pair() {
                let lo = owner(&rels, lc);
                let ro = owner(&rels, rc);
                match (lo, ro) {
                    (Some(lt), Some(rt)) if lt != rt => {
                        if op == CmpOp::Eq
                            && q.tables.iter().any(|t| t == &lt)
                            && q.tables.iter().any(|t| t == &rt)
                        {
                            base_joins.push((lt, lc.to_string(), rt, rc.to_string()));
                        } else {
                            residual.push(c);
                        }
                        continue;
                    }
                    (Some(t), Some(_)) => {
                        push_to(&mut rels, &t, c);
                        continue;
                    }
                    _ => {
                        residual.push(c);
                        continue;
                    }
                }
            }
            match c
                .as_column_literal()
                .and_then(|(col, _, _)| owner(&rels, col))
            {
                Some(t) => push_to(&mut rels, &t, c),
                None => residual.push(c),
            }
        }

        // Heuristic 3: the projection pruning set.
        let prune_refs = if q.columns.is_empty() {
            None
        } else {
            let mut refs: FxHashSet<String> = q.columns.iter().cloned().collect();
            for j in &q.joins {
                refs.insert(j.left_col.clone());
                refs.insert(j.right_col.clone());
            }
            for r in &rels {
                for c in &r.pushed {
                    collect_columns(c, &mut refs);
                }
            }
            for c in &residual {
                collect_columns(c, &mut refs);
            }
            for (c, _) in &q.order_by {
                refs.insert(c.clone());
            }
            for c in &q.group_by {
                refs.insert(c.clone());
            }
            for (_, lc, _, rc) in &base_joins {
                refs.insert(lc.clone());
                refs.insert(rc.clone());
            }
            Some(refs)
        };

        let has_joins = q.tables.len() > 1 || !q.joins.is_empty();
        let mut candidates: Vec<(&'static str, BuildOpts)> = vec![
            (
                "full-scan",
                BuildOpts {
                    use_index: false,
                    pushdown: false,
                    reorder: false,
                    order_scan: false,
                },
            ),
            (
                "index",
                BuildOpts {
                    use_index: true,
                    pushdown: true,
                    reorder: false,
                    order_scan: false,
                },
            ),
            (
                "pushdown",
                BuildOpts {
                    use_index: false,
                    pushdown: true,
                    reorder: false,
                    order_scan: false,
                },
            ),
        ];
        if has_joins {
            candidates.push((
                "join-aware",
                BuildOpts {
                    use_index: true,
                    pushdown: true,
                    reorder: true,
                    order_scan: false,
                },
            ));
        }
        if !q.order_by.is_empty() {
            candidates.push((
                "order-aware",
                BuildOpts {
                    use_index: true,
                    pushdown: true,
                    reorder: false,
                    order_scan: true,
                },
            ));
        }

        let mut best: Option<(PlanNode, &'static str, f64)> = None;
        for (tag, opts) in candidates {
            let root = self.build(q, &rels, &base_joins, &residual, &prune_refs, opts)?;
            let cost = root.total_cost();
            debug!("candidate {} costs {:.2}", tag, cost);
            if best.as_ref().map_or(true, |(_, _, c)| cost < *c) {
                best = Some((root, tag, cost));
            }
        }
        let (root, tag, _) = best.expect("at least one candidate");
        Ok((root, tag))
    }

    /// Assemble one candidate plan.
    fn build(
        &self,
        q: &SelectQuery,
        rels: &[Rel],
        base_joins: &[(String, String, String, String)],
        residual: &[Condition],
        prune_refs: &Option<FxHashSet<String>>,
        opts: BuildOpts,
    ) -> Result<PlanNode> {
        let mut loose = residual.to_vec();

        // Scan leaf per relation.
        let mut scans: FxHashMap<String, PlanNode> = FxHashMap::default();
        let mut order_leaf = false;
        for r in rels {
            let (node, satisfies_order) = self.build_scan(r, q, opts, &mut loose, prune_refs);
            order_leaf |= satisfies_order;
            scans.insert(r.name.clone(), node);
        }

        // Heuristic 4: join order. The base Cartesian tables join first,
        // smallest estimated result leading; explicit JOIN clauses follow
        // in written order.
        let mut base_order: Vec<String> = q.tables.clone();
        if opts.reorder && base_order.len() > 1 {
            base_order = reorder_bases(&base_order, base_joins, &scans);
        }

        let mut joined: FxHashSet<String> = FxHashSet::default();
        let first = base_order
            .first()
            .ok_or_else(|| Error::Unsupported("SELECT without FROM".to_string()))?;
        let mut node = scans
            .get(first)
            .cloned()
            .ok_or_else(|| Error::Invariant("scan missing for base table".to_string()))?;
        joined.insert(first.clone());
        for t in &base_order[1..] {
            let right = scans
                .get(t)
                .cloned()
                .ok_or_else(|| Error::Invariant("scan missing for base table".to_string()))?;
            let link = base_joins.iter().find(|(lt, _, rt, _)| {
                (joined.contains(lt) && rt == t) || (joined.contains(rt) && lt == t)
            });
            node = match link {
                Some((lt, lc, _, rc)) => {
                    let (lcol, rcol) = if joined.contains(lt) {
                        (lc.clone(), rc.clone())
                    } else {
                        (rc.clone(), lc.clone())
                    };
                    let algo = self.choose_algo(&node, &right, Some((&lcol, &rcol)), rels);
                    join_node(node, right, algo, JoinType::Inner, Some((lcol, rcol)))
                }
                None => join_node(node, right, JoinAlgo::Cross, JoinType::Cross, None),
            };
            joined.insert(t.clone());
        }
        for jc in &q.joins {
            let right = scans
                .get(&jc.table)
                .cloned()
                .ok_or_else(|| Error::Invariant("scan missing for joined table".to_string()))?;
            if jc.join_type == JoinType::Cross {
                node = join_node(node, right, JoinAlgo::Cross, JoinType::Cross, None);
            } else {
                // Orient the ON pair so the left column belongs to the
                // accumulated left side.
                let (mut lcol, mut rcol) = (jc.left_col.clone(), jc.right_col.clone());
                if owner(rels, &lcol).as_deref() == Some(jc.table.as_str()) {
                    std::mem::swap(&mut lcol, &mut rcol);
                }
                let algo = self.choose_algo(&node, &right, Some((&lcol, &rcol)), rels);
                node = join_node(node, right, algo, jc.join_type, Some((lcol, rcol)));
            }
            joined.insert(jc.table.clone());
        }

        if !loose.is_empty() {
            node = filter_node(node, loose.clone(), rels);
        }
        if !q.group_by.is_empty() {
            node = aggregate_node(node, q.group_by.clone());
        }
        // Heuristic: a Sort already satisfied by an ascending IndexScan
        // underneath is elided.
        let order_satisfied = order_leaf
            && rels.len() == 1
            && q.group_by.is_empty()
            && q.order_by.len() == 1
            && q.order_by[0].1;
        if !q.order_by.is_empty() && !order_satisfied {
            node = sort_node(node, q.order_by.clone());
        }
        if !q.columns.is_empty() {
            node = project_node(node, q.columns.clone());
        }
        Ok(node)
    }

    /// Physical scan choice for one relation: IndexSeek when the WHERE
    /// touches an indexed column, IndexScan when the ORDER BY column is
    /// indexed and ascending, else TableScan. Pushed predicates end up
    /// in the seek, in a Filter above the scan, or back in the loose
    /// set, depending on the candidate's switches.
    fn build_scan(
        &self,
        r: &Rel,
        q: &SelectQuery,
        opts: BuildOpts,
        loose: &mut Vec<Condition>,
        prune_refs: &Option<FxHashSet<String>>,
    ) -> (PlanNode, bool) {
        let mut node = None;
        let mut order_satisfied = false;
        let mut conds_in_leaf = false;

        if opts.use_index && !r.pushed.is_empty() {
            let seek_col = r.pushed.iter().find_map(|c| {
                let (col, _, _) = c.as_column_literal()?;
                let base = col.rsplit('.').next().unwrap_or(col);
                r.stats.is_indexed(base).then(|| base.to_string())
            });
            if let Some(column) = seek_col {
                let sel = selectivity(&r.pushed, &r.stats);
                let mut n = PlanNode::new(PlanKind::IndexSeek {
                    table: r.name.clone(),
                    column,
                    conditions: r.pushed.clone(),
                });
                n.estimated_rows = (r.stats.tuple_count as f64 * sel).max(1.0);
                n.node_cost = 1.0 + sel * r.stats.block_count as f64;
                node = Some(n);
                conds_in_leaf = true;
            }
        }
        if node.is_none() && opts.order_scan && q.order_by.len() == 1 {
            let (col, asc) = &q.order_by[0];
            let base = col.rsplit('.').next().unwrap_or(col);
            if *asc && owner_one(r, col) && r.stats.is_indexed(base) {
                let mut n = PlanNode::new(PlanKind::IndexScan {
                    table: r.name.clone(),
                    column: base.to_string(),
                });
                n.estimated_rows = r.stats.tuple_count as f64;
                n.node_cost = r.stats.block_count as f64 * 1.2;
                node = Some(n);
                order_satisfied = true;
            }
        }
        let mut node = node.unwrap_or_else(|| {
            let mut n = PlanNode::new(PlanKind::TableScan {
                table: r.name.clone(),
            });
            n.estimated_rows = r.stats.tuple_count as f64;
            n.node_cost = r.stats.block_count as f64;
            n
        });

        if !conds_in_leaf && !r.pushed.is_empty() {
            if opts.pushdown {
                node = filter_node_with(node, r.pushed.clone(), &r.stats);
            } else {
                loose.extend(r.pushed.iter().cloned());
            }
        }

        // Early projection pruning above the scan: part of the rewrite
        // pass, so every candidate carries it.
        if let Some(refs) = prune_refs {
            let cols: Vec<String> = r
                .schema
                .columns
                .iter()
                .filter(|c| {
                    refs.contains(&c.name) || refs.contains(&format!("{}.{}", r.name, c.name))
                })
                .map(|c| format!("{}.{}", r.name, c.name))
                .collect();
            if !cols.is_empty() && cols.len() < r.schema.columns.len() {
                node = project_node(node, cols);
            }
        }
        (node, order_satisfied)
    }

    /// Join algorithm rule, in order: both sides small -> Hash; both
    /// join columns indexed -> Merge; right side indexed -> NestedLoop;
    /// else Hash.
    fn choose_algo(
        &self,
        left: &PlanNode,
        right: &PlanNode,
        on: Option<(&str, &str)>,
        rels: &[Rel],
    ) -> JoinAlgo {
        let (lcol, rcol) = match on {
            Some(p) => p,
            None => return JoinAlgo::Cross,
        };
        choose_join_algo(
            left.estimated_rows,
            right.estimated_rows,
            col_indexed(rels, lcol),
            col_indexed(rels, rcol),
        )
    }

    fn plan_insert(&self, q: &InsertQuery) -> Result<PlanNode> {
        let schema = self.storage.schema(&q.table)?;
        for c in &q.columns {
            schema.col_required(c)?;
        }
        let input = match &q.select {
            Some(sel) => Some(Box::new(self.optimize_select(sel)?.0)),
            None => None,
        };
        let mut n = PlanNode::new(PlanKind::Insert {
            table: q.table.clone(),
            columns: q.columns.clone(),
            rows: q.rows.clone(),
            input,
        });
        n.estimated_rows = match &n.kind {
            PlanKind::Insert {
                input: Some(inp), ..
            } => inp.estimated_rows,
            _ => q.rows.len() as f64,
        };
        n.node_cost = n.estimated_rows;
        Ok(n)
    }

    fn plan_update(&self, q: &UpdateQuery) -> Result<PlanNode> {
        let schema = self.storage.schema(&q.table)?;
        for (c, _) in &q.sets {
            schema.col_required(c)?;
        }
        let input = self.dml_scan(&q.table, &q.where_raw)?;
        let mut n = PlanNode::new(PlanKind::Update {
            table: q.table.clone(),
            input: Box::new(input),
            sets: q.sets.clone(),
        });
        n.estimated_rows = n.children()[0].estimated_rows;
        n.node_cost = n.estimated_rows;
        Ok(n)
    }

    fn plan_delete(&self, q: &DeleteQuery) -> Result<PlanNode> {
        let input = self.dml_scan(&q.table, &q.where_raw)?;
        let mut n = PlanNode::new(PlanKind::Delete {
            table: q.table.clone(),
            input: Box::new(input),
        });
        n.estimated_rows = n.children()[0].estimated_rows;
        n.node_cost = n.estimated_rows;
        Ok(n)
    }

    /// Scan feeding a write operator: index-assisted when possible.
    fn dml_scan(&self, table: &str, where_raw: &Option<String>) -> Result<PlanNode> {
        let conds = match where_raw {
            Some(raw) => parse_conditions(raw)?,
            None => Vec::new(),
        };
        let rel = Rel {
            name: table.to_string(),
            stats: self.storage.stats(table)?,
            schema: self.storage.schema(table)?,
            pushed: conds,
        };
        let q = SelectQuery::default();
        let mut loose = Vec::new();
        let opts = BuildOpts {
            use_index: true,
            pushdown: true,
            reorder: false,
            order_scan: false,
        };
        let (node, _) = self.build_scan(&rel, &q, opts, &mut loose, &None);
        debug_assert!(loose.is_empty());
        Ok(node)
    }
}

/// Owning table of a column reference, by qualifier or by unique schema
/// membership.
fn owner(rels: &[Rel], col: &str) -> Option<String> {
    if let Some((t, c)) = col.rsplit_once('.') {
        return rels
            .iter()
            .find(|r| r.name == t && r.schema.col(c).is_some())
            .map(|r| r.name.clone());
    }
    let mut hit = None;
    for r in rels {
        if r.schema.col(col).is_some() {
            if hit.is_some() {
                return None; // ambiguous
            }
            hit = Some(r.name.clone());
        }
    }
    hit
}

fn owner_one(r: &Rel, col: &str) -> bool {
    match col.rsplit_once('.') {
        Some((t, c)) => t == r.name && r.schema.col(c).is_some(),
        None => r.schema.col(col).is_some(),
    }
}

fn col_indexed(rels: &[Rel], col: &str) -> bool {
    match col.rsplit_once('.') {
        Some((t, c)) => rels
            .iter()
            .any(|r| r.name == t && r.stats.is_indexed(c)),
        None => rels.iter().any(|r| r.schema.col(col).is_some() && r.stats.is_indexed(col)),
    }
}

fn push_to(rels: &mut [Rel], table: &str, c: Condition) {
    if let Some(r) = rels.iter_mut().find(|r| r.name == table) {
        r.pushed.push(c);
    }
}

fn collect_columns(c: &Condition, refs: &mut FxHashSet<String>) {
    for side in [&c.left, &c.right] {
        if let Operand::Column(col) = side {
            refs.insert(col.clone());
        }
    }
}

/// Combined selectivity of a conjunction: 1/distinct for an equality,
/// one third for anything else.
fn selectivity(conds: &[Condition], stats: &TableStats) -> f64 {
    let mut sel = 1.0;
    for c in conds {
        sel *= match c.as_column_literal() {
            Some((col, CmpOp::Eq, _)) => 1.0 / stats.distinct_for(col) as f64,
            _ => INEQ_SELECTIVITY,
        };
    }
    sel
}

/// The join algorithm rule on raw numbers; also used by tests to check
/// the selection boundaries.
pub fn choose_join_algo(
    left_rows: f64,
    right_rows: f64,
    left_indexed: bool,
    right_indexed: bool,
) -> JoinAlgo {
    if left_rows < HASH_JOIN_THRESHOLD && right_rows < HASH_JOIN_THRESHOLD {
        JoinAlgo::Hash
    } else if left_indexed && right_indexed {
        JoinAlgo::Merge
    } else if right_indexed {
        JoinAlgo::NestedLoop
    } else {
        JoinAlgo::Hash
    }
}

fn join_node(
    left: PlanNode,
    right: PlanNode,
    algo: JoinAlgo,
    join_type: JoinType,
    on: Option<(String, String)>,
) -> PlanNode {
    let l = left.estimated_rows;
    let r = right.estimated_rows;
    let mut n = PlanNode::new(PlanKind::Join {
        left: Box::new(left),
        right: Box::new(right),
        algo,
        join_type,
        on,
    });
    n.estimated_rows = match algo {
        JoinAlgo::Cross => l * r,
        _ => (l * r * JOIN_SELECTIVITY).max(1.0),
    };
    n.node_cost = match algo {
        JoinAlgo::NestedLoop | JoinAlgo::Cross => l * r,
        JoinAlgo::Hash | JoinAlgo::Merge => l + r,
    };
    n
}

fn filter_node(input: PlanNode, conds: Vec<Condition>, rels: &[Rel]) -> PlanNode {
    // Distinct counts for selectivity come from whichever relation owns
    // each column; unowned columns fall back to the inequality default.
    let rows = input.estimated_rows;
    let mut sel = 1.0;
    for c in &conds {
        sel *= match c.as_column_literal() {
            Some((col, CmpOp::Eq, _)) => match owner(rels, col) {
                Some(t) => {
                    let d = rels
                        .iter()
                        .find(|r| r.name == t)
                        .map(|r| r.stats.distinct_for(col))
                        .unwrap_or(1);
                    1.0 / d as f64
                }
                None => INEQ_SELECTIVITY,
            },
            _ => INEQ_SELECTIVITY,
        };
    }
    let mut n = PlanNode::new(PlanKind::Filter {
        input: Box::new(input),
        conditions: conds,
    });
    n.estimated_rows = (rows * sel).max(1.0);
    n.node_cost = rows * 0.01;
    n
}

fn filter_node_with(input: PlanNode, conds: Vec<Condition>, stats: &TableStats) -> PlanNode {
    let rows = input.estimated_rows;
    let sel = selectivity(&conds, stats);
    let mut n = PlanNode::new(PlanKind::Filter {
        input: Box::new(input),
        conditions: conds,
    });
    n.estimated_rows = (rows * sel).max(1.0);
    n.node_cost = rows * 0.01;
    n
}

fn project_node(input: PlanNode, columns: Vec<String>) -> PlanNode {
    let rows = input.estimated_rows;
    let width = columns.len() as f64;
    let mut n = PlanNode::new(PlanKind::Project {
        input: Box::new(input),
        columns,
    });
    n.estimated_rows = rows;
    n.node_cost = rows * width * 0.001;
    n
}

fn sort_node(input: PlanNode, keys: Vec<(String, bool)>) -> PlanNode {
    let rows = input.estimated_rows;
    let mut n = PlanNode::new(PlanKind::Sort {
        input: Box::new(input),
        keys,
    });
    n.estimated_rows = rows;
    n.node_cost = rows * rows.max(2.0).log2() * 0.01;
    n
}

fn aggregate_node(input: PlanNode, group_by: Vec<String>) -> PlanNode {
    let rows = input.estimated_rows;
    let mut n = PlanNode::new(PlanKind::Aggregate {
        input: Box::new(input),
        group_by,
    });
    n.estimated_rows = (rows / 10.0).max(1.0);
    n.node_cost = rows * 0.02;
    n
}

/// Greedy reorder of the Cartesian base: start from the pair whose
/// estimated join result is smallest, then repeatedly attach the table
/// minimizing the running estimate. Inner joins commute and associate,
/// so this is safe for the base set.
fn reorder_bases(
    tables: &[String],
    base_joins: &[(String, String, String, String)],
    scans: &FxHashMap<String, PlanNode>,
) -> Vec<String> {
    let est = |t: &String| scans.get(t).map(|n| n.estimated_rows).unwrap_or(1.0);
    let linked = |a: &String, b: &String| {
        base_joins
            .iter()
            .any(|(lt, _, rt, _)| (lt == a && rt == b) || (lt == b && rt == a))
    };
    let mut remaining: Vec<String> = tables.to_vec();
    let mut order = Vec::with_capacity(tables.len());

    // Seed pair.
    let mut best: Option<(usize, usize, f64)> = None;
    for i in 0..remaining.len() {
        for j in i + 1..remaining.len() {
            if !linked(&remaining[i], &remaining[j]) {
                continue;
            }
            let e = est(&remaining[i]) * est(&remaining[j]) * JOIN_SELECTIVITY;
            if best.map_or(true, |(_, _, b)| e < b) {
                best = Some((i, j, e));
            }
        }
    }
    let mut running = match best {
        Some((i, j, e)) => {
            let (a, b) = (remaining[i].clone(), remaining[j].clone());
            remaining.retain(|t| t != &a && t != &b);
            order.push(a);
            order.push(b);
            e
        }
        None => {
            let first = remaining.remove(0);
            let e = est(&first);
            order.push(first);
            e
        }
    };

    while !remaining.is_empty() {
        let mut pick = 0;
        let mut pick_cost = f64::INFINITY;
        for (i, t) in remaining.iter().enumerate() {
            let connected = order.iter().any(|o| linked(o, t));
            let e = if connected {
                running * est(t) * JOIN_SELECTIVITY
            } else {
                running * est(t)
            };
            if e < pick_cost {
                pick_cost = e;
                pick = i;
            }
        }
        let t = remaining.remove(pick);
        order.push(t);
        running = pick_cost;
    }
    order
}
