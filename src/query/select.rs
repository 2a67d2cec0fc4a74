//! The SELECT pipeline: scan/join -> WHERE -> GROUP BY/aggregate -> HAVING
//! -> ORDER BY -> LIMIT/OFFSET -> projection. Folds an arbitrary number of
//! JOIN clauses left to right and supports the SIMILARITY/VIBES ordering
//! variants alongside plain column sorts.

use crate::ann::AnnIndexManager;
use crate::core::{DatabaseError, DbResult, Value};
use crate::expr::{eval_bool, SubqueryRunner};
use crate::index::IndexManager;
use crate::mvcc::{CommitLog, Snapshot};
use crate::parser::ast::{AggregateCall, Expr, OrderItem, SelectItem, SelectStatement, SortDir};
use crate::storage::Storage;

use super::aggregate::{aggregate_no_group_by, group_by, validate_group_by_columns};
use super::join::{extract_equi_join, hash_join, nested_loop_join};
use super::order::{shuffle_vibes, similarity_search, sort_by_columns};
use super::planner::{choose_access_path, choose_join_algo, JoinAlgo};
use super::scan::scan_named_table;
use super::tuple::Tuple;

/// Everything a SELECT needs to read: the committed heap, both index
/// structures, the reader's snapshot, and the embedder `SIMILARITY TO`
/// delegates to for turning text into a query vector.
pub struct QueryContext<'a> {
    pub storage: &'a Storage,
    pub indexes: &'a IndexManager,
    pub ann: &'a AnnIndexManager,
    pub snapshot: &'a Snapshot,
    pub clog: &'a CommitLog,
    pub embed: &'a dyn Fn(&str) -> Vec<f32>,
    /// Seeds `VIBES`'s shuffle; the caller bumps this once per statement so
    /// repeated `ORDER BY VIBES` queries don't all reshuffle identically
    ///.
    pub vibes_seed: u64,
}

impl SubqueryRunner for QueryContext<'_> {
    fn run_subquery(&self, select: &SelectStatement) -> DbResult<Vec<Vec<Value>>> {
        execute_select(select, self).map(|r| r.rows)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

fn qualified_columns(storage: &Storage, table: &str) -> DbResult<Vec<String>> {
    let t = storage.table(table)?;
    Ok(t.columns.iter().map(|c| format!("{table}.{}", c.name)).collect())
}

fn bare_name(qualified: &str) -> &str {
    qualified.rsplit('.').next().unwrap_or(qualified)
}

/// Recursively collects every `Aggregate` node so HAVING can reference an
/// aggregate that isn't itself a SELECT item.
fn collect_aggregates(expr: &Expr, out: &mut Vec<AggregateCall>) {
    match expr {
        Expr::Aggregate(call) => out.push(call.clone()),
        Expr::Not(e) | Expr::IsNull(e) | Expr::IsNotNull(e) => collect_aggregates(e, out),
        Expr::And(l, r) | Expr::Or(l, r) | Expr::Compare(l, _, r) => {
            collect_aggregates(l, out);
            collect_aggregates(r, out);
        }
        Expr::Like(e, _) => collect_aggregates(e, out),
        Expr::InSubquery { expr, .. } => collect_aggregates(expr, out),
        Expr::Exists { .. } | Expr::Column(_) | Expr::Literal(_) | Expr::ScalarSubquery(_) => {}
    }
}

fn dedup_aggregates(calls: Vec<AggregateCall>) -> Vec<AggregateCall> {
    let mut out: Vec<AggregateCall> = Vec::new();
    for call in calls {
        if !out.iter().any(|c| c.synthesized_name() == call.synthesized_name()) {
            out.push(call);
        }
    }
    out
}

/// Scans the FROM table and folds every JOIN clause left-to-right,
/// choosing an access path per table and a join algorithm per step
///. WHERE is re-evaluated in full after joining, even when
/// an index plan already exploited part of it, since an index lookup only
/// narrows candidates — it does not guarantee every conjunct holds.
fn scan_and_join(select: &SelectStatement, ctx: &QueryContext) -> DbResult<(Vec<Tuple>, Vec<String>)> {
    let base_count = ctx.storage.table(&select.from)?.row_count();
    let base_plan = choose_access_path(&select.from, base_count, select.filter.as_ref(), ctx.indexes);
    let mut rows = scan_named_table(ctx.storage, &select.from, &base_plan, ctx.indexes, ctx.snapshot, ctx.clog)?;
    let mut left_cols = qualified_columns(ctx.storage, &select.from)?;

    for join in &select.joins {
        let right_count = ctx.storage.table(&join.table)?.row_count();
        let right_plan = choose_access_path(&join.table, right_count, select.filter.as_ref(), ctx.indexes);
        let right_rows =
            scan_named_table(ctx.storage, &join.table, &right_plan, ctx.indexes, ctx.snapshot, ctx.clog)?;
        let right_cols = qualified_columns(ctx.storage, &join.table)?;

        let algo = choose_join_algo(rows.len(), right_rows.len());
        rows = match (algo, extract_equi_join(&join.on)) {
            (JoinAlgo::Hash, Some((left_key, right_key))) => {
                hash_join(&rows, &right_rows, join.join_type, &left_key, &right_key, &left_cols, &right_cols)
            }
            _ => nested_loop_join(&rows, &right_rows, join.join_type, &join.on, &left_cols, &right_cols, ctx)?,
        };
        left_cols.extend(right_cols);
    }

    Ok((rows, left_cols))
}

fn apply_where(rows: Vec<Tuple>, filter: Option<&Expr>, ctx: &QueryContext) -> DbResult<Vec<Tuple>> {
    let Some(filter) = filter else { return Ok(rows) };
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        if eval_bool(filter, &row, ctx)? {
            out.push(row);
        }
    }
    Ok(out)
}

/// Non-aggregate column names directly selected (used to validate GROUP BY
/// membership); aggregate expressions and `*` are not collected here.
fn plain_selected_columns(select: &SelectStatement) -> Vec<String> {
    select
        .columns
        .iter()
        .filter_map(|item| match item {
            SelectItem::Expr { expr: Expr::Column(name), .. } => Some(name.clone()),
            _ => None,
        })
        .collect()
}

fn apply_group_and_having(
    rows: Vec<Tuple>,
    select: &SelectStatement,
    ctx: &QueryContext,
) -> DbResult<Vec<Tuple>> {
    if select.having.is_some() && select.group_by.is_empty() {
        return Err(DatabaseError::HavingWithoutGroupBy);
    }

    let has_aggregates = select
        .columns
        .iter()
        .any(|c| matches!(c, SelectItem::Expr { expr: Expr::Aggregate(_), .. }));

    if !select.group_by.is_empty() {
        if select.columns.iter().any(|c| matches!(c, SelectItem::Star)) {
            return Err(DatabaseError::CannotUseStarWithGroupBy);
        }
        validate_group_by_columns(&plain_selected_columns(select), &select.group_by)?;

        let mut calls = Vec::new();
        for item in &select.columns {
            if let SelectItem::Expr { expr, .. } = item {
                collect_aggregates(expr, &mut calls);
            }
        }
        if let Some(having) = &select.having {
            collect_aggregates(having, &mut calls);
        }
        let calls = dedup_aggregates(calls);

        let grouped = group_by(&rows, &select.group_by, &calls);
        return match &select.having {
            Some(having) => {
                let mut out = Vec::with_capacity(grouped.len());
                for g in grouped {
                    if eval_bool(having, &g, ctx)? {
                        out.push(g);
                    }
                }
                Ok(out)
            }
            None => Ok(grouped),
        };
    }

    if has_aggregates {
        let mut calls = Vec::new();
        for item in &select.columns {
            if let SelectItem::Expr { expr, .. } = item {
                collect_aggregates(expr, &mut calls);
            }
        }
        let calls = dedup_aggregates(calls);
        return Ok(vec![aggregate_no_group_by(&rows, &calls)]);
    }

    Ok(rows)
}

fn default_item_name(expr: &Expr) -> String {
    match expr {
        Expr::Column(name) => bare_name(name).to_string(),
        Expr::Aggregate(call) => call.synthesized_name(),
        Expr::Literal(v) => v.to_string(),
        _ => "?column?".to_string(),
    }
}

fn project(rows: &[Tuple], select: &SelectStatement, ctx: &QueryContext) -> DbResult<QueryResult> {
    let mut columns = Vec::new();
    let mut exprs: Vec<(Expr, String)> = Vec::new();
    for item in &select.columns {
        match item {
            SelectItem::Star => {
                if let Some(first) = rows.first() {
                    for name in first.column_names() {
                        columns.push(name.clone());
                        exprs.push((Expr::Column(name), String::new()));
                    }
                } else if select.joins.is_empty() {
                    for name in qualified_columns(ctx.storage, &select.from)? {
                        columns.push(name.clone());
                        exprs.push((Expr::Column(name), String::new()));
                    }
                }
            }
            SelectItem::Expr { expr, alias } => {
                let name = alias.clone().unwrap_or_else(|| default_item_name(expr));
                columns.push(name);
                exprs.push((expr.clone(), String::new()));
            }
        }
    }

    let mut out_rows = Vec::with_capacity(rows.len());
    for row in rows {
        let mut out = Vec::with_capacity(exprs.len());
        for (expr, _) in &exprs {
            out.push(crate::expr::eval_value(expr, row, ctx)?);
        }
        out_rows.push(out);
    }

    Ok(QueryResult { columns, rows: out_rows })
}

fn apply_limit_offset(mut rows: Vec<Tuple>, select: &SelectStatement) -> Vec<Tuple> {
    if let Some(offset) = select.offset {
        rows = rows.into_iter().skip(offset).collect();
    }
    if let Some(limit) = select.limit {
        rows.truncate(limit);
    }
    rows
}

pub fn execute_select(select: &SelectStatement, ctx: &QueryContext) -> DbResult<QueryResult> {
    if let [OrderItem::Similarity { literal, dimension_column }] = select.order_by.as_slice() {
        if select.joins.is_empty() && select.group_by.is_empty() {
            let k = select.limit.unwrap_or(10);
            let rows = similarity_search(
                ctx.storage,
                &select.from,
                literal,
                dimension_column.as_deref(),
                k,
                ctx.embed,
                ctx.ann,
                ctx.snapshot,
                ctx.clog,
            )?;
            let rows = apply_where(rows, select.filter.as_ref(), ctx)?;
            let rows = apply_limit_offset(rows, select);
            return project(&rows, select, ctx);
        }
    }

    let (rows, _cols) = scan_and_join(select, ctx)?;
    let rows = apply_where(rows, select.filter.as_ref(), ctx)?;
    let mut rows = apply_group_and_having(rows, select, ctx)?;

    match select.order_by.as_slice() {
        [OrderItem::Vibes] => shuffle_vibes(&mut rows, ctx.vibes_seed),
        items if !items.is_empty() && items.iter().all(|i| matches!(i, OrderItem::Column(_, _))) => {
            let keys: Vec<(String, SortDir)> = items
                .iter()
                .map(|i| match i {
                    OrderItem::Column(name, dir) => (name.clone(), *dir),
                    _ => unreachable!(),
                })
                .collect();
            sort_by_columns(&mut rows, &keys);
        }
        _ => {}
    }

    let rows = apply_limit_offset(rows, select);
    project(&rows, select, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ann::AnnIndexManager;
    use crate::config::VectorSearchConfig;
    use crate::core::{Column, DataType};
    use crate::index::IndexManager;
    use crate::mvcc::{CommitLog, Snapshot};
    use crate::parser::ast::{AggregateArg, AggregateFunc, CompareOp};
    use std::collections::HashMap;

    fn ctx_pieces() -> (Storage, IndexManager, AnnIndexManager, CommitLog) {
        (
            Storage::new(),
            IndexManager::new(),
            AnnIndexManager::new(VectorSearchConfig { m: 8, ef_construction: 32, ef_search: 16 }),
            CommitLog::new(),
        )
    }

    fn insert(storage: &mut Storage, table: &str, dept: &str, salary: i64) {
        let t = storage.table_mut(table).unwrap();
        let id = t.reserve_row_id();
        let mut data = HashMap::new();
        data.insert("dept".to_string(), Value::Text(dept.to_string()));
        data.insert("salary".to_string(), Value::Int(salary));
        t.insert_with_id(id, data, 0).unwrap();
    }

    #[test]
    fn simple_select_with_where_and_order() {
        let (mut storage, indexes, ann, clog) = ctx_pieces();
        storage
            .create_table(
                "emp",
                vec![Column::new("dept", DataType::Text), Column::new("salary", DataType::Int)],
            )
            .unwrap();
        insert(&mut storage, "emp", "eng", 100);
        insert(&mut storage, "emp", "eng", 200);
        insert(&mut storage, "emp", "sales", 50);

        let snapshot = Snapshot::auto_commit();
        let embed = |_: &str| vec![];
        let ctx = QueryContext {
            storage: &storage,
            indexes: &indexes,
            ann: &ann,
            snapshot: &snapshot,
            clog: &clog,
            embed: &embed,
            vibes_seed: 0,
        };

        let select = SelectStatement {
            columns: vec![
                SelectItem::Expr { expr: Expr::Column("salary".to_string()), alias: None },
            ],
            from: "emp".to_string(),
            joins: vec![],
            filter: Some(Expr::Compare(
                Box::new(Expr::Column("dept".to_string())),
                CompareOp::Eq,
                Box::new(Expr::Literal(Value::Text("eng".to_string()))),
            )),
            group_by: vec![],
            having: None,
            order_by: vec![OrderItem::Column("salary".to_string(), SortDir::Desc)],
            limit: None,
            offset: None,
        };

        let result = execute_select(&select, &ctx).unwrap();
        assert_eq!(result.rows, vec![vec![Value::Int(200)], vec![Value::Int(100)]]);
    }

    #[test]
    fn group_by_with_having_filters_small_groups() {
        let (mut storage, indexes, ann, clog) = ctx_pieces();
        storage
            .create_table(
                "emp",
                vec![Column::new("dept", DataType::Text), Column::new("salary", DataType::Int)],
            )
            .unwrap();
        insert(&mut storage, "emp", "eng", 1);
        insert(&mut storage, "emp", "eng", 2);
        insert(&mut storage, "emp", "eng", 3);
        insert(&mut storage, "emp", "sales", 1);

        let snapshot = Snapshot::auto_commit();
        let embed = |_: &str| vec![];
        let ctx = QueryContext {
            storage: &storage,
            indexes: &indexes,
            ann: &ann,
            snapshot: &snapshot,
            clog: &clog,
            embed: &embed,
            vibes_seed: 0,
        };

        let count_call = AggregateCall { func: AggregateFunc::Count, arg: AggregateArg::Star };
        let select = SelectStatement {
            columns: vec![
                SelectItem::Expr { expr: Expr::Column("emp.dept".to_string()), alias: None },
                SelectItem::Expr { expr: Expr::Aggregate(count_call.clone()), alias: None },
            ],
            from: "emp".to_string(),
            joins: vec![],
            filter: None,
            group_by: vec!["emp.dept".to_string()],
            having: Some(Expr::Compare(
                Box::new(Expr::Aggregate(count_call)),
                CompareOp::Gt,
                Box::new(Expr::Literal(Value::Int(2))),
            )),
            order_by: vec![],
            limit: None,
            offset: None,
        };

        let result = execute_select(&select, &ctx).unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0][0], Value::Text("eng".to_string()));
        assert_eq!(result.rows[0][1], Value::Int(3));
    }
}
