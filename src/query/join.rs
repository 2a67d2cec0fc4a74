//! Two-table join execution: nested-loop (any predicate) and hash join
//! (equality only), both supporting inner/left/right, with LEFT/RIGHT
//! null-fill bookkeeping for unmatched rows.

use std::collections::HashMap;

use crate::core::{DbResult, Value};
use crate::expr::{eval_bool, SubqueryRunner};
use crate::parser::ast::{CompareOp, Expr, JoinType};

use super::tuple::Tuple;

/// Recognizes `col = col` (column on both sides) at the top of an ON
/// clause, the only shape hash join can exploit. Anything else (ranges,
/// OR, multi-term ANDed joins) falls back to nested-loop.
pub fn extract_equi_join(on: &Expr) -> Option<(String, String)> {
    match on {
        Expr::Compare(l, CompareOp::Eq, r) => match (l.as_ref(), r.as_ref()) {
            (Expr::Column(a), Expr::Column(b)) => Some((a.clone(), b.clone())),
            _ => None,
        },
        _ => None,
    }
}

fn null_tuple(row_id: u64, columns: &[String]) -> Tuple {
    let mut t = Tuple::new(row_id);
    for c in columns {
        t.push(c.clone(), Value::Null);
    }
    t
}

pub fn nested_loop_join(
    left: &[Tuple],
    right: &[Tuple],
    join_type: JoinType,
    on: &Expr,
    left_cols: &[String],
    right_cols: &[String],
    subq: &dyn SubqueryRunner,
) -> DbResult<Vec<Tuple>> {
    let mut out = Vec::new();
    let mut right_matched = vec![false; right.len()];

    for l in left {
        let mut matched = false;
        for (ri, r) in right.iter().enumerate() {
            let mut combined = l.clone();
            combined.extend(r);
            if eval_bool(on, &combined, subq)? {
                matched = true;
                right_matched[ri] = true;
                out.push(combined);
            }
        }
        if !matched && join_type == JoinType::Left {
            let mut combined = l.clone();
            combined.extend(&null_tuple(0, right_cols));
            out.push(combined);
        }
    }

    if join_type == JoinType::Right {
        for (ri, r) in right.iter().enumerate() {
            if !right_matched[ri] {
                let mut combined = null_tuple(r.row_id, left_cols);
                combined.extend(r);
                out.push(combined);
            }
        }
    }

    Ok(out)
}

/// Build phase hashes the smaller side's join key into `value -> indices`;
/// probe phase scans the larger side. Which physical side is "build" is
/// chosen for efficiency only — LEFT/RIGHT null-fill semantics always
/// refer to the join's `left`/`right` inputs, not the build/probe roles.
pub fn hash_join(
    left: &[Tuple],
    right: &[Tuple],
    join_type: JoinType,
    left_key: &str,
    right_key: &str,
    left_cols: &[String],
    right_cols: &[String],
) -> Vec<Tuple> {
    if left.len() <= right.len() {
        hash_join_build_left(left, right, join_type, left_key, right_key, left_cols, right_cols)
    } else {
        hash_join_build_right(left, right, join_type, left_key, right_key, left_cols, right_cols)
    }
}

fn build_index(rows: &[Tuple], key: &str) -> HashMap<Vec<u8>, Vec<usize>> {
    let mut table: HashMap<Vec<u8>, Vec<usize>> = HashMap::new();
    for (i, t) in rows.iter().enumerate() {
        if let Some(v) = t.get(key) {
            if !v.is_null() {
                table.entry(v.sort_key()).or_default().push(i);
            }
        }
    }
    table
}

fn hash_join_build_left(
    left: &[Tuple],
    right: &[Tuple],
    join_type: JoinType,
    left_key: &str,
    right_key: &str,
    left_cols: &[String],
    right_cols: &[String],
) -> Vec<Tuple> {
    let table = build_index(left, left_key);
    let mut left_matched = vec![false; left.len()];
    let mut out = Vec::new();

    for r in right {
        let found = r
            .get(right_key)
            .filter(|v| !v.is_null())
            .and_then(|v| table.get(&v.sort_key()));
        match found {
            Some(indices) => {
                for &i in indices {
                    left_matched[i] = true;
                    let mut combined = left[i].clone();
                    combined.extend(r);
                    out.push(combined);
                }
            }
            None if join_type == JoinType::Right => {
                out.push({
                    let mut combined = null_tuple(r.row_id, left_cols);
                    combined.extend(r);
                    combined
                });
            }
            None => {}
        }
    }

    if join_type == JoinType::Left {
        for (i, matched) in left_matched.iter().enumerate() {
            if !matched {
                let mut combined = left[i].clone();
                combined.extend(&null_tuple(0, right_cols));
                out.push(combined);
            }
        }
    }
    out
}

fn hash_join_build_right(
    left: &[Tuple],
    right: &[Tuple],
    join_type: JoinType,
    left_key: &str,
    right_key: &str,
    left_cols: &[String],
    _right_cols: &[String],
) -> Vec<Tuple> {
    let table = build_index(right, right_key);
    let mut right_matched = vec![false; right.len()];
    let mut out = Vec::new();

    for l in left {
        let found = l
            .get(left_key)
            .filter(|v| !v.is_null())
            .and_then(|v| table.get(&v.sort_key()));
        match found {
            Some(indices) => {
                for &i in indices {
                    right_matched[i] = true;
                    let mut combined = l.clone();
                    combined.extend(&right[i]);
                    out.push(combined);
                }
            }
            None if join_type == JoinType::Left => {
                let mut combined = l.clone();
                combined.extend(&null_tuple(0, right_cols));
                out.push(combined);
            }
            None => {}
        }
    }

    if join_type == JoinType::Right {
        for (i, matched) in right_matched.iter().enumerate() {
            if !matched {
                let mut combined = null_tuple(right[i].row_id, left_cols);
                combined.extend(&right[i]);
                out.push(combined);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::SelectStatement;

    struct NoSubqueries;
    impl SubqueryRunner for NoSubqueries {
        fn run_subquery(&self, _select: &SelectStatement) -> DbResult<Vec<Vec<Value>>> {
            Ok(vec![])
        }
    }

    fn tuples(table: &str, col: &str, values: &[i64]) -> Vec<Tuple> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let mut t = Tuple::new(i as u64 + 1);
                t.push(format!("{table}.{col}"), Value::Int(*v));
                t
            })
            .collect()
    }

    #[test]
    fn nested_loop_inner_join_produces_cartesian_matches() {
        let a = tuples("a", "k", &[1, 2, 2, 3]);
        let b = tuples("b", "k", &[1, 2, 2, 3]);
        let on = Expr::Compare(
            Box::new(Expr::Column("a.k".to_string())),
            CompareOp::Eq,
            Box::new(Expr::Column("b.k".to_string())),
        );
        let out = nested_loop_join(&a, &b, JoinType::Inner, &on, &[], &[], &NoSubqueries).unwrap();
        assert_eq!(out.len(), 6); // 1x1 + 2x2x2 + 1x1
    }

    #[test]
    fn hash_join_matches_nested_loop_result_count() {
        let a = tuples("a", "k", &[1, 2, 2, 3]);
        let b = tuples("b", "k", &[1, 2, 2, 3]);
        let out = hash_join(&a, &b, JoinType::Inner, "a.k", "b.k", &[], &[]);
        assert_eq!(out.len(), 6);
    }

    #[test]
    fn left_join_emits_unmatched_left_rows_with_nulls() {
        let a = tuples("a", "k", &[1, 9]);
        let b = tuples("b", "k", &[1]);
        let on = Expr::Compare(
            Box::new(Expr::Column("a.k".to_string())),
            CompareOp::Eq,
            Box::new(Expr::Column("b.k".to_string())),
        );
        let out = nested_loop_join(&a, &b, JoinType::Left, &on, &[], &["b.k".to_string()], &NoSubqueries).unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().any(|t| t.get("b.k") == Some(&Value::Null)));
    }
}
