//! WHERE/HAVING/ON expression evaluation over a flat `Condition` enum
//! generalized into the full `Expr` tree
//! (`parser::ast::Expr`) so column-vs-column comparisons, boolean
//! combinators, and the scalar/IN/EXISTS subquery forms this engine supports
//! are all one evaluator instead of bolted-on special cases.
//!
//! Subquery execution is injected through the `SubqueryRunner` trait rather
//! than calling into `crate::query` directly, since the query engine in
//! turn needs this evaluator for WHERE/HAVING/ON — a direct call would be a
//! module cycle. `crate::query::select` implements the trait.

use crate::core::{DatabaseError, DbResult, Value};
use crate::parser::ast::{AggregateCall, CompareOp, Expr, SelectStatement};

use crate::query::tuple::Tuple;

/// Runs an uncorrelated subquery and hands back its projected rows (no
/// column metadata — callers only need cell values: scalar, membership, or
/// "is it empty").
pub trait SubqueryRunner {
    fn run_subquery(&self, select: &SelectStatement) -> DbResult<Vec<Vec<Value>>>;
}

/// Evaluates `expr` against `tuple` as a boolean predicate. Comparisons
/// with `NULL` on either side yield `false` (three-valued logic is not
/// propagated beyond that, by design); `IS [NOT] NULL`
/// is the only direct null test.
pub fn eval_bool(expr: &Expr, tuple: &Tuple, subq: &dyn SubqueryRunner) -> DbResult<bool> {
    match expr {
        Expr::And(l, r) => Ok(eval_bool(l, tuple, subq)? && eval_bool(r, tuple, subq)?),
        Expr::Or(l, r) => Ok(eval_bool(l, tuple, subq)? || eval_bool(r, tuple, subq)?),
        Expr::Not(e) => Ok(!eval_bool(e, tuple, subq)?),
        Expr::IsNull(e) => Ok(eval_value(e, tuple, subq)?.is_null()),
        Expr::IsNotNull(e) => Ok(!eval_value(e, tuple, subq)?.is_null()),
        Expr::Compare(l, op, r) => {
            let lhs = eval_value(l, tuple, subq)?;
            let rhs = eval_value(r, tuple, subq)?;
            Ok(compare(&lhs, *op, &rhs))
        }
        Expr::Like(col, pattern) => {
            let value = eval_value(col, tuple, subq)?;
            Ok(match value.as_text() {
                Some(s) => like_match(s, pattern),
                None => false,
            })
        }
        Expr::InSubquery { expr, subquery, negated } => {
            let value = eval_value(expr, tuple, subq)?;
            let rows = subq.run_subquery(subquery)?;
            let column = single_column(&rows)?;
            let has_null = column.iter().any(Value::is_null);
            let found = column.iter().any(|v| v == &value);
            let result = if found {
                true
            } else if has_null {
                // SQL semantics: `x NOT IN (set containing NULL)` matches nothing,
                // because `x <> NULL` is unknown rather than true for every member.
                return Ok(if *negated { false } else { false });
            } else {
                false
            };
            Ok(if *negated { !result } else { result })
        }
        Expr::Exists { subquery, negated } => {
            let rows = subq.run_subquery(subquery)?;
            let non_empty = !rows.is_empty();
            Ok(if *negated { !non_empty } else { non_empty })
        }
        Expr::Column(_) | Expr::Literal(_) | Expr::Aggregate(_) | Expr::ScalarSubquery(_) => {
            // A bare value used where a predicate is expected: truthy iff `Bool(true)`.
            Ok(matches!(eval_value(expr, tuple, subq)?, Value::Bool(true)))
        }
    }
}

/// Evaluates `expr` to a scalar `Value` (column reference, literal,
/// synthesized aggregate reference, or scalar subquery).
pub fn eval_value(expr: &Expr, tuple: &Tuple, subq: &dyn SubqueryRunner) -> DbResult<Value> {
    match expr {
        Expr::Column(name) => Ok(tuple.get(name).cloned().unwrap_or(Value::Null)),
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Aggregate(call) => Ok(aggregate_ref(call, tuple)),
        Expr::ScalarSubquery(select) => {
            let rows = subq.run_subquery(select)?;
            scalar_from_rows(&rows)
        }
        other => {
            // Boolean-shaped subexpressions (AND/OR/comparisons/...) used in a
            // value position collapse to their boolean result.
            Ok(Value::Bool(eval_bool(other, tuple, subq)?))
        }
    }
}

fn aggregate_ref(call: &AggregateCall, tuple: &Tuple) -> Value {
    tuple.get(&call.synthesized_name()).cloned().unwrap_or(Value::Null)
}

/// Scalar-subquery collapse: 0 rows -> null, >=2 rows ->
/// fatal, exactly 1 cell -> that value.
fn scalar_from_rows(rows: &[Vec<Value>]) -> DbResult<Value> {
    match rows.len() {
        0 => Ok(Value::Null),
        1 => Ok(rows[0].first().cloned().unwrap_or(Value::Null)),
        _ => Err(DatabaseError::SubqueryReturnedMultipleRows),
    }
}

fn single_column(rows: &[Vec<Value>]) -> DbResult<Vec<Value>> {
    if rows.iter().any(|r| r.len() != 1) {
        return Err(DatabaseError::InvalidSubquery(
            "IN/NOT IN subquery must project exactly one column".to_string(),
        ));
    }
    Ok(rows.iter().map(|r| r[0].clone()).collect())
}

/// Three-valued-logic-free comparison: null on either side is always
/// `false`, regardless of operator.
fn compare(lhs: &Value, op: CompareOp, rhs: &Value) -> bool {
    if lhs.is_null() || rhs.is_null() {
        return false;
    }
    match op {
        CompareOp::Eq => lhs == rhs,
        CompareOp::Ne => lhs != rhs,
        CompareOp::Lt => matches!(lhs.compare(rhs), Some(std::cmp::Ordering::Less)),
        CompareOp::Gt => matches!(lhs.compare(rhs), Some(std::cmp::Ordering::Greater)),
        CompareOp::Le => matches!(
            lhs.compare(rhs),
            Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
        ),
        CompareOp::Ge => matches!(
            lhs.compare(rhs),
            Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
        ),
    }
}

/// `%`/`_` SQL LIKE matching (`%` = any run of characters, `_` = exactly
/// one).
fn like_match(text: &str, pattern: &str) -> bool {
    fn recurse(text: &[char], pattern: &[char]) -> bool {
        match pattern.first() {
            None => text.is_empty(),
            Some('%') => {
                recurse(text, &pattern[1..])
                    || (!text.is_empty() && recurse(&text[1..], pattern))
            }
            Some('_') => !text.is_empty() && recurse(&text[1..], &pattern[1..]),
            Some(c) => text.first() == Some(c) && recurse(&text[1..], &pattern[1..]),
        }
    }
    let text_chars: Vec<char> = text.chars().collect();
    let pattern_chars: Vec<char> = pattern.chars().collect();
    recurse(&text_chars, &pattern_chars)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoSubqueries;
    impl SubqueryRunner for NoSubqueries {
        fn run_subquery(&self, _select: &SelectStatement) -> DbResult<Vec<Vec<Value>>> {
            Ok(vec![])
        }
    }

    fn tuple_with(name: &str, value: Value) -> Tuple {
        let mut t = Tuple::new(1);
        t.push(name, value);
        t
    }

    #[test]
    fn null_comparison_is_false() {
        let t = tuple_with("t.n", Value::Null);
        let expr = Expr::Compare(
            Box::new(Expr::Column("n".to_string())),
            CompareOp::Eq,
            Box::new(Expr::Literal(Value::Int(1))),
        );
        assert!(!eval_bool(&expr, &t, &NoSubqueries).unwrap());
    }

    #[test]
    fn is_null_is_the_explicit_null_test() {
        let t = tuple_with("t.n", Value::Null);
        let expr = Expr::IsNull(Box::new(Expr::Column("n".to_string())));
        assert!(eval_bool(&expr, &t, &NoSubqueries).unwrap());
    }

    #[test]
    fn like_matches_percent_and_underscore() {
        assert!(like_match("hello", "h%o"));
        assert!(like_match("hello", "h_llo"));
        assert!(!like_match("hello", "h_l"));
    }

    #[test]
    fn and_or_short_circuit_correctly() {
        let t = tuple_with("t.n", Value::Int(5));
        let gt3 = Expr::Compare(
            Box::new(Expr::Column("n".to_string())),
            CompareOp::Gt,
            Box::new(Expr::Literal(Value::Int(3))),
        );
        let lt10 = Expr::Compare(
            Box::new(Expr::Column("n".to_string())),
            CompareOp::Lt,
            Box::new(Expr::Literal(Value::Int(10))),
        );
        let expr = Expr::And(Box::new(gt3), Box::new(lt10));
        assert!(eval_bool(&expr, &t, &NoSubqueries).unwrap());
    }
}
