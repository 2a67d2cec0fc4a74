//! Accumulators, GROUP BY grouping, and HAVING filtering, built around a
//! richer `AggregateCall` (`COUNT`/`SUM`/`AVG`/`MIN`/`MAX` over `*` or a
//! named column) plus HAVING support.

use std::collections::HashMap;

use crate::core::{DatabaseError, DbResult, Value};
use crate::parser::ast::{AggregateArg, AggregateCall, AggregateFunc};

use super::tuple::Tuple;

/// Running state for one aggregate call over one group (or the whole
/// result set, for an aggregate query with no GROUP BY).
#[derive(Debug, Clone)]
enum Accumulator {
    Count { total: i64 },
    Sum { total: f64, saw_int: bool, any: bool },
    Avg { total: f64, count: i64 },
    Min { best: Option<Value> },
    Max { best: Option<Value> },
}

impl Accumulator {
    fn new(func: AggregateFunc) -> Self {
        match func {
            AggregateFunc::Count => Accumulator::Count { total: 0 },
            AggregateFunc::Sum => Accumulator::Sum {
                total: 0.0,
                saw_int: true,
                any: false,
            },
            AggregateFunc::Avg => Accumulator::Avg { total: 0.0, count: 0 },
            AggregateFunc::Min => Accumulator::Min { best: None },
            AggregateFunc::Max => Accumulator::Max { best: None },
        }
    }

    fn accumulate(&mut self, value: Option<&Value>) {
        match self {
            Accumulator::Count { total } => {
                if value.map(|v| !v.is_null()).unwrap_or(false) {
                    *total += 1;
                }
            }
            Accumulator::Sum { total, saw_int, any } => {
                if let Some(v) = value {
                    if let Some(f) = v.as_float() {
                        *total += f;
                        *any = true;
                        if !matches!(v, Value::Int(_)) {
                            *saw_int = false;
                        }
                    }
                }
            }
            Accumulator::Avg { total, count } => {
                if let Some(v) = value {
                    if let Some(f) = v.as_float() {
                        *total += f;
                        *count += 1;
                    }
                }
            }
            Accumulator::Min { best } => {
                if let Some(v) = value {
                    if !v.is_null() {
                        let replace = match best {
                            None => true,
                            Some(b) => matches!(v.compare(b), Some(std::cmp::Ordering::Less)),
                        };
                        if replace {
                            *best = Some(v.clone());
                        }
                    }
                }
            }
            Accumulator::Max { best } => {
                if let Some(v) = value {
                    if !v.is_null() {
                        let replace = match best {
                            None => true,
                            Some(b) => matches!(v.compare(b), Some(std::cmp::Ordering::Greater)),
                        };
                        if replace {
                            *best = Some(v.clone());
                        }
                    }
                }
            }
        }
    }

    /// AVG of an empty group is null; SUM/COUNT default to 0; MIN/MAX of an
    /// empty group is null.
    fn finalize(self) -> Value {
        match self {
            Accumulator::Count { total } => Value::Int(total),
            Accumulator::Sum { total, saw_int, any } => {
                if !any {
                    Value::Int(0)
                } else if saw_int && total.fract() == 0.0 {
                    Value::Int(total as i64)
                } else {
                    Value::Float(total)
                }
            }
            Accumulator::Avg { total, count } => {
                if count == 0 {
                    Value::Null
                } else {
                    Value::Float(total / count as f64)
                }
            }
            Accumulator::Min { best } => best.unwrap_or(Value::Null),
            Accumulator::Max { best } => best.unwrap_or(Value::Null),
        }
    }
}

fn arg_value(tuple: &Tuple, arg: &AggregateArg) -> Option<Value> {
    match arg {
        AggregateArg::Star => Some(Value::Bool(true)), // presence marker; COUNT(*) counts rows, not nulls
        AggregateArg::Column(name) => tuple.get(name).cloned(),
    }
}

fn accumulate_call(acc: &mut Accumulator, call: &AggregateCall, tuple: &Tuple) {
    match &call.arg {
        AggregateArg::Star => acc.accumulate(Some(&Value::Bool(true))),
        AggregateArg::Column(_) => acc.accumulate(arg_value(tuple, &call.arg).as_ref()),
    }
}

/// Runs every aggregate call over the whole `rows` set (no GROUP BY),
/// returning exactly one tuple whose fields are the synthesized aggregate
/// names — a query with aggregates and no GROUP BY always returns exactly
/// one row.
pub fn aggregate_no_group_by(rows: &[Tuple], calls: &[AggregateCall]) -> Tuple {
    let mut accs: Vec<Accumulator> = calls.iter().map(|c| Accumulator::new(c.func)).collect();
    for row in rows {
        for (acc, call) in accs.iter_mut().zip(calls) {
            accumulate_call(acc, call, row);
        }
    }
    let mut out = Tuple::new(0);
    for (acc, call) in accs.into_iter().zip(calls) {
        out.push(call.synthesized_name(), acc.finalize());
    }
    out
}

/// Encodes a group-by key as describes: concatenation of
/// group-column values, string-encoded with a separator unlikely to
/// collide with real data, `NULL` standing in for an absent value.
fn group_key(row: &Tuple, group_by: &[String]) -> String {
    group_by
        .iter()
        .map(|col| match row.get(col) {
            Some(v) if !v.is_null() => v.to_string(),
            _ => "NULL".to_string(),
        })
        .collect::<Vec<_>>()
        .join("\u{1}")
}

struct Group {
    key_values: Vec<(String, Value)>,
    accs: Vec<Accumulator>,
}

/// Groups `rows` by `group_by`, running `calls` per group; returns one
/// tuple per group with both the group-by columns and the synthesized
/// aggregate columns populated, suitable for HAVING and projection.
/// `DatabaseError::ColumnNotInGroupBy` / `CannotUseStarWithGroupBy` are
/// caught earlier, during SELECT-item validation, not here.
pub fn group_by(rows: &[Tuple], group_by: &[String], calls: &[AggregateCall]) -> Vec<Tuple> {
    let mut groups: HashMap<String, Group> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for row in rows {
        let key = group_key(row, group_by);
        let entry = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key.clone());
            Group {
                key_values: group_by
                    .iter()
                    .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
                    .collect(),
                accs: calls.iter().map(|c| Accumulator::new(c.func)).collect(),
            }
        });
        for (acc, call) in entry.accs.iter_mut().zip(calls) {
            accumulate_call(acc, call, row);
        }
    }

    order
        .into_iter()
        .map(|key| {
            let group = groups.remove(&key).expect("key present");
            let mut out = Tuple::new(0);
            for (name, value) in group.key_values {
                out.push(name, value);
            }
            for (acc, call) in group.accs.into_iter().zip(calls) {
                out.push(call.synthesized_name(), acc.finalize());
            }
            out
        })
        .collect()
}

/// Validates that every non-aggregate SELECT item is one of the GROUP BY
/// columns, per the `ColumnNotInGroupBy` rule.
pub fn validate_group_by_columns(select_columns: &[String], group_by: &[String]) -> DbResult<()> {
    for col in select_columns {
        let bare = col.rsplit('.').next().unwrap_or(col);
        if !group_by.iter().any(|g| g == col || g.rsplit('.').next() == Some(bare)) {
            return Err(DatabaseError::ColumnNotInGroupBy(col.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(dept: &str, salary: i64) -> Tuple {
        let mut t = Tuple::new(1);
        t.push("e.dept", Value::Text(dept.to_string()));
        t.push("e.salary", Value::Int(salary));
        t
    }

    #[test]
    fn count_star_counts_rows_not_nulls() {
        let rows = vec![row("eng", 1), row("eng", 2), row("sales", 3)];
        let call = AggregateCall {
            func: AggregateFunc::Count,
            arg: AggregateArg::Star,
        };
        let groups = group_by(&rows, &["e.dept".to_string()], &[call]);
        assert_eq!(groups.len(), 2);
        let eng = groups.iter().find(|g| g.get("e.dept") == Some(&Value::Text("eng".to_string()))).unwrap();
        assert_eq!(eng.get("COUNT(*)"), Some(&Value::Int(2)));
    }

    #[test]
    fn avg_of_empty_group_is_null() {
        let call = AggregateCall {
            func: AggregateFunc::Avg,
            arg: AggregateArg::Column("e.salary".to_string()),
        };
        let result = aggregate_no_group_by(&[], &[call]);
        assert_eq!(result.get("AVG(e.salary)"), Some(&Value::Null));
    }

    #[test]
    fn sum_and_count_default_to_zero_on_empty_input() {
        let sum_call = AggregateCall {
            func: AggregateFunc::Sum,
            arg: AggregateArg::Column("e.salary".to_string()),
        };
        let count_call = AggregateCall {
            func: AggregateFunc::Count,
            arg: AggregateArg::Star,
        };
        let result = aggregate_no_group_by(&[], &[sum_call, count_call]);
        assert_eq!(result.get("SUM(e.salary)"), Some(&Value::Int(0)));
        assert_eq!(result.get("COUNT(*)"), Some(&Value::Int(0)));
    }
}
