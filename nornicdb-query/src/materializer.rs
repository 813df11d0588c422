//! Result materialization pipeline: the stages between "rows matched a
//! pattern" and "rows the caller sees" — projection, grouping/aggregation,
//! ordering, paging, dedup and set combination.
//!
//! [`crate::ast_executor::execute_plan`] drives the same stages lazily over a
//! streaming iterator, for read queries where rows never need to be fully
//! materialized up front. [`crate::ast_executor::execute_write_with_rows`]/
//! `execute_merge_with_rows` are different: a write already has to hold its
//! affected rows in a `Vec` to feed the next plan node's `Plan::Values`
//! input, so the post-write `RETURN`/`WITH` stages in those two functions
//! call straight into this module's free functions instead of re-staging
//! through a throwaway `Plan` node and the iterator machinery.

use crate::ast::{Expression, OrderByItem};
use crate::ast_executor::{Row, Value};
use crate::facade::GraphSnapshot;
use crate::query_api::Params;
use std::cmp::Ordering as CmpOrdering;

/// Step 1: projects each input row through `items`, evaluating each
/// expression with `eval`.
pub fn project<S: GraphSnapshot>(
    rows: &[Row],
    items: &[(String, Expression)],
    snapshot: &S,
    params: &Params,
) -> Vec<Row> {
    rows.iter()
        .map(|row| {
            let mut out = Row::default();
            for (alias, expr) in items {
                let value = crate::evaluator::evaluate_expression_value(expr, row, snapshot, params);
                out = out.with(alias.clone(), value);
            }
            out
        })
        .collect()
}

/// Step 2: a projection needs aggregation if any projected expression
/// contains a recognized aggregate function call.
pub fn detect_aggregation(items: &[(String, Expression)]) -> bool {
    items.iter().any(|(_, expr)| contains_aggregate_call(expr))
}

fn contains_aggregate_call(expr: &Expression) -> bool {
    match expr {
        Expression::FunctionCall(call) => {
            is_aggregate_name(&call.name) || call.args.iter().any(contains_aggregate_call)
        }
        Expression::Binary(b) => contains_aggregate_call(&b.left) || contains_aggregate_call(&b.right),
        Expression::Unary(u) => contains_aggregate_call(&u.operand),
        Expression::List(items) => items.iter().any(contains_aggregate_call),
        Expression::Map(map) => map.properties.iter().any(|p| contains_aggregate_call(&p.value)),
        Expression::Case(case_expr) => {
            case_expr
                .expression
                .as_ref()
                .is_some_and(|e| contains_aggregate_call(e))
                || case_expr
                    .when_clauses
                    .iter()
                    .any(|(w, t)| contains_aggregate_call(w) || contains_aggregate_call(t))
                || case_expr
                    .else_expression
                    .as_ref()
                    .is_some_and(|e| contains_aggregate_call(e))
        }
        _ => false,
    }
}

fn is_aggregate_name(name: &str) -> bool {
    matches!(
        name.rsplit('.').next().map(|s| s.to_ascii_lowercase()).as_deref(),
        Some("count") | Some("sum") | Some("avg") | Some("min") | Some("max") | Some("collect")
    )
}

/// Step 3: groups `rows` by the values of `group_by` columns, preserving
/// first-seen group order (not a `HashMap`'s unspecified iteration order).
pub fn group(rows: Vec<Row>, group_by: &[String]) -> Vec<(Vec<Value>, Vec<Row>)> {
    let mut groups: Vec<(Vec<Value>, Vec<Row>)> = Vec::new();
    for row in rows {
        let key: Vec<Value> = group_by
            .iter()
            .map(|name| row.get(name).cloned().unwrap_or(Value::Null))
            .collect();
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(row),
            None => groups.push((key, vec![row])),
        }
    }
    groups
}

/// Step 4: finalizes one aggregate function over a group's rows.
///
/// Mirrors `ast_executor::execute_aggregate`'s accumulation rules; kept as a
/// single-group function here so `nornic` can fold it over `group`'s output
/// without retaining a `Plan::Aggregate` node.
pub fn finalize_aggregate<S: GraphSnapshot>(
    func: &crate::ast::AggregateFunction,
    members: &[Row],
    snapshot: &S,
    params: &Params,
) -> Value {
    use crate::ast::AggregateFunction as Agg;

    let values_of = |expr: &Expression| -> Vec<Value> {
        members
            .iter()
            .map(|row| crate::evaluator::evaluate_expression_value(expr, row, snapshot, params))
            .collect()
    };
    let dedup = |mut values: Vec<Value>| -> Vec<Value> {
        let mut out: Vec<Value> = Vec::with_capacity(values.len());
        for v in values.drain(..) {
            if !out.contains(&v) {
                out.push(v);
            }
        }
        out
    };

    match func {
        Agg::Count(None) => Value::Int(members.len() as i64),
        Agg::Count(Some(expr)) => {
            Value::Int(values_of(expr).into_iter().filter(|v| *v != Value::Null).count() as i64)
        }
        Agg::CountDistinct(expr) => {
            let values: Vec<Value> = values_of(expr).into_iter().filter(|v| *v != Value::Null).collect();
            Value::Int(dedup(values).len() as i64)
        }
        Agg::Sum(expr) => sum_values(values_of(expr)),
        Agg::SumDistinct(expr) => sum_values(dedup(values_of(expr))),
        Agg::Avg(expr) => avg_values(values_of(expr)),
        Agg::AvgDistinct(expr) => avg_values(dedup(values_of(expr))),
        Agg::Min(expr) => extreme_values(values_of(expr), CmpOrdering::Less),
        Agg::MinDistinct(expr) => extreme_values(dedup(values_of(expr)), CmpOrdering::Less),
        Agg::Max(expr) => extreme_values(values_of(expr), CmpOrdering::Greater),
        Agg::MaxDistinct(expr) => extreme_values(dedup(values_of(expr)), CmpOrdering::Greater),
        Agg::Collect(expr) => {
            Value::List(values_of(expr).into_iter().filter(|v| *v != Value::Null).collect())
        }
        Agg::CollectDistinct(expr) => {
            let values: Vec<Value> = values_of(expr).into_iter().filter(|v| *v != Value::Null).collect();
            Value::List(dedup(values))
        }
    }
}

fn sum_values(values: Vec<Value>) -> Value {
    let mut int_sum: i64 = 0;
    let mut float_sum: f64 = 0.0;
    let mut saw_float = false;
    for v in values {
        match v {
            Value::Int(n) => int_sum += n,
            Value::Float(f) => {
                saw_float = true;
                float_sum += f;
            }
            _ => {}
        }
    }
    if saw_float {
        Value::Float(float_sum + int_sum as f64)
    } else {
        Value::Int(int_sum)
    }
}

fn avg_values(values: Vec<Value>) -> Value {
    let numeric: Vec<f64> = values
        .into_iter()
        .filter_map(|v| match v {
            Value::Int(n) => Some(n as f64),
            Value::Float(f) => Some(f),
            _ => None,
        })
        .collect();
    if numeric.is_empty() {
        Value::Null
    } else {
        Value::Float(numeric.iter().sum::<f64>() / numeric.len() as f64)
    }
}

fn extreme_values(values: Vec<Value>, want: CmpOrdering) -> Value {
    values
        .into_iter()
        .filter(|v| *v != Value::Null)
        .reduce(|acc, v| {
            if crate::evaluator::order_compare(&v, &acc) == want {
                v
            } else {
                acc
            }
        })
        .unwrap_or(Value::Null)
}

/// Step 5: orders rows by `items`, stable for ties.
pub fn order_by<S: GraphSnapshot>(
    mut rows: Vec<Row>,
    items: &[OrderByItem],
    snapshot: &S,
    params: &Params,
) -> Vec<Row> {
    rows.sort_by(|a, b| {
        for item in items {
            let va = crate::evaluator::evaluate_expression_value(&item.expression, a, snapshot, params);
            let vb = crate::evaluator::evaluate_expression_value(&item.expression, b, snapshot, params);
            let ord = crate::evaluator::order_compare(&va, &vb);
            let ord = match item.direction {
                crate::ast::Direction::Ascending => ord,
                crate::ast::Direction::Descending => ord.reverse(),
            };
            if ord != CmpOrdering::Equal {
                return ord;
            }
        }
        CmpOrdering::Equal
    });
    rows
}

/// Step 6: applies `SKIP`/`LIMIT`.
pub fn skip_limit(rows: Vec<Row>, skip: Option<u64>, limit: Option<u64>) -> Vec<Row> {
    let skip = skip.unwrap_or(0) as usize;
    let iter = rows.into_iter().skip(skip);
    match limit {
        Some(n) => iter.take(n as usize).collect(),
        None => iter.collect(),
    }
}

/// Step 7: `DISTINCT`, preserving first-seen order.
pub fn distinct(rows: Vec<Row>) -> Vec<Row> {
    let mut out: Vec<Row> = Vec::with_capacity(rows.len());
    for row in rows {
        if !out.iter().any(|seen| seen.columns() == row.columns()) {
            out.push(row);
        }
    }
    out
}

/// Step 8: `UNION`/`UNION ALL`.
pub fn union(left: Vec<Row>, right: Vec<Row>, all: bool) -> Vec<Row> {
    let mut combined = left;
    combined.extend(right);
    if all { combined } else { distinct(combined) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::AggregateFunction;

    fn row(pairs: &[(&str, Value)]) -> Row {
        let mut r = Row::default();
        for (k, v) in pairs {
            r = r.with(*k, v.clone());
        }
        r
    }

    #[test]
    fn group_preserves_first_seen_order() {
        let rows = vec![
            row(&[("k", Value::String("b".into()))]),
            row(&[("k", Value::String("a".into()))]),
            row(&[("k", Value::String("b".into()))]),
        ];
        let groups = group(rows, &["k".to_string()]);
        let keys: Vec<&Value> = groups.iter().map(|(k, _)| &k[0]).collect();
        assert_eq!(keys, vec![&Value::String("b".into()), &Value::String("a".into())]);
        assert_eq!(groups[0].1.len(), 2);
    }

    #[test]
    fn skip_limit_pages_results() {
        let rows = vec![row(&[("n", Value::Int(1))]), row(&[("n", Value::Int(2))]), row(&[("n", Value::Int(3))])];
        let paged = skip_limit(rows, Some(1), Some(1));
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].get("n"), Some(&Value::Int(2)));
    }

    #[test]
    fn distinct_drops_duplicate_rows_in_order() {
        let rows = vec![
            row(&[("n", Value::Int(1))]),
            row(&[("n", Value::Int(1))]),
            row(&[("n", Value::Int(2))]),
        ];
        let out = distinct(rows);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn union_all_keeps_duplicates_union_dedups() {
        let left = vec![row(&[("n", Value::Int(1))])];
        let right = vec![row(&[("n", Value::Int(1))])];
        assert_eq!(union(left.clone(), right.clone(), true).len(), 2);
        assert_eq!(union(left, right, false).len(), 1);
    }

    #[test]
    fn detect_aggregation_finds_nested_count() {
        let items = vec![(
            "total".to_string(),
            Expression::FunctionCall(crate::ast::FunctionCall {
                name: "count".to_string(),
                args: vec![Expression::Variable("n".to_string())],
            }),
        )];
        assert!(detect_aggregation(&items));
    }

    #[test]
    fn aggregate_function_enum_round_trips_in_match() {
        // Compile-time exhaustiveness check: every variant must be handled
        // by `finalize_aggregate`'s match above.
        let _ = AggregateFunction::Count(None);
    }
}
