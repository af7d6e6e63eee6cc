//! Evaluates AST expressions against a row and its schema.
//!
//! Column references resolve by name: an exact match on the schema's column
//! name first, then a unique `alias.column` suffix match (join outputs carry
//! qualified names). NULL propagates through arithmetic and comparisons;
//! AND/OR follow three-valued logic.

use crate::access::value::Value;
use crate::error::{DbError, DbResult};
use crate::executor::ColumnInfo;
use crate::sql::ast::{is_aggregate_name, BinaryOperator, Expression, UnaryOperator};
use std::cmp::Ordering;

pub fn evaluate(expr: &Expression, row: &[Value], schema: &[ColumnInfo]) -> DbResult<Value> {
    match expr {
        Expression::Literal(value) => Ok(value.clone()),
        Expression::Column(name) => {
            let idx = resolve_column(schema, None, name)?;
            Ok(row[idx].clone())
        }
        Expression::QualifiedColumn(qualifier, name) => {
            let idx = resolve_column(schema, Some(qualifier), name)?;
            Ok(row[idx].clone())
        }
        Expression::BinaryOp { left, op, right } => {
            let l = evaluate(left, row, schema)?;
            let r = evaluate(right, row, schema)?;
            apply_binary(*op, &l, &r)
        }
        Expression::UnaryOp { op, operand } => {
            let v = evaluate(operand, row, schema)?;
            apply_unary(*op, &v)
        }
        Expression::Function { name, args } => {
            if is_aggregate_name(name) {
                return Err(DbError::QueryPlan(format!(
                    "aggregate {}() is only valid with GROUP BY handling",
                    name
                )));
            }
            let values: Vec<Value> = args
                .iter()
                .map(|a| evaluate(a, row, schema))
                .collect::<DbResult<_>>()?;
            apply_scalar_function(name, &values)
        }
        Expression::IsNull { operand, negated } => {
            let v = evaluate(operand, row, schema)?;
            Ok(Value::Boolean(v.is_null() != *negated))
        }
    }
}

/// Interprets a predicate result: NULL and false both reject the row.
pub fn truthy(value: &Value) -> DbResult<bool> {
    match value {
        Value::Boolean(b) => Ok(*b),
        Value::Null => Ok(false),
        other => Err(DbError::QueryPlan(format!(
            "predicate evaluated to {:?}, expected a boolean",
            other
        ))),
    }
}

/// Finds a column by optional qualifier and name. Schema names may be plain
/// (`id`) or qualified (`u.id`); a plain reference matches a qualified name
/// when the suffix is unambiguous.
pub fn resolve_column(
    schema: &[ColumnInfo],
    qualifier: Option<&str>,
    name: &str,
) -> DbResult<usize> {
    if let Some(q) = qualifier {
        let wanted = format!("{}.{}", q, name);
        if let Some(idx) = schema.iter().position(|c| c.name == wanted) {
            return Ok(idx);
        }
        // A single-table query carries unqualified names.
        if let Some(idx) = schema.iter().position(|c| c.name == name) {
            return Ok(idx);
        }
        return Err(DbError::NotFound(format!("column '{}' not found", wanted)));
    }

    if let Some(idx) = schema.iter().position(|c| c.name == name) {
        return Ok(idx);
    }
    let suffix = format!(".{}", name);
    let matches: Vec<usize> = schema
        .iter()
        .enumerate()
        .filter(|(_, c)| c.name.ends_with(&suffix))
        .map(|(i, _)| i)
        .collect();
    match matches.as_slice() {
        [only] => Ok(*only),
        [] => Err(DbError::NotFound(format!("column '{}' not found", name))),
        _ => Err(DbError::QueryPlan(format!(
            "column reference '{}' is ambiguous",
            name
        ))),
    }
}

fn apply_binary(op: BinaryOperator, l: &Value, r: &Value) -> DbResult<Value> {
    use BinaryOperator::*;
    match op {
        And => Ok(three_valued_and(l, r)?),
        Or => Ok(three_valued_or(l, r)?),
        Equal | NotEqual | Less | Greater | LessEqual | GreaterEqual => {
            if l.is_null() || r.is_null() {
                return Ok(Value::Null);
            }
            let ordering = l.compare(r).ok_or_else(|| {
                DbError::QueryPlan(format!("cannot compare {:?} with {:?}", l, r))
            })?;
            let result = match op {
                Equal => ordering == Ordering::Equal,
                NotEqual => ordering != Ordering::Equal,
                Less => ordering == Ordering::Less,
                Greater => ordering == Ordering::Greater,
                LessEqual => ordering != Ordering::Greater,
                GreaterEqual => ordering != Ordering::Less,
                _ => unreachable!(),
            };
            Ok(Value::Boolean(result))
        }
        Plus | Minus | Multiply | Divide | Modulo => arithmetic(op, l, r),
    }
}

fn three_valued_and(l: &Value, r: &Value) -> DbResult<Value> {
    match (as_bool(l)?, as_bool(r)?) {
        (Some(false), _) | (_, Some(false)) => Ok(Value::Boolean(false)),
        (Some(true), Some(true)) => Ok(Value::Boolean(true)),
        _ => Ok(Value::Null),
    }
}

fn three_valued_or(l: &Value, r: &Value) -> DbResult<Value> {
    match (as_bool(l)?, as_bool(r)?) {
        (Some(true), _) | (_, Some(true)) => Ok(Value::Boolean(true)),
        (Some(false), Some(false)) => Ok(Value::Boolean(false)),
        _ => Ok(Value::Null),
    }
}

fn as_bool(v: &Value) -> DbResult<Option<bool>> {
    match v {
        Value::Boolean(b) => Ok(Some(*b)),
        Value::Null => Ok(None),
        other => Err(DbError::QueryPlan(format!(
            "expected a boolean operand, got {:?}",
            other
        ))),
    }
}

fn arithmetic(op: BinaryOperator, l: &Value, r: &Value) -> DbResult<Value> {
    use BinaryOperator::*;
    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }

    // Widen to the wider of the two numeric kinds.
    match (l, r) {
        (Value::Float64(_), _) | (_, Value::Float64(_)) => {
            let a = to_f64(l)?;
            let b = to_f64(r)?;
            let out = match op {
                Plus => a + b,
                Minus => a - b,
                Multiply => a * b,
                Divide => {
                    if b == 0.0 {
                        return Err(DbError::InvalidArgument("division by zero".into()));
                    }
                    a / b
                }
                Modulo => {
                    if b == 0.0 {
                        return Err(DbError::InvalidArgument("division by zero".into()));
                    }
                    a % b
                }
                _ => unreachable!(),
            };
            Ok(Value::Float64(out))
        }
        (Value::Int64(_), _) | (_, Value::Int64(_)) => {
            let a = to_i64(l)?;
            let b = to_i64(r)?;
            integer_arithmetic(op, a, b).map(Value::Int64)
        }
        _ => {
            let a = to_i64(l)?;
            let b = to_i64(r)?;
            integer_arithmetic(op, a, b).map(|v| {
                i32::try_from(v)
                    .map(Value::Int32)
                    .unwrap_or(Value::Int64(v))
            })
        }
    }
}

fn integer_arithmetic(op: BinaryOperator, a: i64, b: i64) -> DbResult<i64> {
    use BinaryOperator::*;
    match op {
        Plus => Ok(a.wrapping_add(b)),
        Minus => Ok(a.wrapping_sub(b)),
        Multiply => Ok(a.wrapping_mul(b)),
        Divide => {
            if b == 0 {
                Err(DbError::InvalidArgument("division by zero".into()))
            } else {
                Ok(a / b)
            }
        }
        Modulo => {
            if b == 0 {
                Err(DbError::InvalidArgument("division by zero".into()))
            } else {
                Ok(a % b)
            }
        }
        _ => unreachable!(),
    }
}

fn to_f64(v: &Value) -> DbResult<f64> {
    match v {
        Value::Int32(x) => Ok(*x as f64),
        Value::Int64(x) => Ok(*x as f64),
        Value::Float64(x) => Ok(*x),
        other => Err(DbError::QueryPlan(format!(
            "expected a numeric operand, got {:?}",
            other
        ))),
    }
}

fn to_i64(v: &Value) -> DbResult<i64> {
    match v {
        Value::Int32(x) => Ok(*x as i64),
        Value::Int64(x) => Ok(*x),
        other => Err(DbError::QueryPlan(format!(
            "expected an integer operand, got {:?}",
            other
        ))),
    }
}

fn apply_unary(op: UnaryOperator, v: &Value) -> DbResult<Value> {
    match op {
        UnaryOperator::Not => match v {
            Value::Null => Ok(Value::Null),
            Value::Boolean(b) => Ok(Value::Boolean(!b)),
            other => Err(DbError::QueryPlan(format!(
                "NOT expects a boolean, got {:?}",
                other
            ))),
        },
        UnaryOperator::Minus => match v {
            Value::Null => Ok(Value::Null),
            Value::Int32(x) => Ok(Value::Int32(-x)),
            Value::Int64(x) => Ok(Value::Int64(-x)),
            Value::Float64(x) => Ok(Value::Float64(-x)),
            other => Err(DbError::QueryPlan(format!(
                "unary minus expects a number, got {:?}",
                other
            ))),
        },
    }
}

fn apply_scalar_function(name: &str, args: &[Value]) -> DbResult<Value> {
    match name.to_uppercase().as_str() {
        "UPPER" => one_text_arg(name, args).map(|s| Value::Text(s.to_uppercase())),
        "LOWER" => one_text_arg(name, args).map(|s| Value::Text(s.to_lowercase())),
        "LENGTH" => one_text_arg(name, args).map(|s| Value::Int32(s.chars().count() as i32)),
        "ABS" => match args {
            [Value::Null] => Ok(Value::Null),
            [Value::Int32(v)] => Ok(Value::Int32(v.abs())),
            [Value::Int64(v)] => Ok(Value::Int64(v.abs())),
            [Value::Float64(v)] => Ok(Value::Float64(v.abs())),
            _ => Err(DbError::QueryPlan("ABS expects one numeric argument".into())),
        },
        other => Err(DbError::QueryPlan(format!("unknown function {}()", other))),
    }
}

fn one_text_arg(name: &str, args: &[Value]) -> DbResult<String> {
    match args {
        [Value::Text(s)] => Ok(s.clone()),
        [Value::Null] => Err(DbError::QueryPlan(format!(
            "{}() does not accept NULL",
            name
        ))),
        _ => Err(DbError::QueryPlan(format!(
            "{}() expects one text argument",
            name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::value::DataType;
    use crate::sql::ast::Expression as E;

    fn schema() -> Vec<ColumnInfo> {
        vec![
            ColumnInfo::new("id", DataType::Int32),
            ColumnInfo::new("name", DataType::Text),
            ColumnInfo::new("score", DataType::Float64),
        ]
    }

    fn row() -> Vec<Value> {
        vec![
            Value::Int32(7),
            Value::Text("ada".into()),
            Value::Float64(2.5),
        ]
    }

    #[test]
    fn test_column_lookup_and_comparison() -> DbResult<()> {
        let expr = E::column("id").eq(E::literal(Value::Int32(7)));
        assert_eq!(
            evaluate(&expr, &row(), &schema())?,
            Value::Boolean(true)
        );
        Ok(())
    }

    #[test]
    fn test_arithmetic_widening() -> DbResult<()> {
        let expr = E::BinaryOp {
            left: Box::new(E::column("id")),
            op: BinaryOperator::Plus,
            right: Box::new(E::column("score")),
        };
        assert_eq!(evaluate(&expr, &row(), &schema())?, Value::Float64(9.5));
        Ok(())
    }

    #[test]
    fn test_division_by_zero() {
        let expr = E::BinaryOp {
            left: Box::new(E::literal(Value::Int32(1))),
            op: BinaryOperator::Divide,
            right: Box::new(E::literal(Value::Int32(0))),
        };
        assert!(evaluate(&expr, &row(), &schema()).is_err());
    }

    #[test]
    fn test_null_propagation() -> DbResult<()> {
        let expr = E::literal(Value::Null).eq(E::literal(Value::Int32(1)));
        assert_eq!(evaluate(&expr, &row(), &schema())?, Value::Null);
        assert!(!truthy(&Value::Null)?);
        Ok(())
    }

    #[test]
    fn test_three_valued_logic() -> DbResult<()> {
        let null_and_false = E::BinaryOp {
            left: Box::new(E::literal(Value::Null)),
            op: BinaryOperator::And,
            right: Box::new(E::literal(Value::Boolean(false))),
        };
        assert_eq!(
            evaluate(&null_and_false, &row(), &schema())?,
            Value::Boolean(false)
        );
        let null_or_true = E::BinaryOp {
            left: Box::new(E::literal(Value::Null)),
            op: BinaryOperator::Or,
            right: Box::new(E::literal(Value::Boolean(true))),
        };
        assert_eq!(
            evaluate(&null_or_true, &row(), &schema())?,
            Value::Boolean(true)
        );
        Ok(())
    }

    #[test]
    fn test_qualified_resolution() -> DbResult<()> {
        let joined = vec![
            ColumnInfo::new("u.id", DataType::Int32),
            ColumnInfo::new("o.id", DataType::Int32),
            ColumnInfo::new("o.total", DataType::Int32),
        ];
        let r = vec![Value::Int32(1), Value::Int32(2), Value::Int32(30)];

        let qualified = E::QualifiedColumn("o".into(), "id".into());
        assert_eq!(evaluate(&qualified, &r, &joined)?, Value::Int32(2));

        // Unqualified "total" is unambiguous; "id" is not.
        assert_eq!(
            evaluate(&E::column("total"), &r, &joined)?,
            Value::Int32(30)
        );
        assert!(matches!(
            evaluate(&E::column("id"), &r, &joined),
            Err(DbError::QueryPlan(_))
        ));
        Ok(())
    }

    #[test]
    fn test_scalar_functions() -> DbResult<()> {
        let expr = E::Function {
            name: "upper".into(),
            args: vec![E::column("name")],
        };
        assert_eq!(
            evaluate(&expr, &row(), &schema())?,
            Value::Text("ADA".into())
        );
        let expr = E::Function {
            name: "nope".into(),
            args: vec![],
        };
        assert!(matches!(
            evaluate(&expr, &row(), &schema()),
            Err(DbError::QueryPlan(_))
        ));
        Ok(())
    }

    #[test]
    fn test_is_null() -> DbResult<()> {
        let expr = E::IsNull {
            operand: Box::new(E::literal(Value::Null)),
            negated: false,
        };
        assert_eq!(evaluate(&expr, &row(), &schema())?, Value::Boolean(true));
        Ok(())
    }
}
