//! Literal rows, for SELECT without FROM.

use crate::access::value::Value;
use crate::error::DbResult;
use crate::executor::{infer_type, ColumnInfo, Executor};
use crate::expression::eval::evaluate;
use crate::sql::ast::Expression;

pub struct ValuesExecutor {
    rows: Vec<Vec<Expression>>,
    names: Vec<String>,
    schema: Vec<ColumnInfo>,
    cursor: usize,
}

impl ValuesExecutor {
    pub fn new(rows: Vec<Vec<Expression>>, names: Vec<String>) -> Self {
        Self {
            rows,
            names,
            schema: Vec::new(),
            cursor: 0,
        }
    }
}

impl Executor for ValuesExecutor {
    fn init(&mut self) -> DbResult<()> {
        let first = self.rows.first().cloned().unwrap_or_default();
        self.schema = self
            .names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let dt = first
                    .get(i)
                    .map(|e| infer_type(e, &[]))
                    .unwrap_or(crate::access::value::DataType::Text);
                ColumnInfo::new(name.clone(), dt)
            })
            .collect();
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Vec<Value>>> {
        let Some(row) = self.rows.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        let values = row
            .iter()
            .map(|e| evaluate(e, &[], &[]))
            .collect::<DbResult<Vec<Value>>>()?;
        Ok(Some(values))
    }

    fn output_schema(&self) -> &[ColumnInfo] {
        &self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::ast::{BinaryOperator, Expression as E};

    #[test]
    fn test_constant_row() -> DbResult<()> {
        let rows = vec![vec![E::BinaryOp {
            left: Box::new(E::literal(Value::Int32(1))),
            op: BinaryOperator::Plus,
            right: Box::new(E::literal(Value::Int32(1))),
        }]];
        let mut exec = ValuesExecutor::new(rows, vec!["two".into()]);
        exec.init()?;
        assert_eq!(exec.next()?, Some(vec![Value::Int32(2)]));
        assert_eq!(exec.next()?, None);
        Ok(())
    }
}
