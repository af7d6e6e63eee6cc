//! Projection: computes output expressions per row. A `*` item expands to
//! every input column.

use crate::access::value::Value;
use crate::error::DbResult;
use crate::executor::{infer_type, ColumnInfo, Executor};
use crate::expression::eval::evaluate;
use crate::sql::ast::Expression;

pub struct ProjectionExecutor {
    input: Box<dyn Executor>,
    items: Vec<(Expression, String)>,
    schema: Vec<ColumnInfo>,
}

impl ProjectionExecutor {
    pub fn new(input: Box<dyn Executor>, items: Vec<(Expression, String)>) -> Self {
        Self {
            input,
            items,
            schema: Vec::new(),
        }
    }

    fn is_star(expr: &Expression) -> bool {
        matches!(expr, Expression::Column(name) if name == "*")
    }
}

impl Executor for ProjectionExecutor {
    fn init(&mut self) -> DbResult<()> {
        self.input.init()?;
        let input_schema = self.input.output_schema().to_vec();
        self.schema = self
            .items
            .iter()
            .flat_map(|(expr, name)| {
                if Self::is_star(expr) {
                    input_schema.clone()
                } else {
                    vec![ColumnInfo::new(name.clone(), infer_type(expr, &input_schema))]
                }
            })
            .collect();
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Vec<Value>>> {
        let Some(row) = self.input.next()? else {
            return Ok(None);
        };
        let schema = self.input.output_schema();
        let mut out = Vec::with_capacity(self.schema.len());
        for (expr, _) in &self.items {
            if Self::is_star(expr) {
                out.extend(row.iter().cloned());
            } else {
                out.push(evaluate(expr, &row, schema)?);
            }
        }
        Ok(Some(out))
    }

    fn output_schema(&self) -> &[ColumnInfo] {
        &self.schema
    }
}
