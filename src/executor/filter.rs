//! Predicate filter.

use crate::access::value::Value;
use crate::error::DbResult;
use crate::executor::{ColumnInfo, Executor};
use crate::expression::eval::{evaluate, truthy};
use crate::sql::ast::Expression;

pub struct FilterExecutor {
    input: Box<dyn Executor>,
    predicate: Expression,
}

impl FilterExecutor {
    pub fn new(input: Box<dyn Executor>, predicate: Expression) -> Self {
        Self { input, predicate }
    }
}

impl Executor for FilterExecutor {
    fn init(&mut self) -> DbResult<()> {
        self.input.init()
    }

    fn next(&mut self) -> DbResult<Option<Vec<Value>>> {
        while let Some(row) = self.input.next()? {
            let verdict = evaluate(&self.predicate, &row, self.input.output_schema())?;
            if truthy(&verdict)? {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn output_schema(&self) -> &[ColumnInfo] {
        self.input.output_schema()
    }
}
