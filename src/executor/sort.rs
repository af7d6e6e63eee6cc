//! ORDER BY: materializes the input and sorts it.

use crate::access::value::Value;
use crate::error::DbResult;
use crate::executor::{ColumnInfo, Executor};
use crate::expression::eval::evaluate;
use crate::sql::ast::Expression;
use std::cmp::Ordering;

pub struct SortExecutor {
    input: Box<dyn Executor>,
    keys: Vec<(Expression, bool)>,
    sorted: Option<std::vec::IntoIter<Vec<Value>>>,
}

impl SortExecutor {
    pub fn new(input: Box<dyn Executor>, keys: Vec<(Expression, bool)>) -> Self {
        Self {
            input,
            keys,
            sorted: None,
        }
    }
}

impl Executor for SortExecutor {
    fn init(&mut self) -> DbResult<()> {
        self.input.init()?;
        let schema = self.input.output_schema().to_vec();

        // Materialize rows together with their precomputed sort keys.
        let mut rows: Vec<(Vec<Value>, Vec<Value>)> = Vec::new();
        while let Some(row) = self.input.next()? {
            let key = self
                .keys
                .iter()
                .map(|(expr, _)| evaluate(expr, &row, &schema))
                .collect::<DbResult<Vec<Value>>>()?;
            rows.push((key, row));
        }

        let directions: Vec<bool> = self.keys.iter().map(|(_, asc)| *asc).collect();
        rows.sort_by(|(a, _), (b, _)| {
            for ((x, y), asc) in a.iter().zip(b.iter()).zip(&directions) {
                let ord = compare_with_nulls(x, y);
                let ord = if *asc { ord } else { ord.reverse() };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });

        self.sorted = Some(
            rows.into_iter()
                .map(|(_, row)| row)
                .collect::<Vec<_>>()
                .into_iter(),
        );
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Vec<Value>>> {
        Ok(self.sorted.as_mut().and_then(|it| it.next()))
    }

    fn output_schema(&self) -> &[ColumnInfo] {
        self.input.output_schema()
    }
}

/// NULLs sort first; incomparable values keep their input order.
fn compare_with_nulls(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.compare(b).unwrap_or(Ordering::Equal),
    }
}
