//! Hash aggregation: groups buffered in memory keyed by the GROUP BY
//! values. Without GROUP BY the whole input is one group (and aggregating
//! an empty input still yields that one group, e.g. COUNT(*) = 0).

use crate::access::value::{DataType, Value};
use crate::error::DbResult;
use crate::executor::{infer_type, ColumnInfo, Executor};
use crate::expression::eval::evaluate;
use crate::planner::logical::{AggFunc, AggregateExpr};
use crate::sql::ast::Expression;
use std::collections::HashMap;

pub struct AggregateExecutor {
    input: Box<dyn Executor>,
    group_by: Vec<(Expression, String)>,
    aggregates: Vec<AggregateExpr>,
    schema: Vec<ColumnInfo>,
    results: Option<std::vec::IntoIter<Vec<Value>>>,
}

/// Running state of one aggregate within one group.
#[derive(Debug, Clone)]
struct Accumulator {
    count: i64,
    sum: f64,
    sum_is_float: bool,
    min: Option<Value>,
    max: Option<Value>,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            sum_is_float: false,
            min: None,
            max: None,
        }
    }

    fn fold(&mut self, value: &Value) {
        if value.is_null() {
            return;
        }
        self.count += 1;
        match value {
            Value::Int32(v) => self.sum += *v as f64,
            Value::Int64(v) => self.sum += *v as f64,
            Value::Float64(v) => {
                self.sum += v;
                self.sum_is_float = true;
            }
            _ => {}
        }
        let replace_min = match &self.min {
            Some(current) => matches!(
                value.compare(current),
                Some(std::cmp::Ordering::Less)
            ),
            None => true,
        };
        if replace_min {
            self.min = Some(value.clone());
        }
        let replace_max = match &self.max {
            Some(current) => matches!(
                value.compare(current),
                Some(std::cmp::Ordering::Greater)
            ),
            None => true,
        };
        if replace_max {
            self.max = Some(value.clone());
        }
    }

    fn finish(&self, func: AggFunc) -> Value {
        match func {
            AggFunc::Count => Value::Int64(self.count),
            AggFunc::Sum => {
                if self.count == 0 {
                    Value::Null
                } else if self.sum_is_float {
                    Value::Float64(self.sum)
                } else {
                    Value::Int64(self.sum as i64)
                }
            }
            AggFunc::Avg => {
                if self.count == 0 {
                    Value::Null
                } else {
                    Value::Float64(self.sum / self.count as f64)
                }
            }
            AggFunc::Min => self.min.clone().unwrap_or(Value::Null),
            AggFunc::Max => self.max.clone().unwrap_or(Value::Null),
        }
    }
}

impl AggregateExecutor {
    pub fn new(
        input: Box<dyn Executor>,
        group_by: Vec<(Expression, String)>,
        aggregates: Vec<AggregateExpr>,
    ) -> Self {
        Self {
            input,
            group_by,
            aggregates,
            schema: Vec::new(),
            results: None,
        }
    }
}

impl Executor for AggregateExecutor {
    fn init(&mut self) -> DbResult<()> {
        self.input.init()?;
        let input_schema = self.input.output_schema().to_vec();

        self.schema = self
            .group_by
            .iter()
            .map(|(expr, name)| ColumnInfo::new(name.clone(), infer_type(expr, &input_schema)))
            .chain(self.aggregates.iter().map(|agg| {
                let dt = match agg.func {
                    AggFunc::Count => DataType::Int64,
                    AggFunc::Avg => DataType::Float64,
                    AggFunc::Sum => DataType::Float64,
                    AggFunc::Min | AggFunc::Max => agg
                        .arg
                        .as_ref()
                        .map(|a| infer_type(a, &input_schema))
                        .unwrap_or(DataType::Int64),
                };
                ColumnInfo::new(agg.alias.clone(), dt)
            }))
            .collect();

        // Group rows; insertion order of groups is preserved for output.
        let mut groups: HashMap<String, usize> = HashMap::new();
        let mut group_rows: Vec<(Vec<Value>, Vec<Accumulator>)> = Vec::new();
        while let Some(row) = self.input.next()? {
            let key_values = self
                .group_by
                .iter()
                .map(|(expr, _)| evaluate(expr, &row, &input_schema))
                .collect::<DbResult<Vec<Value>>>()?;
            let key = format!("{:?}", key_values);
            let slot = match groups.get(&key) {
                Some(&slot) => slot,
                None => {
                    groups.insert(key, group_rows.len());
                    group_rows.push((
                        key_values,
                        vec![Accumulator::new(); self.aggregates.len()],
                    ));
                    group_rows.len() - 1
                }
            };

            for (agg, acc) in self.aggregates.iter().zip(&mut group_rows[slot].1) {
                match &agg.arg {
                    Some(arg) => acc.fold(&evaluate(arg, &row, &input_schema)?),
                    // COUNT(*) counts rows, not values.
                    None => acc.count += 1,
                }
            }
        }

        // A global aggregate over zero rows still produces one row.
        if group_rows.is_empty() && self.group_by.is_empty() {
            group_rows.push((Vec::new(), vec![Accumulator::new(); self.aggregates.len()]));
        }

        let results: Vec<Vec<Value>> = group_rows
            .into_iter()
            .map(|(mut key_values, accs)| {
                key_values.extend(
                    self.aggregates
                        .iter()
                        .zip(&accs)
                        .map(|(agg, acc)| acc.finish(agg.func)),
                );
                key_values
            })
            .collect();
        self.results = Some(results.into_iter());
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Vec<Value>>> {
        Ok(self.results.as_mut().and_then(|it| it.next()))
    }

    fn output_schema(&self) -> &[ColumnInfo] {
        &self.schema
    }
}
