//! Hash join for equi-joins: the smaller side is materialized into a hash
//! table keyed on its join expression, the other side probes it.

use crate::access::value::Value;
use crate::error::DbResult;
use crate::executor::{ColumnInfo, Executor};
use crate::expression::eval::evaluate;
use crate::sql::ast::Expression;
use std::collections::HashMap;

pub struct HashJoinExecutor {
    left: Box<dyn Executor>,
    right: Box<dyn Executor>,
    left_key: Expression,
    right_key: Expression,
    build_left: bool,
    schema: Vec<ColumnInfo>,
    table: HashMap<String, Vec<Vec<Value>>>,
    pending: Vec<Vec<Value>>,
    current_probe: Option<Vec<Value>>,
}

impl HashJoinExecutor {
    pub fn new(
        left: Box<dyn Executor>,
        right: Box<dyn Executor>,
        left_key: Expression,
        right_key: Expression,
        build_left: bool,
    ) -> Self {
        Self {
            left,
            right,
            left_key,
            right_key,
            build_left,
            schema: Vec::new(),
            table: HashMap::new(),
            pending: Vec::new(),
            current_probe: None,
        }
    }
}

impl Executor for HashJoinExecutor {
    fn init(&mut self) -> DbResult<()> {
        self.left.init()?;
        self.right.init()?;
        self.schema = self
            .left
            .output_schema()
            .iter()
            .chain(self.right.output_schema())
            .cloned()
            .collect();

        // Materialize the build side.
        let (build, key_expr) = if self.build_left {
            (&mut self.left, &self.left_key)
        } else {
            (&mut self.right, &self.right_key)
        };
        let build_schema = build.output_schema().to_vec();
        while let Some(row) = build.next()? {
            let key = evaluate(key_expr, &row, &build_schema)?;
            if let Some(normalized) = join_key(&key) {
                self.table.entry(normalized).or_default().push(row);
            }
        }
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Vec<Value>>> {
        loop {
            if let Some(build_row) = self.pending.pop() {
                let probe_row = self.current_probe.as_ref().expect("probe row pending");
                let row = if self.build_left {
                    build_row.iter().chain(probe_row.iter()).cloned().collect()
                } else {
                    probe_row.iter().chain(build_row.iter()).cloned().collect()
                };
                return Ok(Some(row));
            }

            let (probe, key_expr) = if self.build_left {
                (&mut self.right, &self.right_key)
            } else {
                (&mut self.left, &self.left_key)
            };
            let probe_schema = probe.output_schema().to_vec();
            match probe.next()? {
                Some(row) => {
                    let key = evaluate(key_expr, &row, &probe_schema)?;
                    if let Some(normalized) = join_key(&key) {
                        if let Some(matches) = self.table.get(&normalized) {
                            self.pending = matches.clone();
                            self.current_probe = Some(row);
                        }
                    }
                }
                None => return Ok(None),
            }
        }
    }

    fn output_schema(&self) -> &[ColumnInfo] {
        &self.schema
    }
}

/// Canonical key text so numerically-equal values of different widths join.
/// NULL never joins.
fn join_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Int32(v) => Some(format!("i:{}", v)),
        Value::Int64(v) => Some(format!("i:{}", v)),
        Value::Float64(v) => {
            if v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
                Some(format!("i:{}", *v as i64))
            } else {
                Some(format!("f:{}", v))
            }
        }
        Value::Boolean(v) => Some(format!("b:{}", v)),
        Value::Text(v) => Some(format!("s:{}", v)),
        Value::Timestamp(v) => Some(format!("t:{}", v)),
        Value::Binary(v) => Some(format!(
            "x:{}",
            v.iter().map(|b| format!("{:02x}", b)).collect::<String>()
        )),
        Value::Json(_) | Value::Vector(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::value::DataType;
    use crate::catalog::ColumnDef;
    use crate::error::DbResult;
    use crate::executor::seq_scan::SeqScanExecutor;
    use crate::executor::tests_support::TestDb;
    use crate::sql::ast::Expression as E;

    fn setup(db: &TestDb) {
        db.create_users();
        db.commit_user(1, "Alice", 30);
        db.commit_user(2, "Bob", 25);
        db.catalog
            .create_table(
                "orders",
                vec![
                    ColumnDef::new("id", DataType::Int32, false),
                    ColumnDef::new("user_id", DataType::Int32, false),
                ],
                vec!["id".into()],
            )
            .unwrap();
        let def = db.catalog.require_table("orders").unwrap();
        for (id, user_id) in [(100, 1), (101, 2), (102, 2), (103, 9)] {
            let bytes = crate::access::value::serialize_values(
                &[Value::Int32(id), Value::Int32(user_id)],
                &def.column_types(),
            )
            .unwrap();
            let row_id = db.catalog.alloc_row_id(def.id).unwrap();
            let txn = db.txns.begin();
            db.txns.stage_put(txn, def.id, row_id, bytes).unwrap();
            db.txns.commit(txn).unwrap();
        }
    }

    #[test]
    fn test_hash_join_matches() -> DbResult<()> {
        let db = TestDb::new();
        setup(&db);

        let users = SeqScanExecutor::new("users".into(), Some("u".into()), db.context());
        let orders = SeqScanExecutor::new("orders".into(), Some("o".into()), db.context());
        let mut join = HashJoinExecutor::new(
            Box::new(users),
            Box::new(orders),
            E::QualifiedColumn("u".into(), "id".into()),
            E::QualifiedColumn("o".into(), "user_id".into()),
            true,
        );
        join.init()?;
        assert_eq!(join.output_schema().len(), 5);

        let mut pairs = Vec::new();
        while let Some(row) = join.next()? {
            pairs.push((row[0].clone(), row[3].clone()));
        }
        // Order 103 references a missing user and is dropped.
        assert_eq!(pairs.len(), 3);
        assert!(pairs.iter().all(|(u, _)| !u.is_null()));
        Ok(())
    }

    #[test]
    fn test_build_side_choice_does_not_change_output(
    ) -> DbResult<()> {
        let db = TestDb::new();
        setup(&db);

        for build_left in [true, false] {
            let users = SeqScanExecutor::new("users".into(), Some("u".into()), db.context());
            let orders =
                SeqScanExecutor::new("orders".into(), Some("o".into()), db.context());
            let mut join = HashJoinExecutor::new(
                Box::new(users),
                Box::new(orders),
                E::QualifiedColumn("u".into(), "id".into()),
                E::QualifiedColumn("o".into(), "user_id".into()),
                build_left,
            );
            join.init()?;
            assert_eq!(join.output_schema()[0].name, "u.id");
            let mut count = 0;
            while let Some(row) = join.next()? {
                assert_eq!(row.len(), 5);
                count += 1;
            }
            assert_eq!(count, 3);
        }
        Ok(())
    }

    #[test]
    fn test_join_key_normalization() {
        assert_eq!(
            join_key(&Value::Int32(2)),
            join_key(&Value::Int64(2))
        );
        assert_eq!(
            join_key(&Value::Int32(2)),
            join_key(&Value::Float64(2.0))
        );
        assert_eq!(join_key(&Value::Null), None);
    }
}
