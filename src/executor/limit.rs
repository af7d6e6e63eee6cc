//! LIMIT/OFFSET.

use crate::access::value::Value;
use crate::error::DbResult;
use crate::executor::{ColumnInfo, Executor};

pub struct LimitExecutor {
    input: Box<dyn Executor>,
    limit: Option<u64>,
    offset: u64,
    skipped: u64,
    produced: u64,
}

impl LimitExecutor {
    pub fn new(input: Box<dyn Executor>, limit: Option<u64>, offset: Option<u64>) -> Self {
        Self {
            input,
            limit,
            offset: offset.unwrap_or(0),
            skipped: 0,
            produced: 0,
        }
    }
}

impl Executor for LimitExecutor {
    fn init(&mut self) -> DbResult<()> {
        self.input.init()
    }

    fn next(&mut self) -> DbResult<Option<Vec<Value>>> {
        if let Some(limit) = self.limit {
            if self.produced >= limit {
                return Ok(None);
            }
        }
        while self.skipped < self.offset {
            if self.input.next()?.is_none() {
                return Ok(None);
            }
            self.skipped += 1;
        }
        match self.input.next()? {
            Some(row) => {
                self.produced += 1;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    fn output_schema(&self) -> &[ColumnInfo] {
        self.input.output_schema()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::seq_scan::SeqScanExecutor;
    use crate::executor::tests_support::TestDb;

    #[test]
    fn test_limit_and_offset() -> DbResult<()> {
        let db = TestDb::new();
        db.create_users();
        for i in 1..=5 {
            db.commit_user(i, &format!("u{}", i), 20 + i);
        }

        let scan = SeqScanExecutor::new("users".into(), None, db.context());
        let mut limit = LimitExecutor::new(Box::new(scan), Some(2), Some(1));
        limit.init()?;

        let mut ids = Vec::new();
        while let Some(row) = limit.next()? {
            ids.push(row[0].clone());
        }
        assert_eq!(ids, vec![Value::Int32(2), Value::Int32(3)]);
        Ok(())
    }
}
