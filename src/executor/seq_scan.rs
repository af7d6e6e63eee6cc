//! Full table scan under snapshot visibility.

use crate::access::TableScanner;
use crate::access::value::Value;
use crate::catalog::TableDef;
use crate::error::{DbError, DbResult};
use crate::executor::{scan_schema, ColumnInfo, ExecutionContext, Executor};

pub struct SeqScanExecutor {
    table: String,
    qualifier: Option<String>,
    ctx: ExecutionContext,
    scanner: Option<TableScanner>,
    schema: Vec<ColumnInfo>,
}

impl SeqScanExecutor {
    pub fn new(table: String, qualifier: Option<String>, ctx: ExecutionContext) -> Self {
        Self {
            table,
            qualifier,
            ctx,
            scanner: None,
            schema: Vec::new(),
        }
    }

    fn def(&self) -> DbResult<TableDef> {
        self.ctx.catalog.require_table(&self.table)
    }
}

impl Executor for SeqScanExecutor {
    fn init(&mut self) -> DbResult<()> {
        let def = self.def()?;
        self.schema = scan_schema(&def, &self.qualifier);
        let snapshot = self.ctx.txns.snapshot_of(self.ctx.txn)?;
        let staged = self.ctx.txns.staged_rows(self.ctx.txn, def.id);
        self.scanner = Some(TableScanner::new(
            self.ctx.pool.clone(),
            def,
            &self.ctx.versions,
            snapshot,
            staged,
        ));
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Vec<Value>>> {
        let scanner = self
            .scanner
            .as_mut()
            .ok_or_else(|| DbError::InvalidArgument("executor not initialized".into()))?;
        match scanner.next() {
            Some(Ok((_, values))) => Ok(Some(values)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    fn output_schema(&self) -> &[ColumnInfo] {
        &self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::value::DataType;
    use crate::executor::tests_support::TestDb;

    #[test]
    fn test_scan_returns_committed_rows() -> DbResult<()> {
        let db = TestDb::new();
        db.create_users();
        db.commit_user(1, "Alice", 30);
        db.commit_user(2, "Bob", 25);

        let ctx = db.context();
        let mut scan = SeqScanExecutor::new("users".into(), None, ctx);
        scan.init()?;
        assert_eq!(scan.output_schema()[0].name, "id");
        assert_eq!(scan.output_schema()[0].data_type, DataType::Int32);

        let mut ids = Vec::new();
        while let Some(row) = scan.next()? {
            ids.push(row[0].clone());
        }
        assert_eq!(ids, vec![Value::Int32(1), Value::Int32(2)]);
        Ok(())
    }

    #[test]
    fn test_qualified_schema() -> DbResult<()> {
        let db = TestDb::new();
        db.create_users();
        let mut scan = SeqScanExecutor::new("users".into(), Some("u".into()), db.context());
        scan.init()?;
        assert_eq!(scan.output_schema()[0].name, "u.id");
        Ok(())
    }

    #[test]
    fn test_missing_table() {
        let db = TestDb::new();
        let mut scan = SeqScanExecutor::new("ghost".into(), None, db.context());
        assert!(matches!(scan.init(), Err(DbError::NotFound(_))));
    }
}
