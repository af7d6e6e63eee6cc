//! k-nearest-neighbor search operator. Output rows are (id, distance),
//! ascending by distance.

use crate::access::value::{DataType, Value};
use crate::access::vector::VectorMatch;
use crate::error::DbResult;
use crate::executor::{ColumnInfo, ExecutionContext, Executor};

pub struct VectorSearchExecutor {
    collection: String,
    query: Vec<f32>,
    k: usize,
    ctx: ExecutionContext,
    schema: Vec<ColumnInfo>,
    matches: Option<std::vec::IntoIter<VectorMatch>>,
}

impl VectorSearchExecutor {
    pub fn new(collection: String, query: Vec<f32>, k: usize, ctx: ExecutionContext) -> Self {
        Self {
            collection,
            query,
            k,
            ctx,
            schema: vec![
                ColumnInfo::new("id", DataType::Text),
                ColumnInfo::new("distance", DataType::Float64),
            ],
            matches: None,
        }
    }
}

impl Executor for VectorSearchExecutor {
    fn init(&mut self) -> DbResult<()> {
        let matches = self
            .ctx
            .vectors
            .search(&self.collection, &self.query, self.k)?;
        self.matches = Some(matches.into_iter());
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Vec<Value>>> {
        Ok(self.matches.as_mut().and_then(|it| it.next()).map(|m| {
            vec![Value::Text(m.id), Value::Float64(m.distance)]
        }))
    }

    fn output_schema(&self) -> &[ColumnInfo] {
        &self.schema
    }
}
