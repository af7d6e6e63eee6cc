//! Adjacency traversal operator: the neighbors of one node over one
//! relation, one row per target node id.

use crate::access::graph::NeighborCursor;
use crate::access::value::{DataType, Value};
use crate::error::DbResult;
use crate::executor::{ColumnInfo, ExecutionContext, Executor};

pub struct GraphNeighborsExecutor {
    graph: String,
    node: String,
    relation: String,
    ctx: ExecutionContext,
    schema: Vec<ColumnInfo>,
    cursor: Option<NeighborCursor>,
}

impl GraphNeighborsExecutor {
    pub fn new(graph: String, node: String, relation: String, ctx: ExecutionContext) -> Self {
        Self {
            graph,
            node,
            relation,
            ctx,
            schema: vec![ColumnInfo::new("neighbor", DataType::Text)],
            cursor: None,
        }
    }
}

impl Executor for GraphNeighborsExecutor {
    fn init(&mut self) -> DbResult<()> {
        self.cursor = Some(
            self.ctx
                .graph
                .neighbors(&self.graph, &self.node, &self.relation),
        );
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Vec<Value>>> {
        Ok(self
            .cursor
            .as_mut()
            .and_then(|c| c.next())
            .map(|id| vec![Value::Text(id)]))
    }

    fn output_schema(&self) -> &[ColumnInfo] {
        &self.schema
    }
}
