//! The `query` action: filtered, sorted, paginated document retrieval.

use super::{check_request, table_mapping, Action, ActionContext, PreparedRequest};
use async_trait::async_trait;
use ct_core::filter::{combine, timestamp_window};
use ct_core::{ActionRequest, ActionResponse, Query, QueryStoreError, Result};
use ct_store::TableSearch;
use tracing::debug;

pub struct QueryAction;

#[async_trait]
impl Action for QueryAction {
    fn opcode(&self) -> &'static str {
        "query"
    }

    async fn validate(&self, request: &ActionRequest, ctx: &ActionContext) -> Result<PreparedRequest> {
        let query: Query = request.parse()?;
        let mapping = table_mapping(ctx, &query.table).await?;
        let sort_field: Vec<&str> = query.sort.iter().map(|s| s.field.as_str()).collect();
        if sort_field.iter().any(|f| f.trim().is_empty()) {
            return Err(QueryStoreError::invalid("sort field must not be empty"));
        }
        let filters = check_request(&mapping, &query.filters, &sort_field)?;
        PreparedRequest::new(self.opcode(), &Query { filters, ..query })
    }

    async fn execute(&self, request: &PreparedRequest, ctx: &ActionContext) -> Result<ActionResponse> {
        let query: Query = request.parse()?;
        let search = TableSearch {
            clause: combine(&query.filters, query.combiner),
            window: timestamp_window(&query.filters, query.combiner),
            sort: query.sort,
            from: query.from,
            limit: query.limit,
        };
        let documents = ctx.index.search(&query.table, &search).await?;
        debug!("Query on {} returned {} document(s)", query.table, documents.len());
        Ok(ActionResponse::Query { documents })
    }
}
