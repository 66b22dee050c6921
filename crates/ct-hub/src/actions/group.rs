//! The `group` action: nested document counts keyed by field values.

use super::{check_request, table_mapping, Action, ActionContext, PreparedRequest};
use async_trait::async_trait;
use ct_core::filter::{combine, timestamp_window};
use ct_core::{ActionRequest, ActionResponse, Document, GroupRequest, QueryStoreError, Result};
use serde_json::{Map, Value};

pub struct GroupAction;

#[async_trait]
impl Action for GroupAction {
    fn opcode(&self) -> &'static str {
        "group"
    }

    async fn validate(&self, request: &ActionRequest, ctx: &ActionContext) -> Result<PreparedRequest> {
        let group: GroupRequest = request.parse()?;
        if group.nesting.is_empty() {
            return Err(QueryStoreError::invalid("group requires at least one nesting field"));
        }
        let mapping = table_mapping(ctx, &group.table).await?;
        let fields: Vec<&str> = group.nesting.iter().map(String::as_str).collect();
        let filters = check_request(&mapping, &group.filters, &fields)?;
        PreparedRequest::new(self.opcode(), &GroupRequest { filters, ..group })
    }

    async fn execute(&self, request: &PreparedRequest, ctx: &ActionContext) -> Result<ActionResponse> {
        let group: GroupRequest = request.parse()?;
        let clause = combine(&group.filters, group.combiner);
        let window = timestamp_window(&group.filters, group.combiner);
        let documents = ctx.index.scan(&group.table, &clause, window).await?;

        let mut result = Map::new();
        for document in &documents {
            if let Some(keys) = group_keys(document, &group.nesting) {
                increment(&mut result, &keys);
            }
        }
        Ok(ActionResponse::Group { result })
    }
}

/// One key per nesting field, or `None` if the document lacks any of them.
fn group_keys(document: &Document, nesting: &[String]) -> Option<Vec<String>> {
    nesting
        .iter()
        .map(|field| {
            document.field(field).map(|value| match value.as_ref() {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
        })
        .collect()
}

fn increment(node: &mut Map<String, Value>, keys: &[String]) {
    let Some((head, rest)) = keys.split_first() else {
        return;
    };
    if rest.is_empty() {
        let count = node.entry(head.clone()).or_insert(Value::from(0u64));
        *count = Value::from(count.as_u64().unwrap_or(0) + 1);
    } else if let Value::Object(child) = node
        .entry(head.clone())
        .or_insert_with(|| Value::Object(Map::new()))
    {
        increment(child, rest);
    }
}
