//! The `histogram` action: document counts per time period.

use super::{check_request, table_mapping, Action, ActionContext, PreparedRequest};
use async_trait::async_trait;
use ct_core::filter::{combine, timestamp_window};
use ct_core::{
    ActionRequest, ActionResponse, Filter, HistogramCount, HistogramRequest, QueryStoreError,
    Result, TimeWindow, TIMESTAMP_FIELD,
};
use std::collections::BTreeMap;

pub struct HistogramAction;

#[async_trait]
impl Action for HistogramAction {
    fn opcode(&self) -> &'static str {
        "histogram"
    }

    async fn validate(&self, request: &ActionRequest, ctx: &ActionContext) -> Result<PreparedRequest> {
        let histogram: HistogramRequest = request.parse()?;
        if histogram.from > histogram.to {
            return Err(QueryStoreError::invalid(format!(
                "histogram window is inverted: {} > {}",
                histogram.from, histogram.to
            )));
        }
        let mapping = table_mapping(ctx, &histogram.table).await?;
        let filters = check_request(&mapping, &histogram.filters, &[])?;
        PreparedRequest::new(self.opcode(), &HistogramRequest { filters, ..histogram })
    }

    async fn execute(&self, request: &PreparedRequest, ctx: &ActionContext) -> Result<ActionResponse> {
        let histogram: HistogramRequest = request.parse()?;
        let range = Filter::between(TIMESTAMP_FIELD, histogram.from, histogram.to);
        let clause = combine(&histogram.filters, histogram.combiner).and(range.to_clause());
        let window = timestamp_window(&histogram.filters, histogram.combiner)
            .intersect(&TimeWindow::between(histogram.from, histogram.to));
        let documents = ctx.index.scan(&histogram.table, &clause, window).await?;

        let mut buckets: BTreeMap<i64, u64> = BTreeMap::new();
        for document in &documents {
            *buckets.entry(histogram.period.bucket(document.timestamp)).or_default() += 1;
        }
        let counts = buckets
            .into_iter()
            .map(|(period, count)| HistogramCount { period, count })
            .collect();
        Ok(ActionResponse::Histogram { counts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::testing;
    use ct_core::{FilterCombinerType, HistogramPeriod};
    use serde_json::json;

    fn request(from: i64, to: i64, period: HistogramPeriod, filters: Vec<Filter>) -> ActionRequest {
        let body = HistogramRequest {
            table: testing::TABLE.into(),
            filters,
            combiner: FilterCombinerType::And,
            from,
            to,
            period,
        };
        ActionRequest::wrap("histogram", &body).unwrap()
    }

    async fn counts(request: ActionRequest) -> Result<Vec<HistogramCount>> {
        let ctx = testing::context().await;
        let prepared = HistogramAction.validate(&request, &ctx).await?;
        match HistogramAction.execute(&prepared, &ctx).await? {
            ActionResponse::Histogram { counts } => Ok(counts),
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_counts_per_minute() {
        let got = counts(request(0, i64::MAX, HistogramPeriod::Minutes, vec![]))
            .await
            .unwrap();
        assert_eq!(
            got,
            vec![HistogramCount {
                period: 1_397_658_060_000,
                count: 9
            }]
        );
    }

    #[tokio::test]
    async fn test_window_and_filters_restrict_counts() {
        let got = counts(request(
            1_397_658_118_000,
            1_397_658_118_003,
            HistogramPeriod::Hours,
            vec![Filter::equals("os", "android")],
        ))
        .await
        .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].count, 3);
        assert_eq!(got[0].period, 1_397_656_800_000);
    }

    #[tokio::test]
    async fn test_empty_window_has_no_buckets() {
        let got = counts(request(0, 1_000, HistogramPeriod::Days, vec![])).await.unwrap();
        assert!(got.is_empty());
    }

    #[tokio::test]
    async fn test_inverted_window_is_invalid() {
        let err = counts(request(10, 5, HistogramPeriod::Days, vec![])).await.unwrap_err();
        assert!(matches!(err, QueryStoreError::InvalidRequest(_)));
        let wire = serde_json::to_value(request(10, 5, HistogramPeriod::Days, vec![])).unwrap();
        assert_eq!(wire["period"], json!("days"));
    }
}
