//! # Index Naming
//!
//! Pure mapping from `(table, timestamp)` to the physical index that holds
//! the document: `{prefix}-{table}-{bucket label}`, where the label is the
//! UTC start of the timestamp's bucket. Names parse back into their bucket
//! span, so the shards intersecting a time window can be picked out of an
//! index listing without enumerating every bucket in between.

use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveDateTime, Utc};
use ct_core::{QueryStoreError, Result};
use serde::{Deserialize, Serialize};

const HOUR_MS: i64 = 3_600_000;
const DAY_MS: i64 = 86_400_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardPeriod {
    Hourly,
    #[default]
    Daily,
    Monthly,
}

impl ShardPeriod {
    fn label_format(&self) -> &'static str {
        match self {
            Self::Hourly => "%Y.%m.%d.%H",
            Self::Daily => "%Y.%m.%d",
            Self::Monthly => "%Y.%m",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexNaming {
    prefix: String,
    period: ShardPeriod,
}

impl IndexNaming {
    pub fn new(prefix: impl Into<String>, period: ShardPeriod) -> Self {
        Self {
            prefix: prefix.into(),
            period,
        }
    }

    fn table_prefix(&self, table: &str) -> String {
        format!("{}-{}-", self.prefix, table)
    }

    /// Start of the bucket containing `ts`, epoch millis UTC.
    pub fn bucket_start(&self, ts: i64) -> Option<i64> {
        match self.period {
            ShardPeriod::Hourly => Some(ts - ts.rem_euclid(HOUR_MS)),
            ShardPeriod::Daily => Some(ts - ts.rem_euclid(DAY_MS)),
            ShardPeriod::Monthly => {
                let dt = DateTime::<Utc>::from_timestamp_millis(ts)?;
                let first = NaiveDate::from_ymd_opt(dt.year(), dt.month(), 1)?;
                Some(first.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis())
            }
        }
    }

    /// Start of the bucket following the one starting at `start`.
    pub fn next_bucket(&self, start: i64) -> Option<i64> {
        match self.period {
            ShardPeriod::Hourly => start.checked_add(HOUR_MS),
            ShardPeriod::Daily => start.checked_add(DAY_MS),
            ShardPeriod::Monthly => {
                let dt = DateTime::<Utc>::from_timestamp_millis(start)?;
                let next = dt.date_naive().checked_add_months(Months::new(1))?;
                Some(next.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis())
            }
        }
    }

    fn label(&self, ts: i64) -> Option<String> {
        let start = self.bucket_start(ts)?;
        let dt = DateTime::<Utc>::from_timestamp_millis(start)?;
        Some(dt.format(self.period.label_format()).to_string())
    }

    /// The single index a document with timestamp `ts` is written to.
    pub fn index_for(&self, table: &str, ts: i64) -> Result<String> {
        let label = self
            .label(ts)
            .ok_or_else(|| QueryStoreError::invalid(format!("timestamp {} is out of range", ts)))?;
        Ok(format!("{}{}", self.table_prefix(table), label))
    }

    /// Parse an index name of `table` back into its `[start, end)` span.
    /// Names belonging to other tables or periods yield `None`.
    pub fn bucket_of(&self, table: &str, index: &str) -> Option<(i64, i64)> {
        let label = index.strip_prefix(&self.table_prefix(table))?;
        let start = match self.period {
            ShardPeriod::Hourly => {
                NaiveDateTime::parse_from_str(&format!("{}.00", label), "%Y.%m.%d.%H.%M").ok()?
            }
            ShardPeriod::Daily => NaiveDate::parse_from_str(label, "%Y.%m.%d")
                .ok()?
                .and_hms_opt(0, 0, 0)?,
            ShardPeriod::Monthly => NaiveDate::parse_from_str(&format!("{}.01", label), "%Y.%m.%d")
                .ok()?
                .and_hms_opt(0, 0, 0)?,
        }
        .and_utc()
        .timestamp_millis();

        // Reject unpadded or otherwise non-canonical labels.
        if self.label(start)? != label {
            return None;
        }
        Some((start, self.next_bucket(start)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TS: i64 = 1_397_658_117_000; // 2014-04-16T14:21:57Z

    #[test]
    fn test_index_for_each_period() {
        let daily = IndexNaming::new("cantata", ShardPeriod::Daily);
        let hourly = IndexNaming::new("cantata", ShardPeriod::Hourly);
        let monthly = IndexNaming::new("cantata", ShardPeriod::Monthly);
        assert_eq!(daily.index_for("test-app", TS).unwrap(), "cantata-test-app-2014.04.16");
        assert_eq!(hourly.index_for("test-app", TS).unwrap(), "cantata-test-app-2014.04.16.14");
        assert_eq!(monthly.index_for("test-app", TS).unwrap(), "cantata-test-app-2014.04");
    }

    #[test]
    fn test_routing_is_pure() {
        let naming = IndexNaming::new("cantata", ShardPeriod::Daily);
        let first = naming.index_for("events", TS).unwrap();
        for _ in 0..3 {
            assert_eq!(naming.index_for("events", TS).unwrap(), first);
        }
        assert_eq!(naming.index_for("events", TS + 1_004).unwrap(), first);
        assert_ne!(naming.index_for("events", TS + DAY_MS).unwrap(), first);
    }

    #[test]
    fn test_bucket_of_round_trips() {
        for period in [ShardPeriod::Hourly, ShardPeriod::Daily, ShardPeriod::Monthly] {
            let naming = IndexNaming::new("cantata", period);
            let index = naming.index_for("events", TS).unwrap();
            let (start, end) = naming.bucket_of("events", &index).unwrap();
            assert!(start <= TS && TS < end, "{:?}", period);
            assert_eq!(naming.bucket_start(TS), Some(start));
        }
    }

    #[test]
    fn test_monthly_buckets_follow_calendar() {
        let naming = IndexNaming::new("cantata", ShardPeriod::Monthly);
        let (start, end) = naming.bucket_of("events", "cantata-events-2014.02").unwrap();
        assert_eq!(end - start, 28 * DAY_MS);
    }

    #[test]
    fn test_bucket_of_rejects_foreign_names() {
        let naming = IndexNaming::new("cantata", ShardPeriod::Daily);
        assert!(naming.bucket_of("app", "cantata-app-x-2014.04.16").is_none());
        assert!(naming.bucket_of("app", "cantata-app-2014.4.16").is_none());
        assert!(naming.bucket_of("app", "other-app-2014.04.16").is_none());
        assert!(naming.bucket_of("app-x", "cantata-app-x-2014.04.16").is_some());
    }
}
