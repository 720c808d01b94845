use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Timelike, Utc};
use dashmap::DashSet;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::record::{LogRecord, RequestStatus};

/// Bucket granularity for `time_series`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bucket {
    Minute,
    Hour,
    Day,
}

impl Bucket {
    fn duration(self) -> ChronoDuration {
        match self {
            Bucket::Minute => ChronoDuration::minutes(1),
            Bucket::Hour => ChronoDuration::hours(1),
            Bucket::Day => ChronoDuration::days(1),
        }
    }

    /// Truncates `at` to the start of its bucket, in UTC.
    fn truncate(self, at: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Bucket::Minute => Utc
                .with_ymd_and_hms(at.year(), at.month(), at.day(), at.hour(), at.minute(), 0)
                .unwrap(),
            Bucket::Hour => Utc
                .with_ymd_and_hms(at.year(), at.month(), at.day(), at.hour(), 0, 0)
                .unwrap(),
            Bucket::Day => Utc.with_ymd_and_hms(at.year(), at.month(), at.day(), 0, 0, 0).unwrap(),
        }
    }
}

use chrono::Datelike;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub timestamp_ms: i64,
    pub value: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Overview {
    pub total: u64,
    pub successful: u64,
    pub avg_duration_ms: f64,
    pub active_clients_last_hour: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientStat {
    pub client_ip: String,
    pub request_count: u64,
    pub success_rate: f64,
    pub last_seen: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryTypeStat {
    pub query_type: String,
    pub count: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SystemInfo {
    pub version: String,
    pub start_time: DateTime<Utc>,
}

/// Marshaled dashboard snapshot produced by the aggregation scheduler
/// and upserted into the log sink's derived-state slot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub overview: Overview,
    pub requests_last_hour: Vec<TimeSeriesPoint>,
    pub requests_last_day: Vec<TimeSeriesPoint>,
    pub requests_last_week: Vec<TimeSeriesPoint>,
    pub requests_last_month: Vec<TimeSeriesPoint>,
    pub top_clients: Vec<ClientStat>,
    pub query_types: Vec<QueryTypeStat>,
    pub system_info: SystemInfo,
}

#[derive(Clone, Debug, Default)]
pub struct SearchFilter {
    pub domain: Option<String>,
    pub client_ip: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: usize,
    pub offset: usize,
}

/// Durable append-only request log plus derived-state snapshot slot.
/// This trait is the seam a `redis`/`sqlite` backend would sit behind
/// in a real deployment (see `DESIGN.md`).
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Persists `record`. Returns `false` on a genuine storage failure
    /// (spec §4.G: append failures MUST be counted for observability);
    /// a duplicate UUID is idempotent and counts as success.
    async fn append(&self, record: LogRecord) -> bool;
    async fn search(&self, filter: SearchFilter) -> (Vec<LogRecord>, usize);
    async fn count(&self) -> usize;
    async fn purge(&self, older_than: DateTime<Utc>) -> usize;
    async fn top_clients(&self, n: usize) -> Vec<ClientStat>;
    async fn top_query_types(&self, n: usize) -> Vec<QueryTypeStat>;
    async fn time_series(&self, bucket: Bucket, horizon: usize) -> Vec<TimeSeriesPoint>;
    async fn overview(&self) -> Overview;
    async fn put_snapshot(&self, snapshot: MetricsSnapshot);
    async fn get_snapshot(&self) -> Option<MetricsSnapshot>;
}

const MAX_TIME_SERIES_BUCKETS: usize = 75;

/// In-process `LogSink` built on `dashmap`/`parking_lot` rather than an
/// external database. A `DashSet` of seen UUIDs gives O(1) idempotency
/// checks without scanning the record vector.
pub struct InMemoryLogSink {
    records: RwLock<Vec<LogRecord>>,
    seen_uuids: DashSet<String>,
    snapshot: RwLock<Option<MetricsSnapshot>>,
}

impl InMemoryLogSink {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            seen_uuids: DashSet::new(),
            snapshot: RwLock::new(None),
        }
    }
}

impl Default for InMemoryLogSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogSink for InMemoryLogSink {
    /// Idempotent under UUID: a duplicate UUID is a no-op, not a failure.
    async fn append(&self, record: LogRecord) -> bool {
        if !self.seen_uuids.insert(record.uuid.clone()) {
            debug!(uuid = %record.uuid, "duplicate log append ignored");
            return true;
        }
        self.records.write().push(record);
        true
    }

    /// Case-insensitive substring match on domain/client IP, optional
    /// lower bound on timestamp, strictly descending by timestamp.
    async fn search(&self, filter: SearchFilter) -> (Vec<LogRecord>, usize) {
        let domain_needle = filter.domain.as_ref().map(|d| d.to_lowercase());
        let client_needle = filter.client_ip.as_ref().map(|c| c.to_lowercase());

        let records = self.records.read();
        let mut matched: Vec<&LogRecord> = records
            .iter()
            .filter(|r| {
                domain_needle
                    .as_ref()
                    .is_none_or(|needle| r.request.query_name.to_lowercase().contains(needle))
            })
            .filter(|r| {
                client_needle
                    .as_ref()
                    .is_none_or(|needle| r.request.client_addr.to_lowercase().contains(needle))
            })
            .filter(|r| filter.since.is_none_or(|since| r.timestamp >= since))
            .collect();

        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let total = matched.len();

        let page = matched
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .cloned()
            .collect();

        (page, total)
    }

    async fn count(&self) -> usize {
        self.records.read().len()
    }

    /// Bulk delete of records older than `older_than`; deferred in the
    /// sense that it runs off the retention ticker rather than on every
    /// append.
    async fn purge(&self, older_than: DateTime<Utc>) -> usize {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|r| {
            let keep = r.timestamp >= older_than;
            if !keep {
                self.seen_uuids.remove(&r.uuid);
            }
            keep
        });
        before - records.len()
    }

    async fn top_clients(&self, n: usize) -> Vec<ClientStat> {
        let records = self.records.read();
        let mut by_client: HashMap<String, (u64, u64, DateTime<Utc>)> = HashMap::new();

        for record in records.iter() {
            let entry = by_client.entry(record.request.client_addr.clone()).or_insert((
                0,
                0,
                record.timestamp,
            ));
            entry.0 += 1;
            if record.status.is_successful() {
                entry.1 += 1;
            }
            if record.timestamp > entry.2 {
                entry.2 = record.timestamp;
            }
        }

        let mut stats: Vec<ClientStat> = by_client
            .into_iter()
            .map(|(client_ip, (count, successes, last_seen))| ClientStat {
                client_ip,
                request_count: count,
                success_rate: if count == 0 {
                    0.0
                } else {
                    successes as f64 / count as f64
                },
                last_seen,
            })
            .collect();

        stats.sort_by(|a, b| b.request_count.cmp(&a.request_count));
        stats.truncate(n);
        stats
    }

    async fn top_query_types(&self, n: usize) -> Vec<QueryTypeStat> {
        let records = self.records.read();
        let mut by_type: HashMap<String, u64> = HashMap::new();
        for record in records.iter() {
            *by_type.entry(record.request.query_type.clone()).or_insert(0) += 1;
        }

        let mut stats: Vec<QueryTypeStat> = by_type
            .into_iter()
            .map(|(query_type, count)| QueryTypeStat { query_type, count })
            .collect();
        stats.sort_by(|a, b| b.count.cmp(&a.count));
        stats.truncate(n);
        stats
    }

    /// Up to 75 contiguous buckets ending at "now", zero-filled where no
    /// records exist.
    async fn time_series(&self, bucket: Bucket, horizon: usize) -> Vec<TimeSeriesPoint> {
        let bucket_count = horizon.min(MAX_TIME_SERIES_BUCKETS).max(1);
        let now = bucket.truncate(Utc::now());
        let duration = bucket.duration();

        let starts: Vec<DateTime<Utc>> = (0..bucket_count)
            .map(|i| now - duration * ((bucket_count - 1 - i) as i32))
            .collect();

        let records = self.records.read();
        let mut counts = vec![0u64; bucket_count];
        for record in records.iter() {
            let record_bucket = bucket.truncate(record.timestamp);
            if let Some(idx) = starts.iter().position(|start| *start == record_bucket) {
                counts[idx] += 1;
            }
        }

        starts
            .into_iter()
            .zip(counts)
            .map(|(start, value)| TimeSeriesPoint {
                timestamp_ms: start.timestamp_millis(),
                value,
            })
            .collect()
    }

    async fn overview(&self) -> Overview {
        let records = self.records.read();
        let total = records.len() as u64;
        let successful = records.iter().filter(|r| r.status.is_successful()).count() as u64;
        let avg_duration_ms = if records.is_empty() {
            0.0
        } else {
            records.iter().map(|r| r.duration_ms).sum::<f64>() / records.len() as f64
        };

        let one_hour_ago = Utc::now() - ChronoDuration::hours(1);
        let active_clients_last_hour = records
            .iter()
            .filter(|r| r.timestamp >= one_hour_ago)
            .map(|r| r.request.client_addr.clone())
            .collect::<std::collections::HashSet<_>>()
            .len() as u64;

        Overview {
            total,
            successful,
            avg_duration_ms,
            active_clients_last_hour,
        }
    }

    async fn put_snapshot(&self, snapshot: MetricsSnapshot) {
        *self.snapshot.write() = Some(snapshot);
    }

    async fn get_snapshot(&self) -> Option<MetricsSnapshot> {
        self.snapshot.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logstore::record::{RequestSummary, ResponseSummary};

    fn sample_record(uuid: &str, client: &str, query_name: &str, status: RequestStatus) -> LogRecord {
        LogRecord {
            uuid: uuid.to_string(),
            timestamp: Utc::now(),
            request: RequestSummary {
                client_addr: client.to_string(),
                query_name: query_name.to_string(),
                query_type: "A".to_string(),
                query_id: 1,
            },
            upstreams: Vec::new(),
            response: Some(ResponseSummary {
                source: "cache".to_string(),
                rcode: "NOERROR".to_string(),
                answer_count: 1,
                rtt_ms: 0.0,
            }),
            answers: vec!["1.2.3.4".to_string()],
            ip_addresses: vec!["1.2.3.4".parse().unwrap()],
            status,
            duration_ms: 1.0,
            cache_hit: true,
        }
    }

    #[tokio::test]
    async fn append_is_idempotent_under_uuid() {
        let sink = InMemoryLogSink::new();
        sink.append(sample_record("abc12345", "10.0.0.1:9", "a.b.", RequestStatus::CacheHit))
            .await;
        sink.append(sample_record("abc12345", "10.0.0.1:9", "a.b.", RequestStatus::CacheHit))
            .await;
        assert_eq!(sink.count().await, 1);
    }

    #[tokio::test]
    async fn search_filters_by_domain_and_orders_descending() {
        let sink = InMemoryLogSink::new();
        sink.append(sample_record("11111111", "10.0.0.1:1", "match.example.", RequestStatus::Success))
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        sink.append(sample_record("22222222", "10.0.0.1:1", "match.example.", RequestStatus::Success))
            .await;
        sink.append(sample_record("33333333", "10.0.0.1:1", "other.example.", RequestStatus::Success))
            .await;

        let (results, total) = sink
            .search(SearchFilter {
                domain: Some("MATCH".to_string()),
                limit: 10,
                ..Default::default()
            })
            .await;

        assert_eq!(total, 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].uuid, "22222222");
        assert_eq!(results[1].uuid, "11111111");
    }

    #[tokio::test]
    async fn time_series_zero_fills_empty_buckets() {
        let sink = InMemoryLogSink::new();
        sink.append(sample_record("11111111", "10.0.0.1:1", "a.b.", RequestStatus::Success))
            .await;

        let points = sink.time_series(Bucket::Hour, 75).await;
        assert_eq!(points.len(), 75);
        assert!(points.iter().map(|p| p.value).sum::<u64>() >= 1);
    }

    #[tokio::test]
    async fn top_clients_orders_by_request_count_desc() {
        let sink = InMemoryLogSink::new();
        sink.append(sample_record("11111111", "10.0.0.1:1", "a.b.", RequestStatus::Success))
            .await;
        sink.append(sample_record("22222222", "10.0.0.1:1", "a.b.", RequestStatus::Success))
            .await;
        sink.append(sample_record("33333333", "10.0.0.2:1", "a.b.", RequestStatus::Success))
            .await;

        let top = sink.top_clients(10).await;
        assert_eq!(top[0].client_ip, "10.0.0.1:1");
        assert_eq!(top[0].request_count, 2);
    }
}
