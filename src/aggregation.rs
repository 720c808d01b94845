use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::logstore::{Bucket, LogSink, MetricsSnapshot, SystemInfo};

const TOP_CLIENTS_COUNT: usize = 20;
const TOP_QUERY_TYPES_COUNT: usize = 8;
const TIME_SERIES_HORIZON: usize = 75;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Periodic computation of dashboard statistics from the log sink
/// (spec §4.F), grounded on the teacher's `tokio::time::interval`
/// background-ticker pattern (`resolver.rs` health-check loop,
/// `cache.rs` cleanup loop).
pub struct AggregationScheduler {
    sink: Arc<dyn LogSink>,
    interval: Duration,
    start_time: chrono::DateTime<Utc>,
    version: String,
}

impl AggregationScheduler {
    pub fn new(sink: Arc<dyn LogSink>, interval: Duration, version: String) -> Self {
        Self {
            sink,
            interval,
            start_time: Utc::now(),
            version,
        }
    }

    async fn compute_snapshot(&self) -> MetricsSnapshot {
        let overview = self.sink.overview().await;
        let requests_last_hour = self.sink.time_series(Bucket::Minute, TIME_SERIES_HORIZON).await;
        let requests_last_day = self.sink.time_series(Bucket::Hour, TIME_SERIES_HORIZON).await;
        let requests_last_week = self.sink.time_series(Bucket::Hour, TIME_SERIES_HORIZON).await;
        let requests_last_month = self.sink.time_series(Bucket::Day, TIME_SERIES_HORIZON).await;
        let top_clients = self.sink.top_clients(TOP_CLIENTS_COUNT).await;
        let query_types = self.sink.top_query_types(TOP_QUERY_TYPES_COUNT).await;

        MetricsSnapshot {
            overview,
            requests_last_hour,
            requests_last_day,
            requests_last_week,
            requests_last_month,
            top_clients,
            query_types,
            system_info: SystemInfo {
                version: self.version.clone(),
                start_time: self.start_time,
            },
        }
    }

    /// One aggregation pass: compute and upsert the snapshot.
    pub async fn run_once(&self) {
        let snapshot = self.compute_snapshot().await;
        self.sink.put_snapshot(snapshot).await;
    }

    /// Runs the ticker until `shutdown` fires. MUST run once before the
    /// first tick to seed the cache at startup (spec §4.F); shutdown
    /// finishes any in-flight pass first, bounded by a grace period.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!("seeding aggregation snapshot at startup");
        self.run_once().await;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await; // first tick fires immediately; already seeded above

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once().await;
                }
                _ = shutdown.recv() => {
                    info!("aggregation scheduler shutting down, finishing in-flight pass");
                    let finish = tokio::time::timeout(SHUTDOWN_GRACE, self.run_once());
                    if finish.await.is_err() {
                        warn!("aggregation scheduler grace period elapsed before final pass completed");
                    }
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logstore::InMemoryLogSink;

    #[tokio::test]
    async fn run_once_populates_snapshot() {
        let sink: Arc<dyn LogSink> = Arc::new(InMemoryLogSink::new());
        let scheduler = AggregationScheduler::new(sink.clone(), Duration::from_secs(3600), "0.1.0".to_string());

        assert!(sink.get_snapshot().await.is_none());
        scheduler.run_once().await;
        let snapshot = sink.get_snapshot().await.unwrap();
        assert_eq!(snapshot.system_info.version, "0.1.0");
        assert_eq!(snapshot.requests_last_hour.len(), 75);
    }
}
