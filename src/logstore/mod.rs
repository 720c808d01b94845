mod record;
mod sink;

pub use record::{LogRecord, RequestStatus, RequestSummary, ResponseSummary, UpstreamAttempt};
pub use sink::{
    Bucket, ClientStat, InMemoryLogSink, LogSink, MetricsSnapshot, Overview, QueryTypeStat,
    SearchFilter, SystemInfo, TimeSeriesPoint,
};
