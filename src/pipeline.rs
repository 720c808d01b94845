use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, warn};

use crate::cache::{CacheKey, ResponseCache};
use crate::dns::{DnsType, Message, RCode, ResourceRecord};
use crate::logstore::{LogRecord, RequestStatus, RequestSummary, ResponseSummary, UpstreamAttempt};
use crate::mapping::MappingStore;
use crate::metrics::ProxyMetrics;
use crate::upstream::{UpstreamManager, UpstreamResult, is_success};

/// Bounded capacity of the handler→log-sink hand-off queue (spec §9:
/// "bounded producer→consumer queue... full queue drops with a counter
/// increment").
const LOG_QUEUE_CAPACITY: usize = 4096;

struct FinishArgs {
    start: Instant,
    client_addr: SocketAddr,
    query_id: u16,
    query_name: String,
    query_type: String,
    upstreams: Vec<UpstreamAttempt>,
    response: Option<ResponseSummary>,
    answers: Vec<String>,
    ip_addresses: Vec<IpAddr>,
    status: RequestStatus,
    cache_hit: bool,
}

/// The hot path (spec §4.G): per-datagram admission, custom lookup,
/// cache lookup, upstream fan-out, and always a log record, wired the
/// way the teacher's `handle_dns_query` composes its components.
pub struct Pipeline {
    cache: Arc<ResponseCache>,
    mapping: Arc<MappingStore>,
    upstream: Arc<UpstreamManager>,
    metrics: Arc<ProxyMetrics>,
    admission: Arc<Semaphore>,
    log_tx: mpsc::Sender<LogRecord>,
    custom_mapping_ttl: u32,
}

impl Pipeline {
    pub fn new(
        cache: Arc<ResponseCache>,
        mapping: Arc<MappingStore>,
        upstream: Arc<UpstreamManager>,
        metrics: Arc<ProxyMetrics>,
        max_concurrent: usize,
        custom_mapping_ttl: u32,
    ) -> (Self, mpsc::Receiver<LogRecord>) {
        let (log_tx, log_rx) = mpsc::channel(LOG_QUEUE_CAPACITY);
        let pipeline = Self {
            cache,
            mapping,
            upstream,
            metrics,
            admission: Arc::new(Semaphore::new(max_concurrent)),
            log_tx,
            custom_mapping_ttl,
        };
        (pipeline, log_rx)
    }

    /// Handles one inbound datagram end to end, returning the wire bytes
    /// to write back to the client. Never panics or propagates an error
    /// to the caller (spec §7: "nothing below the handler ever surfaces
    /// an exception to the client").
    pub async fn handle_datagram(&self, buf: &[u8], client_addr: SocketAddr) -> Vec<u8> {
        let start = Instant::now();

        let _permit = match Arc::clone(&self.admission).try_acquire_owned() {
            Ok(permit) => {
                self.metrics.concurrent_queries.inc();
                permit
            }
            Err(_) => {
                let id = best_effort_id(buf);
                let response = Message::error_response(id, RCode::ServFail);
                self.finish(FinishArgs {
                    start,
                    client_addr,
                    query_id: id,
                    query_name: String::new(),
                    query_type: "unknown".to_string(),
                    upstreams: Vec::new(),
                    response: None,
                    answers: Vec::new(),
                    ip_addresses: Vec::new(),
                    status: RequestStatus::RateLimited,
                    cache_hit: false,
                });
                return response.serialize().unwrap_or_default();
            }
        };

        let message = match Message::parse(buf) {
            Ok(message) if !message.questions.is_empty() => message,
            Ok(_) | Err(_) => {
                let id = best_effort_id(buf);
                let response = Message::error_response(id, RCode::FormErr);
                self.finish(FinishArgs {
                    start,
                    client_addr,
                    query_id: id,
                    query_name: String::new(),
                    query_type: "unknown".to_string(),
                    upstreams: Vec::new(),
                    response: None,
                    answers: Vec::new(),
                    ip_addresses: Vec::new(),
                    status: RequestStatus::MalformedQuery,
                    cache_hit: false,
                });
                return response.serialize().unwrap_or_default();
            }
        };

        // Spec §6: "only the first question is examined; multi-question
        // queries are handled but only the first drives the logic."
        let question = message.questions[0].clone();
        let client_id = message.header.id;
        let query_type = question.qtype.to_string();
        let query_name = question.name.clone();

        // Only `A` queries can be satisfied from the custom mapping
        // store (spec §3: "matching A queries") since it only ever
        // holds IPv4 addresses; an AAAA question falls through to the
        // cache/upstream path instead of getting a type-mismatched
        // answer.
        let custom_match = if question.qtype == DnsType::A {
            self.mapping.get(&question.name)
        } else {
            None
        };
        if let Some(ip) = custom_match {
            let answer = ResourceRecord::new_a(question.name.clone(), self.custom_mapping_ttl, ip);
            let response = message.respond(RCode::NoError, vec![answer]);
            let bytes = response.serialize().unwrap_or_default();
            self.finish(FinishArgs {
                start,
                client_addr,
                query_id: client_id,
                query_name,
                query_type,
                upstreams: Vec::new(),
                response: Some(ResponseSummary {
                    source: "custom".to_string(),
                    rcode: RCode::NoError.to_string(),
                    answer_count: response.answers.len(),
                    rtt_ms: 0.0,
                }),
                answers: response.extract_answers(),
                ip_addresses: response.extract_ips(),
                status: RequestStatus::CustomResolution,
                cache_hit: false,
            });
            return bytes;
        }

        let cache_key = CacheKey::new(&question.name, question.qtype);
        if let Some(mut cached) = self.cache.get(&cache_key) {
            self.metrics.cache_hits.inc();
            cached.set_id(client_id);
            let bytes = cached.serialize().unwrap_or_default();
            self.finish(FinishArgs {
                start,
                client_addr,
                query_id: client_id,
                query_name,
                query_type,
                upstreams: Vec::new(),
                response: Some(ResponseSummary {
                    source: "cache".to_string(),
                    rcode: cached.header.rcode.to_string(),
                    answer_count: cached.answers.len(),
                    rtt_ms: 0.0,
                }),
                answers: cached.extract_answers(),
                ip_addresses: cached.extract_ips(),
                status: RequestStatus::CacheHit,
                cache_hit: true,
            });
            return bytes;
        }
        self.metrics.cache_misses.inc();

        let (winner, all) = self.upstream.query(&message, Some(&self.metrics)).await;
        let attempts: Vec<UpstreamAttempt> = all
            .iter()
            .enumerate()
            .map(|(idx, result)| upstream_attempt(idx as u32, result))
            .collect();

        if is_success(&winner) {
            let mut response = winner.response.clone().expect("success implies response");
            response.set_id(client_id);
            self.cache.set(cache_key, response.clone(), Some(&self.metrics));

            let bytes = response.serialize().unwrap_or_default();
            self.finish(FinishArgs {
                start,
                client_addr,
                query_id: client_id,
                query_name,
                query_type,
                upstreams: attempts,
                response: Some(ResponseSummary {
                    source: winner.server.to_string(),
                    rcode: response.header.rcode.to_string(),
                    answer_count: response.answers.len(),
                    rtt_ms: winner.rtt.as_secs_f64() * 1000.0,
                }),
                answers: response.extract_answers(),
                ip_addresses: response.extract_ips(),
                status: RequestStatus::Success,
                cache_hit: false,
            });
            return bytes;
        }

        warn!(domain = %question.name, "all upstreams failed");
        let response = Message::error_response(client_id, RCode::ServFail);
        let bytes = response.serialize().unwrap_or_default();
        self.finish(FinishArgs {
            start,
            client_addr,
            query_id: client_id,
            query_name,
            query_type,
            upstreams: attempts,
            response: None,
            answers: Vec::new(),
            ip_addresses: Vec::new(),
            status: RequestStatus::AllUpstreamsFailed,
            cache_hit: false,
        });
        bytes
    }

    fn finish(&self, args: FinishArgs) {
        let FinishArgs {
            start,
            client_addr,
            query_id,
            query_name,
            query_type,
            upstreams,
            response,
            answers,
            ip_addresses,
            status,
            cache_hit,
        } = args;

        if status != RequestStatus::RateLimited {
            self.metrics.concurrent_queries.dec();
        }

        let duration = start.elapsed();
        let status_label = status_label(status);
        self.metrics
            .queries_total
            .with_label_values(&[status_label])
            .inc();
        self.metrics
            .query_duration
            .with_label_values(&[status_label])
            .observe(duration.as_secs_f64());

        let record = LogRecord {
            uuid: LogRecord::new_uuid(),
            timestamp: chrono::Utc::now(),
            request: RequestSummary {
                client_addr: client_addr.to_string(),
                query_name,
                query_type,
                query_id,
            },
            upstreams,
            response,
            answers,
            ip_addresses,
            status,
            duration_ms: duration.as_secs_f64() * 1000.0,
            cache_hit,
        };

        // Non-blocking hand-off (spec §9: ingestion MUST NOT
        // back-pressure the responder). A full queue drops the record
        // with a counted metric rather than awaiting space.
        if self.log_tx.try_send(record).is_err() {
            self.metrics.log_dropped.inc();
            debug!("log ingestion queue full, dropping record");
        }
    }
}

fn upstream_attempt(attempt: u32, result: &UpstreamResult) -> UpstreamAttempt {
    UpstreamAttempt {
        server: result.server.to_string(),
        attempt,
        rtt_ms: result.response.is_some().then(|| result.rtt.as_secs_f64() * 1000.0),
        error: result.error.clone(),
    }
}

fn status_label(status: RequestStatus) -> &'static str {
    match status {
        RequestStatus::Success => "success",
        RequestStatus::CacheHit => "cache_hit",
        RequestStatus::CustomResolution => "custom_resolution",
        RequestStatus::AllUpstreamsFailed => "all_upstreams_failed",
        RequestStatus::MalformedQuery => "malformed_query",
        RequestStatus::RateLimited => "rate_limited",
    }
}

/// Best-effort extraction of the query id from a buffer that failed to
/// parse as a full message, so the FORMERR/SERVFAIL response can still
/// carry the client's id when possible (spec P1 only requires id
/// preservation for non-error responses, but matching it here costs
/// nothing and helps well-behaved clients correlate the failure).
fn best_effort_id(buf: &[u8]) -> u16 {
    if buf.len() >= 2 {
        u16::from_be_bytes([buf[0], buf[1]])
    } else {
        0
    }
}

/// Drives the background consumer side of the handler→log-sink queue,
/// persisting records as they arrive.
pub async fn run_log_consumer(
    mut rx: mpsc::Receiver<LogRecord>,
    sink: Arc<dyn crate::logstore::LogSink>,
    metrics: Arc<ProxyMetrics>,
) {
    while let Some(record) = rx.recv().await {
        if !sink.append(record).await {
            metrics.log_append_failures.inc();
            warn!("log sink append failed");
        }
    }
}
