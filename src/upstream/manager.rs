use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_retry::Retry;
use tokio_retry::strategy::FixedInterval;
use tracing::{debug, warn};

use crate::dns::Message;
use crate::error::ProxyError;
use crate::metrics::ProxyMetrics;

use super::health::{HealthState, ServerHealth};

/// Outcome of one query attempt against one upstream (spec §4.C
/// `UpstreamResult`).
#[derive(Clone, Debug)]
pub struct UpstreamResult {
    pub server: SocketAddr,
    pub rtt: Duration,
    pub response: Option<Message>,
    pub error: Option<String>,
}

/// Centralized success predicate (spec §9: "must be centralized to
/// avoid duplicating the rule"): non-nil response AND rcode in
/// {NOERROR, NXDOMAIN}.
pub fn is_success(result: &UpstreamResult) -> bool {
    result
        .response
        .as_ref()
        .is_some_and(|r| r.header.rcode.is_upstream_success())
}

/// Pool of upstream resolvers queried in parallel with first-success
/// semantics (spec §4.C), grounded on the teacher's
/// `resolve_with_parallel_queries` `select_ok` fan-out in
/// `resolver.rs`, generalized into the channel-based design spec §9
/// suggests so every attempt — not just the winner — is observable for
/// the log record.
pub struct UpstreamManager {
    servers: Vec<Arc<ServerHealth>>,
    per_attempt_timeout: Duration,
    retry_attempts: usize,
}

impl UpstreamManager {
    pub fn new(
        addrs: Vec<SocketAddr>,
        per_attempt_timeout: Duration,
        unhealthy_threshold: u32,
        retry_attempts: usize,
    ) -> Self {
        let servers = addrs
            .into_iter()
            .map(|addr| Arc::new(ServerHealth::new(addr, unhealthy_threshold)))
            .collect();
        Self {
            servers,
            per_attempt_timeout,
            retry_attempts,
        }
    }

    /// Servers ordered healthy-first to minimize wasted work; ordering
    /// does not affect correctness since every server is still queried
    /// (spec §4.C: "SHOULD prefer healthy first... correctness does not
    /// depend on order"; spec §9 Open Question: unhealthy servers are
    /// still queried every time, just last).
    fn servers_by_health_priority(&self) -> Vec<Arc<ServerHealth>> {
        let mut ordered: Vec<Arc<ServerHealth>> = self.servers.clone();
        ordered.sort_by_key(|s| match s.state() {
            HealthState::Healthy => 0,
            HealthState::Degraded => 1,
            HealthState::Unhealthy => 2,
        });
        ordered
    }

    pub fn health_snapshot(&self) -> Vec<(SocketAddr, HealthState, u32)> {
        self.servers
            .iter()
            .map(|s| (s.address, s.state(), s.consecutive_failures()))
            .collect()
    }

    /// Issues one query per configured upstream in parallel. Returns the
    /// first result satisfying [`is_success`] as the winner, plus every
    /// result gathered (for the log record's `upstreams` list, spec
    /// §3/§8 P7). If every upstream fails, the winner carries the last
    /// observed error (spec §4.C).
    pub async fn query(
        &self,
        query: &Message,
        metrics: Option<&ProxyMetrics>,
    ) -> (UpstreamResult, Vec<UpstreamResult>) {
        let ordered = self.servers_by_health_priority();
        let payload = Arc::new(match query.serialize() {
            Ok(bytes) => bytes,
            Err(err) => {
                let now = UpstreamResult {
                    server: "0.0.0.0:0".parse().unwrap(),
                    rtt: Duration::ZERO,
                    response: None,
                    error: Some(err.to_string()),
                };
                return (now.clone(), vec![now]);
            }
        });

        let (tx, mut rx) = mpsc::channel(ordered.len().max(1));
        let mut handles = Vec::with_capacity(ordered.len());

        for health in &ordered {
            if let Some(metrics) = metrics {
                metrics
                    .upstream_requests
                    .with_label_values(&[&health.address.to_string()])
                    .inc();
            }
            let tx = tx.clone();
            let health = health.clone();
            let payload = payload.clone();
            let per_attempt_timeout = self.per_attempt_timeout;
            let retry_attempts = self.retry_attempts;
            handles.push(tokio::spawn(async move {
                let result =
                    query_one(&health, payload, per_attempt_timeout, retry_attempts).await;
                let _ = tx.send(result).await;
            }));
        }
        drop(tx);

        let mut all = Vec::with_capacity(ordered.len());
        let mut winner: Option<UpstreamResult> = None;

        while let Some(result) = rx.recv().await {
            if let Some(metrics) = metrics {
                let outcome = if is_success(&result) { "success" } else { "failure" };
                metrics
                    .upstream_responses
                    .with_label_values(&[&result.server.to_string(), outcome])
                    .inc();
                metrics
                    .upstream_response_time
                    .with_label_values(&[&result.server.to_string()])
                    .observe(result.rtt.as_secs_f64());
            }

            let won = is_success(&result);
            all.push(result.clone());
            if won {
                winner = Some(result);
                break;
            }
        }

        // First success: cancel the still-running siblings (spec §4.C
        // "ctx cancellation terminates outstanding in-flight queries").
        for handle in &handles {
            handle.abort();
        }

        if let Some(winner) = winner {
            debug!(server = %winner.server, rtt_ms = winner.rtt.as_millis(), "upstream fan-out winner");
            return (winner, all);
        }

        // No success yet; drain whatever else arrives before the
        // channel closes (remaining tasks either finished already or
        // were just aborted above and will never send).
        while let Some(result) = rx.recv().await {
            all.push(result);
        }

        let last_error = all
            .last()
            .cloned()
            .unwrap_or_else(|| UpstreamResult {
                server: "0.0.0.0:0".parse().unwrap(),
                rtt: Duration::ZERO,
                response: None,
                error: Some("no upstream servers configured".to_string()),
            });
        warn!(attempts = all.len(), "all upstream queries failed");
        (last_error, all)
    }
}

async fn send_single_query(addr: SocketAddr, payload: Arc<Vec<u8>>) -> Result<Message, ProxyError> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(|e| ProxyError::UpstreamTransport(e.to_string()))?;
    socket
        .connect(addr)
        .await
        .map_err(|e| ProxyError::UpstreamTransport(e.to_string()))?;
    socket
        .send(&payload)
        .await
        .map_err(|e| ProxyError::UpstreamTransport(e.to_string()))?;

    let mut buf = vec![0u8; 4096];
    let n = socket
        .recv(&mut buf)
        .await
        .map_err(|e| ProxyError::UpstreamTransport(e.to_string()))?;

    Message::parse(&buf[..n])
}

/// One attempt against one upstream, with transport-layer retries on
/// transient send/receive errors (spec §4.C closing paragraph: "a
/// separately configurable retry count applies only to the transport
/// layer... not to repeating the query"), bounded by the per-request
/// upstream timeout.
async fn query_one(
    health: &ServerHealth,
    payload: Arc<Vec<u8>>,
    per_attempt_timeout: Duration,
    retry_attempts: usize,
) -> UpstreamResult {
    let start = Instant::now();
    let strategy = FixedInterval::from_millis(20).take(retry_attempts.max(1));

    let outcome = tokio::time::timeout(
        per_attempt_timeout,
        Retry::spawn(strategy, || send_single_query(health.address, payload.clone())),
    )
    .await;

    match outcome {
        Ok(Ok(response)) => {
            let rtt = start.elapsed();
            health.record_success(rtt);
            UpstreamResult {
                server: health.address,
                rtt,
                response: Some(response),
                error: None,
            }
        }
        Ok(Err(err)) => {
            health.record_failure();
            UpstreamResult {
                server: health.address,
                rtt: start.elapsed(),
                response: None,
                error: Some(err.to_string()),
            }
        }
        Err(_) => {
            health.record_failure();
            UpstreamResult {
                server: health.address,
                rtt: start.elapsed(),
                response: None,
                error: Some("upstream query timed out".to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{DnsClass, DnsHeader, DnsQuestion, DnsType, RCode, ResourceRecord};
    use std::net::Ipv4Addr;
    use tokio::net::UdpSocket as TokioUdpSocket;

    fn sample_query() -> Message {
        Message {
            header: DnsHeader {
                id: 7,
                qr: false,
                opcode: 0,
                aa: false,
                tc: false,
                rd: true,
                ra: false,
                z: 0,
                rcode: RCode::NoError,
                qdcount: 1,
                ancount: 0,
                nscount: 0,
                arcount: 0,
            },
            questions: vec![DnsQuestion {
                name: "a.b.".into(),
                qtype: DnsType::A,
                qclass: DnsClass::IN,
            }],
            answers: Vec::new(),
            authorities: Vec::new(),
            additional: Vec::new(),
        }
    }

    /// Spins up a fake upstream that answers every query after `delay`
    /// with a fixed A record, echoing the query id.
    async fn spawn_fake_upstream(delay: Duration, ip: Ipv4Addr) -> SocketAddr {
        let socket = TokioUdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                let (n, from) = match socket.recv_from(&mut buf).await {
                    Ok(v) => v,
                    Err(_) => return,
                };
                let query = match Message::parse(&buf[..n]) {
                    Ok(q) => q,
                    Err(_) => continue,
                };
                tokio::time::sleep(delay).await;
                let mut response = query.respond(RCode::NoError, vec![ResourceRecord::new_a(
                    query.questions[0].name.clone(),
                    300,
                    ip,
                )]);
                response.set_id(query.header.id);
                let bytes = response.serialize().unwrap();
                let _ = socket.send_to(&bytes, from).await;
            }
        });
        addr
    }

    async fn spawn_fake_upstream_timeout() -> SocketAddr {
        let socket = TokioUdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                if socket.recv_from(&mut buf).await.is_err() {
                    return;
                }
                // Never respond.
            }
        });
        addr
    }

    #[tokio::test]
    async fn first_success_wins_without_waiting_for_slower_upstream() {
        let fast = spawn_fake_upstream(Duration::from_millis(20), Ipv4Addr::new(9, 9, 9, 9)).await;
        let slow = spawn_fake_upstream(Duration::from_millis(300), Ipv4Addr::new(8, 8, 8, 8)).await;

        let manager = UpstreamManager::new(vec![fast, slow], Duration::from_secs(2), 3, 1);
        let start = Instant::now();
        let (winner, _all) = manager.query(&sample_query(), None).await;
        let elapsed = start.elapsed();

        assert!(is_success(&winner));
        assert_eq!(winner.server, fast);
        assert!(elapsed < Duration::from_millis(250));
    }

    #[tokio::test]
    async fn all_upstreams_failing_reports_every_attempt() {
        let a = spawn_fake_upstream_timeout().await;
        let b = spawn_fake_upstream_timeout().await;

        let manager = UpstreamManager::new(vec![a, b], Duration::from_millis(100), 3, 1);
        let (winner, all) = manager.query(&sample_query(), None).await;

        assert!(!is_success(&winner));
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|r| r.error.is_some()));
    }

    #[tokio::test]
    async fn failure_marks_server_unhealthy_after_threshold() {
        let addr = spawn_fake_upstream_timeout().await;
        let manager = UpstreamManager::new(vec![addr], Duration::from_millis(50), 1, 1);

        manager.query(&sample_query(), None).await;
        let snapshot = manager.health_snapshot();
        assert_eq!(snapshot[0].1, HealthState::Unhealthy);
    }
}
