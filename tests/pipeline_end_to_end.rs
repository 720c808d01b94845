use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use heimdall_proxy::cache::ResponseCache;
use heimdall_proxy::dns::{DnsClass, DnsHeader, DnsQuestion, DnsType, Message, RCode, ResourceRecord};
use heimdall_proxy::mapping::MappingStore;
use heimdall_proxy::metrics::ProxyMetrics;
use heimdall_proxy::pipeline::Pipeline;
use heimdall_proxy::upstream::UpstreamManager;
use tokio::net::UdpSocket;

fn query(id: u16, name: &str, qtype: DnsType) -> Message {
    Message {
        header: DnsHeader {
            id,
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
            name: name.to_string(),
            qtype,
            qclass: DnsClass::IN,
        }],
        answers: Vec::new(),
        authorities: Vec::new(),
        additional: Vec::new(),
    }
}

/// Answers every query after `delay` with a fixed A record.
async fn spawn_fake_upstream(delay: Duration, ip: Ipv4Addr) -> std::net::SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 4096];
        loop {
            let (n, from) = match socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(_) => return,
            };
            let incoming = match Message::parse(&buf[..n]) {
                Ok(m) => m,
                Err(_) => continue,
            };
            tokio::time::sleep(delay).await;
            let mut response = incoming.respond(
                RCode::NoError,
                vec![ResourceRecord::new_a(incoming.questions[0].name.clone(), 300, ip)],
            );
            response.set_id(incoming.header.id);
            let bytes = response.serialize().unwrap();
            let _ = socket.send_to(&bytes, from).await;
        }
    });
    addr
}

fn test_pipeline(upstreams: Vec<std::net::SocketAddr>) -> (Arc<Pipeline>, Arc<MappingStore>) {
    let cache = Arc::new(ResponseCache::new(1_000, Duration::from_secs(300)));
    let mapping = Arc::new(MappingStore::new());
    let upstream = Arc::new(UpstreamManager::new(upstreams, Duration::from_secs(2), 3, 1));
    let metrics = Arc::new(ProxyMetrics::new().unwrap());
    let (pipeline, mut log_rx) = Pipeline::new(cache, mapping.clone(), upstream, metrics, 100, 300);
    tokio::spawn(async move { while log_rx.recv().await.is_some() {} });
    (Arc::new(pipeline), mapping)
}

// S1 — Custom hit.
#[tokio::test]
async fn custom_hit_overrides_everything() {
    let (pipeline, mapping) = test_pipeline(vec!["127.0.0.1:1".parse().unwrap()]);
    mapping.put("example.local", Ipv4Addr::new(10, 0, 0, 7));

    let q = query(42, "example.local.", DnsType::A);
    let bytes = q.serialize().unwrap();
    let response_bytes = pipeline
        .handle_datagram(&bytes, "127.0.0.1:5000".parse().unwrap())
        .await;
    let response = Message::parse(&response_bytes).unwrap();

    assert_eq!(response.header.id, 42);
    assert_eq!(response.header.rcode, RCode::NoError);
    assert_eq!(response.answers.len(), 1);
    assert_eq!(
        response.extract_ips(),
        vec![std::net::IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7))]
    );
}

// S3 — Upstream race: the faster upstream's answer wins and gets cached.
#[tokio::test]
async fn fastest_upstream_wins_and_populates_cache() {
    let fast = spawn_fake_upstream(Duration::from_millis(20), Ipv4Addr::new(9, 9, 9, 9)).await;
    let slow = spawn_fake_upstream(Duration::from_millis(150), Ipv4Addr::new(8, 8, 8, 8)).await;
    let (pipeline, _mapping) = test_pipeline(vec![fast, slow]);

    let q = query(7, "race.example.", DnsType::A);
    let bytes = q.serialize().unwrap();

    let start = std::time::Instant::now();
    let response_bytes = pipeline
        .handle_datagram(&bytes, "127.0.0.1:5001".parse().unwrap())
        .await;
    let elapsed = start.elapsed();
    let response = Message::parse(&response_bytes).unwrap();

    assert_eq!(response.header.id, 7);
    assert_eq!(
        response.extract_ips(),
        vec![std::net::IpAddr::V4(Ipv4Addr::new(9, 9, 9, 9))]
    );
    assert!(elapsed < Duration::from_millis(140));

    // A second identical query should now be served from cache.
    let second_bytes = pipeline
        .handle_datagram(&bytes, "127.0.0.1:5001".parse().unwrap())
        .await;
    let second = Message::parse(&second_bytes).unwrap();
    assert_eq!(
        second.extract_ips(),
        vec![std::net::IpAddr::V4(Ipv4Addr::new(9, 9, 9, 9))]
    );
}

// S4 — All upstreams fail.
#[tokio::test]
async fn all_upstreams_failing_returns_servfail() {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = socket.local_addr().unwrap();
    drop(socket); // nothing listens here; every send should eventually time out

    let cache = Arc::new(ResponseCache::new(1_000, Duration::from_secs(300)));
    let mapping = Arc::new(MappingStore::new());
    let upstream = Arc::new(UpstreamManager::new(vec![dead_addr], Duration::from_millis(100), 3, 1));
    let metrics = Arc::new(ProxyMetrics::new().unwrap());
    let (pipeline, mut log_rx) = Pipeline::new(cache, mapping, upstream, metrics, 100, 300);

    let q = query(9, "down.example.", DnsType::A);
    let bytes = q.serialize().unwrap();
    let response_bytes = pipeline
        .handle_datagram(&bytes, "127.0.0.1:5002".parse().unwrap())
        .await;
    let response = Message::parse(&response_bytes).unwrap();
    assert_eq!(response.header.rcode, RCode::ServFail);

    let record = log_rx.recv().await.unwrap();
    assert_eq!(
        record.status,
        heimdall_proxy::logstore::RequestStatus::AllUpstreamsFailed
    );
}

// S6 — Malformed query.
#[tokio::test]
async fn malformed_datagram_returns_formerr_with_preserved_id() {
    let (pipeline, _mapping) = test_pipeline(vec!["127.0.0.1:1".parse().unwrap()]);

    let mut bytes = vec![0u8; 12];
    bytes[0] = 0;
    bytes[1] = 100; // id = 100
    // qdcount stays zero -> zero questions -> malformed per spec §4.G.2

    let response_bytes = pipeline
        .handle_datagram(&bytes, "127.0.0.1:5003".parse().unwrap())
        .await;
    let response = Message::parse(&response_bytes).unwrap();
    assert_eq!(response.header.id, 100);
    assert_eq!(response.header.rcode, RCode::FormErr);
}
