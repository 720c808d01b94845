use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::pipeline::Pipeline;

const DATAGRAM_BUFFER_SIZE: usize = 4096;

/// UDP ingress loop (spec §6 "DNS ingress"), grounded on the teacher's
/// `run_udp_server`: one task spawned per datagram, admission and
/// concurrency bounded inside [`Pipeline`] rather than duplicated here.
pub async fn run_udp_server(
    bind_addr: std::net::SocketAddr,
    pipeline: Arc<Pipeline>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
    info!(%bind_addr, "UDP DNS server listening");

    let mut buf = vec![0u8; DATAGRAM_BUFFER_SIZE];

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("UDP server received shutdown signal");
                break;
            }
            result = socket.recv_from(&mut buf) => {
                let (len, src_addr) = match result {
                    Ok(v) => v,
                    Err(err) => {
                        warn!(error = %err, "failed to receive UDP datagram");
                        continue;
                    }
                };

                let datagram = buf[..len].to_vec();
                let socket = socket.clone();
                let pipeline = pipeline.clone();

                tokio::spawn(async move {
                    let response = pipeline.handle_datagram(&datagram, src_addr).await;
                    if let Err(err) = socket.send_to(&response, src_addr).await {
                        error!(error = %err, %src_addr, "failed to write UDP response");
                    } else {
                        debug!(%src_addr, bytes = response.len(), "wrote UDP response");
                    }
                });
            }
        }
    }

    info!("UDP server shutdown complete");
    Ok(())
}
