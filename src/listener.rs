use bytes::Bytes;
use log::{debug, error};
use tokio::net::UdpSocket;

use crate::pipeline::Pipeline;

/// Largest payload a single UDP datagram can carry. Exporters usually stay
/// below the path MTU, but template sets over loopback can run much bigger.
const RECV_BUFFER_SIZE: usize = 65_535;

/// Receives datagrams forever and hands each to the pipeline together with
/// the exporter address it came from.
pub async fn run(socket: UdpSocket, pipeline: &Pipeline) {
    let mut buffer = vec![0u8; RECV_BUFFER_SIZE];
    loop {
        match socket.recv_from(&mut buffer).await {
            Ok((length, peer)) => {
                debug!("Datagram received from {}.", peer.ip());
                pipeline
                    .ingest(
                        Bytes::copy_from_slice(&buffer[..length]),
                        peer.ip().to_string(),
                    )
                    .await;
            }
            Err(error) => error!("Unable to receive a datagram: {}", error),
        }
    }
}
