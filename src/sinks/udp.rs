use async_trait::async_trait;
use log::debug;
use serde_json::Value;
use tokio::net::UdpSocket;

use super::{RecordKind, Sink, SinkError};

/// Records per datagram. Conversations serialize to well under 2 kB, so
/// five of them stay inside a jumbo-frame MTU.
const CHUNK_SIZE: usize = 5;

/// Forwards conversations to another process as JSON arrays over UDP.
pub struct UdpSink {
    host: String,
    port: u16,
    socket: Option<UdpSocket>,
}

impl UdpSink {
    pub fn new(host: String, port: u16) -> Self {
        Self {
            host,
            port,
            socket: None,
        }
    }
}

#[async_trait]
impl Sink for UdpSink {
    async fn write(&mut self, records: &[Value], kind: RecordKind) -> Result<(), SinkError> {
        if kind == RecordKind::Stats {
            return Ok(());
        }

        if self.socket.is_none() {
            let socket = UdpSocket::bind("0.0.0.0:0").await?;
            socket.connect((self.host.as_str(), self.port)).await?;
            self.socket = Some(socket);
        }

        if let Some(socket) = self.socket.as_ref() {
            for chunk in records.chunks(CHUNK_SIZE) {
                let payload = serde_json::to_vec(chunk)?;
                socket.send(&payload).await?;
            }
            debug!("forwarded {} conversation(s) over udp", records.len());
        }
        Ok(())
    }
}
