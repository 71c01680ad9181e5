use std::fmt;

/// Decode failure for one whole datagram. The worker loop branches on the
/// variant: unknown templates are expected during warm-up and dropped
/// quietly, protocol violations are logged once per worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    InvalidProtocol { expected: u16, got: u16 },
    Protocol(String),
    NoTemplate { exporter: String, template_id: u16 },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DecodeError::InvalidProtocol { expected, got } => {
                write!(f, "expected protocol version {}, got {}", expected, got)
            }
            DecodeError::Protocol(msg) => write!(f, "protocol violation: {}", msg),
            DecodeError::NoTemplate {
                exporter,
                template_id,
            } => write!(
                f,
                "no template {} registered for exporter {}",
                template_id, exporter
            ),
        }
    }
}
