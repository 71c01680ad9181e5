pub mod file;
pub mod screen;
pub mod udp;

use core::fmt;

use async_trait::async_trait;
use serde_json::Value;

pub use file::FileSink;
pub use screen::ScreenSink;
pub use udp::UdpSink;

/// What a finished batch contains. Sinks receive the kind with every batch
/// so each can decide whether stats are worth keeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKind {
    Conversation,
    Stats,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Conversation => "conversation",
            Self::Stats => "stats",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug)]
pub enum SinkError {
    IoErr(std::io::Error),
    SerializeErr(serde_json::Error),
}

impl From<std::io::Error> for SinkError {
    fn from(error: std::io::Error) -> SinkError {
        SinkError::IoErr(error)
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(error: serde_json::Error) -> SinkError {
        SinkError::SerializeErr(error)
    }
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IoErr(error) => write!(f, "sink io error: {}", error),
            Self::SerializeErr(error) => write!(f, "sink serialize error: {}", error),
        }
    }
}

#[async_trait]
pub trait Sink: Send {
    async fn write(&mut self, records: &[Value], kind: RecordKind) -> Result<(), SinkError>;
}
