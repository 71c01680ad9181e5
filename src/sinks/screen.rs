use async_trait::async_trait;
use serde_json::Value;

use super::{RecordKind, Sink, SinkError};

/// Prints conversations to stdout. Meant for watching a live feed, so stats
/// batches are dropped to keep the stream readable.
#[derive(Debug, Default)]
pub struct ScreenSink;

#[async_trait]
impl Sink for ScreenSink {
    async fn write(&mut self, records: &[Value], kind: RecordKind) -> Result<(), SinkError> {
        if kind == RecordKind::Stats {
            return Ok(());
        }
        for record in records {
            println!("{}", serde_json::to_string(record)?);
        }
        Ok(())
    }
}
