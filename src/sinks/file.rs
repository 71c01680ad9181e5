use async_trait::async_trait;
use log::debug;
use serde_json::Value;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::{RecordKind, Sink, SinkError};

/// Appends records to a text file, one JSON document per line. The file is
/// opened on first write so a sink that never sees a record never touches
/// the filesystem.
pub struct FileSink {
    path: String,
    include_stats: bool,
    file: Option<File>,
}

impl FileSink {
    pub fn new(path: String, include_stats: bool) -> Self {
        Self {
            path,
            include_stats,
            file: None,
        }
    }
}

#[async_trait]
impl Sink for FileSink {
    async fn write(&mut self, records: &[Value], kind: RecordKind) -> Result<(), SinkError> {
        if kind == RecordKind::Stats && !self.include_stats {
            return Ok(());
        }

        let mut buffer = String::new();
        for record in records {
            buffer.push_str(&serde_json::to_string(record)?);
            buffer.push('\n');
        }

        if self.file.is_none() {
            let file = OpenOptions::new()
                .append(true)
                .create(true)
                .open(&self.path)
                .await?;
            self.file = Some(file);
        }
        if let Some(file) = self.file.as_mut() {
            file.write_all(buffer.as_bytes()).await?;
            file.flush().await?;
        }
        debug!("wrote {} {}(s) to file", records.len(), kind);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn appends_one_json_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversations.txt");
        let mut sink = FileSink::new(path.to_string_lossy().to_string(), false);

        sink.write(&[json!({"a": 1})], RecordKind::Conversation)
            .await
            .unwrap();
        sink.write(&[json!({"b": 2})], RecordKind::Conversation)
            .await
            .unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "{\"a\":1}\n{\"b\":2}\n");
    }

    #[tokio::test]
    async fn stats_are_skipped_unless_opted_in() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversations.txt");

        let mut sink = FileSink::new(path.to_string_lossy().to_string(), false);
        sink.write(&[json!({"s": 1})], RecordKind::Stats)
            .await
            .unwrap();
        assert!(!path.exists());

        let mut sink = FileSink::new(path.to_string_lossy().to_string(), true);
        sink.write(&[json!({"s": 1})], RecordKind::Stats)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"s\":1}\n");
    }
}
