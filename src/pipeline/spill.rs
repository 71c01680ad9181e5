//! On-disk overflow buffer. When the queues run over their ceiling, incoming
//! datagrams are batched into chunk files here and re-injected later by the
//! background recovery worker.

use core::fmt;
use std::path::{Path, PathBuf};

use log::debug;
use prost::Message;
use tokio::fs;
use uuid::Uuid;

use super::messages::Datagram;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SpilledDatagram {
    #[prost(bytes = "bytes", tag = "1")]
    pub payload: ::prost::bytes::Bytes,
    #[prost(string, tag = "2")]
    pub exporter: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SpilledBatch {
    #[prost(message, repeated, tag = "1")]
    pub datagrams: ::prost::alloc::vec::Vec<SpilledDatagram>,
}

#[derive(Debug)]
pub enum SpillError {
    IoErr(std::io::Error),
    EncodeErr(prost::EncodeError),
    DecodeErr(prost::DecodeError),
}

impl From<std::io::Error> for SpillError {
    fn from(error: std::io::Error) -> SpillError {
        SpillError::IoErr(error)
    }
}

impl From<prost::EncodeError> for SpillError {
    fn from(error: prost::EncodeError) -> SpillError {
        SpillError::EncodeErr(error)
    }
}

impl From<prost::DecodeError> for SpillError {
    fn from(error: prost::DecodeError) -> SpillError {
        SpillError::DecodeErr(error)
    }
}

impl fmt::Display for SpillError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IoErr(error) => write!(f, "spill io error: {}", error),
            Self::EncodeErr(error) => write!(f, "spill encode error: {}", error),
            Self::DecodeErr(error) => write!(f, "spill decode error: {}", error),
        }
    }
}

/// Collects datagrams and writes them out as one chunk file per
/// `chunk_size` items, each under a random name so files never collide.
#[derive(Debug)]
pub struct SpillWriter {
    directory: PathBuf,
    chunk_size: usize,
    pending: Vec<SpilledDatagram>,
}

impl SpillWriter {
    pub fn new(directory: impl Into<PathBuf>, chunk_size: usize) -> Self {
        Self {
            directory: directory.into(),
            chunk_size,
            pending: Vec::new(),
        }
    }

    pub async fn put(&mut self, datagram: Datagram) -> Result<(), SpillError> {
        self.pending.push(SpilledDatagram {
            payload: datagram.payload,
            exporter: datagram.exporter,
        });
        if self.pending.len() >= self.chunk_size {
            self.flush().await?;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), SpillError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.directory).await?;

        let batch = SpilledBatch {
            datagrams: std::mem::take(&mut self.pending),
        };
        let mut buf = Vec::with_capacity(batch.encoded_len());
        batch.encode(&mut buf)?;

        let path = self.directory.join(Uuid::new_v4().to_string());
        fs::write(&path, &buf).await?;
        debug!(
            "spilled {} datagrams to {}",
            batch.datagrams.len(),
            path.display()
        );
        Ok(())
    }
}

/// Reads back one chunk file, removing it afterwards. Returns None when no
/// chunk is waiting. One file per call keeps re-injection paced.
pub async fn recover_one(
    directory: impl AsRef<Path>,
) -> Result<Option<Vec<Datagram>>, SpillError> {
    let mut entries = match fs::read_dir(directory.as_ref()).await {
        Ok(entries) => entries,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(error.into()),
    };

    let mut chunk = None;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            chunk = Some(entry.path());
            break;
        }
    }
    let path = match chunk {
        Some(path) => path,
        None => return Ok(None),
    };

    let raw = fs::read(&path).await?;
    let batch = SpilledBatch::decode(raw.as_slice())?;
    fs::remove_file(&path).await?;

    let datagrams = batch
        .datagrams
        .into_iter()
        .map(|spilled| Datagram {
            payload: spilled.payload,
            exporter: spilled.exporter,
        })
        .collect();
    Ok(Some(datagrams))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn datagram(n: u8) -> Datagram {
        Datagram {
            payload: vec![n; 4].into(),
            exporter: format!("10.0.0.{}", n),
        }
    }

    #[tokio::test]
    async fn chunks_are_flushed_once_full() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SpillWriter::new(dir.path(), 2);

        writer.put(datagram(1)).await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        writer.put(datagram(2)).await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        writer.put(datagram(3)).await.unwrap();
        writer.flush().await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn recovery_round_trips_datagrams_and_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SpillWriter::new(dir.path(), 10);
        writer.put(datagram(1)).await.unwrap();
        writer.put(datagram(2)).await.unwrap();
        writer.flush().await.unwrap();

        let recovered = recover_one(dir.path()).await.unwrap().unwrap();
        assert_eq!(recovered, vec![datagram(1), datagram(2)]);
        assert_eq!(recover_one(dir.path()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn recovery_takes_one_file_per_call() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SpillWriter::new(dir.path(), 1);
        writer.put(datagram(1)).await.unwrap();
        writer.put(datagram(2)).await.unwrap();

        assert!(recover_one(dir.path()).await.unwrap().is_some());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
        assert!(recover_one(dir.path()).await.unwrap().is_some());
        assert_eq!(recover_one(dir.path()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn empty_flush_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SpillWriter::new(dir.path(), 5);
        writer.flush().await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        assert_eq!(recover_one(dir.path().join("missing")).await.unwrap(), None);
    }
}
