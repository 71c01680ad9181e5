use core::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error};
use tokio::sync::{mpsc, watch};

use super::director::{QueueDirector, Stage};
use super::messages::PipelineItem;
use crate::protocol::errors::DecodeError;
use crate::sinks::SinkError;

#[derive(Debug)]
pub enum StageError {
    DecodeErr(DecodeError),
    SinkErr(SinkError),
    SerializeErr(serde_json::Error),
    Unexpected(String),
}

impl From<DecodeError> for StageError {
    fn from(error: DecodeError) -> StageError {
        StageError::DecodeErr(error)
    }
}

impl From<SinkError> for StageError {
    fn from(error: SinkError) -> StageError {
        StageError::SinkErr(error)
    }
}

impl From<serde_json::Error> for StageError {
    fn from(error: serde_json::Error) -> StageError {
        StageError::SerializeErr(error)
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DecodeErr(error) => write!(f, "decode error: {}", error),
            Self::SinkErr(error) => write!(f, "sink error: {}", error),
            Self::SerializeErr(error) => write!(f, "serialize error: {}", error),
            Self::Unexpected(message) => write!(f, "{}", message),
        }
    }
}

/// One pipeline stage's behavior. Workers feed items from their queue into
/// `handle`; `before_stop` runs once when the worker is shutting down, for
/// handlers that keep state worth flushing.
#[async_trait]
pub trait StageHandler: Send {
    async fn handle(
        &mut self,
        item: PipelineItem,
        director: &QueueDirector,
    ) -> Result<(), StageError>;

    async fn before_stop(&mut self) {}
}

/// Drives one worker until its stop flag flips or its queue closes.
///
/// Malformed datagrams must not take a worker down. A missing template is
/// routine while an exporter warms up and only gets a debug line; other
/// protocol errors are logged once per worker to keep a misbehaving exporter
/// from flooding the log; everything else is logged every time.
pub async fn run_worker<H>(
    stage: Stage,
    index: usize,
    mut handler: H,
    mut rx: mpsc::Receiver<PipelineItem>,
    director: Arc<QueueDirector>,
    mut stop: watch::Receiver<bool>,
) where
    H: StageHandler,
{
    debug!("{} worker {} started", stage, index);
    let mut protocol_error_logged = false;

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            item = rx.recv() => {
                let item = match item {
                    Some(item) => item,
                    None => break,
                };
                if let Err(error) = handler.handle(item, &director).await {
                    match error {
                        StageError::DecodeErr(DecodeError::NoTemplate { ref exporter, template_id }) => {
                            debug!(
                                "{}: no template {} from {} yet, datagram dropped",
                                stage, template_id, exporter
                            );
                        }
                        StageError::DecodeErr(ref decode_error) => {
                            if !protocol_error_logged {
                                error!("{}: {}", stage, decode_error);
                                protocol_error_logged = true;
                            }
                        }
                        other => error!("{} worker {} failed: {}", stage, index, other),
                    }
                }
            }
        }
    }

    handler.before_stop().await;
    debug!("{} worker {} stopped", stage, index);
}
