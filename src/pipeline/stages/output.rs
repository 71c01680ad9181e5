use async_trait::async_trait;
use log::debug;

use crate::pipeline::director::QueueDirector;
use crate::pipeline::messages::PipelineItem;
use crate::pipeline::worker::{StageError, StageHandler};
use crate::sinks::Sink;

/// Terminal stage. Fans each batch out to every configured sink; the sinks
/// themselves decide whether a stats batch is of interest to them.
pub struct OutputHandler {
    sinks: Vec<Box<dyn Sink>>,
}

impl OutputHandler {
    pub fn new(sinks: Vec<Box<dyn Sink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl StageHandler for OutputHandler {
    async fn handle(
        &mut self,
        item: PipelineItem,
        _director: &QueueDirector,
    ) -> Result<(), StageError> {
        let batch = match item {
            PipelineItem::Outbound(batch) => batch,
            other => {
                return Err(StageError::Unexpected(format!(
                    "output stage cannot handle a {}",
                    other.kind_name()
                )))
            }
        };

        debug!("Writing out {} {}(s).", batch.records.len(), batch.kind);
        for sink in self.sinks.iter_mut() {
            sink.write(&batch.records, batch.kind).await?;
        }
        Ok(())
    }
}
