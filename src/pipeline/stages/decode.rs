use async_trait::async_trait;
use log::info;

use crate::pipeline::director::{QueueDirector, Stage};
use crate::pipeline::messages::PipelineItem;
use crate::pipeline::worker::{StageError, StageHandler};
use crate::protocol::Decoder;

/// Turns raw datagrams into flow records and fans them out one by one.
pub struct DecodeHandler {
    decoder: Decoder,
    first_flow_seen: bool,
}

impl DecodeHandler {
    pub fn new(decoder: Decoder) -> Self {
        Self {
            decoder,
            first_flow_seen: false,
        }
    }
}

#[async_trait]
impl StageHandler for DecodeHandler {
    async fn handle(
        &mut self,
        item: PipelineItem,
        director: &QueueDirector,
    ) -> Result<(), StageError> {
        let datagram = match item {
            PipelineItem::Datagram(datagram) => datagram,
            other => {
                return Err(StageError::Unexpected(format!(
                    "decode stage cannot handle a {}",
                    other.kind_name()
                )))
            }
        };

        let flows = self.decoder.decode(&datagram.payload, &datagram.exporter)?;
        if !self.first_flow_seen && !flows.is_empty() {
            self.first_flow_seen = true;
            info!("First flow has arrived.");
        }
        for flow in flows {
            director
                .submit(Stage::Decode, PipelineItem::Flow(flow), None)
                .await;
        }
        Ok(())
    }
}
