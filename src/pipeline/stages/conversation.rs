use async_trait::async_trait;
use chrono::Utc;

use crate::aggregator::conversation::OpenSocketAggregator;
use crate::consts::CACHE_SWEEP_GATE_SECS;
use crate::pipeline::director::{QueueDirector, Stage};
use crate::pipeline::messages::PipelineItem;
use crate::pipeline::worker::{StageError, StageHandler};

/// Buckets flows by socket identity and releases folded conversations once
/// their TTL runs out. Sweeping is gated to once per second so a busy queue
/// does not spend its time rescanning the cache.
pub struct ConversationHandler {
    aggregator: OpenSocketAggregator,
    last_sweep: i64,
}

impl ConversationHandler {
    pub fn new(ttl_response_received: u64, ttl_no_response: u64) -> Self {
        Self {
            aggregator: OpenSocketAggregator::new(ttl_response_received, ttl_no_response),
            last_sweep: 0,
        }
    }
}

#[async_trait]
impl StageHandler for ConversationHandler {
    async fn handle(
        &mut self,
        item: PipelineItem,
        director: &QueueDirector,
    ) -> Result<(), StageError> {
        let flow = match item {
            PipelineItem::Flow(flow) => flow,
            other => {
                return Err(StageError::Unexpected(format!(
                    "conversation stage cannot handle a {}",
                    other.kind_name()
                )))
            }
        };

        self.aggregator.process(flow);

        let now = Utc::now().timestamp();
        if self.last_sweep + CACHE_SWEEP_GATE_SECS < now {
            self.last_sweep = now;
            let conversations = self.aggregator.drain_expired();
            if !conversations.is_empty() {
                director
                    .submit(
                        Stage::Conversation,
                        PipelineItem::Conversations(conversations),
                        None,
                    )
                    .await;
            }
        }
        Ok(())
    }
}
