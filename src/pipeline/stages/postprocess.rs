use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::collaborators::HostnameResolver;
use crate::pipeline::director::{QueueDirector, Stage};
use crate::pipeline::messages::{OutboundBatch, PipelineItem};
use crate::pipeline::worker::{StageError, StageHandler};
use crate::sinks::RecordKind;

/// Resolves endpoint hostnames and hands the finished records to the output
/// stage. The resolver is shared between this stage's workers so they feed
/// one cache.
pub struct PostprocessHandler {
    resolver: Arc<Mutex<Box<dyn HostnameResolver>>>,
}

impl PostprocessHandler {
    pub fn new(resolver: Arc<Mutex<Box<dyn HostnameResolver>>>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl StageHandler for PostprocessHandler {
    async fn handle(
        &mut self,
        item: PipelineItem,
        director: &QueueDirector,
    ) -> Result<(), StageError> {
        let mut conversations = match item {
            PipelineItem::Conversations(conversations) => conversations,
            other => {
                return Err(StageError::Unexpected(format!(
                    "postprocessing stage cannot handle a {}",
                    other.kind_name()
                )))
            }
        };

        {
            let mut resolver = self.resolver.lock().await;
            for conversation in conversations.iter_mut() {
                conversation.source_hostname =
                    Some(resolver.resolve(conversation.source_addr).await);
                conversation.destination_hostname =
                    Some(resolver.resolve(conversation.destination_addr).await);
            }
        }

        let mut records: Vec<Value> = Vec::with_capacity(conversations.len());
        for conversation in &conversations {
            records.push(serde_json::to_value(conversation)?);
        }
        director
            .submit(
                Stage::Postprocess,
                PipelineItem::Outbound(OutboundBatch {
                    records,
                    kind: RecordKind::Conversation,
                }),
                None,
            )
            .await;
        Ok(())
    }

    async fn before_stop(&mut self) {
        self.resolver.lock().await.store().await;
    }
}
