use async_trait::async_trait;
use log::info;

use crate::collaborators::RiskScorer;
use crate::pipeline::director::{QueueDirector, Stage};
use crate::pipeline::messages::PipelineItem;
use crate::pipeline::worker::{StageError, StageHandler};

/// Lets every n-th call through, with n derived from the sample share.
#[derive(Clone, Copy, Debug)]
pub struct Sampler {
    every: u64,
    counter: u64,
}

impl Sampler {
    /// `sample_percentage` must be within ]0, 1].
    pub fn new(sample_percentage: f64) -> Option<Self> {
        if sample_percentage <= 0.0 || sample_percentage > 1.0 {
            return None;
        }
        Some(Self {
            every: (1.0 / sample_percentage) as u64,
            counter: 0,
        })
    }

    pub fn should_process(&mut self) -> bool {
        self.counter += 1;
        if self.counter >= self.every {
            self.counter = 0;
            true
        } else {
            false
        }
    }
}

/// Attaches a risk score to sampled conversations. Without a scorer the
/// stage passes everything through untouched.
pub struct SecurityHandler {
    scorer: Option<Box<dyn RiskScorer>>,
    sampler: Sampler,
}

impl SecurityHandler {
    pub fn new(scorer: Option<Box<dyn RiskScorer>>, sampler: Sampler) -> Self {
        if scorer.is_some() {
            info!("Security scoring enabled.");
        }
        Self { scorer, sampler }
    }
}

#[async_trait]
impl StageHandler for SecurityHandler {
    async fn handle(
        &mut self,
        item: PipelineItem,
        director: &QueueDirector,
    ) -> Result<(), StageError> {
        let mut conversations = match item {
            PipelineItem::Conversations(conversations) => conversations,
            other => {
                return Err(StageError::Unexpected(format!(
                    "security stage cannot handle a {}",
                    other.kind_name()
                )))
            }
        };

        if let Some(scorer) = self.scorer.as_mut() {
            for conversation in conversations.iter_mut() {
                if self.sampler.should_process() {
                    let assessment = scorer
                        .assess(
                            conversation.source_addr,
                            conversation.destination_addr,
                            conversation.destination_port,
                        )
                        .await;
                    conversation.security_value = Some(assessment.score);
                    conversation.security_reason = Some(assessment.reason);
                }
            }
        }

        director
            .submit(
                Stage::Security,
                PipelineItem::Conversations(conversations),
                None,
            )
            .await;
        Ok(())
    }

    async fn before_stop(&mut self) {
        if let Some(scorer) = self.scorer.as_mut() {
            scorer.store().await;
        }
    }
}
