use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use serde::Serialize;
use serde_json::Value;

use crate::aggregator::cache::{IndexedTtlCache, Merge};
use crate::aggregator::conversation::{ConversationRecord, FlowSideAggregate};
use crate::consts::CACHE_SWEEP_GATE_SECS;
use crate::pipeline::director::{QueueDirector, Stage};
use crate::pipeline::messages::{OutboundBatch, PipelineItem};
use crate::pipeline::worker::{StageError, StageHandler};
use crate::sinks::RecordKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RateSample {
    #[serde(rename = "octetDeltaCountPerSec")]
    pub octets_per_sec: u64,
    #[serde(rename = "packetDeltaCountPerSec")]
    pub packets_per_sec: u64,
}

/// One second of per-direction throughput attributed to a network location.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatsRecord {
    #[serde(rename = "@timestamp")]
    pub timestamp_ms: i64,
    #[serde(rename = "networkLocation")]
    pub network_location: String,
    #[serde(rename = "flow_request", skip_serializing_if = "Option::is_none")]
    pub request: Option<RateSample>,
    #[serde(rename = "flow_response", skip_serializing_if = "Option::is_none")]
    pub response: Option<RateSample>,
}

impl Merge for StatsRecord {
    /// Rates add up; the timestamp and location stay with the first sample.
    fn merge(&mut self, other: StatsRecord) {
        merge_side(&mut self.request, other.request);
        merge_side(&mut self.response, other.response);
    }
}

fn merge_side(mine: &mut Option<RateSample>, other: Option<RateSample>) {
    let other = match other {
        Some(other) => other,
        None => return,
    };
    match mine {
        Some(mine) => {
            mine.octets_per_sec += other.octets_per_sec;
            mine.packets_per_sec += other.packets_per_sec;
        }
        None => *mine = Some(other),
    }
}

/// Spreads each conversation side's throughput over the seconds it lasted,
/// instead of booking everything on the final second as one peak. Samples
/// land in a merging cache keyed by direction, ten-second window and
/// location, so the writeout volume stays bounded.
pub struct StatsHandler {
    cache: IndexedTtlCache<String, StatsRecord>,
    last_sweep: i64,
}

impl StatsHandler {
    pub fn new(cache_seconds: u64) -> Self {
        Self {
            cache: IndexedTtlCache::new(cache_seconds),
            last_sweep: 0,
        }
    }

    fn spread(&mut self, conversation: &ConversationRecord) {
        let location = conversation.network_location.clone();
        self.spread_side(conversation.request.as_ref(), &location, true);
        self.spread_side(conversation.response.as_ref(), &location, false);
    }

    /// The first second of a side is already covered by the conversation
    /// record itself, so only durations beyond one second produce samples.
    fn spread_side(&mut self, side: Option<&FlowSideAggregate>, location: &str, is_request: bool) {
        let side = match side {
            Some(side) => side,
            None => return,
        };
        if side.octets_per_sec == 0 && side.packets_per_sec == 0 {
            return;
        }

        let direction = if is_request {
            "flow_request"
        } else {
            "flow_response"
        };
        let sample = RateSample {
            octets_per_sec: side.octets_per_sec,
            packets_per_sec: side.packets_per_sec,
        };
        let mut remaining = side.duration_ms;
        let mut timestamp = side.first_export_time as i64;
        while remaining > 1000 {
            timestamp -= 1;
            let (request, response) = if is_request {
                (Some(sample), None)
            } else {
                (None, Some(sample))
            };
            let record = StatsRecord {
                timestamp_ms: timestamp * 1000,
                network_location: location.to_string(),
                request,
                response,
            };
            let key = format!("{}{}{}", direction, record.timestamp_ms / 10_000, location);
            self.cache.insert(key, record);
            remaining -= 1000;
        }
    }
}

#[async_trait]
impl StageHandler for StatsHandler {
    async fn handle(
        &mut self,
        item: PipelineItem,
        director: &QueueDirector,
    ) -> Result<(), StageError> {
        let conversations = match item {
            PipelineItem::Conversations(conversations) => conversations,
            other => {
                return Err(StageError::Unexpected(format!(
                    "stats stage cannot handle a {}",
                    other.kind_name()
                )))
            }
        };

        for conversation in &conversations {
            self.spread(conversation);
        }

        let now = Utc::now().timestamp();
        if self.last_sweep + CACHE_SWEEP_GATE_SECS < now {
            self.last_sweep = now;
            let stats = self.cache.drain_expired();
            if !stats.is_empty() {
                debug!("Writing out {} stats records.", stats.len());
                let mut records: Vec<Value> = Vec::with_capacity(stats.len());
                for stat in &stats {
                    records.push(serde_json::to_value(stat)?);
                }
                director
                    .submit(
                        Stage::Stats,
                        PipelineItem::Outbound(OutboundBatch {
                            records,
                            kind: RecordKind::Stats,
                        }),
                        None,
                    )
                    .await;
            }
        }
        Ok(())
    }
}
