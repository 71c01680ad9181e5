use bytes::Bytes;
use serde_json::Value;

use crate::aggregator::conversation::ConversationRecord;
use crate::flow::FlowRecord;
use crate::sinks::RecordKind;

/// A raw datagram as it came off the wire, tagged with the sender address
/// that identifies the exporter.
#[derive(Clone, Debug, PartialEq)]
pub struct Datagram {
    pub payload: Bytes,
    pub exporter: String,
}

/// A batch ready for the output stage.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboundBatch {
    pub records: Vec<Value>,
    pub kind: RecordKind,
}

/// Everything that can travel between pipeline stages. A stage accepts the
/// variant its predecessor emits and treats anything else as a routing bug.
#[derive(Clone, Debug, PartialEq)]
pub enum PipelineItem {
    Datagram(Datagram),
    Flow(FlowRecord),
    Conversations(Vec<ConversationRecord>),
    Outbound(OutboundBatch),
}

impl PipelineItem {
    /// Short name for log lines about misrouted items.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Datagram(_) => "datagram",
            Self::Flow(_) => "flow",
            Self::Conversations(_) => "conversations",
            Self::Outbound(_) => "outbound batch",
        }
    }
}
