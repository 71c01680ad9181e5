use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;

use chrono::Utc;
use log::{debug, warn};
use serde::Serialize;

use super::socket::SocketId;
use crate::flow::{FieldValue, FlowRecord};

/// One side of a conversation, folded from that side's raw flows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FlowSideAggregate {
    pub flow_count: u64,
    #[serde(rename = "octetDeltaCount")]
    pub octet_count: u64,
    #[serde(rename = "packetDeltaCount")]
    pub packet_count: u64,
    #[serde(rename = "flowDurationMilliseconds")]
    pub duration_ms: u64,
    /// Earliest export time on this side, epoch seconds.
    #[serde(rename = "timestamp")]
    pub first_export_time: u64,
    #[serde(rename = "flowStartSysUpTime")]
    pub start_sys_uptime: Option<u64>,
    #[serde(rename = "flowEndSysUpTime")]
    pub end_sys_uptime: Option<u64>,
    #[serde(rename = "octetDeltaCountPerSec")]
    pub octets_per_sec: u64,
    #[serde(rename = "packetDeltaCountPerSec")]
    pub packets_per_sec: u64,
}

/// A finished bidirectional conversation. Endpoint fields are taken from the
/// first flow seen for the socket, swapped when the home network turned out
/// to sit on the destination side.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConversationRecord {
    #[serde(rename = "@timestamp")]
    pub timestamp_ms: i64,
    /// Gap between the two sides' earliest export times, whole seconds.
    /// Zero unless both sides are present.
    #[serde(rename = "responsetime")]
    pub response_time: i64,
    pub exporter: String,
    #[serde(rename = "exportInterface")]
    pub export_interface: Option<u32>,
    pub sequence: u32,
    #[serde(rename = "observationDomainId")]
    pub domain_id: u32,
    #[serde(rename = "sourceIPv4Address")]
    pub source_addr: Ipv4Addr,
    #[serde(rename = "destinationIPv4Address")]
    pub destination_addr: Ipv4Addr,
    #[serde(rename = "sourceTransportPort")]
    pub source_port: Option<u16>,
    #[serde(rename = "destinationTransportPort")]
    pub destination_port: Option<u16>,
    #[serde(rename = "sourceTransportPortName")]
    pub source_port_name: Option<String>,
    #[serde(rename = "destinationTransportPortName")]
    pub destination_port_name: Option<String>,
    #[serde(rename = "protocolIdentifier")]
    pub protocol: Option<u8>,
    #[serde(rename = "protocolIdentifierName")]
    pub protocol_name: Option<String>,
    #[serde(rename = "networkLocation")]
    pub network_location: String,
    #[serde(rename = "sourceNetworkLocation")]
    pub source_location: Option<String>,
    #[serde(rename = "destinationNetworkLocation")]
    pub destination_location: Option<String>,
    #[serde(rename = "socketIdentifier")]
    pub socket_id: SocketId,
    #[serde(rename = "flow_request")]
    pub request: Option<FlowSideAggregate>,
    #[serde(rename = "flow_response")]
    pub response: Option<FlowSideAggregate>,
    /// Filled in by the scoring stage when it is enabled.
    #[serde(rename = "securityValue", skip_serializing_if = "Option::is_none")]
    pub security_value: Option<f64>,
    #[serde(rename = "securityReason", skip_serializing_if = "Option::is_none")]
    pub security_reason: Option<String>,
    /// Filled in by the postprocessing stage.
    #[serde(rename = "sourceHostname", skip_serializing_if = "Option::is_none")]
    pub source_hostname: Option<String>,
    #[serde(rename = "destinationHostname", skip_serializing_if = "Option::is_none")]
    pub destination_hostname: Option<String>,
    #[serde(flatten)]
    pub extensions: BTreeMap<String, FieldValue>,
}

#[derive(Debug)]
struct SocketBucket {
    inserted_at: i64,
    flows: Vec<FlowRecord>,
}

/// Pairs unidirectional flows into conversations keyed by socket identity.
///
/// Buckets age out on one of two ttls: a short one once a response has been
/// observed, a long one while the conversation is still one-sided. Sweeping
/// folds a candidate bucket first because the applicable ttl depends on the
/// fold outcome.
#[derive(Debug)]
pub struct OpenSocketAggregator {
    ttl_response_received: i64,
    ttl_no_response: i64,
    sockets: HashMap<SocketId, SocketBucket>,
    logged_missing_endpoints: bool,
}

impl OpenSocketAggregator {
    pub fn new(ttl_response_received: u64, ttl_no_response: u64) -> Self {
        Self {
            ttl_response_received: ttl_response_received as i64,
            ttl_no_response: ttl_no_response as i64,
            sockets: HashMap::new(),
            logged_missing_endpoints: false,
        }
    }

    pub fn cache_size(&self) -> usize {
        self.sockets.len()
    }

    pub fn process(&mut self, flow: FlowRecord) {
        self.process_at(flow, Utc::now().timestamp());
    }

    pub fn process_at(&mut self, flow: FlowRecord, now: i64) {
        let has_endpoints = flow.source_addr.is_some() && flow.destination_addr.is_some();
        let socket = match (&flow.socket_id, has_endpoints) {
            (Some(socket), true) => socket.clone(),
            _ => {
                if !self.logged_missing_endpoints {
                    warn!("ignoring flow without layer 3 endpoints, not aggregating");
                    self.logged_missing_endpoints = true;
                }
                return;
            }
        };

        match self.sockets.get_mut(&socket) {
            Some(bucket) => bucket.flows.push(flow),
            None => {
                self.sockets.insert(
                    socket,
                    SocketBucket {
                        inserted_at: now,
                        flows: vec![flow],
                    },
                );
            }
        }
    }

    pub fn drain_expired(&mut self) -> Vec<ConversationRecord> {
        self.drain_expired_at(Utc::now().timestamp())
    }

    pub fn drain_expired_at(&mut self, now: i64) -> Vec<ConversationRecord> {
        let min_ttl = self.ttl_response_received.min(self.ttl_no_response);
        let mut evicted = Vec::new();
        let mut conversations = Vec::new();

        for (socket, bucket) in &self.sockets {
            if bucket.inserted_at > now - min_ttl {
                continue;
            }
            // The applicable ttl depends on whether a response made it into
            // the fold, so fold tentatively before deciding.
            let conversation = match fold_conversation(&bucket.flows) {
                Some(conversation) => conversation,
                None => {
                    debug!("dropping unfoldable bucket for socket {}", socket);
                    evicted.push(socket.clone());
                    continue;
                }
            };
            let ttl = if conversation.request.is_some() && conversation.response.is_some() {
                self.ttl_response_received
            } else {
                self.ttl_no_response
            };
            if bucket.inserted_at <= now - ttl {
                evicted.push(socket.clone());
                conversations.push(conversation);
            }
        }

        for socket in &evicted {
            self.sockets.remove(socket);
        }
        conversations
    }
}

/// Folds one socket's flows into a conversation. The first flow pins the
/// initiator side and supplies the endpoint fields.
fn fold_conversation(flows: &[FlowRecord]) -> Option<ConversationRecord> {
    let pivot = flows.first()?;
    let pivot_source = pivot.source_addr?;
    let pivot_destination = pivot.destination_addr?;
    let socket = pivot.socket_id.clone()?;

    let mut initiator: Vec<&FlowRecord> = Vec::new();
    let mut partner: Vec<&FlowRecord> = Vec::new();
    for flow in flows {
        if flow.source_addr == Some(pivot_source) {
            initiator.push(flow);
        } else {
            partner.push(flow);
        }
    }

    let request = fold_side(&initiator);
    let response = fold_side(&partner);

    let total_duration_ms = request.as_ref().map_or(0, |side| side.duration_ms)
        + response.as_ref().map_or(0, |side| side.duration_ms);
    let timestamp_ms = pivot.export_time as i64 * 1000 - total_duration_ms as i64;

    let response_time = match (&request, &response) {
        (Some(request), Some(response)) => {
            (response.first_export_time as i64 - request.first_export_time as i64).abs()
        }
        _ => 0,
    };

    let mut conversation = ConversationRecord {
        timestamp_ms,
        response_time,
        exporter: pivot.exporter.clone(),
        export_interface: pivot.export_interface,
        sequence: pivot.sequence,
        domain_id: pivot.domain_id,
        source_addr: pivot_source,
        destination_addr: pivot_destination,
        source_port: pivot.source_port,
        destination_port: pivot.destination_port,
        source_port_name: pivot.source_port_name.clone(),
        destination_port_name: pivot.destination_port_name.clone(),
        protocol: pivot.protocol,
        protocol_name: pivot.protocol_name.clone(),
        network_location: "unknown".to_string(),
        source_location: pivot.source_location.clone(),
        destination_location: pivot.destination_location.clone(),
        socket_id: socket,
        request,
        response,
        security_value: None,
        security_reason: None,
        source_hostname: None,
        destination_hostname: None,
        extensions: pivot.extensions.clone(),
    };

    match (&pivot.source_location, &pivot.destination_location) {
        (Some(source_location), _) => {
            conversation.network_location = source_location.clone();
        }
        (None, Some(destination_location)) => {
            // The home network sits on the destination side, so the record
            // is re-oriented to make that side the source.
            conversation.network_location = destination_location.clone();
            conversation.source_addr = pivot_destination;
            conversation.destination_addr = pivot_source;
            conversation.source_port = pivot.destination_port;
            conversation.destination_port = pivot.source_port;
            conversation.source_port_name = pivot.destination_port_name.clone();
            conversation.destination_port_name = pivot.source_port_name.clone();
            std::mem::swap(&mut conversation.request, &mut conversation.response);
        }
        (None, None) => {}
    }

    Some(conversation)
}

fn fold_side(flows: &[&FlowRecord]) -> Option<FlowSideAggregate> {
    let first = flows.first()?;

    let mut side = FlowSideAggregate {
        flow_count: flows.len() as u64,
        octet_count: 0,
        packet_count: 0,
        duration_ms: 0,
        first_export_time: first.export_time,
        start_sys_uptime: None,
        end_sys_uptime: None,
        octets_per_sec: 0,
        packets_per_sec: 0,
    };

    for flow in flows {
        side.octet_count += flow.octet_count;
        side.packet_count += flow.packet_count;
        side.duration_ms += flow.duration_ms.unwrap_or(0);
        side.first_export_time = side.first_export_time.min(flow.export_time);
        side.start_sys_uptime = min_option(side.start_sys_uptime, flow.start_sys_uptime);
        side.end_sys_uptime = max_option(side.end_sys_uptime, flow.end_sys_uptime);
    }

    // Flows at or under one second keep their raw totals as the rate,
    // otherwise sub-second durations would inflate per-second figures.
    if side.duration_ms > 1000 {
        side.octets_per_sec = side.octet_count.saturating_mul(1000) / side.duration_ms;
        side.packets_per_sec = side.packet_count.saturating_mul(1000) / side.duration_ms;
    } else {
        side.octets_per_sec = side.octet_count;
        side.packets_per_sec = side.packet_count;
    }

    Some(side)
}

fn min_option(current: Option<u64>, candidate: Option<u64>) -> Option<u64> {
    match (current, candidate) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, other) => other,
    }
}

fn max_option(current: Option<u64>, candidate: Option<u64>) -> Option<u64> {
    match (current, candidate) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (Some(a), None) => Some(a),
        (None, other) => other,
    }
}
