use std::net::Ipv4Addr;

use super::errors::DecodeError;
use crate::consts::NETFLOW_V5_VERSION;
use crate::flow::{FieldValue, FlowRecord};

const HEADER_LEN: usize = 24;
const RECORD_LEN: usize = 48;

/// Netflow v5 decoder. The format is fixed-layout, so unlike IPFIX there is
/// no per-exporter state to keep.
#[derive(Debug, Default)]
pub struct NetflowV5Decoder;

impl NetflowV5Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&self, datagram: &[u8], exporter: &str) -> Result<Vec<FlowRecord>, DecodeError> {
        if datagram.len() < HEADER_LEN {
            return Err(DecodeError::Protocol(format!(
                "datagram of {} bytes is shorter than the v5 header",
                datagram.len()
            )));
        }

        let version = be16(&datagram[0..2]);
        if version != NETFLOW_V5_VERSION {
            return Err(DecodeError::InvalidProtocol {
                expected: NETFLOW_V5_VERSION,
                got: version,
            });
        }

        let flow_count = be16(&datagram[2..4]) as usize;
        if flow_count == 0 {
            return Err(DecodeError::InvalidProtocol {
                expected: NETFLOW_V5_VERSION,
                got: version,
            });
        }

        let sys_uptime = be32(&datagram[4..8]);
        let export_time = be32(&datagram[8..12]) as u64;
        // Nanosecond residual at bytes 12..16 is dropped; downstream works in
        // whole seconds.
        let sequence = be32(&datagram[16..20]);
        let engine_type = datagram[20];
        let engine_id = datagram[21];
        let sampling_interval = be16(&datagram[22..24]);

        let needed = HEADER_LEN + flow_count * RECORD_LEN;
        if datagram.len() < needed {
            return Err(DecodeError::Protocol(format!(
                "header declares {} records but the datagram holds {} bytes",
                flow_count,
                datagram.len()
            )));
        }

        let mut records = Vec::with_capacity(flow_count);
        for i in 0..flow_count {
            let base = HEADER_LEN + i * RECORD_LEN;
            let raw = &datagram[base..base + RECORD_LEN];

            let mut record = FlowRecord::new(
                exporter.to_string(),
                export_time,
                sequence,
                u32::from(engine_id),
            );
            record.source_addr = Some(ipv4(&raw[0..4]));
            record.destination_addr = Some(ipv4(&raw[4..8]));
            record.packet_count = u64::from(be32(&raw[16..20]));
            record.octet_count = u64::from(be32(&raw[20..24]));
            record.start_sys_uptime = Some(u64::from(be32(&raw[24..28])));
            record.end_sys_uptime = Some(u64::from(be32(&raw[28..32])));
            record.source_port = Some(be16(&raw[32..34]));
            record.destination_port = Some(be16(&raw[34..36]));
            // raw[36] is a pad byte
            record.protocol = Some(raw[38]);

            let bag = &mut record.extensions;
            bag.insert(
                "ipNextHopIPv4Address".to_string(),
                FieldValue::Addr(ipv4(&raw[8..12])),
            );
            bag.insert(
                "ingressInterface".to_string(),
                FieldValue::Unsigned(u64::from(be16(&raw[12..14]))),
            );
            bag.insert(
                "egressInterface".to_string(),
                FieldValue::Unsigned(u64::from(be16(&raw[14..16]))),
            );
            bag.insert(
                "tcpControlBits".to_string(),
                FieldValue::Unsigned(u64::from(raw[37])),
            );
            bag.insert(
                "ipClassOfService".to_string(),
                FieldValue::Unsigned(u64::from(raw[39])),
            );
            bag.insert(
                "bgpSourceAsNumber".to_string(),
                FieldValue::Unsigned(u64::from(be16(&raw[40..42]))),
            );
            bag.insert(
                "bgpDestinationAsNumber".to_string(),
                FieldValue::Unsigned(u64::from(be16(&raw[42..44]))),
            );
            bag.insert(
                "sourceIPv4PrefixLength".to_string(),
                FieldValue::Unsigned(u64::from(raw[44])),
            );
            bag.insert(
                "destinationIPv4PrefixLength".to_string(),
                FieldValue::Unsigned(u64::from(raw[45])),
            );
            // raw[46..48] is a pad word
            bag.insert(
                "systemUpTime".to_string(),
                FieldValue::Unsigned(u64::from(sys_uptime)),
            );
            bag.insert(
                "engineType".to_string(),
                FieldValue::Unsigned(u64::from(engine_type)),
            );
            bag.insert(
                "samplingInterval".to_string(),
                FieldValue::Unsigned(u64::from(sampling_interval)),
            );

            records.push(record);
        }

        Ok(records)
    }
}

fn be16(raw: &[u8]) -> u16 {
    u16::from_be_bytes([raw[0], raw[1]])
}

fn be32(raw: &[u8]) -> u32 {
    u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]])
}

fn ipv4(raw: &[u8]) -> Ipv4Addr {
    Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3])
}
