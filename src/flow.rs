use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use serde::Serialize;

use crate::aggregator::socket::SocketId;

/// A single decoded field that has no dedicated slot on [`FlowRecord`].
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Unsigned(u64),
    Addr(Ipv4Addr),
    Mac(MacAddr),
    Text(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    pub fn new(octets: [u8; 6]) -> Self {
        MacAddr(octets)
    }

    /// Builds an address from the low 48 bits of a big-endian decoded value.
    pub fn from_u64(value: u64) -> Self {
        let b = value.to_be_bytes();
        MacAddr([b[2], b[3], b[4], b[5], b[6], b[7]])
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl Serialize for MacAddr {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

/// One unidirectional flow as reported by an exporter, with the datagram
/// header merged in. Optional enrichment fields stay empty until the
/// enrichment stage fills them.
#[derive(Clone, Debug, PartialEq)]
pub struct FlowRecord {
    pub exporter: String,
    /// Export timestamp from the datagram header, epoch seconds.
    pub export_time: u64,
    pub sequence: u32,
    pub domain_id: u32,
    pub export_interface: Option<u32>,

    pub source_addr: Option<Ipv4Addr>,
    pub destination_addr: Option<Ipv4Addr>,
    pub source_port: Option<u16>,
    pub destination_port: Option<u16>,
    pub protocol: Option<u8>,
    pub octet_count: u64,
    pub packet_count: u64,
    pub start_sys_uptime: Option<u64>,
    pub end_sys_uptime: Option<u64>,
    pub duration_ms: Option<u64>,

    /// Decoded fields without a dedicated slot, keyed by catalog name.
    pub extensions: BTreeMap<String, FieldValue>,

    pub source_port_name: Option<String>,
    pub destination_port_name: Option<String>,
    pub protocol_name: Option<String>,
    pub source_location: Option<String>,
    pub destination_location: Option<String>,
    pub socket_id: Option<SocketId>,
}

impl FlowRecord {
    pub fn new(exporter: String, export_time: u64, sequence: u32, domain_id: u32) -> Self {
        FlowRecord {
            exporter,
            export_time,
            sequence,
            domain_id,
            export_interface: None,
            source_addr: None,
            destination_addr: None,
            source_port: None,
            destination_port: None,
            protocol: None,
            octet_count: 0,
            packet_count: 0,
            start_sys_uptime: None,
            end_sys_uptime: None,
            duration_ms: None,
            extensions: BTreeMap::new(),
            source_port_name: None,
            destination_port_name: None,
            protocol_name: None,
            source_location: None,
            destination_location: None,
            socket_id: None,
        }
    }
}
