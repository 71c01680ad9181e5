pub mod errors;
pub mod ie;
pub mod ipfix;
pub mod netflow_v5;

use errors::DecodeError;
use ipfix::IpfixDecoder;
use netflow_v5::NetflowV5Decoder;

use crate::flow::FlowRecord;

/// Wire decoder picked at startup from the configured protocol.
#[derive(Debug)]
pub enum Decoder {
    Ipfix(IpfixDecoder),
    NetflowV5(NetflowV5Decoder),
}

impl Decoder {
    /// Decodes one datagram into flow records. `&mut` because IPFIX keeps
    /// per-exporter template state between datagrams.
    pub fn decode(
        &mut self,
        datagram: &[u8],
        exporter: &str,
    ) -> Result<Vec<FlowRecord>, DecodeError> {
        match self {
            Decoder::Ipfix(inner) => inner.decode(datagram, exporter),
            Decoder::NetflowV5(inner) => inner.decode(datagram, exporter),
        }
    }
}
