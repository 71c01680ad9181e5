use std::fmt;

use serde::Serialize;

use crate::flow::FlowRecord;

/// Conversation identity. Both directions of a flow map to the same id
/// because the two `addr:portname` endpoints are joined in sorted order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SocketId(String);

impl SocketId {
    /// Builds the id from an enriched flow. Returns None until the flow has
    /// both addresses and both port names.
    pub fn from_flow(flow: &FlowRecord) -> Option<SocketId> {
        let source_addr = flow.source_addr?;
        let destination_addr = flow.destination_addr?;
        let source_port_name = flow.source_port_name.as_ref()?;
        let destination_port_name = flow.destination_port_name.as_ref()?;

        let source = format!("{}:{}", source_addr, source_port_name);
        let destination = format!("{}:{}", destination_addr, destination_port_name);

        if source < destination {
            Some(SocketId(format!("{}-{}", source, destination)))
        } else {
            Some(SocketId(format!("{}-{}", destination, source)))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Partition key for worker affinity. Addition commutes, so both directions
/// of a conversation land on the same worker.
pub fn partition_key(flow: &FlowRecord) -> Option<u64> {
    let source = flow.source_addr?;
    let destination = flow.destination_addr?;
    Some(u64::from(u32::from(source)) + u64::from(u32::from(destination)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;

    fn flow(
        source: (Ipv4Addr, &str),
        destination: (Ipv4Addr, &str),
    ) -> FlowRecord {
        let mut flow = FlowRecord::new("10.0.0.1".to_string(), 1_600_000_000, 1, 0);
        flow.source_addr = Some(source.0);
        flow.destination_addr = Some(destination.0);
        flow.source_port_name = Some(source.1.to_string());
        flow.destination_port_name = Some(destination.1.to_string());
        flow
    }

    #[test]
    fn both_directions_share_one_id() {
        let client = (Ipv4Addr::new(192, 168, 1, 10), "51515");
        let server = (Ipv4Addr::new(8, 8, 8, 8), "domain");

        let request = SocketId::from_flow(&flow(client, server));
        let response = SocketId::from_flow(&flow(server, client));

        assert_eq!(request, response);
        assert_eq!(
            request.map(|id| id.to_string()),
            Some("192.168.1.10:51515-8.8.8.8:domain".to_string())
        );
    }

    #[test]
    fn endpoints_are_ordered_lexicographically() {
        let id = SocketId::from_flow(&flow(
            (Ipv4Addr::new(9, 0, 0, 1), "http"),
            (Ipv4Addr::new(10, 0, 0, 1), "51000"),
        ));
        assert_eq!(
            id.map(|id| id.to_string()),
            Some("10.0.0.1:51000-9.0.0.1:http".to_string())
        );
    }

    #[test]
    fn id_needs_addresses_and_port_names() {
        let mut bare = flow(
            (Ipv4Addr::new(192, 168, 1, 10), "51515"),
            (Ipv4Addr::new(8, 8, 8, 8), "domain"),
        );
        bare.destination_port_name = None;
        assert_eq!(SocketId::from_flow(&bare), None);
    }

    #[test]
    fn partition_key_commutes() {
        let client = (Ipv4Addr::new(192, 168, 1, 10), "51515");
        let server = (Ipv4Addr::new(8, 8, 8, 8), "domain");

        let forward = partition_key(&flow(client, server));
        let reverse = partition_key(&flow(server, client));

        assert_eq!(forward, reverse);
        assert!(forward.is_some());
    }

    #[test]
    fn partition_key_needs_both_addresses() {
        let mut bare = flow(
            (Ipv4Addr::new(192, 168, 1, 10), "51515"),
            (Ipv4Addr::new(8, 8, 8, 8), "domain"),
        );
        bare.source_addr = None;
        assert_eq!(partition_key(&bare), None);
    }
}
