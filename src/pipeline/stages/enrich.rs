use async_trait::async_trait;
use log::warn;

use crate::aggregator::socket::{partition_key, SocketId};
use crate::consts::EXPORT_INTERFACE_SANE_LIMIT;
use crate::flow::FlowRecord;
use crate::iana;
use crate::location::LocationClassifier;
use crate::pipeline::director::{QueueDirector, Stage};
use crate::pipeline::messages::PipelineItem;
use crate::pipeline::worker::{StageError, StageHandler};

/// Fills in the derived fields downstream stages rely on. Port and protocol
/// names come first because the socket identity is built from them.
pub struct EnrichHandler {
    classifier: LocationClassifier,
    extreme_networks_patch: bool,
}

impl EnrichHandler {
    pub fn new(classifier: LocationClassifier, extreme_networks_patch: bool) -> Self {
        Self {
            classifier,
            extreme_networks_patch,
        }
    }

    fn enrich(&self, flow: &mut FlowRecord) {
        flow.source_port_name = flow.source_port.map(iana::service_name);
        flow.destination_port_name = flow.destination_port.map(iana::service_name);
        flow.protocol_name = flow.protocol.map(iana::transport_name);

        // Some exporters ship the duration as its own element; only derive it
        // from the uptime counters when they did not.
        if flow.duration_ms.is_none() {
            flow.duration_ms = self.duration_from_uptimes(flow);
        }

        if let Some(interface) = flow.export_interface {
            if interface >= EXPORT_INTERFACE_SANE_LIMIT {
                warn!(
                    "Unusual export interface {} from {} (out of range, >= {}), treating it as missing",
                    interface, flow.exporter, EXPORT_INTERFACE_SANE_LIMIT
                );
                flow.export_interface = None;
            }
        }

        flow.socket_id = SocketId::from_flow(flow);
        flow.source_location = flow
            .source_addr
            .and_then(|addr| self.classifier.classify(addr))
            .map(String::from);
        flow.destination_location = flow
            .destination_addr
            .and_then(|addr| self.classifier.classify(addr))
            .map(String::from);
    }

    /// Uptime counters wrap; Extreme switches additionally report
    /// centiseconds in a 16 bit counter instead of milliseconds in 32 bits.
    fn duration_from_uptimes(&self, flow: &FlowRecord) -> Option<u64> {
        let start = flow.start_sys_uptime?;
        let end = flow.end_sys_uptime?;
        let duration = if self.extreme_networks_patch {
            if end >= start {
                (end - start) * 10
            } else {
                (end + 65_536 - start) * 10
            }
        } else if end >= start {
            end - start
        } else {
            end + 4_294_967_296 - start
        };
        Some(duration)
    }
}

#[async_trait]
impl StageHandler for EnrichHandler {
    async fn handle(
        &mut self,
        item: PipelineItem,
        director: &QueueDirector,
    ) -> Result<(), StageError> {
        let mut flow = match item {
            PipelineItem::Flow(flow) => flow,
            other => {
                return Err(StageError::Unexpected(format!(
                    "enrich stage cannot handle a {}",
                    other.kind_name()
                )))
            }
        };

        self.enrich(&mut flow);
        let partition = partition_key(&flow);
        director
            .submit(Stage::Enrich, PipelineItem::Flow(flow), partition)
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::NetworkGroup;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::net::Ipv4Addr;
    use test_case::test_case;

    fn classifier() -> LocationClassifier {
        LocationClassifier::from_groups(&[NetworkGroup {
            label: "Localnet".to_string(),
            networks: vec!["192.168.0.0/16".to_string()],
        }])
        .unwrap()
    }

    fn flow() -> FlowRecord {
        let mut flow = FlowRecord::new("10.0.0.9".to_string(), 1000, 1, 1);
        flow.source_addr = Some(Ipv4Addr::new(192, 168, 1, 10));
        flow.destination_addr = Some(Ipv4Addr::new(8, 8, 8, 8));
        flow.source_port = Some(51_515);
        flow.destination_port = Some(53);
        flow.protocol = Some(17);
        flow.start_sys_uptime = Some(1000);
        flow.end_sys_uptime = Some(2500);
        flow
    }

    #[test]
    fn derived_fields_are_filled_in() {
        let handler = EnrichHandler::new(classifier(), false);
        let mut flow = flow();

        handler.enrich(&mut flow);

        assert_eq!(flow.source_port_name, Some("51515".to_string()));
        assert_eq!(flow.destination_port_name, Some("domain".to_string()));
        assert_eq!(flow.protocol_name, Some("udp".to_string()));
        assert_eq!(flow.duration_ms, Some(1500));
        assert_eq!(flow.source_location, Some("Localnet".to_string()));
        assert_eq!(flow.destination_location, None);
        assert_eq!(
            flow.socket_id.as_ref().map(|id| id.as_str().to_string()),
            Some("192.168.1.10:51515-8.8.8.8:domain".to_string())
        );
    }

    #[test_case(1000, 2500, false, 1500; "plain difference")]
    #[test_case(2500, 1000, false, 4_294_965_796; "wrapped counter")]
    #[test_case(2500, 2500, false, 0; "equal uptimes")]
    #[test_case(100, 160, true, 600; "centisecond counter")]
    #[test_case(200, 100, true, 654_360; "wrapped centisecond counter")]
    fn duration_handles_counter_wraparound(start: u64, end: u64, patch: bool, expected: u64) {
        let handler = EnrichHandler::new(classifier(), patch);
        let mut flow = flow();
        flow.start_sys_uptime = Some(start);
        flow.end_sys_uptime = Some(end);

        handler.enrich(&mut flow);

        assert_eq!(flow.duration_ms, Some(expected));
    }

    #[test]
    fn exporter_supplied_duration_is_kept() {
        let handler = EnrichHandler::new(classifier(), false);
        let mut flow = flow();
        flow.duration_ms = Some(5);

        handler.enrich(&mut flow);

        assert_eq!(flow.duration_ms, Some(5));
    }

    #[test]
    fn out_of_range_export_interface_is_scrubbed() {
        let handler = EnrichHandler::new(classifier(), false);
        let mut flow = flow();
        flow.export_interface = Some(40_000);
        handler.enrich(&mut flow);
        assert_eq!(flow.export_interface, None);

        let mut flow = self::flow();
        flow.export_interface = Some(3);
        handler.enrich(&mut flow);
        assert_eq!(flow.export_interface, Some(3));
    }

    #[tokio::test]
    async fn enriched_flows_are_routed_by_socket_partition() {
        let (director, mut receivers) = QueueDirector::build(
            8,
            10,
            &[(Stage::Conversation, 2)].into_iter().collect::<BTreeMap<_, _>>(),
        );
        let mut handler = EnrichHandler::new(classifier(), false);

        let mut reply = flow();
        std::mem::swap(&mut reply.source_addr, &mut reply.destination_addr);
        std::mem::swap(&mut reply.source_port, &mut reply.destination_port);
        handler.handle(PipelineItem::Flow(flow()), &director).await.unwrap();
        handler.handle(PipelineItem::Flow(reply), &director).await.unwrap();

        let workers = receivers.get_mut(&Stage::Conversation).unwrap();
        let partition = (u64::from(u32::from(Ipv4Addr::new(192, 168, 1, 10)))
            + u64::from(u32::from(Ipv4Addr::new(8, 8, 8, 8)))) as usize;
        let pinned = &mut workers[partition % 2];
        assert!(pinned.try_recv().is_ok());
        assert!(pinned.try_recv().is_ok());
    }
}
