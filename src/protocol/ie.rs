use std::collections::HashMap;

use lazy_static::lazy_static;

lazy_static! {
    /// IANA information-element ids to names, the subset common exporters
    /// actually send. Unknown ids get a synthesized name via [`ie_name`].
    static ref INFORMATION_ELEMENTS: HashMap<u16, &'static str> = HashMap::from([
        (1, "octetDeltaCount"),
        (2, "packetDeltaCount"),
        (3, "deltaFlowCount"),
        (4, "protocolIdentifier"),
        (5, "ipClassOfService"),
        (6, "tcpControlBits"),
        (7, "sourceTransportPort"),
        (8, "sourceIPv4Address"),
        (9, "sourceIPv4PrefixLength"),
        (10, "ingressInterface"),
        (11, "destinationTransportPort"),
        (12, "destinationIPv4Address"),
        (13, "destinationIPv4PrefixLength"),
        (14, "egressInterface"),
        (15, "ipNextHopIPv4Address"),
        (16, "bgpSourceAsNumber"),
        (17, "bgpDestinationAsNumber"),
        (18, "bgpNextHopIPv4Address"),
        (19, "postMCastPacketDeltaCount"),
        (20, "postMCastOctetDeltaCount"),
        (21, "flowEndSysUpTime"),
        (22, "flowStartSysUpTime"),
        (23, "droppedOctetDeltaCount"),
        (24, "droppedPacketDeltaCount"),
        (25, "minimumIpTotalLength"),
        (26, "maximumIpTotalLength"),
        (27, "sourceIPv6Address"),
        (28, "destinationIPv6Address"),
        (29, "sourceIPv6PrefixLength"),
        (30, "destinationIPv6PrefixLength"),
        (31, "flowLabelIPv6"),
        (32, "icmpTypeCodeIPv4"),
        (33, "igmpType"),
        (36, "flowActiveTimeout"),
        (37, "flowIdleTimeout"),
        (40, "exportedOctetTotalCount"),
        (41, "exportedMessageTotalCount"),
        (42, "exportedFlowRecordTotalCount"),
        (46, "mplsTopLabelType"),
        (47, "mplsTopLabelIPv4Address"),
        (52, "minimumTTL"),
        (53, "maximumTTL"),
        (54, "fragmentIdentification"),
        (55, "postIpClassOfService"),
        (56, "sourceMacAddress"),
        (57, "postDestinationMacAddress"),
        (58, "vlanId"),
        (59, "postVlanId"),
        (60, "ipVersion"),
        (61, "flowDirection"),
        (64, "ipv6ExtensionHeaders"),
        (80, "destinationMacAddress"),
        (81, "postSourceMacAddress"),
        (88, "fragmentOffset"),
        (98, "postIpDiffServCodePoint"),
        (136, "flowEndReason"),
        (148, "flowId"),
        (150, "flowStartSeconds"),
        (151, "flowEndSeconds"),
        (152, "flowStartMilliseconds"),
        (153, "flowEndMilliseconds"),
        (154, "flowStartMicroseconds"),
        (155, "flowEndMicroseconds"),
        (161, "flowDurationMilliseconds"),
        (162, "flowDurationMicroseconds"),
        (176, "icmpTypeIPv4"),
        (177, "icmpCodeIPv4"),
        (184, "tcpSequenceNumber"),
        (185, "tcpAcknowledgementNumber"),
        (186, "tcpWindowSize"),
        (189, "ipHeaderLength"),
        (192, "ipTTL"),
        (205, "udpMessageLength"),
        (206, "isMulticast"),
        (224, "ipTotalLength"),
    ]);
}

pub fn ie_name(id: u16) -> String {
    match INFORMATION_ELEMENTS.get(&id) {
        Some(name) => (*name).to_string(),
        None => format!("informationElement{}", id),
    }
}

pub fn is_ipv4_element(name: &str) -> bool {
    name.ends_with("IPv4Address")
}

pub fn is_mac_element(name: &str) -> bool {
    name.ends_with("MacAddress")
}
