use std::collections::HashMap;
use std::net::Ipv4Addr;

use log::{debug, warn};

use super::errors::DecodeError;
use super::ie;
use crate::consts::IPFIX_VERSION;
use crate::flow::{FieldValue, FlowRecord, MacAddr};

const HEADER_LEN: usize = 16;
const SET_HEADER_LEN: usize = 4;
const TEMPLATE_SET_ID: u16 = 2;

const IE_OCTET_DELTA_COUNT: u16 = 1;
const IE_PACKET_DELTA_COUNT: u16 = 2;
const IE_PROTOCOL_IDENTIFIER: u16 = 4;
const IE_SOURCE_TRANSPORT_PORT: u16 = 7;
const IE_SOURCE_IPV4_ADDRESS: u16 = 8;
const IE_INGRESS_INTERFACE: u16 = 10;
const IE_DESTINATION_TRANSPORT_PORT: u16 = 11;
const IE_DESTINATION_IPV4_ADDRESS: u16 = 12;
const IE_FLOW_END_SYS_UP_TIME: u16 = 21;
const IE_FLOW_START_SYS_UP_TIME: u16 = 22;
const IE_FLOW_DURATION_MILLISECONDS: u16 = 161;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemplateField {
    pub id: u16,
    pub length: u16,
    pub name: String,
}

/// Ordered field layout of one template. Never mutated after registration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemplateDescriptor {
    fields: Vec<TemplateField>,
    record_width: usize,
}

impl TemplateDescriptor {
    pub fn new(fields: Vec<TemplateField>) -> Self {
        let record_width = fields.iter().map(|f| f.length as usize).sum();
        TemplateDescriptor {
            fields,
            record_width,
        }
    }

    pub fn record_width(&self) -> usize {
        self.record_width
    }

    pub fn fields(&self) -> &[TemplateField] {
        &self.fields
    }
}

/// Templates keyed by exporter and template id. First definition for a key
/// wins; redefinitions are ignored. Grows for the process lifetime, bounded
/// by the number of distinct exporters and templates seen.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: HashMap<String, HashMap<u16, TemplateDescriptor>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, exporter: &str, template_id: u16, descriptor: TemplateDescriptor) {
        let by_exporter = self.templates.entry(exporter.to_string()).or_default();
        match by_exporter.entry(template_id) {
            std::collections::hash_map::Entry::Vacant(slot) => {
                debug!(
                    "registered template {} for exporter {} ({} fields, {} bytes per record)",
                    template_id,
                    exporter,
                    descriptor.fields.len(),
                    descriptor.record_width
                );
                slot.insert(descriptor);
            }
            std::collections::hash_map::Entry::Occupied(_) => {
                debug!(
                    "template {} from exporter {} already registered, keeping the first definition",
                    template_id, exporter
                );
            }
        }
    }

    pub fn get(&self, exporter: &str, template_id: u16) -> Option<&TemplateDescriptor> {
        self.templates.get(exporter)?.get(&template_id)
    }

    pub fn len(&self) -> usize {
        self.templates.values().map(|t| t.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// IPFIX (Netflow v10) message decoder. Stateful only through the template
/// registry it owns; one instance belongs to exactly one decode worker.
#[derive(Debug, Default)]
pub struct IpfixDecoder {
    registry: TemplateRegistry,
}

impl IpfixDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    /// Decodes one datagram into flow records, registering any templates it
    /// carries along the way. A data set referencing an unknown template
    /// fails the whole datagram; a set running past the datagram end drops
    /// that set but keeps records decoded from earlier sets.
    pub fn decode(
        &mut self,
        datagram: &[u8],
        exporter: &str,
    ) -> Result<Vec<FlowRecord>, DecodeError> {
        if datagram.len() < HEADER_LEN {
            return Err(DecodeError::Protocol(format!(
                "datagram of {} bytes is shorter than the fixed header",
                datagram.len()
            )));
        }

        let version = be16(&datagram[0..2]);
        if version != IPFIX_VERSION {
            return Err(DecodeError::InvalidProtocol {
                expected: IPFIX_VERSION,
                got: version,
            });
        }

        let total_len = be16(&datagram[2..4]) as usize;
        let export_time = be32(&datagram[4..8]) as u64;
        let sequence = be32(&datagram[8..12]);
        let domain_id = be32(&datagram[12..16]);

        let hard_end = total_len.min(datagram.len());
        let mut records = Vec::new();
        let mut violation = None;
        let mut offset = HEADER_LEN;

        while offset + SET_HEADER_LEN <= hard_end {
            let set_id = be16(&datagram[offset..offset + 2]);
            let set_len = be16(&datagram[offset + 2..offset + 4]) as usize;

            if set_len < SET_HEADER_LEN {
                violation = Some(format!(
                    "set {} declares length {} shorter than its own header",
                    set_id, set_len
                ));
                break;
            }
            let set_end = offset + set_len;
            if set_end > hard_end {
                violation = Some(format!(
                    "set {} at offset {} runs past the datagram end",
                    set_id, offset
                ));
                break;
            }

            let payload = &datagram[offset + SET_HEADER_LEN..set_end];
            if set_id == TEMPLATE_SET_ID {
                if let Err(msg) = self.register_templates(payload, exporter) {
                    // Set boundary is still trustworthy, later sets may decode.
                    violation = Some(msg);
                }
            } else {
                match self.registry.get(exporter, set_id) {
                    None => {
                        return Err(DecodeError::NoTemplate {
                            exporter: exporter.to_string(),
                            template_id: set_id,
                        });
                    }
                    Some(descriptor) => {
                        decode_data_set(
                            payload,
                            descriptor,
                            exporter,
                            export_time,
                            sequence,
                            domain_id,
                            &mut records,
                        );
                    }
                }
            }
            offset = set_end;
        }

        match violation {
            Some(msg) if records.is_empty() => Err(DecodeError::Protocol(msg)),
            Some(msg) => {
                debug!("partially decoded datagram from {}: {}", exporter, msg);
                Ok(records)
            }
            None => Ok(records),
        }
    }

    /// Templates are packed back to back inside a template set; under four
    /// trailing bytes is padding.
    fn register_templates(&mut self, payload: &[u8], exporter: &str) -> Result<(), String> {
        let mut off = 0;
        while off + 4 <= payload.len() {
            let template_id = be16(&payload[off..off + 2]);
            let field_count = be16(&payload[off + 2..off + 4]) as usize;
            if template_id == 0 && field_count == 0 {
                break; // zero padding
            }
            off += 4;

            let fields_end = off + field_count * 4;
            if fields_end > payload.len() {
                return Err(format!(
                    "template {} declares {} fields but the set ends early",
                    template_id, field_count
                ));
            }

            let mut fields = Vec::with_capacity(field_count);
            while off < fields_end {
                let id = be16(&payload[off..off + 2]);
                let length = be16(&payload[off + 2..off + 4]);
                fields.push(TemplateField {
                    id,
                    length,
                    name: ie::ie_name(id),
                });
                off += 4;
            }

            let descriptor = TemplateDescriptor::new(fields);
            if descriptor.record_width() == 0 {
                warn!(
                    "ignoring zero-width template {} from exporter {}",
                    template_id, exporter
                );
                continue;
            }
            self.registry.register(exporter, template_id, descriptor);
        }
        Ok(())
    }
}

/// Slices records of the template's width while a full record still fits.
/// A shorter tail is exporter padding and is dropped.
fn decode_data_set(
    payload: &[u8],
    descriptor: &TemplateDescriptor,
    exporter: &str,
    export_time: u64,
    sequence: u32,
    domain_id: u32,
    records: &mut Vec<FlowRecord>,
) {
    let width = descriptor.record_width();
    let mut off = 0;
    while off + width <= payload.len() {
        let mut record = FlowRecord::new(exporter.to_string(), export_time, sequence, domain_id);
        let mut field_off = off;
        for field in descriptor.fields() {
            let raw = &payload[field_off..field_off + field.length as usize];
            apply_field(&mut record, field, raw);
            field_off += field.length as usize;
        }
        records.push(record);
        off += width;
    }
}

fn apply_field(record: &mut FlowRecord, field: &TemplateField, raw: &[u8]) {
    match field.id {
        IE_OCTET_DELTA_COUNT => record.octet_count = be_uint(raw),
        IE_PACKET_DELTA_COUNT => record.packet_count = be_uint(raw),
        IE_PROTOCOL_IDENTIFIER => record.protocol = Some(be_uint(raw) as u8),
        IE_SOURCE_TRANSPORT_PORT => record.source_port = Some(be_uint(raw) as u16),
        IE_SOURCE_IPV4_ADDRESS => record.source_addr = Some(be_ipv4(raw)),
        IE_INGRESS_INTERFACE => record.export_interface = Some(be_uint(raw) as u32),
        IE_DESTINATION_TRANSPORT_PORT => record.destination_port = Some(be_uint(raw) as u16),
        IE_DESTINATION_IPV4_ADDRESS => record.destination_addr = Some(be_ipv4(raw)),
        IE_FLOW_END_SYS_UP_TIME => record.end_sys_uptime = Some(be_uint(raw)),
        IE_FLOW_START_SYS_UP_TIME => record.start_sys_uptime = Some(be_uint(raw)),
        IE_FLOW_DURATION_MILLISECONDS => record.duration_ms = Some(be_uint(raw)),
        _ => {
            let value = if ie::is_ipv4_element(&field.name) {
                FieldValue::Addr(be_ipv4(raw))
            } else if ie::is_mac_element(&field.name) {
                FieldValue::Mac(MacAddr::from_u64(be_uint(raw)))
            } else {
                FieldValue::Unsigned(be_uint(raw))
            };
            record.extensions.insert(field.name.clone(), value);
        }
    }
}

fn be16(raw: &[u8]) -> u16 {
    u16::from_be_bytes([raw[0], raw[1]])
}

fn be32(raw: &[u8]) -> u32 {
    u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]])
}

/// Big-endian unsigned interpretation of an arbitrary-width field. Fields
/// wider than eight bytes keep their low eight.
fn be_uint(raw: &[u8]) -> u64 {
    let tail = if raw.len() > 8 {
        &raw[raw.len() - 8..]
    } else {
        raw
    };
    tail.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

fn be_ipv4(raw: &[u8]) -> Ipv4Addr {
    Ipv4Addr::from(be_uint(raw) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    const EXPORTER: &str = "192.168.1.1";

    fn datagram(export_time: u32, sequence: u32, domain_id: u32, sets: &[Vec<u8>]) -> Vec<u8> {
        let total: usize = HEADER_LEN + sets.iter().map(|s| s.len()).sum::<usize>();
        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(&10u16.to_be_bytes());
        buf.extend_from_slice(&(total as u16).to_be_bytes());
        buf.extend_from_slice(&export_time.to_be_bytes());
        buf.extend_from_slice(&sequence.to_be_bytes());
        buf.extend_from_slice(&domain_id.to_be_bytes());
        for set in sets {
            buf.extend_from_slice(set);
        }
        buf
    }

    fn template_set(templates: &[(u16, &[(u16, u16)])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (template_id, fields) in templates {
            body.extend_from_slice(&template_id.to_be_bytes());
            body.extend_from_slice(&(fields.len() as u16).to_be_bytes());
            for (id, length) in *fields {
                body.extend_from_slice(&id.to_be_bytes());
                body.extend_from_slice(&length.to_be_bytes());
            }
        }
        let mut set = Vec::new();
        set.extend_from_slice(&TEMPLATE_SET_ID.to_be_bytes());
        set.extend_from_slice(&((body.len() + SET_HEADER_LEN) as u16).to_be_bytes());
        set.extend_from_slice(&body);
        set
    }

    fn data_set(set_id: u16, payload: &[u8]) -> Vec<u8> {
        let mut set = Vec::new();
        set.extend_from_slice(&set_id.to_be_bytes());
        set.extend_from_slice(&((payload.len() + SET_HEADER_LEN) as u16).to_be_bytes());
        set.extend_from_slice(payload);
        set
    }

    const FIVE_TUPLE: &[(u16, u16)] = &[
        (IE_SOURCE_IPV4_ADDRESS, 4),
        (IE_DESTINATION_IPV4_ADDRESS, 4),
        (IE_SOURCE_TRANSPORT_PORT, 2),
        (IE_DESTINATION_TRANSPORT_PORT, 2),
        (IE_OCTET_DELTA_COUNT, 4),
        (IE_PACKET_DELTA_COUNT, 4),
    ];

    fn five_tuple_record(
        src: [u8; 4],
        dst: [u8; 4],
        sport: u16,
        dport: u16,
        octets: u32,
        packets: u32,
    ) -> Vec<u8> {
        let mut rec = Vec::new();
        rec.extend_from_slice(&src);
        rec.extend_from_slice(&dst);
        rec.extend_from_slice(&sport.to_be_bytes());
        rec.extend_from_slice(&dport.to_be_bytes());
        rec.extend_from_slice(&octets.to_be_bytes());
        rec.extend_from_slice(&packets.to_be_bytes());
        rec
    }

    #[test]
    fn template_then_data_yields_one_record_per_slice() {
        let mut decoder = IpfixDecoder::new();
        let mut payload = five_tuple_record([10, 0, 0, 1], [10, 0, 0, 2], 50000, 80, 6000, 12);
        payload.extend(five_tuple_record(
            [10, 0, 0, 2],
            [10, 0, 0, 1],
            80,
            50000,
            2000,
            4,
        ));

        let dgram = datagram(
            1_400_000_000,
            7,
            99,
            &[template_set(&[(256, FIVE_TUPLE)]), data_set(256, &payload)],
        );

        let records = decoder.decode(&dgram, EXPORTER).unwrap();
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.exporter, EXPORTER);
        assert_eq!(first.export_time, 1_400_000_000);
        assert_eq!(first.sequence, 7);
        assert_eq!(first.domain_id, 99);
        assert_eq!(first.source_addr, Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(first.destination_addr, Some(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(first.source_port, Some(50000));
        assert_eq!(first.destination_port, Some(80));
        assert_eq!(first.octet_count, 6000);
        assert_eq!(first.packet_count, 12);

        assert_eq!(records[1].source_addr, Some(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(records[1].octet_count, 2000);
    }

    #[test]
    fn data_set_before_its_template_fails_then_recovers() {
        let mut decoder = IpfixDecoder::new();
        let payload = five_tuple_record([10, 0, 0, 1], [10, 0, 0, 2], 1234, 53, 100, 1);

        let early = datagram(1_400_000_000, 1, 0, &[data_set(256, &payload)]);
        assert_eq!(
            decoder.decode(&early, EXPORTER),
            Err(DecodeError::NoTemplate {
                exporter: EXPORTER.to_string(),
                template_id: 256,
            })
        );

        let with_template = datagram(1_400_000_001, 2, 0, &[template_set(&[(256, FIVE_TUPLE)])]);
        assert_eq!(decoder.decode(&with_template, EXPORTER).unwrap().len(), 0);

        let late = datagram(1_400_000_002, 3, 0, &[data_set(256, &payload)]);
        assert_eq!(decoder.decode(&late, EXPORTER).unwrap().len(), 1);
    }

    #[test]
    fn templates_are_tracked_per_exporter() {
        let mut decoder = IpfixDecoder::new();
        let template = datagram(1_400_000_000, 1, 0, &[template_set(&[(256, FIVE_TUPLE)])]);
        decoder.decode(&template, "10.9.9.1").unwrap();

        let payload = five_tuple_record([10, 0, 0, 1], [10, 0, 0, 2], 1234, 53, 100, 1);
        let data = datagram(1_400_000_001, 2, 0, &[data_set(256, &payload)]);
        assert!(matches!(
            decoder.decode(&data, "10.9.9.2"),
            Err(DecodeError::NoTemplate { .. })
        ));
        assert_eq!(decoder.decode(&data, "10.9.9.1").unwrap().len(), 1);
    }

    #[test]
    fn first_template_definition_wins() {
        let mut decoder = IpfixDecoder::new();
        let first = datagram(
            1_400_000_000,
            1,
            0,
            &[template_set(&[(256, &[(IE_OCTET_DELTA_COUNT, 4)])])],
        );
        decoder.decode(&first, EXPORTER).unwrap();

        let redefined = datagram(
            1_400_000_001,
            2,
            0,
            &[template_set(&[(256, &[(IE_OCTET_DELTA_COUNT, 8)])])],
        );
        decoder.decode(&redefined, EXPORTER).unwrap();

        let descriptor = decoder.registry().get(EXPORTER, 256).unwrap();
        assert_eq!(descriptor.record_width(), 4);
    }

    #[test_case(9 ; "netflow v9")]
    #[test_case(5 ; "netflow v5")]
    #[test_case(0 ; "zeroed version")]
    fn version_mismatch_is_invalid_protocol(version: u16) {
        let mut decoder = IpfixDecoder::new();
        let mut dgram = datagram(1_400_000_000, 1, 0, &[]);
        dgram[0..2].copy_from_slice(&version.to_be_bytes());

        assert_eq!(
            decoder.decode(&dgram, EXPORTER),
            Err(DecodeError::InvalidProtocol {
                expected: 10,
                got: version,
            })
        );
    }

    #[test]
    fn short_datagram_is_a_protocol_error() {
        let mut decoder = IpfixDecoder::new();
        assert!(matches!(
            decoder.decode(&[0u8; 7], EXPORTER),
            Err(DecodeError::Protocol(_))
        ));
    }

    #[test]
    fn set_running_past_the_end_is_a_protocol_error() {
        let mut decoder = IpfixDecoder::new();
        let mut bad_set = data_set(300, &[0u8; 4]);
        // Claim more bytes than the datagram carries.
        bad_set[2..4].copy_from_slice(&200u16.to_be_bytes());
        let dgram = datagram(1_400_000_000, 1, 0, &[bad_set]);

        assert!(matches!(
            decoder.decode(&dgram, EXPORTER),
            Err(DecodeError::Protocol(_))
        ));
    }

    #[test]
    fn truncated_trailing_set_keeps_earlier_records() {
        let mut decoder = IpfixDecoder::new();
        let template = datagram(1_400_000_000, 1, 0, &[template_set(&[(256, FIVE_TUPLE)])]);
        decoder.decode(&template, EXPORTER).unwrap();

        let payload = five_tuple_record([10, 0, 0, 1], [10, 0, 0, 2], 1234, 80, 900, 3);
        let mut truncated = data_set(256, &payload[..8]);
        truncated[2..4].copy_from_slice(&500u16.to_be_bytes());

        let dgram = datagram(
            1_400_000_001,
            2,
            0,
            &[data_set(256, &payload), truncated],
        );
        let records = decoder.decode(&dgram, EXPORTER).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].octet_count, 900);
    }

    #[test]
    fn trailing_padding_inside_a_data_set_is_dropped() {
        let mut decoder = IpfixDecoder::new();
        let template = datagram(1_400_000_000, 1, 0, &[template_set(&[(256, FIVE_TUPLE)])]);
        decoder.decode(&template, EXPORTER).unwrap();

        let mut payload = five_tuple_record([10, 0, 0, 1], [10, 0, 0, 2], 1234, 80, 900, 3);
        payload.extend_from_slice(&[0u8; 3]);

        let dgram = datagram(1_400_000_001, 2, 0, &[data_set(256, &payload)]);
        assert_eq!(decoder.decode(&dgram, EXPORTER).unwrap().len(), 1);
    }

    #[test]
    fn two_templates_in_one_set_both_register() {
        let mut decoder = IpfixDecoder::new();
        let dgram = datagram(
            1_400_000_000,
            1,
            0,
            &[template_set(&[
                (256, FIVE_TUPLE),
                (257, &[(IE_OCTET_DELTA_COUNT, 8)]),
            ])],
        );
        decoder.decode(&dgram, EXPORTER).unwrap();

        assert_eq!(decoder.registry().len(), 2);
        assert_eq!(decoder.registry().get(EXPORTER, 257).unwrap().record_width(), 8);
    }

    #[test]
    fn special_typed_fields_and_unknown_ies_land_in_the_bag() {
        let mut decoder = IpfixDecoder::new();
        let fields: &[(u16, u16)] = &[
            (56, 6),    // sourceMacAddress
            (15, 4),    // ipNextHopIPv4Address
            (9999, 2),  // not in the catalog
        ];
        let template = datagram(1_400_000_000, 1, 0, &[template_set(&[(400, fields)])]);
        decoder.decode(&template, EXPORTER).unwrap();

        let mut payload = Vec::new();
        payload.extend_from_slice(&[0xaa, 0xbb, 0xcc, 0x00, 0x11, 0x22]);
        payload.extend_from_slice(&[192, 0, 2, 1]);
        payload.extend_from_slice(&513u16.to_be_bytes());

        let dgram = datagram(1_400_000_001, 2, 0, &[data_set(400, &payload)]);
        let records = decoder.decode(&dgram, EXPORTER).unwrap();
        assert_eq!(records.len(), 1);

        let bag = &records[0].extensions;
        assert_eq!(
            bag.get("sourceMacAddress"),
            Some(&FieldValue::Mac(MacAddr::new([
                0xaa, 0xbb, 0xcc, 0x00, 0x11, 0x22
            ])))
        );
        assert_eq!(
            bag.get("ipNextHopIPv4Address"),
            Some(&FieldValue::Addr(Ipv4Addr::new(192, 0, 2, 1)))
        );
        assert_eq!(
            bag.get("informationElement9999"),
            Some(&FieldValue::Unsigned(513))
        );
    }

    #[test]
    fn variable_width_counters_decode_big_endian() {
        let mut decoder = IpfixDecoder::new();
        let fields: &[(u16, u16)] = &[(IE_OCTET_DELTA_COUNT, 8), (IE_PACKET_DELTA_COUNT, 2)];
        let template = datagram(1_400_000_000, 1, 0, &[template_set(&[(300, fields)])]);
        decoder.decode(&template, EXPORTER).unwrap();

        let mut payload = Vec::new();
        payload.extend_from_slice(&0x0102_0304_0506_0708u64.to_be_bytes());
        payload.extend_from_slice(&0xfffeu16.to_be_bytes());

        let dgram = datagram(1_400_000_001, 2, 0, &[data_set(300, &payload)]);
        let records = decoder.decode(&dgram, EXPORTER).unwrap();
        assert_eq!(records[0].octet_count, 0x0102_0304_0506_0708);
        assert_eq!(records[0].packet_count, 0xfffe);
    }
}
