use core::fmt;

use serde::Deserialize;

use crate::protocol::ipfix::IpfixDecoder;
use crate::protocol::netflow_v5::NetflowV5Decoder;
use crate::protocol::Decoder;
use crate::sinks::{FileSink, ScreenSink, Sink, UdpSink};

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub enum ProtocolVariants {
    #[serde(rename = "ipfix")]
    Ipfix,
    #[serde(rename = "netflow_v5")]
    NetflowV5,
}

#[derive(Debug)]
pub enum ConstructorErr {
    FileSinkErr,
    UdpSinkErr,
}

impl fmt::Display for ConstructorErr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::FileSinkErr => write!(f, "file sink requires a path"),
            Self::UdpSinkErr => write!(f, "udp sink requires a host and a port"),
        }
    }
}

impl ProtocolVariants {
    pub fn construct_decoder(&self) -> Decoder {
        match *self {
            Self::Ipfix => Decoder::Ipfix(IpfixDecoder::new()),
            Self::NetflowV5 => Decoder::NetflowV5(NetflowV5Decoder::new()),
        }
    }
}

impl From<ProtocolVariants> for String {
    fn from(variant: ProtocolVariants) -> Self {
        match variant {
            ProtocolVariants::Ipfix => "ipfix".to_string(),
            ProtocolVariants::NetflowV5 => "netflow_v5".to_string(),
        }
    }
}

impl fmt::Display for ProtocolVariants {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Ipfix => "ipfix",
            Self::NetflowV5 => "netflow_v5",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub enum SinkVariants {
    #[serde(rename = "file")]
    File,
    #[serde(rename = "screen")]
    Screen,
    #[serde(rename = "udp")]
    Udp,
}

impl SinkVariants {
    pub fn construct_sink(&self, settings: SinkSettings) -> Result<Box<dyn Sink>, ConstructorErr> {
        match *self {
            Self::File => Ok(Box::new(FileSink::new(
                settings.path.ok_or(ConstructorErr::FileSinkErr)?,
                settings.include_stats.unwrap_or(false),
            ))),
            Self::Screen => Ok(Box::new(ScreenSink::default())),
            Self::Udp => Ok(Box::new(UdpSink::new(
                settings.host.ok_or(ConstructorErr::UdpSinkErr)?,
                settings.port.ok_or(ConstructorErr::UdpSinkErr)?,
            ))),
        }
    }
}

impl From<SinkVariants> for String {
    fn from(variant: SinkVariants) -> Self {
        match variant {
            SinkVariants::File => "file".to_string(),
            SinkVariants::Screen => "screen".to_string(),
            SinkVariants::Udp => "udp".to_string(),
        }
    }
}

impl fmt::Display for SinkVariants {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::File => "file",
            Self::Screen => "screen",
            Self::Udp => "udp",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SinkConfig {
    pub destination: SinkVariants,
    pub settings: SinkSettings,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SinkSettings {
    pub path: Option<String>,

    pub include_stats: Option<bool>,

    pub host: Option<String>,

    pub port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct NetworkGroup {
    pub label: String,

    pub networks: Vec<String>,
}

/// The two conversation ttls, seconds. The short one applies once a response
/// has been seen, the long one keeps one-sided conversations around in case
/// the response is still on its way.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ConversationTtl {
    #[serde(default = "default_ttl_response_received")]
    pub response_received: u64,

    #[serde(default = "default_ttl_no_response")]
    pub no_response: u64,
}

impl Default for ConversationTtl {
    fn default() -> Self {
        Self {
            response_received: default_ttl_response_received(),
            no_response: default_ttl_no_response(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Configuration {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_protocol")]
    pub protocol: ProtocolVariants,

    #[serde(default = "default_flow_log_interval")]
    pub flow_log_interval: u64,

    #[serde(default)]
    pub extreme_networks_patch: bool,

    #[serde(default = "default_stats_cache_seconds")]
    pub stats_cache_seconds: u64,

    #[serde(default = "default_queues_maxsize")]
    pub queues_maxsize: usize,

    #[serde(default = "default_stage_workers")]
    pub enrich_workers: usize,

    #[serde(default = "default_stage_workers")]
    pub conversation_workers: usize,

    #[serde(default)]
    pub conversation_ttl: ConversationTtl,

    #[serde(default = "default_security_sample_percentage")]
    pub security_sample_percentage: f64,

    #[serde(default = "default_spill_directory")]
    pub spill_directory: String,

    #[serde(default = "default_spill_chunk_size")]
    pub spill_chunk_size: usize,

    #[serde(default = "default_sinks")]
    pub sinks: Vec<SinkConfig>,

    #[serde(default = "default_networks")]
    pub networks: Vec<NetworkGroup>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    4739
}

fn default_protocol() -> ProtocolVariants {
    ProtocolVariants::Ipfix
}

fn default_flow_log_interval() -> u64 {
    10
}

fn default_stats_cache_seconds() -> u64 {
    30
}

fn default_queues_maxsize() -> usize {
    80_000
}

fn default_stage_workers() -> usize {
    2
}

fn default_ttl_response_received() -> u64 {
    60
}

fn default_ttl_no_response() -> u64 {
    600
}

fn default_security_sample_percentage() -> f64 {
    0.1
}

fn default_spill_directory() -> String {
    "data/flows".to_string()
}

fn default_spill_chunk_size() -> usize {
    1000
}

fn default_sinks() -> Vec<SinkConfig> {
    vec![SinkConfig {
        destination: SinkVariants::File,
        settings: SinkSettings {
            path: Some("ipfix.conversations.txt".to_string()),
            include_stats: None,
            host: None,
            port: None,
        },
    }]
}

fn default_networks() -> Vec<NetworkGroup> {
    vec![
        NetworkGroup {
            label: "Washington".to_string(),
            networks: vec!["150.10.0.0/16".to_string()],
        },
        NetworkGroup {
            label: "Localhost".to_string(),
            networks: vec!["127.0.0.0/24".to_string()],
        },
        NetworkGroup {
            label: "Localnet".to_string(),
            networks: vec![
                "10.0.0.0/8".to_string(),
                "172.16.0.0/12".to_string(),
                "192.168.0.0/16".to_string(),
            ],
        },
    ]
}
