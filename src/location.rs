use std::net::Ipv4Addr;

use ipnetwork::{IpNetworkError, Ipv4Network};

use crate::settings::NetworkGroup;

/// Maps addresses onto configured home-network labels. Flows whose endpoint
/// falls outside every configured range stay unlabelled, which downstream
/// reads as "not our network".
#[derive(Clone, Debug)]
pub struct LocationClassifier {
    ranges: Vec<(Ipv4Network, String)>,
}

impl LocationClassifier {
    pub fn from_groups(groups: &[NetworkGroup]) -> Result<Self, IpNetworkError> {
        let mut ranges = Vec::new();
        for group in groups {
            for network in &group.networks {
                ranges.push((network.parse::<Ipv4Network>()?, group.label.clone()));
            }
        }
        Ok(Self { ranges })
    }

    pub fn classify(&self, addr: Ipv4Addr) -> Option<&str> {
        self.ranges
            .iter()
            .find(|(network, _)| network.contains(addr))
            .map(|(_, label)| label.as_str())
    }
}
