//! Contracts for the components the pipeline talks to but does not own:
//! risk scoring and reverse hostname lookup. Both get a chance to persist
//! state through `store` when their worker shuts down.

use std::net::Ipv4Addr;

use async_trait::async_trait;

#[derive(Clone, Debug, PartialEq)]
pub struct RiskAssessment {
    /// -1.0 (certainly hostile) to 1.0 (certainly benign).
    pub score: f64,
    pub reason: String,
}

#[async_trait]
pub trait RiskScorer: Send {
    async fn assess(
        &mut self,
        source: Ipv4Addr,
        destination: Ipv4Addr,
        destination_port: Option<u16>,
    ) -> RiskAssessment;

    async fn store(&mut self) {}
}

#[async_trait]
pub trait HostnameResolver: Send {
    async fn resolve(&mut self, addr: Ipv4Addr) -> String;

    async fn store(&mut self) {}
}

/// Resolver used when reverse lookup is not wired up; hands the address
/// back in dotted-quad form, which is what a failed lookup would yield too.
#[derive(Debug, Default)]
pub struct IdentityResolver;

#[async_trait]
impl HostnameResolver for IdentityResolver {
    async fn resolve(&mut self, addr: Ipv4Addr) -> String {
        addr.to_string()
    }
}
