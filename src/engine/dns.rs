//! IPv4-only name resolution for the HTTP transport.
//!
//! Only "A" records are queried. There is no AAAA fallback: a host without
//! an A record fails to resolve.

use async_trait::async_trait;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tracing::debug;
use trust_dns_resolver::TokioAsyncResolver;

use super::error::FastError;

/// Source of A records for a hostname.
#[async_trait]
pub trait ARecordLookup: Send + Sync {
    async fn lookup_a(&self, host: &str) -> Result<Vec<Ipv4Addr>, FastError>;
}

/// Queries the nameservers from the system configuration.
pub struct SystemLookup {
    resolver: TokioAsyncResolver,
}

impl SystemLookup {
    pub fn from_system_conf() -> Result<Self, FastError> {
        let resolver =
            TokioAsyncResolver::tokio_from_system_conf().map_err(|e| FastError::Resolution {
                host: "system configuration".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { resolver })
    }
}

#[async_trait]
impl ARecordLookup for SystemLookup {
    async fn lookup_a(&self, host: &str) -> Result<Vec<Ipv4Addr>, FastError> {
        let lookup = self
            .resolver
            .ipv4_lookup(host)
            .await
            .map_err(|e| FastError::Resolution {
                host: host.to_string(),
                reason: e.to_string(),
            })?;
        Ok(lookup.iter().map(|a| a.0).collect())
    }
}

/// Dial strategy that rewrites every connection target to a literal IPv4
/// address before the TCP connect.
///
/// Installed as the client's resolver; the connector keeps the port from
/// the request URL.
#[derive(Clone)]
pub struct Ipv4Dialer {
    lookup: Arc<dyn ARecordLookup>,
}

impl Ipv4Dialer {
    pub fn new(lookup: Arc<dyn ARecordLookup>) -> Self {
        Self { lookup }
    }

    pub fn system() -> Result<Self, FastError> {
        Ok(Self::new(Arc::new(SystemLookup::from_system_conf()?)))
    }
}

impl Resolve for Ipv4Dialer {
    fn resolve(&self, name: Name) -> Resolving {
        let lookup = Arc::clone(&self.lookup);
        Box::pin(async move {
            let ip = resolve_first(lookup.as_ref(), name.as_str()).await?;
            // the connector replaces port 0 with the port from the URL
            let addrs: Addrs = Box::new(std::iter::once(SocketAddr::new(IpAddr::V4(ip), 0)));
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(addrs)
        })
    }
}

async fn resolve_first(lookup: &dyn ARecordLookup, host: &str) -> Result<Ipv4Addr, FastError> {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(ip);
    }
    let ip = lookup
        .lookup_a(host)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| FastError::Resolution {
            host: host.to_string(),
            reason: "no A records".to_string(),
        })?;
    debug!("Resolved {host} to {ip}");
    Ok(ip)
}
