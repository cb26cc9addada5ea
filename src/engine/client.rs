use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::dns::Ipv4Dialer;
use super::error::FastError;
use super::types::TransportConfig;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

/// Build the async reqwest client shared by discovery and measurement.
pub fn build_client(config: &TransportConfig) -> Result<Client, FastError> {
    let dialer = if config.ipv4_only {
        Some(Ipv4Dialer::system()?)
    } else {
        None
    };
    build_client_with(dialer)
}

/// Same as [`build_client`] with an explicit IPv4 dial strategy.
pub fn build_client_with(dialer: Option<Ipv4Dialer>) -> Result<Client, FastError> {
    let mut builder = Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .tcp_keepalive(TCP_KEEPALIVE);

    if let Some(dialer) = dialer {
        debug!("Restricting connections to IPv4 A records");
        builder = builder.dns_resolver(Arc::new(dialer)).http1_only();
    }

    Ok(builder.build()?)
}
