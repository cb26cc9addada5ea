use reqwest::Url;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;

use super::error::FastError;
use crate::output::format::UnitPolicy;

/// Ordered, non-empty list of download targets returned by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSet(Vec<Url>);

impl EndpointSet {
    pub fn new(urls: Vec<Url>) -> Result<Self, FastError> {
        if urls.is_empty() {
            return Err(FastError::Discovery(
                "provider returned no usable endpoints".to_string(),
            ));
        }
        Ok(Self(urls))
    }

    pub fn urls(&self) -> &[Url] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl IntoIterator for EndpointSet {
    type Item = Url;
    type IntoIter = std::vec::IntoIter<Url>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Throughput figure in kilobits per second.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateEstimate {
    /// Position in the emitted sequence, strictly increasing.
    pub index: u64,
    pub kbps: f64,
}

/// Messages flowing from the measurement engine to the status consumer.
///
/// A run that succeeds ends with exactly one `Final`; a stream that closes
/// without one belongs to an aborted run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateEvent {
    Sample(RateEstimate),
    Final(RateEstimate),
}

impl RateEvent {
    pub fn estimate(&self) -> RateEstimate {
        match self {
            RateEvent::Sample(e) | RateEvent::Final(e) => *e,
        }
    }
}

pub type RateSender = mpsc::Sender<RateEvent>;

/// Lifecycle of one measurement run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Connecting,
    Downloading,
    Finalizing,
    Done,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Idle => write!(f, "idle"),
            EngineState::Connecting => write!(f, "connecting"),
            EngineState::Downloading => write!(f, "downloading"),
            EngineState::Finalizing => write!(f, "finalizing"),
            EngineState::Done => write!(f, "done"),
        }
    }
}

/// Connection-layer settings for the HTTP client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportConfig {
    pub ipv4_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Number of endpoints requested from the provider.
    pub url_count: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self { url_count: 5 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasureConfig {
    /// Endpoints downloaded from concurrently.
    pub connections: usize,
    /// Upper bound on the measurement window.
    pub duration: Duration,
    pub sample_interval: Duration,
}

impl Default for MeasureConfig {
    fn default() -> Self {
        Self {
            connections: 3,
            duration: Duration::from_secs(15),
            sample_interval: Duration::from_millis(100),
        }
    }
}

/// Validated configuration for a complete run.
#[derive(Debug, Clone, Default)]
pub struct FastConfig {
    pub transport: TransportConfig,
    pub discovery: DiscoveryConfig,
    pub measure: MeasureConfig,
    pub unit: UnitPolicy,
    pub silent: bool,
}
