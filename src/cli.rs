use clap::Parser;
use clap_complete::Shell;
use std::time::Duration;

use crate::engine::error::FastError;
use crate::engine::types::{DiscoveryConfig, FastConfig, MeasureConfig, TransportConfig};
use crate::output::format::UnitPolicy;

/// Unofficial CLI for fast.com download speed tests
#[derive(Parser, Debug)]
#[command(name = "fastspeed", version, about)]
pub struct Cli {
    /// Resolve and connect over IPv4 only
    #[arg(short = '4')]
    pub ipv4: bool,

    /// Format output in Kbps
    #[arg(short = 'k')]
    pub kbps: bool,

    /// Format output in Mbps
    #[arg(short = 'm')]
    pub mbps: bool,

    /// Format output in Gbps
    #[arg(short = 'g')]
    pub gbps: bool,

    /// Suppress all output except for the final result
    #[arg(long)]
    pub silent: bool,

    /// Number of endpoints downloaded from concurrently
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..=16))]
    pub connections: u32,

    /// Number of endpoints requested from fast.com
    #[arg(long = "url-count", default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub url_count: u32,

    /// Maximum measurement time in seconds
    #[arg(long, default_value_t = 15, value_parser = clap::value_parser!(u64).range(1..=120))]
    pub duration: u64,

    /// Log engine progress to stderr
    #[arg(short, long)]
    pub verbose: bool,

    /// Generate shell completions
    #[arg(long = "generate-completion", value_name = "SHELL")]
    pub completion: Option<Shell>,
}

impl Cli {
    /// Validate the flags and build the run configuration.
    pub fn to_config(&self) -> Result<FastConfig, FastError> {
        let unit = UnitPolicy::from_flags(self.kbps, self.mbps, self.gbps)?;
        Ok(FastConfig {
            transport: TransportConfig {
                ipv4_only: self.ipv4,
            },
            discovery: DiscoveryConfig {
                url_count: self.url_count,
            },
            measure: MeasureConfig {
                connections: self.connections as usize,
                duration: Duration::from_secs(self.duration),
                ..MeasureConfig::default()
            },
            unit,
            silent: self.silent,
        })
    }
}
