use std::io::Write;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::discovery::TargetResolver;
use super::error::FastError;
use super::measure::ThroughputEngine;
use super::types::{FastConfig, RateEvent};
use crate::cli::Cli;
use crate::output::format::FormattedRate;
use crate::output::status::{SharedWriter, StatusLine, StatusReporter};

const RATE_CHANNEL_CAPACITY: usize = 256;

/// Validate `cli`, then let `connect` build the collaborators and run.
///
/// `connect` is not invoked when the configuration is invalid, so an invalid
/// flag combination never touches the network.
pub async fn launch<R, E, F, W>(
    cli: &Cli,
    connect: F,
    out: SharedWriter<W>,
) -> Result<FormattedRate, FastError>
where
    R: TargetResolver,
    E: ThroughputEngine,
    F: FnOnce(&FastConfig) -> Result<(R, E), FastError>,
    W: Write + Send + 'static,
{
    let config = cli.to_config()?;
    debug!("Running with {config:?}");
    let (resolver, engine) = connect(&config)?;
    run(&config, &resolver, &engine, out).await
}

/// Discover endpoints, measure them and print the result.
pub async fn run<R, E, W>(
    config: &FastConfig,
    resolver: &R,
    engine: &E,
    out: SharedWriter<W>,
) -> Result<FormattedRate, FastError>
where
    R: TargetResolver + ?Sized,
    E: ThroughputEngine + ?Sized,
    W: Write + Send + 'static,
{
    let status = StatusLine::new();
    let reporter = StatusReporter::new(status.clone(), out, config.unit, config.silent);
    let ticker = reporter.start_ticker();

    status.set("connecting");
    let endpoints = match resolver.resolve_targets().await {
        Ok(endpoints) => endpoints,
        Err(e) => {
            if let Some(ticker) = ticker {
                ticker.stop().await;
            }
            return Err(e);
        }
    };

    status.set("loading");
    let (tx, rx) = mpsc::channel::<RateEvent>(RATE_CHANNEL_CAPACITY);
    let consumer = tokio::spawn(reporter.consume(rx, ticker));

    let measured = engine.measure(endpoints, tx).await;

    // the consumer stops the ticker and prints once the stream is drained
    let printed = consumer
        .await
        .map_err(|e| FastError::Measurement(format!("status consumer failed: {e}")))??;

    let estimate = measured?;
    info!("Final rate {:.0} Kbps", estimate.kbps);
    printed.ok_or_else(|| {
        FastError::Measurement("engine finished without a final estimate".to_string())
    })
}
