use std::io;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use fastspeed::cli::Cli;
use fastspeed::engine::client::build_client;
use fastspeed::engine::discovery::FastComResolver;
use fastspeed::engine::measure::HttpEngine;
use fastspeed::engine::runner::launch;

fn init_logging(verbose: bool) {
    let default = if verbose { "fastspeed=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let out = Arc::new(Mutex::new(io::stdout()));
    launch(
        &cli,
        |config| {
            let client = build_client(&config.transport)?;
            let resolver = FastComResolver::new(client.clone(), &config.discovery);
            let engine = HttpEngine::new(client, config.measure);
            Ok((resolver, engine))
        },
        out,
    )
    .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(shell) = cli.completion {
        clap_complete::generate(shell, &mut Cli::command(), "fastspeed", &mut io::stdout());
        return ExitCode::SUCCESS;
    }

    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("{e}");
            ExitCode::FAILURE
        }
    }
}
