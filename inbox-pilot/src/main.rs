use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use inbox_pilot_lib::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG wins; --verbose only changes the default
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("inbox_pilot_lib=debug,inbox_llm=debug,info")
        } else {
            EnvFilter::new("inbox_pilot_lib=info,warn")
        }
    });

    // stdout carries the JSON result, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    inbox_pilot_lib::run(cli).await
}
