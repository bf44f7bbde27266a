use anyhow::Result;
use clap::Parser;
use market_quotes::cli::{self, Cli};
use market_quotes::server;
use market_quotes::tail;

#[tokio::main]
async fn main() -> Result<()> {
    match Cli::parse().command() {
        cli::Command::Run(args) => server::run(args.into_config()?).await,
        cli::Command::Tail(args) => tail::run(args).await,
    }
}
