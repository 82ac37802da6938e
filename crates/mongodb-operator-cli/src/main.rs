//! MongoDB multi-cluster operator entry point

use anyhow::Result;
use clap::Parser;
use mongodb_operator_cli::commands::{Cli, CommandExecutor};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let mut executor = CommandExecutor::new();
    let result = executor.execute(cli.command).await?;

    if !result.message.is_empty() {
        println!("{}", result.message);
    }

    if result.success {
        std::process::exit(0);
    } else {
        std::process::exit(1);
    }
}
