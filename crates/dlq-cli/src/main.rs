use clap::Parser;

mod cli;

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    // Workers log to stderr; their stdout carries messages.
    cli.command.init_logging();

    if let Err(err) = cli.run().await {
        eprintln!("dlq error: {:#}", err);
        std::process::exit(1);
    }
}
