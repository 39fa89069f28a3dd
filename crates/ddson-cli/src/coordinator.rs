//! Coordinator binary: accept registrations, heartbeats, and downloads.

use clap::Parser;
use ddson_core::{logging, server};

#[derive(Debug, Parser)]
#[command(name = "ddson-coordinator")]
#[command(about = "ddson coordinator: distributes downloads across registered agents", long_about = None)]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value_t = 5510)]
    port: u16,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,

    /// Enable verbose (trace) logging.
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_stderr(cli.debug, cli.verbose);

    if let Err(e) = server::run_coordinator(cli.port).await {
        eprintln!("ddson-coordinator error: {e:#}");
        std::process::exit(1);
    }
}
