//! Agent / one-shot client binary.
//!
//! Default mode registers with the coordinator and serves `DownloadPart`
//! requests. `--url` switches to one-shot download mode. `--daemon`,
//! `--force`, and `--stop` manage the background agent via its pidfile.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use ddson_core::rpc::DownloadStatus;
use ddson_core::util::pretty_speed;
use ddson_core::version::PROTOCOL_VERSION;
use ddson_core::{client, daemon, httputil, logging};

#[derive(Debug, Parser)]
#[command(name = "ddson")]
#[command(about = "ddson agent and one-shot download client", long_about = None)]
struct Cli {
    /// Coordinator address.
    #[arg(long, default_value = "localhost:5510")]
    addr: String,

    /// Agent name (defaults to the hostname).
    #[arg(long)]
    name: Option<String>,

    /// Port the agent listens on for DownloadPart requests.
    #[arg(long, default_value_t = 5510)]
    port: u16,

    /// Download this URL through the coordinator and exit (one-shot mode).
    #[arg(long)]
    url: Option<String>,

    /// Output file for one-shot mode (defaults to the URL's filename).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Expected SHA-256 of the artifact (hex), verified by the coordinator.
    #[arg(long)]
    sha256: Option<String>,

    /// Run the agent as a background daemon.
    #[arg(long)]
    daemon: bool,

    /// With --daemon: replace an already-running daemon.
    #[arg(long)]
    force: bool,

    /// Stop the running daemon and exit.
    #[arg(long)]
    stop: bool,

    /// Log file (defaults to stderr; daemons log to /var/log/ddson.log).
    #[arg(long)]
    logfile: Option<PathBuf>,

    /// Print version information and exit.
    #[arg(long)]
    version: bool,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,

    /// Enable verbose (trace) logging.
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    if cli.version {
        println!("{PROTOCOL_VERSION}");
        return;
    }

    if cli.stop {
        logging::init_stderr(cli.debug, cli.verbose);
        if let Err(e) = daemon::stop() {
            eprintln!("ddson: failed to stop daemon: {e:#}");
            std::process::exit(1);
        }
        return;
    }

    // Fork before the runtime exists; a forked multi-threaded runtime is
    // undefined behavior territory.
    if cli.daemon {
        let logfile = cli
            .logfile
            .clone()
            .unwrap_or_else(|| PathBuf::from(daemon::DEFAULT_LOGFILE));
        if let Err(e) = daemon::daemonize(cli.force, &logfile) {
            eprintln!("ddson: failed to daemonize: {e:#}");
            std::process::exit(1);
        }
    }

    logging::init(cli.debug, cli.verbose, cli.logfile.as_deref());

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("ddson: failed to start runtime: {e}");
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(async {
        match &cli.url {
            Some(url) => run_download(&cli, url).await,
            None => run_agent(&cli).await,
        }
    });

    if let Err(e) = result {
        eprintln!("ddson error: {e:#}");
        std::process::exit(1);
    }
}

async fn run_agent(cli: &Cli) -> Result<()> {
    let name = match &cli.name {
        Some(name) => name.clone(),
        None => hostname::get()
            .context("resolve hostname for --name default")?
            .to_string_lossy()
            .into_owned(),
    };
    tracing::info!(name, addr = %cli.addr, version = PROTOCOL_VERSION, "starting agent mode");
    ddson_core::agent::run(&cli.addr, &name, cli.port).await
}

async fn run_download(cli: &Cli, url: &str) -> Result<()> {
    let output = match &cli.output {
        Some(path) => path.clone(),
        None => PathBuf::from(client::output_name_from_url(url)?),
    };

    // Probe up front: fail early when the origin can't do ranges, and learn
    // the total size for the progress bar.
    let probe_url = url.to_string();
    let total_size = tokio::task::spawn_blocking(move || httputil::probe_origin(&probe_url))
        .await
        .context("probe join")??;

    let bar = ProgressBar::new(total_size);
    bar.set_style(
        ProgressStyle::with_template("{msg:>14} [{bar:40}] {bytes}/{total_bytes}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );

    let mut transferred = 0u64;
    let received = client::download_to_file(&cli.addr, url, cli.sha256.as_deref(), &output, |status| {
        match status {
            DownloadStatus::Pending {
                number_in_queue,
                client_count,
                ..
            } => {
                bar.set_message(format!(
                    "pending ({number_in_queue} queued, {client_count} agents)"
                ));
            }
            DownloadStatus::Downloading {
                speed,
                total_downloaded_bytes,
                ..
            } => {
                bar.set_message(format!("downloading {}", pretty_speed(*speed)));
                bar.set_position((*total_downloaded_bytes).min(total_size));
            }
            DownloadStatus::Validating => bar.set_message("validating"),
            DownloadStatus::Transferring { data } => {
                if transferred == 0 {
                    bar.set_message("transferring");
                    bar.set_position(0);
                }
                transferred += data.len() as u64;
                bar.set_position(transferred.min(total_size));
            }
        }
    })
    .await?;

    bar.finish_with_message("done");
    println!("downloaded {} -> {} ({received} bytes)", url, output.display());
    Ok(())
}
