mod cmd;
mod config;
mod progress;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use cmd::save::TargetArgs;
use stowage::poller::{DEFAULT_ATTEMPTS, DIVE_RESULTS_DIR};
use stowage::sanitize_label;

#[derive(Parser)]
#[command(name = "stowage")]
#[command(about = "Persist container image dive and secret scan reports")]
#[command(version)]
struct Cli {
    /// Namespace the scan records are created in
    #[arg(long, global = true, env = "STOWAGE_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Cluster identifier stored with every record
    #[arg(long, global = true, env = "STOWAGE_CLUSTER_NAME")]
    cluster_name: Option<String>,

    /// kubectl binary used to reach the record store
    #[arg(long, global = true, default_value = "kubectl")]
    kubectl: String,

    /// Skip the record store and only write report files
    #[arg(long, global = true)]
    no_store: bool,

    /// Print the outcome as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// More log output (-v info, -vv debug). RUST_LOG takes precedence
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Save a scan report to the record store, or to a file if that fails
    Save {
        #[command(subcommand)]
        report: SaveReport,
    },

    /// Wait for a background dive scan to write its report
    WaitDive(WaitArgs),

    /// Print the label-safe form of image names or job ids
    Sanitize {
        #[arg(required = true)]
        values: Vec<String>,
    },
}

#[derive(Subcommand)]
enum SaveReport {
    /// Save a dive layer-efficiency report
    Dive {
        #[command(flatten)]
        target: TargetArgs,

        /// dive JSON export to use as the report payload
        #[arg(long)]
        payload: Option<PathBuf>,
    },

    /// Save trufflehog secret findings
    Secret {
        #[command(flatten)]
        target: TargetArgs,

        /// trufflehog findings, JSON lines or a JSON array
        #[arg(long)]
        findings: Option<PathBuf>,
    },
}

#[derive(Args)]
struct WaitArgs {
    /// Image reference being scanned (e.g. nginx:latest)
    #[arg(long)]
    image: String,

    /// Directory the scanner writes dive reports to
    #[arg(long, default_value = DIVE_RESULTS_DIR)]
    dir: PathBuf,

    /// Seconds between checks
    #[arg(long, default_value_t = 10)]
    interval_secs: u64,

    /// Number of checks before giving up
    #[arg(long, default_value_t = DEFAULT_ATTEMPTS)]
    attempts: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    config::init_from_cli(cli.namespace, cli.cluster_name, cli.kubectl, cli.no_store, cli.json)?;

    match cli.command {
        Commands::Save { report } => match report {
            SaveReport::Dive { target, payload } => cmd::save::dive(target, payload.as_deref()).await?,
            SaveReport::Secret { target, findings } => cmd::save::secret(target, findings.as_deref()).await?,
        },
        Commands::WaitDive(args) => {
            cmd::wait::run(
                &args.image,
                args.dir,
                Duration::from_secs(args.interval_secs),
                args.attempts,
            )
            .await?
        }
        Commands::Sanitize { values } => {
            for value in &values {
                println!("{}", sanitize_label(value));
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
