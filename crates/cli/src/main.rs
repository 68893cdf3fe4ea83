//! PartsFlow CLI - Database migrations, maintenance and a polling board view.
//!
//! # Usage
//!
//! ```bash
//! # Run database migrations
//! pf-cli migrate
//!
//! # Seed service centers, parts and stock
//! pf-cli seed --file crates/cli/seed/demo.yaml
//!
//! # Inspect or reseed document counters
//! pf-cli sequences show
//! pf-cli sequences reseed --kind sub-purchase-order
//!
//! # Watch the board as a warehouse user
//! pf-cli watch --actor wh-1 --role warehouse
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `seed` - Seed master data from YAML
//! - `sequences` - Show or reseed document-number counters
//! - `watch` - Poll the API and log the projected board

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use partsflow_core::{DocumentKind, ServiceCenterId, StaffRole};

mod commands;

#[derive(Parser)]
#[command(name = "pf-cli")]
#[command(author, version, about = "PartsFlow CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Seed master data from a YAML file
    Seed {
        /// Path to the seed file
        #[arg(short, long, default_value = "crates/cli/seed/demo.yaml")]
        file: String,
    },
    /// Manage document-number counters
    Sequences {
        #[command(subcommand)]
        action: SequencesAction,
    },
    /// Poll the parts-issue list and log the projected board
    Watch {
        /// Server base URL
        #[arg(long, default_value = "http://127.0.0.1:3002")]
        base_url: String,

        /// Seconds between polls
        #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
        interval_secs: u64,

        /// Actor id sent in `X-Actor-Id`
        #[arg(long)]
        actor: String,

        /// Staff role sent in `X-Actor-Role`
        #[arg(long, default_value = "central_admin")]
        role: String,

        /// Only show requests of this service center
        #[arg(long)]
        service_center: Option<i32>,
    },
}

#[derive(Subcommand)]
enum SequencesAction {
    /// Show stored counters
    Show {
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
    },
    /// Raise counters to the highest number already stored
    Reseed {
        /// Only reseed this kind (default: all)
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    JobCard,
    PartsIssue,
    SubPurchaseOrder,
}

impl From<KindArg> for DocumentKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::JobCard => Self::JobCard,
            KindArg::PartsIssue => Self::PartsIssue,
            KindArg::SubPurchaseOrder => Self::SubPurchaseOrder,
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Seed { file } => commands::seed::master_data(&file).await?,
        Commands::Sequences { action } => match action {
            SequencesAction::Show { kind } => {
                commands::sequences::show(kind.map(Into::into)).await?;
            }
            SequencesAction::Reseed { kind } => {
                let kinds = kind.map_or_else(|| DocumentKind::ALL.to_vec(), |k| vec![k.into()]);
                commands::sequences::reseed(&kinds).await?;
            }
        },
        Commands::Watch {
            base_url,
            interval_secs,
            actor,
            role,
            service_center,
        } => {
            let role: StaffRole = role.parse()?;
            commands::watch::run(commands::watch::WatchOptions {
                base_url,
                interval: Duration::from_secs(interval_secs),
                actor,
                role,
                service_center: service_center.map(ServiceCenterId::new),
            })
            .await;
        }
    }
    Ok(())
}
