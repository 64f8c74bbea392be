use std::error::Error;

use bigbedkit::utils::cli::bedtobigbed::{bedtobigbed, BedToBigBedArgs};
use bigbedkit::utils::cli::bigbedfetch::{bigbedfetch, BigBedFetchArgs};
use bigbedkit::utils::cli::bigbedinfo::{bigbedinfo, BigBedInfoArgs};
use bigbedkit::utils::cli::bigbedsearch::{bigbedsearch, BigBedSearchArgs};
use bigbedkit::utils::cli::bigbedtobed::{bigbedtobed, BigBedToBedArgs};
use clap::{Parser, Subcommand};

#[derive(Clone, Debug, PartialEq, Subcommand)]
enum SubCommands {
    #[command(name = "info", version)]
    Info {
        #[command(flatten)]
        args: BigBedInfoArgs,
    },
    #[command(name = "tobed", version)]
    ToBed {
        #[command(flatten)]
        args: BigBedToBedArgs,
    },
    #[command(name = "fetch", version)]
    Fetch {
        #[command(flatten)]
        args: BigBedFetchArgs,
    },
    #[command(name = "search", version)]
    Search {
        #[command(flatten)]
        args: BigBedSearchArgs,
    },
    #[command(name = "frombed", version)]
    FromBed {
        #[command(flatten)]
        args: BedToBigBedArgs,
    },
}

#[derive(Debug, Parser)]
#[command(name = "bigbedkit", about = "Tools for indexed bigBed files", long_about = None, version)]
struct Cli {
    #[command(subcommand)]
    command: SubCommands,
}

fn main() -> Result<(), Box<dyn Error>> {
    // Override with RUST_LOG, e.g. RUST_LOG=bigbedkit=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        SubCommands::Info { args } => bigbedinfo(args),
        SubCommands::ToBed { args } => bigbedtobed(args),
        SubCommands::Fetch { args } => bigbedfetch(args),
        SubCommands::Search { args } => bigbedsearch(args),
        SubCommands::FromBed { args } => Ok(bedtobigbed(args)?),
    }
}
