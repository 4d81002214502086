use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use viewrank::{CliArgs, Command, Config, ItemId};

#[derive(Parser)]
#[command(name = "viewrank")]
#[command(about = "Count item views and list the most viewed items")]
struct Cli {
    #[arg(short, long, help = "Increase verbosity")]
    verbose: bool,

    #[arg(short, long, env = "VIEWRANK_CONFIG", help = "Config file (TOML or JSON)")]
    config: Option<PathBuf>,

    #[arg(long, help = "Redis URL of the view store")]
    store_url: Option<String>,

    #[arg(long, help = "Counter key prefix")]
    key_prefix: Option<String>,

    #[arg(long, help = "Update counter and ranking in one atomic script")]
    atomic: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Record views of an item
    Record {
        item_id: ItemId,
        #[arg(short = 'n', long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        count: u32,
    },
    /// List the most viewed items
    Top {
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(long, help = "JSON catalog of item records")]
        catalog: Option<PathBuf>,
    },
    /// Repair ranking scores from the view counters
    Reconcile {
        #[arg(required = true)]
        item_ids: Vec<ItemId>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let catalog = match &cli.command {
        CliCommand::Top { catalog, .. } => catalog.clone(),
        _ => None,
    };
    let args = CliArgs {
        config_file: cli.config.clone(),
        store_url: cli.store_url.clone(),
        key_prefix: cli.key_prefix.clone(),
        catalog,
        atomic: cli.atomic,
    };
    let config = Config::load_with_cli(&args)?;

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        config
            .logging
            .level
            .parse()
            .unwrap_or(tracing::Level::INFO)
    };
    let subscriber = tracing_subscriber::fmt().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let command = match cli.command {
        CliCommand::Record { item_id, count } => Command::Record { item_id, count },
        CliCommand::Top { limit, .. } => Command::Top { limit },
        CliCommand::Reconcile { item_ids } => Command::Reconcile { item_ids },
    };

    viewrank::run(config, command).await
}
