//! Hulk CLI

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hulk::config::Config;
use hulk::dataset::DatasetSelector;
use hulk::origin::HttpOrigin;
use hulk::proxy::ProxyServer;
use hulk::replay::ReplayEngine;
use hulk::storage::FixtureStore;

#[derive(Debug, Parser)]
#[command(name = "hulk", version, about = "Record/replay fixture store for HTTP calls")]
struct Cli {
    /// Path to config TOML. Defaults plus environment are used if omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log level or filter directive (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the replay server.
    Serve {
        /// Address to listen on.
        #[arg(long)]
        listen: Option<String>,
        /// Dataset used while no dataset is active.
        #[arg(long)]
        dataset: Option<String>,
        /// Fetch and store missing fixtures from the origin.
        #[arg(long)]
        record: bool,
    },
    /// Make a dataset active.
    Use { dataset: String },
    /// Clear the active dataset.
    Clear,
    /// Print the active dataset.
    Current,
    /// List datasets, or the fixtures indexed in one dataset.
    List { dataset: Option<String> },
    /// Check that every index entry has a stored body.
    Verify { dataset: String },
}

fn init_logging(log_level: Option<&str>) {
    let filter = match log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => Config::from_env()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    let mut config = load_config(cli.config.as_ref())?;
    let selector = DatasetSelector::from_config(&config);

    match cli.command {
        Command::Serve {
            listen,
            dataset,
            record,
        } => {
            if let Some(listen) = listen {
                config.listen = listen;
            }
            if let Some(dataset) = dataset {
                config = config.default_dataset(dataset);
            }
            if record {
                config = config.recording(true);
            }
            config.validate()?;

            let engine = Arc::new(ReplayEngine::new(
                &config,
                Arc::new(selector),
                HttpOrigin::new(),
            ));
            ProxyServer::new(&config, engine)?.run().await?;
        }
        Command::Use { dataset } => {
            selector.set_active(&dataset)?;
            println!("{dataset}");
        }
        Command::Clear => {
            selector.clear_active()?;
        }
        Command::Current => {
            println!("{}", selector.get_active(&config.default_dataset)?);
        }
        Command::List { dataset: None } => {
            let store = FixtureStore::from_config(&config);
            let active = selector.get_active(&config.default_dataset)?;
            for name in store.list_datasets()? {
                let marker = if name == active { "*" } else { " " };
                println!("{marker} {name}");
            }
        }
        Command::List {
            dataset: Some(dataset),
        } => {
            let store = FixtureStore::from_config(&config);
            let index = store.load_index(&dataset)?;
            for (hash, entry) in index.iter() {
                println!(
                    "{hash}  {}  {}",
                    entry.content_type.as_deref().unwrap_or("-"),
                    entry.url
                );
            }
        }
        Command::Verify { dataset } => {
            let store = FixtureStore::from_config(&config);
            let report = store.verify(&dataset)?;
            for dangling in &report.dangling {
                println!("missing {}  {}", dangling.hash, dangling.url);
            }
            if !report.is_clean() {
                bail!(
                    "dataset '{}': {} of {} index entries have no stored body",
                    report.dataset,
                    report.dangling.len(),
                    report.entries
                );
            }
            println!("dataset '{}': {} entries ok", report.dataset, report.entries);
        }
    }

    Ok(())
}
