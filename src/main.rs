use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use iroh_collections::{
    catalog::MemoryCatalogStore, config::Config, log::Logs, Collection, IndexQuery,
};
use serde_json::{json, Value};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Path to config file
    #[clap(short, long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

/// Inspect the state of a collection.
#[derive(Subcommand, Debug, Clone)]
enum Commands {
    /// Print the Index Info of all catalogs as JSON.
    Indexes,
    /// Scan the secondary index and print the matching postings.
    Query {
        /// Field address (`<type>#<field>`), or a field name when `--type` is set.
        #[clap(long)]
        field: String,
        /// Type to resolve the field against.
        #[clap(long = "type")]
        ty: Option<String>,
        /// Exact value. Parsed as JSON, falls back to a string.
        #[clap(long)]
        value: Option<String>,
        /// String prefix.
        #[clap(long)]
        prefix: Option<String>,
        /// Exclusive lower bound.
        #[clap(long)]
        gt: Option<String>,
        /// Inclusive lower bound.
        #[clap(long)]
        gte: Option<String>,
        /// Exclusive upper bound.
        #[clap(long)]
        lt: Option<String>,
        /// Inclusive upper bound.
        #[clap(long)]
        lte: Option<String>,
        /// Scan in descending order.
        #[clap(long)]
        reverse: bool,
        /// Maximum number of results.
        #[clap(long)]
        limit: Option<u64>,
        /// Number of results to skip.
        #[clap(long, default_value_t = 0)]
        offset: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let args = Cli::parse();

    let config = if let Some(path) = args.config {
        debug!("loading config from {:?}", path);
        Config::load(path).await?
    } else {
        debug!("using default persistent config");
        Config::persistent()?
    };

    // writer logs are replicated by the host application, the cli only reads local state
    let collection = Collection::open(&config, Logs::default(), Arc::new(MemoryCatalogStore::new()))
        .await
        .context("failed to open collection")?;

    match args.command {
        Commands::Indexes => {
            let info = collection.index_info().await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Commands::Query {
            field,
            ty,
            value,
            prefix,
            gt,
            gte,
            lt,
            lte,
            reverse,
            limit,
            offset,
        } => {
            let query = IndexQuery {
                field: Some(field),
                ty,
                value: value.as_deref().map(parse_value),
                prefix,
                gt: gt.as_deref().map(parse_value),
                gte: gte.as_deref().map(parse_value),
                lt: lt.as_deref().map(parse_value),
                lte: lte.as_deref().map(parse_value),
                reverse,
                limit,
                offset,
            };
            for posting in collection.postings(&query)? {
                let posting = posting?;
                let address = collection.address_of(posting.lseq)?;
                let line = json!({
                    "lseq": posting.lseq,
                    "address": address.map(|a| a.to_string()),
                });
                println!("{line}");
            }
        }
    }
    Ok(())
}

fn parse_value(s: &str) -> Value {
    serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.to_string()))
}
