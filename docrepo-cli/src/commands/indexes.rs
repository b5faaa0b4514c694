use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docrepo_core::{CallContext, Document, RouterConfig, Repository};
use tracing::info;

use crate::config::load_indexes;

#[derive(Parser, Debug)]
pub struct IndexesArgs {
    #[command(subcommand)]
    pub command: IndexesCommand,
}

#[derive(Subcommand, Debug)]
pub enum IndexesCommand {
    /// Print live indexes as JSON lines
    List(CollectionArgs),
    /// Show what a sync would drop and create, without changing anything
    Plan(SyncArgs),
    /// Drop undesired indexes and create missing ones
    Sync(SyncArgs),
}

#[derive(Parser, Debug)]
pub struct CollectionArgs {
    /// Collection name
    #[arg(long, short = 'c')]
    pub collection: String,
}

#[derive(Parser, Debug)]
pub struct SyncArgs {
    /// Collection name
    #[arg(long, short = 'c')]
    pub collection: String,

    /// TOML file declaring the desired indexes ([[indexes]] tables)
    #[arg(long, short = 'f', value_name = "PATH")]
    pub file: PathBuf,
}

pub async fn run_indexes(args: IndexesArgs, config: RouterConfig) -> Result<()> {
    // Validate the index file before touching the network
    let desired = match &args.command {
        IndexesCommand::List(_) => Vec::new(),
        IndexesCommand::Plan(sync) | IndexesCommand::Sync(sync) => load_indexes(&sync.file)?,
    };

    let router = super::connect(config).await?;
    let ctx = CallContext::background();

    match args.command {
        IndexesCommand::List(target) => {
            let live = router
                .collection_for_write(&target.collection)
                .list_indexes()
                .await
                .with_context(|| format!("Failed to list indexes of '{}'", target.collection))?;
            for index in live {
                println!("{}", serde_json::to_string(&index)?);
            }
        }
        IndexesCommand::Plan(sync) => {
            let repo = Repository::<Document>::with_collection(&router, &sync.collection);
            let plan = repo.plan_indexes(&ctx, &desired).await?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
            if !plan.is_converged() {
                info!(collection = %sync.collection, "indexes differ from {}", sync.file.display());
            }
        }
        IndexesCommand::Sync(sync) => {
            let repo = Repository::<Document>::with_collection(&router, &sync.collection);
            let report = repo.ensure_indexes(&ctx, &desired).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
