use anyhow::Result;
use clap::Parser;
use docrepo_core::{
    CallContext, CountOptions, Document, FindOptions, Repository, RouterConfig, DEFAULT_PAGE_LIMIT,
};

use super::parse_document;

#[derive(Parser, Debug)]
pub struct CountArgs {
    /// Collection name
    #[arg(long, short = 'c')]
    pub collection: String,

    /// Filter document as JSON (default: all documents)
    #[arg(long)]
    pub filter: Option<String>,
}

#[derive(Parser, Debug)]
pub struct FindArgs {
    /// Collection name
    #[arg(long, short = 'c')]
    pub collection: String,

    /// Filter document as JSON (default: all documents)
    #[arg(long)]
    pub filter: Option<String>,

    /// Sort document as JSON, e.g. '{"created_at": -1}'
    #[arg(long)]
    pub sort: Option<String>,

    /// Page number (values below 1 read the first page)
    #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
    pub page: i64,

    /// Documents per page (capped at 100)
    #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT, allow_negative_numbers = true)]
    pub limit: i64,
}

pub async fn run_count(args: CountArgs, config: RouterConfig) -> Result<()> {
    let filter = parse_document("filter", args.filter.as_deref())?;
    let router = super::connect(config).await?;
    let repo = Repository::<Document>::with_collection(&router, &args.collection);

    let total = repo
        .count(&CallContext::background(), filter, CountOptions::default())
        .await?;
    println!("{total}");
    Ok(())
}

/// Print one page of documents as JSON lines; the page summary goes to stderr.
pub async fn run_find(args: FindArgs, config: RouterConfig) -> Result<()> {
    let filter = parse_document("filter", args.filter.as_deref())?;
    let options = match args.sort.as_deref() {
        Some(raw) => FindOptions::sorted_by(parse_document("sort", Some(raw))?),
        None => FindOptions::default(),
    };
    let router = super::connect(config).await?;
    let repo = Repository::<Document>::with_collection(&router, &args.collection);

    let page = repo
        .find_page(&CallContext::background(), filter, options, args.page, args.limit)
        .await?;
    for document in &page.items {
        println!("{}", serde_json::to_string(document)?);
    }
    let pagination = page.pagination;
    eprintln!(
        "page {} of {} ({} documents, {} per page)",
        pagination.page(),
        pagination.total_pages(),
        pagination.total_records(),
        pagination.limit()
    );
    Ok(())
}
