use anyhow::Result;
use docrepo_core::config::redact;
use docrepo_core::{CallContext, RouterConfig};

/// Connect, ping both sides again and report what the router talks to.
pub async fn run_ping(config: RouterConfig) -> Result<()> {
    let write = redact(&config.write_target);
    let read = redact(config.effective_read_target());
    let router = super::connect(config).await?;
    router.ping(&CallContext::background()).await?;

    println!("database: {}", router.database_name());
    println!("write:    {write}");
    println!("read:     {read}");
    println!("split:    {}", router.is_split());
    Ok(())
}
