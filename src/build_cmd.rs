//! `pdfh build`: rebuild the persisted index from sources.

use anyhow::Result;
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::lifecycle::{IndexLifecycleManager, StartupOutcome};

pub async fn run_build(config: &Config) -> Result<()> {
    let embedder = create_embedder(&config.embedding)?;
    let manager = IndexLifecycleManager::from_config(config, Arc::clone(&embedder)).force_rebuild(true);
    let (store, outcome) = manager.start().await?;

    println!("build");
    match &outcome {
        StartupOutcome::Rebuilt { reason } => println!("  outcome: rebuilt ({})", reason),
        other => println!("  outcome: {:?}", other),
    }
    println!("  source: {}", config.source.root.display());
    println!("  state dir: {}", config.index.state_dir.display());
    println!("  model: {} ({} dims)", store.model(), store.dims());
    println!("  records: {}", store.record_count());

    store.close().await;
    Ok(())
}
