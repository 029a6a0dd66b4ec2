//! One-shot query from the command line (`pdfh query`).
//!
//! Runs the same startup lifecycle as the server (loading or rebuilding the
//! index as needed), answers a single question, and exits.

use anyhow::Result;
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::lifecycle::IndexLifecycleManager;
use crate::pipeline::RetrievalPipeline;

const EXCERPT_CHARS: usize = 240;

pub async fn run_query(config: &Config, text: &str, top_k: Option<usize>) -> Result<()> {
    if top_k == Some(0) {
        anyhow::bail!("--top-k must be >= 1");
    }

    let embedder = create_embedder(&config.embedding)?;
    let manager = IndexLifecycleManager::from_config(config, Arc::clone(&embedder));
    let (store, _outcome) = manager.start().await?;
    let store = Arc::new(store);

    let pipeline = RetrievalPipeline::new(config.retrieval.top_k, config.embedding.timeout());
    pipeline.install(Arc::clone(&store), embedder)?;

    let results = pipeline.query(text, top_k).await;
    store.close().await;
    let results = results?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in results.iter().enumerate() {
        println!("{}. [{:.4}] {}", i + 1, hit.score, hit.source);
        println!("    excerpt: \"{}\"", excerpt(&hit.text));
        println!();
    }
    Ok(())
}

fn excerpt(text: &str) -> String {
    let mut out: String = text.chars().take(EXCERPT_CHARS).collect();
    if text.chars().count() > EXCERPT_CHARS {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        let long = "é".repeat(300);
        let cut = excerpt(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), EXCERPT_CHARS + 3);
        assert_eq!(excerpt("short"), "short");
    }
}
