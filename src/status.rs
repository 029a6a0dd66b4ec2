//! Persisted index overview for `pdfh status`.
//!
//! Loads the state directory read-only (the same verification startup
//! runs) and prints what it holds, without touching sources or embedders.

use anyhow::Result;
use std::path::Path;

use crate::config::Config;
use crate::store::{read_config_file, PersistedPaths, VectorIndexStore};

pub async fn run_status(config: &Config) -> Result<()> {
    let paths = PersistedPaths::new(&config.index.state_dir);

    println!("pdf-harness index status");
    println!("========================");
    println!();
    println!("  State dir:   {}", paths.dir.display());

    if !paths.any_exist() {
        println!("  State:       empty (next start rebuilds from {})", config.source.root.display());
        return Ok(());
    }

    println!("  Metadata:    {}", file_size(&paths.metadata));
    println!("  Index:       {}", file_size(&paths.index));

    let store = match VectorIndexStore::load(&paths, config.index.ef_search).await {
        Ok(store) => store,
        Err(e) => {
            println!("  State:       unusable ({})", e.class());
            anyhow::bail!("persisted index is unusable: {}", e);
        }
    };

    let records = store.record_count();
    let embedded = store.embedded_count();
    println!(
        "  State:       {}",
        if embedded == records { "ready" } else { "partial" }
    );
    println!("  Model:       {}", store.model());
    println!("  Dimension:   {}", store.dims());
    println!("  Records:     {}", records);
    println!(
        "  Embedded:    {} / {} ({}%)",
        embedded,
        records,
        if records > 0 { (embedded * 100) / records } else { 100 }
    );
    if let Ok(index_config) = read_config_file(&paths.config) {
        println!(
            "  Chunking:    {} words, {} overlap",
            index_config.chunk_size, index_config.overlap
        );
        println!("  Built at:    {}", index_config.built_at);
    }

    store.close().await;
    Ok(())
}

fn file_size(path: &Path) -> String {
    match std::fs::metadata(path) {
        Ok(meta) => format_bytes(meta.len()),
        Err(_) => "missing".to_string(),
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_missing_file_size() {
        assert_eq!(file_size(Path::new("/no/such/file")), "missing");
    }
}
