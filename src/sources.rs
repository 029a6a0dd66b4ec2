//! Source directory walk: discover PDFs and extract their text.
//!
//! Files are matched by a case-insensitive `.pdf` extension; everything else
//! is ignored. Paths matching any `exclude_globs` pattern (relative to the
//! root) are skipped. Output is sorted by path for deterministic chunk order.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::SourceConfig;
use crate::error::{RagError, Result};
use crate::extract::TextExtractor;
use crate::models::Document;

/// List every PDF under the configured root.
pub fn discover_pdfs(config: &SourceConfig) -> Result<Vec<PathBuf>> {
    let root = &config.root;
    let unavailable = |reason: String| RagError::SourceUnavailable {
        path: root.clone(),
        reason,
    };

    let meta = std::fs::metadata(root).map_err(|e| unavailable(e.to_string()))?;
    if !meta.is_dir() {
        return Err(unavailable("not a directory".to_string()));
    }
    std::fs::read_dir(root).map_err(|e| unavailable(e.to_string()))?;

    let exclude_set = build_globset(&config.exclude_globs)?;

    let mut paths = Vec::new();
    let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry under {}", root.display());
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        if exclude_set.is_match(relative) {
            continue;
        }
        if !is_pdf(path) {
            continue;
        }
        paths.push(path.to_path_buf());
    }

    paths.sort();
    Ok(paths)
}

/// Discover PDFs and extract each one. A PDF that cannot be parsed is
/// logged and skipped.
pub fn collect_documents(config: &SourceConfig, extractor: &dyn TextExtractor) -> Result<Vec<Document>> {
    let paths = discover_pdfs(config)?;
    let mut documents = Vec::with_capacity(paths.len());
    let mut skipped = 0;

    for path in paths {
        match extractor.extract_text(&path) {
            Ok(content) => documents.push(Document {
                content,
                source: path,
            }),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unparsable PDF");
                skipped += 1;
            }
        }
    }

    tracing::info!(
        documents = documents.len(),
        skipped,
        "extracted text from {}",
        config.root.display()
    );
    Ok(documents)
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            RagError::configuration(format!("invalid exclude glob '{}': {}", pattern, e))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| RagError::configuration(format!("invalid exclude globs: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ExtractError;
    use std::fs;
    use tempfile::TempDir;

    /// Returns the file's bytes as text, or fails for files containing "broken".
    struct RawText;

    impl TextExtractor for RawText {
        fn extract_text(&self, path: &Path) -> std::result::Result<String, ExtractError> {
            let text = fs::read_to_string(path).map_err(|e| ExtractError::Io(e.to_string()))?;
            if text.contains("broken") {
                return Err(ExtractError::Pdf("broken".to_string()));
            }
            Ok(text)
        }
    }

    fn source(root: &Path) -> SourceConfig {
        SourceConfig {
            root: root.to_path_buf(),
            exclude_globs: vec!["**/.git/**".to_string()],
            follow_symlinks: false,
        }
    }

    #[test]
    fn test_discovers_pdfs_case_insensitively_and_sorted() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("nested")).unwrap();
        fs::create_dir_all(tmp.path().join(".git")).unwrap();
        fs::write(tmp.path().join("b.pdf"), "b").unwrap();
        fs::write(tmp.path().join("A.PDF"), "a").unwrap();
        fs::write(tmp.path().join("nested/c.Pdf"), "c").unwrap();
        fs::write(tmp.path().join("notes.txt"), "ignored").unwrap();
        fs::write(tmp.path().join(".git/x.pdf"), "excluded").unwrap();

        let found = discover_pdfs(&source(tmp.path())).unwrap();
        let names: Vec<String> = found
            .iter()
            .map(|p| p.strip_prefix(tmp.path()).unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["A.PDF", "b.pdf", "nested/c.Pdf"]);
    }

    #[test]
    fn test_missing_root_is_source_unavailable() {
        let tmp = TempDir::new().unwrap();
        let err = discover_pdfs(&source(&tmp.path().join("gone"))).unwrap_err();
        assert!(matches!(err, RagError::SourceUnavailable { .. }));
    }

    #[test]
    fn test_root_must_be_directory() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("file.pdf");
        fs::write(&file, "x").unwrap();
        let err = discover_pdfs(&source(&file)).unwrap_err();
        assert!(matches!(err, RagError::SourceUnavailable { .. }));
    }

    #[test]
    fn test_empty_root_yields_no_documents() {
        let tmp = TempDir::new().unwrap();
        let docs = collect_documents(&source(tmp.path()), &RawText).unwrap();
        assert!(docs.is_empty());
    }

    #[test]
    fn test_unparsable_pdf_skipped() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("good.pdf"), "hello world").unwrap();
        fs::write(tmp.path().join("bad.pdf"), "broken bytes").unwrap();

        let docs = collect_documents(&source(tmp.path()), &RawText).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].content, "hello world");
        assert_eq!(docs[0].source, tmp.path().join("good.pdf"));
    }

    #[test]
    fn test_invalid_glob_is_configuration_error() {
        let tmp = TempDir::new().unwrap();
        let mut config = source(tmp.path());
        config.exclude_globs = vec!["[".to_string()];
        let err = discover_pdfs(&config).unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));
    }
}
