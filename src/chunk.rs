//! Word-window text chunker.
//!
//! Splits each document's text into windows of `chunk_size`
//! whitespace-delimited words, advancing by `chunk_size - overlap` words per
//! step. Windows ignore sentence boundaries, so a chunk may start or end
//! mid-sentence.
//!
//! Every chunk carries its document's source path and a contiguous
//! `chunk_index` starting at 0.

use crate::error::{RagError, Result};
use crate::models::{Chunk, Document};

/// Split documents into overlapping word windows.
///
/// # Errors
///
/// Returns [`RagError::Configuration`] if `chunk_size` is zero or
/// `overlap >= chunk_size`.
pub fn split(documents: &[Document], chunk_size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    validate(chunk_size, overlap)?;

    let mut chunks = Vec::new();
    for doc in documents {
        chunks.extend(split_document(doc, chunk_size, overlap));
    }
    Ok(chunks)
}

/// Check that a chunk size / overlap pair describes a forward-moving window.
pub fn validate(chunk_size: usize, overlap: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(RagError::configuration("chunk_size must be > 0"));
    }
    if overlap >= chunk_size {
        return Err(RagError::configuration(format!(
            "chunk overlap ({}) must be smaller than chunk_size ({})",
            overlap, chunk_size
        )));
    }
    Ok(())
}

fn split_document(doc: &Document, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    let words: Vec<&str> = doc.content.split_whitespace().collect();
    let step = chunk_size - overlap;

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < words.len() {
        let end = (start + chunk_size).min(words.len());
        let content = words[start..end].join(" ");
        if !content.is_empty() {
            chunks.push(Chunk {
                content,
                source: doc.source.clone(),
                chunk_index: chunks.len() as i64,
            });
        }
        if end == words.len() {
            break;
        }
        start += step;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn doc_with_words(n: usize) -> Document {
        let content = (1..=n)
            .map(|i| format!("w{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        Document {
            content,
            source: PathBuf::from("/data/report.pdf"),
        }
    }

    #[test]
    fn test_exact_window_single_chunk() {
        let chunks = split(&[doc_with_words(1000)], 1000, 100).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content.split(' ').count(), 1000);
    }

    #[test]
    fn test_second_window_starts_after_overlap() {
        let chunks = split(&[doc_with_words(1900)], 1000, 100).unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].content.starts_with("w901 "));
        assert!(chunks[1].content.ends_with(" w1900"));
        assert_eq!(chunks[1].content.split(' ').count(), 1000);
    }

    #[test]
    fn test_short_tail_window() {
        // 0..10, 8..12
        let chunks = split(&[doc_with_words(12)], 10, 2).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].content, "w9 w10 w11 w12");
    }

    #[test]
    fn test_indices_contiguous_and_source_tagged() {
        let chunks = split(&[doc_with_words(95)], 10, 3).unwrap();
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert_eq!(c.source, PathBuf::from("/data/report.pdf"));
        }
    }

    #[test]
    fn test_whitespace_normalized() {
        let doc = Document {
            content: "  alpha\n\nbeta\t gamma  \r\n".to_string(),
            source: PathBuf::from("a.pdf"),
        };
        let chunks = split(&[doc], 10, 0).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "alpha beta gamma");
    }

    #[test]
    fn test_empty_documents_dropped() {
        let docs = vec![
            Document {
                content: " \n\t ".to_string(),
                source: PathBuf::from("blank.pdf"),
            },
            doc_with_words(3),
        ];
        let chunks = split(&docs, 10, 0).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source, PathBuf::from("/data/report.pdf"));
    }

    #[test]
    fn test_mid_sentence_cut_allowed() {
        let doc = Document {
            content: "One two three. Four five six.".to_string(),
            source: PathBuf::from("s.pdf"),
        };
        let chunks = split(&[doc], 2, 0).unwrap();
        assert_eq!(chunks[1].content, "three. Four");
    }

    #[test]
    fn test_invalid_overlap_rejected() {
        let err = split(&[doc_with_words(5)], 100, 100).unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));
        let err = split(&[], 0, 0).unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));
    }

    #[test]
    fn test_deterministic() {
        let docs = vec![doc_with_words(250)];
        assert_eq!(split(&docs, 40, 7).unwrap(), split(&docs, 40, 7).unwrap());
    }
}
