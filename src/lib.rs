//! # pdf-harness
//!
//! Semantic search over a directory of PDFs.
//!
//! PDFs are extracted, split into overlapping word windows, embedded, and
//! stored in a persisted vector index (SQLite metadata plus an HNSW graph
//! file). An HTTP endpoint answers similarity queries over the index.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌──────────────────┐
//! │ PDF dir  │──▶│ Chunk+Embed │──▶│ metadata.sqlite  │
//! │ (walk)   │   │             │   │ index.hnsw       │
//! └──────────┘   └─────────────┘   └────────┬─────────┘
//!                                           │ load / rebuild
//!                      ┌────────────────────┤
//!                      ▼                    ▼
//!                 ┌──────────┐        ┌──────────┐
//!                 │   CLI    │        │   HTTP   │
//!                 │  (pdfh)  │        │  /query  │
//!                 └──────────┘        └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pdfh build                    # rebuild the index from [source] root
//! pdfh status                   # inspect the persisted index
//! pdfh query "termination clause"
//! pdfh serve                    # start the HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`sources`] | PDF discovery |
//! | [`extract`] | PDF text extraction |
//! | [`chunk`] | Word-window chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`hnsw`] | Approximate nearest-neighbor graph |
//! | [`store`] | Persisted vector index |
//! | [`retry`] | Retry policy |
//! | [`lifecycle`] | Startup load-or-rebuild |
//! | [`pipeline`] | Query-time retrieval |
//! | [`server`] | HTTP server |
//! | [`build_cmd`], [`search`], [`status`] | CLI commands |

pub mod build_cmd;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod hnsw;
pub mod lifecycle;
pub mod models;
pub mod pipeline;
pub mod retry;
pub mod search;
pub mod server;
pub mod sources;
pub mod status;
pub mod store;
