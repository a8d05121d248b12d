//! Filstore - durable piece storage with padded HTTP retrieval
//!
//! A minimal storage service for Filecoin devnets: producers submit opaque
//! piece payloads, the store assigns sequential ids and durably records the
//! deal metadata, and consumers retrieve the payloads over HTTP in their
//! padded wire form, with byte-range support.
//!
//! ## Architecture
//!
//! - **IndexStore**: id → deal-metadata registry, mirrored in memory behind
//!   one reader/writer lock, persisted as a JSON snapshot
//! - **BlobStore**: one file (or directory) per id under the store root
//! - **PadReader**: seekable padded-domain view over the raw payload
//! - **HttpServer**: retrieval, probe, ingestion, and status routes
//!
//! ## Storage Layout
//!
//! ```text
//! <store root>/
//! ├── index          # JSON snapshot: next id + id → deal records
//! ├── 0.piece        # raw payload for id 0 (file or directory)
//! ├── 1.piece
//! └── config.toml    # Configuration
//! ```

pub mod blob_store;
pub mod config;
pub mod deal;
pub mod error;
pub mod fr32;
pub mod http;
pub mod index;
pub mod pad_reader;

// Re-exports
pub use blob_store::{BlobStat, BlobStore};
pub use config::Config;
pub use deal::{DealProposal, DealSchedule, PieceDealInfo};
pub use error::StoreError;
pub use http::HttpServer;
pub use index::{IndexStore, IndexSummary, PieceRecord, PieceState};
pub use pad_reader::PadReader;
