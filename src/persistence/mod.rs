//! Persistence module
//!
//! This module provides:
//! - The JSON export/import document (topology, weight specs, record bytes)
//! - Key/value stores for the lightweight pair-list snapshot
//! - Image fetchers and pair rehydration from stored records

pub mod codec;
pub mod rehydrate;
pub mod store;

pub use codec::{
    export_model, import_model, load_document, save_document, ExportDocument, ExportMetadata,
    ExportStats, ModelArtifact,
};
pub use rehydrate::{rehydrate_pairs, FileFetcher, ImageFetcher, MemoryFetcher};
pub use store::{load_pair_records, save_pair_records, FileStore, KeyValueStore, MemoryStore};
