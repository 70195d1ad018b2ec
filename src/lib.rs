//! Folio - Hierarchical Document Question Answering
//!
//! A retrieval-augmented engine that encodes paginated documents into a
//! multi-level hierarchy of summaries with embeddings, then answers natural
//! language questions by scoring that hierarchy, confirming candidate passages
//! with a language model, packing them into token-bounded batches, and merging
//! the partial answers into one cited response.

pub mod cache;
pub mod config;
pub mod encoder;
pub mod error;
pub mod logging;
pub mod ports;
pub mod query;
pub mod text;
pub mod tree;

pub use error::{FolioError, Result};
