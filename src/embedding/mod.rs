/// Embedding & Indexing
///
/// This module provides local embedding generation and exact vector search.
/// Architecture:
/// - EmbeddingProvider trait for abstraction
/// - FastEmbedProvider for local embedding (all-MiniLM-L6-v2, 384-dim)
/// - Flat L2 index over unit-length vectors, kept in lock-step with its items
/// - Single-file snapshot persistence (zstd + BLAKE3 checksum)
mod provider;
mod vector_index;

pub use provider::{normalize_l2, EmbeddingError, EmbeddingProvider, FastEmbedProvider};
pub use vector_index::{EmbeddedBatch, FlatIndex, SearchResult, VectorIndex, VectorIndexError};
