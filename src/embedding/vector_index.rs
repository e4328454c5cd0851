//! Exact L2 vector index over text units, with snapshot persistence

use super::provider::{normalize_l2, EmbeddingError, EmbeddingProvider};
use crate::content::{ContentUnit, TextUnit};
use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Leading bytes of every snapshot file
const SNAPSHOT_MAGIC: &[u8; 8] = b"MMRAGSN1";
const SNAPSHOT_VERSION: u32 = 1;
const DIGEST_LEN: usize = 32;
const ZSTD_LEVEL: i32 = 3;

#[derive(Error, Debug)]
pub enum VectorIndexError {
    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Invalid dimension: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(PathBuf),

    #[error("Corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Text units with their normalized embeddings, in the same order
#[derive(Debug, Default)]
pub struct EmbeddedBatch {
    texts: Vec<TextUnit>,
    vectors: Vec<Vec<f32>>,
}

impl EmbeddedBatch {
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

/// Search hit: position in the item sequence and squared L2 distance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchResult {
    pub ordinal: usize,
    pub distance: f32,
}

/// Brute-force L2 index, row-major vectors
///
/// Search is exhaustive and therefore deterministic for a given insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatIndex {
    dimension: usize,
    vectors: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.vectors.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self, vector: &[f32]) -> Result<(), VectorIndexError> {
        if vector.len() != self.dimension {
            return Err(VectorIndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Append every vector, or none of them if any has the wrong width
    fn append(&mut self, vectors: &[Vec<f32>]) -> Result<(), VectorIndexError> {
        for vector in vectors {
            self.check(vector)?;
        }
        for vector in vectors {
            self.vectors.extend_from_slice(vector);
        }
        Ok(())
    }

    /// k nearest rows by squared L2 distance, ties broken by ordinal
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>, VectorIndexError> {
        self.check(query)?;

        let rows = ArrayView2::from_shape((self.len(), self.dimension), &self.vectors)
            .map_err(|e| VectorIndexError::CorruptSnapshot(e.to_string()))?;
        let query = ArrayView1::from(query);

        let mut results: Vec<SearchResult> = rows
            .outer_iter()
            .enumerate()
            .map(|(ordinal, row)| {
                let diff = &row - &query;
                SearchResult {
                    ordinal,
                    distance: diff.dot(&diff),
                }
            })
            .collect();

        results.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.ordinal.cmp(&b.ordinal))
        });
        results.truncate(k);

        Ok(results)
    }
}

#[derive(Serialize, Deserialize)]
struct SnapshotPayload {
    version: u32,
    items: Vec<TextUnit>,
    index: Option<FlatIndex>,
}

/// Text units and their embeddings, kept in lock-step
///
/// Ordinal `i` of the flat index is always the embedding of `items[i]`; both
/// are only ever extended together, or reset together.
pub struct VectorIndex {
    embedder: Arc<dyn EmbeddingProvider>,
    /// Created on the first non-empty `add`, which fixes the dimension
    index: Option<FlatIndex>,
    items: Vec<TextUnit>,
}

impl VectorIndex {
    /// Create an empty, uninitialized index
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            index: None,
            items: Vec::new(),
        }
    }

    /// Embed and append the text units among `units`; image units are ignored.
    ///
    /// Returns the number of items added. Either every text unit is added or,
    /// on error, the index is left exactly as it was.
    pub fn add<I>(&mut self, units: I) -> Result<usize, VectorIndexError>
    where
        I: IntoIterator,
        I::Item: Into<ContentUnit>,
    {
        let batch = Self::embed_units(self.embedder.as_ref(), units)?;
        self.append(batch)
    }

    /// The embedder this index was built with
    pub fn embedder(&self) -> Arc<dyn EmbeddingProvider> {
        self.embedder.clone()
    }

    /// Embed the text units among `units` without touching any index.
    ///
    /// Lets callers run inference outside the index lock and then
    /// [`append`](Self::append) the result.
    pub fn embed_units<I>(
        embedder: &dyn EmbeddingProvider,
        units: I,
    ) -> Result<EmbeddedBatch, VectorIndexError>
    where
        I: IntoIterator,
        I::Item: Into<ContentUnit>,
    {
        let texts: Vec<TextUnit> = units
            .into_iter()
            .filter_map(|unit| match unit.into() {
                ContentUnit::Text(text) => Some(text),
                ContentUnit::Image(_) => None,
            })
            .collect();

        if texts.is_empty() {
            return Ok(EmbeddedBatch::default());
        }

        let bodies: Vec<String> = texts.iter().map(|t| t.body.clone()).collect();
        let mut vectors = embedder.embed_batch(&bodies)?;

        if vectors.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: vectors.len(),
            }
            .into());
        }
        for vector in &mut vectors {
            normalize_l2(vector);
        }

        Ok(EmbeddedBatch { texts, vectors })
    }

    /// Append a pre-embedded batch, all or nothing
    pub fn append(&mut self, batch: EmbeddedBatch) -> Result<usize, VectorIndexError> {
        if batch.is_empty() {
            return Ok(0);
        }
        self.push(batch.texts, &batch.vectors)
    }

    /// The only place items and vectors grow
    fn push(&mut self, texts: Vec<TextUnit>, vectors: &[Vec<f32>]) -> Result<usize, VectorIndexError> {
        match &mut self.index {
            Some(index) => index.append(vectors)?,
            None => {
                let dimension = vectors.first().map_or(0, Vec::len);
                if dimension == 0 {
                    return Err(VectorIndexError::DimensionMismatch {
                        expected: self.embedder.dimension(),
                        actual: 0,
                    });
                }
                let mut index = FlatIndex::new(dimension);
                index.append(vectors)?;
                self.index = Some(index);
            }
        }

        let added = texts.len();
        self.items.extend(texts);
        tracing::info!("Added {} text items to vector index", added);

        Ok(added)
    }

    /// Return the `k` items nearest to `query`, most similar first.
    ///
    /// An empty or uninitialized index yields an empty result.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<TextUnit>, VectorIndexError> {
        Ok(self
            .search_scored(query, k)?
            .into_iter()
            .filter_map(|hit| self.items.get(hit.ordinal).cloned())
            .collect())
    }

    /// Like [`search`](Self::search) but returning ordinals and distances
    pub fn search_scored(&self, query: &str, k: usize) -> Result<Vec<SearchResult>, VectorIndexError> {
        if self.searchable().is_none() || k == 0 {
            return Ok(Vec::new());
        }
        let embedding = Self::embed_query(self.embedder.as_ref(), query)?;
        self.search_embedded(&embedding, k)
    }

    /// Normalized query vector, computed without touching any index
    pub fn embed_query(
        embedder: &dyn EmbeddingProvider,
        query: &str,
    ) -> Result<Vec<f32>, VectorIndexError> {
        let mut embedding = embedder.embed(query)?;
        normalize_l2(&mut embedding);
        Ok(embedding)
    }

    /// Rank against a vector from [`embed_query`](Self::embed_query)
    pub fn search_embedded(
        &self,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<SearchResult>, VectorIndexError> {
        let index = match self.searchable() {
            Some(index) if k > 0 => index,
            _ => return Ok(Vec::new()),
        };

        let results = index.search(embedding, k)?;
        tracing::debug!("Vector search returned {} of k={} results", results.len(), k);

        Ok(results)
    }

    fn searchable(&self) -> Option<&FlatIndex> {
        self.index
            .as_ref()
            .filter(|index| !index.is_empty() && !self.items.is_empty())
    }

    /// Items in insertion order
    pub fn items(&self) -> &[TextUnit] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Fixed embedding width, once the first items have been added
    pub fn dimension(&self) -> Option<usize> {
        self.index.as_ref().map(FlatIndex::dimension)
    }

    /// Drop every item and the index structure
    pub fn clear(&mut self) {
        self.index = None;
        self.items.clear();
    }

    /// Write items and index to `path` as one atomically replaced file
    pub fn save(&self, path: &Path) -> Result<(), VectorIndexError> {
        let payload = SnapshotPayload {
            version: SNAPSHOT_VERSION,
            items: self.items.clone(),
            index: self.index.clone(),
        };
        let json = serde_json::to_vec(&payload)
            .map_err(|e| VectorIndexError::SerializationError(e.to_string()))?;
        let compressed = zstd::encode_all(&json[..], ZSTD_LEVEL).map_err(|e| VectorIndexError::Io {
            source: e,
            context: "Failed to compress snapshot".to_string(),
        })?;
        let digest = blake3::hash(&compressed);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| VectorIndexError::Io {
                source: e,
                context: format!("Failed to create snapshot directory: {}", parent.display()),
            })?;
        }

        // Write to temporary file first (atomic write)
        let temp_path = temp_path(path);
        let mut file = fs::File::create(&temp_path).map_err(|e| VectorIndexError::Io {
            source: e,
            context: format!("Failed to create temp snapshot: {}", temp_path.display()),
        })?;
        let write = |file: &mut fs::File| -> std::io::Result<()> {
            file.write_all(SNAPSHOT_MAGIC)?;
            file.write_all(digest.as_bytes())?;
            file.write_all(&compressed)?;
            file.sync_all()
        };
        write(&mut file).map_err(|e| VectorIndexError::Io {
            source: e,
            context: format!("Failed to write snapshot: {}", temp_path.display()),
        })?;
        drop(file);

        if let Err(e) = fs::rename(&temp_path, path) {
            let _ = fs::remove_file(&temp_path);
            return Err(VectorIndexError::Io {
                source: e,
                context: format!(
                    "Failed to move snapshot into place: {} -> {}",
                    temp_path.display(),
                    path.display()
                ),
            });
        }

        tracing::info!("Vector index saved to {} ({} items)", path.display(), self.items.len());
        Ok(())
    }

    /// Read a snapshot written by [`save`](Self::save), failing on any problem
    pub fn load(path: &Path, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self, VectorIndexError> {
        if !path.exists() {
            return Err(VectorIndexError::SnapshotNotFound(path.to_path_buf()));
        }

        let bytes = fs::read(path).map_err(|e| VectorIndexError::Io {
            source: e,
            context: format!("Failed to read snapshot: {}", path.display()),
        })?;
        let payload = decode_snapshot(&bytes)?;

        match &payload.index {
            Some(index) => {
                if index.dimension() == 0 || index.vectors.len() % index.dimension() != 0 {
                    return Err(VectorIndexError::CorruptSnapshot(
                        "vector data does not match dimension".to_string(),
                    ));
                }
                if index.len() != payload.items.len() {
                    return Err(VectorIndexError::CorruptSnapshot(format!(
                        "{} items but {} vectors",
                        payload.items.len(),
                        index.len()
                    )));
                }
            }
            None if !payload.items.is_empty() => {
                return Err(VectorIndexError::CorruptSnapshot(
                    "items present without an index".to_string(),
                ));
            }
            None => {}
        }

        tracing::info!(
            "Vector index loaded from {} ({} items)",
            path.display(),
            payload.items.len()
        );

        Ok(Self {
            embedder,
            index: payload.index,
            items: payload.items,
        })
    }

    /// Load a snapshot, or start empty if it is missing or unreadable
    pub fn open(path: &Path, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        match Self::load(path, embedder.clone()) {
            Ok(index) => index,
            Err(VectorIndexError::SnapshotNotFound(_)) => {
                tracing::debug!("No snapshot at {}, starting empty", path.display());
                Self::new(embedder)
            }
            Err(e) => {
                tracing::warn!("Error loading vector index, starting empty: {}", e);
                Self::new(embedder)
            }
        }
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn decode_snapshot(bytes: &[u8]) -> Result<SnapshotPayload, VectorIndexError> {
    let header_len = SNAPSHOT_MAGIC.len() + DIGEST_LEN;
    if bytes.len() < header_len || &bytes[..SNAPSHOT_MAGIC.len()] != SNAPSHOT_MAGIC {
        return Err(VectorIndexError::CorruptSnapshot(
            "missing snapshot header".to_string(),
        ));
    }

    let digest = &bytes[SNAPSHOT_MAGIC.len()..header_len];
    let compressed = &bytes[header_len..];
    if blake3::hash(compressed).as_bytes()[..] != digest[..] {
        return Err(VectorIndexError::CorruptSnapshot(
            "checksum mismatch".to_string(),
        ));
    }

    let json = zstd::decode_all(compressed)
        .map_err(|e| VectorIndexError::CorruptSnapshot(format!("decompression failed: {}", e)))?;
    let payload: SnapshotPayload = serde_json::from_slice(&json)
        .map_err(|e| VectorIndexError::CorruptSnapshot(format!("invalid payload: {}", e)))?;

    if payload.version != SNAPSHOT_VERSION {
        return Err(VectorIndexError::CorruptSnapshot(format!(
            "unsupported snapshot version {}",
            payload.version
        )));
    }

    Ok(payload)
}
