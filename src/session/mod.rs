//! Session management
//!
//! A [`RagSession`] owns the vector index, the image store, and the external
//! capabilities for one process. It has an explicit lifecycle: [`init`]
//! restores the snapshot, [`clear_all`] resets everything, and [`teardown`]
//! persists the index before the session is dropped.
//!
//! [`init`]: RagSession::init
//! [`clear_all`]: RagSession::clear_all
//! [`teardown`]: RagSession::teardown

use crate::config::Config;
use crate::content::{ImageId, ImageUnit, TextUnit};
use crate::embedding::{EmbeddingProvider, FastEmbedProvider, SearchResult, VectorIndex};
use crate::error::{RagError, Result};
use crate::generation::{
    GenerationError, GenerationProvider, GenerationRequest, GenerationSettings, OpenAiClient,
    Orchestrator,
};
use crate::ingest::{build_units, DocumentExtractor, IngestLimits, LopdfExtractor};
use crate::retrieval::{ContextAssembler, ImageStore};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

pub use crate::generation::QueryAnswer;

/// Per-document ingestion outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub source_file: String,
    pub text_chunks: usize,
    pub images: usize,
    /// Images that could not be decoded
    pub skipped_images: usize,
    /// Whether the snapshot write after this document succeeded. When false
    /// the document is still searchable in this session.
    pub persisted: bool,
}

/// Tunables for a session, usually derived from [`Config`]
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub snapshot_path: PathBuf,
    pub limits: IngestLimits,
    pub settings: GenerationSettings,
    pub text_k: usize,
    pub max_images: usize,
    pub describe_concurrency: usize,
}

impl SessionOptions {
    /// Defaults matching [`Config::default`] with the given snapshot location
    pub fn new(snapshot_path: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_path: snapshot_path.into(),
            limits: IngestLimits {
                chunk_size: 2000,
                max_image_dimensions: (512, 512),
                enable_images: true,
            },
            settings: GenerationSettings::default(),
            text_k: 3,
            max_images: 2,
            describe_concurrency: 4,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            snapshot_path: config.snapshot_path()?,
            limits: config.ingest_limits(),
            settings: config.generation_settings(),
            text_k: config.retrieval.text_k,
            max_images: config.retrieval.max_images,
            describe_concurrency: config.retrieval.describe_concurrency,
        })
    }
}

/// Stand-in generator when no API key is configured
struct MissingCredentials(String);

#[async_trait]
impl GenerationProvider for MissingCredentials {
    async fn generate(&self, _request: GenerationRequest) -> std::result::Result<String, GenerationError> {
        Err(GenerationError::MissingApiKey(self.0.clone()))
    }
}

/// Explicit session state for ingestion and querying
pub struct RagSession {
    options: SessionOptions,
    extractor: Arc<dyn DocumentExtractor>,
    index: RwLock<VectorIndex>,
    images: RwLock<ImageStore>,
    assembler: ContextAssembler,
    orchestrator: Orchestrator,
}

impl RagSession {
    /// Create a session, restoring the index from the snapshot when one is
    /// readable. The image store always starts empty.
    pub fn init(
        options: SessionOptions,
        extractor: Arc<dyn DocumentExtractor>,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
    ) -> Self {
        let index = VectorIndex::open(&options.snapshot_path, embedder);
        tracing::info!(
            "Session initialized with {} indexed text units ({})",
            index.len(),
            options.snapshot_path.display()
        );

        let assembler = ContextAssembler::new(
            generator.clone(),
            options.settings.clone(),
            options.describe_concurrency,
        );
        let orchestrator = Orchestrator::new(generator, options.settings.clone());

        Self {
            options,
            extractor,
            index: RwLock::new(index),
            images: RwLock::new(ImageStore::new()),
            assembler,
            orchestrator,
        }
    }

    /// Build the production session: lopdf extraction, fastembed embeddings,
    /// and an OpenAI-compatible chat endpoint.
    pub fn from_config(config: &Config) -> Result<Self> {
        let options = SessionOptions::from_config(config)?;

        let extractor = Arc::new(LopdfExtractor::new(config.ingest.enable_image_processing));
        let embedder = Arc::new(FastEmbedProvider::new(
            &config.embedding.model,
            config.embedding.batch_size,
        )?);
        let generator: Arc<dyn GenerationProvider> = match OpenAiClient::from_env(
            config.llm.base_url.clone(),
            &config.llm.api_key_env,
            Duration::from_secs(config.llm.timeout_secs),
        ) {
            Ok(client) => Arc::new(client),
            // Ingestion and search work without credentials; generation fails on use
            Err(GenerationError::MissingApiKey(var)) => {
                tracing::debug!("{} not set, generation disabled", var);
                Arc::new(MissingCredentials(var))
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self::init(options, extractor, embedder, generator))
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.options.snapshot_path
    }

    /// Ingest one document and persist the index.
    ///
    /// Extraction or embedding failure aborts this document only; nothing from
    /// it is stored and earlier documents are untouched. Once the document is
    /// committed to memory a failed snapshot write is only reported through
    /// [`IngestReport::persisted`], so retrying never duplicates chunks.
    pub async fn process_document(&self, bytes: &[u8], name: &str) -> Result<IngestReport> {
        tracing::info!("Processing document: {} ({} bytes)", name, bytes.len());

        // Parsing and inference run on the blocking pool, outside the index lock
        let extractor = self.extractor.clone();
        let embedder = self.index.read().await.embedder();
        let limits = self.options.limits;
        let document = bytes.to_vec();
        let source_file = name.to_string();
        let (batch, images, skipped_images) = tokio::task::spawn_blocking(move || -> Result<_> {
            let pages = extractor.extract(&document)?;
            let units = build_units(&source_file, pages, limits);
            let batch = VectorIndex::embed_units(embedder.as_ref(), units.texts)?;
            Ok((batch, units.images, units.skipped_images))
        })
        .await
        .map_err(|e| RagError::Other(anyhow::anyhow!("Ingestion task for {} failed: {}", name, e)))??;

        let mut index = self.index.write().await;
        let text_chunks = index.append(batch)?;

        let image_count = images.len();
        {
            let mut store = self.images.write().await;
            for image in images {
                store.insert(image);
            }
        }

        let persisted = match index.save(&self.options.snapshot_path) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    "Ingested {} but could not save snapshot {}: {}",
                    name,
                    self.options.snapshot_path.display(),
                    e
                );
                false
            }
        };
        drop(index);

        let report = IngestReport {
            source_file: name.to_string(),
            text_chunks,
            images: image_count,
            skipped_images,
            persisted,
        };
        tracing::info!(
            "Ingested {}: {} text chunks, {} images, {} skipped",
            report.source_file,
            report.text_chunks,
            report.images,
            report.skipped_images
        );

        Ok(report)
    }

    /// Read a file from disk and ingest it under its file name
    pub async fn process_file(&self, path: &Path) -> Result<IngestReport> {
        let bytes = std::fs::read(path).map_err(|e| RagError::Io {
            source: e,
            context: format!("Failed to read document: {}", path.display()),
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        self.process_document(&bytes, &name).await
    }

    /// Answer a question with the configured image budget
    pub async fn query(&self, question: &str) -> Result<QueryAnswer> {
        self.query_with_images(question, self.options.max_images).await
    }

    /// Answer a question sending at most `max_images` images.
    ///
    /// An empty index is a valid empty context, not an error.
    pub async fn query_with_images(&self, question: &str, max_images: usize) -> Result<QueryAnswer> {
        let context = self
            .assembler
            .assemble(
                &self.index,
                &self.images,
                question,
                self.options.text_k,
                max_images,
            )
            .await?;

        tracing::debug!(
            "Assembled {} text units and {} images for query",
            context.texts.len(),
            context.images.len()
        );

        Ok(self.orchestrator.answer(question, &context).await?)
    }

    /// Nearest text units, most similar first
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<TextUnit>> {
        Ok(self.index.read().await.search(query, k)?)
    }

    /// Nearest text units with their squared distances
    pub async fn search_scored(&self, query: &str, k: usize) -> Result<Vec<(TextUnit, f32)>> {
        let index = self.index.read().await;
        let hits: Vec<SearchResult> = index.search_scored(query, k)?;
        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                index
                    .items()
                    .get(hit.ordinal)
                    .map(|item| (item.clone(), hit.distance))
            })
            .collect())
    }

    pub async fn image(&self, id: &ImageId) -> Option<Arc<ImageUnit>> {
        self.images.read().await.get(id)
    }

    pub async fn text_count(&self) -> usize {
        self.index.read().await.len()
    }

    pub async fn image_count(&self) -> usize {
        self.images.read().await.len()
    }

    /// Drop the index, its items, and every stored image, then remove the
    /// snapshot file if present.
    pub async fn clear_all(&self) -> Result<()> {
        let mut index = self.index.write().await;
        index.clear();
        self.images.write().await.clear();

        let path = &self.options.snapshot_path;
        match std::fs::remove_file(path) {
            Ok(()) => tracing::info!("Removed snapshot {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(RagError::Io {
                    source: e,
                    context: format!("Failed to remove snapshot: {}", path.display()),
                })
            }
        }

        tracing::info!("Session cleared");
        Ok(())
    }

    /// Persist the index and end the session
    pub async fn teardown(self) -> Result<()> {
        let index = self.index.read().await;
        if index.is_empty() {
            tracing::debug!("Nothing to persist on teardown");
            return Ok(());
        }
        index.save(&self.options.snapshot_path)?;
        Ok(())
    }
}
