//! Query-time context assembly: text retrieval, linked images, image budget

use super::{resolve_references, ImageStore};
use crate::content::{ImageId, ImageUnit, TextUnit};
use crate::embedding::VectorIndex;
use crate::error::{RagError, Result};
use crate::generation::{describe_request, GenerationError, GenerationProvider, GenerationSettings};
use futures::future::try_join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};

/// An image chosen for the prompt, with its model-written description
#[derive(Debug, Clone)]
pub struct SelectedImage {
    pub id: ImageId,
    pub image: Arc<ImageUnit>,
    pub description: String,
}

/// Retrieved text and selected images for one query
#[derive(Debug, Clone, Default)]
pub struct AssembledContext {
    /// Nearest first
    pub texts: Vec<TextUnit>,
    /// At most `max_images`, referenced images before filler
    pub images: Vec<SelectedImage>,
}

impl AssembledContext {
    /// Text bodies joined by blank lines
    pub fn context_text(&self) -> String {
        self.texts
            .iter()
            .map(|t| t.body.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Choose up to `max_images` images for `texts`.
///
/// Images referenced by the texts come first, in encounter order and without
/// duplicates; remaining slots are filled from the store in insertion order.
pub fn select_images(
    texts: &[TextUnit],
    store: &ImageStore,
    max_images: usize,
) -> Vec<(ImageId, Arc<ImageUnit>)> {
    let mut seen: HashSet<ImageId> = HashSet::new();
    let mut selected = Vec::new();

    let referenced = texts
        .iter()
        .flat_map(|text| resolve_references(&text.body, store));

    for id in referenced {
        if selected.len() >= max_images {
            break;
        }
        if seen.contains(&id) {
            continue;
        }
        if let Some(image) = store.get(&id) {
            seen.insert(id.clone());
            selected.push((id, image));
        }
    }

    let referenced_count = selected.len();

    for (id, image) in store.iter() {
        if selected.len() >= max_images {
            break;
        }
        if seen.insert(id.clone()) {
            selected.push((id.clone(), image.clone()));
        }
    }

    tracing::debug!(
        "Selected {} images ({} referenced, {} filler)",
        selected.len(),
        referenced_count,
        selected.len() - referenced_count
    );

    selected
}

/// Assembles bounded prompt context for a query
pub struct ContextAssembler {
    generator: Arc<dyn GenerationProvider>,
    settings: GenerationSettings,
    /// Maximum description calls in flight
    concurrency: usize,
}

impl ContextAssembler {
    pub fn new(
        generator: Arc<dyn GenerationProvider>,
        settings: GenerationSettings,
        concurrency: usize,
    ) -> Self {
        Self {
            generator,
            settings,
            concurrency: concurrency.max(1),
        }
    }

    /// Retrieve `text_k` text units, pick at most `max_images` images, and
    /// describe each picked image.
    ///
    /// An empty index is not an error: the text portion is simply empty.
    pub async fn assemble(
        &self,
        index: &RwLock<VectorIndex>,
        images: &RwLock<ImageStore>,
        query: &str,
        text_k: usize,
        max_images: usize,
    ) -> Result<AssembledContext> {
        let texts = self.search_texts(index, query, text_k).await?;

        let selected = {
            let store = images.read().await;
            select_images(&texts, &store, max_images)
        };

        let images = self.describe_all(selected).await?;

        Ok(AssembledContext { texts, images })
    }

    /// Nearest text units; the query is embedded on the blocking pool
    async fn search_texts(
        &self,
        index: &RwLock<VectorIndex>,
        query: &str,
        text_k: usize,
    ) -> Result<Vec<TextUnit>> {
        let embedder = {
            let index = index.read().await;
            if index.is_empty() || text_k == 0 {
                return Ok(Vec::new());
            }
            index.embedder()
        };

        let owned = query.to_string();
        let embedding = tokio::task::spawn_blocking(move || {
            VectorIndex::embed_query(embedder.as_ref(), &owned)
        })
        .await
        .map_err(|e| RagError::Other(anyhow::anyhow!("Query embedding task failed: {}", e)))??;

        let index = index.read().await;
        let hits = index.search_embedded(&embedding, text_k)?;
        Ok(hits
            .into_iter()
            .filter_map(|hit| index.items().get(hit.ordinal).cloned())
            .collect())
    }

    /// Describe images concurrently, results in input order
    pub async fn describe_all(
        &self,
        selected: Vec<(ImageId, Arc<ImageUnit>)>,
    ) -> std::result::Result<Vec<SelectedImage>, GenerationError> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        let tasks = selected.into_iter().map(|(id, image)| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| GenerationError::Request(e.to_string()))?;

                let request = describe_request(&image, &self.settings);
                let description = self.generator.generate(request).await?;

                Ok::<_, GenerationError>(SelectedImage {
                    id,
                    image,
                    description,
                })
            }
        });

        try_join_all(tasks).await
    }
}
