//! End-to-end session tests: ingestion, retrieval, and generation wired
//! together with deterministic in-process fakes.

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use mmrag::content::ImageId;
use mmrag::embedding::{EmbeddingError, EmbeddingProvider};
use mmrag::generation::{GenerationError, GenerationProvider, GenerationRequest};
use mmrag::ingest::{DocumentExtractor, ExtractionError, PageContent};
use mmrag::session::SessionOptions;
use mmrag::{RagError, RagSession};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const DIM: usize = 64;

/// Bag-of-words embedder hashing lowercase words into fixed buckets
struct HashEmbedder;

impl EmbeddingProvider for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut v = vec![0.0; DIM];
        for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            v[(hasher.finish() % DIM as u64) as usize] += 1.0;
        }
        Ok(v)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn model_name(&self) -> &str {
        "hash-bow"
    }
}

/// Maps exact document bytes to prepared pages; anything else fails to load
#[derive(Default)]
struct ScriptedExtractor {
    documents: HashMap<Vec<u8>, Vec<PageContent>>,
}

impl ScriptedExtractor {
    fn with(mut self, bytes: &[u8], pages: Vec<PageContent>) -> Self {
        self.documents.insert(bytes.to_vec(), pages);
        self
    }
}

impl DocumentExtractor for ScriptedExtractor {
    fn extract(&self, document: &[u8]) -> Result<Vec<PageContent>, ExtractionError> {
        self.documents
            .get(document)
            .cloned()
            .ok_or_else(|| ExtractionError::Load("unrecognized document".to_string()))
    }
}

/// Records every request; describe calls (no temperature) get a fixed caption
#[derive(Default)]
struct RecordingGenerator {
    requests: Mutex<Vec<GenerationRequest>>,
}

impl RecordingGenerator {
    fn describe_calls(&self) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.temperature.is_none())
            .count()
    }

    fn last_prompt(&self) -> String {
        let requests = self.requests.lock().unwrap();
        let last = requests.last().expect("no requests recorded");
        last.messages
            .iter()
            .map(|m| m.text())
            .collect::<Vec<_>>()
            .join("\n---\n")
    }
}

#[async_trait]
impl GenerationProvider for RecordingGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        let is_describe = request.temperature.is_none();
        self.requests.lock().unwrap().push(request);
        Ok(if is_describe {
            "a labelled diagram".to_string()
        } else {
            "final answer".to_string()
        })
    }
}

struct FailingGenerator;

#[async_trait]
impl GenerationProvider for FailingGenerator {
    async fn generate(&self, _request: GenerationRequest) -> Result<String, GenerationError> {
        Err(GenerationError::Api {
            status: 503,
            message: "service unavailable".to_string(),
        })
    }
}

fn png(shade: u8) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([shade, 0, 255 - shade])));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

fn page(page: u32, text: &str, images: Vec<Vec<u8>>) -> PageContent {
    PageContent {
        page,
        text: text.to_string(),
        images,
    }
}

fn session_with(
    temp: &TempDir,
    extractor: ScriptedExtractor,
    generator: Arc<dyn GenerationProvider>,
) -> RagSession {
    RagSession::init(
        SessionOptions::new(temp.path().join("vector_store.snapshot")),
        Arc::new(extractor),
        Arc::new(HashEmbedder),
        generator,
    )
}

#[tokio::test]
async fn test_long_text_page_yields_three_chunks() {
    let temp = TempDir::new().unwrap();
    let text = "A".repeat(5000);
    let extractor = ScriptedExtractor::default().with(b"long", vec![page(0, &text, vec![])]);
    let session = session_with(&temp, extractor, Arc::new(RecordingGenerator::default()));

    let report = session.process_document(b"long", "long.pdf").await.unwrap();
    assert_eq!(report.text_chunks, 3);
    assert_eq!(report.images, 0);

    let chunks = session.search(&text, 10).await.unwrap();
    assert_eq!(chunks.len(), 3);
    assert!(chunks.iter().all(|c| c.body.trim().chars().count() <= 2100));

    let total: usize = chunks.iter().map(|c| c.body.chars().count()).sum();
    assert_eq!(total, 5000);
}

#[tokio::test]
async fn test_single_page_with_one_image() {
    let temp = TempDir::new().unwrap();
    let extractor = ScriptedExtractor::default().with(
        b"doc",
        vec![page(0, "Sample text\n[Image: test.pdf_page0_img0]", vec![png(10)])],
    );
    let session = session_with(&temp, extractor, Arc::new(RecordingGenerator::default()));

    let report = session.process_document(b"doc", "test.pdf").await.unwrap();
    assert_eq!(report.text_chunks, 1);
    assert_eq!(report.images, 1);
    assert_eq!(report.skipped_images, 0);
    assert!(report.persisted);

    let image = session
        .image(&ImageId::new("test.pdf", 0, 0))
        .await
        .expect("image should be stored");
    assert_eq!(image.dimensions, (8, 8));
    assert!(image.transport().starts_with("data:image/png;base64,"));
}

#[tokio::test]
async fn test_query_selects_referenced_plus_filler() {
    let temp = TempDir::new().unwrap();
    let images: Vec<Vec<u8>> = (0..5).map(|i| png(i * 40)).collect();
    let extractor = ScriptedExtractor::default().with(
        b"gallery",
        vec![page(
            0,
            "The revenue chart is shown in [Image: gallery.pdf_page0_img3]",
            images,
        )],
    );
    let generator = Arc::new(RecordingGenerator::default());
    let session = session_with(&temp, extractor, generator.clone());
    session.process_document(b"gallery", "gallery.pdf").await.unwrap();

    let answer = session
        .query_with_images("What does the revenue chart show?", 2)
        .await
        .unwrap();
    assert_eq!(answer.answer, "final answer");
    assert_eq!(answer.image_context.len(), 2);

    let referenced = session
        .image(&ImageId::new("gallery.pdf", 0, 3))
        .await
        .unwrap();
    let filler = session
        .image(&ImageId::new("gallery.pdf", 0, 0))
        .await
        .unwrap();
    assert_eq!(answer.image_context[0], referenced.transport());
    assert_eq!(answer.image_context[1], filler.transport());
    assert_ne!(answer.image_context[0], answer.image_context[1]);

    assert_eq!(generator.describe_calls(), 2);
    let prompt = generator.last_prompt();
    assert!(prompt.contains("Image from gallery.pdf page 0: a labelled diagram"));
    assert!(prompt.ends_with("Question: What does the revenue chart show?"));
}

#[tokio::test]
async fn test_query_on_empty_index_still_answers() {
    let temp = TempDir::new().unwrap();
    let generator = Arc::new(RecordingGenerator::default());
    let session = session_with(&temp, ScriptedExtractor::default(), generator.clone());

    let answer = session.query("Is anything indexed?").await.unwrap();
    assert_eq!(answer.answer, "final answer");
    assert!(answer.text_context.is_empty());
    assert!(answer.image_context.is_empty());
    assert_eq!(generator.describe_calls(), 0);
}

#[tokio::test]
async fn test_generation_failure_is_typed() {
    let temp = TempDir::new().unwrap();
    let extractor =
        ScriptedExtractor::default().with(b"doc", vec![page(0, "some text", vec![png(1)])]);
    let session = session_with(&temp, extractor, Arc::new(FailingGenerator));
    session.process_document(b"doc", "doc.pdf").await.unwrap();

    let result = session.query("question").await;
    assert!(matches!(
        result,
        Err(RagError::Generation(GenerationError::Api { status: 503, .. }))
    ));
}

#[tokio::test]
async fn test_bad_document_does_not_affect_earlier_ones() {
    let temp = TempDir::new().unwrap();
    let extractor = ScriptedExtractor::default().with(
        b"good",
        vec![page(0, "good content about turbines", vec![png(5)])],
    );
    let session = session_with(&temp, extractor, Arc::new(RecordingGenerator::default()));
    session.process_document(b"good", "good.pdf").await.unwrap();

    let result = session.process_document(b"not a pdf", "bad.pdf").await;
    assert!(matches!(result, Err(RagError::Extraction(_))));

    assert_eq!(session.text_count().await, 1);
    assert_eq!(session.image_count().await, 1);
    let hits = session.search("turbines", 3).await.unwrap();
    assert_eq!(hits[0].body, "good content about turbines");
}

#[tokio::test]
async fn test_undecodable_image_is_skipped() {
    let temp = TempDir::new().unwrap();
    let extractor = ScriptedExtractor::default().with(
        b"mixed",
        vec![page(0, "text", vec![b"dummy_image".to_vec(), png(3)])],
    );
    let session = session_with(&temp, extractor, Arc::new(RecordingGenerator::default()));

    let report = session.process_document(b"mixed", "mixed.pdf").await.unwrap();
    assert_eq!(report.images, 1);
    assert_eq!(report.skipped_images, 1);
    assert!(session.image(&ImageId::new("mixed.pdf", 0, 0)).await.is_none());
    assert!(session.image(&ImageId::new("mixed.pdf", 0, 1)).await.is_some());
}

#[tokio::test]
async fn test_reingest_overwrites_images() {
    let temp = TempDir::new().unwrap();
    let extractor =
        ScriptedExtractor::default().with(b"doc", vec![page(0, "caption", vec![png(9)])]);
    let session = session_with(&temp, extractor, Arc::new(RecordingGenerator::default()));

    session.process_document(b"doc", "doc.pdf").await.unwrap();
    session.process_document(b"doc", "doc.pdf").await.unwrap();

    assert_eq!(session.image_count().await, 1);
    assert_eq!(session.text_count().await, 2);
}

#[tokio::test]
async fn test_snapshot_restores_index_across_sessions() {
    let temp = TempDir::new().unwrap();
    let extractor = || {
        ScriptedExtractor::default().with(
            b"doc",
            vec![
                page(0, "alpha reactor cooling loop", vec![]),
                page(1, "beta turbine blade wear", vec![]),
                page(2, "gamma generator windings", vec![]),
            ],
        )
    };

    let first = session_with(&temp, extractor(), Arc::new(RecordingGenerator::default()));
    first.process_document(b"doc", "doc.pdf").await.unwrap();
    let before = first.search("turbine blade", 3).await.unwrap();
    first.teardown().await.unwrap();

    let second = session_with(&temp, extractor(), Arc::new(RecordingGenerator::default()));
    let after = second.search("turbine blade", 3).await.unwrap();

    assert_eq!(before, after);
    assert_eq!(after[0].source.page, 1);
    assert_eq!(second.image_count().await, 0);
}

#[tokio::test]
async fn test_clear_all_removes_everything() {
    let temp = TempDir::new().unwrap();
    let extractor =
        ScriptedExtractor::default().with(b"doc", vec![page(0, "content", vec![png(1)])]);
    let session = session_with(&temp, extractor, Arc::new(RecordingGenerator::default()));
    session.process_document(b"doc", "doc.pdf").await.unwrap();
    assert!(session.snapshot_path().exists());

    session.clear_all().await.unwrap();

    assert!(session.search("content", 3).await.unwrap().is_empty());
    assert_eq!(session.image_count().await, 0);
    assert!(!session.snapshot_path().exists());
}

#[tokio::test]
async fn test_concurrent_queries_share_session() {
    let temp = TempDir::new().unwrap();
    let extractor = ScriptedExtractor::default().with(
        b"doc",
        vec![page(0, "shared content [Image: doc.pdf_page0_img0]", vec![png(2)])],
    );
    let generator = Arc::new(RecordingGenerator::default());
    let session = Arc::new(session_with(&temp, extractor, generator.clone()));
    session.process_document(b"doc", "doc.pdf").await.unwrap();

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let session = session.clone();
            tokio::spawn(async move { session.query(&format!("question {}", i)).await })
        })
        .collect();

    for handle in handles {
        let answer = handle.await.unwrap().unwrap();
        assert_eq!(answer.image_context.len(), 1);
        assert_eq!(answer.text_context.len(), 1);
    }
    assert_eq!(generator.describe_calls(), 4);
}
