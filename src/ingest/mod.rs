//! Document ingestion: page extraction, text chunking, image normalization

pub mod chunker;
pub mod image;
mod pdf;

pub use self::image::{normalize, ImageError};
pub use chunker::{chunk, split_windows};
pub use pdf::{DocumentExtractor, ExtractionError, LopdfExtractor, PageContent};

use crate::content::{ImageUnit, SourceRef, TextUnit};

/// Limits applied while turning pages into content units
#[derive(Debug, Clone, Copy)]
pub struct IngestLimits {
    pub chunk_size: usize,
    pub max_image_dimensions: (u32, u32),
    pub enable_images: bool,
}

/// Units produced from one document
#[derive(Debug, Default)]
pub struct DocumentUnits {
    pub texts: Vec<TextUnit>,
    pub images: Vec<ImageUnit>,
    /// Images that failed to decode and were skipped
    pub skipped_images: usize,
}

/// Turn extracted pages into text and image units.
///
/// Page text is trimmed before chunking and blank pages yield no text. An image
/// that fails to normalize is logged and skipped; its sequence index is still
/// consumed so ids stay aligned with the page's image order.
pub fn build_units(source_file: &str, pages: Vec<PageContent>, limits: IngestLimits) -> DocumentUnits {
    let mut units = DocumentUnits::default();

    for page in pages {
        let text = page.text.trim();
        if !text.is_empty() {
            for (idx, body) in chunk(text, limits.chunk_size).into_iter().enumerate() {
                units.texts.push(TextUnit::new(
                    SourceRef::new(source_file, page.page, idx as u32),
                    body,
                ));
            }
        }

        if !limits.enable_images {
            continue;
        }

        for (idx, raw) in page.images.iter().enumerate() {
            let source = SourceRef::new(source_file, page.page, idx as u32);
            match normalize(raw, limits.max_image_dimensions, source) {
                Ok(unit) => units.images.push(unit),
                Err(e) => {
                    tracing::warn!(
                        "Skipping image {} on page {} of {}: {}",
                        idx,
                        page.page,
                        source_file,
                        e
                    );
                    units.skipped_images += 1;
                }
            }
        }
    }

    units
}
