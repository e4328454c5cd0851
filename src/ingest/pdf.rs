//! PDF page extraction using lopdf
//!
//! Produces, per page, the page text and the raw bytes of every embedded image
//! in a self-contained format the image normalizer can decode.

use super::image::encode_png;
use image::{DynamicImage, GrayImage, RgbImage};
use lopdf::{Document, ObjectId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Failed to load PDF: {0}")]
    Load(String),
}

/// Content of a single page
#[derive(Debug, Clone, Default)]
pub struct PageContent {
    /// Zero-based page number
    pub page: u32,
    pub text: String,
    /// Encoded image files (JPEG, PNG, ...) in page order
    pub images: Vec<Vec<u8>>,
}

/// Page content extraction from a document
///
/// Allows swapping the PDF backend (or a scripted fake in tests).
pub trait DocumentExtractor: Send + Sync {
    fn extract(&self, document: &[u8]) -> Result<Vec<PageContent>, ExtractionError>;
}

/// lopdf-backed extractor
#[derive(Debug, Clone)]
pub struct LopdfExtractor {
    /// Skip image streams entirely
    pub include_images: bool,
}

impl Default for LopdfExtractor {
    fn default() -> Self {
        Self {
            include_images: true,
        }
    }
}

impl LopdfExtractor {
    pub fn new(include_images: bool) -> Self {
        Self { include_images }
    }

    fn page_images(&self, doc: &Document, page_id: ObjectId, page: u32) -> Vec<Vec<u8>> {
        if !has_xobjects(doc, page_id) {
            return Vec::new();
        }
        let images = match doc.get_page_images(page_id) {
            Ok(images) => images,
            Err(e) => {
                tracing::warn!("Failed to list images on page {}: {}", page, e);
                return Vec::new();
            }
        };

        images
            .into_iter()
            .map(|img| {
                let filters = img.filters.clone().unwrap_or_default();
                let passthrough = filters
                    .iter()
                    .any(|f| f == "DCTDecode" || f == "JPXDecode");

                if passthrough {
                    return img.content.to_vec();
                }

                // Raw samples: rebuild a PNG from the decompressed stream
                let rebuilt = rebuild_raster(
                    doc,
                    img.id,
                    img.width,
                    img.height,
                    img.color_space.as_deref(),
                    img.bits_per_component,
                );
                match rebuilt {
                    Some(png) => png,
                    None => {
                        tracing::debug!(
                            "Could not rebuild image {:?} on page {} (filters {:?})",
                            img.id,
                            page,
                            filters
                        );
                        img.content.to_vec()
                    }
                }
            })
            .collect()
    }
}

impl DocumentExtractor for LopdfExtractor {
    fn extract(&self, document: &[u8]) -> Result<Vec<PageContent>, ExtractionError> {
        let doc = Document::load_mem(document).map_err(|e| ExtractionError::Load(e.to_string()))?;

        let mut pages = Vec::new();
        // get_pages is keyed by 1-based page number, in order
        for (number, page_id) in doc.get_pages() {
            let page = number.saturating_sub(1);

            // An undecodable font loses this page's text, not the document
            let text = match doc.extract_text(&[number]) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("Failed to extract text on page {}: {}", page, e);
                    String::new()
                }
            };

            let images = if self.include_images {
                self.page_images(&doc, page_id, page)
            } else {
                Vec::new()
            };

            pages.push(PageContent { page, text, images });
        }

        tracing::debug!("Extracted {} pages", pages.len());
        Ok(pages)
    }
}

/// Whether the page's own resources carry an XObject dictionary
fn has_xobjects(doc: &Document, page_id: ObjectId) -> bool {
    doc.get_dictionary(page_id)
        .and_then(|page| doc.get_dict_in_dict(page, b"Resources"))
        .and_then(|resources| doc.get_dict_in_dict(resources, b"XObject"))
        .is_ok()
}

fn rebuild_raster(
    doc: &Document,
    id: ObjectId,
    width: i64,
    height: i64,
    color_space: Option<&str>,
    bits_per_component: Option<i64>,
) -> Option<Vec<u8>> {
    if bits_per_component.unwrap_or(8) != 8 {
        return None;
    }
    let width = u32::try_from(width).ok()?;
    let height = u32::try_from(height).ok()?;

    let stream = doc.get_object(id).ok()?.as_stream().ok()?;
    let samples = stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone());

    let img = match color_space {
        Some("DeviceGray") | Some("CalGray") => {
            DynamicImage::ImageLuma8(GrayImage::from_raw(width, height, samples)?)
        }
        Some("DeviceRGB") | Some("CalRGB") | None => {
            DynamicImage::ImageRgb8(RgbImage::from_raw(width, height, samples)?)
        }
        Some(_) => return None,
    };

    encode_png(&img).ok()
}
