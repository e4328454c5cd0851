//! Content units produced by ingestion
//!
//! A document is broken into text and image units. Text units are embedded and
//! indexed; image units live in the session's image store keyed by [`ImageId`].

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;

/// MIME prefix of the canonical image transport string
pub const IMAGE_TRANSPORT_PREFIX: &str = "data:image/png;base64,";

/// Stable key linking `[Image: <id>]` mentions to stored images
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(String);

impl ImageId {
    /// Derive the id for the `sequence`-th image on `page` of `source_file`
    pub fn new(source_file: &str, page: u32, sequence: u32) -> Self {
        Self(format!("{}_page{}_img{}", source_file, page, sequence))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ImageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ImageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a unit came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Name of the ingested document
    pub source_file: String,
    /// Zero-based page number
    pub page: u32,
    /// Disambiguates multiple units of the same kind on one page
    pub sequence_index: u32,
}

impl SourceRef {
    pub fn new(source_file: impl Into<String>, page: u32, sequence_index: u32) -> Self {
        Self {
            source_file: source_file.into(),
            page,
            sequence_index,
        }
    }
}

/// A chunk of page text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextUnit {
    pub source: SourceRef,
    pub body: String,
}

impl TextUnit {
    pub fn new(source: SourceRef, body: impl Into<String>) -> Self {
        Self {
            source,
            body: body.into(),
        }
    }
}

/// A normalized image, PNG encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUnit {
    pub source: SourceRef,
    /// PNG bytes
    pub pixel_data: Vec<u8>,
    /// (width, height) after normalization
    pub dimensions: (u32, u32),
}

impl ImageUnit {
    pub fn id(&self) -> ImageId {
        ImageId::new(
            &self.source.source_file,
            self.source.page,
            self.source.sequence_index,
        )
    }

    /// Self-describing transport form: `data:image/png;base64,<payload>`
    pub fn transport(&self) -> String {
        format!("{}{}", IMAGE_TRANSPORT_PREFIX, STANDARD.encode(&self.pixel_data))
    }
}

/// Either kind of extracted content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentUnit {
    Text(TextUnit),
    Image(ImageUnit),
}

impl ContentUnit {
    pub fn source(&self) -> &SourceRef {
        match self {
            ContentUnit::Text(t) => &t.source,
            ContentUnit::Image(i) => &i.source,
        }
    }

    pub fn as_text(&self) -> Option<&TextUnit> {
        match self {
            ContentUnit::Text(t) => Some(t),
            ContentUnit::Image(_) => None,
        }
    }
}

impl From<TextUnit> for ContentUnit {
    fn from(unit: TextUnit) -> Self {
        ContentUnit::Text(unit)
    }
}

impl From<ImageUnit> for ContentUnit {
    fn from(unit: ImageUnit) -> Self {
        ContentUnit::Image(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_id_is_stable() {
        let a = ImageId::new("report.pdf", 3, 1);
        let b = ImageId::new("report.pdf", 3, 1);
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "report.pdf_page3_img1");
        assert_ne!(a, ImageId::new("report.pdf", 3, 2));
    }

    #[test]
    fn test_transport_string_is_self_describing() {
        let unit = ImageUnit {
            source: SourceRef::new("a.pdf", 0, 0),
            pixel_data: vec![1, 2, 3],
            dimensions: (1, 1),
        };
        let transport = unit.transport();
        assert!(transport.starts_with(IMAGE_TRANSPORT_PREFIX));
        let payload = &transport[IMAGE_TRANSPORT_PREFIX.len()..];
        assert_eq!(STANDARD.decode(payload).unwrap(), vec![1, 2, 3]);
        assert_eq!(unit.id().as_str(), "a.pdf_page0_img0");
    }

    #[test]
    fn test_content_unit_text_filter() {
        let text: ContentUnit = TextUnit::new(SourceRef::new("a.pdf", 0, 0), "hi").into();
        assert!(text.as_text().is_some());
        assert_eq!(text.source().page, 0);
    }
}
