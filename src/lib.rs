//! mmrag - Multimodal retrieval over PDF documents
//!
//! Ingests PDFs into text chunks and normalized images, indexes the text in an
//! exact L2 vector index, and answers questions by assembling retrieved text and
//! linked images into a bounded prompt for a generation model.

pub mod cli;
pub mod config;
pub mod content;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod ingest;
pub mod retrieval;
pub mod session;

pub use error::{RagError, Result};
pub use session::{IngestReport, QueryAnswer, RagSession};
