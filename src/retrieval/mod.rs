//! Query-time retrieval
//!
//! Image store, cross-modal marker linking, and context assembly under an
//! image budget.

mod assembler;
mod image_store;
mod linker;

pub use assembler::{select_images, AssembledContext, ContextAssembler, SelectedImage};
pub use image_store::ImageStore;
pub use linker::{parse_image_markers, resolve_references};
