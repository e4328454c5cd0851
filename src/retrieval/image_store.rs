//! Session-scoped image store, iterated in insertion order

use crate::content::{ImageId, ImageUnit};
use ahash::AHashMap;
use std::sync::Arc;

/// Images of the current session keyed by [`ImageId`]
///
/// Re-inserting an existing id replaces the image in place; its position in
/// iteration order does not change.
#[derive(Debug, Default, Clone)]
pub struct ImageStore {
    order: Vec<ImageId>,
    images: AHashMap<ImageId, Arc<ImageUnit>>,
}

impl ImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert under the unit's derived id, returning the image it replaced
    pub fn insert(&mut self, unit: ImageUnit) -> Option<Arc<ImageUnit>> {
        let id = unit.id();
        let previous = self.images.insert(id.clone(), Arc::new(unit));
        if previous.is_none() {
            self.order.push(id);
        } else {
            tracing::debug!("Replaced image {}", id);
        }
        previous
    }

    pub fn get(&self, id: &ImageId) -> Option<Arc<ImageUnit>> {
        self.images.get(id).cloned()
    }

    pub fn contains(&self, id: &ImageId) -> bool {
        self.images.contains_key(id)
    }

    /// Images in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&ImageId, &Arc<ImageUnit>)> {
        self.order
            .iter()
            .filter_map(move |id| self.images.get(id).map(|img| (id, img)))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.images.clear();
    }
}
