//! Derived layer grouping
//!
//! Layers have no table of their own: a layer is the set of annotations on
//! a page sharing a `layer` value, recomputed from the store on every read.
//! Only the per-session visibility flags live here.

use crate::annotation::AnnotationId;
use crate::store::AnnotationStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Direction for [`AnnotationStore::move_layer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerDirection {
    Up,
    Down,
}

/// One layer of a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerEntry {
    pub key: u32,

    /// Member annotations in insertion order
    pub annotation_ids: Vec<AnnotationId>,

    pub visible: bool,
}

/// Transient visibility flags keyed by layer number
///
/// Layers are visible unless explicitly hidden. Not persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerVisibility {
    hidden: BTreeSet<u32>,
}

impl LayerVisibility {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the flag changed
    pub fn set_visible(&mut self, key: u32, visible: bool) -> bool {
        if visible {
            self.hidden.remove(&key)
        } else {
            self.hidden.insert(key)
        }
    }

    pub fn is_visible(&self, key: u32) -> bool {
        !self.hidden.contains(&key)
    }

    pub fn hidden_layers(&self) -> impl Iterator<Item = u32> + '_ {
        self.hidden.iter().copied()
    }

    pub fn show_all(&mut self) {
        self.hidden.clear();
    }
}

/// Group-by view over the store's `layer` field
#[derive(Debug, Clone, Default)]
pub struct LayerIndex {
    visibility: LayerVisibility,
}

impl LayerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layers of `page` in ascending key order (storage order)
    pub fn layers_for(&self, store: &AnnotationStore, page: u32) -> Vec<LayerEntry> {
        let mut groups: BTreeMap<u32, Vec<AnnotationId>> = BTreeMap::new();
        for annotation in store.query(page) {
            groups.entry(annotation.layer()).or_default().push(annotation.id());
        }

        groups
            .into_iter()
            .map(|(key, annotation_ids)| LayerEntry {
                key,
                annotation_ids,
                visible: self.visibility.is_visible(key),
            })
            .collect()
    }

    /// Layers of `page` highest first, the order a layer panel shows them
    pub fn listing(&self, store: &AnnotationStore, page: u32) -> Vec<LayerEntry> {
        let mut layers = self.layers_for(store, page);
        layers.reverse();
        layers
    }

    /// Returns true if the flag changed
    pub fn set_visible(&mut self, key: u32, visible: bool) -> bool {
        self.visibility.set_visible(key, visible)
    }

    pub fn is_visible(&self, key: u32) -> bool {
        self.visibility.is_visible(key)
    }

    pub fn visibility(&self) -> &LayerVisibility {
        &self.visibility
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{AnnotationDraft, AnnotationKind, PageCoordinate, Size};
    use pretty_assertions::assert_eq;

    fn commit(store: &mut AnnotationStore, page: u32, layer: u32) -> AnnotationId {
        let draft = AnnotationDraft::shape(
            AnnotationKind::Rectangle,
            page,
            PageCoordinate::new(0.0, 0.0),
            Size::new(20.0, 20.0),
        )
        .on_layer(layer);
        store.commit(draft).unwrap().into_annotation().unwrap().id()
    }

    #[test]
    fn test_layers_group_by_key_ascending() {
        let mut store = AnnotationStore::new();
        let a = commit(&mut store, 1, 2);
        let b = commit(&mut store, 1, 0);
        let c = commit(&mut store, 1, 2);
        commit(&mut store, 2, 5);

        let index = LayerIndex::new();
        let layers = index.layers_for(&store, 1);

        assert_eq!(
            layers,
            vec![
                LayerEntry { key: 0, annotation_ids: vec![b], visible: true },
                LayerEntry { key: 2, annotation_ids: vec![a, c], visible: true },
            ]
        );
    }

    #[test]
    fn test_listing_is_descending() {
        let mut store = AnnotationStore::new();
        commit(&mut store, 1, 0);
        commit(&mut store, 1, 3);
        commit(&mut store, 1, 1);

        let index = LayerIndex::new();
        let keys: Vec<u32> = index.listing(&store, 1).iter().map(|l| l.key).collect();
        assert_eq!(keys, vec![3, 1, 0]);
    }

    #[test]
    fn test_visibility_defaults_to_visible() {
        let mut index = LayerIndex::new();
        assert!(index.is_visible(7));

        assert!(index.set_visible(7, false));
        assert!(!index.is_visible(7));
        assert!(!index.set_visible(7, false));

        assert!(index.set_visible(7, true));
        assert!(index.is_visible(7));
    }

    #[test]
    fn test_hidden_flag_is_reported_in_entries() {
        let mut store = AnnotationStore::new();
        commit(&mut store, 1, 1);

        let mut index = LayerIndex::new();
        index.set_visible(1, false);
        assert!(!index.layers_for(&store, 1)[0].visible);
    }

    #[test]
    fn test_empty_page_has_no_layers() {
        let store = AnnotationStore::new();
        assert!(LayerIndex::new().layers_for(&store, 1).is_empty());
    }
}
