//! Saved signature library
//!
//! Signatures are raster payloads kept for reuse. Placing one copies the
//! payload into a new `signature` annotation, so later library edits never
//! reach annotations that were already placed.

use crate::annotation::{AnnotationDraft, AnnotationKind, PageCoordinate, RasterPayload, Size};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type SignatureId = Uuid;

/// One stored signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureEntry {
    pub id: SignatureId,
    pub name: String,
    pub payload: RasterPayload,
    pub created_at: DateTime<Utc>,

    /// User the signature belongs to, for shared libraries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

impl SignatureEntry {
    pub fn new(name: impl Into<String>, payload: RasterPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            payload,
            created_at: Utc::now(),
            owner: None,
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Draft placing this signature with its own copy of the payload
    pub fn to_draft(&self, page: u32, origin: PageCoordinate, size: Size) -> AnnotationDraft {
        AnnotationDraft::raster(AnnotationKind::Signature, page, origin, size, self.payload.clone())
    }
}

/// Ordered collection of saved signatures
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignatureLibrary {
    entries: Vec<SignatureEntry>,
}

impl SignatureLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<SignatureEntry>) -> Self {
        let mut library = Self::new();
        for entry in entries {
            library.insert(entry);
        }
        library
    }

    /// Store a new signature and return its id
    pub fn add(&mut self, name: impl Into<String>, payload: RasterPayload) -> SignatureId {
        let entry = SignatureEntry::new(name, payload);
        let id = entry.id;
        self.entries.push(entry);
        id
    }

    /// Insert or replace by id
    pub fn insert(&mut self, entry: SignatureEntry) {
        match self.entries.iter_mut().find(|existing| existing.id == entry.id) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn remove(&mut self, id: SignatureId) -> Option<SignatureEntry> {
        let position = self.entries.iter().position(|entry| entry.id == id)?;
        Some(self.entries.remove(position))
    }

    pub fn get(&self, id: SignatureId) -> Option<&SignatureEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    pub fn list(&self) -> &[SignatureEntry] {
        &self.entries
    }

    pub fn list_for_owner<'a>(&'a self, owner: &'a str) -> impl Iterator<Item = &'a SignatureEntry> + 'a {
        self.entries
            .iter()
            .filter(move |entry| entry.owner.as_deref() == Some(owner))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
