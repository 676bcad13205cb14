//! Storage contracts between the indexer, the retriever and a backing store.
//!
//! Writers replace a document's postings wholesale, so re-running a batch is
//! always safe. Readers look postings up by keyword and metadata by doc_id.

use std::collections::HashMap;
use std::sync::Arc;

use sled::transaction::TransactionError;
use thiserror::Error;

use crate::{DocMeta, IndexedDocument, Posting};

mod disk;
mod memory;

pub use disk::{GenerationView, GenerationWriter, SledStore};
pub use memory::{Snapshot, SnapshotIndex};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(#[from] sled::Error),
    #[error("failed to encode or decode a stored record: {0}")]
    Codec(#[from] bincode::Error),
    #[error("failed to encode or decode the index manifest: {0}")]
    Manifest(#[from] serde_json::Error),
    #[error("corrupt entry in {tree}: {detail}")]
    Corrupt { tree: String, detail: String },
    #[error("no committed index generation; run a full build first")]
    NoGeneration,
    #[error("index was built with stopwords {stored}, active set is {active}; a full rebuild is required")]
    StopwordMismatch { stored: String, active: String },
}

impl From<TransactionError<StoreError>> for StoreError {
    fn from(e: TransactionError<StoreError>) -> Self {
        match e {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => StoreError::Backend(e),
        }
    }
}

pub trait IndexWriter {
    /// Replace every posting previously stored for `doc_id` with `postings`.
    /// An empty slice removes the document from the postings table.
    fn replace_postings(&mut self, doc_id: &str, postings: &[Posting]) -> Result<(), StoreError>;

    fn upsert_metadata(&mut self, meta: &DocMeta) -> Result<(), StoreError>;

    /// Replace a document's postings and metadata together. Stores that can
    /// apply both atomically override this.
    fn replace_document(&mut self, doc: &IndexedDocument) -> Result<(), StoreError> {
        self.replace_postings(&doc.meta.doc_id, &doc.postings)?;
        self.upsert_metadata(&doc.meta)
    }

    /// Flush one batch of indexer output.
    fn write_batch(&mut self, docs: &[IndexedDocument]) -> Result<(), StoreError> {
        for doc in docs {
            self.replace_document(doc)?;
        }
        Ok(())
    }
}

/// Read side of an index.
///
/// A query resolves one [`view`](Self::view) and runs every lookup against
/// it, so an index swapped in mid-query is never mixed with the one the
/// query started on.
pub trait IndexReader {
    type View<'a>: IndexReader + 'a
    where
        Self: 'a;

    /// Pin the index as it is now.
    fn view(&self) -> Result<Self::View<'_>, StoreError>;

    /// Every posting whose keyword is one of `keywords`.
    fn postings_for(&self, keywords: &[String]) -> Result<Vec<Posting>, StoreError>;

    /// Metadata for the requested ids; unknown ids are absent from the map.
    fn metadata_for(&self, doc_ids: &[String]) -> Result<HashMap<String, DocMeta>, StoreError>;
}

impl<R: IndexReader + ?Sized> IndexReader for &R {
    type View<'a> = R::View<'a> where Self: 'a;

    fn view(&self) -> Result<Self::View<'_>, StoreError> {
        (**self).view()
    }

    fn postings_for(&self, keywords: &[String]) -> Result<Vec<Posting>, StoreError> {
        (**self).postings_for(keywords)
    }

    fn metadata_for(&self, doc_ids: &[String]) -> Result<HashMap<String, DocMeta>, StoreError> {
        (**self).metadata_for(doc_ids)
    }
}

impl<R: IndexReader + ?Sized> IndexReader for Arc<R> {
    type View<'a> = R::View<'a> where Self: 'a;

    fn view(&self) -> Result<Self::View<'_>, StoreError> {
        (**self).view()
    }

    fn postings_for(&self, keywords: &[String]) -> Result<Vec<Posting>, StoreError> {
        (**self).postings_for(keywords)
    }

    fn metadata_for(&self, doc_ids: &[String]) -> Result<HashMap<String, DocMeta>, StoreError> {
        (**self).metadata_for(doc_ids)
    }
}
