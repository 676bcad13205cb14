//! Turns opinion records into keyword postings and metadata.
//!
//! Each document is processed on its own: normalize, tokenize, drop
//! stopwords, generate one- to three-word keywords and count them. Batches
//! fan out over rayon and are flushed to an [`IndexWriter`] one batch at a
//! time; writers replace a document's postings wholesale, so a failed run can
//! be repeated safely.

use std::collections::BTreeMap;

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_BATCH_SIZE, INTEGRITY_SAMPLE};
use crate::stopwords::StopwordSet;
use crate::store::{IndexWriter, StoreError};
use crate::tokenizer;
use crate::{DocMeta, IndexedDocument, Posting, SourceDocument};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("record has no doc_id (url: {url:?}, title: {title:?})")]
    MissingDocId { url: String, title: String },
}

/// Counters for one indexing run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub batches: usize,
    pub documents: usize,
    pub rejected: usize,
    /// Documents that produced metadata but no postings.
    pub empty: usize,
    pub postings: usize,
}

impl IndexReport {
    /// Fold the counters of another run into this one.
    pub fn absorb(&mut self, other: &IndexReport) {
        self.batches += other.batches;
        self.documents += other.documents;
        self.rejected += other.rejected;
        self.empty += other.empty;
        self.postings += other.postings;
    }
}

/// Output of [`Indexer::index_batch`].
#[derive(Debug, Default)]
pub struct BatchOutput {
    pub documents: Vec<IndexedDocument>,
    pub rejected: Vec<IndexError>,
}

#[derive(Debug, Clone)]
pub struct Indexer {
    stopwords: StopwordSet,
    batch_size: usize,
}

impl Indexer {
    pub fn new(stopwords: StopwordSet) -> Self {
        Self { stopwords, batch_size: DEFAULT_BATCH_SIZE }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn stopwords(&self) -> &StopwordSet {
        &self.stopwords
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Occurrence count of every keyword in `text`, unigrams and phrases in
    /// one namespace.
    pub fn keyword_counts(&self, text: &str) -> BTreeMap<String, u32> {
        let mut counts = BTreeMap::new();
        for keyword in tokenizer::keywords(text, &self.stopwords) {
            *counts.entry(keyword).or_insert(0) += 1;
        }
        counts
    }

    pub fn index_document(&self, doc: &SourceDocument) -> Result<IndexedDocument, IndexError> {
        let doc_id = match doc.doc_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => return Err(IndexError::MissingDocId { url: doc.url.clone(), title: doc.title.clone() }),
        };
        let postings = self
            .keyword_counts(&doc.text)
            .into_iter()
            .map(|(keyword, count)| Posting { keyword, doc_id: doc_id.clone(), count })
            .collect();
        Ok(IndexedDocument { meta: DocMeta { doc_id, url: doc.url.clone(), title: doc.title.clone() }, postings })
    }

    /// Index every record of `docs` in parallel. Rejected records are
    /// returned alongside the indexed ones; input order is preserved.
    pub fn index_batch(&self, docs: &[SourceDocument]) -> BatchOutput {
        let results: Vec<_> = docs.par_iter().map(|d| self.index_document(d)).collect();
        let mut out = BatchOutput::default();
        for r in results {
            match r {
                Ok(doc) => out.documents.push(doc),
                Err(e) => out.rejected.push(e),
            }
        }
        out
    }

    /// Index a stream of records batch by batch, flushing each batch to
    /// `writer`. Stops at the first storage error; batches flushed before it
    /// stay written.
    pub fn run<I, W>(&self, records: I, writer: &mut W) -> Result<IndexReport, StoreError>
    where
        I: IntoIterator<Item = SourceDocument>,
        W: IndexWriter + ?Sized,
    {
        let mut report = IndexReport::default();
        let mut empty_sample = Vec::new();
        let mut records = records.into_iter().peekable();

        while records.peek().is_some() {
            let batch: Vec<SourceDocument> = records.by_ref().take(self.batch_size).collect();
            let out = self.index_batch(&batch);
            for e in &out.rejected {
                warn!(error = %e, batch = report.batches + 1, "rejected record");
            }
            writer.write_batch(&out.documents)?;

            report.batches += 1;
            report.documents += out.documents.len();
            report.rejected += out.rejected.len();
            for doc in &out.documents {
                report.postings += doc.postings.len();
                if doc.postings.is_empty() {
                    report.empty += 1;
                    if empty_sample.len() < INTEGRITY_SAMPLE {
                        empty_sample.push(doc.meta.doc_id.clone());
                    }
                }
            }
            debug!(
                batch = report.batches,
                documents = out.documents.len(),
                rejected = out.rejected.len(),
                total_documents = report.documents,
                total_postings = report.postings,
                "flushed batch"
            );
        }

        if report.empty > 0 {
            warn!(count = report.empty, sample = ?empty_sample, "documents with metadata but no postings");
        }
        info!(
            batches = report.batches,
            documents = report.documents,
            rejected = report.rejected,
            postings = report.postings,
            "indexing run complete"
        );
        Ok(report)
    }
}

impl Default for Indexer {
    fn default() -> Self {
        Self::new(StopwordSet::legal())
    }
}
