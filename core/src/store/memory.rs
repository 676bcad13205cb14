use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::{IndexReader, IndexWriter, StoreError};
use crate::{DocId, DocMeta, IndexedDocument, Posting};

/// A complete in-memory postings and metadata table.
///
/// Mutated only while it is being assembled; once handed to a
/// [`SnapshotIndex`] it is shared read-only.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    postings: HashMap<String, HashMap<DocId, u32>>,
    doc_keywords: HashMap<DocId, Vec<String>>,
    docs: HashMap<DocId, DocMeta>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_documents(docs: &[IndexedDocument]) -> Self {
        let mut snapshot = Self::new();
        for doc in docs {
            snapshot.put_postings(&doc.meta.doc_id, &doc.postings);
            snapshot.docs.insert(doc.meta.doc_id.clone(), doc.meta.clone());
        }
        snapshot
    }

    pub fn num_docs(&self) -> usize {
        self.docs.len()
    }

    pub fn num_keywords(&self) -> usize {
        self.postings.len()
    }

    pub fn num_postings(&self) -> usize {
        self.postings.values().map(HashMap::len).sum()
    }

    pub fn count(&self, keyword: &str, doc_id: &str) -> Option<u32> {
        self.postings.get(keyword)?.get(doc_id).copied()
    }

    /// Postings of one document, sorted by keyword.
    pub fn postings_of(&self, doc_id: &str) -> Vec<Posting> {
        let mut out: Vec<Posting> = self
            .doc_keywords
            .get(doc_id)
            .into_iter()
            .flatten()
            .filter_map(|k| {
                self.count(k, doc_id).map(|count| Posting { keyword: k.clone(), doc_id: doc_id.to_string(), count })
            })
            .collect();
        out.sort_by(|a, b| a.keyword.cmp(&b.keyword));
        out
    }

    fn remove_postings(&mut self, doc_id: &str) {
        let Some(keywords) = self.doc_keywords.remove(doc_id) else { return };
        for k in keywords {
            if let Some(docs) = self.postings.get_mut(&k) {
                docs.remove(doc_id);
                if docs.is_empty() {
                    self.postings.remove(&k);
                }
            }
        }
    }

    fn put_postings(&mut self, doc_id: &str, postings: &[Posting]) {
        self.remove_postings(doc_id);
        if postings.is_empty() {
            return;
        }
        let mut keywords = Vec::with_capacity(postings.len());
        for p in postings.iter().filter(|p| p.count > 0) {
            let slot = self.postings.entry(p.keyword.clone()).or_default().entry(doc_id.to_string()).or_insert(0);
            if *slot == 0 {
                keywords.push(p.keyword.clone());
            }
            // Keep one posting per (keyword, doc); a repeated keyword in the input adds up.
            *slot += p.count;
        }
        self.doc_keywords.insert(doc_id.to_string(), keywords);
    }
}

impl IndexWriter for Snapshot {
    fn replace_postings(&mut self, doc_id: &str, postings: &[Posting]) -> Result<(), StoreError> {
        self.put_postings(doc_id, postings);
        Ok(())
    }

    fn upsert_metadata(&mut self, meta: &DocMeta) -> Result<(), StoreError> {
        self.docs.insert(meta.doc_id.clone(), meta.clone());
        Ok(())
    }
}

impl IndexReader for Snapshot {
    type View<'a> = &'a Snapshot;

    fn view(&self) -> Result<&Snapshot, StoreError> {
        Ok(self)
    }

    fn postings_for(&self, keywords: &[String]) -> Result<Vec<Posting>, StoreError> {
        let mut out = Vec::new();
        for k in keywords {
            if let Some(docs) = self.postings.get(k) {
                out.extend(docs.iter().map(|(doc_id, &count)| Posting {
                    keyword: k.clone(),
                    doc_id: doc_id.clone(),
                    count,
                }));
            }
        }
        Ok(out)
    }

    fn metadata_for(&self, doc_ids: &[String]) -> Result<HashMap<String, DocMeta>, StoreError> {
        Ok(doc_ids.iter().filter_map(|id| self.docs.get(id).map(|m| (id.clone(), m.clone()))).collect())
    }
}

/// Holds the current [`Snapshot`] behind an atomically swapped pointer.
///
/// Readers clone the `Arc` and query without holding any lock, so a rebuild
/// or an update never stalls an in-flight query. Writers are serialized.
#[derive(Debug, Default)]
pub struct SnapshotIndex {
    current: RwLock<Arc<Snapshot>>,
    writer: Mutex<()>,
}

impl SnapshotIndex {
    pub fn new(snapshot: Snapshot) -> Self {
        Self { current: RwLock::new(Arc::new(snapshot)), writer: Mutex::new(()) }
    }

    pub fn current(&self) -> Arc<Snapshot> {
        self.current.read().clone()
    }

    /// Replace the whole table; returns the snapshot that was live before.
    pub fn publish(&self, next: Snapshot) -> Arc<Snapshot> {
        let _guard = self.writer.lock();
        std::mem::replace(&mut *self.current.write(), Arc::new(next))
    }

    /// Copy the live snapshot, apply `f` to the copy and publish it if `f`
    /// succeeds. Readers keep seeing the old snapshot until the swap.
    pub fn update<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Snapshot) -> Result<T, E>,
    {
        let _guard = self.writer.lock();
        let mut next = (*self.current()).clone();
        let out = f(&mut next)?;
        *self.current.write() = Arc::new(next);
        Ok(out)
    }
}

impl IndexReader for SnapshotIndex {
    type View<'a> = Arc<Snapshot>;

    fn view(&self) -> Result<Arc<Snapshot>, StoreError> {
        Ok(self.current())
    }

    fn postings_for(&self, keywords: &[String]) -> Result<Vec<Posting>, StoreError> {
        self.current().postings_for(keywords)
    }

    fn metadata_for(&self, doc_ids: &[String]) -> Result<HashMap<String, DocMeta>, StoreError> {
        self.current().metadata_for(doc_ids)
    }
}
