use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use sled::transaction::ConflictableTransactionError;
use sled::{Db, Transactional, Tree};
use tracing::{debug, info};

use super::{IndexReader, IndexWriter, StoreError};
use crate::manifest::Manifest;
use crate::{DocMeta, IndexedDocument, Posting};

const CURRENT_KEY: &[u8] = b"current_generation";
const MANIFEST_PREFIX: &str = "manifest.";
const POSTINGS: &str = "postings";
const DOCUMENTS: &str = "documents";
const DOC_KEYWORDS: &str = "doc_keywords";
const KEY_SEP: u8 = 0;

/// Embedded on-disk index.
///
/// Every build writes a new generation of trees (`postings.<n>`,
/// `documents.<n>`, `doc_keywords.<n>`) and becomes visible only when
/// [`commit`](Self::commit) flips the `current_generation` key. The previous
/// generation is kept until the next commit so that queries that resolved it
/// just before the flip still finish. One builder at a time per store.
#[derive(Clone)]
pub struct SledStore {
    db: Db,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    pub fn current_generation(&self) -> Result<Option<u64>, StoreError> {
        self.db.get(CURRENT_KEY)?.map(|v| decode_u64(&v, "current_generation")).transpose()
    }

    /// Manifest of the live generation, if one was ever committed.
    pub fn manifest(&self) -> Result<Option<Manifest>, StoreError> {
        match self.current_generation()? {
            Some(generation) => self.manifest_of(generation),
            None => Ok(None),
        }
    }

    /// Start an empty generation for a full rebuild.
    pub fn begin_generation(&self, stopwords_version: &str) -> Result<GenerationWriter, StoreError> {
        let generation = self.db.generate_id()? + 1;
        let writer = GenerationWriter::open(&self.db, Manifest::new(generation, stopwords_version))?;
        info!(generation, "started index generation");
        Ok(writer)
    }

    /// Writer over the live generation for incremental upserts. Refused when
    /// the live generation was built with a different stopword set.
    pub fn open_current(&self, stopwords_version: &str) -> Result<GenerationWriter, StoreError> {
        let manifest = self.manifest()?.ok_or(StoreError::NoGeneration)?;
        if manifest.stopwords_version != stopwords_version {
            return Err(StoreError::StopwordMismatch {
                stored: manifest.stopwords_version,
                active: stopwords_version.to_string(),
            });
        }
        GenerationWriter::open(&self.db, manifest)
    }

    /// Record the manifest and make the writer's generation the live one.
    pub fn commit(&self, writer: GenerationWriter, rejected: u64) -> Result<Manifest, StoreError> {
        let GenerationWriter { mut manifest, postings, documents, .. } = writer;
        let generation = manifest.generation;
        manifest.documents = documents.len() as u64;
        manifest.postings = postings.len() as u64;
        manifest.rejected = rejected;
        postings.flush()?;
        documents.flush()?;
        self.db.insert(manifest_key(generation), manifest.to_bytes()?)?;

        let previous = self.current_generation()?;
        self.db.insert(CURRENT_KEY, generation.to_be_bytes().to_vec())?;
        let mut keep = HashSet::from([generation]);
        keep.extend(previous);
        self.drop_generations(&keep)?;
        self.db.flush()?;
        info!(generation, ?previous, documents = manifest.documents, postings = manifest.postings, "committed index generation");
        Ok(manifest)
    }

    fn manifest_of(&self, generation: u64) -> Result<Option<Manifest>, StoreError> {
        self.db.get(manifest_key(generation))?.map(|b| Manifest::from_bytes(&b)).transpose()
    }

    fn drop_generations(&self, keep: &HashSet<u64>) -> Result<(), StoreError> {
        for name in self.db.tree_names() {
            let Ok(name) = std::str::from_utf8(&name) else { continue };
            let Some(generation) = parse_generation(name) else { continue };
            if !keep.contains(&generation) {
                debug!(tree = name, "dropping stale tree");
                self.db.drop_tree(name)?;
            }
        }
        for item in self.db.scan_prefix(MANIFEST_PREFIX) {
            let (key, _) = item?;
            let generation = std::str::from_utf8(&key)
                .ok()
                .and_then(|k| k.strip_prefix(MANIFEST_PREFIX))
                .and_then(|g| g.parse::<u64>().ok());
            if matches!(generation, Some(g) if !keep.contains(&g)) {
                self.db.remove(key)?;
            }
        }
        Ok(())
    }
}

impl IndexReader for SledStore {
    type View<'a> = GenerationView;

    /// Resolve the live generation once; the returned view keeps reading it
    /// even if another generation is committed meanwhile.
    fn view(&self) -> Result<GenerationView, StoreError> {
        let generation = self.current_generation()?.ok_or(StoreError::NoGeneration)?;
        Ok(GenerationView {
            generation,
            postings: self.db.open_tree(tree_name(POSTINGS, generation))?,
            documents: self.db.open_tree(tree_name(DOCUMENTS, generation))?,
        })
    }

    fn postings_for(&self, keywords: &[String]) -> Result<Vec<Posting>, StoreError> {
        self.view()?.postings_for(keywords)
    }

    fn metadata_for(&self, doc_ids: &[String]) -> Result<HashMap<String, DocMeta>, StoreError> {
        self.view()?.metadata_for(doc_ids)
    }
}

/// Read handle on the trees of one committed generation.
#[derive(Clone)]
pub struct GenerationView {
    generation: u64,
    postings: Tree,
    documents: Tree,
}

impl GenerationView {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl IndexReader for GenerationView {
    type View<'a> = &'a GenerationView;

    fn view(&self) -> Result<&GenerationView, StoreError> {
        Ok(self)
    }

    fn postings_for(&self, keywords: &[String]) -> Result<Vec<Posting>, StoreError> {
        let mut out = Vec::new();
        for keyword in keywords {
            let prefix = posting_prefix(keyword);
            for item in self.postings.scan_prefix(&prefix) {
                let (key, value) = item?;
                let doc_id = std::str::from_utf8(&key[prefix.len()..]).map_err(|e| corrupt(POSTINGS, e))?;
                out.push(Posting { keyword: keyword.clone(), doc_id: doc_id.to_string(), count: decode_u32(&value)? });
            }
        }
        Ok(out)
    }

    fn metadata_for(&self, doc_ids: &[String]) -> Result<HashMap<String, DocMeta>, StoreError> {
        let mut out = HashMap::with_capacity(doc_ids.len());
        for id in doc_ids {
            if let Some(bytes) = self.documents.get(id.as_bytes())? {
                out.insert(id.clone(), bincode::deserialize(&bytes)?);
            }
        }
        Ok(out)
    }
}

/// Writes into one generation's trees.
pub struct GenerationWriter {
    manifest: Manifest,
    postings: Tree,
    documents: Tree,
    doc_keywords: Tree,
}

impl GenerationWriter {
    fn open(db: &Db, manifest: Manifest) -> Result<Self, StoreError> {
        let generation = manifest.generation;
        Ok(Self {
            postings: db.open_tree(tree_name(POSTINGS, generation))?,
            documents: db.open_tree(tree_name(DOCUMENTS, generation))?,
            doc_keywords: db.open_tree(tree_name(DOC_KEYWORDS, generation))?,
            manifest,
        })
    }

    pub fn generation(&self) -> u64 {
        self.manifest.generation
    }
}

impl GenerationWriter {
    /// Replace one document's postings, its keyword list and optionally its
    /// metadata in a single transaction over the three trees. Readers of a
    /// live generation see the document either before or after the change.
    fn apply(&self, doc_id: &str, postings: &[Posting], meta: Option<&DocMeta>) -> Result<(), StoreError> {
        let mut counts: BTreeMap<&str, u32> = BTreeMap::new();
        for p in postings.iter().filter(|p| p.count > 0) {
            *counts.entry(p.keyword.as_str()).or_insert(0) += p.count;
        }
        let keywords: Vec<&str> = counts.keys().copied().collect();
        let keyword_list = if keywords.is_empty() { None } else { Some(bincode::serialize(&keywords)?) };
        let meta_bytes = meta.map(bincode::serialize).transpose()?;

        (&self.postings, &self.doc_keywords, &self.documents)
            .transaction(|(tx_postings, tx_doc_keywords, tx_documents)| {
                if let Some(old) = tx_doc_keywords.get(doc_id.as_bytes())? {
                    let old: Vec<String> = bincode::deserialize(&old)
                        .map_err(|e| ConflictableTransactionError::Abort(StoreError::from(e)))?;
                    for keyword in old {
                        tx_postings.remove(posting_key(&keyword, doc_id))?;
                    }
                }
                // Re-inserted keywords overwrite the removals above.
                for (keyword, count) in &counts {
                    tx_postings.insert(posting_key(keyword, doc_id), count.to_be_bytes().to_vec())?;
                }
                match &keyword_list {
                    Some(list) => tx_doc_keywords.insert(doc_id.as_bytes(), list.clone())?,
                    None => tx_doc_keywords.remove(doc_id.as_bytes())?,
                };
                if let Some(bytes) = &meta_bytes {
                    tx_documents.insert(doc_id.as_bytes(), bytes.clone())?;
                }
                Ok(())
            })?;
        Ok(())
    }
}

impl IndexWriter for GenerationWriter {
    fn replace_postings(&mut self, doc_id: &str, postings: &[Posting]) -> Result<(), StoreError> {
        self.apply(doc_id, postings, None)
    }

    fn upsert_metadata(&mut self, meta: &DocMeta) -> Result<(), StoreError> {
        self.documents.insert(meta.doc_id.as_bytes(), bincode::serialize(meta)?)?;
        Ok(())
    }

    fn replace_document(&mut self, doc: &IndexedDocument) -> Result<(), StoreError> {
        self.apply(&doc.meta.doc_id, &doc.postings, Some(&doc.meta))
    }
}

fn tree_name(kind: &str, generation: u64) -> String {
    format!("{kind}.{generation}")
}

fn parse_generation(tree: &str) -> Option<u64> {
    let (kind, generation) = tree.rsplit_once('.')?;
    if matches!(kind, POSTINGS | DOCUMENTS | DOC_KEYWORDS) {
        generation.parse().ok()
    } else {
        None
    }
}

fn manifest_key(generation: u64) -> String {
    format!("{MANIFEST_PREFIX}{generation}")
}

fn posting_prefix(keyword: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(keyword.len() + 1);
    key.extend_from_slice(keyword.as_bytes());
    key.push(KEY_SEP);
    key
}

fn posting_key(keyword: &str, doc_id: &str) -> Vec<u8> {
    let mut key = posting_prefix(keyword);
    key.extend_from_slice(doc_id.as_bytes());
    key
}

fn decode_u32(bytes: &[u8]) -> Result<u32, StoreError> {
    let arr: [u8; 4] = bytes.try_into().map_err(|_| corrupt(POSTINGS, "count is not 4 bytes"))?;
    Ok(u32::from_be_bytes(arr))
}

fn decode_u64(bytes: &[u8], tree: &str) -> Result<u64, StoreError> {
    let arr: [u8; 8] = bytes.try_into().map_err(|_| corrupt(tree, "value is not 8 bytes"))?;
    Ok(u64::from_be_bytes(arr))
}

fn corrupt(tree: &str, detail: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt { tree: tree.to_string(), detail: detail.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn doc(id: &str, postings: &[(&str, u32)]) -> IndexedDocument {
        IndexedDocument {
            meta: DocMeta { doc_id: id.into(), url: format!("https://example.org/{id}"), title: id.to_uppercase() },
            postings: postings
                .iter()
                .map(|(k, c)| Posting { keyword: (*k).into(), doc_id: id.into(), count: *c })
                .collect(),
        }
    }

    fn counts(store: &SledStore, keyword: &str) -> Vec<(String, u32)> {
        let mut v: Vec<_> =
            store.postings_for(&[keyword.to_string()]).unwrap().into_iter().map(|p| (p.doc_id, p.count)).collect();
        v.sort();
        v
    }

    #[test]
    fn reading_before_any_commit_is_an_error() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        assert!(matches!(store.postings_for(&["divorce".into()]), Err(StoreError::NoGeneration)));
    }

    #[test]
    fn uncommitted_generation_is_invisible() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        let mut w = store.begin_generation("v1").unwrap();
        w.write_batch(&[doc("d1", &[("divorce", 3)])]).unwrap();
        store.commit(w, 0).unwrap();

        let mut next = store.begin_generation("v1").unwrap();
        next.write_batch(&[doc("d2", &[("divorce", 7)])]).unwrap();
        assert_eq!(counts(&store, "divorce"), vec![("d1".into(), 3)]);

        let manifest = store.commit(next, 1).unwrap();
        assert_eq!(counts(&store, "divorce"), vec![("d2".into(), 7)]);
        assert_eq!(manifest.documents, 1);
        assert_eq!(manifest.rejected, 1);
        assert!(store.metadata_for(&["d1".into()]).unwrap().is_empty());
    }

    #[test]
    fn old_generations_are_dropped_after_two_commits() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        let mut gens = Vec::new();
        for _ in 0..3 {
            let mut w = store.begin_generation("v1").unwrap();
            w.write_batch(&[doc("d1", &[("divorce", 1)])]).unwrap();
            gens.push(w.generation());
            store.commit(w, 0).unwrap();
        }
        let names: Vec<String> =
            store.db.tree_names().iter().filter_map(|n| std::str::from_utf8(n).ok().map(str::to_string)).collect();
        assert!(!names.contains(&tree_name(POSTINGS, gens[0])));
        assert!(names.contains(&tree_name(POSTINGS, gens[1])));
        assert!(names.contains(&tree_name(POSTINGS, gens[2])));
    }

    #[test]
    fn upsert_replaces_document_postings() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        let mut w = store.begin_generation("v1").unwrap();
        w.write_batch(&[doc("d1", &[("divorce", 3), ("custody", 2)])]).unwrap();
        store.commit(w, 0).unwrap();

        let mut w = store.open_current("v1").unwrap();
        w.write_batch(&[doc("d1", &[("divorce", 3), ("custody", 2)])]).unwrap();
        w.write_batch(&[doc("d1", &[("divorce", 4)])]).unwrap();
        let manifest = store.commit(w, 0).unwrap();

        assert_eq!(counts(&store, "divorce"), vec![("d1".into(), 4)]);
        assert!(counts(&store, "custody").is_empty());
        assert_eq!(manifest.postings, 1);
    }

    #[test]
    fn upsert_keeps_keyword_list_postings_and_metadata_in_step() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        let mut w = store.begin_generation("v1").unwrap();
        w.write_batch(&[doc("d1", &[("divorce", 3), ("custody", 2)]), doc("d2", &[("custody", 1)])]).unwrap();
        store.commit(w, 0).unwrap();

        let mut w = store.open_current("v1").unwrap();
        let mut updated = doc("d1", &[("alimony", 5)]);
        updated.meta.title = "Amended".into();
        w.write_batch(&[updated]).unwrap();

        let listed: Vec<String> = bincode::deserialize(&w.doc_keywords.get(b"d1").unwrap().unwrap()).unwrap();
        let mut stored: Vec<String> = w
            .postings
            .iter()
            .keys()
            .map(|k| k.unwrap())
            .filter(|k| k.ends_with(b"\0d1"))
            .map(|k| String::from_utf8(k[..k.len() - 3].to_vec()).unwrap())
            .collect();
        stored.sort();
        assert_eq!(listed, vec!["alimony".to_string()]);
        assert_eq!(stored, listed);

        let meta = store.metadata_for(&["d1".into(), "d2".into()]).unwrap();
        assert_eq!(meta["d1"].title, "Amended");
        assert_eq!(meta["d2"].title, "D2");
        assert_eq!(counts(&store, "custody"), vec![("d2".into(), 1)]);
        assert_eq!(counts(&store, "alimony"), vec![("d1".into(), 5)]);
    }

    #[test]
    fn pinned_view_survives_a_later_commit() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        let mut w = store.begin_generation("v1").unwrap();
        w.write_batch(&[doc("d1", &[("divorce", 3)])]).unwrap();
        store.commit(w, 0).unwrap();
        let view = store.view().unwrap();

        let mut w = store.begin_generation("v1").unwrap();
        w.write_batch(&[doc("d2", &[("divorce", 7)])]).unwrap();
        store.commit(w, 0).unwrap();

        assert_ne!(view.generation(), store.current_generation().unwrap().unwrap());
        assert_eq!(view.postings_for(&["divorce".into()]).unwrap()[0].doc_id, "d1");
        assert_eq!(view.metadata_for(&["d1".into()]).unwrap()["d1"].title, "D1");
        assert_eq!(counts(&store, "divorce"), vec![("d2".into(), 7)]);
    }

    #[test]
    fn upsert_with_other_stopwords_is_refused() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        let w = store.begin_generation("v1").unwrap();
        store.commit(w, 0).unwrap();
        assert!(matches!(store.open_current("v2"), Err(StoreError::StopwordMismatch { .. })));
    }

    #[test]
    fn keyword_prefixes_do_not_collide() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        let mut w = store.begin_generation("v1").unwrap();
        w.write_batch(&[doc("d1", &[("child", 1), ("child custody", 2)])]).unwrap();
        store.commit(w, 0).unwrap();
        assert_eq!(counts(&store, "child"), vec![("d1".into(), 1)]);
        assert_eq!(counts(&store, "child custody"), vec![("d1".into(), 2)]);
    }

    #[test]
    fn reopened_store_keeps_live_generation() {
        let dir = tempdir().unwrap();
        {
            let store = SledStore::open(dir.path()).unwrap();
            let mut w = store.begin_generation("v1").unwrap();
            w.write_batch(&[doc("d1", &[("divorce", 3)])]).unwrap();
            store.commit(w, 0).unwrap();
        }
        let store = SledStore::open(dir.path()).unwrap();
        assert_eq!(store.manifest().unwrap().unwrap().stopwords_version, "v1");
        let meta = store.metadata_for(&["d1".into()]).unwrap();
        assert_eq!(meta["d1"].title, "D1");
    }
}
