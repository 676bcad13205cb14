//! Keyword-set retrieval.
//!
//! Documents are ranked by how many distinct query keywords they contain,
//! then by the summed occurrence counts of those keywords, then by doc_id.
//! Raw counts are summed as stored; there is no length or rarity weighting.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::INTEGRITY_SAMPLE;
use crate::store::{IndexReader, StoreError};
use crate::{DocId, Posting, RankedResult};

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("storage failure during retrieval: {0}")]
    Storage(#[from] StoreError),
    #[error("query deadline passed before {stage} lookup")]
    DeadlineExceeded { stage: &'static str },
}

/// An unordered, de-duplicated set of lowercase keywords with an optional
/// result limit and deadline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    keywords: BTreeSet<String>,
    limit: Option<NonZeroUsize>,
    deadline: Option<Instant>,
}

impl Query {
    /// Keywords are trimmed and lowercased; blank entries are dropped.
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self { keywords, limit: None, deadline: None }
    }

    pub fn with_limit(mut self, limit: NonZeroUsize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn keywords(&self) -> impl Iterator<Item = &str> {
        self.keywords.iter().map(String::as_str)
    }

    pub fn limit(&self) -> Option<NonZeroUsize> {
        self.limit
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    fn check_deadline(&self, stage: &'static str) -> Result<(), RetrievalError> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(RetrievalError::DeadlineExceeded { stage }),
            _ => Ok(()),
        }
    }
}

/// Per-document aggregate before the metadata join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub doc_id: DocId,
    pub matched_keywords: BTreeSet<String>,
    pub total_score: u64,
}

impl Candidate {
    pub fn distinct_matches(&self) -> usize {
        self.matched_keywords.len()
    }
}

/// Relevance order: more distinct matches first, then higher total score,
/// then ascending doc_id.
pub fn compare(a: &Candidate, b: &Candidate) -> Ordering {
    b.distinct_matches()
        .cmp(&a.distinct_matches())
        .then_with(|| b.total_score.cmp(&a.total_score))
        .then_with(|| a.doc_id.cmp(&b.doc_id))
}

/// Group postings by document and sort the groups by relevance.
pub fn rank<I>(postings: I) -> Vec<Candidate>
where
    I: IntoIterator<Item = Posting>,
{
    let mut by_doc: HashMap<DocId, Candidate> = HashMap::new();
    for p in postings {
        let c = by_doc.entry(p.doc_id.clone()).or_insert_with(|| Candidate {
            doc_id: p.doc_id,
            matched_keywords: BTreeSet::new(),
            total_score: 0,
        });
        // A (keyword, doc) pair is unique in the store; guard anyway so a
        // duplicated posting cannot inflate the score.
        if c.matched_keywords.insert(p.keyword) {
            c.total_score += u64::from(p.count);
        }
    }
    let mut ranked: Vec<Candidate> = by_doc.into_values().collect();
    ranked.sort_by(compare);
    ranked
}

pub struct Retriever<R> {
    reader: R,
}

impl<R: IndexReader> Retriever<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    /// Ranked results for `query`. An empty query, or one that matches
    /// nothing, is a successful empty answer. Both lookups read the same
    /// pinned view of the index.
    pub fn search(&self, query: &Query) -> Result<Vec<RankedResult>, RetrievalError> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let keywords: Vec<String> = query.keywords.iter().cloned().collect();

        query.check_deadline("postings")?;
        let view = self.reader.view()?;
        let postings = view.postings_for(&keywords)?;
        let mut ranked = rank(postings.into_iter().filter(|p| query.keywords.contains(&p.keyword)));
        let total_hits = ranked.len();
        if let Some(limit) = query.limit {
            ranked.truncate(limit.get());
        }
        if ranked.is_empty() {
            debug!(keywords = keywords.len(), "no matching postings");
            return Ok(Vec::new());
        }

        query.check_deadline("metadata")?;
        let ids: Vec<String> = ranked.iter().map(|c| c.doc_id.clone()).collect();
        let mut metadata = view.metadata_for(&ids)?;

        let mut missing = Vec::new();
        let mut results = Vec::with_capacity(ranked.len());
        for c in ranked {
            let Some(meta) = metadata.remove(&c.doc_id) else {
                missing.push(c.doc_id);
                continue;
            };
            results.push(RankedResult {
                distinct_matches: c.distinct_matches(),
                total_score: c.total_score,
                matched_keywords: c.matched_keywords.into_iter().collect(),
                doc_id: c.doc_id,
                url: meta.url,
                title: meta.title,
            });
        }
        if !missing.is_empty() {
            let sample: Vec<_> = missing.iter().take(INTEGRITY_SAMPLE).collect();
            warn!(count = missing.len(), ?sample, "postings reference documents without metadata");
        }
        debug!(keywords = keywords.len(), total_hits, returned = results.len(), "query answered");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(keyword: &str, doc_id: &str, count: u32) -> Posting {
        Posting { keyword: keyword.into(), doc_id: doc_id.into(), count }
    }

    #[test]
    fn query_normalizes_keywords() {
        let q = Query::new(["Divorce", " divorce ", "", "Child Custody"]);
        let kws: Vec<_> = q.keywords().collect();
        assert_eq!(kws, vec!["child custody", "divorce"]);
    }

    #[test]
    fn rank_orders_by_matches_then_score_then_id() {
        let ranked = rank(vec![
            p("divorce", "b", 5),
            p("divorce", "a", 5),
            p("custody", "c", 1),
            p("divorce", "c", 1),
            p("divorce", "d", 9),
        ]);
        let ids: Vec<_> = ranked.iter().map(|c| c.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "d", "a", "b"]);
        assert_eq!(ranked[0].total_score, 2);
        assert_eq!(ranked[0].distinct_matches(), 2);
    }

    #[test]
    fn duplicate_postings_do_not_inflate_score() {
        let ranked = rank(vec![p("divorce", "a", 3), p("divorce", "a", 3)]);
        assert_eq!(ranked[0].total_score, 3);
    }

    #[test]
    fn expired_deadline_is_reported() {
        let retriever = Retriever::new(crate::store::Snapshot::new());
        let q = Query::new(["divorce"]).with_deadline(Instant::now() - Duration::from_millis(1));
        assert!(matches!(retriever.search(&q), Err(RetrievalError::DeadlineExceeded { stage: "postings" })));
    }
}
