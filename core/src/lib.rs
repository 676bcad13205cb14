//! Keyword-postings index and relevance retrieval over legal opinions.
//!
//! The [`indexer`] turns opinion text into per-document keyword postings and
//! metadata records; the [`retriever`] ranks documents for a set of query
//! keywords. Storage sits behind the traits in [`store`].

pub mod config;
pub mod index;
pub mod indexer;
pub mod manifest;
pub mod retriever;
pub mod stopwords;
pub mod store;
pub mod tokenizer;

pub use index::{DocId, DocMeta, IndexedDocument, Posting, RankedResult, SourceDocument};
pub use indexer::{IndexError, IndexReport, Indexer};
pub use retriever::{Query, RetrievalError, Retriever};
pub use stopwords::StopwordSet;
pub use store::{IndexReader, IndexWriter, StoreError};
