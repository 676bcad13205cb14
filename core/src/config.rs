//! Defaults shared by the indexer, the stores and the CLI.

/// Documents processed per parallel batch and flushed per writer call.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Single-word keywords must be longer than this many characters.
pub const MIN_UNIGRAM_LEN: usize = 2;

/// Two-word phrases shorter than this (including the separating space) are dropped.
pub const MIN_BIGRAM_LEN: usize = 4;

/// Three-word phrases shorter than this (including separators) are dropped.
pub const MIN_TRIGRAM_LEN: usize = 6;

/// Longest phrase, in words, emitted as a keyword.
pub const MAX_NGRAM: usize = 3;

/// Result limit used by the CLI when none is given.
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Default location of the on-disk store.
pub const DEFAULT_STORE_DIR: &str = "./index";

/// How many offending doc_ids a consistency warning lists.
pub const INTEGRITY_SAMPLE: usize = 5;
