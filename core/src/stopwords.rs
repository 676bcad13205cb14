//! The stopword set applied before keyword generation.
//!
//! A set is an immutable value built once and handed to the
//! [`Indexer`](crate::Indexer). Its `version` is recorded with every stored
//! index generation so that a changed filter can be detected before it mixes
//! with postings produced under another one.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::tokenizer::normalize;

/// Version tag of the built-in set. Bump whenever either list changes.
pub const BUILTIN_VERSION: &str = "legal-en-1";

const ENGLISH: &[&str] = &[
    "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are", "aren", "as", "at",
    "be", "because", "been", "before", "being", "below", "between", "both", "but", "by",
    "can", "cannot", "could", "couldn",
    "did", "didn", "do", "does", "doesn", "doing", "don", "down", "during",
    "each", "few", "for", "from", "further",
    "had", "hadn", "has", "hasn", "have", "haven", "having", "he", "her", "here", "hers", "herself", "him",
    "himself", "his", "how",
    "if", "in", "into", "is", "isn", "it", "its", "itself",
    "let", "ll", "me", "more", "most", "mustn", "my", "myself",
    "no", "nor", "not", "of", "off", "on", "once", "only", "or", "other", "ought", "our", "ours", "ourselves",
    "out", "over", "own",
    "re", "same", "she", "should", "shouldn", "so", "some", "such",
    "than", "that", "the", "their", "theirs", "them", "themselves", "then", "there", "these", "they", "this",
    "those", "through", "to", "too",
    "under", "until", "up", "ve", "very",
    "was", "wasn", "we", "were", "weren", "what", "when", "where", "which", "while", "who", "whom", "why",
    "will", "with", "won", "would", "wouldn",
    "you", "your", "yours", "yourself", "yourselves",
];

/// Terms that occur in nearly every opinion and carry no topical signal.
const LEGAL: &[&str] = &[
    // court roles and parties
    "court", "courts", "judge", "judges", "justice", "justices", "magistrate", "clerk", "counsel", "attorney",
    "attorneys", "appellant", "appellants", "appellee", "appellees", "petitioner", "petitioners",
    "respondent", "respondents", "plaintiff", "plaintiffs", "defendant", "defendants", "party", "parties",
    "honorable", "presiding", "chief", "panel",
    // opinion structure and procedure
    "opinion", "opinions", "majority", "dissent", "dissenting", "concur", "concurring", "concurrence",
    "case", "cases", "appeal", "appeals", "appellate", "trial", "motion", "motions", "order", "orders",
    "ordered", "judgment", "judgments", "affirm", "affirmed", "reverse", "reversed", "remand", "remanded",
    "vacate", "vacated", "denied", "granted", "filed", "hearing", "record", "brief", "briefs", "docket",
    "petition", "review", "proceeding", "proceedings", "cause", "matter", "curiam", "banc", "en", "per",
    "cert", "certiorari", "pursuant", "thereof", "therein", "herein", "hereinafter", "whereas", "shall",
    // citation signals and reporter abbreviations
    "see", "cf", "accord", "contra", "supra", "infra", "id", "ibid", "et", "al", "seq", "eg", "ie", "viz",
    "pp", "ch", "sec", "stat", "ann", "rev", "supp", "app", "dist", "ct", "cir", "fed", "usc", "cfr", "rptr",
    "nw", "ne", "sw", "se", "wl", "lexis", "westlaw",
    // calendar
    "january", "february", "march", "april", "may", "june", "july", "august", "september", "october",
    "november", "december", "jan", "feb", "mar", "apr", "jun", "jul", "aug", "sep", "sept", "oct", "nov",
    "dec", "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday", "day", "days",
    "month", "months", "year", "years", "date", "dated",
    // jurisdictions
    "state", "states", "united", "america", "federal", "commonwealth", "county", "district", "circuit",
    "supreme", "superior", "alabama", "alaska", "arizona", "arkansas", "california", "colorado",
    "connecticut", "delaware", "florida", "georgia", "hawaii", "idaho", "illinois", "indiana", "iowa",
    "kansas", "kentucky", "louisiana", "maine", "maryland", "massachusetts", "michigan", "minnesota",
    "mississippi", "missouri", "montana", "nebraska", "nevada", "hampshire", "jersey", "mexico", "york",
    "carolina", "dakota", "ohio", "oklahoma", "oregon", "pennsylvania", "rhode", "tennessee", "texas",
    "utah", "vermont", "virginia", "washington", "wisconsin", "wyoming", "columbia",
];

#[derive(Debug, Error)]
pub enum StopwordError {
    #[error("failed to read stopword file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("stopword file {0} contains no words")]
    Empty(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopwordSet {
    version: String,
    words: HashSet<String>,
}

impl StopwordSet {
    /// English function words plus the curated legal list.
    pub fn legal() -> Self {
        Self::from_words(BUILTIN_VERSION, ENGLISH.iter().chain(LEGAL.iter()))
    }

    /// English function words only.
    pub fn english() -> Self {
        Self::from_words("en-1", ENGLISH.iter())
    }

    /// A set with no entries; every token is indexed.
    pub fn empty() -> Self {
        Self { version: "none".into(), words: HashSet::new() }
    }

    /// Build a set from arbitrary entries. Each entry is normalized the same
    /// way document text is, so `"Aren't"` contributes `"aren"`.
    pub fn from_words<I, S>(version: impl Into<String>, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = HashSet::new();
        for w in words {
            for token in normalize(w.as_ref()).split(' ').filter(|t| !t.is_empty()) {
                set.insert(token.to_string());
            }
        }
        Self { version: version.into(), words: set }
    }

    /// Load a word list: one entry per line, `#` starts a comment and an
    /// optional `version: <tag>` line names the list. Without a tag the version
    /// is derived from the contents.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, StopwordError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|source| StopwordError::Io { path: path.display().to_string(), source })?;
        let mut version = None;
        let mut entries = Vec::new();
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            if let Some(tag) = line.strip_prefix("version:") {
                version = Some(tag.trim().to_string());
                continue;
            }
            entries.push(line);
        }
        let mut set = Self::from_words("", entries);
        if set.is_empty() {
            return Err(StopwordError::Empty(path.display().to_string()));
        }
        set.version = version.unwrap_or_else(|| set.fingerprint());
        Ok(set)
    }

    /// Union of both sets; the version names both parts.
    pub fn merge(mut self, other: StopwordSet) -> Self {
        self.version = format!("{}+{}", self.version, other.version);
        self.words.extend(other.words);
        self
    }

    pub fn contains(&self, token: &str) -> bool {
        self.words.contains(token)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    // SHA-1 over the sorted, newline-joined entries.
    fn fingerprint(&self) -> String {
        let mut words: Vec<&str> = self.words.iter().map(String::as_str).collect();
        words.sort_unstable();
        let mut hasher = Sha1::new();
        hasher.update(words.join("\n").as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        format!("custom-{}", &digest[..16])
    }
}

impl Default for StopwordSet {
    fn default() -> Self {
        Self::legal()
    }
}
