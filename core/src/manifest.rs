use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::store::StoreError;

/// Layout version of the stored index.
pub const FORMAT_VERSION: u32 = 1;

/// Describes one committed index generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub generation: u64,
    pub created_at: String,
    pub stopwords_version: String,
    pub documents: u64,
    pub postings: u64,
    /// Records rejected by the run that last wrote this generation.
    pub rejected: u64,
}

impl Manifest {
    pub fn new(generation: u64, stopwords_version: impl Into<String>) -> Self {
        Self {
            version: FORMAT_VERSION,
            generation,
            created_at: now_rfc3339(),
            stopwords_version: stopwords_version.into(),
            documents: 0,
            postings: 0,
            rejected: 0,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}
