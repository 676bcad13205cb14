use serde::{Deserialize, Deserializer, Serialize};

/// Externally assigned, stable opinion identifier.
pub type DocId = String;

/// Display metadata for one opinion. Never used for scoring.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DocMeta {
    pub doc_id: DocId,
    pub url: String,
    pub title: String,
}

/// `keyword` occurs `count` times in `doc_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub keyword: String,
    pub doc_id: DocId,
    pub count: u32,
}

/// One record of the opinion export as handed to the indexer.
///
/// Field aliases follow the opinion store's export: `_id` may be a plain
/// string or an `{"$oid": ...}` object, the text lives in `textBlock` and the
/// URL in `link`. Missing or null text fields decode as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
    #[serde(default, alias = "id", alias = "_id", deserialize_with = "de_doc_id")]
    pub doc_id: Option<DocId>,
    #[serde(default, alias = "textBlock", alias = "body", deserialize_with = "de_nullable")]
    pub text: String,
    #[serde(default, alias = "link", deserialize_with = "de_nullable")]
    pub url: String,
    #[serde(default, deserialize_with = "de_nullable")]
    pub title: String,
}

impl SourceDocument {
    pub fn new(doc_id: impl Into<DocId>, text: impl Into<String>) -> Self {
        Self { doc_id: Some(doc_id.into()), text: text.into(), ..Default::default() }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }
}

/// Indexer output for a single document: its metadata and every posting it
/// contributes, sorted by keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedDocument {
    pub meta: DocMeta,
    pub postings: Vec<Posting>,
}

/// One entry of a ranked result list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedResult {
    pub doc_id: DocId,
    pub url: String,
    pub title: String,
    pub distinct_matches: usize,
    pub total_score: u64,
    pub matched_keywords: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDocId {
    Text(String),
    Number(i64),
    Oid {
        #[serde(rename = "$oid")]
        oid: String,
    },
}

fn de_doc_id<'de, D: Deserializer<'de>>(de: D) -> Result<Option<DocId>, D::Error> {
    let raw = Option::<RawDocId>::deserialize(de)?;
    let id = match raw {
        Some(RawDocId::Text(s)) | Some(RawDocId::Oid { oid: s }) => s.trim().to_string(),
        Some(RawDocId::Number(n)) => n.to_string(),
        None => return Ok(None),
    };
    Ok(if id.is_empty() { None } else { Some(id) })
}

fn de_nullable<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(de)?.unwrap_or_default())
}
