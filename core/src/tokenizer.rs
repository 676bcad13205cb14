use lazy_static::lazy_static;
use regex::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::config::{MAX_NGRAM, MIN_BIGRAM_LEN, MIN_TRIGRAM_LEN, MIN_UNIGRAM_LEN};
use crate::stopwords::StopwordSet;

/// Element names stripped as markup. Anything else between angle brackets is
/// treated as prose.
const HTML_TAGS: &[&str] = &[
    "a", "abbr", "b", "blockquote", "body", "br", "caption", "center", "cite", "code", "dd", "div", "dl", "dt",
    "em", "font", "h[1-6]", "head", "hr", "html", "i", "img", "li", "link", "meta", "ol", "p", "pre", "s",
    "script", "section", "small", "span", "strike", "strong", "style", "sub", "sup", "table", "tbody", "td",
    "tfoot", "th", "thead", "title", "tr", "u", "ul",
];

lazy_static! {
    static ref HTML_TAG: Regex =
        Regex::new(&format!(r"</?(?:{})(?:\s[^<>]*)?/?>|<![^<>]*>", HTML_TAGS.join("|"))).expect("valid regex");
    static ref HTML_ENTITY: Regex = Regex::new(r"&#?[a-z0-9]+;").expect("valid regex");
    static ref URL: Regex = Regex::new(r"\b(?:https?|www)\S+").expect("valid regex");
}

/// Normalize raw opinion text into space-separated lowercase ASCII words.
///
/// Markup and URLs are removed, accents are folded (NFKD, combining marks
/// dropped), every other non-letter becomes a space and one-letter words are
/// discarded.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let without_tags = HTML_TAG.replace_all(&lowered, " ");
    let without_entities = HTML_ENTITY.replace_all(&without_tags, " ");
    let without_urls = URL.replace_all(&without_entities, " ");
    let letters: String = without_urls
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| c.to_ascii_lowercase())
        .map(|c| if c.is_ascii_lowercase() { c } else { ' ' })
        .collect();
    letters
        .split_whitespace()
        .filter(|w| w.len() >= MIN_UNIGRAM_LEN)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalize and split into word tokens, in document order.
pub fn tokenize(text: &str) -> Vec<String> {
    normalize(text).split(' ').filter(|w| !w.is_empty()).map(str::to_string).collect()
}

/// Tokens with every stopword removed. This stream feeds phrase generation,
/// so phrases never contain a stopword.
pub fn content_tokens(text: &str, stopwords: &StopwordSet) -> Vec<String> {
    tokenize(text).into_iter().filter(|w| !stopwords.contains(w)).collect()
}

/// Unigrams, then bigrams, then trigrams over `tokens`, one entry per
/// occurrence. Phrases failing the length and shape checks are skipped.
pub fn ngrams(tokens: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(tokens.len() * MAX_NGRAM);
    out.extend(tokens.iter().filter(|w| w.len() >= MIN_UNIGRAM_LEN).cloned());
    out.extend(tokens.windows(2).map(|w| w.join(" ")).filter(|k| is_valid_bigram(k)));
    out.extend(tokens.windows(3).map(|w| w.join(" ")).filter(|k| is_valid_trigram(k)));
    out
}

/// Every keyword occurrence in `text` after stopword removal.
pub fn keywords(text: &str, stopwords: &StopwordSet) -> Vec<String> {
    ngrams(&content_tokens(text, stopwords))
}

fn is_valid_bigram(phrase: &str) -> bool {
    phrase.len() >= MIN_BIGRAM_LEN
        && phrase.split(' ').count() == 2
        && phrase.split(' ').all(|w| !w.is_empty())
}

fn is_valid_trigram(phrase: &str) -> bool {
    phrase.len() >= MIN_TRIGRAM_LEN
        && !phrase.contains("  ")
        && phrase.split(' ').count() == 3
        && phrase.split(' ').all(|w| w.len() >= MIN_UNIGRAM_LEN)
}
