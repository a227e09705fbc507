//! Text front-end: normalization, segmentation and tokenization.
//!
//! Raw request text goes through three pure steps before it reaches the
//! encoder:
//!
//! ```text
//! raw text ──split──▶ segments (≤ 300 chars, 120 for Korean)
//!          ──normalize──▶ NFKD + punctuation/symbol cleanup
//!          ──wrap──▶ "<en>…</en>"
//!          ──index──▶ token ids via unicode_indexer.json
//! ```
//!
//! Only the indexer depends on an asset; everything else is a function of the
//! text and its language. Voice and synthesis parameters never influence the
//! result.

mod indexer;
mod normalizer;
mod segment;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use indexer::UnicodeIndexer;
pub use normalizer::normalize_text;
pub use segment::{split_into_segments, split_sentences};

use crate::{Error, Result};

/// Languages the Supertonic graphs were trained on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Ko,
    Es,
    Pt,
    Fr,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::En,
        Language::Ko,
        Language::Es,
        Language::Pt,
        Language::Fr,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Ko => "ko",
            Language::Es => "es",
            Language::Pt => "pt",
            Language::Fr => "fr",
        }
    }

    /// Longest segment handed to the model in one pass.
    pub fn max_segment_chars(&self) -> usize {
        match self {
            Language::Ko => 120,
            _ => 300,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Language::ALL
            .into_iter()
            .find(|lang| lang.as_str() == s)
            .ok_or_else(|| {
                let available: Vec<&str> = Language::ALL.iter().map(Language::as_str).collect();
                Error::InvalidInput(format!(
                    "invalid language '{s}'. Available: {available:?}"
                ))
            })
    }
}

/// One model pass worth of normalized text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSegment {
    /// Normalized text including the language tags.
    pub text: String,
    /// Token id per character of `text`.
    pub ids: Vec<i64>,
}

impl TextSegment {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Output of [`TextNormalizer::normalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedText {
    pub language: Language,
    pub segments: Vec<TextSegment>,
}

impl NormalizedText {
    pub fn num_tokens(&self) -> usize {
        self.segments.iter().map(TextSegment::len).sum()
    }
}

/// Turns raw request text into model-ready token segments.
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    indexer: Arc<UnicodeIndexer>,
    max_chars: usize,
}

impl TextNormalizer {
    pub fn new(indexer: Arc<UnicodeIndexer>, max_chars: usize) -> Self {
        Self { indexer, max_chars }
    }

    /// Normalize and tokenize `raw` for `language`.
    ///
    /// Fails with [`Error::InvalidInput`] for empty or over-long text, text
    /// that normalizes to nothing, or characters the indexer cannot map.
    pub fn normalize(&self, raw: &str, language: Language) -> Result<NormalizedText> {
        if raw.trim().is_empty() {
            return Err(Error::InvalidInput("'text' must not be empty".into()));
        }
        let num_chars = raw.chars().count();
        if num_chars > self.max_chars {
            return Err(Error::InvalidInput(format!(
                "'text' is {num_chars} characters, maximum is {}",
                self.max_chars
            )));
        }

        let mut segments = Vec::new();
        for chunk in split_into_segments(raw, language.max_segment_chars()) {
            let normalized = normalize_text(&chunk);
            if normalized.is_empty() {
                continue;
            }
            let tagged = format!("<{language}>{normalized}</{language}>");
            let ids = self.indexer.encode(&tagged).map_err(|unsupported| {
                Error::InvalidInput(format!(
                    "unsupported characters for '{language}': {unsupported:?}"
                ))
            })?;
            segments.push(TextSegment { text: tagged, ids });
        }

        if segments.is_empty() {
            return Err(Error::InvalidInput(
                "'text' contains nothing speakable after normalization".into(),
            ));
        }
        Ok(NormalizedText { language, segments })
    }
}
