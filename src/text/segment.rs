//! Splitting long text into model-sized segments.
//!
//! Boundaries are tried from coarse to fine: paragraphs, sentences, commas,
//! and finally whitespace. A single word longer than the limit is kept whole.

use once_cell::sync::Lazy;
use regex::Regex;

static PARAGRAPH_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n\s*\n").expect("paragraph pattern is valid"));

static SENTENCE_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]\s+").expect("sentence pattern is valid"));

/// Sentence-final periods after these do not end a sentence.
const ABBREVIATIONS: &[&str] = &[
    "Dr.", "Mr.", "Mrs.", "Ms.", "Prof.", "Sr.", "Jr.", "St.", "Ave.", "Rd.", "Blvd.", "Dept.",
    "Inc.", "Ltd.", "Co.", "Corp.", "etc.", "vs.", "i.e.", "e.g.", "Ph.D.",
];

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Greedy accumulator that emits a segment whenever the next piece would
/// push it past `max_chars`.
struct Packer {
    max_chars: usize,
    current: String,
    segments: Vec<String>,
}

impl Packer {
    fn new(max_chars: usize) -> Self {
        Self {
            max_chars,
            current: String::new(),
            segments: Vec::new(),
        }
    }

    fn add(&mut self, piece: &str, separator: &str) {
        if !self.current.is_empty()
            && char_len(&self.current) + char_len(separator) + char_len(piece) > self.max_chars
        {
            self.flush();
        }
        if !self.current.is_empty() {
            self.current.push_str(separator);
        }
        self.current.push_str(piece);
    }

    fn flush(&mut self) {
        let trimmed = self.current.trim();
        if !trimmed.is_empty() {
            self.segments.push(trimmed.to_string());
        }
        self.current.clear();
    }

    fn add_sentence(&mut self, sentence: &str) {
        if char_len(sentence) <= self.max_chars {
            self.add(sentence, " ");
            return;
        }

        self.flush();
        for part in sentence.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            if char_len(part) <= self.max_chars {
                self.add(part, ", ");
                continue;
            }
            self.flush();
            for word in part.split_whitespace() {
                self.add(word, " ");
            }
            self.flush();
        }
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        self.segments
    }
}

/// Split `text` into segments of at most `max_chars` characters.
///
/// Returns an empty vector for blank input.
pub fn split_into_segments(text: &str, max_chars: usize) -> Vec<String> {
    let mut packer = Packer::new(max_chars.max(1));

    for paragraph in PARAGRAPH_BREAK.split(text.trim()) {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        if char_len(paragraph) <= max_chars {
            packer.flush();
            packer.add(paragraph, " ");
            packer.flush();
            continue;
        }

        for sentence in split_sentences(paragraph) {
            let sentence = sentence.trim();
            if !sentence.is_empty() {
                packer.add_sentence(sentence);
            }
        }
        packer.flush();
    }

    packer.finish()
}

/// Split on `.`, `!` or `?` followed by whitespace, except after a known
/// abbreviation.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut last_end = 0;

    for m in SENTENCE_END.find_iter(text) {
        // the terminator is ASCII, so start + 1 is a char boundary
        let candidate = text[last_end..m.start() + 1].trim();
        if ABBREVIATIONS.iter().any(|abbrev| candidate.ends_with(abbrev)) {
            continue;
        }
        sentences.push(text[last_end..m.end()].to_string());
        last_end = m.end();
    }

    if last_end < text.len() {
        sentences.push(text[last_end..].to_string());
    }
    if sentences.is_empty() {
        sentences.push(text.to_string());
    }
    sentences
}
