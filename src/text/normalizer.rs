//! Character-level text cleanup.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static EMOJI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"[\x{1F600}-\x{1F64F}\x{1F300}-\x{1F5FF}\x{1F680}-\x{1F6FF}",
        r"\x{1F700}-\x{1F77F}\x{1F780}-\x{1F7FF}\x{1F800}-\x{1F8FF}",
        r"\x{1F900}-\x{1F9FF}\x{1FA00}-\x{1FA6F}\x{1FA70}-\x{1FAFF}",
        r"\x{2600}-\x{26FF}\x{2700}-\x{27BF}\x{1F1E6}-\x{1F1FF}]+",
    ))
    .expect("emoji pattern is valid")
});

static SPACE_BEFORE_PUNCT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r" ([,.!?;:'])").expect("punctuation pattern is valid"));

static REPEATED_QUOTES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""{2,}|'{2,}"#).expect("quote pattern is valid"));

static WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

static TERMINATED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"[.!?;:,'"\u{201C}\u{201D}\u{2018}\u{2019})\]}…。」』】〉》›»]$"#)
        .expect("terminator pattern is valid")
});

const SUBSTITUTIONS: &[(&str, &str)] = &[
    ("–", "-"),
    ("‑", "-"),
    ("—", "-"),
    ("_", " "),
    ("\u{201C}", "\""),
    ("\u{201D}", "\""),
    ("\u{2018}", "'"),
    ("\u{2019}", "'"),
    ("´", "'"),
    ("`", "'"),
    ("[", " "),
    ("]", " "),
    ("|", " "),
    ("/", " "),
    ("#", " "),
    ("→", " "),
    ("←", " "),
];

const DROPPED: &[&str] = &["♥", "☆", "♡", "©", "\\"];

const EXPANSIONS: &[(&str, &str)] = &[
    ("@", " at "),
    ("e.g.,", "for example, "),
    ("i.e.,", "that is, "),
];

/// Normalize one segment of raw text.
///
/// Returns an empty string when nothing speakable remains. The result always
/// ends with punctuation, a quote or a closing bracket otherwise.
pub fn normalize_text(text: &str) -> String {
    let decomposed: String = text.nfkd().collect();
    let mut text = EMOJI.replace_all(&decomposed, "").into_owned();

    for (from, to) in SUBSTITUTIONS {
        text = text.replace(from, to);
    }
    for symbol in DROPPED {
        text = text.replace(symbol, "");
    }
    for (from, to) in EXPANSIONS {
        text = text.replace(from, to);
    }

    let text = SPACE_BEFORE_PUNCT.replace_all(&text, "$1");
    let text = REPEATED_QUOTES.replace_all(&text, |caps: &regex::Captures| {
        caps[0][..1].to_string()
    });
    let text = WHITESPACE.replace_all(&text, " ");
    let mut text = text.trim().to_string();

    if !text.is_empty() && !TERMINATED.is_match(&text) {
        text.push('.');
    }
    text
}
