//! Language-tag segmentation and phoneme-stream normalization.
//!
//! Raw phonemizer output arrives as whitespace-separated symbols with inline
//! language markers, stress marks, and sentence punctuation, e.g.
//! `"(en-us) həlˈoʊ, wˈɜːld!"`. Normalization reduces it to the canonical
//! fully-tagged form the vocabulary understands:
//!
//! 1. split on `(tag)` markers, each tag covering the spans after it;
//! 2. strip stress/diacritic marks and sentence punctuation;
//! 3. strip stray markers embedded inside tokens;
//! 4. stamp every surviving symbol with its resolved tag.
//!
//! The transform is idempotent — canonical output re-normalizes to itself —
//! so a partially processed corpus can be run through the pipeline again
//! without corrupting already-clean sequences.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::vocab::{PhonemeSequence, PhonemeToken};

/// Inline language marker, e.g. `(en-us)`.
static TAG_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\([^)]*\)").unwrap());

/// Stress, length, and aspiration marks carried by phonemizer output.
static STRESS_MARKS: Lazy<Regex> = Lazy::new(|| Regex::new("[ˈˌᵻʌːʰʳ]").unwrap());

/// Sentence punctuation passed through by the phonemizer.
static PUNCTUATION: Lazy<Regex> = Lazy::new(|| Regex::new("[.,;:!?]").unwrap());

// ─────────────────────────────────────────────────────────────────────────────
// Segmentation
// ─────────────────────────────────────────────────────────────────────────────

/// One tagged span of raw text: the marker's tag (parentheses removed), or
/// `None` for a leading span before any marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment<'a> {
    pub tag: Option<&'a str>,
    pub text: &'a str,
}

/// Split `text` on inline `(tag)` markers.
///
/// Each marker's tag covers everything up to the next marker, so a single
/// tag carries forward over any number of code-switched words. A leading
/// span with no preceding marker gets `tag: None`; blank spans between
/// adjacent markers are dropped.
pub fn segment(text: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut tag: Option<&str> = None;
    let mut cursor = 0;
    for marker in TAG_MARKER.find_iter(text) {
        push_span(&mut segments, tag, &text[cursor..marker.start()]);
        tag = Some(text[marker.start() + 1..marker.end() - 1].trim());
        cursor = marker.end();
    }
    push_span(&mut segments, tag, &text[cursor..]);
    segments
}

fn push_span<'a>(out: &mut Vec<Segment<'a>>, tag: Option<&'a str>, text: &'a str) {
    if !text.trim().is_empty() {
        out.push(Segment { tag, text });
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Normalization
// ─────────────────────────────────────────────────────────────────────────────

/// Normalize one span under its resolved tag.
///
/// Strips stress marks and punctuation, removes any markers still embedded
/// in the span (removal happens before whitespace splitting, so a mid-token
/// marker cannot break one symbol into two), then stamps `tag` on every
/// surviving symbol.
pub fn normalize(tag: &str, raw_span: &str) -> PhonemeSequence {
    let cleaned = TAG_MARKER.replace_all(raw_span, "");
    let cleaned = STRESS_MARKS.replace_all(&cleaned, "");
    let cleaned = PUNCTUATION.replace_all(&cleaned, "");
    cleaned
        .split_whitespace()
        .map(|symbol| PhonemeToken::new(tag, symbol))
        .collect()
}

/// Segment `text` and normalize every span in order, resolving untagged
/// spans to `default_tag`.
pub fn normalize_sequence(text: &str, default_tag: &str) -> PhonemeSequence {
    let mut sequence = PhonemeSequence::new();
    for span in segment(text) {
        let tag = span.tag.unwrap_or(default_tag);
        sequence.extend(normalize(tag, span.text));
    }
    sequence
}

/// Canonical string form: serialized tokens joined with single spaces.
///
/// Feeding the result back through [`normalize_sequence`] reproduces the
/// sequence exactly, with any default tag.
pub fn render(sequence: &[PhonemeToken]) -> String {
    sequence
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
