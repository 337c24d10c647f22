//! Fixed phoneme vocabulary — language-tagged tokens mapped to stable IDs.
//!
//! The inventory is a closed, ordered list declared once per corpus/model
//! version; a token's position in the list **is** its ID. Training
//! checkpoints embed these IDs, so the list is append-only: adding tokens at
//! the end is safe, inserting or reordering breaks every existing checkpoint.
//!
//! Reserved control tokens (required, conventionally first):
//!
//! | Token   | Conventional ID | Role                      |
//! |---------|-----------------|---------------------------|
//! | `<pad>` | 0               | batch padding fill        |
//! | `<unk>` | 1               | out-of-inventory fallback |
//! | `<s>`   | 2               | sequence start            |
//! | `</s>`  | 3               | sequence end              |
//!
//! Out-of-inventory lookups are not errors: they map to `<unk>` and warn once
//! per distinct token so coverage gaps stay visible without flooding the log.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    path::Path,
    sync::Mutex,
};

use anyhow::{Context, Result};
use tracing::warn;

/// Padding token, fills ID arrays beyond each sample's true length.
pub const PAD: &str = "<pad>";
/// Unknown token, the mapping target for out-of-inventory symbols.
pub const UNK: &str = "<unk>";
/// Sequence-start token.
pub const START: &str = "<s>";
/// Sequence-end token.
pub const END: &str = "</s>";

// ─────────────────────────────────────────────────────────────────────────────
// Tokens
// ─────────────────────────────────────────────────────────────────────────────

/// A language-tagged phoneme symbol, e.g. tag `en-us`, symbol `p`.
///
/// The canonical serialized form is `"(tag) symbol"` — vocabulary lookups,
/// equality, and hashing all go through that form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhonemeToken {
    pub tag: String,
    pub symbol: String,
}

impl PhonemeToken {
    pub fn new(tag: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            symbol: symbol.into(),
        }
    }
}

impl fmt::Display for PhonemeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) {}", self.tag, self.symbol)
    }
}

/// One utterance's phonemes in temporal order.
pub type PhonemeSequence = Vec<PhonemeToken>;

// ─────────────────────────────────────────────────────────────────────────────
// Construction errors
// ─────────────────────────────────────────────────────────────────────────────

/// Structural defects in a declared inventory. These abort construction:
/// a vocabulary without its reserved tokens, or with a shadowed entry,
/// cannot honor the ID contract downstream code depends on.
#[derive(Debug, thiserror::Error)]
pub enum VocabularyError {
    #[error("inventory is missing reserved token '{0}'")]
    MissingReserved(&'static str),
    #[error("inventory declares '{token}' twice (positions {first} and {second})")]
    DuplicateToken {
        token: String,
        first: usize,
        second: usize,
    },
    #[error("inventory is empty")]
    EmptyInventory,
}

// ─────────────────────────────────────────────────────────────────────────────
// Vocabulary
// ─────────────────────────────────────────────────────────────────────────────

/// Total bijection between a declared inventory and IDs `0..len`.
///
/// Immutable after construction; share it behind an `Arc` across workers.
#[derive(Debug)]
pub struct PhonemeVocabulary {
    ids: HashMap<String, i64>,
    tokens: Vec<String>,
    pad_id: i64,
    unk_id: i64,
    start_id: i64,
    end_id: i64,
    /// Unknown tokens already warned about; each distinct token logs once.
    seen_unknown: Mutex<HashSet<String>>,
}

impl PhonemeVocabulary {
    /// Build from an ordered inventory. Position in the list is the ID.
    pub fn build(inventory: Vec<String>) -> Result<Self, VocabularyError> {
        if inventory.is_empty() {
            return Err(VocabularyError::EmptyInventory);
        }

        let mut ids: HashMap<String, i64> = HashMap::with_capacity(inventory.len());
        for (idx, token) in inventory.iter().enumerate() {
            if let Some(&first) = ids.get(token) {
                return Err(VocabularyError::DuplicateToken {
                    token: token.clone(),
                    first: first as usize,
                    second: idx,
                });
            }
            ids.insert(token.clone(), idx as i64);
        }

        let reserved = |name: &'static str| {
            ids.get(name)
                .copied()
                .ok_or(VocabularyError::MissingReserved(name))
        };
        let pad_id = reserved(PAD)?;
        let unk_id = reserved(UNK)?;
        let start_id = reserved(START)?;
        let end_id = reserved(END)?;

        Ok(Self {
            ids,
            tokens: inventory,
            pad_id,
            unk_id,
            start_id,
            end_id,
            seen_unknown: Mutex::new(HashSet::new()),
        })
    }

    /// Read a persisted inventory: one token per line, UTF-8 (BOM tolerated),
    /// blank lines skipped. Line order is ID order and must never change —
    /// append new tokens at the end of the file only.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read vocabulary file: {}", path.display()))?;
        let inventory: Vec<String> = raw
            .trim_start_matches('\u{feff}')
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect();
        Self::build(inventory)
            .with_context(|| format!("Invalid vocabulary file: {}", path.display()))
    }

    /// Map a serialized token to its ID. Unknown tokens map to `<unk>`; the
    /// first lookup of each distinct unknown token logs a warning, repeats
    /// stay silent.
    pub fn encode(&self, token: &str) -> i64 {
        match self.ids.get(token) {
            Some(&id) => id,
            None => {
                let mut seen = self
                    .seen_unknown
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if seen.insert(token.to_owned()) {
                    warn!("unknown phoneme token: {token}");
                }
                self.unk_id
            }
        }
    }

    /// [`encode`](Self::encode) for a typed token.
    pub fn encode_token(&self, token: &PhonemeToken) -> i64 {
        self.encode(&token.to_string())
    }

    /// Inverse lookup. `None` for IDs outside `0..len`.
    pub fn decode(&self, id: i64) -> Option<&str> {
        usize::try_from(id)
            .ok()
            .and_then(|idx| self.tokens.get(idx))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn pad_id(&self) -> i64 {
        self.pad_id
    }

    pub fn unk_id(&self) -> i64 {
        self.unk_id
    }

    pub fn start_id(&self) -> i64 {
        self.start_id
    }

    pub fn end_id(&self) -> i64 {
        self.end_id
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Curated inventory
// ─────────────────────────────────────────────────────────────────────────────

/// The curated four-language inventory (en-us, hi, gu, kn), reserved tokens
/// first. 138 entries. Append-only by policy — see the module docs.
pub fn fixed_inventory() -> Vec<String> {
    const TOKENS: &[&str] = &[
        PAD,
        UNK,
        START,
        END,
        // English (en-us)
        "(en-us) p", "(en-us) b", "(en-us) t", "(en-us) d", "(en-us) k", "(en-us) g",
        "(en-us) f", "(en-us) v", "(en-us) θ", "(en-us) ð", "(en-us) s", "(en-us) z",
        "(en-us) ʃ", "(en-us) ʒ", "(en-us) h", "(en-us) tʃ", "(en-us) dʒ", "(en-us) m",
        "(en-us) n", "(en-us) ŋ", "(en-us) l", "(en-us) r", "(en-us) j", "(en-us) w",
        "(en-us) i", "(en-us) ɪ", "(en-us) e", "(en-us) ɛ", "(en-us) æ", "(en-us) ʌ",
        "(en-us) ɑ", "(en-us) ɒ", "(en-us) ɔ", "(en-us) o", "(en-us) ʊ", "(en-us) u",
        "(en-us) aɪ", "(en-us) aʊ", "(en-us) ɔɪ", "(en-us) eɪ", "(en-us) oʊ",
        // Bhojpuri, transcribed with a Hindi-like inventory (hi)
        "(hi) p", "(hi) b", "(hi) t̪", "(hi) d̪", "(hi) ʈ", "(hi) ɖ", "(hi) k", "(hi) g",
        "(hi) tʃ", "(hi) dʒ", "(hi) f", "(hi) s", "(hi) h", "(hi) m", "(hi) n",
        "(hi) ɳ", "(hi) n̪", "(hi) l", "(hi) r", "(hi) j",
        "(hi) ə", "(hi) a", "(hi) ɪ", "(hi) i", "(hi) ʊ", "(hi) u",
        "(hi) e", "(hi) o", "(hi) ɛ", "(hi) ɔ", "(hi) ɒ",
        // Gujarati (gu)
        "(gu) p", "(gu) b", "(gu) t̪", "(gu) d̪", "(gu) ʈ", "(gu) ɖ", "(gu) k", "(gu) g",
        "(gu) tʃ", "(gu) dʒ", "(gu) f", "(gu) s", "(gu) h", "(gu) m", "(gu) n",
        "(gu) ɳ", "(gu) n̪", "(gu) l", "(gu) r", "(gu) j",
        "(gu) ə", "(gu) a", "(gu) ɪ", "(gu) i", "(gu) ʊ", "(gu) u",
        "(gu) e", "(gu) o", "(gu) ɛ", "(gu) ɔ", "(gu) ɒ",
        // Kannada (kn)
        "(kn) p", "(kn) b", "(kn) t", "(kn) d", "(kn) ʈ", "(kn) ɖ", "(kn) k", "(kn) g",
        "(kn) tʃ", "(kn) dʒ", "(kn) f", "(kn) s", "(kn) h", "(kn) m", "(kn) n",
        "(kn) ɳ", "(kn) n̪", "(kn) l", "(kn) r", "(kn) j",
        "(kn) ə", "(kn) a", "(kn) ɪ", "(kn) i", "(kn) ʊ", "(kn) u",
        "(kn) e", "(kn) o", "(kn) ɛ", "(kn) ɔ", "(kn) ɒ",
    ];
    TOKENS.iter().map(|t| (*t).to_owned()).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Coverage audit
// ─────────────────────────────────────────────────────────────────────────────

/// Distinct serialized tokens across `sequences`, in first-seen order, with
/// occurrence counts. An audit tool for curating inventory additions; it
/// never assigns IDs — the declared inventory stays the source of truth.
pub fn census<'a, I>(sequences: I) -> Vec<(String, usize)>
where
    I: IntoIterator<Item = &'a PhonemeSequence>,
{
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, usize> = HashMap::new();
    for sequence in sequences {
        for token in sequence {
            let key = token.to_string();
            match counts.get_mut(&key) {
                Some(count) => *count += 1,
                None => {
                    counts.insert(key.clone(), 1);
                    order.push(key);
                }
            }
        }
    }
    order
        .into_iter()
        .map(|key| {
            let count = counts.get(&key).copied().unwrap_or(0);
            (key, count)
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
