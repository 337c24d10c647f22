//! # mlphon-prep
//!
//! Multilingual speech-corpus preparation for acoustic-model training:
//! transcripts become language-tagged phoneme sequences, phoneme sequences
//! become stable integer IDs, and per-utterance features (mel, pitch,
//! energy) become fixed-shape, padded, maskable batches.
//!
//! ## Pipeline
//! 1. **Phonemization** — [`scheduler::PhonemizationScheduler`] walks a
//!    corpus of transcript partitions and drives a [`phonemize::PhonemizerBackend`]
//!    over them in parallel, sized by live memory pressure, one phoneme file
//!    per transcript. Per-file failures are counted, never fatal.
//! 2. **Normalization** — [`normalize::normalize_sequence`] turns raw
//!    phonemizer output (inline `(tag)` markers, stress marks, punctuation)
//!    into canonical fully-tagged tokens. Idempotent, so re-runs are safe.
//! 3. **Vocabulary** — [`vocab::PhonemeVocabulary`] maps tokens to
//!    checkpoint-stable IDs from a closed, append-only inventory;
//!    out-of-inventory tokens map to `<unk>`.
//! 4. **Assembly** — [`assemble::SampleAssembler`] encodes one manifest
//!    entry into a [`assemble::Sample`]: ID sequence wrapped in `<s>`/`</s>`,
//!    mel/pitch/energy truncated to their common length, durations estimated
//!    to sum exactly to the mel length.
//! 5. **Collation** — [`collate::collate`] pads a slice of samples to
//!    batch-local maxima and records true lengths for downstream masking.
//!
//! ## Quick start
//!
//! ```no_run
//! use mlphon_prep::{
//!     assemble::{AssemblerConfig, SampleAssembler},
//!     collate::collate,
//!     manifest::Manifest,
//!     vocab::{fixed_inventory, PhonemeVocabulary},
//! };
//!
//! # fn main() -> anyhow::Result<()> {
//! let vocab = PhonemeVocabulary::build(fixed_inventory())?;
//! let manifest = Manifest::load(std::path::Path::new("corpus/manifest.csv"))?;
//! let config = AssemblerConfig::from_file(std::path::Path::new("corpus/assembler.json"))?;
//! let assembler = SampleAssembler::new(config, &vocab);
//!
//! let samples: Vec<_> = manifest
//!     .iter()
//!     .take(16)
//!     .filter_map(|entry| assembler.assemble(entry).ok())
//!     .collect();
//! let batch = collate(&samples)?;
//! println!("batch of {} — ids {:?}", batch.len(), batch.phoneme_ids.dim());
//! # Ok(())
//! # }
//! ```
//!
//! The espeak-ng phonemizer backend is behind the `espeak` feature; default
//! builds carry no native dependency and run the whole batching half of the
//! pipeline (plus scheduler tests on mock backends) in pure Rust.

pub mod assemble;
pub mod collate;
pub mod manifest;
pub mod normalize;
pub mod npy;
pub mod phonemize;
pub mod pool;
pub mod scheduler;
pub mod vocab;

// ─── Re-exports for convenience ─────────────────────────────────────────────

pub use assemble::{Sample, SampleAssembler};
pub use collate::{collate, Batch};
pub use manifest::Manifest;
pub use scheduler::PhonemizationScheduler;
pub use vocab::PhonemeVocabulary;
