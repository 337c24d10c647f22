//! Per-utterance sample assembly.
//!
//! One manifest entry in, one [`Sample`] out: the phoneme file is
//! normalized and encoded (`<s>`/`</s>` wrapped), the mel/pitch/energy
//! companions are loaded and truncated to their common time length, and a
//! uniform duration estimate distributes the mel frames over the phonemes.
//!
//! Companion-file failures degrade per stream rather than killing a batch:
//!
//! | Missing/unreadable   | Policy                                          |
//! |----------------------|-------------------------------------------------|
//! | phoneme text         | empty sequence → encodes to `[<s>, </s>]`       |
//! | pitch or energy      | single-element placeholder of ones              |
//! | mel                  | per-sample error — mel is the alignment anchor  |
//! | speaker/language map | per-sample error — IDs cannot be fabricated     |
//!
//! Every degraded stream is counted in [`AssemblerStats`] and logged, so a
//! partially prepared corpus shows up in aggregate instead of silently
//! diluting the training signal.

use std::{
    collections::HashMap,
    path::Path,
    sync::atomic::{AtomicUsize, Ordering},
};

use anyhow::{bail, Context, Result};
use ndarray::{s, Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    manifest::ManifestEntry,
    normalize::normalize_sequence,
    npy::{load_npy_1d, load_npy_2d},
    vocab::{PhonemeToken, PhonemeVocabulary},
};

// ─────────────────────────────────────────────────────────────────────────────
// Sample
// ─────────────────────────────────────────────────────────────────────────────

/// One training unit. After assembly `pitch`, `energy`, and `mel`'s time
/// axis share one length `T`, `duration` sums to exactly `T`, and
/// `duration.len() == phoneme_ids.len()`.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub phoneme_ids: Vec<i64>,
    pub speaker_id: i64,
    pub language_id: i64,
    /// `[channels, T]`.
    pub mel: Array2<f32>,
    pub pitch: Array1<f32>,
    pub energy: Array1<f32>,
    pub duration: Vec<i64>,
}

impl Sample {
    /// Shared time length of the feature streams.
    pub fn mel_len(&self) -> usize {
        self.mel.ncols()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pure per-sample operations
// ─────────────────────────────────────────────────────────────────────────────

/// Encode a token sequence and wrap it in `<s>`/`</s>`. An empty sequence
/// still yields `[<s>, </s>]` — no sample ever carries fewer than two IDs.
pub fn encode_ids(sequence: &[PhonemeToken], vocab: &PhonemeVocabulary) -> Vec<i64> {
    let mut ids = Vec::with_capacity(sequence.len() + 2);
    ids.push(vocab.start_id());
    ids.extend(sequence.iter().map(|token| vocab.encode_token(token)));
    ids.push(vocab.end_id());
    ids
}

/// Truncate the three feature streams to their common minimum time length.
///
/// The extractors window independently and disagree by a frame or two; the
/// shortest stream is authoritative, and truncation (never padding) keeps
/// every retained frame real.
pub fn reconcile_lengths(
    mel: Array2<f32>,
    pitch: Array1<f32>,
    energy: Array1<f32>,
) -> (Array2<f32>, Array1<f32>, Array1<f32>) {
    let t = mel.ncols().min(pitch.len()).min(energy.len());
    (
        mel.slice(s![.., ..t]).to_owned(),
        pitch.slice(s![..t]).to_owned(),
        energy.slice(s![..t]).to_owned(),
    )
}

/// Distribute `t` mel frames over `p` phonemes as evenly as possible:
/// every entry gets `t / p`, the first `t % p` entries one frame more.
/// The result always has length `p` and sums to exactly `t`.
///
/// A uniform speaking-rate stand-in for forced alignment, used when no
/// external alignment exists. Deterministic by construction.
pub fn estimate_durations(t: usize, p: usize) -> Vec<i64> {
    if p == 0 {
        return Vec::new();
    }
    let base = (t / p) as i64;
    let remainder = t % p;
    (0..p)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Init-once assembler configuration; read-only after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblerConfig {
    /// Manifest speaker identifier to integer speaker ID.
    pub speakers: HashMap<String, i64>,
    /// Manifest language identifier to integer language ID.
    pub languages: HashMap<String, i64>,
    /// Manifest language identifier to the default phoneme tag stamped on
    /// untagged spans of that language's phoneme files.
    pub default_tags: HashMap<String, String>,
    /// Tag used when a language has no `default_tags` entry.
    pub fallback_tag: String,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        let default_tags = [("en", "en-us"), ("gu", "gu"), ("bh", "hi"), ("bn", "bn")]
            .into_iter()
            .map(|(lang, tag)| (lang.to_owned(), tag.to_owned()))
            .collect();
        Self {
            speakers: HashMap::new(),
            languages: HashMap::new(),
            default_tags,
            fallback_tag: "en-us".to_owned(),
        }
    }
}

impl AssemblerConfig {
    /// Load from a JSON file; absent fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read assembler config: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid assembler config: {}", path.display()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Assembler
// ─────────────────────────────────────────────────────────────────────────────

/// Running placeholder counts, one per degradable stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AssemblerStats {
    pub missing_phonemes: usize,
    pub missing_pitch: usize,
    pub missing_energy: usize,
}

#[derive(Debug, Default)]
struct Counters {
    missing_phonemes: AtomicUsize,
    missing_pitch: AtomicUsize,
    missing_energy: AtomicUsize,
}

/// Turns manifest entries into [`Sample`]s against one shared vocabulary.
///
/// Safe to call from several batch-producing workers at once; the counters
/// are atomic and the vocabulary is read-only.
pub struct SampleAssembler<'v> {
    config: AssemblerConfig,
    vocab: &'v PhonemeVocabulary,
    counters: Counters,
}

impl<'v> SampleAssembler<'v> {
    pub fn new(config: AssemblerConfig, vocab: &'v PhonemeVocabulary) -> Self {
        Self {
            config,
            vocab,
            counters: Counters::default(),
        }
    }

    /// Assemble one utterance. Errors here are per-sample (unknown
    /// speaker/language, unreadable mel) — the caller counts them and moves
    /// on; nothing in this path aborts a corpus run.
    pub fn assemble(&self, entry: &ManifestEntry) -> Result<Sample> {
        let speaker_id = match self.config.speakers.get(&entry.speaker_id) {
            Some(&id) => id,
            None => bail!("unknown speaker identifier: {:?}", entry.speaker_id),
        };
        let language_id = match self.config.languages.get(&entry.language) {
            Some(&id) => id,
            None => bail!("unknown language identifier: {:?}", entry.language),
        };
        let default_tag = self
            .config
            .default_tags
            .get(&entry.language)
            .unwrap_or(&self.config.fallback_tag);

        let sequence = match std::fs::read_to_string(&entry.phoneme_filepath) {
            Ok(text) => normalize_sequence(&text, default_tag),
            Err(e) => {
                self.counters.missing_phonemes.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "phoneme file unreadable, sample degrades to [<s>, </s>]: {}: {e}",
                    entry.phoneme_filepath.display()
                );
                Vec::new()
            }
        };
        let phoneme_ids = encode_ids(&sequence, self.vocab);

        // Mel anchors alignment; a placeholder here would fabricate the
        // duration targets, so its absence fails the sample.
        let mel = load_npy_2d(&entry.mel_filepath)?;
        let pitch = self.load_contour(&entry.pitch_filepath, &self.counters.missing_pitch);
        let energy = self.load_contour(&entry.energy_filepath, &self.counters.missing_energy);

        let (mel, pitch, energy) = reconcile_lengths(mel, pitch, energy);
        let duration = estimate_durations(mel.ncols(), phoneme_ids.len());

        Ok(Sample {
            phoneme_ids,
            speaker_id,
            language_id,
            mel,
            pitch,
            energy,
            duration,
        })
    }

    /// Pitch/energy loader with the ones(1) placeholder fallback.
    fn load_contour(&self, path: &Path, counter: &AtomicUsize) -> Array1<f32> {
        match load_npy_1d(path) {
            Ok(contour) => contour,
            Err(e) => {
                counter.fetch_add(1, Ordering::Relaxed);
                warn!("contour unreadable, using ones(1) placeholder: {e:#}");
                Array1::ones(1)
            }
        }
    }

    /// Snapshot of the placeholder counters.
    pub fn stats(&self) -> AssemblerStats {
        AssemblerStats {
            missing_phonemes: self.counters.missing_phonemes.load(Ordering::Relaxed),
            missing_pitch: self.counters.missing_pitch.load(Ordering::Relaxed),
            missing_energy: self.counters.missing_energy.load(Ordering::Relaxed),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        npy::{write_npy_1d, write_npy_2d},
        vocab::{END, PAD, START, UNK},
    };
    use std::path::PathBuf;

    fn vocab() -> PhonemeVocabulary {
        PhonemeVocabulary::build(vec![
            PAD.to_owned(),
            UNK.to_owned(),
            START.to_owned(),
            END.to_owned(),
            "(en-us) p".to_owned(),
            "(en-us) t".to_owned(),
        ])
        .unwrap()
    }

    #[test]
    fn test_encode_ids_wraps_with_start_end() {
        let vocab = vocab();
        let sequence = vec![PhonemeToken::new("en-us", "p"), PhonemeToken::new("en-us", "t")];
        assert_eq!(encode_ids(&sequence, &vocab), vec![2, 4, 5, 3]);
    }

    #[test]
    fn test_encode_ids_empty_sequence_floor() {
        let vocab = vocab();
        assert_eq!(encode_ids(&[], &vocab), vec![vocab.start_id(), vocab.end_id()]);
    }

    #[test]
    fn test_encode_ids_unknown_maps_to_unk() {
        let vocab = vocab();
        let sequence = vec![PhonemeToken::new("kn", "ɒ")];
        assert_eq!(encode_ids(&sequence, &vocab), vec![2, vocab.unk_id(), 3]);
    }

    #[test]
    fn test_reconcile_truncates_to_common_min() {
        let mel = Array2::zeros((80, 97));
        let pitch = Array1::zeros(100);
        let energy = Array1::zeros(95);
        let (mel, pitch, energy) = reconcile_lengths(mel, pitch, energy);
        assert_eq!(mel.dim(), (80, 95));
        assert_eq!(pitch.len(), 95);
        assert_eq!(energy.len(), 95);
    }

    #[test]
    fn test_reconcile_keeps_prefix_values() {
        let mel = Array2::from_shape_fn((2, 4), |(c, t)| (c * 10 + t) as f32);
        let pitch = Array1::from_vec(vec![1.0, 2.0, 3.0]);
        let energy = Array1::from_vec(vec![9.0, 8.0, 7.0, 6.0]);
        let (mel, pitch, energy) = reconcile_lengths(mel, pitch, energy);
        assert_eq!(mel.row(1).to_vec(), vec![10.0, 11.0, 12.0]);
        assert_eq!(pitch.to_vec(), vec![1.0, 2.0, 3.0]);
        assert_eq!(energy.to_vec(), vec![9.0, 8.0, 7.0]);
    }

    #[test]
    fn test_estimate_durations_remainder_front_loaded() {
        assert_eq!(estimate_durations(10, 3), vec![4, 3, 3]);
    }

    #[test]
    fn test_estimate_durations_sum_and_len() {
        for t in [0usize, 1, 7, 10, 97, 500] {
            for p in [1usize, 2, 3, 11, 96] {
                let durations = estimate_durations(t, p);
                assert_eq!(durations.len(), p, "t={t} p={p}");
                assert_eq!(
                    durations.iter().sum::<i64>(),
                    t as i64,
                    "t={t} p={p}: {durations:?}"
                );
            }
        }
    }

    #[test]
    fn test_estimate_durations_zero_phonemes() {
        assert!(estimate_durations(10, 0).is_empty());
    }

    fn write_entry(dir: &Path, t_mel: usize, t_pitch: usize, t_energy: usize) -> ManifestEntry {
        let entry = ManifestEntry {
            audio_filepath: dir.join("a.wav"),
            phoneme_filepath: dir.join("a.txt"),
            mel_filepath: dir.join("mel.npy"),
            pitch_filepath: dir.join("pitch.npy"),
            energy_filepath: dir.join("energy.npy"),
            speaker_id: "En_F".to_owned(),
            language: "en".to_owned(),
        };
        std::fs::write(&entry.phoneme_filepath, "(en-us) p t").unwrap();
        write_npy_2d(&entry.mel_filepath, &Array2::ones((4, t_mel))).unwrap();
        write_npy_1d(&entry.pitch_filepath, &Array1::ones(t_pitch)).unwrap();
        write_npy_1d(&entry.energy_filepath, &Array1::ones(t_energy)).unwrap();
        entry
    }

    fn config() -> AssemblerConfig {
        AssemblerConfig {
            speakers: [("En_F".to_owned(), 0)].into_iter().collect(),
            languages: [("en".to_owned(), 0)].into_iter().collect(),
            ..AssemblerConfig::default()
        }
    }

    #[test]
    fn test_assemble_full_sample() {
        let dir = tempfile::tempdir().unwrap();
        let entry = write_entry(dir.path(), 10, 12, 11);
        let vocab = vocab();
        let assembler = SampleAssembler::new(config(), &vocab);

        let sample = assembler.assemble(&entry).unwrap();
        assert_eq!(sample.phoneme_ids, vec![2, 4, 5, 3]);
        assert_eq!(sample.speaker_id, 0);
        assert_eq!(sample.language_id, 0);
        assert_eq!(sample.mel.dim(), (4, 10));
        assert_eq!(sample.pitch.len(), 10);
        assert_eq!(sample.energy.len(), 10);
        // T=10 over P=4 phonemes: base 2, remainder 2 front-loaded.
        assert_eq!(sample.duration, vec![3, 3, 2, 2]);
        assert_eq!(sample.duration.iter().sum::<i64>(), 10);
        assert_eq!(assembler.stats(), AssemblerStats::default());
    }

    #[test]
    fn test_assemble_missing_phoneme_file_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let entry = write_entry(dir.path(), 6, 6, 6);
        std::fs::remove_file(&entry.phoneme_filepath).unwrap();
        let vocab = vocab();
        let assembler = SampleAssembler::new(config(), &vocab);

        let sample = assembler.assemble(&entry).unwrap();
        assert_eq!(sample.phoneme_ids, vec![2, 3]);
        assert_eq!(sample.duration, vec![3, 3]);
        assert_eq!(assembler.stats().missing_phonemes, 1);
    }

    #[test]
    fn test_assemble_missing_pitch_uses_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let entry = write_entry(dir.path(), 6, 6, 6);
        std::fs::remove_file(&entry.pitch_filepath).unwrap();
        let vocab = vocab();
        let assembler = SampleAssembler::new(config(), &vocab);

        let sample = assembler.assemble(&entry).unwrap();
        // The ones(1) placeholder drags the reconciled length down to 1.
        assert_eq!(sample.mel_len(), 1);
        assert_eq!(sample.pitch.to_vec(), vec![1.0]);
        assert_eq!(sample.duration.iter().sum::<i64>(), 1);
        assert_eq!(assembler.stats().missing_pitch, 1);
        assert_eq!(assembler.stats().missing_energy, 0);
    }

    #[test]
    fn test_assemble_missing_mel_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let entry = write_entry(dir.path(), 6, 6, 6);
        std::fs::remove_file(&entry.mel_filepath).unwrap();
        let vocab = vocab();
        let assembler = SampleAssembler::new(config(), &vocab);
        assert!(assembler.assemble(&entry).is_err());
    }

    #[test]
    fn test_assemble_unknown_speaker_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut entry = write_entry(dir.path(), 6, 6, 6);
        entry.speaker_id = "Unknown_Speaker".to_owned();
        let vocab = vocab();
        let assembler = SampleAssembler::new(config(), &vocab);
        let err = assembler.assemble(&entry).unwrap_err();
        assert!(err.to_string().contains("unknown speaker"), "got: {err}");
    }

    #[test]
    fn test_assemble_unknown_language_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut entry = write_entry(dir.path(), 6, 6, 6);
        entry.language = "xx".to_owned();
        let vocab = vocab();
        let assembler = SampleAssembler::new(config(), &vocab);
        assert!(assembler.assemble(&entry).is_err());
    }

    #[test]
    fn test_config_from_file_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path: PathBuf = dir.path().join("assembler.json");
        std::fs::write(
            &path,
            r#"{"speakers": {"En_F": 3}, "languages": {"en": 1}}"#,
        )
        .unwrap();
        let config = AssemblerConfig::from_file(&path).unwrap();
        assert_eq!(config.speakers.get("En_F"), Some(&3));
        assert_eq!(config.fallback_tag, "en-us");
        assert_eq!(config.default_tags.get("bh").map(String::as_str), Some("hi"));
    }
}
