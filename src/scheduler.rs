//! Corpus-scale parallel phonemization.
//!
//! Layout contract: a corpus root holds one directory per language/speaker
//! partition; transcripts live under `<partition>/txt/` and phoneme output
//! lands under a sibling `<partition>/phonemes/`, same file names:
//!
//! ```text
//! corpus/
//! ├── En_F/
//! │   ├── txt/        En_F_00001.txt …
//! │   └── phonemes/   En_F_00001.txt …   (written here)
//! └── Gu_M/
//!     └── txt/        …
//! ```
//!
//! Each transcript is one unit of work: decoded through an encoding-fallback
//! ladder, split into fixed-size character chunks, phonemized chunk by chunk
//! with the resolved language tag prefixed to every chunk's output, then
//! concatenated in order and written. A failed chunk contributes an empty
//! result; a failed file is counted, logged, and skipped; the run always
//! completes and reports per-partition success/failure counts.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    phonemize::PhonemizerBackend,
    pool::{MemoryAdaptivePolicy, SizingPolicy, WorkerPool},
};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Init-once scheduler configuration; read-only after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Character budget per phonemizer call.
    pub chunk_chars: usize,
    /// Memory-utilization percentage above which the worker pool is halved.
    pub memory_threshold: f32,
    /// Partition code (lowercased name segment before the first `_`) to
    /// phonemizer language.
    pub languages: HashMap<String, String>,
    /// Language used when a partition code has no mapping.
    pub fallback_language: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let languages = [("en", "en-us"), ("gu", "gu"), ("bh", "hi"), ("bn", "bn")]
            .into_iter()
            .map(|(code, lang)| (code.to_owned(), lang.to_owned()))
            .collect();
        Self {
            chunk_chars: 5000,
            memory_threshold: 75.0,
            languages,
            fallback_language: "en-us".to_owned(),
        }
    }
}

impl SchedulerConfig {
    /// Load from a JSON file; absent fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Cannot read scheduler config: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid scheduler config: {}", path.display()))
    }
}

/// Outcome of one partition's run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionReport {
    pub partition: String,
    /// Phonemizer language derived from the partition name.
    pub language: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Scheduler
// ─────────────────────────────────────────────────────────────────────────────

pub struct PhonemizationScheduler {
    config: SchedulerConfig,
    backend: Arc<dyn PhonemizerBackend>,
    sizing: Box<dyn SizingPolicy>,
}

impl PhonemizationScheduler {
    /// The default sizing policy is memory-adaptive, thresholded by
    /// `config.memory_threshold`.
    pub fn new(config: SchedulerConfig, backend: Arc<dyn PhonemizerBackend>) -> Self {
        let sizing = Box::new(MemoryAdaptivePolicy {
            memory_threshold: config.memory_threshold,
        });
        Self {
            config,
            backend,
            sizing,
        }
    }

    /// Replace the admission policy (tests pin the pool width this way).
    pub fn with_sizing(mut self, sizing: Box<dyn SizingPolicy>) -> Self {
        self.sizing = sizing;
        self
    }

    /// Phonemize every partition under `corpus_root`, one report per
    /// partition in lexicographic partition order. Per-file failures are
    /// counted, never propagated; errors returned here are structural
    /// (unlistable directories, unwritable output).
    pub fn run(&self, corpus_root: &Path) -> Result<Vec<PartitionReport>> {
        let partitions = discover_partitions(corpus_root)?;
        let mut reports = Vec::with_capacity(partitions.len());
        for partition in &partitions {
            reports.push(self.run_partition(partition)?);
        }
        Ok(reports)
    }

    fn run_partition(&self, partition: &PartitionDir) -> Result<PartitionReport> {
        let language = self.partition_language(&partition.name);
        let files = list_transcripts(&partition.txt_dir)?;
        let out_dir = partition.root.join("phonemes");
        fs::create_dir_all(&out_dir)
            .with_context(|| format!("Cannot create output directory: {}", out_dir.display()))?;

        let pool = WorkerPool::sized_by(self.sizing.as_ref(), files.len())?;
        info!(
            "partition {}: {} file(s), language {}, {} worker(s)",
            partition.name,
            files.len(),
            language,
            pool.workers()
        );

        let backend = self.backend.as_ref();
        let chunk_chars = self.config.chunk_chars;
        let total = files.len();
        let results = pool.run(files, |file| {
            process_file(backend, &file, &out_dir, &language, chunk_chars)
        });

        let mut report = PartitionReport {
            partition: partition.name.clone(),
            language,
            total,
            succeeded: 0,
            failed: 0,
        };
        for result in results {
            match result {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!("{:#}", e);
                }
            }
        }
        info!(
            "partition {}: {} succeeded, {} failed",
            report.partition, report.succeeded, report.failed
        );
        Ok(report)
    }

    /// Deterministic name-to-language derivation: the lowercased segment
    /// before the first `_`, sent through the configured map.
    fn partition_language(&self, name: &str) -> String {
        let code = name.split('_').next().unwrap_or(name).to_lowercase();
        self.config
            .languages
            .get(&code)
            .cloned()
            .unwrap_or_else(|| self.config.fallback_language.clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Corpus walking
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct PartitionDir {
    name: String,
    root: PathBuf,
    txt_dir: PathBuf,
}

/// Partitions are the immediate subdirectories holding a `txt/` directory,
/// sorted by name.
fn discover_partitions(corpus_root: &Path) -> Result<Vec<PartitionDir>> {
    let entries = fs::read_dir(corpus_root)
        .with_context(|| format!("Cannot list corpus root: {}", corpus_root.display()))?;
    let mut partitions = Vec::new();
    for entry in entries {
        let entry =
            entry.with_context(|| format!("Cannot list corpus root: {}", corpus_root.display()))?;
        let root = entry.path();
        let txt_dir = root.join("txt");
        if !txt_dir.is_dir() {
            continue;
        }
        let name = match root.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_owned(),
            None => continue,
        };
        partitions.push(PartitionDir {
            name,
            root,
            txt_dir,
        });
    }
    partitions.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(partitions)
}

/// Transcript files in lexicographic order, so output assignment is
/// reproducible run to run.
fn list_transcripts(txt_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(txt_dir)
        .with_context(|| format!("Cannot list transcripts: {}", txt_dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry =
            entry.with_context(|| format!("Cannot list transcripts: {}", txt_dir.display()))?;
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-file processing
// ─────────────────────────────────────────────────────────────────────────────

/// One unit of work: decode, chunk, phonemize, write. An error here is
/// isolated to this file.
fn process_file(
    backend: &dyn PhonemizerBackend,
    file: &Path,
    out_dir: &Path,
    language: &str,
    chunk_chars: usize,
) -> Result<()> {
    let bytes =
        fs::read(file).with_context(|| format!("Cannot read transcript: {}", file.display()))?;
    let text = decode_transcript(&bytes).with_context(|| {
        format!(
            "Cannot decode transcript under any candidate encoding: {}",
            file.display()
        )
    })?;

    let mut pieces: Vec<String> = Vec::new();
    for chunk in chunk_text(&text, chunk_chars) {
        match backend.phonemize(chunk, language) {
            Ok(phonemes) => {
                let phonemes = phonemes.trim();
                if !phonemes.is_empty() {
                    pieces.push(format!("({}) {}", language, phonemes));
                }
            }
            Err(e) => {
                // Empty contribution for this chunk; the rest keep their order.
                warn!("chunk failed in {}: {:#}", file.display(), e);
            }
        }
    }

    let name = file
        .file_name()
        .with_context(|| format!("Transcript has no file name: {}", file.display()))?;
    let out_path = out_dir.join(name);
    fs::write(&out_path, pieces.join(" "))
        .with_context(|| format!("Cannot write phoneme file: {}", out_path.display()))?;
    Ok(())
}

/// Split on character count (not bytes), preserving order. `0` disables
/// chunking.
fn chunk_text(text: &str, chunk_chars: usize) -> Vec<&str> {
    if chunk_chars == 0 {
        return if text.is_empty() { vec![] } else { vec![text] };
    }
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (idx, _) in text.char_indices() {
        if count == chunk_chars {
            chunks.push(&text[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        chunks.push(&text[start..]);
    }
    chunks
}

// ─────────────────────────────────────────────────────────────────────────────
// Encoding ladder
// ─────────────────────────────────────────────────────────────────────────────

/// Candidate encodings, in priority order: UTF-8 (with or without BOM), then
/// Latin-1 restricted to printable text. `None` when every candidate rejects
/// the bytes.
fn decode_transcript(bytes: &[u8]) -> Option<String> {
    let stripped = bytes.strip_prefix(b"\xef\xbb\xbf").unwrap_or(bytes);
    if let Ok(text) = std::str::from_utf8(stripped) {
        return Some(text.to_owned());
    }
    decode_latin1_text(bytes)
}

/// Strict Latin-1: control bytes (C0 except tab/newline/CR, DEL, C1) mark
/// the input as binary rather than text, so corrupted files register as
/// undecodable instead of decoding to noise.
fn decode_latin1_text(bytes: &[u8]) -> Option<String> {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        let printable =
            matches!(b, b'\t' | b'\n' | b'\r') || (0x20..=0x7e).contains(&b) || b >= 0xa0;
        if !printable {
            return None;
        }
        out.push(b as char);
    }
    Some(out)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::FixedPolicy;

    /// Deterministic stand-in for espeak: uppercases every word.
    struct MockBackend;

    impl PhonemizerBackend for MockBackend {
        fn phonemize(&self, text: &str, _language: &str) -> Result<String> {
            Ok(text
                .split_whitespace()
                .map(str::to_uppercase)
                .collect::<Vec<_>>()
                .join(" "))
        }
    }

    /// Fails on any chunk containing the word "boom".
    struct FlakyBackend;

    impl PhonemizerBackend for FlakyBackend {
        fn phonemize(&self, text: &str, language: &str) -> Result<String> {
            if text.contains("boom") {
                anyhow::bail!("synthetic chunk failure");
            }
            MockBackend.phonemize(text, language)
        }
    }

    fn scheduler(backend: impl PhonemizerBackend + 'static) -> PhonemizationScheduler {
        PhonemizationScheduler::new(SchedulerConfig::default(), Arc::new(backend))
            .with_sizing(Box::new(FixedPolicy(2)))
    }

    fn write_partition(root: &Path, partition: &str, files: &[(&str, &[u8])]) {
        let txt = root.join(partition).join("txt");
        fs::create_dir_all(&txt).unwrap();
        for (name, content) in files {
            fs::write(txt.join(name), content).unwrap();
        }
    }

    fn read_output(root: &Path, partition: &str, name: &str) -> Vec<u8> {
        fs::read(root.join(partition).join("phonemes").join(name)).unwrap()
    }

    #[test]
    fn test_reports_counts_and_isolates_corrupt_file() {
        let with_bad = tempfile::tempdir().unwrap();
        let without_bad = tempfile::tempdir().unwrap();
        let valid: Vec<(&str, &[u8])> = vec![
            ("En_F_001.txt", b"hello world".as_slice()),
            ("En_F_002.txt", b"second file".as_slice()),
            ("En_F_003.txt", b"third one".as_slice()),
            ("En_F_004.txt", b"fourth one".as_slice()),
        ];
        write_partition(with_bad.path(), "En_F", &valid);
        write_partition(
            with_bad.path(),
            "En_F",
            &[("En_F_000.txt", &[0x93u8, 0x00, 0xff, 0x07, 0x01][..])],
        );
        write_partition(without_bad.path(), "En_F", &valid);

        let sched = scheduler(MockBackend);
        let reports = sched.run(with_bad.path()).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].total, 5);
        assert_eq!(reports[0].succeeded, 4);
        assert_eq!(reports[0].failed, 1);

        let clean_reports = sched.run(without_bad.path()).unwrap();
        assert_eq!(clean_reports[0].succeeded, 4);
        assert_eq!(clean_reports[0].failed, 0);

        // The four valid outputs are byte-identical with and without the
        // corrupted neighbor.
        for (name, _) in &valid {
            assert_eq!(
                read_output(with_bad.path(), "En_F", name),
                read_output(without_bad.path(), "En_F", name),
                "output differs for {name}"
            );
        }
        // The corrupted file produced no output at all.
        assert!(!with_bad
            .path()
            .join("En_F/phonemes/En_F_000.txt")
            .exists());
    }

    #[test]
    fn test_output_is_tag_prefixed() {
        let dir = tempfile::tempdir().unwrap();
        write_partition(dir.path(), "En_F", &[("a.txt", b"hello world".as_slice())]);
        scheduler(MockBackend).run(dir.path()).unwrap();
        let out = String::from_utf8(read_output(dir.path(), "En_F", "a.txt")).unwrap();
        assert_eq!(out, "(en-us) HELLO WORLD");
    }

    #[test]
    fn test_chunking_preserves_order_and_prefixes_each_chunk() {
        let dir = tempfile::tempdir().unwrap();
        write_partition(dir.path(), "En_F", &[("a.txt", b"abc def".as_slice())]);
        let mut config = SchedulerConfig::default();
        config.chunk_chars = 4;
        let sched = PhonemizationScheduler::new(config, Arc::new(MockBackend))
            .with_sizing(Box::new(FixedPolicy(1)));
        sched.run(dir.path()).unwrap();
        let out = String::from_utf8(read_output(dir.path(), "En_F", "a.txt")).unwrap();
        // "abc " then "def" — two chunks, each tagged, original order.
        assert_eq!(out, "(en-us) ABC (en-us) DEF");
    }

    #[test]
    fn test_failed_chunk_contributes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write_partition(dir.path(), "En_F", &[("a.txt", b"aaa boom ccc".as_slice())]);
        let mut config = SchedulerConfig::default();
        config.chunk_chars = 4;
        let sched = PhonemizationScheduler::new(config, Arc::new(FlakyBackend))
            .with_sizing(Box::new(FixedPolicy(1)));
        let reports = sched.run(dir.path()).unwrap();
        // Chunks: "aaa ", "boom", " ccc" — the middle one fails, file still
        // counts as a success with the remaining chunks in order.
        assert_eq!(reports[0].succeeded, 1);
        let out = String::from_utf8(read_output(dir.path(), "En_F", "a.txt")).unwrap();
        assert_eq!(out, "(en-us) AAA (en-us) CCC");
    }

    #[test]
    fn test_partition_language_derivation() {
        let sched = scheduler(MockBackend);
        assert_eq!(sched.partition_language("En_F"), "en-us");
        assert_eq!(sched.partition_language("gu_M"), "gu");
        assert_eq!(sched.partition_language("Bh_M"), "hi");
        assert_eq!(sched.partition_language("Xx_F"), "en-us");
        assert_eq!(sched.partition_language("en"), "en-us");
    }

    #[test]
    fn test_partitions_sorted_and_txt_required() {
        let dir = tempfile::tempdir().unwrap();
        write_partition(dir.path(), "Gu_M", &[("a.txt", b"x".as_slice())]);
        write_partition(dir.path(), "En_F", &[("a.txt", b"x".as_slice())]);
        fs::create_dir_all(dir.path().join("metadata")).unwrap();
        let reports = scheduler(MockBackend).run(dir.path()).unwrap();
        let names: Vec<_> = reports.iter().map(|r| r.partition.as_str()).collect();
        assert_eq!(names, vec!["En_F", "Gu_M"]);
    }

    #[test]
    fn test_empty_corpus_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let reports = scheduler(MockBackend).run(dir.path()).unwrap();
        assert!(reports.is_empty());
    }

    #[test]
    fn test_chunk_text_counts_chars_not_bytes() {
        let chunks = chunk_text("ɖaɳa", 2);
        assert_eq!(chunks, vec!["ɖa", "ɳa"]);
        assert_eq!(chunk_text("abc", 0), vec!["abc"]);
        assert!(chunk_text("", 5).is_empty());
    }

    #[test]
    fn test_decode_ladder() {
        assert_eq!(decode_transcript(b"plain ascii").as_deref(), Some("plain ascii"));
        // BOM is stripped before UTF-8 decoding.
        assert_eq!(
            decode_transcript(b"\xef\xbb\xbfwith bom").as_deref(),
            Some("with bom")
        );
        // Latin-1 text with an accented byte.
        assert_eq!(decode_transcript(b"caf\xe9").as_deref(), Some("café"));
        // Binary garbage fails the whole ladder.
        assert_eq!(decode_transcript(&[0x93, 0x00, 0xff, 0x07]), None);
    }

    #[test]
    fn test_config_from_file_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scheduler.json");
        fs::write(&path, r#"{"chunk_chars": 100, "languages": {"kn": "kn"}}"#).unwrap();
        let config = SchedulerConfig::from_file(&path).unwrap();
        assert_eq!(config.chunk_chars, 100);
        assert_eq!(config.languages.get("kn").map(String::as_str), Some("kn"));
        // Unspecified fields fall back to defaults.
        assert_eq!(config.memory_threshold, 75.0);
        assert_eq!(config.fallback_language, "en-us");
    }
}
