//! Corpus manifest — per-utterance metadata with a fixed, validated schema.
//!
//! The manifest is a CSV file with a named header row, one row per
//! utterance, linking every companion file the assembler needs:
//!
//! ```text
//! audio_filepath,phoneme_filepath,mel_filepath,pitch_filepath,energy_filepath,speaker_id,language
//! wav/En_F_001.wav,phonemes/En_F_001.txt,mel/En_F_001.npy,pitch/En_F_001.npy,energy/En_F_001.npy,En_F,en
//! ```
//!
//! The schema is checked once at load: a missing required column is a
//! structural error naming every absent column at once, not a per-row
//! failure discovered mid-corpus. Extra columns (`transcript`, annotation
//! notes) are tolerated and ignored. Relative file references are resolved
//! against the manifest's own directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Columns every manifest must declare.
pub const REQUIRED_COLUMNS: &[&str] = &[
    "audio_filepath",
    "phoneme_filepath",
    "mel_filepath",
    "pitch_filepath",
    "energy_filepath",
    "speaker_id",
    "language",
];

/// Structural manifest defect. Aborts the load — a corpus with a broken
/// schema cannot be partially processed.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest is missing required column(s): {}", .0.join(", "))]
    MissingColumns(Vec<String>),
}

/// One utterance's metadata row.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ManifestEntry {
    pub audio_filepath: PathBuf,
    pub phoneme_filepath: PathBuf,
    pub mel_filepath: PathBuf,
    pub pitch_filepath: PathBuf,
    pub energy_filepath: PathBuf,
    /// Corpus speaker identifier, e.g. the partition name. Mapped to an
    /// integer ID by the assembler's configuration.
    pub speaker_id: String,
    /// Corpus language identifier. Mapped to an integer ID and a default
    /// phoneme tag by the assembler's configuration.
    pub language: String,
}

/// A loaded, schema-validated manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Load and validate a manifest file. UTF-8 with optional BOM; the
    /// header row is checked against [`REQUIRED_COLUMNS`] before any row is
    /// read, and relative paths are resolved against the manifest's parent
    /// directory.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read manifest: {}", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Self::parse(raw.trim_start_matches('\u{feff}'), base)
            .with_context(|| format!("Invalid manifest: {}", path.display()))
    }

    /// Parse manifest CSV text, resolving relative paths against `base`.
    pub fn parse(csv_text: &str, base: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_reader(csv_text.as_bytes());

        let headers = reader.headers().context("Cannot read manifest header")?;
        let missing: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .filter(|col| !headers.iter().any(|h| h == **col))
            .map(|col| (*col).to_owned())
            .collect();
        if !missing.is_empty() {
            return Err(ManifestError::MissingColumns(missing).into());
        }

        let mut entries = Vec::new();
        for (idx, record) in reader.deserialize::<ManifestEntry>().enumerate() {
            let mut entry: ManifestEntry =
                record.with_context(|| format!("Malformed manifest row {}", idx + 2))?;
            entry.audio_filepath = resolve(base, entry.audio_filepath);
            entry.phoneme_filepath = resolve(base, entry.phoneme_filepath);
            entry.mel_filepath = resolve(base, entry.mel_filepath);
            entry.pitch_filepath = resolve(base, entry.pitch_filepath);
            entry.energy_filepath = resolve(base, entry.energy_filepath);
            entries.push(entry);
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ManifestEntry> {
        self.entries.iter()
    }
}

fn resolve(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "audio_filepath,phoneme_filepath,mel_filepath,\
                          pitch_filepath,energy_filepath,speaker_id,language";

    #[test]
    fn test_parse_minimal_row() {
        let text = format!("{HEADER}\na.wav,a.txt,a_mel.npy,a_p.npy,a_e.npy,En_F,en\n");
        let manifest = Manifest::parse(&text, Path::new("/corpus")).unwrap();
        assert_eq!(manifest.len(), 1);
        let entry = &manifest.entries[0];
        assert_eq!(entry.mel_filepath, Path::new("/corpus/a_mel.npy"));
        assert_eq!(entry.speaker_id, "En_F");
        assert_eq!(entry.language, "en");
    }

    #[test]
    fn test_absolute_paths_kept() {
        let text = format!("{HEADER}\n/abs/a.wav,a.txt,m.npy,p.npy,e.npy,S,en\n");
        let manifest = Manifest::parse(&text, Path::new("/corpus")).unwrap();
        assert_eq!(manifest.entries[0].audio_filepath, Path::new("/abs/a.wav"));
        assert_eq!(manifest.entries[0].phoneme_filepath, Path::new("/corpus/a.txt"));
    }

    #[test]
    fn test_extra_columns_ignored() {
        let text = format!(
            "transcript,{HEADER},notes\nhello,a.wav,a.txt,m.npy,p.npy,e.npy,S,en,ok\n"
        );
        let manifest = Manifest::parse(&text, Path::new("")).unwrap();
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest.entries[0].speaker_id, "S");
    }

    #[test]
    fn test_missing_columns_reported_together() {
        let text = "audio_filepath,speaker_id\na.wav,S\n";
        let err = Manifest::parse(text, Path::new("")).unwrap_err();
        let err = err.downcast::<ManifestError>().unwrap();
        let ManifestError::MissingColumns(missing) = err;
        assert_eq!(
            missing,
            vec![
                "phoneme_filepath",
                "mel_filepath",
                "pitch_filepath",
                "energy_filepath",
                "language",
            ]
        );
    }

    #[test]
    fn test_header_only_is_empty() {
        let manifest = Manifest::parse(&format!("{HEADER}\n"), Path::new("")).unwrap();
        assert!(manifest.is_empty());
    }

    #[test]
    fn test_load_strips_bom_and_resolves_against_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.csv");
        std::fs::write(
            &path,
            format!("\u{feff}{HEADER}\na.wav,a.txt,m.npy,p.npy,e.npy,S,en\n"),
        )
        .unwrap();
        let manifest = Manifest::load(&path).unwrap();
        assert_eq!(manifest.entries[0].pitch_filepath, dir.path().join("p.npy"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Manifest::load(Path::new("/nonexistent/manifest.csv")).unwrap_err();
        assert!(format!("{err:#}").contains("Cannot read"), "got: {err:#}");
    }

    #[test]
    fn test_malformed_row_names_line() {
        let text = format!("{HEADER}\na.wav,a.txt\n");
        let err = Manifest::parse(&text, Path::new("")).unwrap_err();
        assert!(format!("{err:#}").contains("row 2"), "got: {err:#}");
    }
}
