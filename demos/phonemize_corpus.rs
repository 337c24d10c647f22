//! Corpus phonemization demo — walks a corpus root and writes one phoneme
//! file per transcript using the espeak-ng backend.
//!
//! Usage:
//!   cargo run --example phonemize_corpus --features espeak -- --corpus DIR
//!   cargo run --example phonemize_corpus --features espeak -- \
//!       --corpus DIR --config scheduler.json --chunk-chars 2000
//!
//! Layout: each partition under DIR holds transcripts in `txt/`; phoneme
//! output lands in a sibling `phonemes/` directory.
//!
//! Requirements:
//!   - libespeak-ng installed (apt install libespeak-ng-dev / brew install espeak-ng)

use std::{path::Path, sync::Arc};

use mlphon_prep::{
    phonemize::EspeakBackend,
    scheduler::{PhonemizationScheduler, SchedulerConfig},
};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    // ── Parse simple CLI arguments ───────────────────────────────────────────
    let mut args = std::env::args().skip(1);

    let mut corpus = String::new();
    let mut config_path = String::new();
    let mut chunk_chars: Option<usize> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--corpus"      => { if let Some(v) = args.next() { corpus      = v; } }
            "--config"      => { if let Some(v) = args.next() { config_path = v; } }
            "--chunk-chars" => { if let Some(v) = args.next() { chunk_chars = v.parse().ok(); } }
            "--help" => {
                println!(
                    "Usage: phonemize_corpus --corpus DIR \
                     [--config FILE.json] [--chunk-chars N]"
                );
                return Ok(());
            }
            _ => {}
        }
    }
    if corpus.is_empty() {
        anyhow::bail!("--corpus DIR is required (see --help)");
    }

    // ── Configuration ────────────────────────────────────────────────────────
    let mut config = if config_path.is_empty() {
        SchedulerConfig::default()
    } else {
        SchedulerConfig::from_file(Path::new(&config_path))?
    };
    if let Some(n) = chunk_chars {
        config.chunk_chars = n;
    }

    // ── Run ──────────────────────────────────────────────────────────────────
    let backend = Arc::new(EspeakBackend::new()?);
    let scheduler = PhonemizationScheduler::new(config, backend);
    let reports = scheduler.run(Path::new(&corpus))?;

    println!("\n{:<16} {:>8} {:>10} {:>8} {:>8}", "partition", "language", "files", "ok", "failed");
    for report in &reports {
        println!(
            "{:<16} {:>8} {:>10} {:>8} {:>8}",
            report.partition, report.language, report.total, report.succeeded, report.failed
        );
    }

    let failed: usize = reports.iter().map(|r| r.failed).sum();
    if failed > 0 {
        eprintln!("\n{failed} file(s) failed — see the log above.");
    }
    Ok(())
}
