//! Manifest-to-batch demo — assembles the first N manifest entries into
//! samples and collates them into one padded batch, printing the shapes.
//!
//! Usage:
//!   cargo run --example collate_manifest -- --manifest corpus/manifest.csv \
//!       --config corpus/assembler.json
//!   cargo run --example collate_manifest -- --manifest corpus/manifest.csv \
//!       --config corpus/assembler.json --vocab inventory.txt --batch-size 8
//!
//! Without --vocab the built-in curated four-language inventory is used.

use std::path::Path;

use mlphon_prep::{
    assemble::{AssemblerConfig, SampleAssembler},
    collate::collate,
    manifest::Manifest,
    vocab::{fixed_inventory, PhonemeVocabulary},
};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    // ── Parse simple CLI arguments ───────────────────────────────────────────
    let mut args = std::env::args().skip(1);

    let mut manifest_path = String::new();
    let mut config_path = String::new();
    let mut vocab_path = String::new();
    let mut batch_size = 16usize;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--manifest"   => { if let Some(v) = args.next() { manifest_path = v; } }
            "--config"     => { if let Some(v) = args.next() { config_path   = v; } }
            "--vocab"      => { if let Some(v) = args.next() { vocab_path    = v; } }
            "--batch-size" => { if let Some(v) = args.next() { batch_size = v.parse().unwrap_or(16); } }
            "--help" => {
                println!(
                    "Usage: collate_manifest --manifest FILE.csv --config FILE.json \
                     [--vocab FILE.txt] [--batch-size N]"
                );
                return Ok(());
            }
            _ => {}
        }
    }
    if manifest_path.is_empty() || config_path.is_empty() {
        anyhow::bail!("--manifest and --config are required (see --help)");
    }

    // ── Load shared state ────────────────────────────────────────────────────
    let vocab = if vocab_path.is_empty() {
        PhonemeVocabulary::build(fixed_inventory())?
    } else {
        PhonemeVocabulary::from_file(Path::new(&vocab_path))?
    };
    let manifest = Manifest::load(Path::new(&manifest_path))?;
    let config = AssemblerConfig::from_file(Path::new(&config_path))?;
    let assembler = SampleAssembler::new(config, &vocab);

    println!("Vocabulary : {} tokens", vocab.len());
    println!("Manifest   : {} utterance(s)", manifest.len());

    // ── Assemble and collate ─────────────────────────────────────────────────
    let mut samples = Vec::new();
    let mut failed = 0usize;
    for entry in manifest.iter().take(batch_size) {
        match assembler.assemble(entry) {
            Ok(sample) => samples.push(sample),
            Err(e) => {
                eprintln!("skipping sample: {e:#}");
                failed += 1;
            }
        }
    }

    let batch = collate(&samples)?;
    println!("\nBatch of {} sample(s), {} skipped", batch.len(), failed);
    println!("  phoneme_ids : {:?}", batch.phoneme_ids.dim());
    println!("  durations   : {:?}", batch.durations.dim());
    println!("  mels        : {:?}", batch.mels.dim());
    println!("  pitches     : {:?}", batch.pitches.dim());
    println!("  energies    : {:?}", batch.energies.dim());
    println!("  phoneme_lengths : {:?}", batch.phoneme_lengths);
    println!("  mel_lengths     : {:?}", batch.mel_lengths);

    let stats = assembler.stats();
    println!(
        "\nPlaceholders — phonemes: {}, pitch: {}, energy: {}",
        stats.missing_phonemes, stats.missing_pitch, stats.missing_energy
    );
    Ok(())
}
