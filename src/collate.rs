//! Batch collation — variable-length samples into fixed-shape padded arrays.
//!
//! Padded dimensions are the batch's own maxima, not corpus-global ones, so
//! a batch of short utterances allocates less than a batch of long ones. ID
//! and duration arrays fill with zero, which is the `<pad>` ID by vocabulary
//! convention; feature arrays fill with zero as well. The per-sample true
//! lengths ride along so the consumer can build validity masks
//! (`position < length`) — the collator itself builds none.
//!
//! Sample order in equals sample order out. Sorting, shuffling, and
//! language re-weighting belong to whatever sampler feeds this function.

use anyhow::{bail, Result};
use ndarray::{s, Array1, Array2, Array3};

use crate::assemble::Sample;

/// One training step's worth of padded, maskable data.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// `[B, max_phoneme_len]`, zero (`<pad>`) beyond each row's true length.
    pub phoneme_ids: Array2<i64>,
    /// `[B, max_phoneme_len]`, rows sum to the sample's reconciled length.
    pub durations: Array2<i64>,
    pub speaker_ids: Array1<i64>,
    pub language_ids: Array1<i64>,
    /// `[B, channels, max_mel_len]`.
    pub mels: Array3<f32>,
    /// `[B, max_mel_len]`.
    pub pitches: Array2<f32>,
    /// `[B, max_mel_len]`.
    pub energies: Array2<f32>,
    /// True (pre-padding) phoneme counts, one per sample, input order.
    pub phoneme_lengths: Vec<usize>,
    /// True (pre-padding) mel frame counts, one per sample, input order.
    pub mel_lengths: Vec<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.phoneme_lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phoneme_lengths.is_empty()
    }
}

/// Collate `samples` into one padded [`Batch`], preserving input order.
///
/// Fails on an empty input (a batch has no meaningful shape) and on
/// samples whose mel channel counts disagree (those cannot share one
/// `[B, channels, T]` array and indicate mismatched extractor settings).
pub fn collate(samples: &[Sample]) -> Result<Batch> {
    let Some(first) = samples.first() else {
        bail!("cannot collate an empty batch");
    };

    let channels = first.mel.nrows();
    if let Some(odd) = samples.iter().find(|s| s.mel.nrows() != channels) {
        bail!(
            "mel channel count mismatch in batch: {} vs {}",
            channels,
            odd.mel.nrows()
        );
    }

    let batch = samples.len();
    let phoneme_lengths: Vec<usize> = samples.iter().map(|s| s.phoneme_ids.len()).collect();
    let mel_lengths: Vec<usize> = samples.iter().map(Sample::mel_len).collect();
    let max_phoneme_len = phoneme_lengths.iter().copied().max().unwrap_or(0);
    let max_mel_len = mel_lengths.iter().copied().max().unwrap_or(0);

    let mut phoneme_ids = Array2::<i64>::zeros((batch, max_phoneme_len));
    let mut durations = Array2::<i64>::zeros((batch, max_phoneme_len));
    let mut mels = Array3::<f32>::zeros((batch, channels, max_mel_len));
    let mut pitches = Array2::<f32>::zeros((batch, max_mel_len));
    let mut energies = Array2::<f32>::zeros((batch, max_mel_len));

    for (i, sample) in samples.iter().enumerate() {
        let p = phoneme_lengths[i];
        let t = mel_lengths[i];
        phoneme_ids
            .slice_mut(s![i, ..p])
            .assign(&Array1::from_vec(sample.phoneme_ids.clone()));
        durations
            .slice_mut(s![i, ..p])
            .assign(&Array1::from_vec(sample.duration.clone()));
        mels.slice_mut(s![i, .., ..t]).assign(&sample.mel);
        pitches.slice_mut(s![i, ..t]).assign(&sample.pitch);
        energies.slice_mut(s![i, ..t]).assign(&sample.energy);
    }

    Ok(Batch {
        phoneme_ids,
        durations,
        speaker_ids: samples.iter().map(|s| s.speaker_id).collect(),
        language_ids: samples.iter().map(|s| s.language_id).collect(),
        mels,
        pitches,
        energies,
        phoneme_lengths,
        mel_lengths,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::estimate_durations;

    /// A sample with `p` phoneme IDs (valued `fill`), `t` mel frames, and
    /// `channels` mel rows, all features valued `fill`.
    fn sample(p: usize, t: usize, channels: usize, fill: f32) -> Sample {
        Sample {
            phoneme_ids: vec![fill as i64; p],
            speaker_id: 7,
            language_id: 1,
            mel: Array2::from_elem((channels, t), fill),
            pitch: Array1::from_elem(t, fill),
            energy: Array1::from_elem(t, fill),
            duration: estimate_durations(t, p),
        }
    }

    #[test]
    fn test_shapes_use_batch_local_maxima() {
        let samples = vec![sample(4, 10, 3, 1.0), sample(6, 7, 3, 2.0)];
        let batch = collate(&samples).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.phoneme_ids.dim(), (2, 6));
        assert_eq!(batch.durations.dim(), (2, 6));
        assert_eq!(batch.mels.dim(), (2, 3, 10));
        assert_eq!(batch.pitches.dim(), (2, 10));
        assert_eq!(batch.energies.dim(), (2, 10));
        assert_eq!(batch.phoneme_lengths, vec![4, 6]);
        assert_eq!(batch.mel_lengths, vec![10, 7]);
    }

    #[test]
    fn test_padding_beyond_true_length_is_zero() {
        let samples = vec![sample(4, 10, 2, 1.0), sample(6, 7, 2, 2.0)];
        let batch = collate(&samples).unwrap();
        for (i, &p) in batch.phoneme_lengths.iter().enumerate() {
            for pos in p..batch.phoneme_ids.ncols() {
                assert_eq!(batch.phoneme_ids[[i, pos]], 0, "row {i} pos {pos}");
                assert_eq!(batch.durations[[i, pos]], 0, "row {i} pos {pos}");
            }
        }
        for (i, &t) in batch.mel_lengths.iter().enumerate() {
            for pos in t..batch.pitches.ncols() {
                assert_eq!(batch.pitches[[i, pos]], 0.0, "row {i} pos {pos}");
                assert_eq!(batch.energies[[i, pos]], 0.0, "row {i} pos {pos}");
                assert_eq!(batch.mels[[i, 0, pos]], 0.0, "row {i} pos {pos}");
            }
        }
    }

    #[test]
    fn test_real_prefix_copied_in_input_order() {
        let samples = vec![sample(2, 3, 2, 5.0), sample(3, 2, 2, 9.0)];
        let batch = collate(&samples).unwrap();
        assert_eq!(batch.phoneme_ids[[0, 0]], 5);
        assert_eq!(batch.phoneme_ids[[1, 2]], 9);
        assert_eq!(batch.mels[[0, 1, 2]], 5.0);
        assert_eq!(batch.mels[[1, 1, 1]], 9.0);
        assert_eq!(batch.pitches[[1, 0]], 9.0);
        assert_eq!(batch.speaker_ids.to_vec(), vec![7, 7]);
        assert_eq!(batch.language_ids.to_vec(), vec![1, 1]);
    }

    #[test]
    fn test_single_sample_batch() {
        let batch = collate(&[sample(4, 10, 3, 1.0)]).unwrap();
        assert_eq!(batch.phoneme_ids.dim(), (1, 4));
        assert_eq!(batch.mels.dim(), (1, 3, 10));
    }

    #[test]
    fn test_empty_batch_fails() {
        let err = collate(&[]).unwrap_err();
        assert!(err.to_string().contains("empty batch"), "got: {err}");
    }

    #[test]
    fn test_channel_mismatch_fails() {
        let samples = vec![sample(2, 5, 80, 1.0), sample(2, 5, 40, 1.0)];
        let err = collate(&samples).unwrap_err();
        assert!(err.to_string().contains("channel count"), "got: {err}");
    }
}
