//! Sample rate conversion

use rubato::{FftFixedIn, Resampler};

use super::check_sample_rate;
use crate::{Error, Result};

const CHUNK_SIZE: usize = 1024;
const SUB_CHUNKS: usize = 2;

fn build(from_rate: u32, to_rate: u32) -> Result<FftFixedIn<f64>> {
    check_sample_rate(from_rate)?;
    check_sample_rate(to_rate)?;
    FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, SUB_CHUNKS, 1)
        .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))
}

/// Resample mono audio using rubato
///
/// Output length is `round(len * to_rate / from_rate)`; the resampler's
/// delay is trimmed so output stays aligned with input.
///
/// # Errors
///
/// Returns error if either rate is out of range, or the resampler fails
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    let mut resampler = build(from_rate, to_rate)?;

    let expected =
        (samples.len() as f64 * f64::from(to_rate) / f64::from(from_rate)).round() as usize;
    let delay = resampler.output_delay();

    // Convert to f64
    let input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();

    let mut output: Vec<f64> = Vec::with_capacity(expected + delay + CHUNK_SIZE);
    let mut pos = 0;

    // Feed zero-padded chunks until the delayed tail has been flushed
    while output.len() < delay + expected {
        let mut chunk = vec![0.0f64; CHUNK_SIZE];
        if pos < input.len() {
            let end = (pos + CHUNK_SIZE).min(input.len());
            chunk[..end - pos].copy_from_slice(&input[pos..end]);
        }
        pos += CHUNK_SIZE;

        let result = resampler
            .process(&[chunk], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend_from_slice(&result[0]);
    }

    // Convert back to f32
    Ok(output[delay..delay + expected]
        .iter()
        .map(|&s| s as f32)
        .collect())
}

/// Resampler that carries filter state across consecutive frames
///
/// Input is consumed in fixed chunks, so up to one chunk stays buffered
/// until more audio arrives. The filter delay is dropped from the start of
/// the stream.
pub struct StreamResampler {
    resampler: FftFixedIn<f64>,
    from_rate: u32,
    to_rate: u32,
    pending: Vec<f64>,
    skip: usize,
}

impl StreamResampler {
    /// # Errors
    ///
    /// Returns error if either rate is out of range
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        let resampler = build(from_rate, to_rate)?;
        let skip = resampler.output_delay();
        Ok(Self {
            resampler,
            from_rate,
            to_rate,
            pending: Vec::with_capacity(CHUNK_SIZE * 2),
            skip,
        })
    }

    #[must_use]
    pub const fn from_rate(&self) -> u32 {
        self.from_rate
    }

    #[must_use]
    pub const fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// Feed a frame and return whatever output is ready
    ///
    /// # Errors
    ///
    /// Returns error if the resampler fails
    #[allow(clippy::cast_possible_truncation)]
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        self.pending.extend(samples.iter().map(|&s| f64::from(s)));

        let mut output = Vec::new();
        while self.pending.len() >= CHUNK_SIZE {
            let chunk: Vec<f64> = self.pending.drain(..CHUNK_SIZE).collect();
            let result = self
                .resampler
                .process(&[chunk], None)
                .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;

            let produced = &result[0];
            let skipped = self.skip.min(produced.len());
            self.skip -= skipped;
            output.extend(produced[skipped..].iter().map(|&s| s as f32));
        }
        Ok(output)
    }

    /// Drop buffered audio and filter state
    pub fn reset(&mut self) {
        self.resampler.reset();
        self.pending.clear();
        self.skip = self.resampler.output_delay();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_rate_is_identity() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(&samples, 24000, 24000).unwrap(), samples);
    }

    #[test]
    fn test_output_length_scales() {
        let samples = vec![0.0f32; 4800];
        assert_eq!(resample(&samples, 48000, 24000).unwrap().len(), 2400);
        assert_eq!(resample(&samples, 16000, 24000).unwrap().len(), 7200);
    }

    #[test]
    fn test_preserves_tone_energy() {
        #[allow(clippy::cast_precision_loss)]
        let tone: Vec<f32> = (0..16000)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16000.0).sin() * 0.5)
            .collect();
        let out = resample(&tone, 16000, 24000).unwrap();

        let rms_in = crate::voice::calculate_rms(&tone);
        let rms_out = crate::voice::calculate_rms(&out[1000..out.len() - 1000]);
        assert!((rms_in - rms_out).abs() < 0.05, "{rms_in} vs {rms_out}");
    }

    #[test]
    fn test_rejects_out_of_range_rates() {
        let samples = vec![0.0f32; 16];
        assert!(matches!(
            resample(&samples, 2, 24000),
            Err(Error::UnsupportedFormat(_))
        ));
        assert!(resample(&samples, 24000, 1_000_000).is_err());
        assert!(StreamResampler::new(0, 24000).is_err());
    }

    #[allow(clippy::cast_precision_loss)]
    fn tone(len: usize, rate: f32) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / rate).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_stream_matches_whole_buffer() {
        let input = tone(16000, 16000.0);
        let whole = resample(&input, 16000, 24000).unwrap();

        // Uneven frame sizes, like a browser capture callback
        let mut stream = StreamResampler::new(16000, 24000).unwrap();
        let mut streamed = Vec::new();
        for frame in input.chunks(700) {
            streamed.extend(stream.process(frame).unwrap());
        }

        assert!(streamed.len() <= whole.len());
        assert!(whole.len() - streamed.len() < 3 * CHUNK_SIZE);
        let max_diff = streamed
            .iter()
            .zip(&whole)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        assert!(max_diff < 1e-3, "streamed output diverged by {max_diff}");
    }

    #[test]
    fn test_stream_has_no_frame_seams() {
        let input = tone(9600, 16000.0);
        let mut stream = StreamResampler::new(16000, 24000).unwrap();
        let mut streamed = Vec::new();
        for frame in input.chunks(320) {
            streamed.extend(stream.process(frame).unwrap());
        }

        // A 440Hz tone at 24kHz never jumps more than about 0.06 per sample
        let max_step = streamed
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .fold(0.0f32, f32::max);
        assert!(max_step < 0.1, "discontinuity of {max_step}");
    }

    #[test]
    fn test_stream_reset_discards_pending() {
        let mut stream = StreamResampler::new(48000, 24000).unwrap();
        assert!(stream.process(&[0.5; 100]).unwrap().is_empty());
        stream.reset();
        let out = stream.process(&[0.0; CHUNK_SIZE * 4]).unwrap();
        assert!(out.iter().all(|s| s.abs() < 1e-6));
        assert_eq!(stream.from_rate(), 48000);
        assert_eq!(stream.to_rate(), 24000);
    }
}
