//! Voice processing module
//!
//! Handles microphone capture, speaker playback, WAV framing, resampling,
//! level metering and speech segmentation. Devices sit behind the
//! [`AudioSource`] and [`AudioSink`] traits so the call and chat cores run
//! without audio hardware.

mod capture;
mod level;
mod playback;
mod resample;
mod vad;
mod wav;

use tokio::sync::mpsc;

use crate::{Error, Result};

pub use capture::{AudioCapture, DEFAULT_FRAME_SIZE};
pub use level::{AudioLevelMeter, MAX_DECIBELS, MIN_DECIBELS, calculate_rms, normalized_level};
pub use playback::AudioPlayback;
pub use resample::{StreamResampler, resample};
pub use vad::{SegmenterState, SpeechSegment, SpeechSegmenter};
pub use wav::{samples_to_wav, samples_to_wav_float, wav_to_samples};

/// Sample rate the model consumes and produces (24kHz)
pub const SAMPLE_RATE: u32 = 24000;

/// Lowest sample rate accepted from clients
pub const MIN_SAMPLE_RATE: u32 = 8_000;

/// Highest sample rate accepted from clients
pub const MAX_SAMPLE_RATE: u32 = 192_000;

/// Reject sample rates outside the supported range
///
/// # Errors
///
/// Returns `Error::UnsupportedFormat` for rates outside
/// [`MIN_SAMPLE_RATE`]..=[`MAX_SAMPLE_RATE`]
pub fn check_sample_rate(rate: u32) -> Result<u32> {
    if (MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&rate) {
        Ok(rate)
    } else {
        Err(Error::UnsupportedFormat(format!(
            "sample rate {rate}Hz outside {MIN_SAMPLE_RATE}..={MAX_SAMPLE_RATE}Hz"
        )))
    }
}

/// A source of captured audio frames
///
/// Device handles are not `Send` on every platform, so sources stay on the
/// task that owns them; frames cross threads through the channel.
pub trait AudioSource {
    /// Start delivering mono frames into `frames`
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened
    fn start(&mut self, frames: mpsc::Sender<Vec<f32>>) -> Result<()>;

    /// Stop delivering frames
    fn stop(&mut self);

    /// Sample rate of delivered frames
    fn sample_rate(&self) -> u32;

    /// Check if currently capturing
    fn is_capturing(&self) -> bool;
}

/// A destination for synthesized speech
pub trait AudioSink: Send + Sync {
    /// Play mono samples, blocking until playback completes
    ///
    /// # Errors
    ///
    /// Returns error if playback fails
    fn play(&self, samples: &[f32], sample_rate: u32) -> Result<()>;

    /// Decode and play a WAV file
    ///
    /// # Errors
    ///
    /// Returns error if decoding or playback fails
    fn play_wav(&self, wav: &[u8]) -> Result<()> {
        let (samples, sample_rate) = wav_to_samples(wav)?;
        self.play(&samples, sample_rate)
    }
}
