//! Energy-based speech segmentation
//!
//! Incoming chunks are classified as speech or silence by the share of
//! 30 ms frames whose RMS clears the energy threshold. Speech is buffered
//! until enough consecutive silent chunks arrive, then handed off as one
//! utterance.

use super::level::calculate_rms;
use crate::config::VadConfig;

/// Segmenter state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmenterState {
    /// Nothing buffered
    #[default]
    Idle,
    /// Last chunk was speech
    Speaking,
    /// Speech buffered, counting silent chunks
    Trailing,
}

/// A completed utterance
#[derive(Debug, Clone)]
pub struct SpeechSegment {
    /// Mono samples
    pub samples: Vec<f32>,
    /// Sample rate of `samples`
    pub sample_rate: u32,
}

impl SpeechSegment {
    /// Segment length in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate.max(1) as f32
    }
}

/// Groups speech chunks into utterances
pub struct SpeechSegmenter {
    config: VadConfig,
    sample_rate: u32,
    buffer: Vec<f32>,
    silence_count: usize,
    state: SegmenterState,
}

impl SpeechSegmenter {
    /// Create a segmenter for audio at `sample_rate`
    #[must_use]
    pub fn new(config: VadConfig, sample_rate: u32) -> Self {
        Self {
            config,
            sample_rate: sample_rate.max(1),
            buffer: Vec::new(),
            silence_count: 0,
            state: SegmenterState::Idle,
        }
    }

    /// Sample rate this segmenter expects
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SegmenterState {
        self.state
    }

    /// Seconds of speech currently buffered
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn buffered_secs(&self) -> f32 {
        self.buffer.len() as f32 / self.sample_rate as f32
    }

    /// Samples per analysis frame
    fn frame_len(&self) -> usize {
        let len = u64::from(self.sample_rate) * u64::from(self.config.frame_ms) / 1000;
        usize::try_from(len).unwrap_or(usize::MAX).max(1)
    }

    /// Check whether a chunk counts as speech
    ///
    /// Chunks shorter than one frame are never speech.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn is_speech(&self, chunk: &[f32]) -> bool {
        let frames = chunk.chunks_exact(self.frame_len());
        let total = frames.len();
        if total == 0 {
            return false;
        }

        let speech = frames
            .filter(|frame| calculate_rms(frame) > self.config.energy_threshold)
            .count();

        speech as f32 / total as f32 > self.config.speech_ratio
    }

    /// Feed a chunk, returning a segment when an utterance completes
    pub fn push(&mut self, chunk: &[f32]) -> Option<SpeechSegment> {
        if self.is_speech(chunk) {
            self.buffer.extend_from_slice(chunk);
            self.silence_count = 0;
            self.state = SegmenterState::Speaking;

            if self.buffered_secs() > self.config.max_segment_secs {
                tracing::debug!(secs = self.buffered_secs(), "segment hit max duration");
                return self.flush();
            }
            return None;
        }

        if self.buffer.is_empty() {
            return None;
        }

        self.silence_count += 1;
        self.state = SegmenterState::Trailing;

        if self.silence_count >= self.config.silence_chunks {
            tracing::debug!(secs = self.buffered_secs(), "segment complete");
            return self.flush();
        }
        None
    }

    /// Emit whatever is buffered
    pub fn flush(&mut self) -> Option<SpeechSegment> {
        self.silence_count = 0;
        self.state = SegmenterState::Idle;

        if self.buffer.is_empty() {
            return None;
        }

        Some(SpeechSegment {
            samples: std::mem::take(&mut self.buffer),
            sample_rate: self.sample_rate,
        })
    }

    /// Discard buffered audio
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.silence_count = 0;
        self.state = SegmenterState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 24000;

    fn loud(len: usize) -> Vec<f32> {
        vec![0.3; len]
    }

    fn quiet(len: usize) -> Vec<f32> {
        vec![0.0; len]
    }

    #[test]
    fn test_silence_never_emits() {
        let mut seg = SpeechSegmenter::new(VadConfig::default(), RATE);
        for _ in 0..50 {
            assert!(seg.push(&quiet(2400)).is_none());
        }
        assert_eq!(seg.state(), SegmenterState::Idle);
    }

    #[test]
    fn test_emits_after_silence_run() {
        let config = VadConfig::default();
        let mut seg = SpeechSegmenter::new(config, RATE);

        assert!(seg.push(&loud(2400)).is_none());
        assert!(seg.push(&loud(2400)).is_none());
        assert_eq!(seg.state(), SegmenterState::Speaking);

        for _ in 0..config.silence_chunks - 1 {
            assert!(seg.push(&quiet(2400)).is_none());
        }
        assert_eq!(seg.state(), SegmenterState::Trailing);

        let segment = seg.push(&quiet(2400)).unwrap();
        assert_eq!(segment.samples.len(), 4800);
        assert_eq!(segment.sample_rate, RATE);
        assert_eq!(seg.state(), SegmenterState::Idle);
    }

    #[test]
    fn test_speech_resets_silence_count() {
        let config = VadConfig::default();
        let mut seg = SpeechSegmenter::new(config, RATE);

        seg.push(&loud(2400));
        for _ in 0..config.silence_chunks - 1 {
            seg.push(&quiet(2400));
        }
        seg.push(&loud(2400));
        for _ in 0..config.silence_chunks - 1 {
            assert!(seg.push(&quiet(2400)).is_none());
        }
        assert_eq!(seg.push(&quiet(2400)).unwrap().samples.len(), 4800);
    }

    #[test]
    fn test_max_duration_forces_emit() {
        let config = VadConfig {
            max_segment_secs: 0.5,
            ..VadConfig::default()
        };
        let mut seg = SpeechSegmenter::new(config, RATE);

        let mut emitted = None;
        for _ in 0..10 {
            if let Some(s) = seg.push(&loud(2400)) {
                emitted = Some(s);
                break;
            }
        }
        let segment = emitted.unwrap();
        assert!(segment.duration_secs() > 0.5);
    }

    #[test]
    fn test_ratio_threshold() {
        let seg = SpeechSegmenter::new(VadConfig::default(), RATE);
        let frame = 720;

        // 1 of 4 frames loud: 25% is not enough
        let mut chunk = loud(frame);
        chunk.extend(quiet(frame * 3));
        assert!(!seg.is_speech(&chunk));

        // 2 of 4 frames loud
        let mut chunk = loud(frame * 2);
        chunk.extend(quiet(frame * 2));
        assert!(seg.is_speech(&chunk));
    }

    #[test]
    fn test_short_chunk_is_not_speech() {
        let seg = SpeechSegmenter::new(VadConfig::default(), RATE);
        assert!(!seg.is_speech(&loud(100)));
    }

    #[test]
    fn test_flush_and_reset() {
        let mut seg = SpeechSegmenter::new(VadConfig::default(), RATE);
        seg.push(&loud(2400));
        assert_eq!(seg.flush().unwrap().samples.len(), 2400);
        assert!(seg.flush().is_none());

        seg.push(&loud(2400));
        seg.reset();
        assert!(seg.flush().is_none());
        assert!(seg.buffered_secs() < f32::EPSILON);
    }
}
