//! Audio capture from microphone

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::AudioSource;
use crate::{Error, Result};

/// Samples per delivered frame
pub const DEFAULT_FRAME_SIZE: usize = 1024;

/// Captures audio from the default input device
pub struct AudioCapture {
    config: StreamConfig,
    sample_rate: u32,
    frame_size: usize,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Create a new audio capture instance
    ///
    /// Prefers a mono configuration at `sample_rate`; falls back to any
    /// channel count at that rate and downmixes in the callback.
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new(sample_rate: u32, frame_size: usize) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let supports_rate = |c: &cpal::SupportedStreamConfigRange| {
            c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        };

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| c.channels() == 1 && supports_rate(c))
            .or_else(|| {
                device
                    .supported_input_configs()
                    .ok()?
                    .find(|c| supports_rate(c))
            })
            .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(sample_rate))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels = config.channels,
            frame_size,
            "audio capture initialized"
        );

        Ok(Self {
            config,
            sample_rate,
            frame_size: frame_size.max(1),
            stream: None,
        })
    }
}

impl AudioSource for AudioCapture {
    fn start(&mut self, frames: mpsc::Sender<Vec<f32>>) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device".to_string()))?;

        let config = self.config.clone();
        let channels = usize::from(config.channels.max(1));
        let frame_size = self.frame_size;
        let mut pending: Vec<f32> = Vec::with_capacity(frame_size * 2);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if channels == 1 {
                        pending.extend_from_slice(data);
                    } else {
                        #[allow(clippy::cast_precision_loss)]
                        pending.extend(
                            data.chunks(channels)
                                .map(|c| c.iter().sum::<f32>() / c.len() as f32),
                        );
                    }

                    while pending.len() >= frame_size {
                        let frame: Vec<f32> = pending.drain(..frame_size).collect();
                        match frames.try_send(frame) {
                            Ok(()) | Err(TrySendError::Closed(_)) => {}
                            Err(TrySendError::Full(_)) => {
                                tracing::warn!("capture consumer lagging, dropping frame");
                            }
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
