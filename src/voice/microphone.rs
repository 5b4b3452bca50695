//! Microphone block source backed by cpal

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TrySendError, sync_channel};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};

use super::block::{AudioBlock, BlockReader, StreamFormat};
use crate::config::AudioConfig;
use crate::{Error, Result};

/// Callback buffers queued before input counts as overflowing
const QUEUE_DEPTH: usize = 256;

/// How long a read may wait before the device is considered stalled
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Captures PCM16 blocks from an input device
///
/// The stream runs from construction until drop. Create and use it on the same thread.
pub struct Microphone {
    _stream: Stream,
    receiver: Receiver<Vec<i16>>,
    pending: Vec<i16>,
    overflow: Arc<AtomicBool>,
    format: StreamFormat,
}

impl Microphone {
    /// Open the configured (or default) input device and start streaming
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened at the requested format
    pub fn open(config: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();
        let device = find_device(&host, config.input_device.as_deref())?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == config.channels
                    && c.min_sample_rate() <= SampleRate(config.sample_rate)
                    && c.max_sample_rate() >= SampleRate(config.sample_rate)
            })
            .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

        let stream_config: StreamConfig = supported_config
            .with_sample_rate(SampleRate(config.sample_rate))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate,
            channels = stream_config.channels,
            block_frames = config.block_frames,
            "audio capture initialized"
        );

        let (sender, receiver) = sync_channel(QUEUE_DEPTH);
        let overflow = Arc::new(AtomicBool::new(false));
        let stream = build_stream(&device, &stream_config, sender, Arc::clone(&overflow))?;
        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        tracing::debug!("audio capture started");

        Ok(Self {
            _stream: stream,
            receiver,
            pending: Vec::new(),
            overflow,
            format: StreamFormat {
                sample_rate: config.sample_rate,
                channels: config.channels,
                block_frames: config.block_frames,
            },
        })
    }
}

fn find_device(host: &cpal::Host, name: Option<&str>) -> Result<Device> {
    let Some(name) = name else {
        return host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()));
    };

    host.input_devices()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|d| d.name().is_ok_and(|n| n == name))
        .ok_or_else(|| Error::Audio(format!("input device not found: {name}")))
}

fn build_stream(
    device: &Device,
    config: &StreamConfig,
    sender: SyncSender<Vec<i16>>,
    overflow: Arc<AtomicBool>,
) -> Result<Stream> {
    device
        .build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                #[allow(clippy::cast_possible_truncation)]
                let samples: Vec<i16> = data
                    .iter()
                    .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16)
                    .collect();
                match sender.try_send(samples) {
                    Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                    Err(TrySendError::Full(_)) => overflow.store(true, Ordering::Relaxed),
                }
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))
}

impl BlockReader for Microphone {
    fn read_block(&mut self) -> Result<AudioBlock> {
        let wanted = self.format.block_frames * usize::from(self.format.channels);
        while self.pending.len() < wanted {
            match self.receiver.recv_timeout(STALL_TIMEOUT) {
                Ok(samples) => self.pending.extend(samples),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(Error::Audio("input stream stalled".to_string()));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::Audio("input stream closed".to_string()));
                }
            }
        }

        let rest = self.pending.split_off(wanted);
        let samples = std::mem::replace(&mut self.pending, rest);
        let overflowed = self.overflow.swap(false, Ordering::Relaxed);
        Ok(AudioBlock::new(samples, self.format).with_overflow(overflowed))
    }

    fn format(&self) -> StreamFormat {
        self.format
    }
}

impl Drop for Microphone {
    fn drop(&mut self) {
        tracing::debug!("audio capture stopped");
    }
}
