//! Audio output using cpal
//!
//! Opens a host output device and drives the ring's consumer from the cpal
//! callback. The ring holds unsigned 8-bit mono. Each byte is converted to
//! the device's native sample type and copied to every channel.
//!
//! The stream is built once, paused. Starting playback restarts the ring
//! and resumes the stream; stopping pauses it again. Device setup
//! failures are returned to the caller, which carries on without sound.

use crate::error::{Error, Result};
use crate::sound::monitor::CallbackMonitor;
use crate::sound::ring::{RingHandle, SoundConsumer};
use crate::sound::PlaybackControl;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig,
    SupportedBufferSize,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Scratch size in frames when the device does not report its buffer size
const SCRATCH_FRAMES: usize = 4096;

/// Upper bound on scratch frames; larger callbacks are filled in chunks
const MAX_SCRATCH_FRAMES: usize = 1 << 16;

/// cpal output stream fed from the sound ring.
pub struct SoundOutput {
    stream: Stream,
    ring: RingHandle,
    playing: bool,
    device_name: String,
    config: StreamConfig,
    sample_format: SampleFormat,
    /// Set by the stream error callback
    error_flag: Arc<AtomicBool>,
    error_count: Arc<AtomicU32>,
}

impl SoundOutput {
    /// List available audio output devices.
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();

        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// Open an output device and build a paused stream around `consumer`.
    ///
    /// # Errors
    /// - No device available (requested name falls back to the default)
    /// - No supported configuration covers `sample_rate`
    /// - Stream construction fails
    pub fn open(
        device_name: Option<&str>,
        sample_rate: u32,
        consumer: SoundConsumer,
        ring: RingHandle,
        monitor: Option<Arc<CallbackMonitor>>,
    ) -> Result<Self> {
        let host = cpal::default_host();
        let device = Self::find_device(&host, device_name)?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let (config, sample_format, supported_buffer) = Self::pick_config(&device, sample_rate)?;
        let scratch_frames = scratch_frames(&config.buffer_size, &supported_buffer);
        debug!(
            "Audio config: sample_rate={}, channels={}, format={:?}, scratch={} frames",
            config.sample_rate.0, config.channels, sample_format, scratch_frames
        );

        let error_flag = Arc::new(AtomicBool::new(false));
        let error_count = Arc::new(AtomicU32::new(0));
        let silence = ring.config().silence;
        let feed = StreamFeed {
            consumer,
            silence,
            scratch_frames,
            monitor,
            error_flag: Arc::clone(&error_flag),
            error_count: Arc::clone(&error_count),
        };

        let stream = match sample_format {
            SampleFormat::F32 => Self::build_stream::<f32>(&device, &config, feed)?,
            SampleFormat::I16 => Self::build_stream::<i16>(&device, &config, feed)?,
            SampleFormat::U16 => Self::build_stream::<u16>(&device, &config, feed)?,
            SampleFormat::U8 => Self::build_stream::<u8>(&device, &config, feed)?,
            SampleFormat::I32 => Self::build_stream::<i32>(&device, &config, feed)?,
            other => {
                return Err(Error::AudioOutput(format!(
                    "Unsupported sample format: {:?}",
                    other
                )));
            }
        };

        // Some backends start playing on build
        if let Err(e) = stream.pause() {
            debug!("Pausing freshly built stream failed: {}", e);
        }

        info!("Audio output ready on '{}' at {} Hz", name, config.sample_rate.0);

        Ok(Self {
            stream,
            ring,
            playing: false,
            device_name: name,
            config,
            sample_format,
            error_flag,
            error_count,
        })
    }

    fn find_device(host: &cpal::Host, device_name: Option<&str>) -> Result<Device> {
        if let Some(name) = device_name {
            let mut devices = host
                .output_devices()
                .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?;

            if let Some(device) = devices.find(|d| d.name().ok().as_deref() == Some(name)) {
                info!("Found requested audio device: {}", name);
                return Ok(device);
            }
            warn!("Requested device '{}' not found, falling back to default device", name);
        }

        host.default_output_device()
            .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))
    }

    /// Prefer unsigned 8-bit mono at the exact rate, then any mono format,
    /// then anything that covers the rate.
    fn pick_config(
        device: &Device,
        sample_rate: u32,
    ) -> Result<(StreamConfig, SampleFormat, SupportedBufferSize)> {
        let ranges: Vec<_> = device
            .supported_output_configs()
            .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?
            .filter(|range| {
                range.min_sample_rate().0 <= sample_rate && range.max_sample_rate().0 >= sample_rate
            })
            .collect();

        let rank = |range: &cpal::SupportedStreamConfigRange| {
            let mono = range.channels() == 1;
            let u8_format = range.sample_format() == SampleFormat::U8;
            match (u8_format, mono) {
                (true, true) => 0,
                (false, true) => 1,
                (true, false) => 2,
                (false, false) => 3,
            }
        };

        let best = ranges
            .into_iter()
            .min_by_key(rank)
            .ok_or_else(|| {
                Error::AudioOutput(format!("No output configuration supports {} Hz", sample_rate))
            })?;

        let sample_format = best.sample_format();
        let buffer_size = best.buffer_size().clone();
        let config = best.with_sample_rate(cpal::SampleRate(sample_rate)).config();
        Ok((config, sample_format, buffer_size))
    }

    fn build_stream<T>(device: &Device, config: &StreamConfig, feed: StreamFeed) -> Result<Stream>
    where
        T: SizedSample + FromSample<u8> + Send + 'static,
    {
        let channels = config.channels.max(1) as usize;
        let StreamFeed {
            mut consumer,
            silence,
            scratch_frames,
            monitor,
            error_flag,
            error_count,
        } = feed;
        let mut scratch = vec![silence; scratch_frames];

        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    if let Some(ref mon) = monitor {
                        mon.record_callback();
                    }

                    feed_frames(data, channels, &mut scratch, &mut consumer);
                },
                move |err| {
                    error!("Audio stream error: {}", err);
                    error_flag.store(true, Ordering::SeqCst);
                    error_count.fetch_add(1, Ordering::SeqCst);
                },
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    pub fn sample_format(&self) -> SampleFormat {
        self.sample_format
    }

    /// True if the stream reported an error since opening
    pub fn has_error(&self) -> bool {
        self.error_flag.load(Ordering::SeqCst)
    }

    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::SeqCst)
    }
}

impl PlaybackControl for SoundOutput {
    fn start(&mut self) {
        if self.playing {
            return;
        }
        self.ring.restart();
        match self.stream.play() {
            Ok(()) => {
                self.playing = true;
                info!("Audio stream started");
            }
            Err(e) => warn!("Failed to start audio stream: {}", e),
        }
    }

    fn stop(&mut self) {
        if !self.playing {
            return;
        }
        if let Err(e) = self.stream.pause() {
            warn!("Failed to pause audio stream: {}", e);
        }
        self.playing = false;
        info!("Audio stream stopped");
    }

    fn is_playing(&self) -> bool {
        self.playing
    }
}

/// Everything the callback closure owns
struct StreamFeed {
    consumer: SoundConsumer,
    silence: u8,
    scratch_frames: usize,
    monitor: Option<Arc<CallbackMonitor>>,
    error_flag: Arc<AtomicBool>,
    error_count: Arc<AtomicU32>,
}

/// Frames the callback scratch buffer holds, taken from the buffer size the
/// stream will run with.
fn scratch_frames(buffer_size: &BufferSize, supported: &SupportedBufferSize) -> usize {
    let frames = match (buffer_size, supported) {
        (BufferSize::Fixed(frames), _) => *frames as usize,
        (BufferSize::Default, SupportedBufferSize::Range { max, .. }) => *max as usize,
        (BufferSize::Default, SupportedBufferSize::Unknown) => SCRATCH_FRAMES,
    };
    frames.clamp(1, MAX_SCRATCH_FRAMES)
}

/// Fill an interleaved device buffer from the ring, at most `scratch.len()`
/// frames per ring read. Every channel of a frame gets the same sample.
fn feed_frames<T>(
    data: &mut [T],
    channels: usize,
    scratch: &mut [u8],
    consumer: &mut SoundConsumer,
) where
    T: Sample + FromSample<u8>,
{
    for chunk in data.chunks_mut(scratch.len() * channels) {
        let frames = chunk.len().div_ceil(channels);
        let bytes = &mut scratch[..frames];
        consumer.fill(bytes);
        for (frame, &byte) in chunk.chunks_mut(channels).zip(bytes.iter()) {
            frame.fill(T::from_sample(byte));
        }
    }
}
