//! Audio device output using cpal.
//!
//! Provides [`CpalBackend`], which opens three kinds of output streams on the
//! default (or a chosen) output device:
//! - the processed graph, at a fixed 48 kHz stereo `f32` configuration
//! - raw playback, at the device's own default configuration
//! - a short, inaudible unlock tone, or an audible one second test tone

use std::sync::Arc;

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, Device, DeviceId, SampleFormat, SizedSample, StreamConfig, SupportedBufferSize,
};
use dasp_sample::{FromSample, Sample};
use tracing::{debug, error, info, warn};

use crate::audio::{CHANNELS, PlayerControls, Renderer, SAMPLE_RATE};
use crate::engine::error::PlayerError;
use crate::io::backend::{AudioBackend, OutputStream};

const TARGET_BUFFER_FRAMES: u32 = 256;

const TONE_HZ: f32 = 440.0;
const UNLOCK_TONE_MS: u32 = 50;
const UNLOCK_LEVEL: f32 = 1e-4;
const TEST_TONE_MS: u32 = 1000;
const TEST_TONE_LEVEL: f32 = 0.2;

fn find_device_by_id<I: Iterator<Item = Device>>(
    devices: I,
    device_id: &DeviceId,
) -> Option<Device> {
    devices
        .filter_map(|d| d.id().ok().map(|id| (d, id)))
        .find(|(_, id)| id == device_id)
        .map(|(d, _)| d)
}

fn get_output_device(device_id: Option<&DeviceId>) -> Result<Device> {
    let host = cpal::default_host();
    match device_id {
        Some(id) => {
            let devices = host
                .output_devices()
                .context("Failed to enumerate output devices")?;
            find_device_by_id(devices, id).context("Output device not found")
        }
        None => host
            .default_output_device()
            .context("No default output device available"),
    }
}

fn buffer_size(supported: &SupportedBufferSize) -> BufferSize {
    match supported {
        SupportedBufferSize::Range { min, max } => {
            let size = TARGET_BUFFER_FRAMES.clamp(*min, *max);
            debug!(
                "Using output buffer size: {} (min={}, max={})",
                size, min, max
            );
            BufferSize::Fixed(size)
        }
        SupportedBufferSize::Unknown => {
            warn!("Supported buffer size range unknown, using default");
            BufferSize::Default
        }
    }
}

fn build_stream<S, F>(device: &Device, config: &StreamConfig, mut fill: F) -> Result<cpal::Stream>
where
    S: SizedSample + Send + 'static,
    F: FnMut(&mut [S]) + Send + 'static,
{
    let stream = device.build_output_stream(
        config,
        move |data: &mut [S], _: &cpal::OutputCallbackInfo| fill(data),
        |err| error!("An error occurred on the output audio stream: {}", err),
        None,
    )?;
    Ok(stream)
}

/// Builds a stream at the device's default configuration. `make_fill` gets
/// the device rate and channel count.
fn build_default_stream<M>(device: &Device, make_fill: M) -> Result<(cpal::Stream, StreamConfig)>
where
    M: FnOnce(u32, usize) -> RawFill,
{
    let output_config = device
        .default_output_config()
        .context("Failed to get default output config")?;
    debug!("Default output config: {output_config:?}");

    let mut config = output_config.config();
    config.buffer_size = buffer_size(output_config.buffer_size());
    let mut fill = make_fill(config.sample_rate, config.channels as usize);

    let stream = match output_config.sample_format() {
        SampleFormat::F32 => build_stream::<f32, _>(device, &config, move |d| fill.fill(d))?,
        SampleFormat::I16 => build_stream::<i16, _>(device, &config, move |d| fill.fill(d))?,
        SampleFormat::U16 => build_stream::<u16, _>(device, &config, move |d| fill.fill(d))?,
        format => anyhow::bail!("Unsupported sample format: {:?}", format),
    };
    Ok((stream, config))
}

/// Callback state for streams opened at the device's default format.
enum RawFill {
    Renderer(Box<Renderer>),
    Tone {
        phase: f32,
        step: f32,
        level: f32,
        remaining: usize,
        channels: usize,
    },
}

impl RawFill {
    fn tone(rate: u32, channels: usize, duration_ms: u32, level: f32) -> Self {
        RawFill::Tone {
            phase: 0.0,
            step: std::f32::consts::TAU * TONE_HZ / rate as f32,
            level,
            remaining: (rate as u64 * duration_ms as u64 / 1000) as usize,
            channels: channels.max(1),
        }
    }
}

impl RawFill {
    fn fill<S: Sample + FromSample<f32>>(&mut self, data: &mut [S]) {
        match self {
            RawFill::Renderer(renderer) => renderer.render_as(data),
            RawFill::Tone {
                phase,
                step,
                level,
                remaining,
                channels,
            } => {
                for frame in data.chunks_mut(*channels) {
                    let value = if *remaining > 0 {
                        *remaining -= 1;
                        *phase = (*phase + *step) % std::f32::consts::TAU;
                        phase.sin() * *level
                    } else {
                        0.0
                    };
                    for slot in frame {
                        *slot = S::from_sample(value);
                    }
                }
            }
        }
    }
}

struct CpalOutput {
    stream: cpal::Stream,
}

impl OutputStream for CpalOutput {
    fn play(&mut self) -> Result<(), PlayerError> {
        self.stream
            .play()
            .map_err(|e| PlayerError::PlaybackBlocked(e.to_string()))
    }

    fn pause(&mut self) -> Result<(), PlayerError> {
        self.stream
            .pause()
            .map_err(|e| PlayerError::PlaybackBlocked(e.to_string()))
    }
}

/// Plays to the default output device, or to the device with `device_id`.
#[derive(Default)]
pub struct CpalBackend {
    device_id: Option<DeviceId>,
}

impl CpalBackend {
    pub fn new(device_id: Option<DeviceId>) -> Self {
        Self { device_id }
    }

    fn graph_stream(&self, renderer: Renderer) -> Result<cpal::Stream> {
        let device = get_output_device(self.device_id.as_ref())?;
        let output_config = device
            .default_output_config()
            .context("Failed to get default output config")?;

        let config = StreamConfig {
            channels: CHANNELS as u16,
            sample_rate: SAMPLE_RATE,
            buffer_size: buffer_size(output_config.buffer_size()),
        };

        let mut renderer = renderer;
        debug!("Building graph output stream: {config:?}");
        build_stream::<f32, _>(&device, &config, move |data| renderer.render(data))
            .context("Device rejected the graph configuration")
    }

    fn raw_stream(&self, controls: Arc<PlayerControls>) -> Result<cpal::Stream> {
        let device = get_output_device(self.device_id.as_ref())?;
        let (stream, config) = build_default_stream(&device, |rate, channels| {
            RawFill::Renderer(Box::new(Renderer::raw(controls, rate, channels)))
        })?;
        info!(
            "Raw output at {} Hz, {} channels",
            config.sample_rate, config.channels
        );
        Ok(stream)
    }

    fn tone_stream(&self, duration_ms: u32, level: f32) -> Result<cpal::Stream> {
        let device = get_output_device(self.device_id.as_ref())?;
        let (stream, _) = build_default_stream(&device, |rate, channels| {
            RawFill::tone(rate, channels, duration_ms, level)
        })?;
        stream.play().context("Failed to start tone")?;
        Ok(stream)
    }
}

impl AudioBackend for CpalBackend {
    fn open_graph(&mut self, renderer: Renderer) -> Result<Box<dyn OutputStream>, PlayerError> {
        let stream = self
            .graph_stream(renderer)
            .map_err(|e| PlayerError::GraphInit(format!("{e:#}")))?;
        info!("Audio graph output opened");
        Ok(Box::new(CpalOutput { stream }))
    }

    fn open_raw(
        &mut self,
        controls: Arc<PlayerControls>,
    ) -> Result<Box<dyn OutputStream>, PlayerError> {
        let stream = self
            .raw_stream(controls)
            .map_err(|e| PlayerError::PlaybackBlocked(format!("{e:#}")))?;
        Ok(Box::new(CpalOutput { stream }))
    }

    fn unlock(&mut self) -> Result<Box<dyn OutputStream>, PlayerError> {
        let stream = self
            .tone_stream(UNLOCK_TONE_MS, UNLOCK_LEVEL)
            .map_err(|e| PlayerError::PlaybackBlocked(format!("{e:#}")))?;
        debug!("Unlock tone playing");
        Ok(Box::new(CpalOutput { stream }))
    }

    fn reference_tone(&mut self) -> Result<Box<dyn OutputStream>, PlayerError> {
        let stream = self
            .tone_stream(TEST_TONE_MS, TEST_TONE_LEVEL)
            .map_err(|e| PlayerError::PlaybackBlocked(format!("{e:#}")))?;
        info!("Test tone playing ({TONE_HZ} Hz, {TEST_TONE_MS} ms)");
        Ok(Box::new(CpalOutput { stream }))
    }
}
