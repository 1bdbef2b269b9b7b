//! Track decoding using symphonia.
//!
//! Provides [`AudioFileReader`] for decoding a fetched track (mp3, flac, wav, ogg, aac,
//! alac, mp4) held in memory and resampling it to the output sample rate.

use std::io::Cursor;

use anyhow::{Context, Result, anyhow};
use rubato::{FftFixedIn, Resampler};
use symphonia::core::audio::{AudioBufferRef, SampleBuffer};
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use super::frame::TrackBuffer;

const RESAMPLE_CHUNK: usize = 1024;

/// Appends every frame of `decoded` to `output`, one `Vec` per output channel.
/// Mono sources are duplicated across channels. Any sample format symphonia
/// decodes to is converted through an `f32` sample buffer.
fn extract_samples<const CHANNELS: usize>(decoded: AudioBufferRef, output: &mut [Vec<f64>]) {
    let spec = *decoded.spec();
    let num_frames = decoded.frames();
    let num_channels = spec.channels.count();
    if num_frames == 0 || num_channels == 0 {
        return;
    }

    let mut sample_buf = SampleBuffer::<f32>::new(num_frames as u64, spec);
    sample_buf.copy_interleaved_ref(decoded);

    for frame in sample_buf.samples().chunks_exact(num_channels) {
        for (ch, out) in output.iter_mut().enumerate().take(CHANNELS) {
            out.push(frame[ch % num_channels] as f64);
        }
    }
}

#[derive(Debug, Clone)]
pub struct AudioFileInfo {
    pub sample_rate: u32,
    pub channels: usize,
    pub duration_secs: Option<f64>,
    pub file_name: String,
}

pub struct AudioFileReader {
    format: Box<dyn symphonia::core::formats::FormatReader>,
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    track_id: u32,
    source_sample_rate: u32,
    pub info: AudioFileInfo,
}

impl AudioFileReader {
    /// Probes an in-memory track. `file_name` is used for the format hint and
    /// for display.
    pub fn from_bytes(bytes: Vec<u8>, file_name: &str) -> Result<Self> {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

        let mut hint = Hint::new();
        if let Some((_, ext)) = file_name.rsplit_once('.') {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .context("Failed to probe audio format")?;

        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| anyhow!("No supported audio track found"))?;

        let track_id = track.id;

        let source_sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| anyhow!("Unknown sample rate"))?;

        let channels = track
            .codec_params
            .channels
            .map(|c| c.count())
            .unwrap_or(2);

        let duration_secs = track
            .codec_params
            .n_frames
            .map(|frames| frames as f64 / source_sample_rate as f64);

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .context("Failed to create decoder")?;

        let info = AudioFileInfo {
            sample_rate: source_sample_rate,
            channels,
            duration_secs,
            file_name: file_name.to_string(),
        };

        Ok(Self {
            format,
            decoder,
            track_id,
            source_sample_rate,
            info,
        })
    }

    /// Decodes the whole track and resamples it to `SAMPLE_RATE`.
    pub fn decode_all_resampled<const CHANNELS: usize, const SAMPLE_RATE: u32>(
        mut self,
    ) -> Result<TrackBuffer<CHANNELS, SAMPLE_RATE>> {
        let mut all_samples: Vec<Vec<f64>> = vec![Vec::new(); CHANNELS];

        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(symphonia::core::errors::Error::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => return Err(e).context("Failed to read packet"),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(symphonia::core::errors::Error::DecodeError(e)) => {
                    debug!("Skipping undecodable packet: {}", e);
                    continue;
                }
                Err(e) => return Err(e).context("Failed to decode packet"),
            };

            extract_samples::<CHANNELS>(decoded, &mut all_samples);
        }

        if all_samples[0].is_empty() {
            anyhow::bail!("{} contains no audio", self.info.file_name);
        }

        let interleaved = self.resample::<CHANNELS, SAMPLE_RATE>(&all_samples)?;
        let samples = interleaved.into_iter().map(|s| s as f32).collect();
        TrackBuffer::new(self.info.file_name.clone(), samples)
    }

    fn resample<const CHANNELS: usize, const SAMPLE_RATE: u32>(
        &self,
        input: &[Vec<f64>],
    ) -> Result<Vec<f64>> {
        let num_frames = input[0].len();

        if self.source_sample_rate == SAMPLE_RATE {
            let mut interleaved = Vec::with_capacity(num_frames * CHANNELS);
            for frame_idx in 0..num_frames {
                for channel in input.iter().take(CHANNELS) {
                    interleaved.push(channel[frame_idx]);
                }
            }
            return Ok(interleaved);
        }

        let mut resampler = FftFixedIn::<f64>::new(
            self.source_sample_rate as usize,
            SAMPLE_RATE as usize,
            RESAMPLE_CHUNK,
            2,
            CHANNELS,
        )
        .context("Failed to create resampler")?;

        let expected_frames = (num_frames as u64 * SAMPLE_RATE as u64
            / self.source_sample_rate as u64) as usize;
        let delay = resampler.output_delay();
        let needed = (delay + expected_frames) * CHANNELS;
        let mut output_interleaved = Vec::with_capacity(needed);

        // Keep feeding zero-padded chunks until the resampler has flushed
        // the delayed tail of the track.
        let mut pos = 0;
        while pos < num_frames || output_interleaved.len() < needed {
            let chunk_len = resampler.input_frames_next();
            let start = pos.min(num_frames);
            let end = (pos + chunk_len).min(num_frames);

            let chunk: Vec<Vec<f64>> = input
                .iter()
                .take(CHANNELS)
                .map(|channel| {
                    let mut data = channel[start..end].to_vec();
                    data.resize(chunk_len, 0.0);
                    data
                })
                .collect();

            let resampled = resampler.process(&chunk, None).context("Resampling failed")?;

            for frame_idx in 0..resampled[0].len() {
                for channel in resampled.iter() {
                    output_interleaved.push(channel[frame_idx]);
                }
            }

            pos += chunk_len;
        }

        output_interleaved.drain(..delay * CHANNELS);
        output_interleaved.truncate(expected_frames * CHANNELS);
        Ok(output_interleaved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A 440 Hz tone at half scale, silent before `onset`.
    fn wav_bytes_with(
        sample_rate: u32,
        channels: u16,
        frames: usize,
        bits_per_sample: u16,
        onset: usize,
    ) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample,
            sample_format: hound::SampleFormat::Int,
        };
        let full_scale = ((1i64 << (bits_per_sample - 1)) - 1) as f32;
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..frames {
                let value = if i < onset {
                    0.0
                } else {
                    let t = (i - onset) as f32 / sample_rate as f32;
                    (t * 440.0 * std::f32::consts::TAU).sin() * 0.5
                };
                let sample = (value * full_scale) as i32;
                for _ in 0..channels {
                    writer.write_sample(sample).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    fn wav_bytes(sample_rate: u32, channels: u16, frames: usize) -> Vec<u8> {
        wav_bytes_with(sample_rate, channels, frames, 16, 0)
    }

    #[test]
    fn test_decode_mono_wav_to_stereo() {
        let reader = AudioFileReader::from_bytes(wav_bytes(48000, 1, 4800), "tone.wav").unwrap();
        assert_eq!(reader.info.sample_rate, 48000);
        assert_eq!(reader.info.channels, 1);

        let track = reader.decode_all_resampled::<2, 48000>().unwrap();
        assert_eq!(track.frames(), 4800);
        assert_eq!(track.name(), "tone.wav");
        let frame = track.frame(100);
        assert_eq!(frame[0], frame[1]);
    }

    #[test]
    fn test_decode_resamples_to_output_rate() {
        let reader = AudioFileReader::from_bytes(wav_bytes(44100, 2, 4410), "tone.wav").unwrap();
        let track = reader.decode_all_resampled::<2, 48000>().unwrap();

        assert_eq!(track.frames(), 4800);
        let peak = track.data().iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak > 0.3 && peak < 0.7, "peak {peak}");
    }

    #[test]
    fn test_decode_24_bit_wav() {
        let bytes = wav_bytes_with(48000, 2, 4800, 24, 0);
        let track = AudioFileReader::from_bytes(bytes, "deep.wav")
            .unwrap()
            .decode_all_resampled::<2, 48000>()
            .unwrap();

        assert_eq!(track.frames(), 4800);
        let peak = track.data().iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak > 0.45 && peak < 0.55, "peak {peak}");
    }

    #[test]
    fn test_resampling_keeps_timing() {
        // Tone starts 50 ms in; after resampling to 48 kHz it should start
        // near frame 2400, with the resampler delay removed.
        let bytes = wav_bytes_with(44100, 2, 4410, 16, 2205);
        let track = AudioFileReader::from_bytes(bytes, "onset.wav")
            .unwrap()
            .decode_all_resampled::<2, 48000>()
            .unwrap();

        assert_eq!(track.frames(), 4800);
        let onset = (0..track.frames())
            .find(|&i| track.frame(i)[0].abs() > 0.1)
            .unwrap();
        assert!((2390..2420).contains(&onset), "onset {onset}");

        let tail = track.frames() - 50;
        assert!((tail..track.frames()).any(|i| track.frame(i)[0].abs() > 0.1));
    }

    #[test]
    fn test_garbage_bytes_fail_to_probe() {
        let result = AudioFileReader::from_bytes(vec![0u8; 64], "noise.bin");
        assert!(result.is_err());
    }
}
