//! Symphonia-backed Source Handle.
//!
//! Uses Symphonia to:
//! - probe the input container/codec
//! - decode packets into interleaved `f32` samples on demand
//! - seek accurately to a frame index

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use crate::source::{Source, SourceInfo, SourceProvider};
use crate::uri::uri_to_path;

/// Opens local files through Symphonia's default probe and codec registry.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymphoniaProvider;

impl SourceProvider for SymphoniaProvider {
    fn open(&self, uri: &str) -> Result<Box<dyn Source>> {
        let path = uri_to_path(uri).ok_or_else(|| anyhow!("not a local file uri: {uri}"))?;
        Ok(Box::new(SymphoniaSource::open_path(&path)?))
    }
}

struct Decoding {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
}

/// A probed file decoded packet by packet.
pub struct SymphoniaSource {
    inner: Option<Decoding>,
    info: SourceInfo,
    /// Decoded interleaved samples not yet handed out.
    pending: Vec<f32>,
    /// Leading frames to drop after an accurate seek lands early.
    skip_frames: u64,
    /// Whether `ts` values count frames at the stream rate.
    ts_in_frames: bool,
    eof: bool,
}

impl SymphoniaSource {
    /// Open and probe `path`.
    pub fn open_path(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("open {:?}", path))?;

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        Self::from_media_source(Box::new(file), hint)
    }

    /// Probe an arbitrary Symphonia [`MediaSource`].
    pub fn from_media_source(source: Box<dyn MediaSource>, hint: Hint) -> Result<Self> {
        let seekable = source.is_seekable();
        let mss = MediaSourceStream::new(source, Default::default());

        let probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;

        let format = probed.format;
        let track = format
            .default_track()
            .ok_or_else(|| anyhow!("No default audio track"))?;
        let track_id = track.id;
        let codec_params: CodecParameters = track.codec_params.clone();

        let channels = codec_params
            .channels
            .ok_or_else(|| anyhow!("Unknown channels"))?
            .count();
        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| anyhow!("Unknown sample rate"))?;

        let decoder =
            symphonia::default::get_codecs().make(&codec_params, &DecoderOptions::default())?;

        let ts_in_frames = codec_params
            .time_base
            .map(|tb| tb.numer == 1 && tb.denom == sample_rate)
            .unwrap_or(true);

        let info = SourceInfo {
            sample_rate,
            channels: u16::try_from(channels).context("channel count")?,
            frames: codec_params.n_frames,
            seekable,
        };

        Ok(Self {
            inner: Some(Decoding {
                format,
                decoder,
                track_id,
            }),
            info,
            pending: Vec::new(),
            skip_frames: 0,
            ts_in_frames,
            eof: false,
        })
    }

    /// Decode the next packet of our track into `pending`.
    ///
    /// Returns `Ok(false)` at end of stream.
    fn decode_next(&mut self) -> Result<bool> {
        let Some(dec) = self.inner.as_mut() else {
            return Ok(false);
        };
        loop {
            let packet = match dec.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(false),
                Err(e) => return Err(anyhow!(e).context("read packet")),
            };
            if packet.track_id() != dec.track_id {
                continue;
            }

            let decoded = match dec.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(err)) => {
                    tracing::debug!(error = err, "skipping undecodable packet");
                    continue;
                }
                Err(e) => return Err(anyhow!(e).context("decode packet")),
            };

            let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
            sample_buf.copy_interleaved_ref(decoded);

            let channels = usize::from(self.info.channels).max(1);
            let mut samples = sample_buf.samples();
            if self.skip_frames > 0 {
                let frames = (samples.len() / channels) as u64;
                let skipped = self.skip_frames.min(frames);
                self.skip_frames -= skipped;
                samples = &samples[skipped as usize * channels..];
            }
            self.pending.extend_from_slice(samples);
            return Ok(true);
        }
    }
}

impl Source for SymphoniaSource {
    fn info(&self) -> SourceInfo {
        self.info
    }

    fn read(&mut self, max_frames: usize, out: &mut Vec<f32>) -> Result<usize> {
        out.clear();
        let channels = usize::from(self.info.channels).max(1);
        let want = max_frames.saturating_mul(channels);

        while !self.eof && self.pending.len() < want {
            if !self.decode_next()? {
                self.eof = true;
            }
        }

        let take = (self.pending.len().min(want) / channels) * channels;
        out.extend(self.pending.drain(..take));
        Ok(take / channels)
    }

    fn seek(&mut self, frame: u64) -> Result<()> {
        let Some(dec) = self.inner.as_mut() else {
            return Ok(());
        };
        let rate = u64::from(self.info.sample_rate.max(1));
        let time = Time::new(frame / rate, (frame % rate) as f64 / rate as f64);
        let seeked = dec
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(dec.track_id),
                },
            )
            .with_context(|| format!("seek to frame {frame}"))?;
        dec.decoder.reset();

        self.pending.clear();
        self.eof = false;
        self.skip_frames = if self.ts_in_frames {
            seeked.required_ts.saturating_sub(seeked.actual_ts)
        } else {
            0
        };
        Ok(())
    }

    fn close(&mut self) {
        self.inner = None;
        self.pending.clear();
        self.eof = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Minimal 16-bit PCM WAV file.
    fn wav_bytes(sample_rate: u32, channels: u16, frames: u32) -> Vec<u8> {
        let block_align = channels * 2;
        let data_len = frames * u32::from(block_align);
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVEfmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&channels.to_le_bytes());
        out.extend_from_slice(&sample_rate.to_le_bytes());
        out.extend_from_slice(&(sample_rate * u32::from(block_align)).to_le_bytes());
        out.extend_from_slice(&block_align.to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        for i in 0..frames * u32::from(channels) {
            out.extend_from_slice(&((i % 1000) as i16).to_le_bytes());
        }
        out
    }

    fn open_wav(sample_rate: u32, channels: u16, frames: u32) -> SymphoniaSource {
        let cursor = Cursor::new(wav_bytes(sample_rate, channels, frames));
        let mut hint = Hint::new();
        hint.with_extension("wav");
        SymphoniaSource::from_media_source(Box::new(cursor), hint).unwrap()
    }

    #[test]
    fn probes_wav_info() {
        let src = open_wav(8_000, 2, 4_000);
        let info = src.info();
        assert_eq!(info.sample_rate, 8_000);
        assert_eq!(info.channels, 2);
        assert_eq!(info.frames, Some(4_000));
        assert!(info.seekable);
        assert_eq!(info.length_ms(), 500);
    }

    #[test]
    fn reads_all_frames_then_reports_end() {
        let mut src = open_wav(8_000, 1, 3_000);
        let mut buf = Vec::new();
        let mut total = 0;
        loop {
            let n = src.read(256, &mut buf).unwrap();
            if n == 0 {
                break;
            }
            assert!(n <= 256);
            assert_eq!(buf.len(), n);
            total += n;
        }
        assert_eq!(total, 3_000);
        assert_eq!(src.read(256, &mut buf).unwrap(), 0);
    }

    #[test]
    fn seek_repositions_cursor() {
        let mut src = open_wav(8_000, 1, 8_000);
        let mut buf = Vec::new();
        src.read(100, &mut buf).unwrap();
        src.seek(6_000).unwrap();
        let mut total = 0;
        while src.read(512, &mut buf).unwrap() > 0 {
            total += buf.len();
        }
        assert_eq!(total, 2_000);
    }

    #[test]
    fn closed_source_reads_nothing() {
        let mut src = open_wav(8_000, 1, 1_000);
        src.close();
        let mut buf = Vec::new();
        assert_eq!(src.read(64, &mut buf).unwrap(), 0);
        assert!(src.seek(10).is_ok());
    }

    #[test]
    fn provider_rejects_remote_uri() {
        assert!(SymphoniaProvider.open("http://example.com/a.wav").is_err());
    }
}
