//! Streaming audio file reading
//!
//! Decodes packets on demand into an interleaved f32 stream and exposes the
//! channel map from the container, which the encoder uses to pick a virtual
//! speaker layout. Files named `*.amb` with 3 or 4 channels are treated as
//! ambisonic B-format, which containers have no channel positions for.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::{Channels, SampleBuffer};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use aw_dsp::ChannelId;

use crate::{FileError, FileResult};

/// Canonical channel-mask ordering, as stored in WAVEXT/FLAC containers.
const MASK_ORDER: &[(Channels, ChannelId)] = &[
    (Channels::FRONT_LEFT, ChannelId::FrontLeft),
    (Channels::FRONT_RIGHT, ChannelId::FrontRight),
    (Channels::FRONT_CENTRE, ChannelId::FrontCenter),
    (Channels::LFE1, ChannelId::Lfe),
    (Channels::REAR_LEFT, ChannelId::RearLeft),
    (Channels::REAR_RIGHT, ChannelId::RearRight),
    (Channels::FRONT_LEFT_CENTRE, ChannelId::Invalid),
    (Channels::FRONT_RIGHT_CENTRE, ChannelId::Invalid),
    (Channels::REAR_CENTRE, ChannelId::Invalid),
    (Channels::SIDE_LEFT, ChannelId::SideLeft),
    (Channels::SIDE_RIGHT, ChannelId::SideRight),
    (Channels::TOP_CENTRE, ChannelId::Invalid),
    (Channels::TOP_FRONT_LEFT, ChannelId::TopFrontLeft),
    (Channels::TOP_FRONT_CENTRE, ChannelId::Invalid),
    (Channels::TOP_FRONT_RIGHT, ChannelId::TopFrontRight),
    (Channels::TOP_REAR_LEFT, ChannelId::TopRearLeft),
    (Channels::TOP_REAR_CENTRE, ChannelId::Invalid),
    (Channels::TOP_REAR_RIGHT, ChannelId::TopRearRight),
];

/// Derive an ordered channel map from a container channel mask.
fn channel_map_from_mask(mask: Channels, count: usize) -> Option<Vec<ChannelId>> {
    let mut map = Vec::with_capacity(count);
    for &(bit, id) in MASK_ORDER {
        if mask.contains(bit) {
            map.push(id);
        }
    }
    // A mask that doesn't describe every channel can't order them.
    if map.len() == count {
        Some(map)
    } else {
        None
    }
}

/// Streaming decoder for one input file.
pub struct AudioFileReader {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    channels: usize,
    sample_rate: u32,
    num_frames: Option<u64>,
    channel_map: Option<Vec<ChannelId>>,
    sample_buf: Option<SampleBuffer<f32>>,
    pending: Vec<f32>,
    pending_pos: usize,
}

impl AudioFileReader {
    pub fn open(path: &Path) -> FileResult<Self> {
        let file =
            File::open(path).map_err(|_| FileError::NotFound(path.display().to_string()))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| FileError::DecodeError(e.to_string()))?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| FileError::InvalidFile("No audio track found".to_string()))?;

        let track_id = track.id;
        let channels = track
            .codec_params
            .channels
            .map(|c| c.count())
            .ok_or_else(|| FileError::InvalidFile("Unknown channel count".to_string()))?;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| FileError::InvalidFile("Unknown sample rate".to_string()))?;
        let num_frames = track.codec_params.n_frames;

        let mut channel_map = track
            .codec_params
            .channels
            .and_then(|mask| channel_map_from_mask(mask, channels));

        // `.amb` carries B-format audio, which channel masks can't express.
        let is_amb = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("amb"))
            .unwrap_or(false);
        if is_amb && (channels == 3 || channels == 4) {
            let mut map = vec![ChannelId::AmbiW, ChannelId::AmbiX, ChannelId::AmbiY];
            if channels == 4 {
                map.push(ChannelId::AmbiZ);
            }
            channel_map = Some(map);
        }

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| FileError::DecodeError(e.to_string()))?;

        Ok(Self {
            format,
            decoder,
            track_id,
            channels,
            sample_rate,
            num_frames,
            channel_map,
            sample_buf: None,
            pending: Vec::new(),
            pending_pos: 0,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Total frame count, when the container declares it.
    pub fn num_frames(&self) -> Option<u64> {
        self.num_frames
    }

    /// The ordered channel map, if the file provides one.
    pub fn channel_map(&self) -> Option<&[ChannelId]> {
        self.channel_map.as_deref()
    }

    /// Read interleaved frames into `out` (whose length must be a multiple
    /// of the channel count). Returns the number of frames read, short only
    /// at end of stream.
    pub fn read_frames(&mut self, out: &mut [f32]) -> FileResult<usize> {
        debug_assert_eq!(out.len() % self.channels, 0);
        let mut filled = 0usize;

        while filled < out.len() {
            // Drain anything left over from the previous packet first.
            if self.pending_pos < self.pending.len() {
                let n = (out.len() - filled).min(self.pending.len() - self.pending_pos);
                out[filled..filled + n]
                    .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
                self.pending_pos += n;
                filled += n;
                continue;
            }

            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => return Err(FileError::DecodeError(e.to_string())),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let needed = decoded.capacity() * decoded.spec().channels.count();
                    if self.sample_buf.as_ref().map_or(true, |b| b.capacity() < needed) {
                        self.sample_buf = Some(SampleBuffer::<f32>::new(
                            decoded.capacity() as u64,
                            *decoded.spec(),
                        ));
                    }
                    let buf = self.sample_buf.as_mut().expect("buffer just created");
                    buf.copy_interleaved_ref(decoded);
                    self.pending.clear();
                    self.pending.extend_from_slice(buf.samples());
                    self.pending_pos = 0;
                }
                // Skip decode errors.
                Err(SymphoniaError::DecodeError(e)) => {
                    log::debug!("skipping undecodable packet: {}", e);
                    continue;
                }
                Err(e) => return Err(FileError::DecodeError(e.to_string())),
            }
        }

        Ok(filled / self.channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_test_wav(path: &Path, channels: u16, frames: usize) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 48000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            for ch in 0..channels {
                let value = ((i + ch as usize) % 100) as i16 * 100;
                writer.write_sample(value).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_read_stereo_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.wav");
        write_test_wav(&path, 2, 3000);

        let mut reader = AudioFileReader::open(&path).unwrap();
        assert_eq!(reader.channels(), 2);
        assert_eq!(reader.sample_rate(), 48000);

        let mut buf = vec![0.0f32; 1024 * 2];
        let mut total = 0;
        loop {
            let got = reader.read_frames(&mut buf).unwrap();
            total += got;
            if got < 1024 {
                break;
            }
        }
        assert_eq!(total, 3000);
    }

    #[test]
    fn test_amb_extension_maps_bformat() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.amb");
        // Plain WAV data; the extension is what marks it as B-format.
        {
            let spec = hound::WavSpec {
                channels: 4,
                sample_rate: 48000,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            };
            let mut writer = hound::WavWriter::create(&path, spec).unwrap();
            for _ in 0..128 {
                for _ in 0..4 {
                    writer.write_sample(0i16).unwrap();
                }
            }
            writer.finalize().unwrap();
        }

        let reader = AudioFileReader::open(&path).unwrap();
        assert_eq!(
            reader.channel_map(),
            Some(&[ChannelId::AmbiW, ChannelId::AmbiX, ChannelId::AmbiY, ChannelId::AmbiZ][..])
        );
    }

    #[test]
    fn test_missing_file() {
        let err = AudioFileReader::open(Path::new("/nonexistent/input.wav"));
        assert!(matches!(err, Err(FileError::NotFound(_))));
    }
}
