//! 24-bit FLAC output using flac-bound

use std::path::Path;

use flac_bound::FlacEncoder;

use crate::{FileError, FileResult};

const BIT_DEPTH: u32 = 24;
const SCALE: f32 = 8388608.0;

/// Streaming 24-bit FLAC file writer.
pub struct FlacWriter {
    encoder: FlacEncoder<'static>,
    channels: usize,
    conv: Vec<i32>,
}

impl FlacWriter {
    pub fn create(
        path: &Path,
        channels: u32,
        sample_rate: u32,
        total_frames: u64,
    ) -> FileResult<Self> {
        let encoder = FlacEncoder::new()
            .ok_or_else(|| FileError::EncodeError("FLAC encoder init failed".to_string()))?
            .channels(channels)
            .sample_rate(sample_rate)
            .bits_per_sample(BIT_DEPTH)
            .compression_level(5)
            .total_samples_estimate(total_frames)
            .init_file(&path)
            .map_err(|e| FileError::EncodeError(format!("FLAC init failed: {:?}", e)))?;

        Ok(Self {
            encoder,
            channels: channels as usize,
            conv: Vec::new(),
        })
    }

    /// Write interleaved frames. Samples are expected to already be clamped
    /// to the representable 24-bit range.
    pub fn write_frames(&mut self, samples: &[f32]) -> FileResult<()> {
        debug_assert_eq!(samples.len() % self.channels, 0);
        let frames = samples.len() / self.channels;

        self.conv.clear();
        self.conv
            .extend(samples.iter().map(|&s| (s * SCALE).round() as i32));

        self.encoder
            .process_interleaved(&self.conv, frames as u32)
            .map_err(|e| FileError::EncodeError(format!("FLAC process failed: {:?}", e)))?;
        Ok(())
    }

    pub fn finish(self) -> FileResult<()> {
        self.encoder
            .finish()
            .map_err(|e| FileError::EncodeError(format!("FLAC finish failed: {:?}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AudioFileReader;

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.flac");

        let frames = 2000usize;
        let samples: Vec<f32> = (0..frames * 2)
            .map(|i| ((i % 200) as f32 / 200.0 - 0.5) * 0.8)
            .collect();

        let mut writer = FlacWriter::create(&path, 2, 48000, frames as u64).unwrap();
        writer.write_frames(&samples).unwrap();
        writer.finish().unwrap();

        let mut reader = AudioFileReader::open(&path).unwrap();
        assert_eq!(reader.channels(), 2);
        assert_eq!(reader.sample_rate(), 48000);

        let mut decoded = vec![0.0f32; frames * 2];
        let got = reader.read_frames(&mut decoded).unwrap();
        assert_eq!(got, frames);

        // 24-bit quantization bounds the round-trip error.
        for (a, b) in samples.iter().zip(&decoded) {
            assert!((a - b).abs() < 1.5 / SCALE, "{} vs {}", a, b);
        }
    }
}
