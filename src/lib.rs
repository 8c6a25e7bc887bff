//! Encoder driver: multi-channel input to 2-channel UHJ FLAC.
//!
//! Per input file: pick a virtual speaker layout (or detect B-format), pan
//! into a W/X/Y/Z intermediate, run the streaming UHJ encoder, and write
//! 24-bit FLAC. The encoder's filter delay means the first
//! [`FILTER_DELAY`](aw_dsp::FILTER_DELAY) output samples are lead-in to
//! discard, and as many zero samples are fed after EOF to flush the tail,
//! so the output covers the input length exactly.

use std::f32::consts::SQRT_2;
use std::path::{Path, PathBuf};

use thiserror::Error;

use aw_dsp::{
    ambi_coeffs, layout_from_channel_count, layout_from_map, ChannelId, InputLayout, LayoutError,
    UhjEncoder, BLOCK_SIZE, FILTER_DELAY,
};
use aw_file::{AudioFileReader, FileError, FlacWriter};

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Layout(#[from] LayoutError),
}

/// Result of one file conversion.
#[derive(Debug, Clone, Copy)]
pub struct EncodeStats {
    /// Frames actually written to the output file.
    pub frames_written: u64,
    /// Frame count declared by the input container, if any.
    pub input_frames: Option<u64>,
}

/// Output path: `<basename>.uhj.flac` in the current directory.
pub fn output_name(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "out".to_string());
    PathBuf::from(format!("{}.uhj.flac", stem))
}

fn detect_layout(
    input: &Path,
    map: Option<&[ChannelId]>,
    channels: usize,
) -> Result<InputLayout, LayoutError> {
    match map {
        Some(map) => layout_from_map(map),
        None => {
            let layout = layout_from_channel_count(channels)?;
            if let InputLayout::Speakers(spkrs) = layout {
                log::warn!(
                    "{}: assuming WFX order for unmapped {}-speaker audio",
                    input.display(),
                    spkrs.len()
                );
            }
            Ok(layout)
        }
    }
}

/// Encode one input file to `output`.
pub fn encode_file(input: &Path, output: &Path) -> Result<EncodeStats, EncodeError> {
    const MAX_VALUE: f32 = 8388607.0 / 8388608.0;

    let mut reader = AudioFileReader::open(input)?;
    let channels = reader.channels();
    let layout = detect_layout(input, reader.channel_map(), channels)?;

    let mut writer = FlacWriter::create(
        output,
        2,
        reader.sample_rate(),
        reader.num_frames().unwrap_or(0),
    )?;

    let mut encoder = UhjEncoder::new();
    let mut inbuf = vec![0.0f32; BLOCK_SIZE * channels];
    let mut ambmem = vec![vec![0.0f32; BLOCK_SIZE]; 4];
    let mut enc_l = vec![0.0f32; BLOCK_SIZE];
    let mut enc_r = vec![0.0f32; BLOCK_SIZE];
    let mut outmem = vec![0.0f32; BLOCK_SIZE * 2];

    // Skip the lead-in from the all-pass filter delay, and feed the same
    // number of samples through after EOF so none of the input is lost.
    let mut lead_in = FILTER_DELAY;
    let mut lead_out = FILTER_DELAY;
    let mut total_wrote = 0u64;

    while lead_in > 0 || lead_out > 0 {
        let mut got = reader.read_frames(&mut inbuf)?;
        if got < BLOCK_SIZE {
            let remaining = (BLOCK_SIZE - got).min(lead_out);
            inbuf[got * channels..(got + remaining) * channels].fill(0.0);
            got += remaining;
            lead_out -= remaining;
        }

        for buf in ambmem.iter_mut() {
            buf.fill(0.0);
        }

        match layout {
            InputLayout::BFormat { channels: bchans } => {
                // B-format is already in the correct order. It just needs a
                // +3dB boost.
                let count = bchans.min(4).min(channels);
                for (c, buf) in ambmem.iter_mut().enumerate().take(count) {
                    for (i, value) in buf.iter_mut().enumerate().take(got) {
                        *value = inbuf[i * channels + c] * SQRT_2;
                    }
                }
            }
            InputLayout::Speakers(spkrs) => {
                for (ci, spkr) in spkrs.iter().enumerate() {
                    // Skip LFE. Or mix directly into W? Or W+X?
                    if spkr.channel == ChannelId::Lfe {
                        continue;
                    }
                    let coeffs = ambi_coeffs(
                        spkr.azimuth_deg.to_radians(),
                        spkr.elevation_deg.to_radians(),
                    );
                    for (c, buf) in ambmem.iter_mut().enumerate() {
                        let gain = coeffs[c];
                        for (i, value) in buf.iter_mut().enumerate().take(got) {
                            *value += inbuf[i * channels + ci] * gain;
                        }
                    }
                }
            }
        }

        encoder.encode(&mut enc_l, &mut enc_r, &ambmem[0], &ambmem[1], &ambmem[2], got);

        if lead_in >= got {
            lead_in -= got;
            continue;
        }

        let out_frames = got - lead_in;
        for (c, enc) in [&enc_l, &enc_r].into_iter().enumerate() {
            for i in 0..out_frames {
                outmem[i * 2 + c] = enc[lead_in + i].clamp(-1.0, MAX_VALUE);
            }
        }
        lead_in = 0;

        writer.write_frames(&outmem[..out_frames * 2])?;
        total_wrote += out_frames as u64;
    }

    writer.finish()?;
    Ok(EncodeStats {
        frames_written: total_wrote,
        input_frames: reader.num_frames(),
    })
}
