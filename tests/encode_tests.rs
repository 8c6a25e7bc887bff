//! End-to-end encode scenarios
//!
//! Synthesizes WAV fixtures, runs the full file pipeline, and decodes the
//! resulting FLAC back for verification.

use std::f32::consts::{PI, SQRT_2};
use std::path::Path;

use ambiweave::{encode_file, output_name};
use aw_file::AudioFileReader;

const SAMPLE_RATE: u32 = 48000;

fn write_wav_f32(path: &Path, channels: u16, frames: &[Vec<f32>]) {
    let spec = hound::WavSpec {
        channels,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for frame in frames {
        assert_eq!(frame.len(), channels as usize);
        for &sample in frame {
            writer.write_sample(sample).unwrap();
        }
    }
    writer.finalize().unwrap();
}

fn decode_all(path: &Path) -> (Vec<f32>, Vec<f32>) {
    let mut reader = AudioFileReader::open(path).unwrap();
    assert_eq!(reader.channels(), 2);

    let mut left = Vec::new();
    let mut right = Vec::new();
    let mut buf = vec![0.0f32; 1024 * 2];
    loop {
        let got = reader.read_frames(&mut buf).unwrap();
        for i in 0..got {
            left.push(buf[i * 2]);
            right.push(buf[i * 2 + 1]);
        }
        if got < 1024 {
            break;
        }
    }
    (left, right)
}

#[test]
fn test_output_name() {
    assert_eq!(
        output_name(Path::new("/some/dir/music.wav")),
        Path::new("music.uhj.flac")
    );
    assert_eq!(output_name(Path::new("take2.amb")), Path::new("take2.uhj.flac"));
}

#[test]
fn test_encode_silence() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("silence.wav");
    let output = dir.path().join("silence.uhj.flac");

    let frames = vec![vec![0.0f32, 0.0]; SAMPLE_RATE as usize];
    write_wav_f32(&input, 2, &frames);

    let stats = encode_file(&input, &output).unwrap();
    assert_eq!(stats.frames_written, SAMPLE_RATE as u64);
    assert_eq!(stats.input_frames, Some(SAMPLE_RATE as u64));

    let (left, right) = decode_all(&output);
    assert_eq!(left.len(), SAMPLE_RATE as usize);

    let eps = 1.0 / 8388608.0;
    assert!(left.iter().all(|&s| s.abs() <= eps));
    assert!(right.iter().all(|&s| s.abs() <= eps));
}

#[test]
fn test_encode_stereo_sine() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("sine.wav");
    let output = dir.path().join("sine.uhj.flac");

    let frames: Vec<Vec<f32>> = (0..SAMPLE_RATE as usize)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            vec![0.5 * (2.0 * PI * 1000.0 * t).sin(), 0.0]
        })
        .collect();
    write_wav_f32(&input, 2, &frames);

    let stats = encode_file(&input, &output).unwrap();
    assert_eq!(stats.frames_written, SAMPLE_RATE as u64);

    let (left, right) = decode_all(&output);
    assert_eq!(left.len() + right.len(), 2 * SAMPLE_RATE as usize);

    // A hard-left source must not collapse to dual mono.
    let diff: f32 = left
        .iter()
        .zip(&right)
        .map(|(l, r)| (l - r).abs())
        .fold(0.0, f32::max);
    assert!(diff > 0.05, "left and right should differ, max diff {}", diff);

    // Total output energy sits where the matrix puts a hard-left stereo
    // source: the in-phase and quadrature gains follow from the UHJ
    // coefficients and the +-30 degree stereo panning.
    let x_gain = SQRT_2 * (30.0f32).to_radians().cos();
    let y_gain = SQRT_2 * (30.0f32).to_radians().sin();
    let s = 0.9396926 + 0.1855740 * x_gain;
    let d_in = 0.6554516 * y_gain;
    let d_quad = -0.3420201 + 0.5098604 * x_gain;
    let expected = (0.5 * (s + d_in)).powi(2)
        + (0.5 * (s - d_in)).powi(2)
        + 2.0 * (0.5 * d_quad).powi(2);

    let in_energy: f64 = frames.iter().map(|f| (f[0] as f64).powi(2)).sum();
    let out_energy: f64 = left
        .iter()
        .chain(&right)
        .map(|&s| (s as f64).powi(2))
        .sum();
    let ratio = out_energy / in_energy;
    assert!(
        (ratio - expected as f64).abs() < 0.01 * expected as f64,
        "energy ratio {} vs expected {}",
        ratio,
        expected
    );
}

#[test]
fn test_encode_bformat_dc() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("steady.amb");
    let output = dir.path().join("steady.uhj.flac");

    let frames = vec![vec![1.0f32, 0.0, 0.0, 0.0]; 10000];
    write_wav_f32(&input, 4, &frames);

    let stats = encode_file(&input, &output).unwrap();
    assert_eq!(stats.frames_written, 10000);

    let (left, right) = decode_all(&output);
    assert_eq!(left.len(), 10000);

    // Once the phase-shifter window is filled with the constant input (and
    // before it starts seeing the flush padding), both channels settle at
    // 0.5 * 0.9396926 * sqrt(2) * W.
    let expected = 0.5 * 0.9396926 * SQRT_2;
    for i in 1024..8950 {
        assert!(
            (left[i] - expected).abs() < 1e-4,
            "left[{}] = {} vs {}",
            i,
            left[i],
            expected
        );
        assert!((left[i] - right[i]).abs() < 1e-5);
    }
}

#[test]
fn test_unsupported_channel_count_fails() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("three.wav");
    let output = dir.path().join("three.uhj.flac");

    let frames = vec![vec![0.0f32; 3]; 256];
    write_wav_f32(&input, 3, &frames);

    assert!(encode_file(&input, &output).is_err());
}
