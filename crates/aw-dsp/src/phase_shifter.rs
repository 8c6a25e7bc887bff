//! Wideband +90 degree phase shifter
//!
//! A fixed-length FIR approximation of the Hilbert transform, producing an
//! output in quadrature with its input across the audio band. The kernel is
//! synthesized in the frequency domain: a delayed impulse is transformed,
//! rotated +90 degrees, mirrored for a real response, and transformed back.

use num_complex::Complex;
use rustfft::FftPlanner;

/// One-sided latency of the filter, in samples.
pub const FILTER_DELAY: usize = 1024;

/// Total FIR length. Even-offset taps are zero and not stored.
const FILTER_SIZE: usize = FILTER_DELAY * 2;

/// Wideband +90 degree phase-shift FIR filter.
pub struct PhaseShifter {
    /// The nonzero (odd-offset) taps, newest-input first.
    coeffs: Vec<f32>,
}

impl PhaseShifter {
    pub fn new() -> Self {
        let mut planner = FftPlanner::<f64>::new();
        let forward = planner.plan_fft_forward(FILTER_SIZE);
        let inverse = planner.plan_fft_inverse(FILTER_SIZE);

        // Generate a frequency-domain impulse with a +90 degree phase
        // offset, then reconstruct the time-domain response.
        let mut buf = vec![Complex::new(0.0f64, 0.0); FILTER_SIZE];
        buf[FILTER_DELAY] = Complex::new(1.0, 0.0);
        forward.process(&mut buf);
        for value in buf.iter_mut().take(FILTER_DELAY + 1) {
            *value = Complex::new(-value.im, value.re);
        }
        for i in FILTER_DELAY + 1..FILTER_SIZE {
            buf[i] = buf[FILTER_SIZE - i].conj();
        }
        inverse.process(&mut buf);

        // Keep the odd-offset taps, normalized by the transform length.
        let mut coeffs = vec![0.0f32; FILTER_DELAY];
        for (k, coeff) in coeffs.iter_mut().enumerate() {
            let idx = FILTER_DELAY + (FILTER_DELAY - 1) - k * 2;
            *coeff = (buf[idx].re / FILTER_SIZE as f64) as f32;
        }

        Self { coeffs }
    }

    /// Convolve `src` against the kernel and accumulate into `dst`.
    ///
    /// `src` must hold at least `dst.len() + FILTER_SIZE - 2` samples: the
    /// leading `FILTER_SIZE - 1` samples are the history carried over from
    /// the previous block.
    pub fn process_accum(&self, dst: &mut [f32], src: &[f32]) {
        debug_assert!(src.len() >= dst.len() + FILTER_SIZE - 2);

        for (i, output) in dst.iter_mut().enumerate() {
            let mut sum = 0.0f32;
            for (j, &coeff) in self.coeffs.iter().enumerate() {
                sum += src[i + j * 2] * coeff;
            }
            *output += sum;
        }
    }
}

impl Default for PhaseShifter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_dc_response_is_zero() {
        let shifter = PhaseShifter::new();
        // The taps are antisymmetric around the kernel center, so a constant
        // input must produce (near-)zero output.
        let sum: f32 = shifter.coeffs.iter().sum();
        assert!(sum.abs() < 1e-6, "DC response should vanish, got {}", sum);
    }

    #[test]
    fn test_center_taps_match_ideal_hilbert() {
        let shifter = PhaseShifter::new();
        // The tap one sample off the kernel center approaches 2/pi.
        let center = shifter
            .coeffs
            .iter()
            .cloned()
            .fold(0.0f32, |m, c| if c.abs() > m.abs() { c } else { m });
        assert!(
            (center.abs() - 2.0 / std::f32::consts::PI).abs() < 0.01,
            "largest tap {} should be near 2/pi",
            center
        );
    }

    #[test]
    fn test_process_accum_accumulates() {
        let shifter = PhaseShifter::new();
        let src = vec![0.0f32; 16 + FILTER_SIZE - 2];
        let mut dst = vec![1.0f32; 16];
        shifter.process_accum(&mut dst, &src);
        // Zero input adds nothing; the existing contents survive.
        assert!(dst.iter().all(|&v| v == 1.0));
    }
}
