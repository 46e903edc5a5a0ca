//! Windowed FFT and inverse FFT with zero-padding and half-spectrum support.
//!
//! Frames are Hann-windowed, centered in a buffer padded to the next power
//! of two, then transformed with unitary scaling (`1/√P` in both directions)
//! so a forward/inverse round trip gives back the padded, windowed frame.
//!
//! A half spectrum keeps bins `0..P/2` of a real signal's `P`-point
//! spectrum. The remaining bins follow from conjugate symmetry, except the
//! Nyquist bin, which a half spectrum does not carry and which is rebuilt as
//! zero.

use rustfft::{num_complex::Complex, FftPlanner};
use std::f64::consts::PI;

/// Complex frequency-domain samples.
pub type Spectrum = Vec<Complex<f64>>;

/// The spectrum of one channel for one period.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSpectrum {
    /// Channel id
    pub channel: usize,
    /// Frequency bins, half or full
    pub bins: Spectrum,
}

/// Forward and inverse transforms. FFT plans are cached by the planner, so a
/// single analyzer should be reused across periods.
pub struct SpectralAnalyzer {
    planner: FftPlanner<f64>,
}

impl Default for SpectralAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Hann window coefficient `i` of a window of `len` samples.
pub fn hann(i: usize, len: usize) -> f64 {
    if len < 2 {
        return 1.0;
    }
    0.5 * (1.0 - (2.0 * PI * i as f64 / (len - 1) as f64).cos())
}

impl SpectralAnalyzer {
    /// Create an analyzer with an empty plan cache.
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
        }
    }

    /// The windowed frame centered in a zero-padded buffer whose length is
    /// the next power of two. This is the signal a round trip reconstructs.
    pub fn prepare(&self, frame: &[f32]) -> Spectrum {
        let len = frame.len();
        if len == 0 {
            return Vec::new();
        }

        let padded = len.next_power_of_two();
        let offset = (padded - len) / 2;
        let mut buffer = vec![Complex::new(0.0, 0.0); padded];
        for (i, &sample) in frame.iter().enumerate() {
            buffer[offset + i] = Complex::new(sample as f64 * hann(i, len), 0.0);
        }
        buffer
    }

    /// Window, pad and transform a frame. With `half_spectrum_only` only the
    /// first half of the bins is returned.
    pub fn forward_transform(&mut self, frame: &[f32], half_spectrum_only: bool) -> Spectrum {
        let mut buffer = self.prepare(frame);
        if buffer.is_empty() {
            return buffer;
        }

        let padded = buffer.len();
        self.planner.plan_fft_forward(padded).process(&mut buffer);
        let scale = 1.0 / (padded as f64).sqrt();
        for bin in buffer.iter_mut() {
            *bin *= scale;
        }

        if half_spectrum_only {
            buffer.truncate(padded / 2);
        }
        buffer
    }

    /// Transform a spectrum back to the time domain. A half spectrum of `M`
    /// bins is mirrored into `2M` bins first, so the result has `2M` samples;
    /// a full spectrum of `M` bins yields `M` samples.
    pub fn inverse_transform(
        &mut self,
        spectrum: &[Complex<f64>],
        was_half_spectrum: bool,
    ) -> Spectrum {
        if spectrum.is_empty() {
            return Vec::new();
        }

        let mut buffer = if was_half_spectrum {
            mirror_half_spectrum(spectrum)
        } else {
            spectrum.to_vec()
        };

        let len = buffer.len();
        self.planner.plan_fft_inverse(len).process(&mut buffer);
        let scale = 1.0 / (len as f64).sqrt();
        for sample in buffer.iter_mut() {
            *sample *= scale;
        }
        buffer
    }

    /// Magnitude of every bin.
    pub fn magnitude(spectrum: &[Complex<f64>]) -> Vec<f64> {
        spectrum.iter().map(|bin| bin.norm()).collect()
    }
}

/// Rebuild the full spectrum of a real signal from its first half.
fn mirror_half_spectrum(half: &[Complex<f64>]) -> Spectrum {
    let m = half.len();
    let full_len = 2 * m;
    let mut full = vec![Complex::new(0.0, 0.0); full_len];
    full[..m].copy_from_slice(half);
    for k in 1..m {
        full[full_len - k] = half[k].conj();
    }
    full
}
