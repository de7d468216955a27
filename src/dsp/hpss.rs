//! Harmonic/percussive source separation
//!
//! Median-filtering HPSS: the magnitude spectrogram is smoothed along time
//! (harmonic estimate) and along frequency (percussive estimate), the two
//! estimates form a soft Wiener mask, and the masked STFT is resynthesized
//! by weighted overlap-add. Heartbeats are short broadband thumps, so the
//! percussive part keeps them and drops hum and tonal background noise.

use rustfft::{num_complex::Complex, FftPlanner};
use std::f32::consts::PI;

use crate::audio::PcmBuffer;

/// STFT/median parameters
#[derive(Debug, Clone, Copy)]
pub struct HpssConfig {
    pub fft_size: usize,
    pub hop_size: usize,
    /// Median window length, in frames (harmonic) and bins (percussive)
    pub kernel: usize,
}

impl Default for HpssConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            hop_size: 512,
            kernel: 31,
        }
    }
}

fn hann(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / n as f32).cos()))
        .collect()
}

/// Reflect-pad `x` by `pad` on both sides
fn reflect_pad(x: &[f32], pad: usize) -> Vec<f32> {
    let n = x.len();
    let reflect = |i: isize| -> f32 {
        let period = 2 * (n as isize - 1);
        if period <= 0 {
            return x.first().copied().unwrap_or(0.0);
        }
        let mut j = i.rem_euclid(period);
        if j >= n as isize {
            j = period - j;
        }
        x[j as usize]
    };
    (-(pad as isize)..(n + pad) as isize).map(reflect).collect()
}

fn median(window: &mut [f32]) -> f32 {
    let mid = window.len() / 2;
    let (_, m, _) = window.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    *m
}

/// Centered sliding median along a 1-D slice, edges zero-padded.
fn median_filter(input: &[f32], kernel: usize) -> Vec<f32> {
    let half = kernel / 2;
    let n = input.len();
    let mut window = Vec::with_capacity(kernel);
    (0..n)
        .map(|i| {
            window.clear();
            for k in 0..kernel {
                let j = i as isize + k as isize - half as isize;
                window.push(if j < 0 || j >= n as isize {
                    0.0
                } else {
                    input[j as usize]
                });
            }
            median(&mut window)
        })
        .collect()
}

/// Percussive component of a mono signal
pub fn percussive_mono(signal: &[f32], config: &HpssConfig) -> Vec<f32> {
    let n_fft = config.fft_size;
    let hop = config.hop_size;
    let len = signal.len();
    if len == 0 {
        return Vec::new();
    }

    let window = hann(n_fft);
    let padded = reflect_pad(signal, n_fft / 2);
    let n_frames = 1 + (padded.len().saturating_sub(n_fft)) / hop;
    let n_bins = n_fft / 2 + 1;

    let mut planner = FftPlanner::<f32>::new();
    let forward = planner.plan_fft_forward(n_fft);
    let inverse = planner.plan_fft_inverse(n_fft);

    // Analysis
    let mut spectra: Vec<Vec<Complex<f32>>> = Vec::with_capacity(n_frames);
    for f in 0..n_frames {
        let start = f * hop;
        let mut buffer: Vec<Complex<f32>> = (0..n_fft)
            .map(|i| Complex::new(padded.get(start + i).copied().unwrap_or(0.0) * window[i], 0.0))
            .collect();
        forward.process(&mut buffer);
        buffer.truncate(n_bins);
        spectra.push(buffer);
    }

    let magnitude: Vec<Vec<f32>> = spectra
        .iter()
        .map(|frame| frame.iter().map(|c| c.norm()).collect())
        .collect();

    // Harmonic: median across time for each bin
    let mut harmonic = vec![vec![0.0f32; n_bins]; n_frames];
    let mut row = vec![0.0f32; n_frames];
    for bin in 0..n_bins {
        for (f, frame) in magnitude.iter().enumerate() {
            row[f] = frame[bin];
        }
        for (f, value) in median_filter(&row, config.kernel).into_iter().enumerate() {
            harmonic[f][bin] = value;
        }
    }

    // Percussive: median across frequency for each frame
    let percussive: Vec<Vec<f32>> = magnitude
        .iter()
        .map(|frame| median_filter(frame, config.kernel))
        .collect();

    // Masked resynthesis
    let mut output = vec![0.0f32; padded.len()];
    let mut norm = vec![0.0f32; padded.len()];
    let scale = 1.0 / n_fft as f32;
    for f in 0..n_frames {
        let mut full: Vec<Complex<f32>> = vec![Complex::new(0.0, 0.0); n_fft];
        for bin in 0..n_bins {
            let h = harmonic[f][bin].powi(2);
            let p = percussive[f][bin].powi(2);
            let mask = if h + p > f32::EPSILON { p / (h + p) } else { 0.0 };
            full[bin] = spectra[f][bin] * mask;
        }
        // Hermitian mirror for a real output
        for bin in 1..n_fft - n_bins + 1 {
            full[n_fft - bin] = full[bin].conj();
        }
        inverse.process(&mut full);

        let start = f * hop;
        for i in 0..n_fft {
            if let Some(out) = output.get_mut(start + i) {
                *out += full[i].re * scale * window[i];
                norm[start + i] += window[i] * window[i];
            }
        }
    }

    let pad = n_fft / 2;
    (0..len)
        .map(|i| {
            let w = norm[pad + i];
            if w > 1e-6 {
                output[pad + i] / w
            } else {
                0.0
            }
        })
        .collect()
}

/// Mix down to mono and keep only the percussive component.
pub fn percussive(buf: &PcmBuffer, config: &HpssConfig) -> PcmBuffer {
    let mono = buf.to_mono();
    PcmBuffer::new(buf.sample_rate, 1, percussive_mono(&mono.samples, config))
}
