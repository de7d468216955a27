//! Zero-phase Butterworth low-pass filtering
//!
//! The filter is built as a cascade of second-order sections (plus one
//! first-order section for odd orders) using the bilinear transform, and is
//! run forward then backward over each channel so the output has no phase
//! shift. The signal is extended at both ends by odd reflection before
//! filtering to suppress edge transients.

use std::f64::consts::PI;

use crate::audio::PcmBuffer;

/// One direct-form-I section (biquad or first-order with b2 = a2 = 0)
#[derive(Debug, Clone, Copy)]
struct Section {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Section {
    fn lowpass_biquad(cutoff_hz: f64, sample_rate: f64, q: f64) -> Self {
        let w0 = 2.0 * PI * cutoff_hz / sample_rate;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);
        let a0 = 1.0 + alpha;
        Self {
            b0: (1.0 - cos) / 2.0 / a0,
            b1: (1.0 - cos) / a0,
            b2: (1.0 - cos) / 2.0 / a0,
            a1: -2.0 * cos / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    fn lowpass_first_order(cutoff_hz: f64, sample_rate: f64) -> Self {
        let k = (PI * cutoff_hz / sample_rate).tan();
        let b0 = k / (1.0 + k);
        Self {
            b0,
            b1: b0,
            b2: 0.0,
            a1: (k - 1.0) / (k + 1.0),
            a2: 0.0,
        }
    }

    fn run(&self, data: &mut [f64]) {
        let (mut x1, mut x2, mut y1, mut y2) = (0.0, 0.0, 0.0, 0.0);
        // Start from the steady state of the first sample
        if let Some(&first) = data.first() {
            x1 = first;
            x2 = first;
            let dc_gain = (self.b0 + self.b1 + self.b2) / (1.0 + self.a1 + self.a2);
            y1 = first * dc_gain;
            y2 = y1;
        }
        for v in data.iter_mut() {
            let x0 = *v;
            let y0 = self.b0 * x0 + self.b1 * x1 + self.b2 * x2 - self.a1 * y1 - self.a2 * y2;
            x2 = x1;
            x1 = x0;
            y2 = y1;
            y1 = y0;
            *v = y0;
        }
    }
}

/// Butterworth low-pass filter of arbitrary order
#[derive(Debug, Clone)]
pub struct ButterworthLowpass {
    order: usize,
    sections: Vec<Section>,
}

impl ButterworthLowpass {
    pub fn new(order: usize, cutoff_hz: f64, sample_rate: u32) -> Self {
        let order = order.max(1);
        let fs = sample_rate as f64;
        // Keep the cutoff strictly below Nyquist
        let cutoff = cutoff_hz.clamp(1.0, fs * 0.499);

        let mut sections: Vec<Section> = (1..=order / 2)
            .map(|k| {
                let q = 1.0 / (2.0 * (PI * (2 * k - 1) as f64 / (2 * order) as f64).cos());
                Section::lowpass_biquad(cutoff, fs, q)
            })
            .collect();
        if order % 2 == 1 {
            sections.push(Section::lowpass_first_order(cutoff, fs));
        }

        Self { order, sections }
    }

    /// Edge padding length, matching the conventional `3 * (ntaps - 1)`.
    pub fn pad_len(&self) -> usize {
        3 * self.order
    }

    fn run_once(&self, data: &mut [f64]) {
        for section in &self.sections {
            section.run(data);
        }
    }

    /// Forward-backward filtering of one channel.
    ///
    /// Returns `None` when the signal is too short to pad.
    pub fn filtfilt(&self, input: &[f32]) -> Option<Vec<f32>> {
        let pad = self.pad_len();
        let n = input.len();
        if n <= pad {
            return None;
        }

        // Odd extension: 2*x[0] - x[pad..1], x, 2*x[n-1] - x[n-2..n-1-pad]
        let first = input[0] as f64;
        let last = input[n - 1] as f64;
        let mut ext: Vec<f64> = Vec::with_capacity(n + 2 * pad);
        ext.extend((1..=pad).rev().map(|i| 2.0 * first - input[i] as f64));
        ext.extend(input.iter().map(|&v| v as f64));
        ext.extend((1..=pad).map(|i| 2.0 * last - input[n - 1 - i] as f64));

        self.run_once(&mut ext);
        ext.reverse();
        self.run_once(&mut ext);
        ext.reverse();

        Some(ext[pad..pad + n].iter().map(|&v| v as f32).collect())
    }

    /// Filter every channel of `buf`. Buffers too short to pad are returned
    /// unchanged.
    pub fn apply(&self, buf: &PcmBuffer) -> PcmBuffer {
        let mut out = buf.clone();
        for ch in 0..buf.channels as usize {
            match self.filtfilt(&buf.channel(ch)) {
                Some(filtered) => out.set_channel(ch, &filtered),
                None => {
                    tracing::debug!(
                        frames = buf.frames(),
                        pad = self.pad_len(),
                        "Input too short for low-pass, skipping filter"
                    );
                    return buf.clone();
                }
            }
        }
        out
    }
}
