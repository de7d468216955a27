//! Test fixtures
//!
//! Synthetic audio (tones, heartbeat-like thumps) as PCM or WAV, catalog
//! directories, and a minimal multipart body builder for router tests.

use std::f64::consts::PI;
use std::io::Cursor;
use std::path::Path;

use crate::audio::PcmBuffer;

/// Sine tone at `amplitude`
pub fn tone_pcm(rate: u32, channels: u16, freq: f64, amplitude: f32, secs: f64) -> PcmBuffer {
    let frames = (rate as f64 * secs) as usize;
    let samples = (0..frames)
        .flat_map(|i| {
            let v = (2.0 * PI * freq * i as f64 / rate as f64).sin() as f32 * amplitude;
            std::iter::repeat(v).take(channels as usize)
        })
        .collect();
    PcmBuffer::new(rate, channels, samples)
}

/// Heartbeat-like clip: a short decaying low thump ("lub") followed by a
/// softer one ("dub") on every beat, over a little noise floor.
pub fn heartbeat_pcm(rate: u32, channels: u16, bpm: f64, secs: f64) -> PcmBuffer {
    let frames = (rate as f64 * secs) as usize;
    let beat = 60.0 / bpm;
    // Leading silence so trimming has something to do
    let offset = 0.25;

    let thump = |t: f64, freq: f64, amp: f64| -> f64 {
        if (0.0..0.08).contains(&t) {
            amp * (-t * 40.0).exp() * (2.0 * PI * freq * t).sin()
        } else {
            0.0
        }
    };

    let mut noise_state: u32 = 0x1234_5678;
    let samples = (0..frames)
        .flat_map(|i| {
            let t = i as f64 / rate as f64;
            let v = if t < offset {
                0.0
            } else {
                let phase = (t - offset) % beat;
                // xorshift for a deterministic noise floor
                noise_state ^= noise_state << 13;
                noise_state ^= noise_state >> 17;
                noise_state ^= noise_state << 5;
                let noise = (noise_state as f64 / u32::MAX as f64 - 0.5) * 0.002;
                thump(phase, 60.0, 0.9) + thump(phase - 0.15, 50.0, 0.5) + noise
            };
            std::iter::repeat(v as f32).take(channels as usize)
        })
        .collect();
    PcmBuffer::new(rate, channels, samples)
}

fn wav_spec(pcm: &PcmBuffer) -> hound::WavSpec {
    hound::WavSpec {
        channels: pcm.channels,
        sample_rate: pcm.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

fn write_samples<W: std::io::Write + std::io::Seek>(writer: W, pcm: &PcmBuffer) {
    let mut wav = hound::WavWriter::new(writer, wav_spec(pcm)).unwrap();
    for &s in &pcm.samples {
        wav.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            .unwrap();
    }
    wav.finalize().unwrap();
}

/// 16-bit WAV file contents
pub fn pcm_wav_bytes(pcm: &PcmBuffer) -> Vec<u8> {
    let mut buf = Vec::new();
    write_samples(Cursor::new(&mut buf), pcm);
    buf
}

pub fn write_pcm_wav(path: &Path, pcm: &PcmBuffer) {
    let file = std::fs::File::create(path).unwrap();
    write_samples(std::io::BufWriter::new(file), pcm);
}

pub fn sine_wav_bytes(rate: u32, channels: u16, freq: f64, secs: f64) -> Vec<u8> {
    pcm_wav_bytes(&tone_pcm(rate, channels, freq, 0.5, secs))
}

pub fn write_sine_wav(path: &Path, rate: u32, channels: u16, freq: f64, secs: f64) {
    write_pcm_wav(path, &tone_pcm(rate, channels, freq, 0.5, secs));
}

/// Catalog directory with a playable `calm.wav`, a corrupt `broken.mp3`
/// and a non-audio file.
pub fn catalog_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_pcm_wav(
        &dir.path().join("calm.wav"),
        &tone_pcm(44100, 2, 220.0, 0.3, 3.0),
    );
    std::fs::write(dir.path().join("broken.mp3"), b"not really an mp3").unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"ignore me").unwrap();
    dir
}

/// Minimal `multipart/form-data` encoder
pub struct MultipartBody {
    boundary: String,
    body: Vec<u8>,
}

impl MultipartBody {
    pub fn new() -> Self {
        Self {
            boundary: "heartbeat-mixer-test-boundary".to_string(),
            body: Vec::new(),
        }
    }

    pub fn file(mut self, name: &str, filename: &str, data: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                self.boundary, name, filename
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                self.boundary, name, value
            )
            .as_bytes(),
        );
        self
    }

    /// Content type header value and the encoded body
    pub fn finish(mut self) -> (String, Vec<u8>) {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        (
            format!("multipart/form-data; boundary={}", self.boundary),
            self.body,
        )
    }
}
