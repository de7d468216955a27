//! In-memory PCM audio
//!
//! Every decoder output, DSP stage and encoder input in the service is a
//! [`PcmBuffer`]: interleaved `f32` samples in `[-1.0, 1.0]` plus the sample
//! rate and channel count needed to interpret them.

/// Interleaved 32-bit float PCM audio
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl PcmBuffer {
    pub fn new(sample_rate: u32, channels: u16, samples: Vec<f32>) -> Self {
        debug_assert!(channels > 0);
        Self {
            sample_rate,
            channels,
            samples,
        }
    }

    /// Buffer of `frames` frames of silence
    #[cfg(test)]
    pub fn silence(sample_rate: u32, channels: u16, frames: usize) -> Self {
        Self::new(sample_rate, channels, vec![0.0; frames * channels as usize])
    }

    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Number of frames covering `secs` seconds at this buffer's rate
    pub fn frames_for(&self, secs: f64) -> usize {
        (secs.max(0.0) * self.sample_rate as f64).round() as usize
    }

    /// Average all channels down to one.
    pub fn to_mono(&self) -> PcmBuffer {
        if self.channels == 1 {
            return self.clone();
        }
        let ch = self.channels as usize;
        let samples = self
            .samples
            .chunks_exact(ch)
            .map(|frame| frame.iter().sum::<f32>() / ch as f32)
            .collect();
        PcmBuffer::new(self.sample_rate, 1, samples)
    }

    /// Duplicate mono into stereo, or keep the first two channels.
    pub fn to_stereo(&self) -> PcmBuffer {
        match self.channels {
            2 => self.clone(),
            1 => {
                let samples = self.samples.iter().flat_map(|&s| [s, s]).collect();
                PcmBuffer::new(self.sample_rate, 2, samples)
            }
            ch => {
                let samples = self
                    .samples
                    .chunks_exact(ch as usize)
                    .flat_map(|frame| [frame[0], frame[1]])
                    .collect();
                PcmBuffer::new(self.sample_rate, 2, samples)
            }
        }
    }

    /// Keep at most the first `secs` seconds.
    pub fn truncate_secs(&mut self, secs: f64) {
        let frames = self.frames_for(secs).min(self.frames());
        self.samples.truncate(frames * self.channels as usize);
    }

    /// Drop the first `frames` frames.
    pub fn skip_frames(&mut self, frames: usize) {
        let n = (frames * self.channels as usize).min(self.samples.len());
        self.samples.drain(..n);
    }

    /// Copy of one channel
    pub fn channel(&self, index: usize) -> Vec<f32> {
        self.samples
            .iter()
            .skip(index)
            .step_by(self.channels as usize)
            .copied()
            .collect()
    }

    /// Replace one channel's samples. `data` must hold `frames()` samples.
    pub fn set_channel(&mut self, index: usize, data: &[f32]) {
        let ch = self.channels as usize;
        for (frame, &value) in self.samples.chunks_exact_mut(ch).zip(data) {
            frame[index] = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_and_duration() {
        let buf = PcmBuffer::silence(100, 2, 50);
        assert_eq!(buf.frames(), 50);
        assert_eq!(buf.samples.len(), 100);
        assert!((buf.duration_secs() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_to_mono_averages_channels() {
        let buf = PcmBuffer::new(10, 2, vec![1.0, 0.0, 0.5, 0.5]);
        let mono = buf.to_mono();
        assert_eq!(mono.channels, 1);
        assert_eq!(mono.samples, vec![0.5, 0.5]);
    }

    #[test]
    fn test_to_stereo_duplicates_mono() {
        let buf = PcmBuffer::new(10, 1, vec![0.25, -0.25]);
        assert_eq!(buf.to_stereo().samples, vec![0.25, 0.25, -0.25, -0.25]);
    }

    #[test]
    fn test_truncate_secs() {
        let mut buf = PcmBuffer::silence(100, 2, 100);
        buf.truncate_secs(0.25);
        assert_eq!(buf.frames(), 25);
        buf.truncate_secs(10.0);
        assert_eq!(buf.frames(), 25);
    }

    #[test]
    fn test_channel_roundtrip() {
        let mut buf = PcmBuffer::new(10, 2, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(buf.channel(1), vec![2.0, 4.0]);
        buf.set_channel(0, &[9.0, 8.0]);
        assert_eq!(buf.samples, vec![9.0, 2.0, 8.0, 4.0]);
    }
}
