//! Raw sample access for FFmpeg audio frames
//!
//! `ffmpeg-next`'s `Audio::data(index)` sizes each plane from
//! `linesize[index]`, but FFmpeg only fills `linesize[0]` for planar audio
//! (every plane shares it). These helpers read the plane pointers directly
//! and size them from `linesize[0]`.

use ffmpeg_next as ffmpeg;
use ffmpeg_next::util::format::sample::{Sample, Type};

/// Packed (interleaved) 32-bit float
pub const PACKED_F32: Sample = Sample::F32(Type::Packed);
/// Planar 32-bit float
pub const PLANAR_F32: Sample = Sample::F32(Type::Planar);

/// Number of channels recorded in the frame's channel layout
pub fn frame_channels(frame: &ffmpeg::util::frame::Audio) -> usize {
    // SAFETY: `as_ptr()` is valid for the lifetime of `frame`; `nb_channels`
    // is a plain integer field.
    unsafe { (*frame.as_ptr()).ch_layout.nb_channels.max(0) as usize }
}

fn plane_ptr(frame: &ffmpeg::util::frame::Audio, index: usize) -> Option<(*mut u8, usize)> {
    let planes = if frame.format().is_planar() {
        frame_channels(frame)
    } else {
        1
    };
    if index >= planes {
        return None;
    }
    // SAFETY: `extended_data` holds `planes` pointers for an allocated
    // frame; we check for null before dereferencing.
    unsafe {
        let f = frame.as_ptr();
        let ptrs = (*f).extended_data;
        if ptrs.is_null() {
            return None;
        }
        let plane = *ptrs.add(index);
        if plane.is_null() {
            return None;
        }
        Some((plane, (*f).linesize[0].max(0) as usize))
    }
}

/// Byte view of one audio plane
pub fn plane_bytes(frame: &ffmpeg::util::frame::Audio, index: usize) -> &[u8] {
    match plane_ptr(frame, index) {
        // SAFETY: the plane holds `linesize[0]` bytes owned by `frame`.
        Some((ptr, len)) => unsafe { std::slice::from_raw_parts(ptr, len) },
        None => &[],
    }
}

/// Mutable byte view of one audio plane
pub fn plane_bytes_mut(frame: &mut ffmpeg::util::frame::Audio, index: usize) -> &mut [u8] {
    match plane_ptr(frame, index) {
        // SAFETY: as above; `frame` is borrowed mutably for the slice's life.
        Some((ptr, len)) => unsafe { std::slice::from_raw_parts_mut(ptr, len) },
        None => &mut [],
    }
}

/// Copy the interleaved samples out of a packed F32 frame.
pub fn read_packed_f32(frame: &ffmpeg::util::frame::Audio) -> Vec<f32> {
    let count = frame.samples() * frame_channels(frame);
    plane_bytes(frame, 0)
        .chunks_exact(4)
        .take(count)
        .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Fill a packed F32 frame from interleaved samples.
pub fn write_packed_f32(frame: &mut ffmpeg::util::frame::Audio, samples: &[f32]) {
    let bytes = plane_bytes_mut(frame, 0);
    for (dst, s) in bytes.chunks_exact_mut(4).zip(samples) {
        dst.copy_from_slice(&s.to_ne_bytes());
    }
}

/// Fill one plane of a planar F32 frame.
pub fn write_planar_f32(frame: &mut ffmpeg::util::frame::Audio, index: usize, samples: &[f32]) {
    let bytes = plane_bytes_mut(frame, index);
    for (dst, s) in bytes.chunks_exact_mut(4).zip(samples) {
        dst.copy_from_slice(&s.to_ne_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg_next::util::channel_layout::ChannelLayout;

    #[test]
    fn test_packed_roundtrip() {
        let mut frame = ffmpeg::util::frame::Audio::new(PACKED_F32, 4, ChannelLayout::STEREO);
        let samples = [0.1, -0.1, 0.2, -0.2, 0.3, -0.3, 0.4, -0.4];
        write_packed_f32(&mut frame, &samples);
        assert_eq!(read_packed_f32(&frame), samples.to_vec());
    }

    #[test]
    fn test_planar_planes_are_addressable() {
        let mut frame = ffmpeg::util::frame::Audio::new(PLANAR_F32, 16, ChannelLayout::STEREO);
        assert_eq!(frame_channels(&frame), 2);
        assert!(plane_bytes(&frame, 1).len() >= 16 * 4);
        assert!(plane_bytes(&frame, 2).is_empty());

        write_planar_f32(&mut frame, 1, &[0.5; 16]);
        let right = plane_bytes(&frame, 1);
        assert_eq!(f32::from_ne_bytes([right[0], right[1], right[2], right[3]]), 0.5);
    }
}
