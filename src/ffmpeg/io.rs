//! Custom AVIOContext for in-memory muxing
//!
//! The MP3 muxer writes an ID3 tag and a Xing/LAME info frame in
//! `write_header`, then seeks back in `write_trailer` to patch in the final
//! frame count. [`MemoryWriter`] therefore has to be seekable, and
//! [`MemoryOutput`] keeps the writer, the AVIO context and the format
//! context together so they are torn down in the right order.
//!
//! # Thread safety
//! One `MemoryOutput` per encode, created and consumed on a single blocking
//! thread. FFmpeg can call `seek_packet` from inside `write_packet`, so the
//! writer is a plain `Vec<u8>` rather than anything behind a lock.

use ffmpeg_next as ffmpeg;
use std::ffi::{c_void, CString};
use std::io::{Seek, SeekFrom, Write};
use std::mem::ManuallyDrop;
use std::ptr;

use crate::error::FfmpegError;

const AVIO_BUFFER_SIZE: usize = 4096;
const AVSEEK_SIZE: i32 = 0x10000;

/// Seekable in-memory sink
#[derive(Debug, Default)]
pub struct MemoryWriter {
    buffer: Vec<u8>,
    position: usize,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(64 * 1024),
            position: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let end = self.position + buf.len();
        if end > self.buffer.len() {
            self.buffer.resize(end, 0);
        }
        self.buffer[self.position..end].copy_from_slice(buf);
        self.position = end;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryWriter {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::Current(p) => self.position as i64 + p,
            SeekFrom::End(p) => self.buffer.len() as i64 + p,
        };
        if target < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start of buffer",
            ));
        }
        self.position = target as usize;
        Ok(self.position as u64)
    }
}

unsafe extern "C" fn write_packet(opaque: *mut c_void, buf: *const u8, buf_size: i32) -> i32 {
    let writer = &mut *(opaque as *mut MemoryWriter);
    if buf_size <= 0 {
        return 0;
    }
    let slice = std::slice::from_raw_parts(buf, buf_size as usize);
    match writer.write(slice) {
        Ok(n) => n as i32,
        Err(_) => -1,
    }
}

unsafe extern "C" fn seek_packet(opaque: *mut c_void, offset: i64, whence: i32) -> i64 {
    let writer = &mut *(opaque as *mut MemoryWriter);

    if whence & AVSEEK_SIZE != 0 {
        return writer.len() as i64;
    }

    let pos = match whence {
        0 => SeekFrom::Start(offset.max(0) as u64),
        1 => SeekFrom::Current(offset),
        2 => SeekFrom::End(offset),
        _ => return -1,
    };
    match writer.seek(pos) {
        Ok(p) => p as i64,
        Err(_) => -1,
    }
}

/// Output format context writing into a [`MemoryWriter`]
pub struct MemoryOutput {
    output: ManuallyDrop<ffmpeg::format::context::Output>,
    avio: *mut ffmpeg::ffi::AVIOContext,
    writer: Box<MemoryWriter>,
}

impl MemoryOutput {
    /// Allocate an output context for the named muxer (e.g. `"mp3"`).
    pub fn new(format: &str) -> Result<Self, FfmpegError> {
        let format_name =
            CString::new(format).map_err(|e| FfmpegError::MuxerCreate(e.to_string()))?;
        let filename = CString::new(format!("memory.{}", format))
            .map_err(|e| FfmpegError::MuxerCreate(e.to_string()))?;

        let mut writer = Box::new(MemoryWriter::new());
        let writer_ptr: *mut MemoryWriter = &mut *writer;

        // SAFETY: every pointer allocated here is either handed to the
        // returned `MemoryOutput` or freed on the error path. `writer_ptr`
        // points into a Box that lives as long as the AVIO context.
        unsafe {
            let buffer = ffmpeg::ffi::av_malloc(AVIO_BUFFER_SIZE) as *mut u8;
            if buffer.is_null() {
                return Err(FfmpegError::MuxerCreate(
                    "Failed to allocate AVIO buffer".to_string(),
                ));
            }

            let mut avio = ffmpeg::ffi::avio_alloc_context(
                buffer,
                AVIO_BUFFER_SIZE as i32,
                1,
                writer_ptr as *mut c_void,
                None,
                Some(write_packet),
                Some(seek_packet),
            );
            if avio.is_null() {
                ffmpeg::ffi::av_free(buffer as *mut c_void);
                return Err(FfmpegError::MuxerCreate(
                    "Failed to allocate AVIO context".to_string(),
                ));
            }

            let mut ctx: *mut ffmpeg::ffi::AVFormatContext = ptr::null_mut();
            let ret = ffmpeg::ffi::avformat_alloc_output_context2(
                &mut ctx,
                ptr::null_mut(),
                format_name.as_ptr(),
                filename.as_ptr(),
            );
            if ret < 0 || ctx.is_null() {
                ffmpeg::ffi::av_freep(&mut (*avio).buffer as *mut *mut u8 as *mut c_void);
                ffmpeg::ffi::avio_context_free(&mut avio);
                return Err(FfmpegError::MuxerCreate(format!(
                    "No muxer for format '{}'",
                    format
                )));
            }

            (*ctx).pb = avio;
            (*ctx).flags |= ffmpeg::ffi::AVFMT_FLAG_CUSTOM_IO;

            Ok(Self {
                output: ManuallyDrop::new(ffmpeg::format::context::Output::wrap(ctx)),
                avio,
                writer,
            })
        }
    }

    pub fn output(&mut self) -> &mut ffmpeg::format::context::Output {
        &mut self.output
    }

    /// Bytes written so far. Call after `write_trailer`.
    pub fn into_bytes(mut self) -> Vec<u8> {
        std::mem::take(&mut self.writer.buffer)
    }
}

impl Drop for MemoryOutput {
    fn drop(&mut self) {
        // SAFETY: detach `pb` so `Output`'s drop does not try to close a URL
        // context it does not own, then free the AVIO context ourselves. The
        // writer Box is dropped after this, once nothing references it.
        unsafe {
            let ctx = self.output.as_mut_ptr();
            if !ctx.is_null() {
                (*ctx).pb = ptr::null_mut();
            }
            ManuallyDrop::drop(&mut self.output);

            if !self.avio.is_null() {
                ffmpeg::ffi::av_freep(&mut (*self.avio).buffer as *mut *mut u8 as *mut c_void);
                ffmpeg::ffi::avio_context_free(&mut self.avio);
            }
        }
    }
}
