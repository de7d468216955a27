//! Zip packaging of retimed outputs

use std::io::{Cursor, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::Result;

use super::SpeedLabel;

/// Name of the archive offered to the client
pub const ARCHIVE_FILENAME: &str = "adjusted_bpm.zip";

const FALLBACK_STEM: &str = "audio";

/// Base name of an uploaded file, without directories or extension.
pub fn upload_stem(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or_default();
    Path::new(base)
        .file_stem()
        .and_then(|s| s.to_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(FALLBACK_STEM)
        .to_string()
}

pub fn entry_name(stem: &str, label: SpeedLabel) -> String {
    format!("{}_{}.mp3", stem, label.as_str().to_lowercase())
}

/// Store each output as `<stem>_<label>.mp3`, in the order given.
///
/// MP3 does not compress further, so entries are stored uncompressed.
pub fn build_archive(stem: &str, outputs: &[(SpeedLabel, Vec<u8>)]) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    for (label, bytes) in outputs {
        zip.start_file(entry_name(stem, *label), options)?;
        zip.write_all(bytes)?;
    }

    Ok(zip.finish()?.into_inner())
}
