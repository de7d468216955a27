//! Multipart form collection
//!
//! Both job endpoints take a small multipart form: one audio file plus a
//! few text fields. The whole form is read into memory (bounded by the
//! router's body limit) before any validation happens.

use std::collections::HashMap;

use axum::extract::Multipart;
use bytes::Bytes;

use super::handlers::HttpError;

/// One uploaded file
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub data: Bytes,
}

/// Files and text values of a multipart form, keyed by field name
#[derive(Debug, Default)]
pub struct UploadForm {
    files: HashMap<String, Upload>,
    texts: HashMap<String, Vec<String>>,
}

impl UploadForm {
    pub async fn read(mut multipart: Multipart) -> Result<Self, HttpError> {
        let mut form = UploadForm::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| HttpError::BadRequest(format!("Malformed multipart body: {}", e)))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            match field.file_name().map(str::to_string) {
                Some(filename) => {
                    let data = field.bytes().await.map_err(|e| {
                        HttpError::BadRequest(format!("Failed to read field '{}': {}", name, e))
                    })?;
                    tracing::debug!(field = %name, %filename, bytes = data.len(), "Received upload");
                    form.files.insert(name, Upload { filename, data });
                }
                None => {
                    let text = field.text().await.map_err(|e| {
                        HttpError::BadRequest(format!("Failed to read field '{}': {}", name, e))
                    })?;
                    form.texts.entry(name).or_default().push(text);
                }
            }
        }

        Ok(form)
    }

    /// Take the file uploaded as `name`.
    pub fn take_file(&mut self, name: &str) -> Result<Upload, HttpError> {
        self.files
            .remove(name)
            .ok_or_else(|| HttpError::BadRequest(format!("Missing file field '{}'", name)))
    }

    /// First non-blank value of text field `name`.
    pub fn text(&self, name: &str) -> Result<String, HttpError> {
        self.texts
            .get(name)
            .and_then(|values| values.iter().map(|v| v.trim()).find(|v| !v.is_empty()))
            .map(str::to_string)
            .ok_or_else(|| HttpError::BadRequest(format!("Missing field '{}'", name)))
    }

    /// Every value submitted for text field `name`
    pub fn texts(&self, name: &str) -> &[String] {
        self.texts.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}
