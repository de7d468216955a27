//! HTTP request handlers

use axum::{
    body::Body,
    extract::{Multipart, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

use crate::audio::PcmBuffer;
use crate::error::MixerError;
use crate::mix::MixInputs;
use crate::state::AppState;
use crate::tempo::archive::{build_archive, upload_stem, ARCHIVE_FILENAME};
use crate::tempo::parse_speeds;
use crate::transcode::decode_bytes;

use super::upload::UploadForm;

/// Header listing speed labels that failed, with their errors
pub const FAILED_SPEEDS_HEADER: &str = "x-failed-speeds";

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// HTTP error type
#[derive(Debug)]
pub enum HttpError {
    BadRequest(String),
    TrackNotFound(String),
    Unprocessable(String),
    InternalError(String),
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            HttpError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            HttpError::TrackNotFound(name) => {
                (StatusCode::NOT_FOUND, format!("Track not found: {}", name))
            }
            HttpError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            HttpError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(ErrorBody { detail })).into_response()
    }
}

impl From<MixerError> for HttpError {
    fn from(err: MixerError) -> Self {
        match err {
            MixerError::TrackNotFound(name) => HttpError::TrackNotFound(name),
            MixerError::UnknownSpeed(_) | MixerError::NoSpeeds => {
                HttpError::BadRequest(err.to_string())
            }
            MixerError::Undecodable(_) => HttpError::Unprocessable(err.to_string()),
            _ => HttpError::InternalError(err.to_string()),
        }
    }
}

/// Run blocking codec work off the async executor.
async fn blocking<T, F>(f: F) -> Result<T, HttpError>
where
    F: FnOnce() -> Result<T, MixerError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| HttpError::InternalError(format!("Worker task failed: {}", e)))?
        .map_err(HttpError::from)
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub message: &'static str,
}

/// Health check endpoint
/// GET /
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        message: "Heartbeat mixer API is running.",
    })
}

/// Version endpoint
pub async fn version_check() -> &'static str {
    concat!("heartbeat-mixer v", env!("CARGO_PKG_VERSION"))
}

#[derive(Serialize)]
pub struct TracksResponse {
    pub tracks: Vec<String>,
}

/// Background tracks available for mixing
/// GET /tracks
pub async fn list_tracks(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TracksResponse>, HttpError> {
    let tracks = state.catalog.list()?;
    Ok(Json(TracksResponse { tracks }))
}

/// Mix an uploaded heartbeat over a catalog track with every recipe
/// POST /mix-all  (multipart: picked, track_name)
///
/// Streams one NDJSON record per version as each finishes.
pub async fn mix_all(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Response, HttpError> {
    let mut form = UploadForm::read(multipart).await?;
    let picked = form.take_file("picked")?;
    let track_name = form.text("track_name")?;
    let track_path = state.catalog.resolve(&track_name)?;

    let job_id = Uuid::new_v4().to_string();
    let span = tracing::info_span!("mix_job", job_id = %job_id);
    tracing::info!(
        parent: &span,
        track = %track_name,
        upload = %picked.filename,
        bytes = picked.data.len(),
        "Mix job accepted"
    );

    let audio = state.config.audio.clone();
    let inputs = blocking(move || {
        MixInputs::decode(&picked.data, &picked.filename, &track_path, &audio)
    })
    .instrument(span.clone())
    .await?;

    let records = state
        .pipeline
        .run(inputs, job_id)
        .map(|record| Ok::<_, Infallible>(bytes::Bytes::from(record.to_ndjson())));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(records))
        .map_err(|e| HttpError::InternalError(format!("Response building error: {}", e)))
}

/// Retime an upload to the requested speeds and return a zip
/// POST /adjust-bpm  (multipart: file, speeds)
pub async fn adjust_bpm(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Response, HttpError> {
    let mut form = UploadForm::read(multipart).await?;
    let upload = form.take_file("file")?;
    let labels = parse_speeds(form.texts("speeds"))?;

    let span = tracing::info_span!("tempo_job", job_id = %Uuid::new_v4());
    async move {
        tracing::info!(
            upload = %upload.filename,
            bytes = upload.data.len(),
            speeds = ?labels,
            "Tempo job accepted"
        );

        let stem = upload_stem(&upload.filename);
        let sample_rate = state.config.audio.sample_rate;
        let pcm: PcmBuffer = blocking(move || {
            let pcm = decode_bytes(&upload.data, &upload.filename, sample_rate, 2)?;
            if pcm.is_empty() {
                return Err(MixerError::Undecodable(format!(
                    "{}: no audio samples",
                    upload.filename
                )));
            }
            Ok(pcm)
        })
        .await?;

        let report = state.tempo.run(pcm, &labels).await;
        let failures = report.failure_summary();
        if report.all_failed() {
            return Err(HttpError::InternalError(format!(
                "All speeds failed: {}",
                failures.unwrap_or_default()
            )));
        }

        let archive = build_archive(&stem, &report.outputs)?;
        tracing::info!(
            entries = report.outputs.len(),
            failed = report.failures.len(),
            bytes = archive.len(),
            "Tempo job finished"
        );

        let mut builder = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/zip")
            .header(
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", ARCHIVE_FILENAME),
            );
        if let Some(summary) = failures {
            builder = builder.header(FAILED_SPEEDS_HEADER, header_safe(&summary));
        }
        builder
            .body(Body::from(archive))
            .map_err(|e| HttpError::InternalError(format!("Response building error: {}", e)))
    }
    .instrument(span)
    .await
}

/// Replace anything a header value cannot carry.
fn header_safe(value: &str) -> HeaderValue {
    let cleaned: String = value
        .chars()
        .map(|c| if c == ' ' || c.is_ascii_graphic() { c } else { '?' })
        .collect();
    HeaderValue::from_str(&cleaned).unwrap_or_else(|_| HeaderValue::from_static("unavailable"))
}
