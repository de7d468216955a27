//! End-to-end router tests
//!
//! Requests go through the full router (multipart extraction, catalog,
//! decoding, job runners, response framing). Recipes and the retimer are
//! swapped for fakes except in the tests that need a real MP3 encoder.

use std::io::Cursor;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use base64::Engine;
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use crate::audio::PcmBuffer;
use crate::config::ServerConfig;
use crate::error::{MixerError, Result};
use crate::http::create_router;
use crate::integration::fixtures::{
    catalog_dir, heartbeat_pcm, pcm_wav_bytes, sine_wav_bytes, MultipartBody,
};
use crate::mix::{MixInputs, MixPipeline, MixRecipe};
use crate::state::AppState;
use crate::tempo::{Retimer, SpeedLabel, TempoJob};
use crate::transcode::is_mp3_encoder_available;

/// Writes the frame counts of both inputs, or fails on demand
struct CountingRecipe {
    version: &'static str,
    fail: bool,
}

impl MixRecipe for CountingRecipe {
    fn version(&self) -> &'static str {
        self.version
    }

    fn render(&self, inputs: &MixInputs, _cancel: &CancellationToken) -> Result<Vec<u8>> {
        if self.fail {
            return Err(MixerError::Worker(format!("{} exploded", self.version)));
        }
        Ok(format!("{}:{}", inputs.foreground.frames(), inputs.background.frames()).into_bytes())
    }
}

/// Returns the label name as the "encoded" file; `Fast` optionally fails
struct LabelRetimer {
    fail_fast: bool,
    fail_all: bool,
}

impl Retimer for LabelRetimer {
    fn retime(&self, _pcm: &PcmBuffer, label: SpeedLabel) -> Result<Vec<u8>> {
        if self.fail_all || (self.fail_fast && label == SpeedLabel::Fast) {
            return Err(MixerError::Worker(format!("cannot retime {}", label)));
        }
        Ok(label.as_str().as_bytes().to_vec())
    }
}

fn fake_pipeline(failing: Option<&'static str>) -> MixPipeline {
    MixPipeline::new(
        ["v1", "v2", "v3", "v4"]
            .into_iter()
            .map(|version| {
                Arc::new(CountingRecipe {
                    version,
                    fail: Some(version) == failing,
                }) as Arc<dyn MixRecipe>
            })
            .collect(),
    )
}

fn router_with(tracks_dir: &std::path::Path, pipeline: MixPipeline, tempo: TempoJob) -> Router {
    crate::ffmpeg::init().unwrap();
    let config = ServerConfig {
        tracks_dir: tracks_dir.to_path_buf(),
        ..ServerConfig::default()
    };
    create_router(Arc::new(AppState::with_jobs(config, pipeline, tempo)))
}

fn fake_router(tracks_dir: &std::path::Path) -> Router {
    router_with(
        tracks_dir,
        fake_pipeline(None),
        TempoJob::new(Arc::new(LabelRetimer {
            fail_fast: false,
            fail_all: false,
        })),
    )
}

fn multipart_request(uri: &str, form: MultipartBody) -> Request<Body> {
    let (content_type, body) = form.finish();
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

async fn ndjson_lines(response: Response) -> Vec<serde_json::Value> {
    let body = body_bytes(response).await;
    String::from_utf8(body)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn zip_entries(bytes: Vec<u8>) -> Vec<(String, Vec<u8>)> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    (0..archive.len())
        .map(|i| {
            let mut entry = archive.by_index(i).unwrap();
            let mut data = Vec::new();
            std::io::Read::read_to_end(&mut entry, &mut data).unwrap();
            (entry.name().to_string(), data)
        })
        .collect()
}

fn heartbeat_wav() -> Vec<u8> {
    pcm_wav_bytes(&heartbeat_pcm(44100, 1, 72.0, 4.0))
}

#[tokio::test]
async fn test_health_endpoint() {
    let dir = catalog_dir();
    let response = fake_router(dir.path())
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["message"], "Heartbeat mixer API is running.");
}

#[tokio::test]
async fn test_tracks_lists_supported_files() {
    let dir = catalog_dir();
    let response = fake_router(dir.path())
        .oneshot(Request::get("/tracks").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["tracks"], serde_json::json!(["broken.mp3", "calm.wav"]));
}

#[tokio::test]
async fn test_tracks_missing_directory_is_server_error() {
    let dir = tempfile::tempdir().unwrap();
    let response = fake_router(&dir.path().join("gone"))
        .oneshot(Request::get("/tracks").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body_json(response).await["detail"].is_string());
}

#[tokio::test]
async fn test_mix_all_requires_both_fields() {
    let dir = catalog_dir();
    let app = fake_router(dir.path());

    let no_file = MultipartBody::new().text("track_name", "calm.wav");
    let response = app
        .clone()
        .oneshot(multipart_request("/mix-all", no_file))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let no_track = MultipartBody::new().file("picked", "beat.wav", &heartbeat_wav());
    let response = app
        .oneshot(multipart_request("/mix-all", no_track))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_mix_all_unknown_track() {
    let dir = catalog_dir();
    let form = MultipartBody::new()
        .file("picked", "beat.wav", &heartbeat_wav())
        .text("track_name", "nope.mp3");
    let response = fake_router(dir.path())
        .oneshot(multipart_request("/mix-all", form))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["detail"], "Track not found: nope.mp3");
}

#[tokio::test]
async fn test_mix_all_rejects_path_traversal() {
    let dir = catalog_dir();
    let form = MultipartBody::new()
        .file("picked", "beat.wav", &heartbeat_wav())
        .text("track_name", "../calm.wav");
    let response = fake_router(dir.path())
        .oneshot(multipart_request("/mix-all", form))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_mix_all_undecodable_upload() {
    let dir = catalog_dir();
    let form = MultipartBody::new()
        .file("picked", "beat.wav", b"definitely not audio")
        .text("track_name", "calm.wav");
    let response = fake_router(dir.path())
        .oneshot(multipart_request("/mix-all", form))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_mix_all_unreadable_track() {
    let dir = catalog_dir();
    let form = MultipartBody::new()
        .file("picked", "beat.wav", &heartbeat_wav())
        .text("track_name", "broken.mp3");
    let response = fake_router(dir.path())
        .oneshot(multipart_request("/mix-all", form))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_mix_all_streams_versions_in_order() {
    let dir = catalog_dir();
    let app = router_with(
        dir.path(),
        fake_pipeline(Some("v2")),
        TempoJob::new(Arc::new(LabelRetimer {
            fail_fast: false,
            fail_all: false,
        })),
    );
    let form = MultipartBody::new()
        .file("picked", "beat.wav", &heartbeat_wav())
        .text("track_name", "calm.wav");
    let response = app
        .oneshot(multipart_request("/mix-all", form))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/x-ndjson"
    );
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");

    let lines = ndjson_lines(response).await;
    let versions: Vec<_> = lines.iter().map(|l| l["version"].as_str().unwrap()).collect();
    assert_eq!(versions, ["v1", "v2", "v3", "v4"]);

    let progress: Vec<_> = lines.iter().map(|l| l["progress"].as_str().unwrap()).collect();
    assert_eq!(progress, ["1/4", "2/4", "3/4", "4/4"]);

    // A failing version does not stop the others
    assert_eq!(lines[1]["status"], "failed");
    assert!(lines[1]["error"].as_str().unwrap().contains("v2 exploded"));
    assert!(lines[1].get("data").is_none());

    for line in [&lines[0], &lines[2], &lines[3]] {
        assert_eq!(line["status"], "done");
        let data = base64::engine::general_purpose::STANDARD
            .decode(line["data"].as_str().unwrap())
            .unwrap();
        // 4s heartbeat against the 3s catalog track, both at 44.1kHz
        let text = String::from_utf8(data).unwrap();
        let (fg, bg) = text.split_once(':').unwrap();
        let (fg, bg): (f64, f64) = (fg.parse().unwrap(), bg.parse().unwrap());
        assert!((fg / 44100.0 - 4.0).abs() < 0.05, "foreground frames = {}", fg);
        assert!((bg / 44100.0 - 3.0).abs() < 0.05, "background frames = {}", bg);
    }
}

#[tokio::test]
async fn test_adjust_bpm_rejects_bad_input() {
    let dir = catalog_dir();
    let app = fake_router(dir.path());

    let unknown = MultipartBody::new()
        .file("file", "beat.wav", &heartbeat_wav())
        .text("speeds", "Slow,Turbo");
    let response = app
        .clone()
        .oneshot(multipart_request("/adjust-bpm", unknown))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["detail"]
        .as_str()
        .unwrap()
        .contains("Turbo"));

    let no_file = MultipartBody::new().text("speeds", "Slow");
    let response = app
        .clone()
        .oneshot(multipart_request("/adjust-bpm", no_file))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let blank = MultipartBody::new()
        .file("file", "beat.wav", &heartbeat_wav())
        .text("speeds", " , ");
    let response = app
        .clone()
        .oneshot(multipart_request("/adjust-bpm", blank))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let garbage = MultipartBody::new()
        .file("file", "beat.wav", b"garbage")
        .text("speeds", "Slow");
    let response = app
        .oneshot(multipart_request("/adjust-bpm", garbage))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_adjust_bpm_returns_archive() {
    let dir = catalog_dir();
    let form = MultipartBody::new()
        .file("file", "My Beat.wav", &sine_wav_bytes(22050, 1, 440.0, 1.0))
        .text("speeds", "fast, Slow,Slow");
    let response = fake_router(dir.path())
        .oneshot(multipart_request("/adjust-bpm", form))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"adjusted_bpm.zip\""
    );
    assert!(response.headers().get("x-failed-speeds").is_none());

    let entries = zip_entries(body_bytes(response).await);
    assert_eq!(
        entries,
        vec![
            ("My Beat_slow.mp3".to_string(), b"Slow".to_vec()),
            ("My Beat_fast.mp3".to_string(), b"Fast".to_vec()),
        ]
    );
}

#[tokio::test]
async fn test_adjust_bpm_partial_failure() {
    let dir = catalog_dir();
    let app = router_with(
        dir.path(),
        fake_pipeline(None),
        TempoJob::new(Arc::new(LabelRetimer {
            fail_fast: true,
            fail_all: false,
        })),
    );
    let form = MultipartBody::new()
        .file("file", "beat.wav", &heartbeat_wav())
        .text("speeds", "Slow")
        .text("speeds", "Fast");
    let response = app
        .oneshot(multipart_request("/adjust-bpm", form))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let failed = response.headers()["x-failed-speeds"].to_str().unwrap().to_string();
    assert!(failed.starts_with("Fast:"), "header = {}", failed);

    let names: Vec<_> = zip_entries(body_bytes(response).await)
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(names, ["beat_slow.mp3"]);
}

#[tokio::test]
async fn test_adjust_bpm_all_failed() {
    let dir = catalog_dir();
    let app = router_with(
        dir.path(),
        fake_pipeline(None),
        TempoJob::new(Arc::new(LabelRetimer {
            fail_fast: false,
            fail_all: true,
        })),
    );
    let form = MultipartBody::new()
        .file("file", "beat.wav", &heartbeat_wav())
        .text("speeds", "Slow,Normal");
    let response = app
        .oneshot(multipart_request("/adjust-bpm", form))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let detail = body_json(response).await["detail"].as_str().unwrap().to_string();
    assert!(detail.contains("Slow") && detail.contains("Normal"), "{}", detail);
}

#[tokio::test]
async fn test_full_mix_with_real_recipes() {
    crate::ffmpeg::init().unwrap();
    if !is_mp3_encoder_available() {
        return;
    }
    let dir = catalog_dir();
    let config = ServerConfig {
        tracks_dir: dir.path().to_path_buf(),
        ..ServerConfig::default()
    };
    let app = create_router(Arc::new(AppState::new(config)));

    let form = MultipartBody::new()
        .file("picked", "beat.wav", &heartbeat_wav())
        .text("track_name", "calm.wav");
    let response = app
        .oneshot(multipart_request("/mix-all", form))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let lines = ndjson_lines(response).await;
    assert_eq!(lines.len(), 4);
    for line in &lines {
        assert_eq!(line["status"], "done", "{}", line);
        let mp3 = base64::engine::general_purpose::STANDARD
            .decode(line["data"].as_str().unwrap())
            .unwrap();
        let decoded = crate::transcode::decode_bytes(&mp3, "mix.mp3", 44100, 2).unwrap();
        assert!(decoded.frames() > 0);
    }
}

#[tokio::test]
async fn test_full_tempo_with_real_retimer() {
    crate::ffmpeg::init().unwrap();
    if !is_mp3_encoder_available() {
        return;
    }
    let dir = catalog_dir();
    let config = ServerConfig {
        tracks_dir: dir.path().to_path_buf(),
        ..ServerConfig::default()
    };
    let app = create_router(Arc::new(AppState::new(config)));

    let form = MultipartBody::new()
        .file("file", "beat.wav", &sine_wav_bytes(44100, 2, 440.0, 2.0))
        .text("speeds", "Slow,Fast");
    let response = app
        .oneshot(multipart_request("/adjust-bpm", form))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let entries = zip_entries(body_bytes(response).await);
    assert_eq!(entries.len(), 2);
    let lengths: Vec<f64> = entries
        .iter()
        .map(|(name, data)| {
            crate::transcode::decode_bytes(data, name, 44100, 2)
                .unwrap()
                .duration_secs()
        })
        .collect();
    // Slow stretches, fast compresses
    assert!((lengths[0] - 2.5).abs() < 0.2, "slow = {}", lengths[0]);
    assert!((lengths[1] - 2.0 / 1.2).abs() < 0.2, "fast = {}", lengths[1]);
}
