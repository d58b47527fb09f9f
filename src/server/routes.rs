// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! HTTP 路由
//! Status, MJPEG streams, camera control and the incident recording library

use super::error::ApiError;
use super::state::AppState;
use crate::analysis::{derive_status, StatusView};
use crate::pipeline::{CameraInfo, EncodedFrame};
use crate::CameraId;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use bytes::BytesMut;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::SeekFrom;
use std::time::SystemTime;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tokio_util::io::ReaderStream;

/// 录像分块大小
const CHUNK_SIZE: usize = 1024 * 1024;

/// 同时挂载在根路径与 `/api` 下
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/camera/:id/status_full", get(status_full))
        .route("/camera/:id/accident", put(set_accident))
        .route("/cam/:id/stream", get(stream_full))
        .route("/cam/:id/stream_low", get(stream_low))
        .route("/cam/:id/start", post(start_camera))
        .route("/cam/:id/stop", post(stop_camera))
        .route("/cameras", get(list_cameras))
        .route("/recordings", get(list_recordings))
        .route("/recordings/:filename", get(download_recording))
        .route("/recordings/stream/:filename", get(stream_recording))
        .route("/health", get(health));

    Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .with_state(state)
}

// ========== 状态 ==========

async fn status_full(
    State(state): State<AppState>,
    Path(id): Path<CameraId>,
) -> Result<Json<StatusView>, ApiError> {
    let handle = state.manager.camera(id)?;
    let snapshot = handle.snapshot();
    Ok(Json(derive_status(
        &snapshot,
        handle.status(),
        handle.accident(),
        &state.manager.config().status,
        SystemTime::now(),
    )))
}

#[derive(Debug, Deserialize)]
struct AccidentBody {
    active: bool,
}

async fn set_accident(
    State(state): State<AppState>,
    Path(id): Path<CameraId>,
    Json(body): Json<AccidentBody>,
) -> Result<Json<Value>, ApiError> {
    let handle = state.manager.camera(id)?;
    handle.set_accident(body.active);
    tracing::info!(camera = id, "🚨 事故标志: {}", body.active);
    Ok(Json(json!({ "camera": id, "accident_flag": body.active })))
}

async fn list_cameras(State(state): State<AppState>) -> Json<Vec<CameraInfo>> {
    Json(state.manager.list())
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let running = state.manager.cameras().filter(|c| c.is_running()).count();
    Json(json!({
        "status": "ok",
        "cameras": state.manager.len(),
        "running": running,
        "inference": state.manager.engine().stats(),
    }))
}

// ========== 摄像头控制 ==========

/// 启动会 spawn 线程并持有生命周期锁, 放到阻塞线程池
async fn ensure_started(state: &AppState, id: CameraId) -> Result<bool, ApiError> {
    let manager = state.manager.clone();
    Ok(tokio::task::spawn_blocking(move || manager.start(id)).await??)
}

async fn start_camera(
    State(state): State<AppState>,
    Path(id): Path<CameraId>,
) -> Result<Json<Value>, ApiError> {
    let started = ensure_started(&state, id).await?;
    Ok(Json(json!({ "camera": id, "started": started })))
}

async fn stop_camera(
    State(state): State<AppState>,
    Path(id): Path<CameraId>,
) -> Result<Json<Value>, ApiError> {
    let manager = state.manager.clone();
    let stopped = tokio::task::spawn_blocking(move || manager.stop(id)).await??;
    Ok(Json(json!({
        "status": format!("camera {} stopped", id),
        "stopped": stopped,
    })))
}

// ========== MJPEG 流 ==========

async fn stream_full(State(state): State<AppState>, Path(id): Path<CameraId>) -> Result<Response, ApiError> {
    stream_camera(state, id, false).await
}

async fn stream_low(State(state): State<AppState>, Path(id): Path<CameraId>) -> Result<Response, ApiError> {
    stream_camera(state, id, true).await
}

/// 先订阅再启动, 不错过第一帧
async fn stream_camera(state: AppState, id: CameraId, low: bool) -> Result<Response, ApiError> {
    let handle = state.manager.camera(id)?;
    let rx = if low {
        handle.low_hub().subscribe()
    } else {
        handle.full_hub().subscribe()
    };
    ensure_started(&state, id).await?;
    tracing::debug!(camera = id, low, "📺 新观众接入");
    Ok(mjpeg_response(rx))
}

fn mjpeg_response(rx: broadcast::Receiver<EncodedFrame>) -> Response {
    // 落后的观众跳过被覆盖的帧
    let stream = BroadcastStream::new(rx)
        .filter_map(|result| result.ok())
        .map(|frame| {
            let mut buf = BytesMut::with_capacity(frame.len() + 96);
            buf.extend_from_slice(b"--frame\r\n");
            buf.extend_from_slice(b"Content-Type: image/jpeg\r\n");
            buf.extend_from_slice(format!("Content-Length: {}\r\n\r\n", frame.len()).as_bytes());
            buf.extend_from_slice(&frame);
            buf.extend_from_slice(b"\r\n");
            Ok::<_, std::io::Error>(buf.freeze())
        });

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "multipart/x-mixed-replace; boundary=frame"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

// ========== 录像库 ==========

async fn list_recordings(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let library = state.library.clone();
    let names = tokio::task::spawn_blocking(move || library.list()).await??;
    Ok(Json(json!({ "recordings": names })))
}

fn content_type(filename: &str) -> &'static str {
    match filename.rsplit('.').next() {
        Some("mp4") => "video/mp4",
        Some("avi") => "video/x-msvideo",
        Some("mjpeg") => "video/x-motion-jpeg",
        _ => "application/octet-stream",
    }
}

async fn download_recording(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    let path = state.library.resolve(&filename)?;
    let file = tokio::fs::File::open(&path).await?;
    let len = file.metadata().await?.len();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type(&filename))
        .header(header::CONTENT_LENGTH, len)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        )
        .body(Body::from_stream(ReaderStream::with_capacity(file, CHUNK_SIZE)))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// 解析 `Range: bytes=a-b` / `bytes=a-` / `bytes=-n`
///
/// 返回闭区间; `None` 表示忽略 (非 bytes 单位 / 多段 / 格式错误), 返回整个文件
pub fn parse_range(value: &str, len: u64) -> Result<Option<(u64, u64)>, ApiError> {
    let Some(ranges) = value.trim().strip_prefix("bytes=") else {
        return Ok(None);
    };
    if ranges.contains(',') {
        return Ok(None);
    }
    let Some((first, last)) = ranges.split_once('-') else {
        return Ok(None);
    };
    let (first, last) = (first.trim(), last.trim());
    let unsatisfiable = ApiError::RangeNotSatisfiable { len };

    if first.is_empty() {
        // 后缀: 最后 n 字节
        let Ok(n) = last.parse::<u64>() else {
            return Ok(None);
        };
        if n == 0 || len == 0 {
            return Err(unsatisfiable);
        }
        return Ok(Some((len.saturating_sub(n), len - 1)));
    }

    let Ok(start) = first.parse::<u64>() else {
        return Ok(None);
    };
    if start >= len {
        return Err(unsatisfiable);
    }
    let end = if last.is_empty() {
        len - 1
    } else {
        match last.parse::<u64>() {
            Ok(end) if end >= start => end.min(len - 1),
            Ok(_) => return Err(unsatisfiable),
            Err(_) => return Ok(None),
        }
    };
    Ok(Some((start, end)))
}

async fn stream_recording(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let path = state.library.resolve(&filename)?;
    let mut file = tokio::fs::File::open(&path).await?;
    let len = file.metadata().await?.len();

    let range = match headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        Some(value) => parse_range(value, len)?,
        None => None,
    };

    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, content_type(&filename))
        .header(header::ACCEPT_RANGES, "bytes");

    let (start, count) = match range {
        Some((start, end)) => {
            builder = builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_RANGE, format!("bytes {}-{}/{}", start, end, len));
            (start, end - start + 1)
        }
        None => {
            builder = builder.status(StatusCode::OK);
            (0, len)
        }
    };

    if start > 0 {
        file.seek(SeekFrom::Start(start)).await?;
    }
    let stream = ReaderStream::with_capacity(file.take(count), CHUNK_SIZE);

    builder
        .header(header::CONTENT_LENGTH, count)
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::Internal(e.to_string()))
}
