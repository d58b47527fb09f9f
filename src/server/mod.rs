// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// HTTP 接口 (axum)
///
/// - state:  路由共享状态
/// - routes: 状态 / 视频流 / 摄像头控制 / 录像库
/// - error:  `{"detail": ...}` 错误响应
pub mod error;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::router;
pub use state::AppState;

use crate::pipeline::CameraManager;
use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// 监听并服务, `shutdown` 完成后优雅退出
pub async fn serve<F>(manager: Arc<CameraManager>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let server = &manager.config().server;
    let addr: SocketAddr = format!("{}:{}", server.host, server.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", server.host, server.port))?;

    let app = router(AppState::new(manager.clone()));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("🌐 HTTP 服务监听 http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(stop_cameras_on(manager, shutdown))
        .await
        .context("http server error")
}

/// 收到退出信号后先停摄像头, MJPEG 长连接随之结束, 优雅退出才能完成
async fn stop_cameras_on<F>(manager: Arc<CameraManager>, shutdown: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    shutdown.await;
    info!("⏹️ 停止所有摄像头");
    if let Err(e) = tokio::task::spawn_blocking(move || manager.stop_all()).await {
        tracing::error!("❌ 停止摄像头失败: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::engine::mock::ScriptedEngine;
    use crate::detection::SharedEngine;
    use crate::input::source::mock::SyntheticFactory;
    use crate::{CameraConfig, Config};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::oneshot;

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_with_attached_viewer() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.server.host = "127.0.0.1".into();
        cfg.server.port = free_port();
        cfg.stream.width = 64;
        cfg.stream.height = 48;
        cfg.recording.incident_dir = dir.path().join("incidents");
        cfg.recording.output_dir = dir.path().join("out");
        cfg.recording.clip_format = crate::config::ClipFormat::Mjpeg;
        cfg.cameras = vec![CameraConfig {
            id: 1,
            source: "synthetic".into(),
            name: None,
            fps: None,
        }];
        let port = cfg.server.port;
        let manager = Arc::new(CameraManager::new(
            Arc::new(cfg),
            SharedEngine::new(Box::new(ScriptedEngine::new(vec![]))),
            Arc::new(SyntheticFactory::default()),
        ));

        let (fire, signal) = oneshot::channel::<()>();
        let server = tokio::spawn(serve(manager.clone(), async move {
            let _ = signal.await;
        }));

        let mut conn = None;
        for _ in 0..50 {
            if let Ok(c) = tokio::net::TcpStream::connect(("127.0.0.1", port)).await {
                conn = Some(c);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let mut conn = conn.expect("server did not start");
        conn.write_all(b"GET /cam/1/stream HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut head = vec![0u8; 256];
        let n = conn.read(&mut head).await.unwrap();
        let head = String::from_utf8_lossy(&head[..n]);
        assert!(head.starts_with("HTTP/1.1 200"));
        assert!(manager.camera(1).unwrap().is_running());

        fire.send(()).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("server did not drain after shutdown");
        assert!(result.unwrap().is_ok());
        assert!(!manager.camera(1).unwrap().is_running());
    }
}
