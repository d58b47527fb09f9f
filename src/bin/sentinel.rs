// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 交通哨兵 (Traffic Sentinel)
///
/// 多路交通安全视频分析服务
///
/// 系统架构:
/// 1. 采集线程: 每路摄像头一个, 解码并循环播放视频源
/// 2. 处理线程: 每路摄像头一个, 共享检测引擎 (串行推理)
/// 3. tokio:    HTTP 状态接口 / MJPEG 视频流 / 录像库
use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use traffic_sentinel::detection::SharedEngine;
use traffic_sentinel::input::DefaultSourceFactory;
use traffic_sentinel::{server, Args, CameraManager, Config};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const DEFAULT_LOG_FILTER: &str = "traffic_sentinel=info,ort=warn";

fn init_logging(args: &Args) {
    let filter = match &args.log {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(feature = "onnx")]
fn build_engine(config: &Config) -> Result<SharedEngine> {
    let engine = traffic_sentinel::detection::YoloTrackingEngine::new(&config.detection)
        .with_context(|| format!("failed to load model {}", config.detection.model))?;
    Ok(SharedEngine::new(Box::new(engine)))
}

#[cfg(not(feature = "onnx"))]
fn build_engine(_config: &Config) -> Result<SharedEngine> {
    anyhow::bail!("built without the `onnx` feature: no detection engine available")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("⚠️ 无法监听 Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("🛑 收到退出信号");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    info!("🚀 交通哨兵启动");

    let mut config = Config::load_or_default(&args.config)?;
    config.apply_args(&args);
    config.validate()?;
    info!(
        "✓ 配置已加载: {} 路摄像头, 目标分辨率 {}x{}",
        config.cameras.len(),
        config.stream.width,
        config.stream.height
    );
    if config.cameras.is_empty() {
        warn!("⚠️ 未配置任何摄像头, 仅提供录像库接口");
    }
    for cam in &config.cameras {
        info!("📹 cam{}: {}", cam.id, cam.source);
    }

    let engine = build_engine(&config)?;
    info!("✓ 检测引擎就绪: {}", engine.stats().engine);

    let factory = Arc::new(DefaultSourceFactory {
        default_fps: config.stream.default_fps,
    });
    let manager = Arc::new(CameraManager::new(Arc::new(config), engine, factory));

    let result = server::serve(manager.clone(), shutdown_signal()).await;

    // 正常退出时摄像头已在关闭信号中停止, 这里兜底 serve 出错的情况
    let stopper = manager.clone();
    tokio::task::spawn_blocking(move || stopper.stop_all())
        .await
        .context("failed to stop cameras")?;
    info!("👋 已退出");

    result
}
