// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
use crate::pipeline::CameraManager;
use crate::recording::RecordingLibrary;
use std::sync::Arc;

/// 路由共享状态
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<CameraManager>,
    pub library: RecordingLibrary,
}

impl AppState {
    pub fn new(manager: Arc<CameraManager>) -> Self {
        let library = RecordingLibrary::new(manager.config().recording.incident_dir.clone());
        Self { manager, library }
    }
}
