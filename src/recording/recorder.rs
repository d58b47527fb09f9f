// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 事件录像状态机
//! Incident recorder: Idle / Recording with a grace window

use super::writer::{ClipOpener, ClipWriter};
use crate::CameraId;
use anyhow::Result;
use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
}

/// 单帧处理结果
#[derive(Debug, PartialEq)]
pub enum RecorderEvent {
    None,
    Started(PathBuf),
    Stopped { path: PathBuf, frames: u64 },
    /// I/O 失败, 已回到 Idle
    Failed,
}

pub struct IncidentRecorder {
    camera: CameraId,
    dir: PathBuf,
    grace_frames: u32,
    /// 打开失败后的重试间隔 (帧)
    retry_after: u32,
    opener: Box<dyn ClipOpener>,
    writer: Option<Box<dyn ClipWriter>>,
    absent_cycles: u32,
    retry_cooldown: u32,
}

impl IncidentRecorder {
    pub fn new(
        camera: CameraId,
        dir: impl Into<PathBuf>,
        grace_frames: u32,
        retry_after: u32,
        opener: Box<dyn ClipOpener>,
    ) -> Self {
        Self {
            camera,
            dir: dir.into(),
            grace_frames,
            retry_after,
            opener,
            writer: None,
            absent_cycles: 0,
            retry_cooldown: 0,
        }
    }

    pub fn state(&self) -> RecorderState {
        if self.writer.is_some() {
            RecorderState::Recording
        } else {
            RecorderState::Idle
        }
    }

    pub fn current_path(&self) -> Option<&Path> {
        self.writer.as_ref().map(|w| w.path())
    }

    /// 每个处理周期调用一次, `frame` 为未标注的原始帧
    pub fn on_frame(&mut self, incident: bool, frame: &RgbImage) -> RecorderEvent {
        let mut event = RecorderEvent::None;

        if incident {
            self.absent_cycles = 0;
            if self.writer.is_none() {
                if self.retry_cooldown > 0 {
                    self.retry_cooldown -= 1;
                    return RecorderEvent::None;
                }
                match self.open_clip() {
                    Ok(writer) => {
                        info!(camera = self.camera, "🎬 开始录制事件: {}", writer.path().display());
                        event = RecorderEvent::Started(writer.path().to_path_buf());
                        self.writer = Some(writer);
                    }
                    Err(e) => {
                        error!(camera = self.camera, "❌ 事件录像创建失败: {:#}", e);
                        self.retry_cooldown = self.retry_after;
                        return RecorderEvent::Failed;
                    }
                }
            }
        } else {
            if self.writer.is_none() {
                return RecorderEvent::None;
            }
            self.absent_cycles += 1;
            if self.absent_cycles > self.grace_frames {
                return self.close();
            }
        }

        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.write_frame(frame) {
                error!(camera = self.camera, "❌ 事件录像写入失败: {:#}", e);
                if let Some(writer) = self.writer.take() {
                    if let Err(e) = writer.finish() {
                        warn!(camera = self.camera, "⚠️ 关闭录像失败: {:#}", e);
                    }
                }
                self.absent_cycles = 0;
                return RecorderEvent::Failed;
            }
        }
        event
    }

    /// 结束当前录像 (摄像头停止时也会调用)
    pub fn close(&mut self) -> RecorderEvent {
        self.absent_cycles = 0;
        let Some(writer) = self.writer.take() else {
            return RecorderEvent::None;
        };
        let path = writer.path().to_path_buf();
        let frames = writer.frames();
        match writer.finish() {
            Ok(()) => {
                info!(camera = self.camera, "⏹️ 事件录制结束: {} ({} 帧)", path.display(), frames);
                RecorderEvent::Stopped { path, frames }
            }
            Err(e) => {
                error!(camera = self.camera, "❌ 关闭录像失败: {:#}", e);
                RecorderEvent::Failed
            }
        }
    }

    fn open_clip(&mut self) -> Result<Box<dyn ClipWriter>> {
        let path = unique_clip_path(
            &self.dir,
            self.camera,
            &crate::gen_time_string(""),
            self.opener.extension(),
        );
        self.opener.open(&path)
    }
}

impl Drop for IncidentRecorder {
    fn drop(&mut self) {
        self.close();
    }
}

/// `cam{id}_incident_{stamp}.{ext}`, 重名时追加序号
pub fn unique_clip_path(dir: &Path, camera: CameraId, stamp: &str, ext: &str) -> PathBuf {
    let base = format!("cam{}_incident_{}", camera, stamp);
    let mut path = dir.join(format!("{}.{}", base, ext));
    let mut n = 1;
    while path.exists() {
        path = dir.join(format!("{}_{}.{}", base, n, ext));
        n += 1;
    }
    path
}
