// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 静态图片源 (单帧循环, 用于标定与联调)
/// Still-image frame source
use super::source::{FrameSource, ReadOutcome};
use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct StillImageSource {
    path: PathBuf,
    image: RgbImage,
    fps: f64,
}

impl StillImageSource {
    pub fn open<P: AsRef<Path>>(path: P, width: u32, height: u32, fps: f64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let image = image::open(&path)
            .with_context(|| format!("failed to open image {}", path.display()))?
            .to_rgb8();
        let image = if image.dimensions() == (width, height) {
            image
        } else {
            image::imageops::resize(&image, width, height, FilterType::Triangle)
        };
        Ok(Self { path, image, fps })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSource for StillImageSource {
    fn read(&mut self, _timeout: Duration) -> Result<ReadOutcome> {
        Ok(ReadOutcome::Frame(self.image.clone()))
    }

    fn rewind(&mut self) -> Result<()> {
        Ok(())
    }

    fn fps(&self) -> f64 {
        self.fps
    }
}

/// 按扩展名判断是否为图片
pub fn is_image_path(locator: &str) -> bool {
    let lower = locator.to_ascii_lowercase();
    [".jpg", ".jpeg", ".png", ".bmp"]
        .iter()
        .any(|ext| lower.ends_with(ext))
}
