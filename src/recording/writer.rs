// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 录像文件写入 (Motion-JPEG)
//! Clip writers: concatenated JPEG frames

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// 录像写入器
pub trait ClipWriter: Send {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;

    /// 写入已编码的 JPEG
    fn write_encoded(&mut self, jpeg: &[u8]) -> Result<()>;

    fn finish(self: Box<Self>) -> Result<()>;

    fn path(&self) -> &Path;

    fn frames(&self) -> u64;
}

/// 按路径创建写入器
pub trait ClipOpener: Send {
    fn open(&mut self, path: &Path) -> Result<Box<dyn ClipWriter>>;

    /// 文件扩展名
    fn extension(&self) -> &str;
}

pub struct MjpegWriter {
    path: PathBuf,
    out: BufWriter<File>,
    quality: u8,
    frames: u64,
}

impl MjpegWriter {
    /// 创建 (已存在则截断)
    pub fn create<P: AsRef<Path>>(path: P, quality: u8) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let file =
            File::create(&path).with_context(|| format!("failed to create {}", path.display()))?;
        Ok(Self {
            path,
            out: BufWriter::new(file),
            quality,
            frames: 0,
        })
    }
}

impl ClipWriter for MjpegWriter {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        JpegEncoder::new_with_quality(&mut self.out, self.quality)
            .encode_image(frame)
            .with_context(|| format!("failed to encode frame into {}", self.path.display()))?;
        self.frames += 1;
        Ok(())
    }

    fn write_encoded(&mut self, jpeg: &[u8]) -> Result<()> {
        self.out
            .write_all(jpeg)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        self.frames += 1;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        self.out
            .flush()
            .with_context(|| format!("failed to flush {}", self.path.display()))
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn frames(&self) -> u64 {
        self.frames
    }
}

/// MJPEG 写入器工厂
pub struct MjpegOpener {
    pub quality: u8,
}

impl ClipOpener for MjpegOpener {
    fn open(&mut self, path: &Path) -> Result<Box<dyn ClipWriter>> {
        Ok(Box::new(MjpegWriter::create(path, self.quality)?))
    }

    fn extension(&self) -> &str {
        "mjpeg"
    }
}
