// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! JPEG 编码与低分辨率缩放

use anyhow::{Context, Result};
use bytes::Bytes;
use fast_image_resize as fr;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Bytes> {
    let mut buf = Vec::with_capacity(image.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode_image(image)
        .context("jpeg encode failed")?;
    Ok(Bytes::from(buf))
}

/// 低分辨率流: 复用 resizer, 仅在有观众时调用
pub struct Downscaler {
    width: u32,
    height: u32,
    resizer: fr::Resizer,
}

impl Downscaler {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            resizer: fr::Resizer::new(),
        }
    }

    pub fn resize(&mut self, image: &RgbImage) -> Result<RgbImage> {
        if image.dimensions() == (self.width, self.height) {
            return Ok(image.clone());
        }
        let (w0, h0) = image.dimensions();
        let src = fr::images::Image::from_vec_u8(w0, h0, image.as_raw().clone(), fr::PixelType::U8x3)?;
        let mut dst = fr::images::Image::new(self.width, self.height, fr::PixelType::U8x3);
        self.resizer.resize(
            &src,
            &mut dst,
            &fr::ResizeOptions::new()
                .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
        )?;
        RgbImage::from_raw(self.width, self.height, dst.into_vec())
            .context("resized buffer has unexpected length")
    }

    /// 缩放并编码
    pub fn encode(&mut self, image: &RgbImage, quality: u8) -> Result<Bytes> {
        let small = self.resize(image)?;
        encode_jpeg(&small, quality)
    }
}
