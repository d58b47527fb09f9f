// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// FFmpeg解码过滤器模块
/// FFmpeg decode filter: YUV420P frame → RGB image → channel
use crossbeam_channel::{SendTimeoutError, Sender, TrySendError};
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::{AVMediaType, Frame};
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub struct DecodeFilter {
    tx: Sender<RgbImage>,
    /// 置位后终止 FFmpeg 任务
    abort: Arc<AtomicBool>,
    /// 实时流丢帧, 文件源阻塞等待 (背压)
    live: bool,
    label: String,
    count: usize,
    dropped_frames: usize,
    total_frames: usize,
    last: Instant,
}

impl DecodeFilter {
    pub fn new(tx: Sender<RgbImage>, abort: Arc<AtomicBool>, live: bool, label: String) -> Self {
        Self {
            tx,
            abort,
            live,
            label,
            count: 0,
            dropped_frames: 0,
            total_frames: 0,
            last: Instant::now(),
        }
    }

    fn deliver(&mut self, image: RgbImage) -> Result<(), String> {
        if self.live {
            return match self.tx.try_send(image) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    self.dropped_frames += 1;
                    Ok(())
                }
                Err(TrySendError::Disconnected(_)) => Err("receiver closed".to_string()),
            };
        }

        let mut pending = image;
        loop {
            if self.abort.load(Ordering::Relaxed) {
                return Err("decoder aborted".to_string());
            }
            match self.tx.send_timeout(pending, Duration::from_millis(100)) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(back)) => pending = back,
                Err(SendTimeoutError::Disconnected(_)) => {
                    return Err("receiver closed".to_string())
                }
            }
        }
    }

    fn drop_frame(&mut self, reason: &str) -> Result<Option<Frame>, String> {
        self.dropped_frames += 1;
        if self.total_frames <= 10 {
            warn!(source = %self.label, "⚠️ 丢弃帧 #{}: {}", self.total_frames, reason);
        }
        Ok(None)
    }
}

impl FrameFilter for DecodeFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        debug!(source = %self.label, "✅ 解码任务启动");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: Frame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<Frame>, String> {
        if self.abort.load(Ordering::Relaxed) {
            return Err("decoder aborted".to_string());
        }
        self.total_frames += 1;

        let image = unsafe {
            if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
                return self.drop_frame("空帧/损坏帧");
            }

            let raw = &*frame.as_ptr();
            let w = raw.width as u32;
            let h = raw.height as u32;
            if w == 0 || h == 0 || w > 8192 || h > 8192 {
                return self.drop_frame("非法分辨率");
            }

            // 只丢弃严重错误的帧 (缺少参考帧、无效比特流)
            if raw.decode_error_flags & 0x03 != 0 {
                return self.drop_frame("解码错误标志");
            }

            let y_plane = raw.data[0] as *const u8;
            let u_plane = raw.data[1] as *const u8;
            let v_plane = raw.data[2] as *const u8;
            let y_stride = raw.linesize[0] as usize;
            let uv_stride = raw.linesize[1] as usize;

            if y_plane.is_null() || u_plane.is_null() || v_plane.is_null() {
                return self.drop_frame("YUV指针为空");
            }
            if y_stride < w as usize || uv_stride < (w as usize).div_ceil(2) {
                return self.drop_frame("步长异常");
            }

            let mut buffer = vec![0u8; (w * h * 3) as usize];
            yuv420p_to_rgb(
                y_plane,
                u_plane,
                v_plane,
                y_stride,
                uv_stride,
                &mut buffer,
                w as usize,
                h as usize,
            );
            match RgbImage::from_raw(w, h, buffer) {
                Some(image) => image,
                None => return self.drop_frame("RGB缓冲区尺寸不符"),
            }
        };

        self.count += 1;
        self.deliver(image)?;

        if self.last.elapsed().as_secs_f64() >= 1.0 {
            let elapsed = self.last.elapsed().as_secs_f64();
            debug!(
                source = %self.label,
                "📺 解码统计: {:.1}fps | 总帧{} | 丢弃{}",
                self.count as f64 / elapsed,
                self.total_frames,
                self.dropped_frames
            );
            self.last = Instant::now();
            self.count = 0;
        }

        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        debug!(source = %self.label, "✅ 解码任务退出");
    }
}

/// YUV420P → RGB (BT.601, 定点运算)
///
/// # Safety
/// 三个平面指针必须覆盖 `height` 行 (色度为 `height/2` 行) 且步长有效
#[allow(clippy::too_many_arguments)]
unsafe fn yuv420p_to_rgb(
    y_plane: *const u8,
    u_plane: *const u8,
    v_plane: *const u8,
    y_stride: usize,
    uv_stride: usize,
    buffer: &mut [u8],
    width: usize,
    height: usize,
) {
    let mut out_idx = 0;
    for y in 0..height {
        let y_row = y * y_stride;
        let uv_row = (y >> 1) * uv_stride;

        for x in 0..width {
            let y_val = *y_plane.add(y_row + x) as i32;
            let u_val = *u_plane.add(uv_row + (x >> 1)) as i32 - 128;
            let v_val = *v_plane.add(uv_row + (x >> 1)) as i32 - 128;

            buffer[out_idx] = (y_val + ((v_val * 179) >> 7)).clamp(0, 255) as u8;
            buffer[out_idx + 1] =
                (y_val - ((u_val * 44) >> 7) - ((v_val * 91) >> 7)).clamp(0, 255) as u8;
            buffer[out_idx + 2] = (y_val + ((u_val * 227) >> 7)).clamp(0, 255) as u8;
            out_idx += 3;
        }
    }
}
