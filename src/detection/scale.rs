//! 坐标缩放工具
//! 检测器在等比缩放(letterbox)后的图像上运行,输出坐标需除以缩放比例还原

use ndarray::{s, Array2};

use super::types::BBox;
use crate::error::{PipelineError, Result};

/// 等比缩放比例: min(input_h / frame_h, input_w / frame_w)
pub fn scale_factor(frame_height: u32, frame_width: u32, input_height: u32, input_width: u32) -> Result<f32> {
    if frame_height == 0 || frame_width == 0 {
        return Err(PipelineError::InvalidFrame {
            width: frame_width,
            height: frame_height,
        });
    }
    Ok((input_height as f32 / frame_height as f32).min(input_width as f32 / frame_width as f32))
}

/// 检测器坐标 → 原始帧坐标 (前4列除以缩放比例)
///
/// 每帧只计算一次比例,返回该比例
pub fn rescale(
    detections: &mut Array2<f32>,
    frame_height: u32,
    frame_width: u32,
    input_height: u32,
    input_width: u32,
) -> Result<f32> {
    let scale = scale_factor(frame_height, frame_width, input_height, input_width)?;
    let cols = detections.ncols().min(4);
    detections.slice_mut(s![.., ..cols]).mapv_inplace(|v| v / scale);
    Ok(scale)
}

/// 原始帧坐标 → 检测器坐标
pub fn unscale(detections: &mut Array2<f32>, scale: f32) {
    let cols = detections.ncols().min(4);
    detections.slice_mut(s![.., ..cols]).mapv_inplace(|v| v * scale);
}

/// 整数像素区域 (右/下边界不包含)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl PixelRect {
    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

/// 截断为整数并裁剪到帧范围内
///
/// 截断向零取整; 结果区域内的像素都落在 [0, width) × [0, height)
pub fn clip_box(bbox: &BBox, frame_width: u32, frame_height: u32) -> PixelRect {
    let clip = |v: f32, max: u32| -> u32 {
        if !v.is_finite() {
            return if v > 0.0 { max } else { 0 };
        }
        (v.trunc() as i64).clamp(0, max as i64) as u32
    };
    PixelRect {
        x1: clip(bbox.x1, frame_width),
        y1: clip(bbox.y1, frame_height),
        x2: clip(bbox.x2, frame_width),
        y2: clip(bbox.y2, frame_height),
    }
}
