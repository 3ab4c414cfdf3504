//! 跟踪结果可视化
//!
//! 按轨迹ID着色画框;提供字体时额外绘制ID标签和帧信息

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::detection::Track;
use crate::error::{PipelineError, Result};

/// 标签字体
pub struct LabelFont {
    font: FontVec,
}

impl LabelFont {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| PipelineError::io(path, e))?;
        let font = FontVec::try_from_vec(data)
            .map_err(|e| PipelineError::Config(format!("invalid font {}: {e}", path.display())))?;
        Ok(Self { font })
    }
}

/// 根据ID生成不同颜色 (黄金角度采样色相)
pub fn id_to_color(id: i64) -> Rgb<u8> {
    let hue = (id.unsigned_abs() as f32 * 137.508) % 360.0;
    hsv(hue, 0.8, 0.9)
}

/// HSV → RGB,`h` 以度为单位
///
/// 每个通道: `v - v·s·clamp(min(k, 4 - k), 0, 1)`,`k = (n + h/60) mod 6`,
/// R/G/B 分别取 n = 5/3/1
fn hsv(h: f32, s: f32, v: f32) -> Rgb<u8> {
    let sector = h / 60.0;
    let channel = |n: f32| {
        let k = (n + sector).rem_euclid(6.0);
        let level = v - v * s * k.min(4.0 - k).clamp(0.0, 1.0);
        (level * 255.0) as u8
    };
    Rgb([channel(5.0), channel(3.0), channel(1.0)])
}

/// 在帧上绘制轨迹
///
/// 线宽随图像尺寸变化;`frame_id` 与 `fps` 只在有字体时显示
pub fn plot_tracking(
    frame: &RgbImage,
    tracks: &[Track],
    frame_id: u64,
    fps: f64,
    font: Option<&LabelFont>,
) -> RgbImage {
    let mut canvas = frame.clone();
    let (w, h) = canvas.dimensions();
    let thickness = (w.max(h) / 500).max(1) as i32 + 1;
    let text_scale = PxScale::from((w.max(h) as f32 / 60.0).max(12.0));

    if let Some(font) = font {
        let header = format!("frame: {frame_id} fps: {fps:.2} num: {}", tracks.len());
        draw_text_mut(&mut canvas, Rgb([255, 0, 0]), 4, 4, text_scale, &font.font, &header);
    }

    for track in tracks {
        let t = &track.tlwh;
        if !(t.w.is_finite() && t.h.is_finite() && t.w >= 1.0 && t.h >= 1.0) {
            continue;
        }
        // 画面外的部分裁掉,留出线宽的余量
        let pad = thickness as f32;
        let (max_x, max_y) = (w as f32 + pad, h as f32 + pad);
        let left = t.x.max(-pad).min(max_x);
        let top = t.y.max(-pad).min(max_y);
        let right = (t.x + t.w).max(-pad).min(max_x);
        let bottom = (t.y + t.h).max(-pad).min(max_y);
        if right - left < 1.0 || bottom - top < 1.0 {
            continue;
        }

        let color = id_to_color(track.track_id);
        let (x, y) = (left as i32, top as i32);
        let (box_w, box_h) = ((right - left) as u32, (bottom - top) as u32);
        for offset in 0..thickness {
            let grow = 2 * offset as u32;
            let rect = Rect::at(x - offset, y - offset).of_size(box_w + grow, box_h + grow);
            draw_hollow_rect_mut(&mut canvas, rect, color);
        }

        if let Some(font) = font {
            let label = track.track_id.to_string();
            draw_text_mut(&mut canvas, color, x, (y - text_scale.y as i32).max(0), text_scale, &font.font, &label);
        }
    }

    canvas
}
