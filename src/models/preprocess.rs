// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 预处理与后处理 (与推理引擎无关)
//!
//! - letterbox: 等比缩放 + 114 灰色填充 + 归一化 → NCHW 张量
//! - decode_yolox_output: YOLOX 原始输出 → `x1,y1,x2,y2,obj,cls_conf,cls_id`
//! - non_max_suppression: 按类别 NMS

use anyhow::{anyhow, Result};
use fast_image_resize as fr;
use image::RgbImage;
use ndarray::{s, Array2, Array4, ArrayView2};

/// YOLOX 填充值
pub const PAD_VALUE: u8 = 114;

/// ImageNet 均值/方差 (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// letterbox 结果
#[derive(Debug, Clone)]
pub struct Letterbox {
    /// [1, 3, H, W]
    pub tensor: Array4<f32>,
    /// 缩放比例 (输入尺寸 / 原图尺寸)
    pub ratio: f32,
}

/// 高性能缩放 (fast_image_resize, 双线性)
pub fn resize_exact(image: &RgbImage, width: u32, height: u32) -> Result<RgbImage> {
    if image.dimensions() == (width, height) {
        return Ok(image.clone());
    }

    let src = fr::images::Image::from_vec_u8(
        image.width(),
        image.height(),
        image.as_raw().clone(),
        fr::PixelType::U8x3,
    )?;
    let mut dst = fr::images::Image::new(width, height, fr::PixelType::U8x3);

    let mut resizer = fr::Resizer::new();
    resizer.resize(
        &src,
        &mut dst,
        &fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
    )?;

    RgbImage::from_raw(width, height, dst.into_vec())
        .ok_or_else(|| anyhow!("resized buffer does not match {width}x{height}"))
}

/// 等比缩放到检测器输入尺寸,左上角对齐,其余填充 114
///
/// 缩放比例 r = min(H/h, W/w),缩放后尺寸向下取整;
/// 像素按 `(v/255 - mean) / std` 归一化
pub fn letterbox(frame: &RgbImage, input_height: u32, input_width: u32) -> Result<Letterbox> {
    let (w0, h0) = frame.dimensions();
    if w0 == 0 || h0 == 0 {
        return Err(anyhow!("empty frame {w0}x{h0}"));
    }

    let ratio = (input_height as f32 / h0 as f32).min(input_width as f32 / w0 as f32);
    let new_w = ((w0 as f32 * ratio) as u32).clamp(1, input_width);
    let new_h = ((h0 as f32 * ratio) as u32).clamp(1, input_height);
    let resized = resize_exact(frame, new_w, new_h)?;

    let (ih, iw) = (input_height as usize, input_width as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, ih, iw));
    for c in 0..3 {
        let pad = normalize(PAD_VALUE, c);
        tensor.slice_mut(s![0, c, .., ..]).fill(pad);
    }
    for (x, y, rgb) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            tensor[[0, c, y, x]] = normalize(rgb.0[c], c);
        }
    }

    Ok(Letterbox { tensor, ratio })
}

#[inline]
fn normalize(value: u8, channel: usize) -> f32 {
    (value as f32 / 255.0 - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel]
}

/// 网格解码 (模型导出时未包含 decode 时使用)
///
/// 输入每行 `[dx, dy, log_w, log_h, obj, cls...]`,按 stride 8/16/32 的网格还原为像素 `cx,cy,w,h`
pub fn decode_grids(pred: &mut Array2<f32>, input_height: u32, input_width: u32, strides: &[u32]) -> Result<()> {
    let mut row = 0usize;
    for &stride in strides {
        let (gh, gw) = ((input_height / stride) as usize, (input_width / stride) as usize);
        for gy in 0..gh {
            for gx in 0..gw {
                if row >= pred.nrows() {
                    return Err(anyhow!("prediction has fewer rows than grid cells"));
                }
                let stride = stride as f32;
                let mut r = pred.row_mut(row);
                r[0] = (r[0] + gx as f32) * stride;
                r[1] = (r[1] + gy as f32) * stride;
                r[2] = r[2].exp() * stride;
                r[3] = r[3].exp() * stride;
                row += 1;
            }
        }
    }
    if row != pred.nrows() {
        return Err(anyhow!("grid has {row} cells but prediction has {} rows", pred.nrows()));
    }
    Ok(())
}

/// YOLOX 输出解码
///
/// 输入每行 `[cx, cy, w, h, obj, cls_0..cls_n]` (检测器输入坐标),
/// 保留 `obj * max(cls) >= conf_threshold` 的行,输出 7 列:
/// `x1, y1, x2, y2, obj, cls_conf, cls_id`
pub fn decode_yolox_output(pred: &ArrayView2<f32>, conf_threshold: f32) -> Result<Array2<f32>> {
    const CXYWHC_OFFSET: usize = 5;
    if pred.ncols() <= CXYWHC_OFFSET {
        return Err(anyhow!("YOLOX output needs more than 5 columns, got {}", pred.ncols()));
    }

    let mut rows: Vec<[f32; 7]> = Vec::new();
    for p in pred.rows() {
        let obj = p[4];
        let (class_id, class_conf) = p
            .slice(s![CXYWHC_OFFSET..])
            .iter()
            .copied()
            .enumerate()
            .fold((0usize, f32::MIN), |best, (i, v)| if v > best.1 { (i, v) } else { best });

        if obj * class_conf < conf_threshold {
            continue;
        }

        let (cx, cy, w, h) = (p[0], p[1], p[2], p[3]);
        rows.push([
            cx - w / 2.0,
            cy - h / 2.0,
            cx + w / 2.0,
            cy + h / 2.0,
            obj,
            class_conf,
            class_id as f32,
        ]);
    }

    let flat: Vec<f32> = rows.iter().flatten().copied().collect();
    Ok(Array2::from_shape_vec((rows.len(), 7), flat)?)
}

/// 按类别 NMS,按 `obj * cls_conf` 降序保留
pub fn non_max_suppression(detections: &Array2<f32>, iou_threshold: f32) -> Array2<f32> {
    let score = |i: usize| {
        let r = detections.row(i);
        r[4] * r.get(5).copied().unwrap_or(1.0)
    };
    let class_of = |i: usize| detections.row(i).get(6).copied().unwrap_or(0.0);

    let mut order: Vec<usize> = (0..detections.nrows()).collect();
    order.sort_by(|&a, &b| score(b).total_cmp(&score(a)));

    let mut keep: Vec<usize> = Vec::new();
    for &idx in &order {
        let suppressed = keep.iter().any(|&k| {
            class_of(k) == class_of(idx) && row_iou(detections, k, idx) > iou_threshold
        });
        if !suppressed {
            keep.push(idx);
        }
    }

    detections.select(ndarray::Axis(0), &keep)
}

fn row_iou(detections: &Array2<f32>, a: usize, b: usize) -> f32 {
    let (ra, rb) = (detections.row(a), detections.row(b));
    let iw = (ra[2].min(rb[2]) - ra[0].max(rb[0])).max(0.0);
    let ih = (ra[3].min(rb[3]) - ra[1].max(rb[1])).max(0.0);
    let inter = iw * ih;
    let area_a = (ra[2] - ra[0]) * (ra[3] - ra[1]);
    let area_b = (rb[2] - rb[0]) * (rb[3] - rb[1]);
    let union = area_a + area_b - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// 分类器输入: 缩放到固定尺寸,`(v/255 - mean) / std`,CHW 批量张量
pub fn classifier_batch(patches: &[&RgbImage], size: u32, mean: [f32; 3], std: [f32; 3]) -> Result<Array4<f32>> {
    let s = size as usize;
    let mut batch = Array4::<f32>::zeros((patches.len(), 3, s, s));
    for (n, patch) in patches.iter().enumerate() {
        let resized = resize_exact(patch, size, size)?;
        for (x, y, rgb) in resized.enumerate_pixels() {
            for c in 0..3 {
                batch[[n, c, y as usize, x as usize]] = (rgb.0[c] as f32 / 255.0 - mean[c]) / std[c];
            }
        }
    }
    Ok(batch)
}

/// 每行 logits 的最大值下标
pub fn argmax_rows(logits: &ArrayView2<f32>) -> Vec<usize> {
    logits
        .rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0usize, f32::MIN), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
                .0
        })
        .collect()
}
