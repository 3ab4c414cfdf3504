//! 图像块提取器 (Patch Extractor)
//! 按检测框裁剪原始帧,送入身份分类器

use image::{imageops, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::scale::clip_box;
use super::types::{Detection, Patch};

/// 像素通道顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// 单个检测框的裁剪结果
#[derive(Debug, Clone)]
pub enum CropOutcome {
    Valid(Patch),
    /// 裁剪后为空区域,该检测本帧永久剔除
    Empty { source_index: usize },
}

impl CropOutcome {
    pub fn into_patch(self) -> Option<Patch> {
        match self {
            CropOutcome::Valid(patch) => Some(patch),
            CropOutcome::Empty { .. } => None,
        }
    }
}

pub struct PatchExtractor {
    frame_order: ChannelOrder,
    classifier_order: ChannelOrder,
}

impl PatchExtractor {
    pub fn new(frame_order: ChannelOrder, classifier_order: ChannelOrder) -> Self {
        Self {
            frame_order,
            classifier_order,
        }
    }

    /// 裁剪单个检测框
    pub fn crop(&self, frame: &RgbImage, source_index: usize, detection: &Detection) -> CropOutcome {
        let rect = clip_box(&detection.bbox, frame.width(), frame.height());
        if rect.is_empty() {
            return CropOutcome::Empty { source_index };
        }

        let mut image = imageops::crop_imm(frame, rect.x1, rect.y1, rect.width(), rect.height()).to_image();
        if self.frame_order != self.classifier_order {
            swap_red_blue(&mut image);
        }
        CropOutcome::Valid(Patch { source_index, image })
    }

    /// 逐个检测框裁剪 (惰性,单次遍历)
    pub fn extract<'a>(
        &'a self,
        frame: &'a RgbImage,
        detections: &'a [Detection],
    ) -> impl Iterator<Item = CropOutcome> + 'a {
        detections
            .iter()
            .enumerate()
            .map(move |(idx, det)| self.crop(frame, idx, det))
    }

    /// 只保留有效图像块,空区域记录日志后跳过
    pub fn patches(&self, frame: &RgbImage, detections: &[Detection]) -> (Vec<Patch>, Vec<usize>) {
        let mut patches = Vec::with_capacity(detections.len());
        let mut skipped = Vec::new();
        for outcome in self.extract(frame, detections) {
            match outcome {
                CropOutcome::Valid(patch) => patches.push(patch),
                CropOutcome::Empty { source_index } => {
                    debug!(
                        source_index,
                        bbox = ?detections[source_index].bbox,
                        "检测框裁剪后为空,跳过"
                    );
                    skipped.push(source_index);
                }
            }
        }
        (patches, skipped)
    }
}

impl Default for PatchExtractor {
    fn default() -> Self {
        Self::new(ChannelOrder::Rgb, ChannelOrder::Rgb)
    }
}

/// RGB ↔ BGR
pub fn swap_red_blue(image: &mut RgbImage) {
    for pixel in image.pixels_mut() {
        pixel.0.swap(0, 2);
    }
}
