// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! YOLOX 模型实现 (ONNX Runtime)
//! YOLOX is an anchor-free YOLO with high performance
//!
//! 核心特点:
//! - Anchor-Free: 无需预设锚框
//! - Decoupled Head: 解耦检测头
//! - 输出 `[1, num_boxes, 5 + nc]`,本实现解码并 NMS 后返回 7 列检测 (检测器输入坐标)

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use ndarray::{Array2, Axis, Ix3};
use ort::execution_providers::CUDAExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use tracing::info;

use super::preprocess::{decode_grids, decode_yolox_output, letterbox, non_max_suppression};
use super::Detector;
use crate::config::DetectorConfig;

/// YOLOX 网格步长
const STRIDES: [u32; 3] = [8, 16, 32];

/// YOLOX 模型结构
pub struct YoloxDetector {
    session: Session,
    height: u32,
    width: u32,
    conf: f32,
    nms: f32,
    decode_grids: bool,
}

impl YoloxDetector {
    /// 从配置创建 YOLOX 模型
    pub fn new(path: &Path, config: &DetectorConfig, cuda: bool) -> Result<Self> {
        let mut builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;
        if cuda {
            builder = builder.with_execution_providers([CUDAExecutionProvider::default().build()])?;
        }
        let session = builder
            .commit_from_file(path)
            .with_context(|| format!("failed to load detector {}", path.display()))?;

        info!(
            model = %path.display(),
            height = config.input_height,
            width = config.input_width,
            conf = config.conf_threshold,
            nms = config.nms_threshold,
            "📋 YOLOX 模型已加载"
        );

        Ok(Self {
            session,
            height: config.input_height,
            width: config.input_width,
            conf: config.conf_threshold,
            nms: config.nms_threshold,
            decode_grids: config.decode_grids,
        })
    }
}

impl Detector for YoloxDetector {
    fn detect(&mut self, frame: &RgbImage) -> Result<Option<Array2<f32>>> {
        let input = letterbox(frame, self.height, self.width)?;
        let tensor = Tensor::from_array(input.tensor)?;
        let outputs = self.session.run(ort::inputs![tensor]?)?;

        let raw = outputs[0].try_extract_tensor::<f32>()?;
        let raw = raw
            .into_dimensionality::<Ix3>()
            .map_err(|e| anyhow!("unexpected YOLOX output shape: {e}"))?;
        let mut pred = raw.index_axis(Axis(0), 0).to_owned();

        if self.decode_grids {
            decode_grids(&mut pred, self.height, self.width, &STRIDES)?;
        }

        let decoded = decode_yolox_output(&pred.view(), self.conf)?;
        if decoded.nrows() == 0 {
            return Ok(None);
        }
        Ok(Some(non_max_suppression(&decoded, self.nms)))
    }

    fn input_size(&self) -> (u32, u32) {
        (self.height, self.width)
    }
}
