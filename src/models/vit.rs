// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! ViT 图像分类模型 (ONNX Runtime)
//!
//! 输入 `[N, 3, 224, 224]`,均值/方差 0.5,输出 logits `[N, num_classes]`,取 argmax。
//! 同一个模型既可作相关性分类器 (类别下标),也可作身份分类器 (类别下标即身份)。

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use ndarray::Ix2;
use ort::execution_providers::CUDAExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use tracing::info;

use super::preprocess::{argmax_rows, classifier_batch};
use super::{IdentityClassifier, RelevanceClassifier};

const INPUT_SIZE: u32 = 224;
const MEAN: [f32; 3] = [0.5; 3];
const STD: [f32; 3] = [0.5; 3];

pub struct VitClassifier {
    session: Session,
}

impl VitClassifier {
    pub fn new(path: &Path, cuda: bool) -> Result<Self> {
        let mut builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;
        if cuda {
            builder = builder.with_execution_providers([CUDAExecutionProvider::default().build()])?;
        }
        let session = builder
            .commit_from_file(path)
            .with_context(|| format!("failed to load classifier {}", path.display()))?;
        info!(model = %path.display(), "📋 ViT 分类模型已加载");
        Ok(Self { session })
    }

    fn predict(&mut self, patches: &[&RgbImage]) -> Result<Vec<usize>> {
        if patches.is_empty() {
            return Ok(Vec::new());
        }
        let batch = classifier_batch(patches, INPUT_SIZE, MEAN, STD)?;
        let outputs = self.session.run(ort::inputs![Tensor::from_array(batch)?]?)?;
        let logits = outputs[0].try_extract_tensor::<f32>()?;
        let logits = logits
            .into_dimensionality::<Ix2>()
            .map_err(|e| anyhow!("unexpected classifier output shape: {e}"))?;
        Ok(argmax_rows(&logits))
    }
}

impl RelevanceClassifier for VitClassifier {
    fn classify(&mut self, patches: &[&RgbImage]) -> Result<Vec<usize>> {
        self.predict(patches)
    }
}

impl IdentityClassifier for VitClassifier {
    fn identify(&mut self, patch: &RgbImage) -> Result<i64> {
        let labels = self.predict(&[patch])?;
        labels
            .first()
            .map(|&label| label as i64)
            .ok_or_else(|| anyhow!("classifier returned no label"))
    }
}
