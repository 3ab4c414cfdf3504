/// 模型能力接口与实现
///
/// # 架构说明
///
/// 流水线只依赖三个能力接口,不关心模型内部:
/// - **Detector**: 帧 → 原始检测 (检测器坐标空间,每行一个检测)
/// - **RelevanceClassifier**: 一批图像块 → 每块的类别 (批量调用一次)
/// - **IdentityClassifier**: 单个图像块 → 身份编号
///
/// 跟踪器接口见 `detection::tracker`。
///
/// ## ONNX 实现 (feature = "onnx")
/// - **YoloxDetector**: YOLOX 导出模型, 文件: `yolox.rs`
/// - **VitClassifier**: ViT 图像分类模型,可同时作为相关性分类器与身份分类器, 文件: `vit.rs`
///
/// 预处理/后处理 (letterbox, YOLOX 解码, NMS) 不依赖推理引擎,见 `preprocess.rs`
use anyhow::Result;
use image::RgbImage;
use ndarray::Array2;

/// 目标检测器
pub trait Detector {
    /// 检测一帧
    ///
    /// # Returns
    /// * `None` - 本帧没有任何检测
    /// * `Some(rows)` - 每行 `x1,y1,x2,y2,score[,class_score[,class_id]]`,检测器输入坐标
    fn detect(&mut self, frame: &RgbImage) -> Result<Option<Array2<f32>>>;

    /// 检测器输入尺寸 (height, width)
    fn input_size(&self) -> (u32, u32);
}

/// 相关性分类器: 判断图像块是否为目标类别 (如"球员")
pub trait RelevanceClassifier {
    /// 批量分类,返回每个图像块的预测类别,长度必须与输入一致
    fn classify(&mut self, patches: &[&RgbImage]) -> Result<Vec<usize>>;
}

/// 身份分类器: 图像块 → 身份编号
pub trait IdentityClassifier {
    fn identify(&mut self, patch: &RgbImage) -> Result<i64>;
}

impl<T: Detector + ?Sized> Detector for Box<T> {
    fn detect(&mut self, frame: &RgbImage) -> Result<Option<Array2<f32>>> {
        (**self).detect(frame)
    }

    fn input_size(&self) -> (u32, u32) {
        (**self).input_size()
    }
}

pub mod preprocess;

#[cfg(feature = "onnx")]
pub mod vit;
#[cfg(feature = "onnx")]
pub mod yolox;

pub use preprocess::{
    argmax_rows, classifier_batch, decode_grids, decode_yolox_output, letterbox, non_max_suppression,
    resize_exact, Letterbox,
};

#[cfg(feature = "onnx")]
pub use vit::VitClassifier;
#[cfg(feature = "onnx")]
pub use yolox::YoloxDetector;
