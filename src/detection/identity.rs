//! 身份解析器 (Identity Resolver)
//!
//! 1. 所有有效图像块批量送入相关性分类器 (每帧一次)
//! 2. 只保留预测为目标类别的图像块
//! 3. 对保留的图像块调用身份分类器,生成身份提示
//!
//! 分类器失败时放弃本帧的候选集,不影响后续帧

use image::RgbImage;
use tracing::warn;

use super::types::{IdentityHint, Patch};
use crate::error::FrameFault;
use crate::models::{IdentityClassifier, RelevanceClassifier};

/// 解析结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// 保留下来的检测下标 (按图像块顺序)
    pub surviving: Vec<usize>,
    pub hints: Vec<IdentityHint>,
    pub faults: Vec<FrameFault>,
}

impl Resolution {
    /// 分类器整批失败
    pub fn aborted(&self) -> bool {
        self.faults
            .iter()
            .any(|f| matches!(f, FrameFault::Classifier { .. }))
    }

    pub fn identity_of(&self, source_index: usize) -> Option<i64> {
        self.hints
            .iter()
            .find(|h| h.source_index == source_index)
            .map(|h| h.identity)
    }
}

pub struct IdentityResolver {
    relevance: Box<dyn RelevanceClassifier>,
    identity: Option<Box<dyn IdentityClassifier>>,
    relevant_class: usize,
}

impl IdentityResolver {
    pub fn new(
        relevance: Box<dyn RelevanceClassifier>,
        identity: Option<Box<dyn IdentityClassifier>>,
        relevant_class: usize,
    ) -> Self {
        Self {
            relevance,
            identity,
            relevant_class,
        }
    }

    pub fn has_identity_classifier(&self) -> bool {
        self.identity.is_some()
    }

    pub fn resolve(&mut self, patches: &[Patch]) -> Resolution {
        if patches.is_empty() {
            return Resolution::default();
        }

        // 1. 批量相关性分类
        let batch: Vec<&RgbImage> = patches.iter().map(|p| &p.image).collect();
        let labels = match self.relevance.classify(&batch) {
            Ok(labels) if labels.len() == patches.len() => labels,
            Ok(labels) => {
                return Self::abort(
                    patches.len(),
                    format!("classifier returned {} labels", labels.len()),
                )
            }
            Err(e) => return Self::abort(patches.len(), format!("{e:#}")),
        };

        // 2. 二值过滤
        let kept: Vec<&Patch> = patches
            .iter()
            .zip(labels)
            .filter(|(_, label)| *label == self.relevant_class)
            .map(|(patch, _)| patch)
            .collect();

        let mut resolution = Resolution {
            surviving: kept.iter().map(|p| p.source_index).collect(),
            ..Default::default()
        };

        // 3. 身份提示
        if let Some(identity) = self.identity.as_mut() {
            for patch in kept {
                match identity.identify(&patch.image) {
                    Ok(id) => resolution.hints.push(IdentityHint {
                        source_index: patch.source_index,
                        identity: id,
                    }),
                    Err(e) => {
                        let fault = FrameFault::Identity {
                            source_index: patch.source_index,
                            reason: format!("{e:#}"),
                        };
                        warn!(%fault, "身份分类失败,该检测无身份提示");
                        resolution.faults.push(fault);
                    }
                }
            }
        }

        resolution
    }

    fn abort(batch: usize, reason: String) -> Resolution {
        let fault = FrameFault::Classifier { batch, reason };
        warn!(%fault, "分类器调用失败,放弃本帧候选");
        Resolution {
            faults: vec![fault],
            ..Default::default()
        }
    }
}
