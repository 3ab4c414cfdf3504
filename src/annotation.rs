//! 标注数据加载 (Ground-truth annotation)
//!
//! 标注文件结构:
//! ```json
//! {
//!   "labels": [ { "data": { "frames": [ { "frame": 0, "points": [x1, y1, x2, y2] } ] } } ],
//!   "info":   { "url": [ ".../clip_000007.jpg" ] }
//! }
//! ```
//! `frame` 是 `info.url` 的下标,url 末尾的整数为全局帧号;`labels` 的下标即身份编号。
//! 加载后按全局帧号倒排,只读。

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use ndarray::Array2;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::info;

use crate::detection::{BBox, Candidate, Detection};
use crate::error::{PipelineError, Result};

/// url 末尾整数 (扩展名之前)
static TRAILING_INT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)(?:\.[A-Za-z0-9]+)?$").unwrap());

/// 标注框的固定置信度
pub const GROUND_TRUTH_CONFIDENCE: f32 = 1.0;

#[derive(Deserialize)]
struct AnnotationDoc {
    labels: Vec<Label>,
    info: Info,
}

#[derive(Deserialize)]
struct Label {
    data: LabelData,
}

#[derive(Deserialize)]
struct LabelData {
    frames: Vec<LabelFrame>,
}

#[derive(Deserialize)]
struct LabelFrame {
    frame: usize,
    points: Vec<f32>,
}

#[derive(Deserialize)]
struct Info {
    url: Vec<String>,
}

/// 单帧标注
#[derive(Debug, Clone, PartialEq)]
pub struct GroundTruthFrame {
    /// n×5: `x1, y1, x2, y2, 1.0`
    pub boxes: Array2<f32>,
    pub identities: Vec<i64>,
}

impl GroundTruthFrame {
    /// 转为跟踪器候选 (得分 1.0,带身份)
    pub fn candidates(&self) -> Vec<Candidate> {
        self.boxes
            .rows()
            .into_iter()
            .zip(&self.identities)
            .map(|(row, &identity)| Candidate {
                detection: Detection::from_ground_truth(BBox::new(row[0], row[1], row[2], row[3]), row[4]),
                identity: Some(identity),
            })
            .collect()
    }
}

/// 全局帧号 → 标注
#[derive(Debug, Clone, Default)]
pub struct GroundTruthAnnotation {
    frames: BTreeMap<u64, GroundTruthFrame>,
}

impl GroundTruthAnnotation {
    /// 读取并解析标注文件,任何格式错误都是致命错误
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        let annotation = Self::parse(&text, path)?;
        info!(
            path = %path.display(),
            frames = annotation.len(),
            "标注已加载"
        );
        Ok(annotation)
    }

    /// `path` 只用于错误信息
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let doc: AnnotationDoc =
            serde_json::from_str(text).map_err(|e| PipelineError::annotation(path, e.to_string()))?;

        let frames_map = doc
            .info
            .url
            .iter()
            .map(|url| trailing_integer(url).ok_or_else(|| PipelineError::annotation(path, format!("url without frame number: {url}"))))
            .collect::<Result<Vec<u64>>>()?;

        let mut grouped: BTreeMap<u64, (Vec<f32>, Vec<i64>)> = BTreeMap::new();
        for (identity, label) in doc.labels.iter().enumerate() {
            for frame in &label.data.frames {
                let global = *frames_map.get(frame.frame).ok_or_else(|| {
                    PipelineError::annotation(
                        path,
                        format!("label {identity} references url index {} of {}", frame.frame, frames_map.len()),
                    )
                })?;
                if frame.points.len() != 4 {
                    return Err(PipelineError::annotation(
                        path,
                        format!("label {identity} frame {} has {} points, expected 4", frame.frame, frame.points.len()),
                    ));
                }

                let entry = grouped.entry(global).or_default();
                entry.0.extend_from_slice(&frame.points);
                entry.0.push(GROUND_TRUTH_CONFIDENCE);
                entry.1.push(identity as i64);
            }
        }

        let mut frames = BTreeMap::new();
        for (global, (flat, identities)) in grouped {
            let boxes = Array2::from_shape_vec((identities.len(), 5), flat)
                .map_err(|e| PipelineError::annotation(path, e.to_string()))?;
            frames.insert(global, GroundTruthFrame { boxes, identities });
        }
        Ok(Self { frames })
    }

    pub fn get(&self, frame_id: u64) -> Option<&GroundTruthFrame> {
        self.frames.get(&frame_id)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frame_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.frames.keys().copied()
    }
}

fn trailing_integer(url: &str) -> Option<u64> {
    TRAILING_INT
        .captures(url)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
