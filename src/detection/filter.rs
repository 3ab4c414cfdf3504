//! 检测过滤器
//!
//! 检测器输出两种列布局:
//! - 5列: x1,y1,x2,y2,score (类别已折叠进单一置信度)
//! - 6+列: x1,y1,x2,y2,objectness,class_score[,class_id]

use ndarray::ArrayView2;

use super::types::{BBox, Detection};
use crate::error::FrameFault;

/// 检测输出列布局,按列数判定一次
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionLayout {
    /// bbox + 单一融合置信度
    Fused,
    /// bbox + objectness + class_score (+ class_id)
    Split,
}

impl DetectionLayout {
    pub fn from_columns(columns: usize) -> Result<Self, FrameFault> {
        match columns {
            5 => Ok(DetectionLayout::Fused),
            c if c >= 6 => Ok(DetectionLayout::Split),
            c => Err(FrameFault::MalformedDetections { columns: c }),
        }
    }

    /// 融合得分
    pub fn score(&self, row: &[f32]) -> f32 {
        match self {
            DetectionLayout::Fused => row[4],
            DetectionLayout::Split => row[4] * row[5],
        }
    }
}

/// 按融合得分过滤 (score > low_threshold),保持原有顺序
pub fn filter(detections: &ArrayView2<f32>, low_threshold: f32) -> Result<Vec<Detection>, FrameFault> {
    let layout = DetectionLayout::from_columns(detections.ncols())?;

    let kept = detections
        .rows()
        .into_iter()
        .filter_map(|row| {
            let row = row.to_vec();
            let score = layout.score(&row);
            if score <= low_threshold {
                return None;
            }
            let (class_score, class_id) = match layout {
                DetectionLayout::Fused => (None, None),
                DetectionLayout::Split => (Some(row[5]), row.get(6).copied()),
            };
            Some(Detection {
                bbox: BBox::new(row[0], row[1], row[2], row[3]),
                objectness: row[4],
                class_score,
                class_id,
                score,
            })
        })
        .collect();

    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    #[test]
    fn test_layout_from_columns() {
        assert_eq!(DetectionLayout::from_columns(5), Ok(DetectionLayout::Fused));
        assert_eq!(DetectionLayout::from_columns(6), Ok(DetectionLayout::Split));
        assert_eq!(DetectionLayout::from_columns(7), Ok(DetectionLayout::Split));
        assert_eq!(
            DetectionLayout::from_columns(4),
            Err(FrameFault::MalformedDetections { columns: 4 })
        );
    }

    #[test]
    fn test_split_layout_fuses_scores() {
        let dets = array![
            [0.0f32, 0.0, 10.0, 10.0, 0.9, 0.5, 0.0], // 0.45
            [0.0, 0.0, 10.0, 10.0, 0.5, 0.1, 0.0],    // 0.05
            [0.0, 0.0, 10.0, 10.0, 0.2, 0.5, 0.0],    // 0.10 (== 阈值,丢弃)
        ];
        let kept = filter(&dets.view(), 0.1).unwrap();
        assert_eq!(kept.len(), 1);
        assert!((kept[0].score - 0.45).abs() < 1e-6);
        assert_eq!(kept[0].class_score, Some(0.5));
        assert_eq!(kept[0].class_id, Some(0.0));
    }

    #[test]
    fn test_fused_layout_uses_single_score() {
        let dets = array![[1.0f32, 2.0, 3.0, 4.0, 0.3], [1.0, 2.0, 3.0, 4.0, 0.05]];
        let kept = filter(&dets.view(), 0.1).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].score, 0.3);
        assert_eq!(kept[0].class_score, None);
    }

    #[test]
    fn test_filter_is_stable() {
        let scores = [0.9f32, 0.05, 0.3, 0.7, 0.01, 0.2, 0.6];
        let mut dets = Array2::<f32>::zeros((scores.len(), 5));
        for (i, s) in scores.iter().enumerate() {
            dets[[i, 0]] = i as f32; // x1 记录原始下标
            dets[[i, 4]] = *s;
        }
        let kept = filter(&dets.view(), 0.1).unwrap();
        let order: Vec<f32> = kept.iter().map(|d| d.bbox.x1).collect();
        assert_eq!(order, vec![0.0, 2.0, 3.0, 5.0, 6.0]);
    }

    #[test]
    fn test_empty_output() {
        let dets = Array2::<f32>::zeros((0, 7));
        assert!(filter(&dets.view(), 0.1).unwrap().is_empty());
    }
}
