/// 检测/跟踪系统数据结构定义
/// Data structures for the detection & tracking pipeline
use image::RgbImage;

// ========== 几何 ==========

/// 检测框 (x1, y1, x2, y2),原始帧像素坐标
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn to_tlwh(&self) -> Tlwh {
        Tlwh {
            x: self.x1,
            y: self.y1,
            w: self.width(),
            h: self.height(),
        }
    }

    /// IOU (Intersection over Union)
    pub fn iou(&self, other: &BBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }
}

/// TLWH: 左上角x, 左上角y, 宽, 高
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Tlwh {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Tlwh {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn area(&self) -> f32 {
        self.w * self.h
    }

    pub fn to_bbox(&self) -> BBox {
        BBox::new(self.x, self.y, self.x + self.w, self.y + self.h)
    }
}

// ========== 每帧工作集 ==========

/// 缩放到原始帧坐标后的检测结果
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BBox,
    pub objectness: f32,
    /// 仅在分离得分布局 (6+列) 中存在
    pub class_score: Option<f32>,
    pub class_id: Option<f32>,
    /// 融合得分: objectness 或 objectness * class_score
    pub score: f32,
}

impl Detection {
    /// 由标注框构造 (置信度固定为1.0)
    pub fn from_ground_truth(bbox: BBox, confidence: f32) -> Self {
        Self {
            bbox,
            objectness: confidence,
            class_score: None,
            class_id: None,
            score: confidence,
        }
    }
}

/// 裁剪出的图像块,记录来源检测的下标
#[derive(Clone, Debug)]
pub struct Patch {
    pub source_index: usize,
    pub image: RgbImage,
}

/// 身份提示: 检测下标 → 身份猜测
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdentityHint {
    pub source_index: usize,
    pub identity: i64,
}

/// 送入跟踪器的候选检测
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    pub detection: Detection,
    pub identity: Option<i64>,
}

// ========== 跟踪输出 ==========

/// 跟踪器输出的活跃轨迹 (只读)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Track {
    pub track_id: i64,
    pub tlwh: Tlwh,
    pub score: f32,
}

/// 最终写入结果文件的一行
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackingResultRecord {
    pub frame_id: u64,
    pub track_id: i64,
    pub tlwh: Tlwh,
    pub score: f32,
}

impl TrackingResultRecord {
    /// `frame,id,x,y,w,h,score,-1,-1,-1`
    pub fn to_line(&self) -> String {
        format!(
            "{},{},{:.1},{:.1},{:.1},{:.1},{:.2},-1,-1,-1\n",
            self.frame_id,
            self.track_id,
            self.tlwh.x,
            self.tlwh.y,
            self.tlwh.w,
            self.tlwh.h,
            self.score
        )
    }
}
