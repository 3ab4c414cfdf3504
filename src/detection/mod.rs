/// 检测与跟踪 (Detection & Tracking)
///
/// 每帧数据流: 原始检测 → 坐标缩放 → 置信度过滤 → 图像块裁剪 → 身份解析 → 跟踪器
/// - scale:     检测器坐标 ↔ 原始帧坐标
/// - filter:    置信度过滤 (融合得分)
/// - patch:     按检测框裁剪图像块
/// - identity:  相关性分类 + 身份提示
/// - tracker:   跟踪器接口 + 卡尔曼滤波
/// - bytetrack: ByteTrack 参考实现
pub mod bytetrack;
pub mod filter;
pub mod identity;
pub mod patch;
pub mod scale;
pub mod tracker;
pub mod types;

pub use bytetrack::{ByteTracker, TrackerConfig};
pub use filter::{filter, DetectionLayout};
pub use identity::{IdentityResolver, Resolution};
pub use patch::{ChannelOrder, CropOutcome, PatchExtractor};
pub use scale::{clip_box, rescale, scale_factor, unscale, PixelRect};
pub use tracker::{KalmanBoxFilter, Tracker};
pub use types::{
    BBox, Candidate, Detection, IdentityHint, Patch, Tlwh, Track, TrackingResultRecord,
};
