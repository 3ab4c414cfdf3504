/// 跟踪流水线 (Tracking Pipeline)
///
/// 单线程逐帧处理,帧之间严格有序:
/// - orchestrator: 检测 → 过滤 → 裁剪 → 身份解析 → 跟踪 → 渲染/记录
/// - aggregator:   结果过滤与文本写出
/// - render:       轨迹可视化
pub mod aggregator;
pub mod orchestrator;
pub mod render;

pub use aggregator::{AggregatorConfig, FlushOutcome, ResultAggregator};
pub use orchestrator::{FrameOrchestrator, FrameReport, FrameStage, RunSummary};
pub use render::{id_to_color, plot_tracking, LabelFont};
