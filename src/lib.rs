// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod annotation; // 标注数据
pub mod config; // 运行配置参数
pub mod detection; // 检测结果处理与跟踪
pub mod error; // 错误类型
pub mod input; // 帧输入/输出
pub mod models; // 模型接口与具体实现
pub mod pipeline; // 逐帧处理流水线

pub use crate::annotation::{GroundTruthAnnotation, GroundTruthFrame};
pub use crate::config::{Args, DemoMode, Device, PipelineConfig};
pub use crate::error::{FrameFault, PipelineError, Result};
pub use crate::pipeline::{FrameOrchestrator, FrameReport, FrameStage, RunSummary};

/// 本地时间字符串,用于输出目录命名
pub fn gen_time_string(delimiter: &str) -> String {
    let t_now = chrono::Local::now();
    let fmt = format!("%Y{d}%m{d}%d{d}%H{d}%M{d}%S", d = delimiter);
    t_now.format(&fmt).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_string_layout() {
        let s = gen_time_string("_");
        let parts: Vec<&str> = s.split('_').collect();
        assert_eq!(parts.len(), 6);
        assert_eq!(parts[0].len(), 4);
        assert!(parts.iter().all(|p| p.chars().all(|c| c.is_ascii_digit())));
    }
}
