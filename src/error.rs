//! 错误类型 (Error types)
//!
//! - `PipelineError`: 启动阶段错误,直接终止运行
//! - `FrameFault`:    单帧可恢复错误,记录日志后继续处理下一帧

use std::path::PathBuf;

use thiserror::Error;

/// 启动阶段致命错误 (配置/标注/输入路径)
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed annotation file {path}: {reason}")]
    Annotation { path: PathBuf, reason: String },

    #[error("invalid config: {0}")]
    Config(String),

    #[error("Error: Unknown source: {0}")]
    UnknownMode(String),

    #[error("invalid frame size {width}x{height}")]
    InvalidFrame { width: u32, height: u32 },

    #[error("frame source failed: {0}")]
    Source(String),

    #[error("frame sink failed: {0}")]
    Sink(String),

    #[error("model error: {0}")]
    Model(String),
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn annotation(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Annotation {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// 单帧可恢复错误
///
/// 每个 fault 都会以 `warn!` 记录,并保存在 `FrameReport::faults` 中
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FrameFault {
    #[error("detector failed: {0}")]
    Detector(String),

    #[error("detector output has {columns} columns, expected at least 5")]
    MalformedDetections { columns: usize },

    #[error("detection {source_index} clipped to an empty patch")]
    EmptyCrop { source_index: usize },

    #[error("classifier batch of {batch} patches failed: {reason}")]
    Classifier { batch: usize, reason: String },

    #[error("identity classifier failed for detection {source_index}: {reason}")]
    Identity { source_index: usize, reason: String },

    #[error("tracker update failed: {0}")]
    Tracker(String),

    #[error("failed to read frame: {0}")]
    Source(String),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
