//! 运行配置
//!
//! 优先级: 命令行参数 > JSON 配置文件 (`--config`) > 默认值

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::builder::TypedValueParser;
use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::detection::{ChannelOrder, TrackerConfig};
use crate::error::{PipelineError, Result};
use crate::pipeline::AggregatorConfig;

/// 命令行参数
#[derive(Parser, Clone, Debug)]
#[command(author, version, about = "Player tracking demo (YOLOX + classifier + ByteTrack)", long_about = None, rename_all = "snake_case")]
pub struct Args {
    /// 运行模式: image / video / webcam
    #[arg(default_value = "image")]
    pub demo: String,

    /// 图片/目录或视频路径
    #[arg(long, default_value = "", value_parser = clap::builder::OsStringValueParser::new().map(PathBuf::from))]
    pub path: PathBuf,

    /// 摄像头编号
    #[arg(long, default_value_t = 0)]
    pub camid: u32,

    /// 保存渲染结果 (视频/图片)
    #[arg(long)]
    pub save_result: bool,

    /// JSON 配置文件
    #[arg(short = 'f', long)]
    pub config: Option<PathBuf>,

    /// 检测模型 (ONNX)
    #[arg(short = 'c', long)]
    pub ckpt: Option<PathBuf>,

    /// 推理设备: cpu / gpu
    #[arg(long)]
    pub device: Option<String>,

    /// 检测置信度阈值
    #[arg(long)]
    pub conf: Option<f32>,

    /// NMS 阈值
    #[arg(long)]
    pub nms: Option<f32>,

    /// 检测器输入尺寸 (正方形)
    #[arg(long)]
    pub tsize: Option<u32>,

    /// 帧率
    #[arg(long)]
    pub fps: Option<u32>,

    /// 标注文件
    #[arg(short = 'g', long)]
    pub gt_bbox: Option<PathBuf>,

    /// 输出根目录
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// 相关性分类模型 (ONNX)
    #[arg(long)]
    pub cls: Option<PathBuf>,

    /// 身份分类模型 (ONNX)
    #[arg(long)]
    pub identity_model: Option<PathBuf>,

    /// 启用标注覆盖 (有标注的帧直接使用标注框)
    #[arg(long)]
    pub use_gt: bool,

    /// 标签字体 (TTF/OTF)
    #[arg(long)]
    pub font: Option<PathBuf>,

    #[arg(long)]
    pub track_high_thresh: Option<f32>,

    #[arg(long)]
    pub track_low_thresh: Option<f32>,

    #[arg(long)]
    pub new_track_thresh: Option<f32>,

    #[arg(long)]
    pub track_buffer: Option<u32>,

    #[arg(long)]
    pub match_thresh: Option<f32>,

    /// 宽高比过滤阈值
    #[arg(long)]
    pub aspect_ratio_thresh: Option<f32>,

    /// 最小框面积
    #[arg(long)]
    pub min_box_area: Option<f32>,
}

/// 运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoMode {
    Image,
    Video,
    Webcam,
}

impl FromStr for DemoMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "image" | "images" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "webcam" => Ok(Self::Webcam),
            other => Err(PipelineError::UnknownMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cpu,
    Gpu,
}

impl FromStr for Device {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "gpu" | "cuda" => Ok(Self::Gpu),
            other => Err(PipelineError::Config(format!("unknown device: {other}"))),
        }
    }
}

/// 检测器参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub model: Option<PathBuf>,
    pub input_height: u32,
    pub input_width: u32,
    pub conf_threshold: f32,
    pub nms_threshold: f32,
    /// 模型输出未做网格解码时设为 true
    pub decode_grids: bool,
    pub device: Device,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model: None,
            input_height: 640,
            input_width: 640,
            conf_threshold: 0.01,
            nms_threshold: 0.65,
            decode_grids: false,
            device: Device::Gpu,
        }
    }
}

/// 图像块通道顺序
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchConfig {
    pub frame_order: ChannelOrder,
    pub classifier_order: ChannelOrder,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            frame_order: ChannelOrder::Rgb,
            classifier_order: ChannelOrder::Rgb,
        }
    }
}

/// 身份解析参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub relevance_model: Option<PathBuf>,
    pub identity_model: Option<PathBuf>,
    /// 相关性分类器中"目标"的类别下标
    pub relevant_class: usize,
    /// 有标注的帧直接使用标注 (默认关闭)
    pub use_ground_truth: bool,
    pub ground_truth: Option<PathBuf>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            relevance_model: None,
            identity_model: None,
            relevant_class: 1,
            use_ground_truth: false,
            ground_truth: None,
        }
    }
}

/// 输出参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub out: PathBuf,
    pub save_result: bool,
    pub font: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            out: PathBuf::from("outputs"),
            save_result: false,
            font: None,
        }
    }
}

/// 摄像头采集参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// 完整配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub fps: u32,
    /// 预解码通道容量 (0 = 不启用解码线程)
    pub decode_ahead: usize,
    pub detector: DetectorConfig,
    pub patch: PatchConfig,
    pub resolver: ResolverConfig,
    pub tracker: TrackerConfig,
    pub aggregator: AggregatorConfig,
    pub output: OutputConfig,
    pub camera: CameraConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            decode_ahead: 8,
            detector: DetectorConfig::default(),
            patch: PatchConfig::default(),
            resolver: ResolverConfig::default(),
            tracker: TrackerConfig::default(),
            aggregator: AggregatorConfig::default(),
            output: OutputConfig::default(),
            camera: CameraConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// 读取配置文件;未指定时使用默认值,指定但不存在是致命错误
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        serde_json::from_str(&text)
            .map_err(|e| PipelineError::Config(format!("{}: {e}", path.display())))
    }

    /// 命令行参数覆盖配置文件
    pub fn apply_args(&mut self, args: &Args) -> Result<()> {
        if let Some(ckpt) = &args.ckpt {
            self.detector.model = Some(ckpt.clone());
        }
        if let Some(device) = &args.device {
            self.detector.device = device.parse()?;
        }
        if let Some(conf) = args.conf {
            self.detector.conf_threshold = conf;
        }
        if let Some(nms) = args.nms {
            self.detector.nms_threshold = nms;
        }
        if let Some(tsize) = args.tsize {
            self.detector.input_height = tsize;
            self.detector.input_width = tsize;
        }
        if let Some(fps) = args.fps {
            self.fps = fps;
        }
        if let Some(gt) = &args.gt_bbox {
            self.resolver.ground_truth = Some(gt.clone());
        }
        if args.use_gt {
            self.resolver.use_ground_truth = true;
        }
        if let Some(cls) = &args.cls {
            self.resolver.relevance_model = Some(cls.clone());
        }
        if let Some(model) = &args.identity_model {
            self.resolver.identity_model = Some(model.clone());
        }
        if let Some(out) = &args.out {
            self.output.out = out.clone();
        }
        if args.save_result {
            self.output.save_result = true;
        }
        if let Some(font) = &args.font {
            self.output.font = Some(font.clone());
        }

        let t = &mut self.tracker;
        if let Some(v) = args.track_high_thresh {
            t.track_high_thresh = v;
        }
        if let Some(v) = args.track_low_thresh {
            t.track_low_thresh = v;
        }
        if let Some(v) = args.new_track_thresh {
            t.new_track_thresh = v;
        }
        if let Some(v) = args.track_buffer {
            t.track_buffer = v;
        }
        if let Some(v) = args.match_thresh {
            t.match_thresh = v;
        }
        if let Some(v) = args.aspect_ratio_thresh {
            self.aggregator.aspect_ratio_thresh = v;
        }
        if let Some(v) = args.min_box_area {
            self.aggregator.min_box_area = v;
        }

        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        let d = &self.detector;
        if d.input_height == 0 || d.input_width == 0 {
            return Err(PipelineError::Config("detector input size must be positive".into()));
        }
        if self.fps == 0 {
            return Err(PipelineError::Config("fps must be positive".into()));
        }
        let t = &self.tracker;
        if t.track_low_thresh > t.track_high_thresh {
            return Err(PipelineError::Config(format!(
                "track_low_thresh {} exceeds track_high_thresh {}",
                t.track_low_thresh, t.track_high_thresh
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_unknown_mode_rejected() {
        assert_eq!("video".parse::<DemoMode>().unwrap(), DemoMode::Video);
        assert_eq!("images".parse::<DemoMode>().unwrap(), DemoMode::Image);
        let err = "stream".parse::<DemoMode>().unwrap_err();
        assert_eq!(err.to_string(), "Error: Unknown source: stream");
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::load(None).unwrap();
        assert_eq!(config.fps, 30);
        assert_eq!(config.resolver.relevant_class, 1);
        assert!(!config.resolver.use_ground_truth);
        assert_eq!(config.tracker.track_high_thresh, 0.2);
        assert_eq!(config.aggregator.aspect_ratio_thresh, 1.6);
        assert_eq!(config.aggregator.min_box_area, 10.0);
    }

    #[test]
    fn test_load_partial_file_and_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "fps": 25, "detector": {{ "input_height": 800, "input_width": 1440 }}, "patch": {{ "frame_order": "bgr" }} }}"#
        )
        .unwrap();

        let mut config = PipelineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.fps, 25);
        assert_eq!(config.detector.input_width, 1440);
        assert_eq!(config.detector.nms_threshold, 0.65);
        assert_eq!(config.patch.frame_order, ChannelOrder::Bgr);

        let args = Args::parse_from([
            "player-track",
            "video",
            "--path",
            "clip.mp4",
            "--fps",
            "50",
            "--track_low_thresh",
            "0.05",
            "--device",
            "cpu",
            "--save_result",
        ]);
        config.apply_args(&args).unwrap();
        assert_eq!(config.fps, 50);
        assert_eq!(config.tracker.track_low_thresh, 0.05);
        assert_eq!(config.detector.device, Device::Cpu);
        assert!(config.output.save_result);
        assert_eq!(config.detector.input_height, 800);
    }

    #[test]
    fn test_missing_config_is_fatal() {
        let err = PipelineConfig::load(Some(Path::new("/nonexistent/config.json"))).unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }));
    }

    #[test]
    fn test_invalid_thresholds() {
        let mut config = PipelineConfig::default();
        let args = Args::parse_from(["player-track", "--track_low_thresh", "0.9"]);
        assert!(matches!(config.apply_args(&args), Err(PipelineError::Config(_))));
    }
}
