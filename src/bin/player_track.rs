/// 球员跟踪 (Player Tracking)
///
/// 直接运行:
///   cargo run --release --features onnx --bin player-track -- video --path match.mp4 -c yolox.onnx --cls cls.onnx --save_result
///   cargo run --release --features onnx --bin player-track -- image --path frames/ -c yolox.onnx --cls cls.onnx
use std::path::Path;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use player_tracker_rs::detection::{ByteTracker, IdentityResolver, PatchExtractor};
use player_tracker_rs::input::{spawn_decoder, FrameSink, FrameSource, ImageDirWriter, ImageSequence, VideoReader, VideoWriter};
use player_tracker_rs::models::Detector;
use player_tracker_rs::pipeline::{LabelFont, ResultAggregator};
use player_tracker_rs::{gen_time_string, Args, DemoMode, FrameOrchestrator, GroundTruthAnnotation, PipelineConfig};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mode: DemoMode = args.demo.parse()?;
    let mut config = PipelineConfig::load(args.config.as_deref())?;
    config.apply_args(&args)?;
    info!("Args: {:?}", args);

    let vis_folder = config.output.out.join("track_vis");
    let timestamp = gen_time_string("_");

    match mode {
        DemoMode::Image => {
            let source = ImageSequence::open(&args.path, config.fps as f64)?;
            let mut orchestrator = build_orchestrator(&config)?.with_first_frame_id(1);
            let results = vis_folder.join(format!("{timestamp}.txt"));
            let mut sink = if config.output.save_result {
                Some(ImageDirWriter::create(&vis_folder.join(&timestamp))?)
            } else {
                None
            };
            run(&mut orchestrator, source, sink.as_mut().map(|s| s as &mut dyn FrameSink), &results, &config)?;
        }
        DemoMode::Video => {
            let reader = VideoReader::open(&args.path)?;
            let stem = args
                .path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| timestamp.clone());
            let save_dir = config.output.out.join(&stem);
            let results = save_dir.join(format!("{stem}_tracking.txt"));
            let video = save_dir.join(format!("{stem}_tracking.mp4"));
            run_stream(&config, reader, &video, &results)?;
        }
        DemoMode::Webcam => {
            let reader = VideoReader::camera(
                args.camid,
                config.camera.width,
                config.camera.height,
                config.fps as f64,
            )?;
            let save_dir = vis_folder.join(&timestamp);
            let results = vis_folder.join(format!("{timestamp}.txt"));
            let video = save_dir.join(format!("camera_{}.mp4", args.camid));
            run_stream(&config, reader, &video, &results)?;
        }
    }
    Ok(())
}

/// 视频/摄像头: 渲染结果按需写入视频文件
fn run_stream(config: &PipelineConfig, reader: VideoReader, video: &Path, results: &Path) -> Result<()> {
    let mut orchestrator = build_orchestrator(config)?;
    let mut sink = if config.output.save_result {
        info!("video save_path is {}", video.display());
        Some(VideoWriter::create(video, reader.width(), reader.height(), reader.fps())?)
    } else {
        None
    };
    run(&mut orchestrator, reader, sink.as_mut().map(|s| s as &mut dyn FrameSink), results, config)
}

fn run<S>(
    orchestrator: &mut FrameOrchestrator,
    source: S,
    sink: Option<&mut dyn FrameSink>,
    results: &Path,
    config: &PipelineConfig,
) -> Result<()>
where
    S: FrameSource + Send + 'static,
{
    let mut source: Box<dyn FrameSource> = if config.decode_ahead > 0 {
        Box::new(spawn_decoder(source, config.decode_ahead)?)
    } else {
        Box::new(source)
    };
    let summary = orchestrator.run(source.as_mut(), sink, results)?;
    info!(
        "✅ {} frames ({} skipped), {} records, {} faults, {:.1}s",
        summary.frames,
        summary.skipped,
        summary.records,
        summary.faults,
        summary.elapsed.as_secs_f64()
    );
    Ok(())
}

fn build_orchestrator(config: &PipelineConfig) -> Result<FrameOrchestrator> {
    let (detector, resolver) = build_models(config)?;
    let extractor = PatchExtractor::new(config.patch.frame_order, config.patch.classifier_order);
    let tracker = ByteTracker::new(config.tracker.clone(), config.fps);
    let aggregator = ResultAggregator::new(config.aggregator.clone());

    let mut orchestrator = FrameOrchestrator::new(
        detector,
        extractor,
        resolver,
        Box::new(tracker),
        aggregator,
        config.tracker.track_low_thresh,
    );

    if let Some(path) = &config.resolver.ground_truth {
        let annotation = GroundTruthAnnotation::load(path)?;
        if config.resolver.use_ground_truth {
            orchestrator = orchestrator.with_ground_truth(annotation);
        } else {
            info!("标注覆盖未开启 (--use_gt), {} 帧标注仅做校验", annotation.len());
        }
    }
    if let Some(font) = &config.output.font {
        orchestrator = orchestrator.with_font(LabelFont::load(font)?);
    }
    Ok(orchestrator)
}

#[cfg(feature = "onnx")]
fn build_models(config: &PipelineConfig) -> Result<(Box<dyn Detector>, IdentityResolver)> {
    use player_tracker_rs::config::Device;
    use player_tracker_rs::models::{IdentityClassifier, VitClassifier, YoloxDetector};

    let cuda = config.detector.device == Device::Gpu;
    let detector_path = required(&config.detector.model, "detector model (-c/--ckpt)")?;
    let detector = YoloxDetector::new(&detector_path, &config.detector, cuda)?;

    let relevance_path = required(&config.resolver.relevance_model, "relevance classifier (--cls)")?;
    let relevance = VitClassifier::new(&relevance_path, cuda)?;
    let identity = match &config.resolver.identity_model {
        Some(path) => Some(Box::new(VitClassifier::new(path, cuda)?) as Box<dyn IdentityClassifier>),
        None => None,
    };

    let resolver = IdentityResolver::new(Box::new(relevance), identity, config.resolver.relevant_class);
    Ok((Box::new(detector), resolver))
}

#[cfg(feature = "onnx")]
fn required(path: &Option<std::path::PathBuf>, what: &str) -> Result<std::path::PathBuf> {
    path.clone()
        .ok_or_else(|| player_tracker_rs::PipelineError::Config(format!("missing {what}")).into())
}

#[cfg(not(feature = "onnx"))]
fn build_models(_config: &PipelineConfig) -> Result<(Box<dyn Detector>, IdentityResolver)> {
    Err(player_tracker_rs::PipelineError::Model(
        "built without ONNX support, rebuild with `--features onnx`".into(),
    )
    .into())
}
