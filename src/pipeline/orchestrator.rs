//! 帧调度器 (Frame Orchestrator)
//!
//! 单帧状态机:
//! `Detect → Filter → ExtractPatches → Resolve → TrackUpdate → RenderRecord`
//!
//! - 标注覆盖 (需显式开启且该帧有标注): `Detect → TrackUpdate`
//! - 检测器无输出: `Detect → RenderRecord`,原帧输出,跟踪器不更新
//! - 单帧错误 (FrameFault) 记录后继续下一帧,不中断运行;读取失败的帧跳过

use std::path::Path;
use std::time::{Duration, Instant};

use image::RgbImage;
use tracing::{debug, info, warn};

use super::aggregator::{FlushOutcome, ResultAggregator};
use super::render::{plot_tracking, LabelFont};
use crate::annotation::GroundTruthAnnotation;
use crate::detection::{filter, rescale, Candidate, Detection, IdentityResolver, PatchExtractor, Track, Tracker};
use crate::error::{FrameFault, Result};
use crate::input::{FrameSink, FrameSource};
use crate::models::Detector;

/// 进度日志间隔 (帧)
const PROGRESS_INTERVAL: u64 = 20;
/// 连续读取失败达到此次数时结束输入
const MAX_CONSECUTIVE_SOURCE_ERRORS: u32 = 5;

/// 单帧处理阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStage {
    Detect,
    Filter,
    ExtractPatches,
    Resolve,
    TrackUpdate,
    RenderRecord,
}

/// 单帧处理报告
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub frame_id: u64,
    /// 实际经过的阶段 (按顺序)
    pub path: Vec<FrameStage>,
    /// 送入跟踪器的候选数 (跟踪器未更新时为 0)
    pub candidates: usize,
    pub tracker_updated: bool,
    pub tracks_recorded: usize,
    pub faults: Vec<FrameFault>,
    /// 渲染后的帧
    pub image: RgbImage,
}

impl FrameReport {
    pub fn used_ground_truth(&self) -> bool {
        self.path == [FrameStage::Detect, FrameStage::TrackUpdate, FrameStage::RenderRecord]
    }
}

/// 运行汇总
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// 处理过的帧数
    pub frames: u64,
    /// 读取失败而跳过的帧数
    pub skipped: u64,
    pub records: usize,
    pub faults: usize,
    pub flush: FlushOutcome,
    pub elapsed: Duration,
}

/// 平均耗时计时器
#[derive(Debug, Default)]
struct Timer {
    start: Option<Instant>,
    total: Duration,
    calls: u32,
}

impl Timer {
    fn tic(&mut self) {
        self.start = Some(Instant::now());
    }

    fn toc(&mut self) {
        if let Some(start) = self.start.take() {
            self.total += start.elapsed();
            self.calls += 1;
        }
    }

    fn fps(&self) -> f64 {
        if self.calls == 0 {
            return 0.0;
        }
        let average = self.total.as_secs_f64() / self.calls as f64;
        1.0 / average.max(1e-5)
    }
}

pub struct FrameOrchestrator {
    detector: Box<dyn Detector>,
    extractor: PatchExtractor,
    resolver: IdentityResolver,
    tracker: Box<dyn Tracker>,
    aggregator: ResultAggregator,
    /// 仅在开启标注覆盖时存在
    ground_truth: Option<GroundTruthAnnotation>,
    low_threshold: f32,
    font: Option<LabelFont>,
    first_frame_id: u64,
    processed: u64,
    timer: Timer,
}

impl FrameOrchestrator {
    pub fn new(
        detector: Box<dyn Detector>,
        extractor: PatchExtractor,
        resolver: IdentityResolver,
        tracker: Box<dyn Tracker>,
        aggregator: ResultAggregator,
        low_threshold: f32,
    ) -> Self {
        Self {
            detector,
            extractor,
            resolver,
            tracker,
            aggregator,
            ground_truth: None,
            low_threshold,
            font: None,
            first_frame_id: 0,
            processed: 0,
            timer: Timer::default(),
        }
    }

    /// 开启标注覆盖
    pub fn with_ground_truth(mut self, annotation: GroundTruthAnnotation) -> Self {
        self.ground_truth = Some(annotation);
        self
    }

    pub fn with_font(mut self, font: LabelFont) -> Self {
        self.font = Some(font);
        self
    }

    /// 第一帧的帧号 (视频 0,图片序列 1)
    pub fn with_first_frame_id(mut self, first: u64) -> Self {
        self.first_frame_id = first;
        self
    }

    pub fn aggregator(&self) -> &ResultAggregator {
        &self.aggregator
    }

    pub fn tracker(&self) -> &dyn Tracker {
        self.tracker.as_ref()
    }

    /// 处理一帧
    pub fn process_frame(&mut self, frame_id: u64, frame: &RgbImage) -> FrameReport {
        self.timer.tic();
        let mut report = FrameReport {
            frame_id,
            path: vec![FrameStage::Detect],
            candidates: 0,
            tracker_updated: false,
            tracks_recorded: 0,
            faults: Vec::new(),
            image: RgbImage::new(0, 0),
        };

        let candidates = match self.ground_truth.as_ref().and_then(|gt| gt.get(frame_id)) {
            Some(gt) => {
                debug!(frame_id, boxes = gt.identities.len(), "使用标注覆盖检测");
                Some(gt.candidates())
            }
            None => self.detect_and_resolve(frame, &mut report),
        };

        let tracks = match candidates {
            Some(candidates) => self.update_tracker(frame, &candidates, &mut report),
            None => None,
        };

        report.path.push(FrameStage::RenderRecord);
        self.processed += 1;
        match tracks {
            Some(tracks) => {
                let kept = self.aggregator.record(frame_id, &tracks);
                report.tracks_recorded = kept.len();
                self.timer.toc();
                report.image = plot_tracking(frame, &kept, self.processed, self.timer.fps(), self.font.as_ref());
            }
            None => {
                self.timer.toc();
                report.image = frame.clone();
            }
        }

        for fault in &report.faults {
            debug!(frame_id, %fault, "frame fault");
        }
        report
    }

    /// 检测 → 过滤 → 裁剪 → 身份解析
    ///
    /// 返回 `None` 表示本帧不更新跟踪器
    fn detect_and_resolve(&mut self, frame: &RgbImage, report: &mut FrameReport) -> Option<Vec<Candidate>> {
        let frame_id = report.frame_id;
        let mut raw = match self.detector.detect(frame) {
            Ok(Some(raw)) if raw.nrows() > 0 => raw,
            // 空输出与 None 同样视为本帧没有检测
            Ok(_) => return None,
            Err(e) => {
                Self::fault(report, FrameFault::Detector(format!("{e:#}")));
                return None;
            }
        };

        // 1. 检测器坐标 → 原始帧坐标,置信度过滤
        report.path.push(FrameStage::Filter);
        let (in_h, in_w) = self.detector.input_size();
        if let Err(e) = rescale(&mut raw, frame.height(), frame.width(), in_h, in_w) {
            Self::fault(report, FrameFault::Detector(e.to_string()));
            return None;
        }
        let detections: Vec<Detection> = match filter(&raw.view(), self.low_threshold) {
            Ok(detections) => detections,
            Err(fault) => {
                Self::fault(report, fault);
                return None;
            }
        };

        // 2. 裁剪图像块
        report.path.push(FrameStage::ExtractPatches);
        let (patches, skipped) = self.extractor.patches(frame, &detections);
        for source_index in skipped {
            Self::fault(report, FrameFault::EmptyCrop { source_index });
        }

        // 3. 身份解析
        report.path.push(FrameStage::Resolve);
        let resolution = self.resolver.resolve(&patches);
        let aborted = resolution.aborted();
        report.faults.extend(resolution.faults.iter().cloned());
        if aborted {
            return None;
        }

        debug!(
            frame_id,
            detections = detections.len(),
            patches = patches.len(),
            surviving = resolution.surviving.len(),
            "身份解析完成"
        );

        Some(
            resolution
                .surviving
                .iter()
                .map(|&idx| Candidate {
                    detection: detections[idx].clone(),
                    identity: resolution.identity_of(idx),
                })
                .collect(),
        )
    }

    fn update_tracker(
        &mut self,
        frame: &RgbImage,
        candidates: &[Candidate],
        report: &mut FrameReport,
    ) -> Option<Vec<Track>> {
        report.path.push(FrameStage::TrackUpdate);
        report.candidates = candidates.len();
        match self.tracker.update(candidates, frame) {
            Ok(tracks) => {
                report.tracker_updated = true;
                Some(tracks)
            }
            Err(e) => {
                Self::fault(report, FrameFault::Tracker(format!("{e:#}")));
                None
            }
        }
    }

    fn fault(report: &mut FrameReport, fault: FrameFault) {
        warn!(frame_id = report.frame_id, %fault, "帧处理错误,已跳过");
        report.faults.push(fault);
    }

    /// 按顺序处理所有帧,渲染帧写入 `sink`,结束时写出结果文件
    ///
    /// 单帧读取失败记录后跳过 (占用一个帧号);连续失败过多时提前结束输入。
    /// 无论中途是否出错,sink 都会收尾,已有结果都会写出。
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        mut sink: Option<&mut dyn FrameSink>,
        results_path: &Path,
    ) -> Result<RunSummary> {
        let started = Instant::now();
        let mut stats = RunStats::default();

        let streamed = self.stream(source, sink.as_deref_mut(), &mut stats);
        let finished = match sink {
            Some(sink) => sink.finish(),
            None => Ok(()),
        };
        let flush = self.aggregator.flush(results_path)?;
        streamed?;
        finished?;

        let summary = RunSummary {
            frames: stats.frames,
            skipped: stats.skipped,
            records: self.aggregator.len(),
            faults: stats.faults,
            flush,
            elapsed: started.elapsed(),
        };
        info!(
            frames = summary.frames,
            skipped = summary.skipped,
            records = summary.records,
            faults = summary.faults,
            elapsed_s = summary.elapsed.as_secs_f64(),
            "处理完成"
        );
        Ok(summary)
    }

    fn stream(
        &mut self,
        source: &mut dyn FrameSource,
        mut sink: Option<&mut (dyn FrameSink + '_)>,
        stats: &mut RunStats,
    ) -> Result<()> {
        let mut position = 0u64;
        let mut consecutive_errors = 0u32;

        loop {
            let frame_id = self.first_frame_id + position;
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    let fault = FrameFault::Source(e.to_string());
                    warn!(frame_id, %fault, "读取帧失败,已跳过");
                    position += 1;
                    stats.skipped += 1;
                    stats.faults += 1;
                    consecutive_errors += 1;
                    if consecutive_errors >= MAX_CONSECUTIVE_SOURCE_ERRORS {
                        warn!(consecutive_errors, "连续读取失败,结束输入");
                        break;
                    }
                    continue;
                }
            };
            consecutive_errors = 0;
            position += 1;

            if stats.frames % PROGRESS_INTERVAL == 0 {
                info!("Processing frame {} ({:.2} fps)", frame_id, self.timer.fps());
            }
            let report = self.process_frame(frame_id, &frame.image);
            stats.faults += report.faults.len();
            if let Some(sink) = sink.as_deref_mut() {
                sink.write(frame_id, frame.name.as_deref(), &report.image)?;
            }
            stats.frames += 1;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct RunStats {
    frames: u64,
    skipped: u64,
    faults: usize,
}
