//! 端到端场景: 模拟检测器/分类器/跟踪器,真实的过滤、裁剪、汇总和写出

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use image::{Rgb, RgbImage};
use ndarray::{array, Array2};

use player_tracker_rs::detection::{Candidate, IdentityResolver, PatchExtractor, Track, Tracker};
use player_tracker_rs::input::{Frame, FrameSink, FrameSource};
use player_tracker_rs::models::{Detector, RelevanceClassifier};
use player_tracker_rs::pipeline::{AggregatorConfig, FlushOutcome, ResultAggregator};
use player_tracker_rs::{FrameFault, FrameOrchestrator, FrameStage, GroundTruthAnnotation, PipelineError};

struct Frames(Vec<RgbImage>);

impl FrameSource for Frames {
    fn next_frame(&mut self) -> player_tracker_rs::Result<Option<Frame>> {
        if self.0.is_empty() {
            return Ok(None);
        }
        Ok(Some(Frame::new(self.0.remove(0))))
    }

    fn fps(&self) -> f64 {
        30.0
    }
}

/// 按脚本返回帧或读取错误
struct Flaky(Vec<Option<RgbImage>>);

impl FrameSource for Flaky {
    fn next_frame(&mut self) -> player_tracker_rs::Result<Option<Frame>> {
        if self.0.is_empty() {
            return Ok(None);
        }
        match self.0.remove(0) {
            Some(image) => Ok(Some(Frame::new(image))),
            None => Err(PipelineError::Source("truncated packet".into())),
        }
    }

    fn fps(&self) -> f64 {
        30.0
    }
}

/// 一帧之后永远读取失败
struct DeadAfterFirst(bool);

impl FrameSource for DeadAfterFirst {
    fn next_frame(&mut self) -> player_tracker_rs::Result<Option<Frame>> {
        if std::mem::replace(&mut self.0, true) {
            return Err(PipelineError::Source("device unplugged".into()));
        }
        Ok(Some(Frame::new(gray(100, 100))))
    }

    fn fps(&self) -> f64 {
        30.0
    }
}

#[derive(Default)]
struct CollectSink {
    frames: Vec<(u64, RgbImage)>,
    finished: u32,
    /// 写入第 n 帧时失败
    fail_on: Option<usize>,
}

impl FrameSink for CollectSink {
    fn write(&mut self, frame_id: u64, _name: Option<&str>, image: &RgbImage) -> player_tracker_rs::Result<()> {
        if self.fail_on == Some(self.frames.len()) {
            return Err(PipelineError::Sink("disk full".into()));
        }
        self.frames.push((frame_id, image.clone()));
        Ok(())
    }

    fn finish(&mut self) -> player_tracker_rs::Result<()> {
        self.finished += 1;
        Ok(())
    }
}

struct FixedDetector(Option<Array2<f32>>);

impl Detector for FixedDetector {
    fn detect(&mut self, _frame: &RgbImage) -> anyhow::Result<Option<Array2<f32>>> {
        Ok(self.0.clone())
    }

    fn input_size(&self) -> (u32, u32) {
        (100, 100)
    }
}

struct AllRelevant {
    batches: Arc<Mutex<Vec<usize>>>,
}

impl RelevanceClassifier for AllRelevant {
    fn classify(&mut self, patches: &[&RgbImage]) -> anyhow::Result<Vec<usize>> {
        self.batches.lock().unwrap().push(patches.len());
        Ok(vec![1; patches.len()])
    }
}

struct Failing;

impl RelevanceClassifier for Failing {
    fn classify(&mut self, _patches: &[&RgbImage]) -> anyhow::Result<Vec<usize>> {
        Err(anyhow!("device lost"))
    }
}

/// 每个候选一条轨迹,编号依次递增
struct EchoTracker {
    updates: Arc<Mutex<Vec<Vec<Candidate>>>>,
}

impl Tracker for EchoTracker {
    fn update(&mut self, candidates: &[Candidate], _frame: &RgbImage) -> anyhow::Result<Vec<Track>> {
        self.updates.lock().unwrap().push(candidates.to_vec());
        Ok(candidates
            .iter()
            .enumerate()
            .map(|(i, c)| Track {
                track_id: i as i64 + 1,
                tlwh: c.detection.bbox.to_tlwh(),
                score: c.detection.score,
            })
            .collect())
    }

    fn reset(&mut self) {}

    fn track_count(&self) -> usize {
        0
    }
}

fn build(
    detections: Option<Array2<f32>>,
    classifier: Box<dyn RelevanceClassifier>,
) -> (FrameOrchestrator, Arc<Mutex<Vec<Vec<Candidate>>>>) {
    let updates = Arc::new(Mutex::new(Vec::new()));
    let orchestrator = FrameOrchestrator::new(
        Box::new(FixedDetector(detections)),
        PatchExtractor::default(),
        IdentityResolver::new(classifier, None, 1),
        Box::new(EchoTracker {
            updates: updates.clone(),
        }),
        ResultAggregator::new(AggregatorConfig::default()),
        0.1,
    );
    (orchestrator, updates)
}

fn gray(w: u32, h: u32) -> RgbImage {
    RgbImage::from_pixel(w, h, Rgb([90, 90, 90]))
}

#[test]
fn empty_detections_yield_empty_results_and_untouched_frames() {
    let dir = tempfile::tempdir().unwrap();
    let results = dir.path().join("run").join("results.txt");
    let (mut orchestrator, updates) = build(None, Box::new(AllRelevant { batches: Default::default() }));

    let mut source = Frames(vec![gray(64, 48), gray(64, 48), gray(64, 48)]);
    let mut sink = CollectSink::default();
    let summary = orchestrator.run(&mut source, Some(&mut sink), &results).unwrap();

    assert_eq!(summary.frames, 3);
    assert_eq!(summary.records, 0);
    assert_eq!(summary.flush, FlushOutcome::Written { lines: 0 });
    assert_eq!(fs::read_to_string(&results).unwrap(), "");

    assert_eq!(sink.finished, 1);
    let ids: Vec<u64> = sink.frames.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![0, 1, 2]);
    assert!(sink.frames.iter().all(|(_, img)| *img == gray(64, 48)));
    assert!(updates.lock().unwrap().is_empty());
}

#[test]
fn empty_crop_is_skipped_and_valid_box_reaches_tracker() {
    // 帧 200x200, 输入 100x100 → 坐标 ×2
    let raw = array![
        [10.0, 10.0, 30.0, 50.0, 0.9],   // 有效 → (20,20)-(60,100)
        [150.0, 150.0, 180.0, 190.0, 0.8], // 完全在帧外 → 空裁剪
    ];
    let batches = Arc::new(Mutex::new(Vec::new()));
    let (mut orchestrator, updates) = build(Some(raw), Box::new(AllRelevant { batches: batches.clone() }));

    let report = orchestrator.process_frame(0, &gray(200, 200));

    assert_eq!(*batches.lock().unwrap(), vec![1]);
    assert_eq!(report.faults, vec![FrameFault::EmptyCrop { source_index: 1 }]);
    assert_eq!(report.candidates, 1);
    let updates = updates.lock().unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0][0].detection.bbox.x1, 20.0);
    assert_eq!(updates[0][0].detection.bbox.y2, 100.0);
    assert_eq!(report.tracks_recorded, 1);
}

#[test]
fn ground_truth_override_bypasses_detector() {
    let doc = r#"{
        "labels": [
            { "data": { "frames": [ { "frame": 0, "points": [10, 10, 30, 60] } ] } },
            { "data": { "frames": [ { "frame": 0, "points": [50, 10, 70, 60] } ] } }
        ],
        "info": { "url": [ "clip/000004.jpg" ] }
    }"#;
    let annotation = GroundTruthAnnotation::parse(doc, Path::new("gt.json")).unwrap();
    let (orchestrator, updates) = build(
        Some(array![[0.0, 0.0, 5.0, 5.0, 0.9]]),
        Box::new(Failing),
    );
    let mut orchestrator = orchestrator.with_ground_truth(annotation);

    let report = orchestrator.process_frame(4, &gray(100, 100));
    assert_eq!(
        report.path,
        vec![FrameStage::Detect, FrameStage::TrackUpdate, FrameStage::RenderRecord]
    );
    assert!(report.faults.is_empty());
    let updates = updates.lock().unwrap();
    let identities: Vec<Option<i64>> = updates[0].iter().map(|c| c.identity).collect();
    assert_eq!(identities, vec![Some(0), Some(1)]);
    assert!(updates[0].iter().all(|c| c.detection.score == 1.0));
}

#[test]
fn classifier_failure_aborts_frame_but_run_continues() {
    let dir = tempfile::tempdir().unwrap();
    let results = dir.path().join("results.txt");
    let (mut orchestrator, updates) = build(Some(array![[10.0, 10.0, 30.0, 50.0, 0.9]]), Box::new(Failing));

    let mut source = Frames(vec![gray(100, 100), gray(100, 100)]);
    let summary = orchestrator.run(&mut source, None, &results).unwrap();

    assert_eq!(summary.frames, 2);
    assert_eq!(summary.faults, 2);
    assert_eq!(summary.records, 0);
    assert!(updates.lock().unwrap().is_empty());
    assert!(results.exists());
}

fn result_frames(path: &Path) -> Vec<u64> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| line.split(',').next().unwrap().parse().unwrap())
        .collect()
}

#[test]
fn unreadable_frame_is_skipped_and_results_still_written() {
    let dir = tempfile::tempdir().unwrap();
    let results = dir.path().join("results.txt");
    let (mut orchestrator, updates) = build(
        Some(array![[10.0, 10.0, 30.0, 50.0, 0.9]]),
        Box::new(AllRelevant { batches: Default::default() }),
    );

    let mut source = Flaky(vec![Some(gray(100, 100)), None, Some(gray(100, 100))]);
    let mut sink = CollectSink::default();
    let summary = orchestrator.run(&mut source, Some(&mut sink), &results).unwrap();

    assert_eq!(summary.frames, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.faults, 1);
    assert_eq!(updates.lock().unwrap().len(), 2);
    // 跳过的帧仍占用帧号
    assert_eq!(result_frames(&results), vec![0, 2]);
    let ids: Vec<u64> = sink.frames.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![0, 2]);
    assert_eq!(sink.finished, 1);
}

#[test]
fn persistent_read_failure_ends_stream_with_partial_results() {
    let dir = tempfile::tempdir().unwrap();
    let results = dir.path().join("results.txt");
    let (mut orchestrator, _) = build(
        Some(array![[10.0, 10.0, 30.0, 50.0, 0.9]]),
        Box::new(AllRelevant { batches: Default::default() }),
    );

    let mut source = DeadAfterFirst(false);
    let mut sink = CollectSink::default();
    let summary = orchestrator.run(&mut source, Some(&mut sink), &results).unwrap();

    assert_eq!(summary.frames, 1);
    assert!(summary.skipped > 0);
    assert_eq!(result_frames(&results), vec![0]);
    assert_eq!(sink.finished, 1);
}

#[test]
fn sink_failure_is_reported_after_flush() {
    let dir = tempfile::tempdir().unwrap();
    let results = dir.path().join("results.txt");
    let (mut orchestrator, _) = build(
        Some(array![[10.0, 10.0, 30.0, 50.0, 0.9]]),
        Box::new(AllRelevant { batches: Default::default() }),
    );

    let mut source = Frames(vec![gray(100, 100), gray(100, 100), gray(100, 100)]);
    let mut sink = CollectSink {
        fail_on: Some(1),
        ..Default::default()
    };
    let err = orchestrator.run(&mut source, Some(&mut sink), &results).unwrap_err();

    assert!(matches!(err, PipelineError::Sink(_)));
    assert_eq!(sink.finished, 1);
    assert_eq!(result_frames(&results), vec![0, 1]);
}
