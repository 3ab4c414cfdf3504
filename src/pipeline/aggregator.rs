//! 结果汇总与写出 (Result Aggregator)
//!
//! 每帧跟踪输出先按宽高比/面积过滤,再追加到结果序列;运行结束时一次性写出。
//! 文本格式: `frame,id,x,y,w,h,score,-1,-1,-1`

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::detection::{Track, TrackingResultRecord};
use crate::error::{PipelineError, Result};

/// 轨迹过滤参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// w/h 大于此值的框视为异常 (横向框) 丢弃
    pub aspect_ratio_thresh: f32,
    /// w*h 不大于此值的框丢弃
    pub min_box_area: f32,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            aspect_ratio_thresh: 1.6,
            min_box_area: 10.0,
        }
    }
}

/// flush 结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// 写出了 `lines` 行
    Written { lines: usize },
    /// 自上次写出后没有新记录,文件未改动
    Unchanged,
}

pub struct ResultAggregator {
    config: AggregatorConfig,
    records: Vec<TrackingResultRecord>,
    /// 上次写出时的 (路径, 记录数)
    flushed: Option<(PathBuf, usize)>,
}

impl ResultAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            records: Vec::new(),
            flushed: None,
        }
    }

    fn keep(&self, track: &Track) -> bool {
        let t = &track.tlwh;
        let vertical = t.h > 0.0 && t.w / t.h <= self.config.aspect_ratio_thresh;
        vertical && t.area() > self.config.min_box_area
    }

    /// 记录一帧的跟踪结果,返回通过过滤的轨迹 (用于渲染)
    ///
    /// 过滤只影响输出,不改变跟踪器内部状态
    pub fn record(&mut self, frame_id: u64, tracks: &[Track]) -> Vec<Track> {
        let kept: Vec<Track> = tracks.iter().filter(|t| self.keep(t)).copied().collect();
        self.records.extend(kept.iter().map(|t| TrackingResultRecord {
            frame_id,
            track_id: t.track_id,
            tlwh: t.tlwh,
            score: t.score,
        }));
        kept
    }

    pub fn records(&self) -> &[TrackingResultRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 写出全部记录 (帧顺序,无表头,track_id < 0 的记录跳过)
    ///
    /// 同一路径重复调用且没有新记录时不做任何事;有新记录时整体重写,不会重复写入
    pub fn flush(&mut self, path: &Path) -> Result<FlushOutcome> {
        if let Some((last, count)) = &self.flushed {
            if last == path && *count == self.records.len() {
                return Ok(FlushOutcome::Unchanged);
            }
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
        }
        let file = fs::File::create(path).map_err(|e| PipelineError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        let mut lines = 0;
        for record in self.records.iter().filter(|r| r.track_id >= 0) {
            writer
                .write_all(record.to_line().as_bytes())
                .map_err(|e| PipelineError::io(path, e))?;
            lines += 1;
        }
        writer.flush().map_err(|e| PipelineError::io(path, e))?;

        self.flushed = Some((path.to_path_buf(), self.records.len()));
        info!("save results to {}", path.display());
        Ok(FlushOutcome::Written { lines })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Tlwh;

    fn track(id: i64, w: f32, h: f32) -> Track {
        Track {
            track_id: id,
            tlwh: Tlwh::new(10.0, 20.0, w, h),
            score: 0.9,
        }
    }

    #[test]
    fn test_filter_by_aspect_and_area() {
        let mut agg = ResultAggregator::new(AggregatorConfig::default());
        let kept = agg.record(
            1,
            &[
                track(1, 20.0, 40.0), // 保留
                track(2, 80.0, 40.0), // 横向 2.0 > 1.6
                track(3, 2.0, 5.0),   // 面积 10 不大于 10
                track(4, 16.0, 10.0), // 宽高比恰好 1.6,保留
            ],
        );
        let ids: Vec<i64> = kept.iter().map(|t| t.track_id).collect();
        assert_eq!(ids, vec![1, 4]);
        assert_eq!(agg.len(), 2);
    }

    #[test]
    fn test_records_never_exceed_tracks() {
        let mut agg = ResultAggregator::new(AggregatorConfig::default());
        let tracks: Vec<Track> = (0..5).map(|i| track(i, 10.0 + i as f32, 30.0)).collect();
        let kept = agg.record(3, &tracks);
        assert!(kept.len() <= tracks.len());
        assert!(agg.records().iter().all(|r| r.frame_id == 3));
    }

    #[test]
    fn test_flush_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("results.txt");

        let mut agg = ResultAggregator::new(AggregatorConfig::default());
        agg.record(0, &[track(1, 20.0, 40.0), track(-1, 20.0, 40.0)]);
        agg.record(1, &[track(1, 21.0, 41.0)]);

        assert_eq!(agg.flush(&path).unwrap(), FlushOutcome::Written { lines: 2 });
        let first = fs::read_to_string(&path).unwrap();
        assert_eq!(
            first,
            "0,1,10.0,20.0,20.0,40.0,0.90,-1,-1,-1\n1,1,10.0,20.0,21.0,41.0,0.90,-1,-1,-1\n"
        );

        assert_eq!(agg.flush(&path).unwrap(), FlushOutcome::Unchanged);
        assert_eq!(fs::read_to_string(&path).unwrap(), first);

        agg.record(2, &[track(2, 20.0, 40.0)]);
        assert_eq!(agg.flush(&path).unwrap(), FlushOutcome::Written { lines: 3 });
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 3);
    }

    #[test]
    fn test_empty_flush_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        let mut agg = ResultAggregator::new(AggregatorConfig::default());
        assert_eq!(agg.flush(&path).unwrap(), FlushOutcome::Written { lines: 0 });
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }
}
