//! ByteTrack 算法实现 (带身份提示)
//! ByteTrack: Simple and effective multi-object tracking
//!
//! 核心思想:
//! 1. 高低分检测框分开处理
//! 2. 高分框优先匹配 (IOU)
//! 3. 低分框救援丢失的轨迹
//! 4. 身份提示作为匹配约束: 双方身份已知且不同则禁止匹配,相同则优先

use anyhow::Result;
use image::RgbImage;
use serde::{Deserialize, Serialize};

use super::tracker::{KalmanBoxFilter, Tracker};
use super::types::{BBox, Candidate, Track};

/// 跟踪器参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// 第一轮匹配的分数阈值
    pub track_high_thresh: f32,
    /// 最低检测分数 (低于此值直接丢弃)
    pub track_low_thresh: f32,
    /// 新建轨迹的分数阈值
    pub new_track_thresh: f32,
    /// 保留丢失轨迹的帧数 (按30fps计)
    pub track_buffer: u32,
    /// 匹配代价阈值 (1 - IOU)
    pub match_thresh: f32,
    /// 低分救援匹配的 IOU 阈值
    pub low_iou_thresh: f32,
    /// 身份一致时的代价奖励
    pub identity_bonus: f32,
    pub kalman_process_noise: f32,
    pub kalman_obs_noise: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            track_high_thresh: 0.2,
            track_low_thresh: 0.1,
            new_track_thresh: 0.7,
            track_buffer: 30,
            match_thresh: 0.8,
            low_iou_thresh: 0.5,
            identity_bonus: 0.2,
            kalman_process_noise: 0.1,
            kalman_obs_noise: 0.5,
        }
    }
}

/// ByteTrack 跟踪对象
#[derive(Clone, Debug)]
struct ByteTrack {
    id: i64,
    bbox: BBox,
    kalman: KalmanBoxFilter,
    frames_lost: u32,
    total_frames: u32,
    score: f32,
    /// 最近一次的身份提示
    identity: Option<i64>,
}

impl ByteTrack {
    fn new(id: i64, candidate: &Candidate, config: &TrackerConfig) -> Self {
        let kalman = KalmanBoxFilter::new(
            &candidate.detection.bbox,
            config.kalman_process_noise,
            config.kalman_obs_noise,
        );
        Self {
            id,
            bbox: kalman.state_bbox(),
            kalman,
            frames_lost: 0,
            total_frames: 1,
            score: candidate.detection.score,
            identity: candidate.identity,
        }
    }

    fn predict(&mut self) {
        self.kalman.predict();
        self.bbox = self.kalman.state_bbox();
    }

    fn update(&mut self, candidate: &Candidate) {
        self.kalman.update(&candidate.detection.bbox);
        self.bbox = self.kalman.state_bbox();
        self.frames_lost = 0;
        self.total_frames += 1;
        self.score = candidate.detection.score;
        if candidate.identity.is_some() {
            self.identity = candidate.identity;
        }
    }

    fn mark_lost(&mut self) {
        self.frames_lost += 1;
    }

    fn to_track(&self) -> Track {
        Track {
            track_id: self.id,
            tlwh: self.bbox.to_tlwh(),
            score: self.score,
        }
    }
}

/// ByteTrack 追踪器
pub struct ByteTracker {
    tracks: Vec<ByteTrack>,
    next_id: i64,
    max_lost_frames: u32,
    config: TrackerConfig,
}

impl ByteTracker {
    pub fn new(config: TrackerConfig, frame_rate: u32) -> Self {
        let max_lost_frames = (config.track_buffer as f32 * frame_rate as f32 / 30.0) as u32;
        Self {
            tracks: Vec::new(),
            next_id: 1,
            max_lost_frames,
            config,
        }
    }

    /// ByteTrack 三步匹配
    fn step(&mut self, candidates: &[Candidate]) -> Vec<Track> {
        // 1. 所有轨迹先预测
        for track in &mut self.tracks {
            track.predict();
        }

        // 2. 分离高低分检测框
        let mut high_dets = Vec::new();
        let mut low_dets = Vec::new();
        for (idx, c) in candidates.iter().enumerate() {
            if c.detection.score >= self.config.track_high_thresh {
                high_dets.push(idx);
            } else if c.detection.score > self.config.track_low_thresh {
                low_dets.push(idx);
            }
        }

        let mut matched_det = vec![false; candidates.len()];
        let mut matched_track = vec![false; self.tracks.len()];

        // 3. 第一轮匹配: 高分检测 + 所有轨迹
        let all_tracks: Vec<usize> = (0..self.tracks.len()).collect();
        let assignments = self.associate(
            candidates,
            &high_dets,
            &all_tracks,
            1.0 - self.config.match_thresh,
        );
        for (det_idx, track_idx) in assignments {
            matched_det[det_idx] = true;
            matched_track[track_idx] = true;
            self.tracks[track_idx].update(&candidates[det_idx]);
        }

        // 4. 第二轮匹配: 低分检测 + 未匹配的轨迹 (救援)
        let unmatched_tracks: Vec<usize> = (0..self.tracks.len())
            .filter(|&idx| !matched_track[idx])
            .collect();
        let low_assignments =
            self.associate(candidates, &low_dets, &unmatched_tracks, self.config.low_iou_thresh);
        for (det_idx, track_idx) in low_assignments {
            matched_det[det_idx] = true;
            matched_track[track_idx] = true;
            self.tracks[track_idx].update(&candidates[det_idx]);
        }

        // 5. 未匹配的轨迹 → 标记丢失
        for (track_idx, &matched) in matched_track.iter().enumerate() {
            if !matched {
                self.tracks[track_idx].mark_lost();
            }
        }

        // 6. 未匹配的高分检测 → 新建轨迹
        for (det_idx, &matched) in matched_det.iter().enumerate() {
            let candidate = &candidates[det_idx];
            if !matched && candidate.detection.score >= self.config.new_track_thresh {
                let track = ByteTrack::new(self.next_id, candidate, &self.config);
                self.tracks.push(track);
                self.next_id += 1;
            }
        }

        // 7. 删除丢失太久的轨迹
        let max_lost = self.max_lost_frames;
        self.tracks.retain(|t| t.frames_lost <= max_lost);

        self.tracks
            .iter()
            .filter(|t| t.frames_lost == 0)
            .map(ByteTrack::to_track)
            .collect()
    }

    /// IOU 贪心匹配,身份冲突的组合不参与
    fn associate(
        &self,
        candidates: &[Candidate],
        det_indices: &[usize],
        track_indices: &[usize],
        iou_threshold: f32,
    ) -> Vec<(usize, usize)> {
        if det_indices.is_empty() || track_indices.is_empty() {
            return Vec::new();
        }

        let mut pairs = Vec::new();
        for (local_det, &det_idx) in det_indices.iter().enumerate() {
            let candidate = &candidates[det_idx];
            for (local_track, &track_idx) in track_indices.iter().enumerate() {
                let track = &self.tracks[track_idx];
                let same_identity = match (candidate.identity, track.identity) {
                    (Some(a), Some(b)) if a != b => continue,
                    (Some(_), Some(_)) => true,
                    _ => false,
                };
                let iou = candidate.detection.bbox.iou(&track.kalman.predicted_bbox());
                if iou >= iou_threshold {
                    let mut cost = 1.0 - iou;
                    if same_identity {
                        cost -= self.config.identity_bonus;
                    }
                    pairs.push((cost, det_idx, local_det, track_idx, local_track));
                }
            }
        }

        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut assignments = Vec::new();
        let mut used_det = vec![false; det_indices.len()];
        let mut used_track = vec![false; track_indices.len()];
        for (_, det_idx, local_det, track_idx, local_track) in pairs {
            if !used_det[local_det] && !used_track[local_track] {
                assignments.push((det_idx, track_idx));
                used_det[local_det] = true;
                used_track[local_track] = true;
            }
        }
        assignments
    }
}

impl Tracker for ByteTracker {
    fn update(&mut self, candidates: &[Candidate], _frame: &RgbImage) -> Result<Vec<Track>> {
        Ok(self.step(candidates))
    }

    fn reset(&mut self) {
        self.tracks.clear();
        self.next_id = 1;
    }

    fn track_count(&self) -> usize {
        self.tracks.len()
    }
}
