//! 视频解码/编码 (ez-ffmpeg)
//!
//! 解码: `format=rgb24` 滤镜 → 输出端帧管线中的 `RgbGrabber` 逐帧拷贝为 RgbImage → 有界通道
//! 编码: 读回调从通道取 rgb24 原始帧 → rawvideo 输入 → mpeg4 (与 mp4v 等价)
//!
//! FfmpegContext 在独立线程中构建和运行,调用方只看到通道两端。

use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::stream_info::{find_video_stream_info, StreamInfo};
use ez_ffmpeg::{AVMediaType, FfmpegContext, Frame as AvFrame, Input, Output};
use image::RgbImage;
use tracing::{debug, info, warn};

use super::{Frame, FrameSink, FrameSource};
use crate::error::{PipelineError, Result};

/// 解码/编码通道容量 (帧)
const FRAME_QUEUE: usize = 4;
const DEFAULT_FPS: f64 = 30.0;
/// AVPixelFormat::AV_PIX_FMT_RGB24
const AV_PIX_FMT_RGB24: i32 = 2;
/// FFERRTAG('E','O','F',' ')
const AVERROR_EOF: i32 = -0x2046_4F45;

type ThreadResult = std::result::Result<(), String>;

/// 帧率不可用时回退到 30
fn sanitize_fps(fps: f64) -> f64 {
    if fps.is_finite() && fps > 0.0 {
        fps
    } else {
        DEFAULT_FPS
    }
}

/// 在独立线程中构建并运行 FfmpegContext
///
/// 返回线程句柄和启动结果通道 (启动成功或失败时各发送一次)
fn run_context<F>(name: &str, build: F) -> Result<(JoinHandle<ThreadResult>, Receiver<ThreadResult>)>
where
    F: FnOnce() -> std::result::Result<FfmpegContext, String> + Send + 'static,
{
    let (ready_tx, ready_rx) = bounded::<ThreadResult>(1);
    let handle = thread::Builder::new()
        .name(name.into())
        .spawn(move || {
            let started = build().and_then(|ctx| ctx.start().map_err(|e| format!("启动失败: {e}")));
            let sch = match started {
                Ok(sch) => sch,
                Err(e) => {
                    let _ = ready_tx.send(Err(e.clone()));
                    return Err(e);
                }
            };
            let _ = ready_tx.send(Ok(()));
            sch.wait().map_err(|e| e.to_string())
        })
        .map_err(|e| PipelineError::Source(format!("failed to spawn {name} thread: {e}")))?;
    Ok((handle, ready_rx))
}

fn join_context(handle: JoinHandle<ThreadResult>, what: &str) -> Result<()> {
    match handle.join() {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(PipelineError::Source(format!("{what}: {e}"))),
        Err(_) => Err(PipelineError::Source(format!("{what}: ffmpeg thread panicked"))),
    }
}

/// rgb24 AVFrame → RgbImage (按行拷贝,去掉行对齐填充)
///
/// 空帧/损坏帧/非 rgb24 帧返回 `None`
unsafe fn frame_to_rgb(frame: &AvFrame) -> Option<RgbImage> {
    if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
        return None;
    }
    let raw = &*frame.as_ptr();
    if raw.format != AV_PIX_FMT_RGB24 || raw.width <= 0 || raw.height <= 0 {
        return None;
    }
    let (width, height) = (raw.width as usize, raw.height as usize);
    let row = width * 3;
    let stride = raw.linesize[0];
    let data = raw.data[0];
    if data.is_null() || stride < row as i32 {
        return None;
    }

    let mut buf = Vec::with_capacity(row * height);
    for y in 0..height {
        let src = std::slice::from_raw_parts(data.add(y * stride as usize), row);
        buf.extend_from_slice(src);
    }
    RgbImage::from_raw(width as u32, height as u32, buf)
}

/// 解码过滤器: rgb24 帧 → 通道
struct RgbGrabber {
    tx: Option<Sender<Result<Frame>>>,
    total: u64,
    dropped: u64,
}

impl FrameFilter for RgbGrabber {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn filter_frame(
        &mut self,
        frame: AvFrame,
        _ctx: &FrameFilterContext,
    ) -> std::result::Result<Option<AvFrame>, String> {
        let Some(tx) = &self.tx else {
            return Err("decoder closed".to_string());
        };
        self.total += 1;

        match unsafe { frame_to_rgb(&frame) } {
            Some(image) => {
                // 消费端已退出时停止解码
                if tx.send(Ok(Frame::new(image))).is_err() {
                    return Err("frame receiver dropped".to_string());
                }
            }
            None => {
                self.dropped += 1;
                if self.dropped <= 10 {
                    warn!(frame = self.total, "⚠️ 丢弃帧: 空帧/损坏帧");
                }
            }
        }
        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        self.tx = None;
        debug!(total = self.total, dropped = self.dropped, "解码线程退出");
    }
}

/// 视频解码器 (文件或摄像头)
pub struct VideoReader {
    source: String,
    rx: Option<Receiver<Result<Frame>>>,
    handle: Option<JoinHandle<ThreadResult>>,
    width: u32,
    height: u32,
    fps: f64,
}

impl VideoReader {
    /// 打开视频文件
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::io(path, std::io::Error::from(std::io::ErrorKind::NotFound)));
        }
        let url = path.to_string_lossy().into_owned();
        let info = find_video_stream_info(url.as_str())
            .map_err(|e| PipelineError::Source(format!("failed to read stream info of {url}: {e}")))?;
        let Some(StreamInfo::Video { width, height, fps, .. }) = info else {
            return Err(PipelineError::Source(format!("{url} has no video stream")));
        };
        if width <= 0 || height <= 0 {
            return Err(PipelineError::InvalidFrame {
                width: width.max(0) as u32,
                height: height.max(0) as u32,
            });
        }

        let input_url = url.clone();
        Self::start(
            url,
            width as u32,
            height as u32,
            sanitize_fps(fps as f64),
            move || Input::new(input_url),
            "format=rgb24".to_string(),
        )
    }

    /// 打开本地摄像头 (DirectShow / AVFoundation / V4L2),缩放到指定尺寸
    pub fn camera(camid: u32, width: u32, height: u32, fps: f64) -> Result<Self> {
        let (format, device) = camera_input(camid);
        let fps = sanitize_fps(fps);
        let device_url = device.clone();
        Self::start(
            device,
            width,
            height,
            fps,
            move || {
                let rate = format!("{fps}");
                let size = format!("{width}x{height}");
                Input::new(device_url)
                    .set_format(format)
                    .set_input_opts([("framerate", rate.as_str()), ("video_size", size.as_str())].into())
            },
            format!("scale={width}:{height},format=rgb24"),
        )
    }

    fn start<I>(source: String, width: u32, height: u32, fps: f64, input: I, filter_desc: String) -> Result<Self>
    where
        I: FnOnce() -> Input + Send + 'static,
    {
        let (tx, rx) = bounded::<Result<Frame>>(FRAME_QUEUE);
        let grabber = RgbGrabber {
            tx: Some(tx),
            total: 0,
            dropped: 0,
        };

        let (handle, ready) = run_context("video-decoder", move || {
            let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
            let pipe = pipe.filter("decode", Box::new(grabber));
            let out = create_null_output().add_frame_pipeline(pipe);
            FfmpegContext::builder()
                .input(input())
                .filter_descs([filter_desc.as_str()].into())
                .output(out)
                .build()
                .map_err(|e| format!("构建失败: {e}"))
        })?;

        match ready.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(PipelineError::Source(format!("{source}: {e}"))),
            Err(_) => return Err(PipelineError::Source(format!("{source}: decoder exited during startup"))),
        }

        info!(source = %source, width, height, fps, "🎬 视频解码器启动");
        Ok(Self {
            source,
            rx: Some(rx),
            handle: Some(handle),
            width,
            height,
            fps,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

impl FrameSource for VideoReader {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(rx) = &self.rx else {
            return Ok(None);
        };
        match rx.recv() {
            Ok(item) => item.map(Some),
            Err(_) => {
                // 解码线程结束,发送端已释放
                self.rx = None;
                if let Some(handle) = self.handle.take() {
                    join_context(handle, &self.source)?;
                }
                debug!(source = %self.source, "解码结束");
                Ok(None)
            }
        }
    }

    fn fps(&self) -> f64 {
        self.fps
    }
}

impl Drop for VideoReader {
    fn drop(&mut self) {
        // 关闭接收端,解码线程在下一次发送时退出
        self.rx = None;
    }
}

/// 摄像头输入格式 - 根据平台选择
fn camera_input(camid: u32) -> (&'static str, String) {
    #[cfg(target_os = "windows")]
    {
        ("dshow", format!("video={camid}"))
    }
    #[cfg(target_os = "macos")]
    {
        ("avfoundation", format!("{camid}"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        ("v4l2", format!("/dev/video{camid}"))
    }
}

/// rawvideo 读回调: 从通道按字节流读出帧数据,通道关闭后返回 EOF
struct RawFrameReader {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    offset: usize,
}

impl RawFrameReader {
    fn read(&mut self, buf: &mut [u8]) -> i32 {
        while self.offset >= self.pending.len() {
            match self.rx.recv() {
                Ok(frame) => {
                    self.pending = frame;
                    self.offset = 0;
                }
                Err(_) => return AVERROR_EOF,
            }
        }
        let n = buf.len().min(self.pending.len() - self.offset).min(i32::MAX as usize);
        buf[..n].copy_from_slice(&self.pending[self.offset..self.offset + n]);
        self.offset += n;
        n as i32
    }
}

/// 视频编码器
pub struct VideoWriter {
    path: PathBuf,
    tx: Option<Sender<Vec<u8>>>,
    handle: Option<JoinHandle<ThreadResult>>,
    width: u32,
    height: u32,
    frames: u64,
}

impl VideoWriter {
    pub fn create(path: &Path, width: u32, height: u32, fps: f64) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
        }
        let fps = sanitize_fps(fps);
        let (tx, rx) = bounded::<Vec<u8>>(FRAME_QUEUE);
        let mut reader = RawFrameReader {
            rx,
            pending: Vec::new(),
            offset: 0,
        };
        let out_url = path.to_string_lossy().into_owned();

        // 输入探测会阻塞在第一帧上,这里不等待启动结果
        let (handle, _ready) = run_context("video-encoder", move || {
            let rate = format!("{fps}");
            let size = format!("{width}x{height}");
            let input = Input::new_by_read_callback(move |buf: &mut [u8]| reader.read(buf))
                .set_format("rawvideo")
                .set_input_opts(
                    [
                        ("pixel_format", "rgb24"),
                        ("video_size", size.as_str()),
                        ("framerate", rate.as_str()),
                    ]
                    .into(),
                );
            let output = Output::from(out_url.as_str()).set_video_codec("mpeg4");
            FfmpegContext::builder()
                .input(input)
                .filter_descs(["format=yuv420p"].into())
                .output(output)
                .build()
                .map_err(|e| format!("构建失败: {e}"))
        })?;

        info!(path = %path.display(), width, height, fps, "video save_path");
        Ok(Self {
            path: path.to_path_buf(),
            tx: Some(tx),
            handle: Some(handle),
            width,
            height,
            frames: 0,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    fn join_encoder(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => join_context(handle, &self.path.display().to_string()),
            None => Ok(()),
        }
    }
}

impl FrameSink for VideoWriter {
    fn write(&mut self, _frame_id: u64, _name: Option<&str>, image: &RgbImage) -> Result<()> {
        if image.dimensions() != (self.width, self.height) {
            return Err(PipelineError::InvalidFrame {
                width: image.width(),
                height: image.height(),
            });
        }
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| PipelineError::Sink("video writer already finished".into()))?;
        if tx.send(image.as_raw().clone()).is_err() {
            // 编码线程已退出,取回它的错误
            self.tx = None;
            self.join_encoder()?;
            return Err(PipelineError::Sink(format!("encoder for {} stopped", self.path.display())));
        }
        self.frames += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let Some(tx) = self.tx.take() else {
            return Ok(());
        };
        drop(tx);

        let joined = self.join_encoder();
        if self.frames == 0 {
            // 没有任何帧时 ffmpeg 无法确定输入格式
            if let Err(e) = joined {
                warn!(error = %e, "没有帧写入,视频未生成");
            }
            return Ok(());
        }
        joined?;
        info!(path = %self.path.display(), frames = self.frames, "视频已保存");
        Ok(())
    }
}

impl Drop for VideoWriter {
    fn drop(&mut self) {
        if self.tx.is_some() {
            if let Err(e) = self.finish() {
                warn!(error = %e, "视频编码器未正常结束");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_fps() {
        assert_eq!(sanitize_fps(25.0), 25.0);
        assert_eq!(sanitize_fps(0.0), DEFAULT_FPS);
        assert_eq!(sanitize_fps(f64::NAN), DEFAULT_FPS);
    }

    #[test]
    fn test_raw_reader_streams_frames_then_eof() {
        let (tx, rx) = bounded(4);
        let mut reader = RawFrameReader {
            rx,
            pending: Vec::new(),
            offset: 0,
        };
        tx.send(vec![1, 2, 3, 4, 5]).unwrap();
        tx.send(Vec::new()).unwrap();
        tx.send(vec![6, 7]).unwrap();
        drop(tx);

        let mut buf = [0u8; 3];
        assert_eq!(reader.read(&mut buf), 3);
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(reader.read(&mut buf), 2);
        assert_eq!(&buf[..2], &[4, 5]);
        // 空帧被跳过
        assert_eq!(reader.read(&mut buf), 2);
        assert_eq!(&buf[..2], &[6, 7]);
        assert_eq!(reader.read(&mut buf), AVERROR_EOF);
    }

    #[test]
    fn test_missing_video_is_io_error() {
        let err = VideoReader::open(Path::new("/nonexistent/clip.mp4")).err().unwrap();
        assert!(matches!(err, PipelineError::Io { .. }));
    }

    #[test]
    fn test_finish_without_frames_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = VideoWriter::create(&dir.path().join("empty.mp4"), 32, 32, 10.0).unwrap();
        writer.finish().unwrap();
        writer.finish().unwrap();
        assert_eq!(writer.frames_written(), 0);
    }

    #[test]
    fn test_video_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");

        let mut writer = VideoWriter::create(&path, 64, 48, 10.0).unwrap();
        for i in 0..3u8 {
            writer
                .write(i as u64, None, &RgbImage::from_pixel(64, 48, image::Rgb([i * 40, 0, 0])))
                .unwrap();
        }
        let wrong = writer.write(3, None, &RgbImage::new(10, 10));
        assert!(matches!(wrong, Err(PipelineError::InvalidFrame { .. })));
        writer.finish().unwrap();
        assert_eq!(writer.frames_written(), 3);

        let mut reader = VideoReader::open(&path).unwrap();
        assert_eq!((reader.width(), reader.height()), (64, 48));
        let mut count = 0;
        while let Some(frame) = reader.next_frame().unwrap() {
            assert_eq!(frame.image.dimensions(), (64, 48));
            count += 1;
        }
        assert_eq!(count, 3);
    }
}
