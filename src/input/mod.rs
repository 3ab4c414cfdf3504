/// 帧输入/输出系统 (Frame I/O)
///
/// - VideoReader:    ez-ffmpeg 解码 (视频文件/摄像头),帧管线转 RgbImage
/// - ImageSequence:  图片目录,按文件名排序
/// - VideoWriter:    ez-ffmpeg 编码,rawvideo 读回调输入
/// - ImageDirWriter: 每帧一个图片文件
/// - spawn_decoder:  独立解码线程,通过有界通道按顺序送帧
pub mod decoder;
pub mod images;
pub mod video;

pub use decoder::{spawn_decoder, DecodeAhead};
pub use images::{ImageDirWriter, ImageSequence, IMAGE_EXTENSIONS};
pub use video::{VideoReader, VideoWriter};

use image::RgbImage;

use crate::error::Result;

/// 一帧图像
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    /// 来源文件名 (图片模式)
    pub name: Option<String>,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self { image, name: None }
    }
}

/// 帧来源,按原始顺序逐帧产出
pub trait FrameSource {
    /// `Ok(None)` 表示结束
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    fn fps(&self) -> f64;
}

/// 帧输出
pub trait FrameSink {
    fn write(&mut self, frame_id: u64, name: Option<&str>, image: &RgbImage) -> Result<()>;

    /// 收尾 (只执行一次,重复调用无副作用)
    fn finish(&mut self) -> Result<()>;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }

    fn fps(&self) -> f64 {
        (**self).fps()
    }
}

impl<T: FrameSink + ?Sized> FrameSink for Box<T> {
    fn write(&mut self, frame_id: u64, name: Option<&str>, image: &RgbImage) -> Result<()> {
        (**self).write(frame_id, name, image)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}
