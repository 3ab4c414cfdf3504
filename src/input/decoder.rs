/// 预解码线程
///
/// 解码线程按顺序把帧写入有界通道,消费端仍然逐帧顺序处理。
/// 通道满时解码线程阻塞,内存占用上限为 `capacity` 帧。
/// 单帧读取失败不会结束解码线程。
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver};
use tracing::{debug, error};

use super::{Frame, FrameSource};
use crate::error::{PipelineError, Result};

/// 解码线程的消费端,本身也是一个 `FrameSource`
pub struct DecodeAhead {
    rx: Receiver<Result<Frame>>,
    handle: Option<JoinHandle<()>>,
    fps: f64,
}

/// 启动解码线程
pub fn spawn_decoder<S>(mut source: S, capacity: usize) -> Result<DecodeAhead>
where
    S: FrameSource + Send + 'static,
{
    let fps = source.fps();
    let (tx, rx) = bounded::<Result<Frame>>(capacity.max(1));

    let handle = thread::Builder::new()
        .name("decoder".into())
        .spawn(move || {
            let mut decoded = 0u64;
            loop {
                // 读取失败照常转发,由消费端决定跳过还是结束
                let msg = match source.next_frame() {
                    Ok(Some(frame)) => Ok(frame),
                    Ok(None) => break,
                    Err(e) => {
                        error!(error = %e, "❌ 解码失败");
                        Err(e)
                    }
                };
                if tx.send(msg).is_err() {
                    // 消费端已退出
                    break;
                }
                decoded += 1;
            }
            debug!(decoded, "解码线程退出");
        })
        .map_err(|e| PipelineError::Source(format!("failed to spawn decoder thread: {e}")))?;

    Ok(DecodeAhead {
        rx,
        handle: Some(handle),
        fps,
    })
}

impl FrameSource for DecodeAhead {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match self.rx.recv() {
            Ok(item) => item.map(Some),
            Err(_) => {
                if let Some(handle) = self.handle.take() {
                    handle
                        .join()
                        .map_err(|_| PipelineError::Source("decoder thread panicked".into()))?;
                }
                Ok(None)
            }
        }
    }

    fn fps(&self) -> f64 {
        self.fps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    struct Counting {
        next: u8,
        total: u8,
        fail_at: Option<u8>,
    }

    impl FrameSource for Counting {
        fn next_frame(&mut self) -> Result<Option<Frame>> {
            if self.next == self.total {
                return Ok(None);
            }
            self.next += 1;
            if Some(self.next) == self.fail_at {
                return Err(PipelineError::Source("corrupt packet".into()));
            }
            Ok(Some(Frame::new(RgbImage::from_pixel(1, 1, Rgb([self.next, 0, 0])))))
        }

        fn fps(&self) -> f64 {
            25.0
        }
    }

    #[test]
    fn test_frames_arrive_in_order() {
        let mut stream = spawn_decoder(
            Counting {
                next: 0,
                total: 10,
                fail_at: None,
            },
            2,
        )
        .unwrap();
        assert_eq!(stream.fps(), 25.0);

        let mut seen = Vec::new();
        while let Some(frame) = stream.next_frame().unwrap() {
            seen.push(frame.image.get_pixel(0, 0).0[0]);
        }
        assert_eq!(seen, (1..=10).collect::<Vec<u8>>());
        assert!(stream.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_error_is_forwarded_and_decoding_continues() {
        let mut stream = spawn_decoder(
            Counting {
                next: 0,
                total: 5,
                fail_at: Some(3),
            },
            4,
        )
        .unwrap();
        let mut seen = Vec::new();
        let mut errors = 0;
        loop {
            match stream.next_frame() {
                Ok(Some(frame)) => seen.push(frame.image.get_pixel(0, 0).0[0]),
                Ok(None) => break,
                Err(_) => errors += 1,
            }
        }
        assert_eq!(errors, 1);
        assert_eq!(seen, vec![1, 2, 4, 5]);
    }
}
