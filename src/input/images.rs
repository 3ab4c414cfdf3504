//! 图片目录输入/输出

use std::fs;
use std::path::{Path, PathBuf};

use image::RgbImage;
use tracing::info;

use super::{Frame, FrameSink, FrameSource};
use crate::error::{PipelineError, Result};

/// 支持的图片扩展名
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "webp", "bmp", "png"];

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// 递归收集目录下的图片
fn collect_images(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir).map_err(|e| PipelineError::io(dir, e))? {
        let path = entry.map_err(|e| PipelineError::io(dir, e))?.path();
        if path.is_dir() {
            collect_images(&path, out)?;
        } else if is_image(&path) {
            out.push(path);
        }
    }
    Ok(())
}

/// 图片序列 (单张图片或目录,按路径排序)
pub struct ImageSequence {
    files: Vec<PathBuf>,
    cursor: usize,
    fps: f64,
}

impl ImageSequence {
    pub fn open(path: &Path, fps: f64) -> Result<Self> {
        let files = if path.is_dir() {
            let mut files = Vec::new();
            collect_images(path, &mut files)?;
            files.sort();
            files
        } else if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            return Err(PipelineError::io(path, std::io::Error::from(std::io::ErrorKind::NotFound)));
        };
        info!(path = %path.display(), images = files.len(), "图片序列");
        Ok(Self { files, cursor: 0, fps })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageSequence {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.files.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;

        let image = image::open(path)
            .map_err(|e| PipelineError::Source(format!("failed to read {}: {e}", path.display())))?
            .to_rgb8();
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        Ok(Some(Frame { image, name }))
    }

    fn fps(&self) -> f64 {
        self.fps
    }
}

/// 每帧保存为一个图片文件 (有来源文件名时沿用,否则 `{frame_id:06}.jpg`)
pub struct ImageDirWriter {
    dir: PathBuf,
    written: u64,
}

impl ImageDirWriter {
    pub fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            written: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl FrameSink for ImageDirWriter {
    fn write(&mut self, frame_id: u64, name: Option<&str>, image: &RgbImage) -> Result<()> {
        let file = match name {
            Some(name) => self.dir.join(name),
            None => self.dir.join(format!("{frame_id:06}.jpg")),
        };
        image
            .save(&file)
            .map_err(|e| PipelineError::Sink(format!("failed to write {}: {e}", file.display())))?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        info!(dir = %self.dir.display(), images = self.written, "图片已保存");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_sequence_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.png", "a.jpg", "c.PNG"] {
            RgbImage::from_pixel(4, 3, Rgb([1, 2, 3])).save(dir.path().join(name)).unwrap();
        }
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let mut seq = ImageSequence::open(dir.path(), 30.0).unwrap();
        assert_eq!(seq.len(), 3);
        let mut names = Vec::new();
        while let Some(frame) = seq.next_frame().unwrap() {
            assert_eq!(frame.image.dimensions(), (4, 3));
            names.push(frame.name.unwrap());
        }
        assert_eq!(names, vec!["a.jpg", "b.png", "c.PNG"]);
    }

    #[test]
    fn test_missing_path_is_fatal() {
        assert!(matches!(
            ImageSequence::open(Path::new("/nonexistent/frames"), 30.0),
            Err(PipelineError::Io { .. })
        ));
    }

    #[test]
    fn test_dir_writer_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ImageDirWriter::create(&dir.path().join("vis")).unwrap();
        let img = RgbImage::new(2, 2);
        writer.write(7, None, &img).unwrap();
        writer.write(8, Some("frame.png"), &img).unwrap();
        writer.finish().unwrap();
        assert!(writer.dir().join("000007.jpg").exists());
        assert!(writer.dir().join("frame.png").exists());
    }
}
