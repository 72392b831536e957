// THEORY:
// A frame source is an external collaborator: a video file, a camera, a folder
// of stills. The engine only needs to open it, pull frames in order until it
// runs dry, and let go of it. Letting go is `Drop`: a reader owned by a session
// is released on every exit path, including cancellation, without the pipeline
// having to remember to do it.

use crate::error::SourceError;
use image::RgbImage;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tracing::debug;

const FRAME_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

/// A raster frame tagged with its 1-based position in the session.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u64,
    pub image: RgbImage,
}

/// Something that can be opened into a stream of frames.
pub trait FrameSource {
    fn open(&self) -> Result<Box<dyn FrameReader + Send>, SourceError>;
}

/// An open handle on a frame source. Dropping it releases the source.
pub trait FrameReader {
    /// The next frame, or `None` once the source is exhausted.
    fn read(&mut self) -> Result<Option<RgbImage>, SourceError>;

    /// Nominal frame rate, when the source knows it.
    fn fps(&self) -> Option<f64> {
        None
    }
}

/// A directory of still frames played back in file-name order.
#[derive(Debug, Clone)]
pub struct ImageSequence {
    dir: PathBuf,
    fps: Option<f64>,
}

impl ImageSequence {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            fps: None,
        }
    }

    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = Some(fps);
        self
    }

    fn list_frames(dir: &Path) -> Result<VecDeque<PathBuf>, SourceError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| SourceError::Unavailable(format!("{}: {e}", dir.display())))?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            })
            .collect();
        if paths.is_empty() {
            return Err(SourceError::Unavailable(format!(
                "{}: no frames found",
                dir.display()
            )));
        }
        paths.sort();
        Ok(paths.into())
    }
}

impl FrameSource for ImageSequence {
    fn open(&self) -> Result<Box<dyn FrameReader + Send>, SourceError> {
        let paths = Self::list_frames(&self.dir)?;
        debug!(dir = %self.dir.display(), frames = paths.len(), "image sequence opened");
        Ok(Box::new(ImageSequenceReader {
            dir: self.dir.clone(),
            paths,
            fps: self.fps,
        }))
    }
}

struct ImageSequenceReader {
    dir: PathBuf,
    paths: VecDeque<PathBuf>,
    fps: Option<f64>,
}

impl FrameReader for ImageSequenceReader {
    fn read(&mut self) -> Result<Option<RgbImage>, SourceError> {
        let Some(path) = self.paths.pop_front() else {
            return Ok(None);
        };
        let image = image::open(&path)
            .map_err(|e| SourceError::Read(format!("{}: {e}", path.display())))?;
        Ok(Some(image.to_rgb8()))
    }

    fn fps(&self) -> Option<f64> {
        self.fps
    }
}

impl Drop for ImageSequenceReader {
    fn drop(&mut self) {
        debug!(dir = %self.dir.display(), remaining = self.paths.len(), "image sequence released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("traffic_lens_{name}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn missing_directory_is_unavailable() {
        let source = ImageSequence::new("/definitely/not/here");
        assert!(matches!(source.open(), Err(SourceError::Unavailable(_))));
    }

    #[test]
    fn empty_directory_is_unavailable() {
        let dir = temp_dir("empty");
        std::fs::write(dir.join("notes.txt"), "no frames").unwrap();
        assert!(matches!(ImageSequence::new(&dir).open(), Err(SourceError::Unavailable(_))));
    }

    #[test]
    fn frames_are_read_in_name_order() {
        let dir = temp_dir("ordered");
        for (name, shade) in [("b.png", 20u8), ("a.png", 10u8), ("c.png", 30u8)] {
            RgbImage::from_pixel(4, 4, image::Rgb([shade, 0, 0]))
                .save(dir.join(name))
                .unwrap();
        }
        let mut reader = ImageSequence::new(&dir).with_fps(25.0).open().unwrap();
        assert_eq!(reader.fps(), Some(25.0));
        let shades: Vec<u8> = std::iter::from_fn(|| reader.read().unwrap())
            .map(|img| img.get_pixel(0, 0)[0])
            .collect();
        assert_eq!(shades, vec![10, 20, 30]);
    }

    #[test]
    fn undecodable_frame_is_a_read_error() {
        let dir = temp_dir("corrupt");
        std::fs::write(dir.join("0001.png"), b"not a png").unwrap();
        let mut reader = ImageSequence::new(&dir).open().unwrap();
        assert!(matches!(reader.read(), Err(SourceError::Read(_))));
    }
}
