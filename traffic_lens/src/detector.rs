// THEORY:
// The detector is a black box: one frame in, a list of boxes out, nothing
// remembered between calls. Taking `&self` is what lets several interleaved
// sessions share one detector instance without any locking of their own.

use crate::core_modules::detection::Detection;
use crate::error::DetectorError;
use crate::source::Frame;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::BufRead;

pub trait Detector {
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectorError>;
}

impl<F> Detector for F
where
    F: Fn(&Frame) -> Result<Vec<Detection>, DetectorError>,
{
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        self(frame)
    }
}

#[derive(Debug, Deserialize)]
struct RecordedFrame {
    frame: u64,
    #[serde(default)]
    detections: Vec<Detection>,
}

/// Replays detections recorded offline, looked up by frame index.
///
/// The input is JSON lines, one object per frame:
/// `{"frame": 1, "detections": [{"x1": 0, "y1": 0, "x2": 10, "y2": 10, "class": "car", "confidence": 0.9}]}`.
/// Frames with no line yield no detections.
#[derive(Debug, Clone, Default)]
pub struct RecordedDetections {
    by_frame: HashMap<u64, Vec<Detection>>,
}

impl RecordedDetections {
    pub fn from_json_lines(reader: impl BufRead) -> Result<Self, DetectorError> {
        let mut by_frame = HashMap::new();
        for (n, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| DetectorError(format!("line {}: {e}", n + 1)))?;
            if line.trim().is_empty() {
                continue;
            }
            let record: RecordedFrame = serde_json::from_str(&line)
                .map_err(|e| DetectorError(format!("line {}: {e}", n + 1)))?;
            by_frame
                .entry(record.frame)
                .or_insert_with(Vec::new)
                .extend(record.detections);
        }
        Ok(Self { by_frame })
    }

    pub fn frames(&self) -> usize {
        self.by_frame.len()
    }
}

impl Detector for RecordedDetections {
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        Ok(self.by_frame.get(&frame.index).cloned().unwrap_or_default())
    }
}
