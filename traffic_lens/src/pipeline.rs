// THEORY:
// The `pipeline` module is the top-level API of the engine. It encapsulates the
// full stack (detector, tracker, event engine) behind one object per stream: a
// `Session`. A session is opened once, then consumed into a lazy stream of
// `SessionEvent`s, one per frame, which a transport pulls at its own pace.
//
// Key architectural principles:
// 1.  **One writer per session**: the tracker and event engine live inside the
//     stream and are touched by nothing else. Only the detector may be shared.
// 2.  **Explicit scheduling point**: after each record the stream yields to the
//     runtime, so many sessions can share a runtime without a thread each. No
//     suspension happens mid-frame.
// 3.  **Scoped source**: the frame reader is owned by the stream. It is dropped
//     (released) before a terminal record is emitted, at end of stream, and when
//     the consumer drops the stream early.
// 4.  **Atomic reconfiguration**: a `LineSwap` handle publishes a whole new line
//     set through a watch channel; the stream picks it up between frames only.

use crate::config::{RawLine, SessionConfig, validate_lines};
use crate::core_modules::event_engine::{EventEngine, LineSet};
use crate::core_modules::geometry::{LineRole, Point};
use crate::core_modules::tracker::Tracker;
use crate::detector::Detector;
use crate::error::{ConfigError, SessionError, SourceError};
use crate::overlay::{
    CYAN, Color, GREEN, Overlay, OverlayBox, OverlayLine, OverlayPolygon, OverlayText, PURPLE, RED, YELLOW,
};
use crate::source::{Frame, FrameReader, FrameSource};
use async_stream::stream;
use futures::Stream;
use image::RgbImage;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Frame rate assumed when neither the config nor the source gives a usable one
/// and no speed zone needs it.
pub const DEFAULT_FPS: f64 = 25.0;

const SPEED_ZONE_FILL_ALPHA: f32 = 0.4;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineCount {
    pub name: String,
    pub role: Option<LineRole>,
    pub count: usize,
}

/// Cumulative session metrics at the moment a record is emitted.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Metrics {
    pub line_counts: Vec<LineCount>,
    pub wrong_way_count: u64,
    /// Average speed (km/h) of tracks seen this frame that have one.
    pub speeds: BTreeMap<u64, f64>,
    pub active_tracks: usize,
}

/// The primary output of the pipeline for a single frame.
#[derive(Debug, Clone, Serialize)]
pub struct OutputRecord {
    pub frame_index: u64,
    pub overlay: Overlay,
    pub metrics: Metrics,
    /// The frame the overlay belongs to; not serialized.
    #[serde(skip)]
    pub frame: RgbImage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Source,
    Detector,
}

/// Describes the failure that ended a session mid-stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TerminalError {
    pub frame_index: u64,
    pub stage: FailureStage,
    pub message: String,
}

/// One item of a session's output stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Frame(OutputRecord),
    /// Always the last item when present.
    Error(TerminalError),
}

impl SessionEvent {
    pub fn is_error(&self) -> bool {
        matches!(self, SessionEvent::Error(_))
    }

    pub fn record(&self) -> Option<&OutputRecord> {
        match self {
            SessionEvent::Frame(record) => Some(record),
            SessionEvent::Error(_) => None,
        }
    }
}

/// Publishes a replacement line set to a running session.
#[derive(Clone)]
pub struct LineSwap {
    tx: watch::Sender<Arc<LineSet>>,
}

impl LineSwap {
    /// Validates `lines` and installs them from the next frame on. A rejected
    /// set leaves the running configuration untouched.
    pub fn swap(&self, lines: Vec<RawLine>) -> Result<(), ConfigError> {
        let set = validate_lines(lines).inspect_err(|e| warn!(error = %e, "line swap rejected"))?;
        self.tx.send_replace(Arc::new(set));
        Ok(())
    }
}

/// Per-frame stages of a session, without any notion of the stream around them.
struct FramePipeline {
    detector: Arc<dyn Detector + Send + Sync>,
    tracker: Tracker,
    engine: EventEngine,
    classes: Option<Vec<String>>,
    min_confidence: f32,
}

impl FramePipeline {
    fn new(config: &SessionConfig, lines: Arc<LineSet>, detector: Arc<dyn Detector + Send + Sync>, fps: f64) -> Self {
        Self {
            detector,
            tracker: Tracker::new(config.tracker),
            engine: EventEngine::new(lines, config.roi.clone(), config.speed.clone(), fps),
            classes: config.classes.clone(),
            min_confidence: config.min_confidence,
        }
    }

    fn process_frame(&mut self, frame: Frame) -> Result<OutputRecord, TerminalError> {
        // Stage 1: Detection
        let detections = self.detector.detect(&frame).map_err(|e| TerminalError {
            frame_index: frame.index,
            stage: FailureStage::Detector,
            message: e.to_string(),
        })?;
        let raw_count = detections.len();

        // Stage 2: Class, confidence and ROI gating
        let admitted: Vec<_> = detections
            .into_iter()
            .filter(|d| d.confidence >= self.min_confidence)
            .filter(|d| self.classes.as_ref().is_none_or(|c| c.contains(&d.class)))
            .filter(|d| self.engine.admits(d))
            .collect();

        // Stage 3: Track assignment
        let update = self.tracker.update(admitted);
        self.engine.evict(&update.evicted);

        // Stage 4: Events
        let mut overlay = Overlay::default();
        let mut speeds = BTreeMap::new();
        for object in &update.tracked {
            let events = self.engine.observe(object, frame.index);
            let bbox = object.detection.bbox;
            let color = if events.wrong_way { RED } else { GREEN };
            overlay.boxes.push(OverlayBox {
                track_id: object.id,
                x1: bbox.x1,
                y1: bbox.y1,
                x2: bbox.x2,
                y2: bbox.y2,
                label: format!("ID: {}", object.id),
                color,
            });
            if let Some(speed) = events.speed_kmh {
                speeds.insert(object.id, speed);
                overlay.texts.push(OverlayText {
                    position: Point::new(bbox.x1, bbox.y1 - 10.0),
                    text: format!("{speed:.2} km/h"),
                    color: RED,
                });
            }
        }

        debug!(
            frame = frame.index,
            detections = raw_count,
            tracked = update.tracked.len(),
            evicted = update.evicted.len(),
            "frame processed"
        );

        // Stage 5: Record assembly
        self.draw_configuration(&mut overlay);
        let metrics = Metrics {
            line_counts: self
                .engine
                .counters()
                .iter()
                .map(|c| LineCount {
                    name: c.line.name.clone(),
                    role: c.line.role,
                    count: c.count(),
                })
                .collect(),
            wrong_way_count: self.engine.wrong_way_count(),
            speeds,
            active_tracks: update.tracked.len(),
        };

        Ok(OutputRecord {
            frame_index: frame.index,
            overlay,
            metrics,
            frame: frame.image,
        })
    }

    fn draw_configuration(&self, overlay: &mut Overlay) {
        if let Some(roi) = self.engine.roi() {
            overlay.polygons.push(OverlayPolygon {
                points: roi.vertices().to_vec(),
                color: YELLOW,
                fill_alpha: None,
            });
        }
        if let Some(zone) = self.engine.speed_zone() {
            overlay.polygons.push(OverlayPolygon {
                points: zone.quad.to_vec(),
                color: PURPLE,
                fill_alpha: Some(SPEED_ZONE_FILL_ALPHA),
            });
        }

        let mut legend_y = 30.0;
        for counter in self.engine.counters() {
            let color: Color = match counter.line.role {
                Some(LineRole::Entry) => GREEN,
                Some(LineRole::Exit) | None => RED,
            };
            overlay.lines.push(OverlayLine {
                start: counter.line.start,
                end: counter.line.end,
                color,
            });
            overlay.texts.push(OverlayText {
                position: Point::new(10.0, legend_y),
                text: format!("{}: {}", counter.line.name, counter.count()),
                color,
            });
            legend_y += 30.0;
        }
        if self.engine.line_set().has_direction_pair() {
            overlay.texts.push(OverlayText {
                position: Point::new(10.0, legend_y),
                text: format!("Wrong Way: {}", self.engine.wrong_way_count()),
                color: CYAN,
            });
        }
    }

    fn log_summary(&self, frames: u64) {
        let totals: Vec<String> = self
            .engine
            .counters()
            .iter()
            .map(|c| format!("{}={}", c.line.name, c.count()))
            .collect();
        info!(
            frames,
            tracks = self.tracker.issued_ids(),
            lines = %totals.join(", "),
            wrong_way = self.engine.wrong_way_count(),
            "session finished"
        );
    }
}

/// One stream: a frame reader, a detector, and the state built up over its frames.
pub struct Session {
    config: SessionConfig,
    reader: Box<dyn FrameReader + Send>,
    detector: Arc<dyn Detector + Send + Sync>,
    fps: f64,
    lines_tx: watch::Sender<Arc<LineSet>>,
}

impl Session {
    /// Opens `source` for a session. Fails with `SourceUnavailable` if the
    /// source cannot be opened, or `Config` if speed estimation has no frame
    /// rate to work with. In both cases no frame has been read.
    pub fn open(
        config: SessionConfig,
        source: &dyn FrameSource,
        detector: Arc<dyn Detector + Send + Sync>,
    ) -> Result<Self, SessionError> {
        let reader = source.open().map_err(SessionError::SourceUnavailable)?;

        let fps = match config.fps.or_else(|| reader.fps()) {
            Some(fps) if fps.is_finite() && fps > 0.0 => fps,
            Some(fps) if config.speed.is_some() => return Err(ConfigError::InvalidFrameRate(fps).into()),
            Some(fps) => {
                warn!(fps, fallback = DEFAULT_FPS, "source frame rate unusable, speed is not configured");
                DEFAULT_FPS
            }
            None if config.speed.is_some() => return Err(ConfigError::MissingFrameRate.into()),
            None => DEFAULT_FPS,
        };

        info!(
            lines = config.lines.lines().len(),
            roi = config.roi.is_some(),
            speed = config.speed.is_some(),
            fps,
            "session opened"
        );

        let (lines_tx, _) = watch::channel(Arc::new(config.lines.clone()));
        Ok(Self {
            config,
            reader,
            detector,
            fps,
            lines_tx,
        })
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Handle for swapping the line set while the session streams.
    pub fn line_swap(&self) -> LineSwap {
        LineSwap {
            tx: self.lines_tx.clone(),
        }
    }

    /// Consumes the session into its output stream.
    ///
    /// The stream ends after the last frame, or right after a single
    /// `SessionEvent::Error`. Dropping it early releases the source.
    pub fn into_stream(self) -> impl Stream<Item = SessionEvent> + Send + 'static {
        let Session {
            config,
            mut reader,
            detector,
            fps,
            lines_tx,
        } = self;
        let mut lines_rx = lines_tx.subscribe();

        stream! {
            let lines = lines_rx.borrow_and_update().clone();
            let mut pipeline = FramePipeline::new(&config, lines, detector, fps);
            let mut frame_index = 0u64;

            loop {
                // Iteration boundary: the only place a new line set can land.
                if lines_rx.has_changed().unwrap_or(false) {
                    let lines = lines_rx.borrow_and_update().clone();
                    pipeline.engine.replace_lines(lines);
                }

                let image = match reader.read() {
                    Ok(Some(image)) => image,
                    Ok(None) => {
                        drop(reader);
                        pipeline.log_summary(frame_index);
                        break;
                    }
                    Err(e) => {
                        drop(reader);
                        let error = source_failure(frame_index + 1, e);
                        warn!(frame = error.frame_index, message = %error.message, "session aborted");
                        yield SessionEvent::Error(error);
                        break;
                    }
                };
                frame_index += 1;

                match pipeline.process_frame(Frame { index: frame_index, image }) {
                    Ok(record) => {
                        yield SessionEvent::Frame(record);
                    }
                    Err(error) => {
                        drop(reader);
                        warn!(frame = error.frame_index, message = %error.message, "session aborted");
                        yield SessionEvent::Error(error);
                        break;
                    }
                }

                tokio::task::yield_now().await;
            }
            drop(lines_tx);
        }
    }
}

fn source_failure(frame_index: u64, error: SourceError) -> TerminalError {
    TerminalError {
        frame_index,
        stage: FailureStage::Source,
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RawSessionConfig;
    use crate::core_modules::detection::{BoundingBox, Detection};
    use crate::error::DetectorError;
    use futures::StreamExt;

    struct Script {
        frames: usize,
    }

    struct ScriptReader {
        remaining: usize,
    }

    impl FrameSource for Script {
        fn open(&self) -> Result<Box<dyn FrameReader + Send>, SourceError> {
            Ok(Box::new(ScriptReader { remaining: self.frames }))
        }
    }

    impl FrameReader for ScriptReader {
        fn read(&mut self) -> Result<Option<RgbImage>, SourceError> {
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(RgbImage::new(4, 4)))
        }
    }

    fn one_car(frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        let x = 100.0 + frame.index as f64 * 5.0;
        Ok(vec![Detection::new(BoundingBox::new(x, 90.0, x + 20.0, 110.0), "car", 0.9)])
    }

    fn config(json: &str) -> SessionConfig {
        SessionConfig::from_raw(RawSessionConfig::from_json(json).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn emits_one_record_per_frame() {
        let session = Session::open(config("{}"), &Script { frames: 4 }, Arc::new(one_car)).unwrap();
        let events: Vec<SessionEvent> = session.into_stream().collect().await;
        assert_eq!(events.len(), 4);
        for (i, event) in events.iter().enumerate() {
            let record = event.record().unwrap();
            assert_eq!(record.frame_index, i as u64 + 1);
            assert_eq!(record.overlay.boxes.len(), 1);
            assert_eq!(record.overlay.boxes[0].track_id, 0);
        }
    }

    #[tokio::test]
    async fn class_and_confidence_filters_apply() {
        let detector = |_: &Frame| -> Result<Vec<Detection>, DetectorError> {
            Ok(vec![
                Detection::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), "car", 0.9),
                Detection::new(BoundingBox::new(100.0, 0.0, 110.0, 10.0), "person", 0.9),
                Detection::new(BoundingBox::new(200.0, 0.0, 210.0, 10.0), "truck", 0.3),
            ])
        };
        let cfg = config(r#"{"classes": ["car", "truck"], "min_confidence": 0.5}"#);
        let session = Session::open(cfg, &Script { frames: 1 }, Arc::new(detector)).unwrap();
        let events: Vec<SessionEvent> = session.into_stream().collect().await;
        let record = events[0].record().unwrap();
        assert_eq!(record.metrics.active_tracks, 1);
        assert_eq!(record.overlay.boxes[0].label, "ID: 0");
    }

    #[tokio::test]
    async fn detector_failure_ends_with_error_record() {
        let detector = |frame: &Frame| -> Result<Vec<Detection>, DetectorError> {
            if frame.index == 3 {
                Err(DetectorError("inference failed".into()))
            } else {
                Ok(Vec::new())
            }
        };
        let session = Session::open(config("{}"), &Script { frames: 10 }, Arc::new(detector)).unwrap();
        let events: Vec<SessionEvent> = session.into_stream().collect().await;
        assert_eq!(events.len(), 3);
        match &events[2] {
            SessionEvent::Error(e) => {
                assert_eq!(e.frame_index, 3);
                assert_eq!(e.stage, FailureStage::Detector);
                assert!(e.message.contains("inference failed"));
            }
            other => panic!("expected error record, got {other:?}"),
        }
    }

    #[test]
    fn speed_without_frame_rate_is_rejected() {
        let cfg = config(
            r#"{"speed": {"quad": [{"x": 0, "y": 0}, {"x": 10, "y": 0}, {"x": 10, "y": 10}, {"x": 0, "y": 10}], "distance_meters": 5}}"#,
        );
        let err = Session::open(cfg, &Script { frames: 1 }, Arc::new(one_car)).err().unwrap();
        assert_eq!(err, SessionError::Config(ConfigError::MissingFrameRate));
    }

    #[test]
    fn serializes_as_tagged_json() {
        let event = SessionEvent::Error(TerminalError {
            frame_index: 7,
            stage: FailureStage::Source,
            message: "boom".into(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["stage"], "source");
        assert_eq!(json["frame_index"], 7);
    }
}
