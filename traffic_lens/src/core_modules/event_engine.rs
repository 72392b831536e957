// THEORY:
// The `event_engine` is the Behavioral Analysis Layer. It turns the tracker's
// stream of `(id, box)` pairs into durable facts about each object: which lines
// it has crossed, whether it drove the wrong way, and how fast it is going.
//
// Key architectural principles:
// 1.  **Once-only semantics**: every counter is a set of track ids, so an object
//     lingering on a line or oscillating across it contributes exactly once.
// 2.  **Lazy, keyed state**: `TrackAnnotations` are created the first time an id
//     is observed and dropped as soon as the tracker evicts that id. Ids are
//     never reused, so a dropped annotation is never needed again.
// 3.  **Sticky verdicts**: `wrong_way` only ever goes from false to true, and the
//     session-wide wrong-way counter moves at most once per track.

use crate::core_modules::detection::Detection;
use crate::core_modules::geometry::{Line, LineRole, Point, Polygon};
use crate::core_modules::speed::{SpeedHistory, SpeedZone};
use crate::core_modules::tracker::TrackedObject;
use crate::error::ConfigError;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// The validated set of lines of a session, with the wrong-way roles resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct LineSet {
    lines: Vec<Line>,
    entry: Option<usize>,
    exit: Option<usize>,
}

impl LineSet {
    /// Accepts at most one entry and one exit line, and only as a pair.
    pub fn new(lines: Vec<Line>) -> Result<Self, ConfigError> {
        let mut entry = None;
        let mut exit = None;
        for (i, line) in lines.iter().enumerate() {
            let slot = match line.role {
                Some(LineRole::Entry) => &mut entry,
                Some(LineRole::Exit) => &mut exit,
                None => continue,
            };
            if slot.replace(i).is_some() {
                return Err(ConfigError::DuplicateRole(line.role.map_or("", |r| r.as_str())));
            }
        }
        if entry.is_some() != exit.is_some() {
            return Err(ConfigError::UnpairedDirectionLines);
        }
        Ok(Self { lines, entry, exit })
    }

    pub fn empty() -> Self {
        Self {
            lines: Vec::new(),
            entry: None,
            exit: None,
        }
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn has_direction_pair(&self) -> bool {
        self.entry.is_some() && self.exit.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// A configured line plus the distinct track ids that have crossed it.
#[derive(Debug, Clone)]
pub struct LineCounter {
    pub line: Line,
    counted: HashSet<u64>,
}

impl LineCounter {
    fn new(line: Line) -> Self {
        Self {
            line,
            counted: HashSet::new(),
        }
    }

    /// Returns true if the centroid touches the line; counting is idempotent.
    fn observe(&mut self, id: u64, centroid: Point) -> bool {
        if self.line.is_crossed_by(centroid) {
            self.counted.insert(id);
            true
        } else {
            false
        }
    }

    pub fn count(&self) -> usize {
        self.counted.len()
    }

    pub fn has_counted(&self, id: u64) -> bool {
        self.counted.contains(&id)
    }
}

/// Event-engine state for one live track.
#[derive(Debug, Clone, Default)]
pub struct TrackAnnotations {
    /// Indices of the lines this track has been counted on.
    pub crossed: BTreeSet<usize>,
    pub touched_entry: bool,
    pub touched_exit: bool,
    pub wrong_way: bool,
    pub speed: SpeedHistory,
}

/// What one observation of a track produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackEvents {
    pub id: u64,
    /// Lines the centroid touches in this frame.
    pub touching: Vec<usize>,
    pub wrong_way: bool,
    /// True only on the observation that bumped the wrong-way counter.
    pub new_violation: bool,
    /// Rolling average speed, once at least one sample exists.
    pub speed_kmh: Option<f64>,
}

/// The top-level orchestrator for the behavioral analysis layer of one session.
pub struct EventEngine {
    lines: Arc<LineSet>,
    counters: Vec<LineCounter>,
    roi: Option<Polygon>,
    speed_zone: Option<SpeedZone>,
    fps: f64,
    annotations: HashMap<u64, TrackAnnotations>,
    wrong_way_count: u64,
}

impl EventEngine {
    /// `fps` is only consulted when a speed zone is configured.
    pub fn new(lines: Arc<LineSet>, roi: Option<Polygon>, speed_zone: Option<SpeedZone>, fps: f64) -> Self {
        let counters = lines.lines().iter().cloned().map(LineCounter::new).collect();
        Self {
            lines,
            counters,
            roi,
            speed_zone,
            fps,
            annotations: HashMap::new(),
            wrong_way_count: 0,
        }
    }

    /// ROI gate: with no ROI every detection passes.
    pub fn admits(&self, detection: &Detection) -> bool {
        self.roi
            .as_ref()
            .is_none_or(|roi| roi.contains(detection.centroid()))
    }

    /// Runs every per-track rule for one tracked object in frame `frame_index`.
    pub fn observe(&mut self, object: &TrackedObject, frame_index: u64) -> TrackEvents {
        let id = object.id;
        let centroid = object.centroid();
        let annotations = self.annotations.entry(id).or_default();

        // --- 1. Line counting ---
        let mut touching = Vec::new();
        for (i, counter) in self.counters.iter_mut().enumerate() {
            if counter.observe(id, centroid) {
                annotations.crossed.insert(i);
                touching.push(i);
            }
        }

        // --- 2. Wrong-way ---
        let mut new_violation = false;
        if let (Some(entry), Some(exit)) = (self.lines.entry, self.lines.exit) {
            if touching.contains(&entry) {
                annotations.touched_entry = true;
            }
            // The counter moves only when the flag flips; a swap resets touched_exit.
            if touching.contains(&exit) {
                if !annotations.touched_entry && !annotations.wrong_way {
                    annotations.wrong_way = true;
                    self.wrong_way_count += 1;
                    new_violation = true;
                    info!(track = id, total = self.wrong_way_count, "wrong-way violation");
                }
                annotations.touched_exit = true;
            }
        }

        // --- 3. Speed ---
        if let Some(zone) = &self.speed_zone {
            let canonical = zone.transform.apply(centroid);
            annotations.speed.observe(zone, canonical, frame_index, self.fps);
        }

        TrackEvents {
            id,
            touching,
            wrong_way: annotations.wrong_way,
            new_violation,
            speed_kmh: annotations.speed.average_kmh(),
        }
    }

    /// Drops the annotations of ids the tracker has retired.
    pub fn evict(&mut self, ids: &[u64]) {
        for id in ids {
            self.annotations.remove(id);
        }
    }

    /// Installs a new line set. Per-line counters and entry/exit contact start
    /// over; sticky wrong-way flags and the wrong-way total are kept.
    pub fn replace_lines(&mut self, lines: Arc<LineSet>) {
        info!(lines = lines.lines().len(), "line configuration swapped");
        self.counters = lines.lines().iter().cloned().map(LineCounter::new).collect();
        self.lines = lines;
        for annotations in self.annotations.values_mut() {
            annotations.crossed.clear();
            annotations.touched_entry = false;
            annotations.touched_exit = false;
        }
        debug!(live = self.annotations.len(), "annotations reset for new lines");
    }

    pub fn line_set(&self) -> &LineSet {
        &self.lines
    }

    pub fn counters(&self) -> &[LineCounter] {
        &self.counters
    }

    pub fn roi(&self) -> Option<&Polygon> {
        self.roi.as_ref()
    }

    pub fn speed_zone(&self) -> Option<&SpeedZone> {
        self.speed_zone.as_ref()
    }

    pub fn wrong_way_count(&self) -> u64 {
        self.wrong_way_count
    }

    pub fn annotations(&self, id: u64) -> Option<&TrackAnnotations> {
        self.annotations.get(&id)
    }

    pub fn live_annotations(&self) -> usize {
        self.annotations.len()
    }
}
