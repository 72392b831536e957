// THEORY:
// The `tracker` module adds "object permanence" to the engine. It takes the
// stateless list of `Detection`s from a single frame and associates them with
// the objects it was tracking in previous frames.
//
// This module solves the "data association problem."
//
// Key architectural principles:
// 1.  **Object Persistence**: A `Track` represents one object's existence *over
//     time*, distinct from a `Detection`, which is a snapshot of a single frame.
// 2.  **Tracking Logic**: `Tracker::update` matches new detections to live tracks
//     by nearest centroid, accepting a match only below a fixed distance.
// 3.  **Lifecycle Management**:
//     - **Birth**: a detection that matches nothing starts a new track with a
//       fresh id. Ids only ever grow, so an id is never handed out twice.
//     - **Tracking**: a matched track takes the new box and its miss counter
//       resets.
//     - **Death**: a track that misses more than `max_misses` consecutive frames
//       is evicted and reported, so downstream state keyed by its id can go too.

use crate::core_modules::detection::Detection;
use crate::core_modules::geometry::Point;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

pub const DEFAULT_DISTANCE_THRESHOLD: f64 = 35.0; // Max centroid distance (pixels) to be considered a match.
pub const DEFAULT_MAX_MISSES: u32 = 5; // How many frames an object can be lost before it's deleted.

/// How detections are paired with live tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Matching {
    /// Each track, lowest id first, takes its nearest unclaimed detection.
    #[default]
    TrackOrder,
    /// Closest (track, detection) pair overall is fixed first, then the next closest.
    GlobalNearest,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerConfig {
    pub distance_threshold: f64,
    pub max_misses: u32,
    pub matching: Matching,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            distance_threshold: DEFAULT_DISTANCE_THRESHOLD,
            max_misses: DEFAULT_MAX_MISSES,
            matching: Matching::default(),
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.distance_threshold.is_finite() || self.distance_threshold <= 0.0 {
            return Err(ConfigError::InvalidDistanceThreshold(self.distance_threshold));
        }
        Ok(())
    }
}

/// An object that is being tracked across multiple frames.
#[derive(Debug, Clone)]
pub struct Track {
    /// A unique and persistent ID for this tracked object.
    pub id: u64,
    /// The most recent detection matched to this track.
    pub detection: Detection,
    pub centroid: Point,
    /// Consecutive frames without a matching detection.
    pub misses: u32,
    /// The number of frames this object has been matched.
    pub age: u32,
}

impl Track {
    fn new(id: u64, detection: Detection) -> Self {
        let centroid = detection.centroid();
        Self {
            id,
            detection,
            centroid,
            misses: 0,
            age: 1,
        }
    }

    fn update(&mut self, detection: Detection) {
        self.centroid = detection.centroid();
        self.detection = detection;
        self.misses = 0;
        self.age += 1;
    }
}

/// A detection paired with the identity the tracker gave it this frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedObject {
    pub id: u64,
    pub detection: Detection,
}

impl TrackedObject {
    pub fn centroid(&self) -> Point {
        self.detection.centroid()
    }
}

/// Result of one `Tracker::update` call.
#[derive(Debug, Clone, Default)]
pub struct TrackerUpdate {
    /// Tracks matched or born this frame, in ascending id order.
    pub tracked: Vec<TrackedObject>,
    /// Ids evicted this frame. None of them will ever appear again.
    pub evicted: Vec<u64>,
}

/// Manages the live `Track`s of one session from one frame to the next.
pub struct Tracker {
    config: TrackerConfig,
    /// Live tracks, kept in ascending id order.
    tracks: Vec<Track>,
    /// A counter to ensure each new object gets a unique ID.
    next_id: u64,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 0,
        }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Total number of ids handed out so far.
    pub fn issued_ids(&self) -> u64 {
        self.next_id
    }

    /// Updates the tracker with the detections of the current frame.
    pub fn update(&mut self, detections: Vec<Detection>) -> TrackerUpdate {
        let centroids: Vec<Point> = detections.iter().map(Detection::centroid).collect();

        // --- 1. Matching ---
        let assignment = match self.config.matching {
            Matching::TrackOrder => self.match_in_track_order(&centroids),
            Matching::GlobalNearest => self.match_globally(&centroids),
        };

        let mut detections: Vec<Option<Detection>> = detections.into_iter().map(Some).collect();

        // --- 2. State Updating ---
        let mut evicted = Vec::new();
        let max_misses = self.config.max_misses;
        let mut survivors = Vec::with_capacity(self.tracks.len());
        for (mut track, matched) in self.tracks.drain(..).zip(assignment) {
            match matched.and_then(|j| detections[j].take()) {
                Some(detection) => {
                    track.update(detection);
                    survivors.push(track);
                }
                None => {
                    track.misses += 1;
                    if track.misses > max_misses {
                        evicted.push(track.id);
                    } else {
                        survivors.push(track);
                    }
                }
            }
        }

        // --- 3. Births ---
        for detection in detections.into_iter().flatten() {
            survivors.push(Track::new(self.next_id, detection));
            self.next_id += 1;
        }
        self.tracks = survivors;

        if !evicted.is_empty() {
            debug!(?evicted, "tracks evicted");
        }

        let tracked = self
            .tracks
            .iter()
            .filter(|t| t.misses == 0)
            .map(|t| TrackedObject {
                id: t.id,
                detection: t.detection.clone(),
            })
            .collect();

        TrackerUpdate { tracked, evicted }
    }

    /// For each track (index into `self.tracks`), the detection index it took.
    fn match_in_track_order(&self, centroids: &[Point]) -> Vec<Option<usize>> {
        let mut claimed = vec![false; centroids.len()];
        self.tracks
            .iter()
            .map(|track| {
                let mut best_match_dist = self.config.distance_threshold;
                let mut best_match_index = None;
                for (j, c) in centroids.iter().enumerate() {
                    if claimed[j] {
                        continue;
                    }
                    let dist = track.centroid.distance(c);
                    if dist < best_match_dist {
                        best_match_dist = dist;
                        best_match_index = Some(j);
                    }
                }
                if let Some(j) = best_match_index {
                    claimed[j] = true;
                }
                best_match_index
            })
            .collect()
    }

    fn match_globally(&self, centroids: &[Point]) -> Vec<Option<usize>> {
        let mut pairs: Vec<(f64, usize, usize)> = Vec::new();
        for (i, track) in self.tracks.iter().enumerate() {
            for (j, c) in centroids.iter().enumerate() {
                let dist = track.centroid.distance(c);
                if dist < self.config.distance_threshold {
                    pairs.push((dist, i, j));
                }
            }
        }
        // Track index order equals id order, so ties fall to the lowest id.
        pairs.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(Ordering::Equal)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });

        let mut assignment = vec![None; self.tracks.len()];
        let mut claimed = vec![false; centroids.len()];
        for (_, i, j) in pairs {
            if assignment[i].is_none() && !claimed[j] {
                assignment[i] = Some(j);
                claimed[j] = true;
            }
        }
        assignment
    }
}
