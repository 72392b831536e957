// THEORY:
// Configuration arrives from the outside world as loosely-shaped JSON drawn by a
// user on a canvas. This module is the single place where it is trusted: the
// `Raw*` types mirror the payload field-for-field, and `SessionConfig::from_raw`
// turns them into validated geometry once, before any frame is processed. Code
// past this boundary never sees an unchecked line or polygon.

use crate::core_modules::event_engine::LineSet;
use crate::core_modules::geometry::{Line, LineRole, Point, Polygon};
use crate::core_modules::perspective::DEFAULT_CANONICAL_SIDE;
use crate::core_modules::speed::SpeedZone;
use crate::core_modules::tracker::{Matching, TrackerConfig, DEFAULT_DISTANCE_THRESHOLD, DEFAULT_MAX_MISSES};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Default proximity tolerance of a line, in pixels.
pub const DEFAULT_LINE_OFFSET: f64 = 7.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawLine {
    pub start: Point,
    pub end: Point,
    #[serde(default)]
    pub offset: Option<f64>,
    #[serde(default)]
    pub role: Option<LineRole>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSpeedZone {
    pub quad: Vec<Point>,
    pub distance_meters: f64,
    #[serde(default)]
    pub canonical_side: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawTrackerConfig {
    #[serde(default)]
    pub distance_threshold: Option<f64>,
    #[serde(default)]
    pub max_misses: Option<u32>,
    #[serde(default)]
    pub matching: Option<Matching>,
}

/// The configuration payload exactly as a client sends it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSessionConfig {
    #[serde(default)]
    pub lines: Vec<RawLine>,
    #[serde(default)]
    pub roi: Option<Vec<Point>>,
    #[serde(default)]
    pub speed: Option<RawSpeedZone>,
    #[serde(default)]
    pub fps: Option<f64>,
    #[serde(default)]
    pub classes: Option<Vec<String>>,
    #[serde(default)]
    pub min_confidence: Option<f32>,
    #[serde(default)]
    pub tracker: Option<RawTrackerConfig>,
}

impl RawSessionConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Malformed(e.to_string()))
    }
}

/// Validated, immutable configuration of one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub lines: LineSet,
    pub roi: Option<Polygon>,
    pub speed: Option<SpeedZone>,
    /// Overrides whatever frame rate the source reports.
    pub fps: Option<f64>,
    /// Class allow-list; `None` admits every class.
    pub classes: Option<Vec<String>>,
    pub min_confidence: f32,
    pub tracker: TrackerConfig,
}

impl SessionConfig {
    pub fn from_raw(raw: RawSessionConfig) -> Result<Self, ConfigError> {
        let lines = validate_lines(raw.lines)?;

        let roi = raw.roi.map(Polygon::new).transpose()?;

        let speed = match raw.speed {
            Some(zone) => {
                let count = zone.quad.len();
                let quad: [Point; 4] = zone
                    .quad
                    .try_into()
                    .map_err(|_| ConfigError::NotAQuadrilateral { count })?;
                let side = zone.canonical_side.unwrap_or(DEFAULT_CANONICAL_SIDE);
                Some(SpeedZone::new(quad, zone.distance_meters, side)?)
            }
            None => None,
        };

        if let Some(fps) = raw.fps {
            if !fps.is_finite() || fps <= 0.0 {
                return Err(ConfigError::InvalidFrameRate(fps));
            }
        }

        let min_confidence = raw.min_confidence.unwrap_or(0.0);
        if !(0.0..=1.0).contains(&min_confidence) {
            return Err(ConfigError::InvalidConfidence(min_confidence));
        }

        let raw_tracker = raw.tracker.unwrap_or_default();
        let tracker = TrackerConfig {
            distance_threshold: raw_tracker.distance_threshold.unwrap_or(DEFAULT_DISTANCE_THRESHOLD),
            max_misses: raw_tracker.max_misses.unwrap_or(DEFAULT_MAX_MISSES),
            matching: raw_tracker.matching.unwrap_or_default(),
        };
        tracker.validate()?;

        Ok(Self {
            lines,
            roi,
            speed,
            fps: raw.fps,
            classes: raw.classes,
            min_confidence,
            tracker,
        })
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Self::from_raw(RawSessionConfig::from_json(json)?)
    }
}

/// Validates a list of raw lines into a `LineSet`. Unnamed lines become `Line N`.
pub fn validate_lines(raw: Vec<RawLine>) -> Result<LineSet, ConfigError> {
    let lines = raw
        .into_iter()
        .enumerate()
        .map(|(i, l)| {
            let name = l.name.unwrap_or_else(|| format!("Line {}", i + 1));
            Line::new(i, name, l.start, l.end, l.offset.unwrap_or(DEFAULT_LINE_OFFSET), l.role)
        })
        .collect::<Result<Vec<_>, _>>()?;
    LineSet::new(lines)
}
