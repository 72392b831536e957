// THEORY:
// Speed is measured in the canonical plane, not in pixels. Each observation of a
// track projects its centroid through the zone's perspective transform; two
// observations in different frames give an instantaneous speed, and a short
// rolling window smooths detector jitter into a displayable average.

use crate::core_modules::geometry::Point;
use crate::core_modules::perspective::PerspectiveTransform;
use crate::error::ConfigError;
use std::collections::VecDeque;

/// Samples kept per track for the rolling average.
pub const SPEED_HISTORY_LENGTH: usize = 5;
/// Averages below this (km/h) are reported as standing still.
pub const SPEED_NOISE_FLOOR_KMH: f64 = 5.0;
const MPS_TO_KMH: f64 = 3.6;

/// A calibrated region of the road used for speed estimation.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeedZone {
    pub quad: [Point; 4],
    pub transform: PerspectiveTransform,
    /// Real-world length in metres that one canonical side represents.
    pub distance_meters: f64,
}

impl SpeedZone {
    pub fn new(quad: [Point; 4], distance_meters: f64, canonical_side: f64) -> Result<Self, ConfigError> {
        if !distance_meters.is_finite() || distance_meters <= 0.0 {
            return Err(ConfigError::InvalidDistance(distance_meters));
        }
        let transform = PerspectiveTransform::to_square(&quad, canonical_side)?;
        Ok(Self {
            quad,
            transform,
            distance_meters,
        })
    }

    /// Instantaneous speed in km/h for a canonical displacement over `elapsed_frames`.
    pub fn speed_kmh(&self, displacement: f64, elapsed_frames: u64, fps: f64) -> f64 {
        instantaneous_speed_kmh(
            displacement,
            elapsed_frames,
            fps,
            self.distance_meters,
            self.transform.side(),
        )
    }
}

/// `(d / side) * (real / (frames / fps)) * 3.6`.
pub fn instantaneous_speed_kmh(
    displacement: f64,
    elapsed_frames: u64,
    fps: f64,
    distance_meters: f64,
    canonical_side: f64,
) -> f64 {
    let seconds = elapsed_frames as f64 / fps;
    (displacement / canonical_side) * (distance_meters / seconds) * MPS_TO_KMH
}

/// Per-track speed state.
#[derive(Debug, Clone, Default)]
pub struct SpeedHistory {
    samples: VecDeque<f64>,
    last: Option<(Point, u64)>,
}

impl SpeedHistory {
    /// Records an observation at canonical position `pos` in frame `frame_index`.
    ///
    /// A sample is added only when a previous observation exists in an earlier
    /// frame; the stored position and frame are refreshed either way.
    pub fn observe(&mut self, zone: &SpeedZone, pos: Point, frame_index: u64, fps: f64) -> Option<f64> {
        let sample = match self.last {
            Some((prev, prev_frame)) if prev_frame != frame_index => {
                let elapsed = frame_index.abs_diff(prev_frame);
                Some(zone.speed_kmh(prev.distance(&pos), elapsed, fps))
            }
            _ => None,
        };
        if let Some(speed) = sample {
            self.samples.push_back(speed);
            if self.samples.len() > SPEED_HISTORY_LENGTH {
                self.samples.pop_front();
            }
        }
        self.last = Some((pos, frame_index));
        sample
    }

    /// Mean of the retained samples, clamped to zero under the noise floor.
    pub fn average_kmh(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let mean = self.samples.iter().sum::<f64>() / self.samples.len() as f64;
        Some(if mean < SPEED_NOISE_FLOOR_KMH { 0.0 } else { mean })
    }

    pub fn samples(&self) -> impl Iterator<Item = &f64> {
        self.samples.iter()
    }
}
