// THEORY:
// Every failure the engine can report falls into one of three places in the life
// of a session: before it starts (bad configuration, unavailable source), inside
// one frame (decode or detector failure), or never (normal end of stream). The
// first kind is returned from `Session::open`; the second is folded into a
// terminal record by the pipeline so that transport code never has to catch it.

use thiserror::Error;

/// A configuration payload that cannot be turned into a valid session.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("line {index} is degenerate: start and end points coincide")]
    DegenerateLine { index: usize },
    #[error("line {index} has an invalid offset {offset}")]
    InvalidOffset { index: usize, offset: f64 },
    #[error("line {index} has a non-finite coordinate")]
    NonFiniteLine { index: usize },
    #[error("polygon needs at least 3 vertices, got {count}")]
    TooFewVertices { count: usize },
    #[error("polygon has a non-finite vertex")]
    NonFinitePolygon,
    #[error("speed zone must be a quadrilateral, got {count} points")]
    NotAQuadrilateral { count: usize },
    #[error("speed zone quadrilateral is degenerate")]
    DegenerateQuadrilateral,
    #[error("reference distance must be positive, got {0}")]
    InvalidDistance(f64),
    #[error("canonical side must be positive, got {0}")]
    InvalidCanonicalSide(f64),
    #[error("frame rate must be positive, got {0}")]
    InvalidFrameRate(f64),
    #[error("speed estimation needs a frame rate but neither the config nor the source provides one")]
    MissingFrameRate,
    #[error("more than one line has the {0} role")]
    DuplicateRole(&'static str),
    #[error("wrong-way detection needs both an entry and an exit line")]
    UnpairedDirectionLines,
    #[error("tracker distance threshold must be positive, got {0}")]
    InvalidDistanceThreshold(f64),
    #[error("confidence floor must lie in [0, 1], got {0}")]
    InvalidConfidence(f32),
    #[error("malformed configuration payload: {0}")]
    Malformed(String),
}

/// Failures reported by a frame source.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("failed to read frame: {0}")]
    Read(String),
}

/// A detector failed on a single frame.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("detector failed: {0}")]
pub struct DetectorError(pub String);

/// Reasons a session could not be started.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("rejected configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    SourceUnavailable(SourceError),
}
