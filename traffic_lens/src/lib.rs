// THEORY:
// This file is the main entry point for the `traffic_lens` library crate. It
// defines the public API exposed to external consumers such as a web transport
// or the `replay_tester` binary.
//
// The primary goal is to export `Session` and its associated data structures
// (`SessionConfig`, `SessionEvent`, `OutputRecord`, etc.) as the high-level
// interface of the analytics engine. The per-frame machinery (`core_modules`)
// stays public for callers that want a single stage, such as the tracker on its
// own, but a typical consumer only opens a session and pulls its stream.

pub mod config;
pub mod core_modules;
pub mod detector;
pub mod error;
pub mod overlay;
pub mod pipeline;
pub mod source;

pub use config::{RawLine, RawSessionConfig, SessionConfig};
pub use core_modules::detection::{BoundingBox, Detection};
pub use core_modules::geometry::{LineRole, Point};
pub use detector::{Detector, RecordedDetections};
pub use error::{ConfigError, DetectorError, SessionError, SourceError};
pub use overlay::Overlay;
pub use pipeline::{LineSwap, Metrics, OutputRecord, Session, SessionEvent, TerminalError};
pub use source::{Frame, FrameReader, FrameSource, ImageSequence};
