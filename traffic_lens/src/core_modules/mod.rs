// Per-frame building blocks, from raw detections up to counting events.
pub mod detection;
pub mod event_engine;
pub mod geometry;
pub mod perspective;
pub mod speed;
pub mod tracker;
