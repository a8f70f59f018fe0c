pub mod history;
pub mod tracker;

pub use tracker::{StartOutcome, StopOutcome, Tracker, TrackerConfig};
