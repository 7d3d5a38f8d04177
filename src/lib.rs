// Beat Tracker Core - real-time beat tracking engine
// Turns a stream of audio samples into ONSET / BEAT / BPM events

// Module declarations
pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod runner;
pub mod sink;
pub mod tracker;
pub mod wire;

// Re-exports for convenience
pub use config::TrackerConfig;
pub use error::{AudioError, ConfigError};
pub use events::{ControlMessage, TrackerEvent, TrackingMode};
pub use runner::{ControlSender, EventReceiver, TrackerRunner};
pub use tracker::BeatTracker;
