// Error types for the beat tracker
//
// Two error families: ConfigError for setup-time configuration
// inconsistencies (detected before any processing starts) and
// AudioError for audio source failures. Numerical degeneracies inside
// a tick are recovered locally and never surface as errors.

use std::fmt;

/// Configuration inconsistency detected at setup.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The hop size does not fit the analysis window
    InvalidHop { window: usize, hop: usize },

    /// A buffer length parameter is zero
    EmptyBuffer { name: &'static str },

    /// A BPM range has min >= max or non-positive bounds
    InvalidBpmRange {
        name: &'static str,
        min: f64,
        max: f64,
    },

    /// The derived tempo-lag range is unusable for this sampling rate
    InvalidTempoRange { t_min: usize, t_max: usize },

    /// The tempo-lag range does not fit the OSS analysis window
    TempoRangeExceedsWindow { t_max: usize, window: usize },

    /// The beat trigger index lies outside the prediction buffer
    InvalidTriggerIndex { index: usize, buffer: usize },

    /// A scalar parameter is outside its accepted interval
    InvalidParameter {
        name: &'static str,
        value: f64,
        expected: &'static str,
    },

    /// The configuration file could not be read or parsed
    LoadFailed { path: String, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidHop { window, hop } => {
                write!(f, "hop size {} exceeds window size {}", hop, window)
            }
            ConfigError::EmptyBuffer { name } => {
                write!(f, "{} must be greater than 0", name)
            }
            ConfigError::InvalidBpmRange { name, min, max } => {
                write!(f, "{}: invalid BPM range [{}, {}]", name, min, max)
            }
            ConfigError::InvalidTempoRange { t_min, t_max } => {
                write!(
                    f,
                    "tempo-lag range [{}, {}] is empty or degenerate",
                    t_min, t_max
                )
            }
            ConfigError::TempoRangeExceedsWindow { t_max, window } => {
                write!(
                    f,
                    "maximum tempo lag {} does not fit OSS window of {}",
                    t_max, window
                )
            }
            ConfigError::InvalidTriggerIndex { index, buffer } => {
                write!(
                    f,
                    "trigger index {} outside prediction buffer of length {}",
                    index, buffer
                )
            }
            ConfigError::InvalidParameter {
                name,
                value,
                expected,
            } => {
                write!(f, "{} = {} but expected {}", name, value, expected)
            }
            ConfigError::LoadFailed { path, reason } => {
                write!(f, "failed to load configuration from {}: {}", path, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Audio source errors
///
/// These cover device discovery, stream management and file access for
/// the source implementations. End of stream is not an error: sources
/// report it through `is_active`.
#[derive(Debug)]
pub enum AudioError {
    /// No capture device matched the request
    DeviceNotFound { name: String },

    /// Failed to open or start an audio stream
    StreamOpenFailed { reason: String },

    /// Audio file could not be read
    FileError { path: String, reason: String },

    /// Audio file has a format the tracker does not accept
    UnsupportedFormat { path: String, details: String },

    /// Recording output could not be written
    RecordFailed { reason: String },
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioError::DeviceNotFound { name } => {
                write!(f, "no capture device matching '{}'", name)
            }
            AudioError::StreamOpenFailed { reason } => {
                write!(f, "failed to open audio stream: {}", reason)
            }
            AudioError::FileError { path, reason } => {
                write!(f, "failed to read audio file {}: {}", path, reason)
            }
            AudioError::UnsupportedFormat { path, details } => {
                write!(f, "unsupported audio format in {}: {}", path, details)
            }
            AudioError::RecordFailed { reason } => {
                write!(f, "failed to write recording: {}", reason)
            }
        }
    }
}

impl std::error::Error for AudioError {}

impl From<hound::Error> for AudioError {
    fn from(err: hound::Error) -> Self {
        AudioError::RecordFailed {
            reason: err.to_string(),
        }
    }
}
