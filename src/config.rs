//! Configuration surface for the beat tracking pipeline
//!
//! All tunables live in one flat record, loadable from a JSON file for
//! fast iteration without recompilation. The record is validated once
//! at setup; an inconsistent configuration fails fast before any audio
//! is processed. Only the operating mode and the beat trigger
//! look-ahead are mutable afterwards, via the control channel.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ConfigError;

/// Complete tunable record for the pipeline.
///
/// Field names follow the configuration key names one-to-one, so a
/// JSON file is simply `{"audio_hop_size": 128, ...}` with any subset
/// of keys; omitted keys keep their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// FFT window length in samples (N)
    pub audio_window_size: usize,
    /// Samples consumed per tick (H)
    pub audio_hop_size: usize,
    /// Spectral log-compression strength; 0 disables compression
    pub compression_gamma: f64,
    /// Noise gate level in dB relative to 16-bit full scale
    pub noise_cancellation_level: f64,
    /// Length of the Hamming-weighted flux FIFO (W)
    pub hamming_window_size: usize,

    /// Number of recent OSS samples feeding the onset statistics
    pub oss_buffer_size: usize,
    /// Onset threshold as a multiple of the OSS standard deviation
    pub onset_threshold: f64,
    /// Absolute floor for the onset threshold
    pub onset_threshold_min: f64,

    /// OSS samples per autocorrelation window (M)
    pub oss_window_size: usize,
    /// Ticks between tempo updates once the OSS window is full
    pub oss_hop_size: usize,
    /// Exponent applied to the OSS magnitude spectrum
    pub frequency_domain_compression: f64,
    /// Lower bound of the tempo detection range in BPM
    pub min_bpm_detection: f64,
    /// Upper bound of the tempo detection range in BPM
    pub max_bpm_detection: f64,
    /// Number of autocorrelation peaks scored per tempo update
    pub tempo_candidates: usize,
    /// Per-update decay of the tempo accumulator
    pub tempo_accumulator_decay: f64,
    /// Standard deviation of the accumulator Gaussian, in lag samples
    pub tempo_accumulator_gaussian_width: f64,
    /// Lower edge of the preferred output BPM band
    pub min_bpm_rescaled: f64,
    /// Upper edge of the preferred output BPM band
    pub max_bpm_rescaled: f64,

    /// Length of the cumulative beat-synchronous score history
    pub cbss_buffer_size: usize,
    /// Width parameter of the CBSS log-Gaussian predecessor weighting
    pub cbss_eta: f64,
    /// Blend between incoming OSS and the recursive score
    pub cbss_alpha: f64,

    /// Length of the forward beat-prediction buffer
    pub bps_buffer_size: usize,
    /// Constant phase offset of predicted beats, in ticks
    pub bps_epsilon_o: f64,
    /// Runtime phase offset of predicted beats, in ticks
    pub bps_epsilon_r: f64,
    /// Trigger look-ahead index into the prediction buffer
    pub bps_epsilon_t: usize,
    /// Width of the predicted-beat Gaussian pulses
    pub bps_gaussian_width: f64,
    /// Beat refractory period as a fraction of the tempo lag
    pub bps_cooldown_ratio: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            audio_window_size: 1024,
            audio_hop_size: 128,
            compression_gamma: 1.0,
            noise_cancellation_level: -74.0,
            hamming_window_size: 15,
            oss_buffer_size: 1024,
            onset_threshold: 0.1,
            onset_threshold_min: 5.0,
            oss_window_size: 2048,
            oss_hop_size: 128,
            frequency_domain_compression: 0.5,
            min_bpm_detection: 50.0,
            max_bpm_detection: 210.0,
            tempo_candidates: 10,
            tempo_accumulator_decay: 0.9,
            tempo_accumulator_gaussian_width: 10.0,
            min_bpm_rescaled: 90.0,
            max_bpm_rescaled: 180.0,
            cbss_buffer_size: 512,
            cbss_eta: 300.0,
            cbss_alpha: 0.9,
            bps_buffer_size: 1024,
            bps_epsilon_o: 0.0,
            bps_epsilon_r: 0.0,
            bps_epsilon_t: 20,
            bps_gaussian_width: 10.0,
            bps_cooldown_ratio: 0.4,
        }
    }
}

impl TrackerConfig {
    /// Load a configuration from a JSON file and validate it.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|err| ConfigError::LoadFailed {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;
        let config: Self =
            serde_json::from_str(&contents).map_err(|err| ConfigError::LoadFailed {
                path: path.display().to_string(),
                reason: err.to_string(),
            })?;
        config.validate()?;
        log::info!("[Config] Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Check internal consistency of all parameters.
    ///
    /// Constraints that depend on the sampling rate (the tempo-lag
    /// range) are checked at tracker setup instead.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.audio_window_size == 0 {
            return Err(ConfigError::EmptyBuffer {
                name: "audio_window_size",
            });
        }
        if self.audio_hop_size == 0 {
            return Err(ConfigError::EmptyBuffer {
                name: "audio_hop_size",
            });
        }
        if self.audio_hop_size > self.audio_window_size {
            return Err(ConfigError::InvalidHop {
                window: self.audio_window_size,
                hop: self.audio_hop_size,
            });
        }
        if self.hamming_window_size == 0 {
            return Err(ConfigError::EmptyBuffer {
                name: "hamming_window_size",
            });
        }
        if self.oss_buffer_size == 0 {
            return Err(ConfigError::EmptyBuffer {
                name: "oss_buffer_size",
            });
        }
        if self.oss_window_size == 0 {
            return Err(ConfigError::EmptyBuffer {
                name: "oss_window_size",
            });
        }
        if self.oss_hop_size == 0 || self.oss_hop_size > self.oss_window_size {
            return Err(ConfigError::InvalidHop {
                window: self.oss_window_size,
                hop: self.oss_hop_size,
            });
        }
        if self.cbss_buffer_size == 0 {
            return Err(ConfigError::EmptyBuffer {
                name: "cbss_buffer_size",
            });
        }
        if self.bps_buffer_size == 0 {
            return Err(ConfigError::EmptyBuffer {
                name: "bps_buffer_size",
            });
        }
        if self.bps_epsilon_t >= self.bps_buffer_size {
            return Err(ConfigError::InvalidTriggerIndex {
                index: self.bps_epsilon_t,
                buffer: self.bps_buffer_size,
            });
        }
        if self.min_bpm_detection <= 0.0 || self.min_bpm_detection >= self.max_bpm_detection {
            return Err(ConfigError::InvalidBpmRange {
                name: "bpm_detection",
                min: self.min_bpm_detection,
                max: self.max_bpm_detection,
            });
        }
        if self.min_bpm_rescaled <= 0.0 || self.min_bpm_rescaled >= self.max_bpm_rescaled {
            return Err(ConfigError::InvalidBpmRange {
                name: "bpm_rescaled",
                min: self.min_bpm_rescaled,
                max: self.max_bpm_rescaled,
            });
        }
        if self.tempo_candidates == 0 {
            return Err(ConfigError::EmptyBuffer {
                name: "tempo_candidates",
            });
        }
        if self.compression_gamma < 0.0 {
            return Err(ConfigError::InvalidParameter {
                name: "compression_gamma",
                value: self.compression_gamma,
                expected: "a value >= 0",
            });
        }
        if self.frequency_domain_compression <= 0.0 {
            return Err(ConfigError::InvalidParameter {
                name: "frequency_domain_compression",
                value: self.frequency_domain_compression,
                expected: "a value > 0",
            });
        }
        if !(0.0..=1.0).contains(&self.tempo_accumulator_decay) {
            return Err(ConfigError::InvalidParameter {
                name: "tempo_accumulator_decay",
                value: self.tempo_accumulator_decay,
                expected: "a value in [0, 1]",
            });
        }
        if self.tempo_accumulator_gaussian_width <= 0.0 {
            return Err(ConfigError::InvalidParameter {
                name: "tempo_accumulator_gaussian_width",
                value: self.tempo_accumulator_gaussian_width,
                expected: "a value > 0",
            });
        }
        if !(0.0..=1.0).contains(&self.cbss_alpha) {
            return Err(ConfigError::InvalidParameter {
                name: "cbss_alpha",
                value: self.cbss_alpha,
                expected: "a value in [0, 1]",
            });
        }
        if self.cbss_eta <= 0.0 {
            return Err(ConfigError::InvalidParameter {
                name: "cbss_eta",
                value: self.cbss_eta,
                expected: "a value > 0",
            });
        }
        if self.bps_gaussian_width <= 0.0 {
            return Err(ConfigError::InvalidParameter {
                name: "bps_gaussian_width",
                value: self.bps_gaussian_width,
                expected: "a value > 0",
            });
        }
        if self.bps_cooldown_ratio < 0.0 {
            return Err(ConfigError::InvalidParameter {
                name: "bps_cooldown_ratio",
                value: self.bps_cooldown_ratio,
                expected: "a value >= 0",
            });
        }
        Ok(())
    }

    /// Linear magnitude threshold of the noise gate, derived from the
    /// dB level against the N-point spectrum of a 16-bit full-scale
    /// signal.
    pub fn noise_cancellation_threshold(&self) -> f64 {
        10f64.powf(self.noise_cancellation_level / 20.0) * self.audio_window_size as f64
    }
}
