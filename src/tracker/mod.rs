// Beat tracking pipeline
//
// One BeatTracker owns the whole pipeline state and advances it one
// audio hop at a time. A tick is indivisible and runs the stages in a
// fixed order: spectral flux, onset strength, tempo estimation (on its
// own cadence), cumulative score, then phase search and beat
// prediction. Each tick yields at most one onset, one beat and one
// BPM change, in that order.

use rustfft::FftPlanner;

use crate::config::TrackerConfig;
use crate::error::ConfigError;
use crate::events::{TrackerEvent, TrackingMode};

pub mod bps;
pub mod cbss;
pub mod oss;
pub mod spectrum;
pub mod tempo;

use bps::BpsStage;
use cbss::CbssStage;
use oss::OssStage;
use spectrum::SpectrumStage;
use tempo::TempoStage;

/// Tempo lag assumed before the first tempo estimate lands.
const INITIAL_TEMPO_LAG: usize = 100;

/// Flags raised by a single tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickOutput {
    pub frame: u64,
    pub time: f64,
    pub onset: bool,
    pub beat: bool,
    /// New BPM value when the active tempo lag changed this tick
    pub bpm: Option<f64>,
}

impl TickOutput {
    /// Materialize the tick's flags as events in emission order.
    pub fn events(&self) -> impl Iterator<Item = TrackerEvent> + '_ {
        let onset = self.onset.then(|| TrackerEvent::Onset {
            frame: self.frame,
            time: self.time,
        });
        let beat = self.beat.then(|| TrackerEvent::Beat {
            frame: self.frame,
            time: self.time,
        });
        let bpm = self.bpm.map(|value| TrackerEvent::Bpm {
            frame: self.frame,
            time: self.time,
            value,
        });
        onset.into_iter().chain(beat).chain(bpm)
    }
}

pub struct BeatTracker {
    config: TrackerConfig,
    spectrum: SpectrumStage,
    oss: OssStage,
    tempo: TempoStage,
    cbss: CbssStage,
    bps: BpsStage,
    mode: TrackingMode,
    /// Active beat period in OSS samples, shared by CBSS and BPS
    tempo_lag: usize,
    oss_sampling_rate: f64,
    oss_counter: usize,
    frame_index: i64,
    /// Last tick whose OSS sample cleared the onset floor
    last_audible_tick: Option<i64>,
}

impl BeatTracker {
    /// Build a tracker for the given sampling rate. All buffers, FFT
    /// plans and pulse-train templates are allocated here; ticks do
    /// not allocate.
    pub fn new(config: TrackerConfig, sampling_rate: u32) -> Result<Self, ConfigError> {
        config.validate()?;
        let oss_sampling_rate = f64::from(sampling_rate) / config.audio_hop_size as f64;

        let mut planner = FftPlanner::new();
        let spectrum = SpectrumStage::new(&config, sampling_rate, &mut planner);
        let oss = OssStage::new(&config);
        let tempo = TempoStage::new(&config, oss_sampling_rate, &mut planner)?;
        let cbss = CbssStage::new(&config);
        let bps = BpsStage::new(&config);

        log::info!(
            "[BeatTracker] Ready: {} Hz audio, {:.2} Hz OSS rate",
            sampling_rate,
            oss_sampling_rate
        );

        Ok(Self {
            config,
            spectrum,
            oss,
            tempo,
            cbss,
            bps,
            mode: TrackingMode::Regular,
            tempo_lag: INITIAL_TEMPO_LAG,
            oss_sampling_rate,
            oss_counter: 0,
            frame_index: -1,
            last_audible_tick: None,
        })
    }

    /// Advance the pipeline by one hop of `audio_hop_size` mono
    /// samples in 16-bit units.
    pub fn process_hop(&mut self, hop: &[f64]) -> TickOutput {
        self.frame_index += 1;

        let flux = self.spectrum.process_hop(hop);
        let oss_out = self.oss.push_flux(flux);
        if oss_out.oss >= self.config.onset_threshold_min {
            self.last_audible_tick = Some(self.frame_index);
        }

        self.oss_counter += 1;
        let mut bpm_changed = None;
        if self.oss_counter >= self.config.oss_hop_size
            && self.oss.len() >= self.config.oss_window_size
        {
            self.oss_counter = 0;
            self.tempo.update(self.oss.window(self.config.oss_window_size));
            if self.mode == TrackingMode::Regular {
                if let Some(scaled) = self.tempo.scaled_tempo_lag() {
                    let new_lag = (scaled as usize).max(1);
                    if new_lag != self.tempo_lag {
                        self.tempo_lag = new_lag;
                        bpm_changed = Some(self.bpm());
                        log::debug!("[BeatTracker] New tempo lag: {}", self.tempo_lag);
                    }
                }
            }
        }

        self.cbss.update(self.oss.latest(), self.tempo_lag, self.mode);
        self.bps.estimate_phase(self.cbss.buffer(), self.tempo_lag);
        self.bps.update(self.tempo_lag);
        // The prediction comb free-runs on a dead input; a trigger only
        // becomes a beat while the OSS floor has been cleared within
        // the score history.
        let beat = self.bps.decide_beat(self.tempo_lag) && self.audible_recently();

        let frame = self.frame_index as u64;
        TickOutput {
            frame,
            time: frame as f64 / self.oss_sampling_rate,
            onset: oss_out.onset,
            beat,
            bpm: bpm_changed,
        }
    }

    fn audible_recently(&self) -> bool {
        self.last_audible_tick
            .is_some_and(|tick| self.frame_index - tick <= self.config.cbss_buffer_size as i64)
    }

    /// Switch the operating mode; effective from the next tick.
    pub fn set_mode(&mut self, mode: TrackingMode) {
        if mode != self.mode {
            log::info!("[BeatTracker] Mode changed to {:?}", mode);
        }
        self.mode = mode;
    }

    /// Retune the beat trigger look-ahead; clamped to the prediction
    /// buffer.
    pub fn set_trigger_lookahead(&mut self, index: usize) {
        self.bps.set_trigger_index(index);
    }

    pub fn mode(&self) -> TrackingMode {
        self.mode
    }

    /// BPM corresponding to the active tempo lag.
    pub fn bpm(&self) -> f64 {
        60.0 * self.oss_sampling_rate / self.tempo_lag as f64
    }

    pub fn tempo_lag(&self) -> usize {
        self.tempo_lag
    }

    /// Hops processed so far; -1 before the first tick.
    pub fn frame_index(&self) -> i64 {
        self.frame_index
    }

    pub fn oss_sampling_rate(&self) -> f64 {
        self.oss_sampling_rate
    }

    pub fn phi_max(&self) -> usize {
        self.bps.phi_max()
    }

    pub fn beat_cooldown(&self) -> usize {
        self.bps.cooldown()
    }

    pub fn trigger_lookahead(&self) -> usize {
        self.bps.trigger_index()
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Score and prediction buffers, exposed for instrumentation.
    pub fn cbss_buffer(&self) -> &[f64] {
        self.cbss.buffer()
    }

    pub fn bps_buffer(&self) -> &[f64] {
        self.bps.buffer()
    }
}
