// Tempo-estimation stage
//
// Periodicity analysis over the OSS window. An enhanced
// autocorrelation folds the lag-2t and lag-4t terms into lag t to
// boost tempo-related periodicities, candidate lags are taken from its
// local maxima and scored against precomputed pulse-train templates,
// and the winner feeds a decaying Gaussian accumulator whose argmax is
// octave-rescaled into the preferred BPM band.
//
// Degenerate inputs recover locally: an empty peak set skips the
// accumulator update and zero-sum score normalizations divide by 1.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

use crate::config::TrackerConfig;
use crate::error::ConfigError;

/// Comb templates scoring a (lag, phase) hypothesis against the OSS
/// window. Pulses sit at `floor(phase + p * b * lag)` for
/// p in {1, 1.5, 2} and b in {0, 1, 2, 3}, weighted 1 for the on-beat
/// spacing and 0.5 for the off-beat spacings; colliding indices sum.
pub struct PulseTrains {
    t_min: usize,
    /// trains[lag - t_min][phase] -> sorted (index, weight) pulses
    trains: Vec<Vec<Vec<(usize, f64)>>>,
}

impl PulseTrains {
    pub fn build(t_min: usize, t_max: usize) -> Self {
        const SPACINGS: [(f64, f64); 3] = [(1.0, 1.0), (1.5, 0.5), (2.0, 0.5)];

        let mut trains = Vec::with_capacity(t_max - t_min + 1);
        for lag in t_min..=t_max {
            let mut per_phase = Vec::with_capacity(lag);
            for phase in 0..lag {
                let mut pulses: Vec<(usize, f64)> = Vec::with_capacity(12);
                for &(spacing, weight) in SPACINGS.iter() {
                    for beat in 0..4u32 {
                        let index =
                            (phase as f64 + spacing * f64::from(beat) * lag as f64) as usize;
                        match pulses.iter_mut().find(|(i, _)| *i == index) {
                            Some((_, w)) => *w += weight,
                            None => pulses.push((index, weight)),
                        }
                    }
                }
                pulses.sort_unstable_by_key(|&(i, _)| i);
                per_phase.push(pulses);
            }
            trains.push(per_phase);
        }
        Self { t_min, trains }
    }

    pub fn template(&self, lag: usize, phase: usize) -> &[(usize, f64)] {
        &self.trains[lag - self.t_min][phase]
    }
}

pub struct TempoStage {
    t_min: usize,
    t_max: usize,
    window_size: usize,
    oss_sampling_rate: f64,
    compression: f64,
    candidates: usize,
    decay: f64,
    sigma: f64,
    min_bpm_rescaled: f64,
    max_bpm_rescaled: f64,

    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
    fft_buffer: Vec<Complex<f64>>,
    forward_scratch: Vec<Complex<f64>>,
    inverse_scratch: Vec<Complex<f64>>,
    corr: Vec<f64>,
    eac: Vec<f64>,

    pulse_trains: PulseTrains,
    /// Scratch for per-phase pulse-train correlations, reused across
    /// candidates
    phase_scores: Vec<f64>,
    peak_scratch: Vec<usize>,
    candidate_variance: Vec<f64>,
    candidate_maximum: Vec<f64>,

    accumulator: Vec<f64>,
    instant_tempo_lag: Option<usize>,
    accumulated_tempo_lag: Option<usize>,
    scaled_tempo_lag: Option<f64>,
}

impl TempoStage {
    pub fn new(
        config: &TrackerConfig,
        oss_sampling_rate: f64,
        planner: &mut FftPlanner<f64>,
    ) -> Result<Self, ConfigError> {
        let t_min = (60.0 * oss_sampling_rate / config.max_bpm_detection) as usize;
        let t_max = (60.0 * oss_sampling_rate / config.min_bpm_detection) as usize;
        if t_min < 1 || t_min > t_max {
            return Err(ConfigError::InvalidTempoRange { t_min, t_max });
        }
        let window_size = config.oss_window_size;
        if t_max >= window_size / 2 {
            return Err(ConfigError::TempoRangeExceedsWindow {
                t_max,
                window: window_size,
            });
        }

        log::info!(
            "[TempoStage] Tracking lags {}..={} ({:.1}..{:.1} BPM at {:.2} Hz OSS rate)",
            t_min,
            t_max,
            60.0 * oss_sampling_rate / t_max as f64,
            60.0 * oss_sampling_rate / t_min as f64,
            oss_sampling_rate
        );

        let forward = planner.plan_fft_forward(window_size);
        let inverse = planner.plan_fft_inverse(window_size);
        let forward_scratch = vec![Complex::default(); forward.get_inplace_scratch_len()];
        let inverse_scratch = vec![Complex::default(); inverse.get_inplace_scratch_len()];

        Ok(Self {
            t_min,
            t_max,
            window_size,
            oss_sampling_rate,
            compression: config.frequency_domain_compression,
            candidates: config.tempo_candidates,
            decay: config.tempo_accumulator_decay,
            sigma: config.tempo_accumulator_gaussian_width,
            min_bpm_rescaled: config.min_bpm_rescaled,
            max_bpm_rescaled: config.max_bpm_rescaled,
            forward,
            inverse,
            fft_buffer: vec![Complex::default(); window_size],
            forward_scratch,
            inverse_scratch,
            corr: vec![0.0; window_size],
            eac: vec![0.0; window_size],
            pulse_trains: PulseTrains::build(t_min, t_max),
            phase_scores: vec![0.0; t_max],
            peak_scratch: Vec::with_capacity(t_max - t_min + 1),
            candidate_variance: Vec::with_capacity(config.tempo_candidates),
            candidate_maximum: Vec::with_capacity(config.tempo_candidates),
            accumulator: vec![0.0; t_max - t_min + 1],
            instant_tempo_lag: None,
            accumulated_tempo_lag: None,
            scaled_tempo_lag: None,
        })
    }

    /// Run one tempo update over the OSS window (oldest sample first).
    pub fn update(&mut self, oss_window: &[f64]) {
        debug_assert_eq!(oss_window.len(), self.window_size);
        self.update_eac(oss_window);
        if self.update_instant_tempo_lag(oss_window) {
            self.update_accumulator();
        }
    }

    /// Enhanced autocorrelation: C = |IDFT(|DFT(s)|^q)| with the 2t
    /// and 4t terms folded in below half and quarter window length.
    fn update_eac(&mut self, oss_window: &[f64]) {
        for (slot, &value) in self.fft_buffer.iter_mut().zip(oss_window.iter()) {
            *slot = Complex::new(value, 0.0);
        }
        self.forward
            .process_with_scratch(&mut self.fft_buffer, &mut self.forward_scratch);
        for slot in self.fft_buffer.iter_mut() {
            *slot = Complex::new(slot.norm().powf(self.compression), 0.0);
        }
        self.inverse
            .process_with_scratch(&mut self.fft_buffer, &mut self.inverse_scratch);

        let scale = 1.0 / self.window_size as f64;
        for (slot, bin) in self.corr.iter_mut().zip(self.fft_buffer.iter()) {
            *slot = bin.norm() * scale;
        }

        self.eac.copy_from_slice(&self.corr);
        for t in 0..self.window_size / 4 {
            self.eac[t] += self.corr[2 * t] + self.corr[4 * t];
        }
        for t in self.window_size / 4..self.window_size / 2 {
            self.eac[t] += self.corr[2 * t];
        }
    }

    /// Score the strongest EAC peaks with the pulse-train templates
    /// and keep the winner. Returns false when no peak exists.
    fn update_instant_tempo_lag(&mut self, oss_window: &[f64]) -> bool {
        self.peak_scratch.clear();
        for t in self.t_min + 1..self.t_max {
            if self.eac[t] > self.eac[t - 1] && self.eac[t] > self.eac[t + 1] {
                self.peak_scratch.push(t);
            }
        }
        if self.peak_scratch.is_empty() {
            return false;
        }

        // Top peaks by EAC value, lowest lag on ties
        let eac = &self.eac;
        self.peak_scratch.sort_unstable_by(|&a, &b| {
            eac[b]
                .partial_cmp(&eac[a])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });
        let count = self.peak_scratch.len().min(self.candidates);

        self.candidate_variance.clear();
        self.candidate_maximum.clear();
        let mut variance_sum = 0.0;
        let mut maximum_sum = 0.0;

        for j in 0..count {
            let lag = self.peak_scratch[j];
            let scores = &mut self.phase_scores[..lag];
            for (phase, slot) in scores.iter_mut().enumerate() {
                let mut acc = 0.0;
                for &(index, weight) in self.pulse_trains.template(lag, phase) {
                    if index < self.window_size {
                        acc += weight * oss_window[index];
                    }
                }
                *slot = acc;
            }
            let mean = scores.iter().sum::<f64>() / lag as f64;
            let variance = scores
                .iter()
                .map(|value| {
                    let delta = value - mean;
                    delta * delta
                })
                .sum::<f64>()
                / lag as f64;
            let maximum = scores.iter().cloned().fold(f64::MIN, f64::max);
            self.candidate_variance.push(variance);
            self.candidate_maximum.push(maximum);
            variance_sum += variance;
            maximum_sum += maximum;
        }

        if variance_sum == 0.0 {
            variance_sum = 1.0;
        }
        if maximum_sum == 0.0 {
            maximum_sum = 1.0;
        }

        let mut best = 0;
        let mut best_score = f64::MIN;
        for j in 0..count {
            let score = self.candidate_variance[j] / variance_sum
                + self.candidate_maximum[j] / maximum_sum;
            if score > best_score {
                best_score = score;
                best = j;
            }
        }
        self.instant_tempo_lag = Some(self.peak_scratch[best]);
        true
    }

    /// Decay the accumulator, deposit a Gaussian at the instant lag,
    /// and rescale the argmax into the preferred BPM band.
    fn update_accumulator(&mut self) {
        let instant = match self.instant_tempo_lag {
            Some(lag) => lag as f64,
            None => return,
        };

        let norm = 1.0 / (self.sigma * (2.0 * std::f64::consts::PI).sqrt());
        for (offset, slot) in self.accumulator.iter_mut().enumerate() {
            let lag = (self.t_min + offset) as f64;
            let z = (lag - instant) / self.sigma;
            *slot = *slot * self.decay + norm * (-0.5 * z * z).exp();
        }

        let mut best = 0;
        let mut best_value = f64::MIN;
        for (offset, &value) in self.accumulator.iter().enumerate() {
            if value > best_value {
                best_value = value;
                best = offset;
            }
        }
        let accumulated = self.t_min + best;
        self.accumulated_tempo_lag = Some(accumulated);

        let mut bpm = 60.0 * self.oss_sampling_rate / accumulated as f64;
        while bpm <= self.min_bpm_rescaled {
            bpm *= 2.0;
        }
        while bpm >= self.max_bpm_rescaled {
            bpm *= 0.5;
            // A BPM landing exactly on both band edges (max = 2 * min)
            // would alternate between the two loops forever; pin it to
            // the lower edge instead.
            if bpm <= self.min_bpm_rescaled {
                break;
            }
        }
        self.scaled_tempo_lag = Some(60.0 * self.oss_sampling_rate / bpm);
    }

    pub fn scaled_tempo_lag(&self) -> Option<f64> {
        self.scaled_tempo_lag
    }

    pub fn instant_tempo_lag(&self) -> Option<usize> {
        self.instant_tempo_lag
    }

    pub fn accumulated_tempo_lag(&self) -> Option<usize> {
        self.accumulated_tempo_lag
    }

    pub fn lag_bounds(&self) -> (usize, usize) {
        (self.t_min, self.t_max)
    }
}
