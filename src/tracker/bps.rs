// Phase estimation and beat prediction
//
// The phase search scans every candidate phase of the current tempo
// lag and sums four back-looking CBSS samples spaced one period apart.
// The winning phase seeds the forward prediction buffer with Gaussian
// pulses at the predicted beat positions; a beat fires when the
// trigger index is the argmax of the buffer and the refractory
// cooldown has elapsed.

use crate::config::TrackerConfig;

pub struct BpsStage {
    /// Forward beat-prediction signal, fixed length
    buffer: Vec<f64>,
    epsilon_o: f64,
    epsilon_r: f64,
    /// Trigger look-ahead; the only runtime-tunable index
    trigger_index: usize,
    gaussian_width: f64,
    cooldown_ratio: f64,
    cooldown: usize,
    phi_max: usize,
}

impl BpsStage {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            buffer: vec![0.0; config.bps_buffer_size],
            epsilon_o: config.bps_epsilon_o,
            epsilon_r: config.bps_epsilon_r,
            trigger_index: config.bps_epsilon_t,
            gaussian_width: config.bps_gaussian_width,
            cooldown_ratio: config.bps_cooldown_ratio,
            cooldown: 0,
            phi_max: 0,
        }
    }

    /// Find the phase maximizing the sum of back-looking CBSS samples
    /// spaced by the tempo lag; lowest phase wins ties. An all-zero
    /// history yields phase 0.
    pub fn estimate_phase(&mut self, cbss: &[f64], tempo_lag: usize) -> usize {
        let n = (cbss.len() - 1) as i64;
        let lag = tempo_lag as i64;
        let mut best_phase = 0usize;
        let mut best_value = f64::MIN;
        for phase in 0..lag {
            let mut value = 0.0;
            for i in 0..4 {
                let index = n - phase - i * lag;
                if index < 0 {
                    continue;
                }
                value += cbss[index as usize];
            }
            if value > best_value {
                best_value = value;
                best_phase = phase as usize;
            }
        }
        self.phi_max = best_phase;
        best_phase
    }

    /// Advance the prediction buffer and add Gaussian pulses at the
    /// beat positions predicted by the current phase.
    pub fn update(&mut self, tempo_lag: usize) {
        let len = self.buffer.len();
        self.buffer.copy_within(1.., 0);
        self.buffer[len - 1] = 0.0;

        let epsilon = self.epsilon_o + self.epsilon_r;
        let offset = tempo_lag as f64 - self.phi_max as f64 - epsilon;
        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let center = (i % tempo_lag) as f64 - offset;
            *slot += (-(center * center) / self.gaussian_width).exp();
        }
    }

    /// Decide whether this tick carries a beat and arm the cooldown
    /// when it does. The trigger must be the unique argmax: a tracked
    /// beat ramps its aligned slot strictly above the rest, while a
    /// flat buffer (digital silence) ties everywhere and must stay
    /// quiet.
    pub fn decide_beat(&mut self, tempo_lag: usize) -> bool {
        if self.cooldown > 0 {
            self.cooldown -= 1;
            return false;
        }
        let trigger_value = self.buffer[self.trigger_index];
        let beat = self
            .buffer
            .iter()
            .enumerate()
            .all(|(i, &value)| i == self.trigger_index || trigger_value > value);
        if beat {
            self.cooldown = (self.cooldown_ratio * tempo_lag as f64) as usize;
        }
        beat
    }

    /// Clamp and apply a new trigger look-ahead.
    pub fn set_trigger_index(&mut self, index: usize) {
        self.trigger_index = index.min(self.buffer.len() - 1);
    }

    pub fn trigger_index(&self) -> usize {
        self.trigger_index
    }

    pub fn phi_max(&self) -> usize {
        self.phi_max
    }

    pub fn cooldown(&self) -> usize {
        self.cooldown
    }

    pub fn buffer(&self) -> &[f64] {
        &self.buffer
    }
}
