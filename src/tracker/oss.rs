// Onset-strength stage
//
// Smooths the per-tick flux through a short Hamming-weighted FIFO and
// keeps a bounded history of the resulting onset-strength signal.
// Onsets are decided by a mean + sigma threshold with an absolute
// floor and a "was below" latch, so a sustained loud passage fires at
// most once until the signal dips under the threshold again.

use crate::config::TrackerConfig;

/// Hamming coefficients `a0 - (1 - a0) * cos(2*pi*k / size)` with
/// a0 = 25/46.
pub fn hamming_window(size: usize) -> Vec<f64> {
    const A0: f64 = 25.0 / 46.0;
    (0..size)
        .map(|k| A0 - (1.0 - A0) * (2.0 * std::f64::consts::PI * k as f64 / size as f64).cos())
        .collect()
}

pub struct OssOutput {
    pub oss: f64,
    pub onset: bool,
}

pub struct OssStage {
    /// Recent flux values, newest last; same length as `hamming`
    flux_fifo: Vec<f64>,
    hamming: Vec<f64>,
    /// OSS history, oldest first, bounded by `capacity`
    oss_buffer: Vec<f64>,
    capacity: usize,
    /// Trailing sample count feeding the onset statistics
    stats_window: usize,
    threshold_sigma: f64,
    threshold_min: f64,
    mean: f64,
    threshold: f64,
    was_below_threshold: bool,
}

impl OssStage {
    pub fn new(config: &TrackerConfig) -> Self {
        let capacity = config.oss_window_size.max(config.oss_buffer_size);
        Self {
            flux_fifo: vec![0.0; config.hamming_window_size],
            hamming: hamming_window(config.hamming_window_size),
            oss_buffer: Vec::with_capacity(capacity),
            capacity,
            stats_window: config.oss_buffer_size,
            threshold_sigma: config.onset_threshold,
            threshold_min: config.onset_threshold_min,
            mean: 0.0,
            threshold: 0.0,
            was_below_threshold: false,
        }
    }

    /// Enqueue a flux value, producing the next OSS sample and the
    /// onset decision for this tick.
    pub fn push_flux(&mut self, flux: f64) -> OssOutput {
        let len = self.flux_fifo.len();
        self.flux_fifo.copy_within(1.., 0);
        self.flux_fifo[len - 1] = flux;

        let oss: f64 = self
            .flux_fifo
            .iter()
            .zip(self.hamming.iter())
            .map(|(value, weight)| value * weight)
            .sum();

        if self.oss_buffer.len() == self.capacity {
            self.oss_buffer.copy_within(1.., 0);
            self.oss_buffer.pop();
        }
        self.oss_buffer.push(oss);

        let tail_start = self.oss_buffer.len().saturating_sub(self.stats_window);
        let tail = &self.oss_buffer[tail_start..];
        self.mean = tail.iter().sum::<f64>() / tail.len() as f64;
        let variance = tail
            .iter()
            .map(|value| {
                let delta = value - self.mean;
                delta * delta
            })
            .sum::<f64>()
            / tail.len() as f64;
        self.threshold = (self.mean + self.threshold_sigma * variance.sqrt()).max(self.threshold_min);

        let mut onset = false;
        if oss < self.threshold {
            self.was_below_threshold = true;
        } else if self.was_below_threshold {
            self.was_below_threshold = false;
            onset = true;
        }
        OssOutput { oss, onset }
    }

    /// Most recent OSS sample; 0 before the first tick.
    pub fn latest(&self) -> f64 {
        self.oss_buffer.last().copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.oss_buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.oss_buffer.is_empty()
    }

    /// Trailing `size` OSS samples, oldest first. Callers must check
    /// that enough samples exist.
    pub fn window(&self, size: usize) -> &[f64] {
        &self.oss_buffer[self.oss_buffer.len() - size..]
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_stage() -> OssStage {
        let config = TrackerConfig {
            hamming_window_size: 4,
            oss_buffer_size: 8,
            oss_window_size: 8,
            onset_threshold: 0.1,
            onset_threshold_min: 5.0,
            ..TrackerConfig::default()
        };
        OssStage::new(&config)
    }

    #[test]
    fn test_hamming_coefficients() {
        let window = hamming_window(15);
        assert_eq!(window.len(), 15);
        // k = 0 gives the trough a0 - (1 - a0)
        assert!((window[0] - (25.0 / 46.0 - 21.0 / 46.0)).abs() < 1e-12);
        assert!(window.iter().all(|&w| (0.0..=1.0).contains(&w)));
        // The window peaks mid-buffer, not at the newest sample
        let peak = window
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap()
            .0;
        assert!(peak == 7 || peak == 8, "peak at {}", peak);
    }

    #[test]
    fn test_oss_is_weighted_flux_sum() {
        let mut stage = small_stage();
        stage.push_flux(1.0);
        stage.push_flux(2.0);
        stage.push_flux(3.0);
        let out = stage.push_flux(4.0);
        let hamming = hamming_window(4);
        let expected =
            1.0 * hamming[0] + 2.0 * hamming[1] + 3.0 * hamming[2] + 4.0 * hamming[3];
        assert!((out.oss - expected).abs() < 1e-12);
    }

    #[test]
    fn test_buffer_stays_bounded() {
        let mut stage = small_stage();
        for i in 0..100 {
            stage.push_flux(i as f64);
        }
        assert_eq!(stage.len(), 8);
    }

    #[test]
    fn test_threshold_floor_holds_on_silence() {
        let mut stage = small_stage();
        for _ in 0..50 {
            let out = stage.push_flux(0.0);
            assert!(!out.onset, "silence must not trigger onsets");
            assert_eq!(stage.threshold(), 5.0);
        }
    }

    #[test]
    fn test_onset_latch_fires_once_per_crossing() {
        let mut stage = small_stage();
        // Establish the below-threshold state
        for _ in 0..10 {
            stage.push_flux(0.0);
        }
        // Strong burst crosses the floor: exactly one onset while the
        // signal stays high
        let first = stage.push_flux(100.0);
        assert!(first.onset, "crossing should fire an onset");
        let second = stage.push_flux(100.0);
        assert!(!second.onset, "latched high state must not re-fire");

        // Dip below, then cross again
        for _ in 0..10 {
            stage.push_flux(0.0);
        }
        let third = stage.push_flux(100.0);
        assert!(third.onset, "new crossing after a dip should fire again");
    }

    #[test]
    fn test_window_returns_trailing_samples() {
        let mut stage = small_stage();
        for i in 0..20 {
            stage.push_flux(i as f64);
        }
        let window = stage.window(4);
        assert_eq!(window.len(), 4);
        assert!((stage.latest() - window[3]).abs() < 1e-12);
    }
}
