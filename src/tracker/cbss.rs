// Cumulative beat-synchronous score
//
// Each tick appends one sample blending the latest OSS value with the
// best log-Gaussian-weighted predecessor found one beat period back,
// searched over [-2 * lag, -lag / 2). The recursion is what carries
// beat phase forward between tempo updates; in tempo-locked mode the
// OSS term is dropped and the score free-runs on its own history.

use crate::config::TrackerConfig;
use crate::events::TrackingMode;

pub struct CbssStage {
    /// Score history, oldest first, fixed length
    buffer: Vec<f64>,
    eta: f64,
    alpha: f64,
}

impl CbssStage {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            buffer: vec![0.0; config.cbss_buffer_size],
            eta: config.cbss_eta,
            alpha: config.cbss_alpha,
        }
    }

    /// Append the tick's score sample for the given tempo lag.
    pub fn update(&mut self, oss_latest: f64, tempo_lag: usize, mode: TrackingMode) {
        let len = self.buffer.len();
        self.buffer.copy_within(1.., 0);
        self.buffer[len - 1] = 0.0;

        let n = (len - 1) as i64;
        let lag = tempo_lag as i64;
        let mut phi = 0.0;
        // Upper bound is floor(-lag / 2), exclusive
        for v in (-2 * lag)..-((lag + 1) / 2) {
            let index = n + v;
            if index < 0 {
                continue;
            }
            let z = ((-v) as f64 / lag as f64).ln();
            let weight = (-0.5 * self.eta * z * z).exp();
            phi = f64::max(phi, weight * self.buffer[index as usize]);
        }

        self.buffer[len - 1] = match mode {
            TrackingMode::Regular => (1.0 - self.alpha) * oss_latest + self.alpha * phi,
            TrackingMode::TempoLocked => phi,
        };
    }

    pub fn buffer(&self) -> &[f64] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_stage() -> CbssStage {
        CbssStage::new(&TrackerConfig::default())
    }

    #[test]
    fn test_buffer_length_is_constant() {
        let mut stage = make_stage();
        for i in 0..2000 {
            stage.update(i as f64, 100, TrackingMode::Regular);
            assert_eq!(stage.len(), 512);
        }
    }

    #[test]
    fn test_zero_history_blends_oss_only() {
        let mut stage = make_stage();
        stage.update(10.0, 100, TrackingMode::Regular);
        let latest = *stage.buffer().last().unwrap();
        // (1 - alpha) * oss with an all-zero history
        assert!((latest - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_locked_mode_ignores_oss() {
        let mut stage = make_stage();
        stage.update(10.0, 100, TrackingMode::TempoLocked);
        assert_eq!(*stage.buffer().last().unwrap(), 0.0);
    }

    #[test]
    fn test_predecessor_at_exact_lag_dominates() {
        let mut stage = make_stage();
        let lag = 100usize;
        // Seed one strong sample, then advance exactly one period; the
        // log-Gaussian weight peaks at -lag so the score re-surfaces.
        stage.update(50.0, lag, TrackingMode::Regular);
        for _ in 0..lag - 1 {
            stage.update(0.0, lag, TrackingMode::Regular);
        }
        stage.update(0.0, lag, TrackingMode::Regular);
        let latest = *stage.buffer().last().unwrap();
        // alpha * weight(-lag) * 5.0 with weight(-lag) = 1
        assert!(
            (latest - 0.9 * 5.0).abs() < 1e-9,
            "expected the seeded score one period back, got {}",
            latest
        );
    }
}
