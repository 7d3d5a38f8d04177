// Audio stream stage - sliding window spectral flux
//
// Advances an N-sample window by H samples per tick, computes its
// magnitude spectrum, applies a log-like compression and a noise gate,
// and reduces the result to a single non-negative flux scalar: the L1
// norm of the positive bin-wise differences against the previous
// spectrum.
//
// Sample values are in 16-bit full-scale units; the default noise gate
// of -74 dB is calibrated against that scale.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

use crate::config::TrackerConfig;

pub struct SpectrumStage {
    fft: Arc<dyn Fft<f64>>,
    /// Sliding input window of N samples, oldest first
    window: Vec<f64>,
    fft_buffer: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
    /// Compressed and gated magnitude spectrum of the previous tick
    prev_spectrum: Vec<f64>,
    sampling_rate: f64,
    window_size: usize,
    hop_size: usize,
    compression_gamma: f64,
    /// log10(1 + gamma), the compression normalizer
    compression_norm: f64,
    noise_threshold: f64,
}

impl SpectrumStage {
    pub fn new(config: &TrackerConfig, sampling_rate: u32, planner: &mut FftPlanner<f64>) -> Self {
        let window_size = config.audio_window_size;
        let fft = planner.plan_fft_forward(window_size);
        let scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];

        Self {
            fft,
            window: vec![0.0; window_size],
            fft_buffer: vec![Complex::default(); window_size],
            scratch,
            prev_spectrum: vec![0.0; window_size],
            sampling_rate: f64::from(sampling_rate),
            window_size,
            hop_size: config.audio_hop_size,
            compression_gamma: config.compression_gamma,
            compression_norm: (1.0 + config.compression_gamma).log10(),
            noise_threshold: config.noise_cancellation_threshold(),
        }
    }

    /// Advance the window by one hop and return the new flux value.
    ///
    /// The hop must contain exactly `audio_hop_size` mono samples; an
    /// exhausted source passes zeros.
    pub fn process_hop(&mut self, hop: &[f64]) -> f64 {
        debug_assert_eq!(hop.len(), self.hop_size);

        let keep = self.window_size - self.hop_size;
        self.window.copy_within(self.hop_size.., 0);
        self.window[keep..].copy_from_slice(hop);

        for (slot, &sample) in self.fft_buffer.iter_mut().zip(self.window.iter()) {
            *slot = Complex::new(sample, 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.fft_buffer, &mut self.scratch);

        let mut flux = 0.0;
        for (bin, prev) in self.fft_buffer.iter().zip(self.prev_spectrum.iter_mut()) {
            let mut magnitude = bin.norm() / self.sampling_rate;
            if self.compression_gamma != 0.0 {
                magnitude =
                    (1.0 + self.compression_gamma * magnitude).log10() / self.compression_norm;
            }
            if magnitude < self.noise_threshold {
                magnitude = 0.0;
            }
            flux += (magnitude - *prev).max(0.0);
            *prev = magnitude;
        }
        flux
    }
}
