// In-memory audio source
//
// Feeds a preloaded mono signal to the pipeline. Used by the
// integration tests and anywhere a deterministic replay is needed.

use crate::audio::AudioSource;
use crate::error::AudioError;

pub struct MemoryAudioSource {
    samples: Vec<f64>,
    sampling_rate: u32,
    position: usize,
    active: bool,
}

impl MemoryAudioSource {
    pub fn new(samples: Vec<f64>, sampling_rate: u32) -> Self {
        Self {
            samples,
            sampling_rate,
            position: 0,
            active: true,
        }
    }

    /// Convenience constructor for 16-bit sample data.
    pub fn from_i16(samples: &[i16], sampling_rate: u32) -> Self {
        Self::new(samples.iter().map(|&s| f64::from(s)).collect(), sampling_rate)
    }
}

impl AudioSource for MemoryAudioSource {
    fn sampling_rate(&self) -> u32 {
        self.sampling_rate
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn next_hop(&mut self, hop: &mut [f64]) -> Result<(), AudioError> {
        if !self.active {
            hop.fill(0.0);
            return Ok(());
        }
        for slot in hop.iter_mut() {
            if self.position < self.samples.len() {
                *slot = self.samples[self.position];
                self.position += 1;
            } else {
                *slot = 0.0;
                self.active = false;
            }
        }
        Ok(())
    }
}
