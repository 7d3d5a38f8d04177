// Audio source collaborators
//
// A source hands the pipeline mono hops of `audio_hop_size` samples in
// 16-bit units. End of stream is not an error: the source goes
// inactive and keeps yielding zeros, and the driving loop stops at the
// next tick boundary.

use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::error::AudioError;

pub mod file;
pub mod live;
pub mod memory;

pub use file::FileAudioSource;
pub use live::LiveAudioSource;
pub use memory::MemoryAudioSource;

/// Contract between the pipeline and its audio input.
pub trait AudioSource: Send {
    /// Native sampling rate in Hz.
    fn sampling_rate(&self) -> u32;

    /// False once the stream is exhausted; `next_hop` then yields
    /// zeros.
    fn is_active(&self) -> bool;

    /// Fill `hop` with the next `audio_hop_size` mono samples.
    fn next_hop(&mut self, hop: &mut [f64]) -> Result<(), AudioError>;
}

/// Mirrors consumed hops to a mono 16-bit WAV file.
pub struct HopRecorder {
    writer: WavWriter<BufWriter<File>>,
}

impl HopRecorder {
    pub fn create<P: AsRef<Path>>(path: P, sampling_rate: u32) -> Result<Self, AudioError> {
        let spec = WavSpec {
            channels: 1,
            sample_rate: sampling_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(&path, spec)?;
        log::info!("[Recorder] Recording hops to {}", path.as_ref().display());
        Ok(Self { writer })
    }

    pub fn write_hop(&mut self, hop: &[f64]) -> Result<(), AudioError> {
        for &sample in hop {
            let clamped = sample.clamp(f64::from(i16::MIN), f64::from(i16::MAX));
            self.writer.write_sample(clamped as i16)?;
        }
        Ok(())
    }

    pub fn finalize(self) -> Result<(), AudioError> {
        self.writer.finalize()?;
        Ok(())
    }
}
