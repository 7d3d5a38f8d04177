// WAV file audio source
//
// Loads a 16-bit PCM WAV file up front, averages the channels to mono
// with truncating division, and serves hops from memory. With realtime
// pacing enabled, hops are throttled to hop_size / sampling_rate
// seconds so the pipeline behaves as it would against a live device.

use std::path::Path;
use std::time::{Duration, Instant};

use hound::{SampleFormat, WavReader};

use crate::audio::AudioSource;
use crate::error::AudioError;

pub struct FileAudioSource {
    samples: Vec<f64>,
    sampling_rate: u32,
    position: usize,
    active: bool,
    realtime: bool,
    hop_period: Duration,
    last_hop: Option<Instant>,
}

impl FileAudioSource {
    /// Open a WAV file and mix it down to mono. Only 16-bit integer
    /// PCM is accepted.
    pub fn open<P: AsRef<Path>>(path: P, hop_size: usize, realtime: bool) -> Result<Self, AudioError> {
        let path = path.as_ref();
        let mut reader = WavReader::open(path).map_err(|err| AudioError::FileError {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;
        let spec = reader.spec();
        if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(AudioError::UnsupportedFormat {
                path: path.display().to_string(),
                details: format!(
                    "{}-bit {:?}; only 16-bit integer PCM is supported",
                    spec.bits_per_sample, spec.sample_format
                ),
            });
        }

        let channels = usize::from(spec.channels.max(1));
        let mut samples = Vec::with_capacity(reader.duration() as usize);
        let mut frame = Vec::with_capacity(channels);
        for sample in reader.samples::<i16>() {
            let sample = sample.map_err(|err| AudioError::FileError {
                path: path.display().to_string(),
                reason: err.to_string(),
            })?;
            frame.push(i32::from(sample));
            if frame.len() == channels {
                let sum: i32 = frame.iter().sum();
                samples.push(f64::from(sum / channels as i32));
                frame.clear();
            }
        }

        log::info!(
            "[FileSource] Loaded {} ({} samples at {} Hz, {} channels, realtime={})",
            path.display(),
            samples.len(),
            spec.sample_rate,
            channels,
            realtime
        );

        Ok(Self {
            samples,
            sampling_rate: spec.sample_rate,
            position: 0,
            active: true,
            realtime,
            hop_period: Duration::from_secs_f64(hop_size as f64 / f64::from(spec.sample_rate)),
            last_hop: None,
        })
    }

    fn pace(&mut self) {
        if !self.realtime {
            return;
        }
        if let Some(last) = self.last_hop {
            let elapsed = last.elapsed();
            if elapsed < self.hop_period {
                std::thread::sleep(self.hop_period - elapsed);
            }
        }
        self.last_hop = Some(Instant::now());
    }
}

impl AudioSource for FileAudioSource {
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
        self.pace();
        for slot in hop.iter_mut() {
            if self.position < self.samples.len() {
                *slot = self.samples[self.position];
                self.position += 1;
            } else {
                *slot = 0.0;
                self.active = false;
            }
        }
        if !self.active {
            log::info!("[FileSource] Reached end of file");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};

    fn write_wav(path: &std::path::Path, channels: u16, samples: &[i16]) {
        let spec = WavSpec {
            channels,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for &sample in samples {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_stereo_mixes_to_mono() {
        let path =
            std::env::temp_dir().join(format!("beat_tracker_stereo_{}.wav", std::process::id()));
        // Two frames: (100, 200) and (-101, 100)
        write_wav(&path, 2, &[100, 200, -101, 100]);

        let mut source = FileAudioSource::open(&path, 2, false).unwrap();
        assert_eq!(source.sampling_rate(), 44100);
        let mut hop = [0.0; 2];
        source.next_hop(&mut hop).unwrap();
        // Integer mean truncates toward zero
        assert_eq!(hop, [150.0, 0.0]);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_end_of_file_pads_and_deactivates() {
        let path =
            std::env::temp_dir().join(format!("beat_tracker_eof_{}.wav", std::process::id()));
        write_wav(&path, 1, &[5, 6, 7]);

        let mut source = FileAudioSource::open(&path, 2, false).unwrap();
        let mut hop = [0.0; 2];
        source.next_hop(&mut hop).unwrap();
        assert_eq!(hop, [5.0, 6.0]);
        assert!(source.is_active());
        source.next_hop(&mut hop).unwrap();
        assert_eq!(hop, [7.0, 0.0]);
        assert!(!source.is_active());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_rejects_float_wav() {
        let path =
            std::env::temp_dir().join(format!("beat_tracker_float_{}.wav", std::process::id()));
        let spec = WavSpec {
            channels: 1,
            sample_rate: 44100,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        writer.write_sample(0.5f32).unwrap();
        writer.finalize().unwrap();

        assert!(matches!(
            FileAudioSource::open(&path, 128, false),
            Err(AudioError::UnsupportedFormat { .. })
        ));
        std::fs::remove_file(&path).ok();
    }
}
