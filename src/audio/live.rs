// Live audio source
//
// Captures from a cpal input device. The capture stream lives on a
// dedicated thread (cpal streams are not Send); its callback mixes
// interleaved frames down to mono, rescales them to 16-bit units and
// pushes them into a lock-free SPSC ring. The pipeline side pops one
// hop at a time, sleeping briefly while the ring is empty. The
// callback never blocks and never allocates.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::audio::AudioSource;
use crate::error::AudioError;

/// Ring capacity in samples; about three seconds at 44.1 kHz, enough
/// to ride out scheduling hiccups on the consumer side.
const RING_CAPACITY: usize = 1 << 17;

/// Interval between overflow warnings.
const OVERFLOW_LOG_PERIOD: Duration = Duration::from_secs(1);

pub struct LiveAudioSource {
    consumer: Consumer<f64>,
    sampling_rate: u32,
    dropped: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
    stream_thread: Option<JoinHandle<()>>,
    last_overflow_log: Instant,
}

impl LiveAudioSource {
    /// Open the default input device, or the first device whose name
    /// contains `device_name`.
    pub fn open(device_name: Option<&str>) -> Result<Self, AudioError> {
        let (producer, consumer) = RingBuffer::new(RING_CAPACITY);
        let dropped = Arc::new(AtomicU64::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        let (ready_tx, ready_rx) = mpsc::channel::<Result<u32, AudioError>>();
        let thread_dropped = Arc::clone(&dropped);
        let thread_shutdown = Arc::clone(&shutdown);
        let wanted = device_name.map(|name| name.to_string());

        let stream_thread = std::thread::spawn(move || {
            let stream = match build_capture_stream(wanted.as_deref(), producer, thread_dropped) {
                Ok((stream, rate)) => {
                    let _ = ready_tx.send(Ok(rate));
                    stream
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };
            while !thread_shutdown.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_millis(50));
            }
            drop(stream);
        });

        let sampling_rate = ready_rx
            .recv()
            .map_err(|_| AudioError::StreamOpenFailed {
                reason: "capture thread exited before reporting".to_string(),
            })??;

        Ok(Self {
            consumer,
            sampling_rate,
            dropped,
            shutdown,
            stream_thread: Some(stream_thread),
            last_overflow_log: Instant::now(),
        })
    }
}

impl AudioSource for LiveAudioSource {
    fn sampling_rate(&self) -> u32 {
        self.sampling_rate
    }

    fn is_active(&self) -> bool {
        true
    }

    fn next_hop(&mut self, hop: &mut [f64]) -> Result<(), AudioError> {
        for slot in hop.iter_mut() {
            loop {
                match self.consumer.pop() {
                    Ok(sample) => {
                        *slot = sample;
                        break;
                    }
                    Err(_) => std::thread::sleep(Duration::from_millis(1)),
                }
            }
        }

        if self.last_overflow_log.elapsed() >= OVERFLOW_LOG_PERIOD {
            let dropped = self.dropped.swap(0, Ordering::Relaxed);
            if dropped > 0 {
                log::warn!(
                    "[LiveSource] Capture ring overflowed, dropped {} samples in the last second",
                    dropped
                );
            }
            self.last_overflow_log = Instant::now();
        }
        Ok(())
    }
}

impl Drop for LiveAudioSource {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.stream_thread.take() {
            let _ = handle.join();
        }
    }
}

fn build_capture_stream(
    device_name: Option<&str>,
    producer: Producer<f64>,
    dropped: Arc<AtomicU64>,
) -> Result<(cpal::Stream, u32), AudioError> {
    let host = cpal::default_host();
    let device = match device_name {
        Some(name) => host
            .input_devices()
            .map_err(|err| AudioError::StreamOpenFailed {
                reason: err.to_string(),
            })?
            .find(|device| {
                device
                    .name()
                    .map(|n| n.to_lowercase().contains(&name.to_lowercase()))
                    .unwrap_or(false)
            })
            .ok_or_else(|| AudioError::DeviceNotFound {
                name: name.to_string(),
            })?,
        None => host
            .default_input_device()
            .ok_or_else(|| AudioError::DeviceNotFound {
                name: "default".to_string(),
            })?,
    };

    let config = device
        .default_input_config()
        .map_err(|err| AudioError::StreamOpenFailed {
            reason: format!("failed to get default input config: {err}"),
        })?;
    let stream_config: cpal::StreamConfig = config.clone().into();
    let channels = usize::from(stream_config.channels);
    let sampling_rate = stream_config.sample_rate.0;

    log::info!(
        "[LiveSource] Capturing from '{}' at {} Hz, {} channels, {:?}",
        device.name().unwrap_or_else(|_| "unknown".to_string()),
        sampling_rate,
        channels,
        config.sample_format()
    );

    let err_fn = |err| log::error!("[LiveSource] Stream error: {err}");

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => {
            let mut writer = RingWriter::new(producer, channels, 32768.0, dropped);
            device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    writer.write(data.iter().map(|&s| f64::from(s)));
                },
                err_fn,
                None,
            )
        }
        cpal::SampleFormat::I16 => {
            let mut writer = RingWriter::new(producer, channels, 1.0, dropped);
            device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    writer.write(data.iter().map(|&s| f64::from(s)));
                },
                err_fn,
                None,
            )
        }
        other => {
            return Err(AudioError::StreamOpenFailed {
                reason: format!("unsupported input sample format {other:?}"),
            })
        }
    }
    .map_err(|err| AudioError::StreamOpenFailed {
        reason: err.to_string(),
    })?;

    stream.play().map_err(|err| AudioError::StreamOpenFailed {
        reason: err.to_string(),
    })?;

    Ok((stream, sampling_rate))
}

/// Mixes interleaved frames to mono and pushes them into the ring
/// from inside the capture callback.
struct RingWriter {
    producer: Producer<f64>,
    channels: usize,
    scale: f64,
    dropped: Arc<AtomicU64>,
    frame: Vec<f64>,
}

impl RingWriter {
    fn new(producer: Producer<f64>, channels: usize, scale: f64, dropped: Arc<AtomicU64>) -> Self {
        Self {
            producer,
            channels,
            scale,
            dropped,
            frame: Vec::with_capacity(channels),
        }
    }

    fn write(&mut self, samples: impl Iterator<Item = f64>) {
        for sample in samples {
            self.frame.push(sample);
            if self.frame.len() == self.channels {
                let mono = self.frame.iter().sum::<f64>() / self.channels as f64 * self.scale;
                self.frame.clear();
                if self.producer.push(mono).is_err() {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

/// Names of the available capture devices on the default host.
pub fn capture_device_names() -> Result<Vec<String>, AudioError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|err| AudioError::StreamOpenFailed {
            reason: err.to_string(),
        })?;
    Ok(devices.filter_map(|device| device.name().ok()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_writer_mixes_and_scales() {
        let (producer, mut consumer) = RingBuffer::new(8);
        let dropped = Arc::new(AtomicU64::new(0));
        let mut writer = RingWriter::new(producer, 2, 32768.0, Arc::clone(&dropped));
        writer.write([0.5, -0.5, 0.25, 0.25].into_iter());
        assert_eq!(consumer.pop().unwrap(), 0.0);
        assert_eq!(consumer.pop().unwrap(), 0.25 * 32768.0);
        assert_eq!(dropped.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_ring_writer_counts_drops_when_full() {
        let (producer, _consumer) = RingBuffer::new(2);
        let dropped = Arc::new(AtomicU64::new(0));
        let mut writer = RingWriter::new(producer, 1, 1.0, Arc::clone(&dropped));
        writer.write([1.0, 2.0, 3.0, 4.0].into_iter());
        assert_eq!(dropped.load(Ordering::Relaxed), 2);
    }
}
