// Tick loop driver
//
// Owns the audio source and the tracker, and runs the cooperative
// loop: obtain one hop (the only blocking point), advance the
// pipeline, push the tick's events into a bounded SPSC ring, then
// drain the control ring so commands take effect on the next tick.
// Cancellation and end of stream are both observed at tick
// boundaries; a tick is never cut short.

use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::audio::{AudioSource, HopRecorder};
use crate::config::TrackerConfig;
use crate::error::ConfigError;
use crate::events::{ControlMessage, TrackerEvent};
use crate::tracker::BeatTracker;

/// Capacity of the outgoing event ring.
const EVENT_RING_CAPACITY: usize = 1024;

/// Capacity of the incoming control ring.
const CONTROL_RING_CAPACITY: usize = 64;

/// Consumer half of the event channel.
pub type EventReceiver = Consumer<TrackerEvent>;

/// Producer half of the control channel.
pub struct ControlSender {
    producer: Producer<ControlMessage>,
}

impl ControlSender {
    /// Enqueue a control message; returns false if the ring is full.
    pub fn send(&mut self, message: ControlMessage) -> bool {
        self.producer.push(message).is_ok()
    }
}

/// Counters reported when the loop finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub hops: u64,
    pub events: u64,
    pub dropped_events: u64,
}

pub struct TrackerRunner {
    source: Box<dyn AudioSource>,
    tracker: BeatTracker,
    hop: Vec<f64>,
    events: Producer<TrackerEvent>,
    control: Consumer<ControlMessage>,
    cancel: Arc<AtomicBool>,
    recorder: Option<HopRecorder>,
}

impl TrackerRunner {
    /// Wire a tracker to an audio source. Returns the runner plus the
    /// far ends of the event and control channels.
    pub fn new(
        config: TrackerConfig,
        source: Box<dyn AudioSource>,
    ) -> Result<(Self, EventReceiver, ControlSender), ConfigError> {
        let tracker = BeatTracker::new(config, source.sampling_rate())?;
        let hop = vec![0.0; tracker.config().audio_hop_size];
        let (event_tx, event_rx) = RingBuffer::new(EVENT_RING_CAPACITY);
        let (control_tx, control_rx) = RingBuffer::new(CONTROL_RING_CAPACITY);

        let runner = Self {
            source,
            tracker,
            hop,
            events: event_tx,
            control: control_rx,
            cancel: Arc::new(AtomicBool::new(false)),
            recorder: None,
        };
        let sender = ControlSender {
            producer: control_tx,
        };
        Ok((runner, event_rx, sender))
    }

    /// Flag observed at tick boundaries; setting it stops the loop.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Mirror consumed hops to a WAV file.
    pub fn set_recorder(&mut self, recorder: HopRecorder) {
        self.recorder = Some(recorder);
    }

    pub fn tracker(&self) -> &BeatTracker {
        &self.tracker
    }

    /// Run until the source goes inactive or cancellation is
    /// requested.
    pub fn run(mut self) -> RunStats {
        log::info!("[Runner] Starting tick loop");
        let mut stats = RunStats::default();

        while self.source.is_active() && !self.cancel.load(Ordering::Relaxed) {
            if let Err(err) = self.source.next_hop(&mut self.hop) {
                log::error!("[Runner] Audio source failed: {err}");
                break;
            }
            if let Some(recorder) = self.recorder.as_mut() {
                if let Err(err) = recorder.write_hop(&self.hop) {
                    log::warn!("[Runner] Recording failed, disabling: {err}");
                    self.recorder = None;
                }
            }

            let output = self.tracker.process_hop(&self.hop);
            stats.hops += 1;
            for event in output.events() {
                if self.events.push(event).is_ok() {
                    stats.events += 1;
                } else {
                    stats.dropped_events += 1;
                }
            }

            while let Ok(message) = self.control.pop() {
                self.apply_control(message);
            }
        }

        if let Some(recorder) = self.recorder.take() {
            if let Err(err) = recorder.finalize() {
                log::warn!("[Runner] Failed to finalize recording: {err}");
            }
        }
        if stats.dropped_events > 0 {
            log::warn!(
                "[Runner] Event ring overflowed, dropped {} events",
                stats.dropped_events
            );
        }
        log::info!(
            "[Runner] Stopped after {} hops, {} events",
            stats.hops,
            stats.events
        );
        stats
    }

    fn apply_control(&mut self, message: ControlMessage) {
        match message {
            ControlMessage::SetMode(mode) => self.tracker.set_mode(mode),
            ControlMessage::SetTriggerLookahead(index) => {
                self.tracker.set_trigger_lookahead(index);
                log::info!(
                    "[Runner] Trigger look-ahead set to {}",
                    self.tracker.trigger_lookahead()
                );
            }
        }
    }
}

/// Run a source to completion and collect every event, for offline
/// analysis and tests.
pub fn run_collect(
    config: TrackerConfig,
    source: Box<dyn AudioSource>,
) -> Result<Vec<TrackerEvent>, ConfigError> {
    let (runner, mut events, _control) = TrackerRunner::new(config, source)?;
    let mut collected = Vec::new();
    let handle = std::thread::spawn(move || runner.run());
    loop {
        match events.pop() {
            Ok(event) => collected.push(event),
            Err(_) => {
                if handle.is_finished() {
                    break;
                }
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
        }
    }
    // Drain whatever landed between the last pop and thread exit
    while let Ok(event) = events.pop() {
        collected.push(event);
    }
    let _ = handle.join();
    Ok(collected)
}
