// Event and control message types shared across the pipeline boundary

use serde::{Deserialize, Serialize};

/// Operating mode of the tracker.
///
/// `TempoLocked` freezes the active tempo lag and makes the cumulative
/// score purely self-referential, so beats keep firing at the locked
/// period regardless of what the tempo estimator sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingMode {
    Regular,
    TempoLocked,
}

/// Event emitted by the tracker, timestamped in hops and in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrackerEvent {
    /// Sudden energy increase in the onset-strength signal
    Onset { frame: u64, time: f64 },
    /// Periodic pulse predicted by the beat-prediction stage
    Beat { frame: u64, time: f64 },
    /// The estimated tempo changed
    Bpm { frame: u64, time: f64, value: f64 },
}

impl TrackerEvent {
    pub fn frame(&self) -> u64 {
        match self {
            TrackerEvent::Onset { frame, .. }
            | TrackerEvent::Beat { frame, .. }
            | TrackerEvent::Bpm { frame, .. } => *frame,
        }
    }

    pub fn time(&self) -> f64 {
        match self {
            TrackerEvent::Onset { time, .. }
            | TrackerEvent::Beat { time, .. }
            | TrackerEvent::Bpm { time, .. } => *time,
        }
    }
}

/// Runtime command delivered to the tracker over the control channel.
///
/// Applied at the end of the tick during which it is drained, so a
/// command never observes a partially updated tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlMessage {
    SetMode(TrackingMode),
    /// Move the beat trigger earlier (larger) or later (smaller);
    /// clamped to the prediction buffer
    SetTriggerLookahead(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_accessors() {
        let event = TrackerEvent::Bpm {
            frame: 344,
            time: 1.0,
            value: 120.2,
        };
        assert_eq!(event.frame(), 344);
        assert_eq!(event.time(), 1.0);
    }

    #[test]
    fn test_event_serialization_tags() {
        let event = TrackerEvent::Beat {
            frame: 10,
            time: 0.029,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""kind":"beat""#));

        let back: TrackerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
