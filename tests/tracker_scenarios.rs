//! End-to-end scenarios for the beat tracking pipeline
//!
//! All scenarios run 44.1 kHz mono signals with the default
//! configuration through the full pipeline, either via the runner's
//! collection helper or tick by tick when tracker state needs to be
//! observed along the way.

use beat_tracker::audio::MemoryAudioSource;
use beat_tracker::runner::run_collect;
use beat_tracker::{BeatTracker, TrackerConfig, TrackerEvent, TrackingMode};

const SAMPLE_RATE: u32 = 44100;
const HOP: usize = 128;

/// Hops per beat at 120 BPM: round(44100 * 60 / 120 / 128) = 172.
const CLICK_PERIOD_HOPS: usize = 172;

/// Short full-scale burst; long enough to register in the 1024-sample
/// analysis window.
fn write_click(samples: &mut [i16], position: usize) {
    for slot in samples.iter_mut().skip(position).take(64) {
        *slot = 25000;
    }
}

/// Impulse train with a fixed hop period.
fn click_train(seconds: f64, period_hops: usize) -> Vec<i16> {
    let total = (seconds * f64::from(SAMPLE_RATE)) as usize;
    let mut samples = vec![0i16; total];
    let mut position = 0;
    while position < total {
        write_click(&mut samples, position);
        position += period_hops * HOP;
    }
    samples
}

fn beat_frames(events: &[TrackerEvent]) -> Vec<u64> {
    events
        .iter()
        .filter_map(|event| match event {
            TrackerEvent::Beat { frame, .. } => Some(*frame),
            _ => None,
        })
        .collect()
}

fn drive_hops(tracker: &mut BeatTracker, samples: &[i16]) -> Vec<TrackerEvent> {
    let mut events = Vec::new();
    let mut hop = vec![0.0f64; HOP];
    for chunk in samples.chunks(HOP) {
        for (slot, value) in hop.iter_mut().zip(chunk.iter()) {
            *slot = f64::from(*value);
        }
        for slot in hop.iter_mut().skip(chunk.len()) {
            *slot = 0.0;
        }
        let out = tracker.process_hop(&hop);
        events.extend(out.events());
    }
    events
}

// S1: a 120 BPM click train locks the tempo near lag 172 and produces
// periodic beats.
#[test]
fn s1_click_train_locks_tempo_and_beats_periodically() {
    let samples = click_train(20.0, CLICK_PERIOD_HOPS);
    let mut tracker = BeatTracker::new(TrackerConfig::default(), SAMPLE_RATE).unwrap();
    let events = drive_hops(&mut tracker, &samples);

    let lag = tracker.tempo_lag();
    assert!(
        (168..=176).contains(&lag),
        "tempo lag {} should settle near 172",
        lag
    );
    let bpm = tracker.bpm();
    assert!(
        (117.0..=124.0).contains(&bpm),
        "BPM {} should settle near 120",
        bpm
    );

    // Beats become periodic once the tempo estimate is in; look at
    // the second half of the run.
    let beats: Vec<u64> = beat_frames(&events)
        .into_iter()
        .filter(|&frame| frame > 3500)
        .collect();
    assert!(
        beats.len() >= 10,
        "expected a steady beat stream, got {} beats",
        beats.len()
    );
    let mut intervals: Vec<i64> = beats
        .windows(2)
        .map(|pair| pair[1] as i64 - pair[0] as i64)
        .collect();
    intervals.sort_unstable();
    let median = intervals[intervals.len() / 2];
    assert!(
        (160..=185).contains(&median),
        "median beat interval {} should match the click period",
        median
    );
}

// S2: a tempo change from 120 to 150 BPM is retracked and announced
// with a BPM event.
#[test]
fn s2_tempo_change_is_retracked() {
    let mut samples = click_train(15.0, CLICK_PERIOD_HOPS);
    // 150 BPM: round(44100 * 60 / 150 / 128) = 138 hops per beat
    samples.extend(click_train(15.0, 138));
    let mut tracker = BeatTracker::new(TrackerConfig::default(), SAMPLE_RATE).unwrap();
    let events = drive_hops(&mut tracker, &samples);

    let switch_frame = (15.0 * f64::from(SAMPLE_RATE) / HOP as f64) as u64;
    let late_bpm: Vec<f64> = events
        .iter()
        .filter_map(|event| match event {
            TrackerEvent::Bpm { frame, value, .. } if *frame > switch_frame => Some(*value),
            _ => None,
        })
        .collect();
    assert!(
        !late_bpm.is_empty(),
        "a BPM event must announce the tempo change"
    );
    let final_bpm = *late_bpm.last().unwrap();
    assert!(
        (140.0..=162.0).contains(&final_bpm),
        "final BPM {} should settle near 150",
        final_bpm
    );
}

// S3: digital silence yields no events at all.
#[test]
fn s3_silence_yields_no_events() {
    let samples = vec![0i16; 30 * SAMPLE_RATE as usize];
    let events = run_collect(
        TrackerConfig::default(),
        Box::new(MemoryAudioSource::from_i16(&samples, SAMPLE_RATE)),
    )
    .unwrap();
    assert!(events.is_empty(), "silence produced {:?}", events);
}

// S4: a single transient on silence yields exactly one onset and no
// beats.
#[test]
fn s4_single_transient_yields_one_onset_no_beats() {
    let mut samples = vec![0i16; 30 * SAMPLE_RATE as usize];
    write_click(&mut samples, SAMPLE_RATE as usize);
    let events = run_collect(
        TrackerConfig::default(),
        Box::new(MemoryAudioSource::from_i16(&samples, SAMPLE_RATE)),
    )
    .unwrap();

    let onsets: Vec<u64> = events
        .iter()
        .filter_map(|event| match event {
            TrackerEvent::Onset { frame, .. } => Some(*frame),
            _ => None,
        })
        .collect();
    assert_eq!(onsets.len(), 1, "events: {:?}", events);
    // The transient sits at t = 1.0 s, frame round(F * 1.0) = 345
    let frame = onsets[0] as i64;
    assert!(
        (343..=352).contains(&frame),
        "onset frame {} should sit near the transient",
        frame
    );
    assert!(
        beat_frames(&events).is_empty(),
        "a lone transient must not produce beats"
    );
}

// S5: TEMPO_LOCKED freezes the tempo lag while beats keep coming.
#[test]
fn s5_tempo_locked_freezes_lag() {
    let samples = click_train(20.0, CLICK_PERIOD_HOPS);
    let mut tracker = BeatTracker::new(TrackerConfig::default(), SAMPLE_RATE).unwrap();

    let lock_frame = (5.0 * f64::from(SAMPLE_RATE) / HOP as f64) as i64;
    let mut locked_lag = None;
    let mut late_beats = 0usize;
    let mut hop = vec![0.0f64; HOP];
    for chunk in samples.chunks(HOP) {
        for (slot, value) in hop.iter_mut().zip(chunk.iter()) {
            *slot = f64::from(*value);
        }
        for slot in hop.iter_mut().skip(chunk.len()) {
            *slot = 0.0;
        }
        let out = tracker.process_hop(&hop);
        if tracker.frame_index() == lock_frame {
            tracker.set_mode(TrackingMode::TempoLocked);
            locked_lag = Some(tracker.tempo_lag());
        }
        if let Some(lag) = locked_lag {
            assert_eq!(
                tracker.tempo_lag(),
                lag,
                "tempo lag must not move while locked (frame {})",
                tracker.frame_index()
            );
            assert!(out.bpm.is_none(), "no BPM events while locked");
            if out.beat {
                late_beats += 1;
            }
        }
    }
    assert_eq!(tracker.mode(), TrackingMode::TempoLocked);
    assert!(
        late_beats >= 10,
        "beats should continue at the locked period, got {}",
        late_beats
    );
}

// S6: with the trigger look-ahead at zero, the cooldown keeps
// consecutive beats at least floor(0.4 * tempo_lag) + 1 hops apart.
#[test]
fn s6_cooldown_spaces_beats() {
    let config = TrackerConfig {
        bps_epsilon_t: 0,
        ..TrackerConfig::default()
    };
    let samples = click_train(20.0, CLICK_PERIOD_HOPS);
    let mut tracker = BeatTracker::new(config, SAMPLE_RATE).unwrap();
    let events = drive_hops(&mut tracker, &samples);

    let beats = beat_frames(&events);
    assert!(beats.len() >= 2, "expected beats, got {:?}", beats);
    // The smallest admissible tempo lag is t_min = 98, so no two
    // beats may ever be closer than floor(0.4 * 98) + 1 = 40 hops.
    for pair in beats.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(
            gap >= 40,
            "beats at frames {} and {} violate the cooldown",
            pair[0],
            pair[1]
        );
    }
}

// Determinism: identical input produces an identical event stream.
#[test]
fn determinism_identical_runs_match() {
    let samples = click_train(8.0, CLICK_PERIOD_HOPS);
    let run = |samples: &[i16]| {
        run_collect(
            TrackerConfig::default(),
            Box::new(MemoryAudioSource::from_i16(samples, SAMPLE_RATE)),
        )
        .unwrap()
    };
    let first = run(&samples);
    let second = run(&samples);
    assert_eq!(first, second);
    assert!(
        !first.is_empty(),
        "the click train should produce at least onsets"
    );
}

// Structural invariants hold on every tick.
#[test]
fn invariants_hold_throughout_a_run() {
    let samples = click_train(10.0, CLICK_PERIOD_HOPS);
    let mut tracker = BeatTracker::new(TrackerConfig::default(), SAMPLE_RATE).unwrap();
    let config = tracker.config().clone();

    let mut hop = vec![0.0f64; HOP];
    for chunk in samples.chunks(HOP) {
        for (slot, value) in hop.iter_mut().zip(chunk.iter()) {
            *slot = f64::from(*value);
        }
        for slot in hop.iter_mut().skip(chunk.len()) {
            *slot = 0.0;
        }
        tracker.process_hop(&hop);

        assert_eq!(tracker.cbss_buffer().len(), config.cbss_buffer_size);
        assert_eq!(tracker.bps_buffer().len(), config.bps_buffer_size);
        assert!(tracker.tempo_lag() >= 1);
        assert!(
            tracker.phi_max() < tracker.tempo_lag(),
            "phi_max {} out of range for lag {}",
            tracker.phi_max(),
            tracker.tempo_lag()
        );
        let cooldown_cap = (config.bps_cooldown_ratio * tracker.tempo_lag() as f64) as usize;
        assert!(
            tracker.beat_cooldown() <= cooldown_cap,
            "cooldown {} exceeds cap {}",
            tracker.beat_cooldown(),
            cooldown_cap
        );
    }
}

// A stationary pure tone is not rhythmic content: after warmup there
// are no onsets and no beats.
#[test]
fn pure_tone_stays_quiet_after_warmup() {
    // Bin-centered frequency: 64 cycles per 1024-sample window
    let omega = 2.0 * std::f64::consts::PI * 64.0 / 1024.0;
    let samples: Vec<i16> = (0..10 * SAMPLE_RATE as usize)
        .map(|n| (10000.0 * (omega * n as f64).sin()) as i16)
        .collect();
    let events = run_collect(
        TrackerConfig::default(),
        Box::new(MemoryAudioSource::from_i16(&samples, SAMPLE_RATE)),
    )
    .unwrap();

    let warmup = 700u64;
    let late: Vec<&TrackerEvent> = events
        .iter()
        .filter(|event| {
            event.frame() > warmup
                && matches!(
                    event,
                    TrackerEvent::Onset { .. } | TrackerEvent::Beat { .. }
                )
        })
        .collect();
    assert!(
        late.is_empty(),
        "steady tone produced onsets or beats after warmup: {:?}",
        late
    );
}
