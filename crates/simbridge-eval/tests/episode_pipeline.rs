use std::io::Cursor;
use std::ops::ControlFlow;

use simbridge_eval::{Action, EpisodeLog, EvalConfig, Maneuver, SafetyEvaluator};
use simbridge_frame::{MapGeometry, MessageCodec, StreamFramer, TelemetryFrame};
use simbridge_transport::CancelToken;

fn wire_episode(codec: &MessageCodec) -> Vec<u8> {
    // Ego drives +x toward a pedestrian standing at x = 106.
    let mut wire = Vec::new();
    for (tick, speed) in [4.0, 8.0, 12.0, 15.0, 9.0, 3.0].iter().enumerate() {
        let frame = TelemetryFrame::ego(100.0 + tick as f64, 200.0, 0.0, *speed)
            .with_pedestrian(104.0, 200.0, 0.5);
        wire.extend_from_slice(codec.encode_telemetry(&frame).as_bytes());
    }
    wire
}

#[test]
fn decoded_stream_scores_one_crash() {
    let codec = MessageCodec::new(MapGeometry::new(400.0, 400.0, 1.0));
    let cancel = CancelToken::new();

    let mut frames = Vec::new();
    for message in split_envelopes(&wire_episode(&codec)) {
        let mut framer = StreamFramer::new(Cursor::new(message), codec);
        framer.run(&cancel, |frame| {
            frames.push(frame);
            ControlFlow::Continue(())
        });
    }
    assert_eq!(frames.len(), 6);

    let mut log = EpisodeLog::new().with_label("approach");
    for frame in frames {
        let maneuver = if frame.speed < 15.0 {
            Maneuver::Accelerate
        } else {
            Maneuver::Decelerate
        };
        log.record(frame, Action::new(0.0, maneuver));
    }

    let evaluator = SafetyEvaluator::new(EvalConfig {
        max_speed: 12.0,
        ..EvalConfig::default()
    });
    let metrics = evaluator.finish_episode(&mut log).unwrap();

    // Ego reaches the pedestrian at tick 4 (x = 104, speed 9).
    assert_eq!(metrics.crashes, 1);
    assert_eq!(metrics.near_misses, 1);
    assert_eq!(metrics.max_impact_speed, 9.0);
    assert_eq!(metrics.time_taken, 6);
    // Accelerate below 12 at ticks 0, 1, 4, 5; decelerate while moving at tick 3.
    assert_eq!(metrics.accelerations, 5);
    assert!(log.is_empty());
    assert!(metrics.to_string().starts_with("approach: crashes=1"));
}

#[test]
fn episode_file_round_trip() {
    let dir = std::env::temp_dir().join(format!("simbridge-eval-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("episode.json");

    let mut log = EpisodeLog::new().with_crossing_distance(2.5);
    log.record(
        TelemetryFrame::ego(10.0, 10.0, 0.0, 5.0).with_pedestrian(10.2, 10.0, 0.0),
        Action::new(0.25, Maneuver::Maintain),
    );
    log.save(&path).unwrap();

    let loaded = EpisodeLog::load(&path).unwrap();
    assert_eq!(loaded, log);
    let metrics = SafetyEvaluator::default().evaluate(&loaded).unwrap();
    assert_eq!(metrics.crashes, 1);
    assert!(metrics.to_string().starts_with("crossing distance 2.5"));

    let _ = std::fs::remove_dir_all(&dir);
}

fn split_envelopes(wire: &[u8]) -> Vec<Vec<u8>> {
    let text = String::from_utf8_lossy(wire);
    text.split_inclusive("</Message>")
        .map(|envelope| envelope.as_bytes().to_vec())
        .collect()
}
