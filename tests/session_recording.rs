use std::sync::Arc;

use rkick::config::{DeviceIdentity, LineSettings};
use rkick::external::LogMetrics;
use rkick::products::kp::Kp;
use rkick::products::kp::topology::{FIREOS, FXOS};
use rkick::session::{
    Line, NormalizeOptions, SessionEvent, SessionRecordLevel, SessionRecorder,
};
use rkick::stream::ScriptedStream;

const OUT_OF_ORDER: &str = r#"{"ts_ms":3,"event":{"kind":"command_output","command":"show version","state":"fireos","success":true,"content":"Version 6.2.1","all":"show version\nVersion 6.2.1\n> "}}
{"ts_ms":1,"event":{"kind":"state_detected","state":"fxos","prompt":"kp-2110# "}}
{"ts_ms":2,"event":{"kind":"raw_chunk","data":"junk"}}
{"ts_ms":2,"event":{"kind":"state_changed","from":"fxos","to":"fireos","command":"connect ftd"}}
"#;

async fn recorded_session(level: SessionRecordLevel) -> SessionRecorder {
    let kp = Kp::new(DeviceIdentity::new("kp-2110"), Arc::new(LogMetrics)).expect("kp");
    let stream = ScriptedStream::new()
        .on("", "\r\nkp-2110# ")
        .on("connect ftd", "\r\n> ")
        .on("show version", "Version 6.2.1 (Build 1088)\r\n> ")
        .on("connect fxos", "\r\nkp-2110# ");
    let recorder = SessionRecorder::new(level);
    let mut line = Line::new(
        stream,
        Arc::clone(kp.topology()),
        kp.context(),
        LineSettings::default(),
    )
    .with_recorder(recorder.clone());

    line.go_to(FIREOS).await.expect("fxos -> fireos");
    line.execute("show version").await.expect("show version");
    line.go_to(FXOS).await.expect("fireos -> fxos");
    line.close("done").await.expect("close");
    recorder
}

#[tokio::test(start_paused = true)]
async fn key_events_follow_the_session() {
    let recorder = recorded_session(SessionRecordLevel::KeyEventsOnly).await;
    let entries = recorder.entries().expect("entries");

    let kinds = entries
        .iter()
        .map(|entry| match &entry.event {
            SessionEvent::StateDetected { state, .. } => format!("detected {state}"),
            SessionEvent::StateChanged { to, .. } => format!("changed {to}"),
            SessionEvent::CommandOutput { command, .. } => format!("output {command}"),
            SessionEvent::DialogMatched { pattern, .. } => format!("matched {pattern}"),
            SessionEvent::RawChunk { .. } => "raw".to_string(),
            SessionEvent::ConnectionClosed { .. } => "closed".to_string(),
        })
        .filter(|kind| !kind.starts_with("matched"))
        .collect::<Vec<_>>();
    assert_eq!(
        kinds,
        vec![
            "detected fxos",
            "changed fireos",
            "output show version",
            "changed fxos",
            "closed"
        ]
    );
    assert_eq!(
        recorder.commands().expect("commands"),
        vec!["show version".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn full_recording_normalises_to_key_events() {
    let recorder = recorded_session(SessionRecordLevel::Full).await;
    let jsonl = recorder.to_jsonl().expect("jsonl");
    assert!(jsonl.contains(r#""kind":"raw_chunk""#));

    let normalized =
        SessionRecorder::normalize_jsonl(&jsonl, NormalizeOptions::default()).expect("normalize");
    assert!(!normalized.contains(r#""kind":"raw_chunk""#));
    assert!(!normalized.contains(r#""kind":"dialog_matched""#));

    let restored = SessionRecorder::from_jsonl(&normalized).expect("restore");
    assert_eq!(
        restored.commands().expect("commands"),
        recorder.commands().expect("commands")
    );
}

#[test]
fn fixture_events_are_sorted_and_filtered() {
    let normalized = SessionRecorder::normalize_jsonl(OUT_OF_ORDER, NormalizeOptions::default())
        .expect("normalize");
    let restored = SessionRecorder::from_jsonl(&normalized).expect("restore");
    let entries = restored.entries().expect("entries");

    assert_eq!(entries.len(), 3);
    assert_eq!(
        entries.iter().map(|entry| entry.ts_ms).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(matches!(
        &entries[1].event,
        SessionEvent::StateChanged { from: Some(from), to, .. } if from == "fxos" && to == "fireos"
    ));
}

#[test]
fn state_changes_can_be_dropped_too() {
    let normalized = SessionRecorder::normalize_jsonl(
        OUT_OF_ORDER,
        NormalizeOptions {
            keep_state_changed: false,
            ..NormalizeOptions::default()
        },
    )
    .expect("normalize");
    assert_eq!(normalized.lines().count(), 2);
}
