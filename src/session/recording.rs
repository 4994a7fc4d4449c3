use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ConsoleError;

/// Session recording granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub enum SessionRecordLevel {
    /// Disable recording.
    Off,
    /// Record key events only.
    KeyEventsOnly,
    /// Record key events and raw console chunks.
    #[default]
    Full,
}

/// A single recorded session event.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionRecordEntry {
    pub ts_ms: u128,
    pub event: SessionEvent,
}

/// Options for normalizing JSONL recordings into stable fixtures.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    /// Keep raw console chunk events.
    pub keep_raw_chunks: bool,
    /// Keep dialog-matched events.
    pub keep_dialog_matches: bool,
    /// Keep state-changed events.
    pub keep_state_changed: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            keep_raw_chunks: false,
            keep_dialog_matches: false,
            keep_state_changed: true,
        }
    }
}

/// Supported recorded event types.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Detection matched a state prompt.
    StateDetected { state: String, prompt: String },
    /// One path of a transition completed.
    StateChanged {
        #[serde(default)]
        from: Option<String>,
        to: String,
        command: String,
    },
    CommandOutput {
        command: String,
        state: String,
        success: bool,
        content: String,
        all: String,
    },
    DialogMatched { pattern: String, matched: String },
    RawChunk { data: String },
    ConnectionClosed {
        reason: String,
        #[serde(default)]
        state_before: Option<String>,
    },
}

/// In-memory session recorder.
///
/// Clones share the same entries, so a line and its caller can both hold one.
#[derive(Debug, Clone)]
pub struct SessionRecorder {
    level: SessionRecordLevel,
    entries: Arc<Mutex<Vec<SessionRecordEntry>>>,
}

impl SessionRecorder {
    /// Create a recorder with the given level.
    pub fn new(level: SessionRecordLevel) -> Self {
        Self {
            level,
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn level(&self) -> SessionRecordLevel {
        self.level
    }

    /// Record a key-level event.
    pub fn record_event(&self, event: SessionEvent) -> Result<(), ConsoleError> {
        if self.level == SessionRecordLevel::Off {
            return Ok(());
        }
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| ConsoleError::Internal(format!("record lock error: {e}")))?;
        guard.push(SessionRecordEntry {
            ts_ms: now_ms(),
            event,
        });
        Ok(())
    }

    /// Record a raw console chunk when running at full level.
    pub fn record_raw_chunk(&self, data: String) -> Result<(), ConsoleError> {
        if self.level != SessionRecordLevel::Full {
            return Ok(());
        }
        self.record_event(SessionEvent::RawChunk { data })
    }

    /// Snapshot all records.
    pub fn entries(&self) -> Result<Vec<SessionRecordEntry>, ConsoleError> {
        let guard = self
            .entries
            .lock()
            .map_err(|e| ConsoleError::Internal(format!("record lock error: {e}")))?;
        Ok(guard.clone())
    }

    pub fn clear(&self) -> Result<(), ConsoleError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| ConsoleError::Internal(format!("record lock error: {e}")))?;
        guard.clear();
        Ok(())
    }

    /// Export records as JSONL.
    pub fn to_jsonl(&self) -> Result<String, ConsoleError> {
        let entries = self.entries()?;
        let mut lines = Vec::with_capacity(entries.len());
        for entry in entries {
            lines.push(serde_json::to_string(&entry)?);
        }
        Ok(lines.join("\n"))
    }

    /// Restore a recorder from JSONL lines.
    pub fn from_jsonl(jsonl: &str) -> Result<Self, ConsoleError> {
        let mut parsed = Vec::new();
        for line in jsonl.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: SessionRecordEntry = serde_json::from_str(line)?;
            parsed.push(entry);
        }

        Ok(Self {
            level: SessionRecordLevel::Full,
            entries: Arc::new(Mutex::new(parsed)),
        })
    }

    /// Commands in the order the session executed them.
    pub fn commands(&self) -> Result<Vec<String>, ConsoleError> {
        Ok(self
            .entries()?
            .into_iter()
            .filter_map(|entry| match entry.event {
                SessionEvent::CommandOutput { command, .. } => Some(command),
                _ => None,
            })
            .collect())
    }

    /// Normalize JSONL recording content into a stable fixture representation.
    ///
    /// Events are sorted by timestamp and noisy ones such as raw chunks can
    /// be filtered out.
    pub fn normalize_jsonl(jsonl: &str, options: NormalizeOptions) -> Result<String, ConsoleError> {
        let recorder = Self::from_jsonl(jsonl)?;
        let mut indexed = recorder
            .entries()?
            .into_iter()
            .enumerate()
            .collect::<Vec<(usize, SessionRecordEntry)>>();

        indexed
            .sort_by(|(idx_a, a), (idx_b, b)| a.ts_ms.cmp(&b.ts_ms).then_with(|| idx_a.cmp(idx_b)));

        let filtered = indexed
            .into_iter()
            .filter_map(|(_, entry)| match &entry.event {
                SessionEvent::RawChunk { .. } if !options.keep_raw_chunks => None,
                SessionEvent::DialogMatched { .. } if !options.keep_dialog_matches => None,
                SessionEvent::StateChanged { .. } if !options.keep_state_changed => None,
                _ => Some(entry),
            })
            .collect::<Vec<_>>();

        let normalized = SessionRecorder {
            level: SessionRecordLevel::Full,
            entries: Arc::new(Mutex::new(filtered)),
        };
        normalized.to_jsonl()
    }
}

impl Default for SessionRecorder {
    fn default() -> Self {
        Self::new(SessionRecordLevel::Full)
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOISY_FIXTURE: &str = r#"{"ts_ms":3,"event":{"kind":"raw_chunk","data":"chunk-2"}}
{"ts_ms":1,"event":{"kind":"state_detected","state":"fxos","prompt":"kp-2110# "}}
{"ts_ms":2,"event":{"kind":"dialog_matched","pattern":"password","matched":"Password: "}}
{"ts_ms":4,"event":{"kind":"state_changed","from":"fxos","to":"fireos","command":"connect ftd"}}
{"ts_ms":5,"event":{"kind":"command_output","command":"show version","state":"fireos","success":true,"content":"ok","all":"show version\nok\n> "}}
"#;

    #[test]
    fn recorder_jsonl_roundtrip() {
        let recorder = SessionRecorder::new(SessionRecordLevel::Full);
        recorder
            .record_event(SessionEvent::StateDetected {
                state: "rommon".to_string(),
                prompt: "rommon 1 > ".to_string(),
            })
            .expect("record detection");

        let jsonl = recorder.to_jsonl().expect("encode jsonl");
        let restored = SessionRecorder::from_jsonl(&jsonl).expect("decode jsonl");
        let entries = restored.entries().expect("entries");

        assert_eq!(entries.len(), 1);
        assert!(matches!(
            &entries[0].event,
            SessionEvent::StateDetected { state, .. } if state == "rommon"
        ));
    }

    #[test]
    fn key_events_only_skips_raw_chunks() {
        let recorder = SessionRecorder::new(SessionRecordLevel::KeyEventsOnly);

        recorder
            .record_raw_chunk("raw-console-data".to_string())
            .expect("record raw");
        recorder
            .record_event(SessionEvent::DialogMatched {
                pattern: "password".to_string(),
                matched: "Password: ".to_string(),
            })
            .expect("record match");

        let entries = recorder.entries().expect("entries");
        assert_eq!(entries.len(), 1);
        assert!(matches!(
            entries[0].event,
            SessionEvent::DialogMatched { .. }
        ));
    }

    #[test]
    fn off_level_records_nothing() {
        let recorder = SessionRecorder::new(SessionRecordLevel::Off);

        recorder
            .record_event(SessionEvent::ConnectionClosed {
                reason: "test".to_string(),
                state_before: None,
            })
            .expect("record close");
        recorder
            .record_raw_chunk("raw-console-data".to_string())
            .expect("record raw");

        assert!(recorder.entries().expect("entries").is_empty());
    }

    #[test]
    fn from_jsonl_accepts_empty_input() {
        let restored = SessionRecorder::from_jsonl("").expect("decode empty jsonl");
        assert!(restored.entries().expect("entries").is_empty());
    }

    #[test]
    fn from_jsonl_rejects_garbage() {
        let err = SessionRecorder::from_jsonl("{not json").expect_err("must fail");
        assert!(matches!(err, ConsoleError::Json(_)));
    }

    #[test]
    fn recorder_clear_removes_all_entries() {
        let recorder = SessionRecorder::default();
        recorder
            .record_event(SessionEvent::RawChunk {
                data: "x".to_string(),
            })
            .expect("record");
        recorder.clear().expect("clear");
        assert!(recorder.entries().expect("entries").is_empty());
    }

    #[test]
    fn commands_lists_executed_commands_in_order() {
        let restored = SessionRecorder::from_jsonl(NOISY_FIXTURE).expect("decode");
        assert_eq!(
            restored.commands().expect("commands"),
            vec!["show version".to_string()]
        );
    }

    #[test]
    fn normalize_jsonl_filters_noise_and_sorts_by_timestamp() {
        let normalized =
            SessionRecorder::normalize_jsonl(NOISY_FIXTURE, NormalizeOptions::default())
                .expect("normalize");
        let restored = SessionRecorder::from_jsonl(&normalized).expect("restore normalized");
        let entries = restored.entries().expect("entries");

        assert_eq!(entries.len(), 3);
        assert!(matches!(
            entries[0].event,
            SessionEvent::StateDetected { .. }
        ));
        assert!(matches!(
            entries[1].event,
            SessionEvent::StateChanged { .. }
        ));
        assert!(matches!(
            entries[2].event,
            SessionEvent::CommandOutput { .. }
        ));
        assert!(entries[0].ts_ms <= entries[1].ts_ms && entries[1].ts_ms <= entries[2].ts_ms);
    }

    #[test]
    fn normalize_jsonl_can_keep_all_event_types() {
        let options = NormalizeOptions {
            keep_raw_chunks: true,
            keep_dialog_matches: true,
            keep_state_changed: true,
        };
        let normalized =
            SessionRecorder::normalize_jsonl(NOISY_FIXTURE, options).expect("normalize");
        let restored = SessionRecorder::from_jsonl(&normalized).expect("restore normalized");
        assert_eq!(restored.entries().expect("entries").len(), 5);
    }
}
