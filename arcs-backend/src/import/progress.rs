//! Progress reporting
//!
//! The import worker updates an [`ImportMonitor`]; the response body is a
//! stream that samples the monitor once per interval and writes a progress
//! frame, until the worker hands over the outcome through a oneshot channel.
//! The outcome frame is always the last frame of the stream.

use bytes::Bytes;
use futures::Stream;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error};
use uuid::Uuid;

use super::outcome::{CreatedRecords, ImportOutcome, PersistedRecord};

/// What the worker is currently doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportPhase {
    Spooling,
    Importing,
    Retrying,
    Finishing,
}

impl ImportPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ImportPhase::Spooling,
            1 => ImportPhase::Importing,
            2 => ImportPhase::Retrying,
            _ => ImportPhase::Finishing,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ImportPhase::Spooling => 0,
            ImportPhase::Importing => 1,
            ImportPhase::Retrying => 2,
            ImportPhase::Finishing => 3,
        }
    }
}

/// Live status shared between the worker (writer) and the ticker (reader)
#[derive(Debug)]
pub struct ImportMonitor {
    phase: AtomicU8,
    attempt: AtomicU32,
    bytes_spooled: AtomicU64,
    records_processed: AtomicUsize,
}

/// Point-in-time copy of an [`ImportMonitor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub phase: ImportPhase,
    pub attempt: u32,
    pub bytes_spooled: u64,
    /// Records persisted by the current attempt
    pub records_processed: usize,
}

impl Default for ImportMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportMonitor {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(ImportPhase::Spooling.as_u8()),
            attempt: AtomicU32::new(0),
            bytes_spooled: AtomicU64::new(0),
            records_processed: AtomicUsize::new(0),
        }
    }

    pub fn set_phase(&self, phase: ImportPhase) {
        self.phase.store(phase.as_u8(), Ordering::Relaxed);
    }

    /// Start a new attempt; per-attempt counters reset
    pub fn begin_attempt(&self, attempt: u32) {
        self.attempt.store(attempt, Ordering::Relaxed);
        self.records_processed.store(0, Ordering::Relaxed);
        self.set_phase(ImportPhase::Importing);
    }

    pub fn add_spooled(&self, bytes: u64) {
        self.bytes_spooled.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_processed(&self) {
        self.records_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            phase: ImportPhase::from_u8(self.phase.load(Ordering::Relaxed)),
            attempt: self.attempt.load(Ordering::Relaxed),
            bytes_spooled: self.bytes_spooled.load(Ordering::Relaxed),
            records_processed: self.records_processed.load(Ordering::Relaxed),
        }
    }
}

/// One line of the response body
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame<'a> {
    Progress {
        import_id: Uuid,
        ticks: u64,
        phase: ImportPhase,
        attempt: u32,
        bytes_spooled: u64,
        records_processed: usize,
    },
    Outcome {
        import_id: Uuid,
        saved: &'a CreatedRecords,
        #[serde(skip_serializing_if = "Option::is_none")]
        errors: Option<&'a Vec<String>>,
    },
}

impl<'a> Frame<'a> {
    pub fn progress(import_id: Uuid, ticks: u64, snapshot: ProgressSnapshot) -> Self {
        Frame::Progress {
            import_id,
            ticks,
            phase: snapshot.phase,
            attempt: snapshot.attempt,
            bytes_spooled: snapshot.bytes_spooled,
            records_processed: snapshot.records_processed,
        }
    }

    pub fn outcome(import_id: Uuid, outcome: &'a ImportOutcome) -> Self {
        Frame::Outcome {
            import_id,
            saved: &outcome.saved,
            errors: outcome.errors.as_ref(),
        }
    }

    /// Newline-terminated JSON
    pub fn to_line(&self) -> serde_json::Result<Bytes> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(Bytes::from(line))
    }
}

/// Frame stream for one import.
///
/// Yields a progress frame every `interval` until `outcome_rx` resolves, then
/// the outcome frame, then ends. If the worker goes away without sending an
/// outcome, a failure outcome is written instead.
pub fn progress_stream(
    import_id: Uuid,
    monitor: Arc<ImportMonitor>,
    interval: Duration,
    outcome_rx: oneshot::Receiver<ImportOutcome>,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    async_stream::stream! {
        let mut outcome_rx = outcome_rx;
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = 0u64;

        let outcome = loop {
            tokio::select! {
                biased;

                result = &mut outcome_rx => {
                    break match result {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            error!(import_id = %import_id, "Import worker ended without an outcome");
                            ImportOutcome::from_message(
                                CreatedRecords::new(),
                                "import worker terminated unexpectedly",
                            )
                        }
                    };
                }

                _ = ticker.tick() => {
                    ticks += 1;
                    let frame = Frame::progress(import_id, ticks, monitor.snapshot());
                    match frame.to_line() {
                        Ok(line) => {
                            debug!(import_id = %import_id, ticks, "Progress frame");
                            yield Ok(line);
                        }
                        Err(e) => error!(import_id = %import_id, error = %e, "Failed to encode progress frame"),
                    }
                }
            }
        };

        match Frame::outcome(import_id, &outcome).to_line() {
            Ok(line) => yield Ok(line),
            Err(e) => {
                error!(import_id = %import_id, error = %e, "Failed to encode outcome frame");
                let fallback = ImportOutcome::from_message(CreatedRecords::new(), "failed to encode import outcome");
                let line = Frame::outcome(import_id, &fallback)
                    .to_line()
                    .unwrap_or_else(|_| Bytes::from_static(b"{\"kind\":\"outcome\"}\n"));
                yield Ok(line);
            }
        }
    }
}

/// Parsed frame, for clients and tests reading the stream back
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReceivedFrame {
    Progress {
        import_id: Uuid,
        ticks: u64,
        attempt: u32,
        records_processed: usize,
        bytes_spooled: u64,
    },
    Outcome {
        import_id: Uuid,
        saved: serde_json::Map<String, serde_json::Value>,
        #[serde(default)]
        errors: Option<Vec<String>>,
    },
}

impl ReceivedFrame {
    /// Parse a newline-delimited frame body
    pub fn parse_all(body: &[u8]) -> serde_json::Result<Vec<ReceivedFrame>> {
        body.split(|b| *b == b'\n')
            .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
            .map(serde_json::from_slice)
            .collect()
    }

    pub fn is_outcome(&self) -> bool {
        matches!(self, ReceivedFrame::Outcome { .. })
    }

    /// Saved mapping of an outcome frame as `logical id → (uri, id)`
    pub fn saved_records(&self) -> Option<Vec<(String, PersistedRecord)>> {
        let ReceivedFrame::Outcome { saved, .. } = self else {
            return None;
        };
        saved
            .iter()
            .map(|(logical, value)| {
                let pair = value.as_array()?;
                Some((
                    logical.clone(),
                    PersistedRecord {
                        uri: pair.first()?.as_str()?.to_string(),
                        id: pair.get(1)?.as_i64()?,
                    },
                ))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn parse(chunks: Vec<Bytes>) -> Vec<ReceivedFrame> {
        let body: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        ReceivedFrame::parse_all(&body).unwrap()
    }

    #[tokio::test]
    async fn test_heartbeats_precede_single_outcome() {
        let monitor = Arc::new(ImportMonitor::new());
        let (tx, rx) = oneshot::channel();
        let import_id = Uuid::new_v4();

        let worker_monitor = monitor.clone();
        tokio::spawn(async move {
            worker_monitor.begin_attempt(1);
            worker_monitor.record_processed();
            tokio::time::sleep(Duration::from_millis(120)).await;
            let _ = tx.send(ImportOutcome::success(CreatedRecords::new()));
        });

        let chunks: Vec<Bytes> = progress_stream(import_id, monitor, Duration::from_millis(20), rx)
            .map(|item| item.unwrap())
            .collect()
            .await;
        let frames = parse(chunks);

        assert!(frames.len() >= 2, "expected heartbeats, got {:?}", frames);
        assert_eq!(frames.iter().filter(|f| f.is_outcome()).count(), 1);
        assert!(frames.last().unwrap().is_outcome());

        match &frames[0] {
            ReceivedFrame::Progress {
                import_id: id,
                ticks,
                attempt,
                records_processed,
                ..
            } => {
                assert_eq!(*id, import_id);
                assert_eq!(*ticks, 1);
                assert_eq!(*attempt, 1);
                assert_eq!(*records_processed, 1);
            }
            other => panic!("expected progress frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_immediate_outcome_has_no_heartbeat() {
        let monitor = Arc::new(ImportMonitor::new());
        let (tx, rx) = oneshot::channel();
        tx.send(ImportOutcome::success(CreatedRecords::new())).unwrap();

        let chunks: Vec<Bytes> =
            progress_stream(Uuid::new_v4(), monitor, Duration::from_secs(1), rx)
                .map(|item| item.unwrap())
                .collect()
                .await;
        let frames = parse(chunks);

        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_outcome());
    }

    #[tokio::test]
    async fn test_dropped_worker_still_yields_outcome() {
        let monitor = Arc::new(ImportMonitor::new());
        let (tx, rx) = oneshot::channel::<ImportOutcome>();
        drop(tx);

        let chunks: Vec<Bytes> =
            progress_stream(Uuid::new_v4(), monitor, Duration::from_secs(1), rx)
                .map(|item| item.unwrap())
                .collect()
                .await;
        let frames = parse(chunks);

        assert_eq!(frames.len(), 1);
        match &frames[0] {
            ReceivedFrame::Outcome { errors, saved, .. } => {
                assert!(saved.is_empty());
                assert!(errors.as_ref().unwrap()[0].starts_with("Server error:"));
            }
            other => panic!("expected outcome, got {:?}", other),
        }
    }

    #[test]
    fn test_monitor_resets_per_attempt() {
        let monitor = ImportMonitor::new();
        monitor.add_spooled(4096);
        monitor.begin_attempt(1);
        monitor.record_processed();
        monitor.record_processed();
        monitor.set_phase(ImportPhase::Retrying);
        monitor.begin_attempt(2);

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.attempt, 2);
        assert_eq!(snapshot.records_processed, 0);
        assert_eq!(snapshot.bytes_spooled, 4096);
        assert_eq!(snapshot.phase, ImportPhase::Importing);
    }

    #[test]
    fn test_outcome_frame_encoding() {
        let mut saved = CreatedRecords::new();
        saved.insert(
            "a".into(),
            PersistedRecord {
                uri: "/repositories/2/archival_objects/1".into(),
                id: 1,
            },
        );
        let outcome = ImportOutcome::success(saved);
        let import_id = Uuid::nil();

        let line = Frame::outcome(import_id, &outcome).to_line().unwrap();
        assert_eq!(
            std::str::from_utf8(&line).unwrap(),
            "{\"kind\":\"outcome\",\"import_id\":\"00000000-0000-0000-0000-000000000000\",\
             \"saved\":{\"a\":[\"/repositories/2/archival_objects/1\",1]}}\n"
        );

        let frames = ReceivedFrame::parse_all(&line).unwrap();
        assert_eq!(
            frames[0].saved_records().unwrap(),
            vec![(
                "a".to_string(),
                PersistedRecord {
                    uri: "/repositories/2/archival_objects/1".into(),
                    id: 1
                }
            )]
        );
    }
}
