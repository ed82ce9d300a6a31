//! Trace writer, reader, and replayer (spec §4.8): the JSONL persistence
//! format for a run's event stream.

use std::io::{BufRead, Write};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rt_domain::{AgentEvent, Error, Result, SCHEMA_VERSION};
use serde::{Deserialize, Serialize};

use crate::sink::Sink;

/// The first line of a trace file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceHeader {
    pub version: u32,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub app_version: String,
    pub environment: String,
}

/// A writable trace destination. [`std::fs::File`] flushes to the OS and
/// additionally fsyncs; an in-memory buffer (used by tests) only flushes.
pub trait TraceSink: Write + Send {
    fn sync(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl TraceSink for std::fs::File {
    fn sync(&mut self) -> std::io::Result<()> {
        self.sync_all()
    }
}

impl TraceSink for Vec<u8> {}

/// Writes a header line, then one compact JSON line per event. Each write
/// is flushed and fsynced (when the underlying sink supports it) before
/// returning.
pub struct TraceWriter<W: TraceSink> {
    writer: W,
    header: TraceHeader,
    header_written: bool,
    redactor: Option<Arc<dyn Fn(&mut AgentEvent) + Send + Sync>>,
}

impl<W: TraceSink> TraceWriter<W> {
    pub fn new(writer: W, run_id: impl Into<String>, app_version: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            writer,
            header: TraceHeader {
                version: SCHEMA_VERSION,
                run_id: run_id.into(),
                started_at: Utc::now(),
                app_version: app_version.into(),
                environment: environment.into(),
            },
            header_written: false,
            redactor: None,
        }
    }

    pub fn with_redactor(mut self, redactor: Arc<dyn Fn(&mut AgentEvent) + Send + Sync>) -> Self {
        self.redactor = Some(redactor);
        self
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    pub fn write_event(&mut self, event: &AgentEvent) -> Result<()> {
        if !self.header_written {
            let line = serde_json::to_string(&self.header)?;
            writeln!(self.writer, "{line}")?;
            self.header_written = true;
        }

        let mut event = event.clone();
        if let Some(redactor) = &self.redactor {
            redactor(&mut event);
        }
        let line = serde_json::to_string(&event)?;
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        self.writer.sync()?;
        Ok(())
    }
}

/// A [`Sink`] wrapping a [`TraceWriter`] behind a mutex, so it can sit in a
/// [`crate::sink::MultiSink`] alongside live consumers.
pub struct TraceWriterSink<W: TraceSink + Send> {
    writer: parking_lot::Mutex<TraceWriter<W>>,
}

impl<W: TraceSink + Send> TraceWriterSink<W> {
    pub fn new(writer: TraceWriter<W>) -> Self {
        Self {
            writer: parking_lot::Mutex::new(writer),
        }
    }
}

#[async_trait::async_trait]
impl<W: TraceSink + Send + 'static> Sink for TraceWriterSink<W> {
    async fn emit(&self, event: AgentEvent) {
        if let Err(err) = self.writer.lock().write_event(&event) {
            tracing::warn!(%err, "failed to append trace event");
        }
    }
}

/// Reads and validates a trace file's header, then yields events one line
/// at a time.
pub struct TraceReader<R: BufRead> {
    reader: R,
    header: TraceHeader,
}

impl<R: BufRead> TraceReader<R> {
    pub fn new(mut reader: R) -> Result<Self> {
        let mut line = String::new();
        reader.read_line(&mut line)?;
        if line.trim().is_empty() {
            return Err(Error::Other("empty trace file: missing header".into()));
        }
        let header: TraceHeader = serde_json::from_str(line.trim())?;
        if header.version != SCHEMA_VERSION {
            return Err(Error::Other(format!(
                "unsupported trace version: {}",
                header.version
            )));
        }
        Ok(Self { reader, header })
    }

    pub fn header(&self) -> &TraceHeader {
        &self.header
    }

    /// Reads the next event, or `None` at end-of-stream.
    pub fn next_event(&mut self) -> Result<Option<AgentEvent>> {
        let mut line = String::new();
        let bytes_read = self.reader.read_line(&mut line)?;
        if bytes_read == 0 || line.trim().is_empty() {
            return Ok(None);
        }
        let event: AgentEvent = serde_json::from_str(line.trim())?;
        Ok(Some(event))
    }
}

/// A range filter over event `sequence` values, inclusive on both ends.
#[derive(Debug, Clone, Copy)]
pub struct SequenceRange {
    pub from: u64,
    pub to: u64,
}

/// Replays a trace to a sink. `speed` scales inter-event delay by `1/speed`;
/// `0` replays as fast as possible.
pub struct Replayer {
    sink: Arc<dyn Sink>,
    speed: f64,
    range: Option<SequenceRange>,
}

#[derive(Debug, Clone, Default)]
pub struct ReplayReport {
    pub events_replayed: usize,
    pub valid: bool,
    pub errors: Vec<String>,
}

impl Replayer {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self {
            sink,
            speed: 0.0,
            range: None,
        }
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_range(mut self, range: SequenceRange) -> Self {
        self.range = Some(range);
        self
    }

    pub async fn replay<R: BufRead>(&self, mut reader: TraceReader<R>) -> Result<ReplayReport> {
        let mut report = ReplayReport::default();
        let mut last_time: Option<DateTime<Utc>> = None;
        let mut last_sequence: Option<u64> = None;
        let mut first_type = None;
        let mut last_type = None;

        while let Some(event) = reader.next_event()? {
            if let Some(range) = self.range {
                if event.sequence < range.from || event.sequence > range.to {
                    continue;
                }
            }

            if let Some(prev) = last_sequence {
                if event.sequence <= prev {
                    report
                        .errors
                        .push(format!("sequence out of order: {prev} then {}", event.sequence));
                }
            }
            last_sequence = Some(event.sequence);
            if first_type.is_none() {
                first_type = Some(event.event_type);
            }
            last_type = Some(event.event_type);

            if self.speed > 0.0 {
                if let Some(prev_time) = last_time {
                    let delta = event.time - prev_time;
                    if delta.num_milliseconds() > 0 {
                        let scaled = (delta.num_milliseconds() as f64 / self.speed).max(0.0);
                        tokio::time::sleep(std::time::Duration::from_millis(scaled as u64)).await;
                    }
                }
            }
            last_time = Some(event.time);

            report.events_replayed += 1;
            self.sink.emit(event).await;
        }

        if first_type != Some(rt_domain::EventType::RunStarted) {
            report.errors.push("first event is not run.started".to_string());
        }
        if !matches!(
            last_type,
            Some(rt_domain::EventType::RunFinished) | Some(rt_domain::EventType::RunError)
        ) {
            report
                .errors
                .push("last event is not run.finished or run.error".to_string());
        }

        report.valid = report.errors.is_empty();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ChannelSink;
    use rt_domain::EventType;
    use std::io::Cursor;

    fn event(event_type: EventType, sequence: u64) -> AgentEvent {
        AgentEvent {
            version: SCHEMA_VERSION,
            event_type,
            time: Utc::now(),
            sequence,
            run_id: "r".into(),
            turn_index: 0,
            iter_index: 0,
            payload: None,
        }
    }

    #[test]
    fn writer_then_reader_round_trips_header_and_events() {
        let mut writer = TraceWriter::new(Vec::new(), "run-1", "0.1.0", "test");
        writer.write_event(&event(EventType::RunStarted, 0)).unwrap();
        writer.write_event(&event(EventType::RunFinished, 1)).unwrap();

        let bytes = writer.into_inner();
        let reader = TraceReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.header().run_id, "run-1");
    }

    #[test]
    fn reader_rejects_unsupported_version() {
        let mut bytes = Vec::new();
        let header = TraceHeader {
            version: SCHEMA_VERSION + 1,
            run_id: "r".into(),
            started_at: Utc::now(),
            app_version: "x".into(),
            environment: "test".into(),
        };
        writeln!(bytes, "{}", serde_json::to_string(&header).unwrap()).unwrap();
        let result = TraceReader::new(Cursor::new(bytes));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn replay_validates_structure_and_forwards_to_sink() {
        let mut writer = TraceWriter::new(Vec::new(), "run-1", "0.1.0", "test");
        writer.write_event(&event(EventType::RunStarted, 0)).unwrap();
        writer.write_event(&event(EventType::IterStarted, 1)).unwrap();
        writer.write_event(&event(EventType::RunFinished, 2)).unwrap();
        let bytes = writer.into_inner();
        let (sink, mut rx) = ChannelSink::new(16);
        let replayer = Replayer::new(Arc::new(sink)).with_speed(0.0);
        let reader = TraceReader::new(Cursor::new(bytes)).unwrap();
        let report = replayer.replay(reader).await.unwrap();
        assert!(report.valid, "errors: {:?}", report.errors);
        assert_eq!(report.events_replayed, 3);
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn replay_flags_out_of_order_sequence() {
        let mut writer = TraceWriter::new(Vec::new(), "run-1", "0.1.0", "test");
        writer.write_event(&event(EventType::RunStarted, 0)).unwrap();
        writer.write_event(&event(EventType::IterStarted, 5)).unwrap();
        writer.write_event(&event(EventType::RunFinished, 2)).unwrap();
        let bytes = writer.into_inner();
        let (sink, _rx) = ChannelSink::new(16);
        let replayer = Replayer::new(Arc::new(sink));
        let reader = TraceReader::new(Cursor::new(bytes)).unwrap();
        let report = replayer.replay(reader).await.unwrap();
        assert!(!report.valid);
    }
}
