//! Record emission.
//!
//! The sync engine emits through the [`RecordSink`] trait so downstream
//! transport stays swappable: production runs write Singer-format JSON
//! lines to stdout, tests collect into memory.

use anyhow::Result;
use async_trait::async_trait;
use std::io::Write;
use std::sync::Mutex;

use crate::normalize::Record;
use crate::state::State;

/// Downstream consumer of emitted records and state checkpoints.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Emits one normalized record for `stream`.
    async fn emit_record(&self, stream: &str, record: &Record) -> Result<()>;

    /// Emits a state checkpoint.
    async fn emit_state(&self, state: &State) -> Result<()>;
}

/// Writes Singer `RECORD` / `STATE` messages as JSON lines on stdout.
#[derive(Default)]
pub struct SingerSink {
    // Serializes writers so concurrent streams never interleave a line.
    stdout: Mutex<()>,
}

impl SingerSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_line(&self, line: String) -> Result<()> {
        let _guard = self.stdout.lock().expect("stdout lock poisoned");
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        writeln!(handle, "{}", line)?;
        Ok(())
    }
}

#[async_trait]
impl RecordSink for SingerSink {
    async fn emit_record(&self, stream: &str, record: &Record) -> Result<()> {
        let message = serde_json::json!({
            "type": "RECORD",
            "stream": stream,
            "record": record,
        });
        self.write_line(serde_json::to_string(&message)?)
    }

    async fn emit_state(&self, state: &State) -> Result<()> {
        let message = serde_json::json!({
            "type": "STATE",
            "value": state,
        });
        self.write_line(serde_json::to_string(&message)?)
    }
}

/// In-memory sink for tests.
#[derive(Default)]
pub struct MemorySink {
    pub records: Mutex<Vec<(String, Record)>>,
    pub states: Mutex<Vec<State>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records emitted so far for `stream`.
    pub fn records_for(&self, stream: &str) -> Vec<Record> {
        self.records
            .lock()
            .expect("records lock poisoned")
            .iter()
            .filter(|(s, _)| s == stream)
            .map(|(_, r)| r.clone())
            .collect()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn emit_record(&self, stream: &str, record: &Record) -> Result<()> {
        self.records
            .lock()
            .expect("records lock poisoned")
            .push((stream.to_string(), record.clone()));
        Ok(())
    }

    async fn emit_state(&self, state: &State) -> Result<()> {
        self.states
            .lock()
            .expect("states lock poisoned")
            .push(state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_sink_collects_by_stream() {
        let sink = MemorySink::new();
        let mut record = Record::new();
        record.insert("Id".to_string(), serde_json::Value::String("1".to_string()));

        sink.emit_record("Invoice", &record).await.unwrap();
        sink.emit_record("Customer", &record).await.unwrap();

        assert_eq!(sink.records_for("Invoice").len(), 1);
        assert_eq!(sink.records_for("Customer").len(), 1);
        assert_eq!(sink.records_for("Bill").len(), 0);
    }

    #[test]
    fn record_message_shape() {
        let mut record = Record::new();
        record.insert("Id".to_string(), serde_json::Value::String("1".to_string()));
        let message = serde_json::json!({
            "type": "RECORD",
            "stream": "Invoice",
            "record": record,
        });
        let line = serde_json::to_string(&message).unwrap();
        assert!(line.contains(r#""type":"RECORD""#));
        assert!(line.contains(r#""stream":"Invoice""#));
    }
}
