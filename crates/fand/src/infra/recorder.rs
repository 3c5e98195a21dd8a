//! JSONL record of what the loop did, one line per event.

use fan_core::{TelemetrySink, TickRecord};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordEventType {
    SystemStart,
    Tick,
    FailSafeEngaged,
    FailSafeCleared,
    SystemShutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordEntry {
    /// Monotonic timestamp in microseconds
    pub timestamp_us: u64,
    /// Wall-clock Unix timestamp in microseconds
    pub unix_us: u64,
    pub event_type: RecordEventType,
    pub details: serde_json::Value,
}

/// Appends to a JSONL file. Clones share the file; each clone used as a
/// sink tracks fail-safe transitions on its own.
#[derive(Clone)]
pub struct TickRecorder {
    writer: Arc<Mutex<BufWriter<File>>>,
    fail_safe: bool,
}

impl TickRecorder {
    /// Opens `path` in append mode, creating parent directories.
    pub fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Arc::new(Mutex::new(BufWriter::with_capacity(8192, file))),
            fail_safe: false,
        })
    }

    pub fn log(&self, entry: &RecordEntry) -> io::Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| io::Error::other("recorder lock poisoned"))?;
        serde_json::to_writer(&mut *writer, entry)?;
        writer.write_all(b"\n")?;
        writer.flush()
    }

    pub fn log_event(
        &self,
        timestamp_us: u64,
        unix_us: u64,
        event_type: RecordEventType,
        details: serde_json::Value,
    ) -> io::Result<()> {
        self.log(&RecordEntry {
            timestamp_us,
            unix_us,
            event_type,
            details,
        })
    }

    fn write_tick(&mut self, tick: &TickRecord) -> io::Result<()> {
        if tick.fail_safe != self.fail_safe {
            self.fail_safe = tick.fail_safe;
            let event = if tick.fail_safe {
                RecordEventType::FailSafeEngaged
            } else {
                RecordEventType::FailSafeCleared
            };
            self.log_event(
                tick.timestamp_us,
                tick.unix_us,
                event,
                serde_json::json!({
                    "tick": tick.tick,
                    "control_celsius": tick.control_celsius,
                    "applied_duty": tick.applied_duty,
                }),
            )?;
        }
        self.log_event(
            tick.timestamp_us,
            tick.unix_us,
            RecordEventType::Tick,
            serde_json::to_value(tick)?,
        )
    }
}

impl TelemetrySink for TickRecorder {
    fn record(&mut self, tick: &TickRecord) {
        if let Err(e) = self.write_tick(tick) {
            tracing::warn!(error = %e, tick = tick.tick, "failed to record tick");
        }
    }
}
