use crate::events::{Event, EventLog};
use crate::types::RunId;
use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

const LOG_SUFFIX: &str = ".jsonl.gz";

/// Event log stored as one gzip-compressed JSONL file per run
pub struct JsonlEventLog {
    base_path: PathBuf,
    // Events not yet written, keyed by run
    buffer: RwLock<HashMap<RunId, Vec<Event>>>,
}

impl JsonlEventLog {
    pub fn new(base_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&base_path)
            .context("Failed to create event log directory")?;
        Ok(Self {
            base_path,
            buffer: RwLock::new(HashMap::new()),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Format: <base>/<run_id>.jsonl.gz
    fn event_log_path(&self, run_id: &RunId) -> PathBuf {
        self.base_path.join(format!("{}{}", run_id, LOG_SUFFIX))
    }

    /// Flush buffered events for a run to disk
    pub async fn flush(&self, run_id: &RunId) -> Result<()> {
        let events = match self.buffer.write().await.remove(run_id) {
            Some(events) if !events.is_empty() => events,
            _ => return Ok(()),
        };

        let path = self.event_log_path(run_id);

        // Read existing events if file exists
        let mut all_events = if path.exists() {
            self.read_jsonl_gz(&path)?
        } else {
            Vec::new()
        };

        all_events.extend(events);

        self.write_jsonl_gz(&path, &all_events).await
    }

    /// Read JSONL.GZ file
    fn read_jsonl_gz(&self, path: &Path) -> Result<Vec<Event>> {
        use flate2::read::GzDecoder;
        use std::io::BufRead;

        let file = std::fs::File::open(path).context("Failed to open event log")?;
        let decoder = GzDecoder::new(file);
        let reader = std::io::BufReader::new(decoder);

        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line.context("Failed to read line from event log")?;
            if line.is_empty() {
                continue;
            }
            let event: Event = serde_json::from_str(&line).context("Failed to parse event")?;
            events.push(event);
        }

        Ok(events)
    }

    /// Write JSONL.GZ file
    async fn write_jsonl_gz(&self, path: &Path, events: &[Event]) -> Result<()> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());

        for event in events {
            let json = serde_json::to_string(event).context("Failed to serialize event")?;
            encoder
                .write_all(json.as_bytes())
                .context("Failed to write event")?;
            encoder.write_all(b"\n").context("Failed to write newline")?;
        }

        let compressed = encoder.finish().context("Failed to finish compression")?;

        tokio::fs::write(path, compressed)
            .await
            .context("Failed to write event log file")?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl EventLog for JsonlEventLog {
    async fn append(&self, event: Event) -> Result<()> {
        let run_id = event.run_id;
        let checkpoint = event.event_type.is_checkpoint();

        let pending = {
            let mut buffer = self.buffer.write().await;
            let events = buffer.entry(run_id).or_default();
            events.push(event);
            events.len()
        };

        // Flush on checkpoints or when the buffer gets large
        if checkpoint || pending > 100 {
            self.flush(&run_id).await?;
        }

        Ok(())
    }

    async fn get_run_events(&self, run_id: RunId) -> Result<Vec<Event>> {
        // Flush any buffered events first
        self.flush(&run_id).await?;

        let path = self.event_log_path(&run_id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let mut events = self.read_jsonl_gz(&path)?;
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    async fn list_runs(&self) -> Result<Vec<RunId>> {
        let mut runs: Vec<RunId> = self.buffer.read().await.keys().copied().collect();

        for entry in std::fs::read_dir(&self.base_path)
            .context("Failed to read event log directory")?
        {
            let entry = entry.context("Failed to read event log entry")?;
            let file_name = entry.file_name();
            let Some(stem) = file_name.to_str().and_then(|n| n.strip_suffix(LOG_SUFFIX)) else {
                continue;
            };
            if let Ok(run_id) = stem.parse::<RunId>() {
                if !runs.contains(&run_id) {
                    runs.push(run_id);
                }
            }
        }

        Ok(runs)
    }
}
