use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::AppConfig;
use crate::errors::AppResult;

/// Out-of-band sink for things the dashboard swallows: failed refreshes,
/// stale serves, query retries. Keeps a bounded ring of recent events and
/// optionally appends batches to a JSON lines file.
#[derive(Clone)]
pub struct TelemetryClient {
    enabled: Arc<AtomicBool>,
    pending: Arc<Mutex<Vec<TelemetryEvent>>>,
    recent: Arc<Mutex<VecDeque<TelemetryEvent>>>,
    buffer_path: Option<PathBuf>,
    batch_size: usize,
    recent_capacity: usize,
}

impl TelemetryClient {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        if let Some(path) = &config.telemetry_buffer_path {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            OpenOptions::new().create(true).append(true).open(path)?;
        }

        Ok(Self {
            enabled: Arc::new(AtomicBool::new(config.telemetry_enabled)),
            pending: Arc::new(Mutex::new(Vec::new())),
            recent: Arc::new(Mutex::new(VecDeque::new())),
            buffer_path: config.telemetry_buffer_path.clone(),
            batch_size: config.telemetry_batch_size.max(1),
            recent_capacity: config.telemetry_recent_capacity,
        })
    }

    /// Memory-only client, no file sink.
    pub fn in_memory() -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(true)),
            pending: Arc::new(Mutex::new(Vec::new())),
            recent: Arc::new(Mutex::new(VecDeque::new())),
            buffer_path: None,
            batch_size: 25,
            recent_capacity: 200,
        }
    }

    pub fn record(&self, name: impl Into<String>, payload: serde_json::Value) -> AppResult<()> {
        if !self.enabled.load(Ordering::Relaxed) {
            return Ok(());
        }

        let event = TelemetryEvent::new(name.into(), payload);
        self.remember(event.clone());

        if self.buffer_path.is_none() {
            return Ok(());
        }
        let mut pending = self.pending.lock();
        pending.push(event);
        if pending.len() >= self.batch_size {
            self.persist_locked(&mut pending)?;
        }
        Ok(())
    }

    pub fn flush(&self) -> AppResult<()> {
        let mut pending = self.pending.lock();
        self.persist_locked(&mut pending)
    }

    pub fn pending_depth(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn recent_events(&self) -> Vec<TelemetryEvent> {
        self.recent.lock().iter().cloned().collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.recent.lock().iter().filter(|e| e.name == name).count()
    }

    pub fn buffer_path(&self) -> Option<&Path> {
        self.buffer_path.as_deref()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn remember(&self, event: TelemetryEvent) {
        if self.recent_capacity == 0 {
            return;
        }
        let mut recent = self.recent.lock();
        while recent.len() >= self.recent_capacity {
            recent.pop_front();
        }
        recent.push_back(event);
    }

    fn persist_locked(&self, pending: &mut Vec<TelemetryEvent>) -> AppResult<()> {
        let Some(path) = &self.buffer_path else {
            pending.clear();
            return Ok(());
        };
        if pending.is_empty() {
            return Ok(());
        }

        let mut lines = Vec::new();
        for event in pending.iter() {
            serde_json::to_writer(&mut lines, event)?;
            lines.push(b'\n');
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(&lines)?;
        file.flush()?;
        pending.clear();
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl TelemetryEvent {
    fn new(name: String, payload: serde_json::Value) -> Self {
        Self {
            name,
            timestamp: Utc::now(),
            payload,
        }
    }
}
