//! Bounded in-memory access logs, one ring per listener.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

const DEFAULT_MAX_LINES: usize = 500;

/// A bounded ring of recent log lines.
#[derive(Debug)]
pub struct LogBuffer {
    inner: Mutex<VecDeque<String>>,
    max: usize,
}

impl LogBuffer {
    /// A buffer keeping at most `max` lines (500 when zero).
    pub fn new(max: usize) -> Self {
        let max = if max == 0 { DEFAULT_MAX_LINES } else { max };
        Self {
            inner: Mutex::new(VecDeque::with_capacity(max)),
            max,
        }
    }

    /// Append a line, dropping the oldest when full.
    pub fn add(&self, line: impl Into<String>) {
        let line = line.into();
        if line.is_empty() {
            return;
        }
        let mut lines = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() >= self.max {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// The newest `tail` lines in order; 0 returns everything.
    pub fn lines(&self, tail: usize) -> Vec<String> {
        let lines = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let skip = if tail == 0 || tail >= lines.len() {
            0
        } else {
            lines.len() - tail
        };
        lines.iter().skip(skip).cloned().collect()
    }
}

/// Access-log rings for the three listeners.
#[derive(Debug, Clone)]
pub struct AccessLogs {
    /// Admin listener requests.
    pub api: Arc<LogBuffer>,
    /// UI listener requests.
    pub ui: Arc<LogBuffer>,
    /// Webhook listener requests.
    pub webhook: Arc<LogBuffer>,
}

impl AccessLogs {
    /// Buffers keeping `max` lines each.
    pub fn new(max: usize) -> Self {
        Self {
            api: Arc::new(LogBuffer::new(max)),
            ui: Arc::new(LogBuffer::new(max)),
            webhook: Arc::new(LogBuffer::new(max)),
        }
    }

    /// The buffer behind a `/logs?service=` channel name, if any.
    pub fn get(&self, name: &str) -> Option<&Arc<LogBuffer>> {
        match name {
            "api" => Some(&self.api),
            "ui" => Some(&self.ui),
            "webhook" => Some(&self.webhook),
            _ => None,
        }
    }
}

impl Default for AccessLogs {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINES)
    }
}
