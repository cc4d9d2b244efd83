use std::collections::VecDeque;

use parking_lot::RwLock;

/// Thread-safe bounded ring buffer of raw log lines.
///
/// Oldest lines are evicted first once the capacity is reached. Used by each
/// stream session to replay recent history to late subscribers and to the
/// presentation surface on unmute.
pub struct LineRing {
    lines: RwLock<VecDeque<String>>,
    capacity: usize,
}

impl LineRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Push a line, evicting the oldest if at capacity
    pub fn push(&self, line: String) {
        let mut lines = self.lines.write();
        if lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Get the last N lines (all of them if fewer are buffered)
    pub fn tail(&self, n: usize) -> Vec<String> {
        let lines = self.lines.read();
        let start = lines.len().saturating_sub(n);
        lines.iter().skip(start).cloned().collect()
    }

    /// Get all buffered lines
    pub fn all(&self) -> Vec<String> {
        self.lines.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
