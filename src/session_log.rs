/*
 * SPDX-FileCopyrightText: 2022 perillamint
 *
 * SPDX-License-Identifier: MPL-2.0
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Bounded transcript of what went over the link, for display to the user.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use crate::consts::SESSION_LOG_CAPACITY;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Tx,
    Rx,
    Error,
    Info,
}

impl LogKind {
    fn tag(&self) -> &'static str {
        match self {
            LogKind::Tx => "TX",
            LogKind::Rx => "RX",
            LogKind::Error => "ERR",
            LogKind::Info => "INFO",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: LogKind,
    pub text: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.tag(), self.text)
    }
}

/// Cheap to clone; every clone appends to and reads from the same ring.
#[derive(Clone)]
pub struct SessionLog {
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
    capacity: usize,
    events: broadcast::Sender<LogEntry>,
}

impl Default for SessionLog {
    fn default() -> Self {
        Self::with_capacity(SESSION_LOG_CAPACITY)
    }
}

impl SessionLog {
    pub fn with_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
            events,
        }
    }

    /// Outbound command. The line terminator is not part of the entry.
    pub fn tx(&self, command: &str) {
        self.push(LogKind::Tx, command.trim_end_matches(&['\r', '\n'][..]));
    }

    pub fn rx(&self, line: &str) {
        self.push(LogKind::Rx, line);
    }

    pub fn error(&self, message: &str) {
        self.push(LogKind::Error, message);
    }

    pub fn info(&self, message: &str) {
        self.push(LogKind::Info, message);
    }

    fn push(&self, kind: LogKind, text: &str) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            kind,
            text: text.to_string(),
        };

        // A poisoned lock only means a panicking writer; the ring itself is intact.
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.capacity > 0 {
            while entries.len() >= self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry.clone());
        }
        drop(entries);

        // Nobody listening is fine.
        let _ = self.events.send(entry);
    }

    /// Oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    /// Live feed of new entries. Slow receivers lag rather than block writers.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn oldest_entries_are_evicted() {
        let log = SessionLog::default();
        for i in 0..60 {
            log.tx(&format!("CMD{}\n", i));
        }
        let entries = log.entries();
        assert_eq!(entries.len(), SESSION_LOG_CAPACITY);
        assert_eq!(entries[0].text, "CMD10");
        assert_eq!(entries[49].to_string(), "TX: CMD59");
    }

    #[test]
    fn entries_are_tagged() {
        let log = SessionLog::default();
        log.tx("M,0.50,-0.20\n");
        log.rx("OK");
        log.error("Write failed: gone");
        let rendered: Vec<String> = log.entries().iter().map(|e| e.to_string()).collect();
        assert_eq!(
            rendered,
            vec!["TX: M,0.50,-0.20", "RX: OK", "ERR: Write failed: gone"]
        );
    }

    #[test]
    fn clones_share_the_ring() {
        let log = SessionLog::default();
        let other = log.clone();
        other.info("hello");
        assert_eq!(log.len(), 1);
        log.clear();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn subscribers_see_new_entries() {
        let log = SessionLog::default();
        let mut rx = log.subscribe();
        log.rx("BAT,74");
        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.kind, LogKind::Rx);
        assert_eq!(entry.text, "BAT,74");
    }
}
