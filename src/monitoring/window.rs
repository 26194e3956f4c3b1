//! Time-bounded append-and-prune buffer

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

/// Entries younger than `max_age`, oldest first
#[derive(Debug, Clone)]
pub struct TimeWindow<T> {
    max_age: Duration,
    entries: VecDeque<(DateTime<Utc>, T)>,
}

impl<T> TimeWindow<T> {
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            entries: VecDeque::new(),
        }
    }

    /// Append an entry stamped `now` and drop entries that reached `max_age`
    pub fn push(&mut self, now: DateTime<Utc>, item: T) {
        self.entries.push_back((now, item));
        self.prune(now);
    }

    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.max_age;
        while let Some((ts, _)) = self.entries.front() {
            if *ts <= cutoff {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(_, item)| item)
    }

    /// Entries stamped at or after `since`
    pub fn since(&self, since: DateTime<Utc>) -> impl Iterator<Item = &T> {
        self.entries
            .iter()
            .filter(move |(ts, _)| *ts >= since)
            .map(|(_, item)| item)
    }
}
