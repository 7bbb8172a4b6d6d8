//! Bidirectional undo history.
//!
//! `past` holds the states before each recorded mutation, newest last.
//! `future` holds states undone since the last mutation, next redo last.
//! Recording a fresh mutation discards `future`.

use std::collections::VecDeque;

use super::snapshot::Snapshot;

#[derive(Debug, Default)]
pub struct History {
    past: VecDeque<Snapshot>,
    future: Vec<Snapshot>,
    limit: usize,
}

impl History {
    /// A history keeping at most `limit` undo steps. Zero disables recording.
    pub fn new(limit: usize) -> Self {
        Self {
            past: VecDeque::new(),
            future: Vec::new(),
            limit,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.limit > 0
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Record the state before a mutation.
    pub fn record(&mut self, before: Snapshot) {
        if !self.is_enabled() {
            return;
        }
        self.past.push_back(before);
        self.trim();
        self.future.clear();
    }

    /// Step back. `current` becomes the next redo target.
    pub fn undo(&mut self, current: Snapshot) -> Option<Snapshot> {
        let previous = self.past.pop_back()?;
        self.future.push(current);
        Some(previous)
    }

    /// Step forward. `current` becomes the next undo target.
    pub fn redo(&mut self, current: Snapshot) -> Option<Snapshot> {
        let next = self.future.pop()?;
        self.past.push_back(current);
        self.trim();
        Some(next)
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    /// `(undo steps, redo steps)` available.
    pub fn depth(&self) -> (usize, usize) {
        (self.past.len(), self.future.len())
    }

    pub fn clear(&mut self) {
        self.past.clear();
        self.future.clear();
    }

    fn trim(&mut self) {
        while self.past.len() > self.limit {
            self.past.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::CloneStrategy;
    use serde_json::json;

    fn snap(n: i64) -> Snapshot {
        CloneStrategy::Structural.snapshot(&json!({ "n": n })).unwrap()
    }

    #[test]
    fn undo_and_redo_walk_the_cursor() {
        let mut history = History::new(10);
        history.record(snap(0));
        history.record(snap(1));

        assert_eq!(history.undo(snap(2)), Some(snap(1)));
        assert_eq!(history.undo(snap(1)), Some(snap(0)));
        assert_eq!(history.undo(snap(0)), None);

        assert_eq!(history.redo(snap(0)), Some(snap(1)));
        assert_eq!(history.redo(snap(1)), Some(snap(2)));
        assert!(!history.can_redo());
    }

    #[test]
    fn recording_clears_redo() {
        let mut history = History::new(10);
        history.record(snap(0));
        history.undo(snap(1));
        assert!(history.can_redo());

        history.record(snap(0));
        assert!(!history.can_redo());
    }

    #[test]
    fn oldest_entries_fall_off() {
        let mut history = History::new(2);
        for n in 0..5 {
            history.record(snap(n));
        }
        assert_eq!(history.depth(), (2, 0));
        assert_eq!(history.undo(snap(5)), Some(snap(4)));
        assert_eq!(history.undo(snap(4)), Some(snap(3)));
        assert_eq!(history.undo(snap(3)), None);
    }

    #[test]
    fn zero_limit_disables_recording() {
        let mut history = History::new(0);
        history.record(snap(0));
        assert!(!history.can_undo());
    }
}
