//! Highlight expiry schedule.
//!
//! Each racer has at most one pending deadline. Deadlines are kept ordered
//! so the owner can sleep exactly until the next one.

use super::snapshot::RacerId;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

#[derive(Debug, Default)]
pub struct HighlightSchedule {
    deadlines: BTreeMap<Instant, HashSet<RacerId>>,
    by_racer: HashMap<RacerId, Instant>,
}

impl HighlightSchedule {
    pub fn new() -> HighlightSchedule {
        HighlightSchedule::default()
    }

    /// Sets the deadline for `racer`, replacing any earlier one.
    pub fn schedule(&mut self, racer: RacerId, at: Instant) {
        self.cancel(&racer);
        self.deadlines
            .entry(at)
            .or_insert_with(HashSet::new)
            .insert(racer.clone());
        self.by_racer.insert(racer, at);
    }

    /// Removes the deadline for `racer`. Returns false if none was pending.
    pub fn cancel(&mut self, racer: &RacerId) -> bool {
        let at = match self.by_racer.remove(racer) {
            Some(at) => at,
            None => return false,
        };
        if let Some(ids) = self.deadlines.get_mut(&at) {
            ids.remove(racer);
            if ids.is_empty() {
                self.deadlines.remove(&at);
            }
        }
        true
    }

    /// Drops deadlines of racers for which `keep` is false.
    pub fn retain<F: FnMut(&RacerId) -> bool>(&mut self, mut keep: F) {
        let gone: Vec<RacerId> = self
            .by_racer
            .keys()
            .filter(|id| !keep(id))
            .cloned()
            .collect();
        for id in gone {
            self.cancel(&id);
        }
    }

    /// Removes and returns every racer whose deadline is at or before `now`.
    pub fn expire(&mut self, now: Instant) -> Vec<RacerId> {
        let mut expired = Vec::new();
        while let Some((&at, _)) = self.deadlines.iter().next() {
            if at > now {
                break;
            }
            if let Some(ids) = self.deadlines.remove(&at) {
                for id in ids {
                    self.by_racer.remove(&id);
                    expired.push(id);
                }
            }
        }
        expired.sort();
        expired
    }

    pub fn deadline(&self, racer: &RacerId) -> Option<Instant> {
        self.by_racer.get(racer).copied()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.keys().next().copied()
    }

    pub fn len(&self) -> usize {
        self.by_racer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_racer.is_empty()
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
        self.by_racer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn expiry_is_per_racer() {
        let t0 = Instant::now();
        let mut s = HighlightSchedule::new();
        s.schedule(RacerId::from("a"), t0 + Duration::from_millis(100));
        s.schedule(RacerId::from("b"), t0 + Duration::from_millis(300));
        assert_eq!(s.next_deadline(), Some(t0 + Duration::from_millis(100)));

        assert!(s.expire(t0).is_empty());
        assert_eq!(s.expire(t0 + Duration::from_millis(150)), vec![RacerId::from("a")]);
        assert_eq!(s.len(), 1);
        assert_eq!(s.deadline(&RacerId::from("b")), Some(t0 + Duration::from_millis(300)));
    }

    #[test]
    fn reschedule_replaces() {
        let t0 = Instant::now();
        let mut s = HighlightSchedule::new();
        let a = RacerId::from("a");
        s.schedule(a.clone(), t0 + Duration::from_millis(100));
        s.schedule(a.clone(), t0 + Duration::from_millis(500));
        assert_eq!(s.len(), 1);
        assert!(s.expire(t0 + Duration::from_millis(200)).is_empty());
        assert_eq!(s.next_deadline(), Some(t0 + Duration::from_millis(500)));
    }

    #[test]
    fn cancel_and_retain() {
        let t0 = Instant::now();
        let mut s = HighlightSchedule::new();
        for id in ["a", "b", "c"] {
            s.schedule(RacerId::from(id), t0);
        }
        assert!(s.cancel(&RacerId::from("a")));
        assert!(!s.cancel(&RacerId::from("a")));
        assert!(!s.cancel(&RacerId::from("zz")));
        s.retain(|id| id.as_str() != "b");
        assert_eq!(s.expire(t0), vec![RacerId::from("c")]);
        assert!(s.is_empty());
        assert_eq!(s.next_deadline(), None);
    }
}
