use serenity::all::UserId;
use std::collections::{HashMap, VecDeque};

/// Most users never show up here; the cap just keeps a busy server from
/// growing the map without bound.
const LAST_REACTION_CAP: usize = 256;

/// State which is lost across sessions
pub struct VolatileState {
    pub cycle: CycleGuard,
    pub last_reactions: LastReactions,
}

impl VolatileState {
    pub fn new() -> Self {
        Self {
            cycle: CycleGuard::new(),
            last_reactions: LastReactions::new(LAST_REACTION_CAP),
        }
    }
}

/// Tracks whether a generation cycle task is currently running, so a second
/// start cannot schedule a concurrent cycle.
pub struct CycleGuard {
    running: bool,
}

impl CycleGuard {
    pub fn new() -> Self {
        Self { running: false }
    }

    pub fn running(&self) -> bool {
        self.running
    }

    /// Claim the cycle slot.  Returns false if a cycle already holds it.
    pub fn try_claim(&mut self) -> bool {
        if self.running {
            return false;
        }
        self.running = true;
        true
    }

    pub fn release(&mut self) {
        self.running = false;
    }
}

/// Bounded cache of the last emoji each user reacted with, used by the
/// shadow predictor.  Oldest entries are evicted once the cap is reached.
pub struct LastReactions {
    map: HashMap<UserId, String>,
    order: VecDeque<UserId>,
    cap: usize,
}

impl LastReactions {
    pub fn new(cap: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            cap,
        }
    }

    pub fn record(&mut self, user: UserId, emoji: String) {
        if self.map.insert(user, emoji).is_none() {
            self.order.push_back(user);
            if self.order.len() > self.cap {
                if let Some(evicted) = self.order.pop_front() {
                    self.map.remove(&evicted);
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Take all predictions, clearing the cache.  Called when a new source
    /// message rotates in.
    pub fn drain(&mut self) -> Vec<(UserId, String)> {
        self.order.clear();
        self.map.drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_guard_admits_one_claim() {
        let mut guard = CycleGuard::new();
        assert!(guard.try_claim());
        assert!(!guard.try_claim());
        guard.release();
        assert!(guard.try_claim());
    }

    #[test]
    fn last_reactions_evicts_oldest() {
        let mut cache = LastReactions::new(2);
        cache.record(UserId::new(1), "👍".to_string());
        cache.record(UserId::new(2), "🔥".to_string());
        cache.record(UserId::new(3), "🎉".to_string());

        let mut drained = cache.drain();
        drained.sort();
        assert_eq!(
            drained,
            vec![
                (UserId::new(2), "🔥".to_string()),
                (UserId::new(3), "🎉".to_string()),
            ]
        );
    }

    #[test]
    fn re_recording_updates_without_duplicating() {
        let mut cache = LastReactions::new(2);
        cache.record(UserId::new(1), "👍".to_string());
        cache.record(UserId::new(1), "👎".to_string());
        cache.record(UserId::new(2), "🔥".to_string());

        let mut drained = cache.drain();
        drained.sort();
        assert_eq!(
            drained,
            vec![
                (UserId::new(1), "👎".to_string()),
                (UserId::new(2), "🔥".to_string()),
            ]
        );
        assert!(cache.is_empty());
    }
}
