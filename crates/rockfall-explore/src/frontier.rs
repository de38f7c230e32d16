//! Frontier — priority multimap of inputs awaiting exploration.
//!
//! Keys order first by score ascending, then by depth *descending*,
//! so the map's last entry is the highest-scoring input and ties
//! favour the shallower node.  Popping takes the last entry.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::input::InputId;

/// Priority key for one frontier entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrontierKey {
    /// Number of freshly covered basic blocks.
    pub score: u32,
    /// Depth of the entry in the exploration tree.
    pub depth: u32,
}

impl Ord for FrontierKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .cmp(&other.score)
            .then(other.depth.cmp(&self.depth))
    }
}

impl PartialOrd for FrontierKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Multimap of `(score, depth)` → input, popped highest-score-first.
#[derive(Default)]
pub struct Frontier {
    map: BTreeMap<FrontierKey, Vec<InputId>>,
    len: usize,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: FrontierKey, id: InputId) {
        self.map.entry(key).or_default().push(id);
        self.len += 1;
    }

    /// The best key currently enqueued.
    pub fn peek_best(&self) -> Option<FrontierKey> {
        self.map.keys().next_back().copied()
    }

    /// Remove and return the best entry.  Among equal keys the most
    /// recently inserted input is taken first.
    pub fn pop_best(&mut self) -> Option<(FrontierKey, InputId)> {
        let key = self.peek_best()?;
        Some((key, self.pop_from(key)))
    }

    /// Remove and return the *second*-best entry, keeping the best
    /// local.  Used when migrating surplus inputs to the coordinator.
    pub fn pop_second_best(&mut self) -> Option<(FrontierKey, InputId)> {
        if self.len < 2 {
            return None;
        }
        let mut keys = self.map.keys().rev();
        let best = *keys.next()?;
        let key = if self.map[&best].len() >= 2 {
            best
        } else {
            *keys.next()?
        };
        drop(keys);

        if key == best && self.map[&key].len() >= 2 {
            // Second from the end among the equal-key entries.
            let bucket = self.map.get_mut(&key).unwrap();
            let id = bucket.remove(bucket.len() - 2);
            self.len -= 1;
            return Some((key, id));
        }
        Some((key, self.pop_from(key)))
    }

    fn pop_from(&mut self, key: FrontierKey) -> InputId {
        let bucket = self.map.get_mut(&key).unwrap();
        let id = bucket.pop().unwrap();
        if bucket.is_empty() {
            self.map.remove(&key);
        }
        self.len -= 1;
        id
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(score: u32, depth: u32) -> FrontierKey {
        FrontierKey { score, depth }
    }

    #[test]
    fn orders_by_score_ascending() {
        assert!(key(1, 0) < key(2, 0));
        assert!(key(2, 5) > key(1, 0));
    }

    #[test]
    fn ties_favour_shallower_depth() {
        // Same score: the shallower key must order *greater* so it is
        // popped first.
        assert!(key(3, 1) > key(3, 4));
        assert_eq!(key(3, 2).cmp(&key(3, 2)), Ordering::Equal);
    }

    #[test]
    fn pop_best_returns_highest_score() {
        let mut frontier = Frontier::new();
        frontier.insert(key(1, 0), InputId(0));
        frontier.insert(key(5, 3), InputId(1));
        frontier.insert(key(3, 1), InputId(2));

        let (k, id) = frontier.pop_best().unwrap();
        assert_eq!(k, key(5, 3));
        assert_eq!(id, InputId(1));
        assert_eq!(frontier.len(), 2);
    }

    #[test]
    fn pop_order_is_monotonically_nonincreasing() {
        let mut frontier = Frontier::new();
        for (i, (s, d)) in [(2, 1), (7, 0), (2, 9), (0, 4), (7, 2)].iter().enumerate() {
            frontier.insert(key(*s, *d), InputId(i as u32));
        }
        let mut last: Option<FrontierKey> = None;
        while let Some((k, _)) = frontier.pop_best() {
            if let Some(prev) = last {
                assert!(k <= prev, "popped {k:?} after {prev:?}");
            }
            last = Some(k);
        }
        assert!(frontier.is_empty());
    }

    #[test]
    fn equal_scores_pop_shallow_first() {
        let mut frontier = Frontier::new();
        frontier.insert(key(4, 9), InputId(0));
        frontier.insert(key(4, 2), InputId(1));

        assert_eq!(frontier.pop_best().unwrap().1, InputId(1));
        assert_eq!(frontier.pop_best().unwrap().1, InputId(0));
    }

    #[test]
    fn multimap_holds_duplicate_keys() {
        let mut frontier = Frontier::new();
        frontier.insert(key(1, 1), InputId(0));
        frontier.insert(key(1, 1), InputId(1));
        assert_eq!(frontier.len(), 2);

        // Most recent first among equals.
        assert_eq!(frontier.pop_best().unwrap().1, InputId(1));
        assert_eq!(frontier.pop_best().unwrap().1, InputId(0));
        assert!(frontier.pop_best().is_none());
    }

    #[test]
    fn pop_second_best_keeps_the_best() {
        let mut frontier = Frontier::new();
        frontier.insert(key(9, 0), InputId(0));
        frontier.insert(key(5, 0), InputId(1));
        frontier.insert(key(3, 0), InputId(2));

        let (k, id) = frontier.pop_second_best().unwrap();
        assert_eq!(k, key(5, 0));
        assert_eq!(id, InputId(1));
        // The best entry is untouched.
        assert_eq!(frontier.peek_best(), Some(key(9, 0)));
    }

    #[test]
    fn pop_second_best_within_equal_keys() {
        let mut frontier = Frontier::new();
        frontier.insert(key(9, 0), InputId(0));
        frontier.insert(key(9, 0), InputId(1));

        let (_, id) = frontier.pop_second_best().unwrap();
        assert_eq!(id, InputId(0));
        assert_eq!(frontier.pop_best().unwrap().1, InputId(1));
    }

    #[test]
    fn pop_second_best_needs_two_entries() {
        let mut frontier = Frontier::new();
        assert!(frontier.pop_second_best().is_none());
        frontier.insert(key(1, 0), InputId(0));
        assert!(frontier.pop_second_best().is_none());
        assert_eq!(frontier.len(), 1);
    }
}
