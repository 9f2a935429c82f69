use std::collections::{HashMap, VecDeque};

use crate::common::{PageId, Timestamp};

/// Tracks access history for a single page
#[derive(Debug)]
struct AccessHistory {
    /// History of access timestamps (most recent at back)
    history: VecDeque<Timestamp>,
}

impl AccessHistory {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
        }
    }

    /// Records an access at the given timestamp, keeping the last k
    fn record_access(&mut self, timestamp: Timestamp, k: usize) {
        self.history.push_back(timestamp);
        while self.history.len() > k {
            self.history.pop_front();
        }
    }

    /// Backward k-distance, or None (+inf) with fewer than k accesses
    fn k_distance(&self, current_timestamp: Timestamp, k: usize) -> Option<Timestamp> {
        if self.history.len() < k {
            None
        } else {
            Some(current_timestamp - self.history[self.history.len() - k])
        }
    }

    fn earliest_timestamp(&self) -> Option<Timestamp> {
        self.history.front().copied()
    }
}

/// LRU-K Replacement Policy over resident pages.
///
/// The victim is the page whose backward k-distance is the maximum among the
/// candidates. A page with fewer than k recorded accesses has +inf distance;
/// ties between +inf pages go to the earliest first access.
///
/// The replacer does not know about pins or cache partitions: callers pass a
/// filter selecting the pages that may be evicted right now. It is owned by the
/// buffer pool state and relies on the pool's lock.
#[derive(Debug)]
pub struct LruKReplacer {
    k: usize,
    current_timestamp: Timestamp,
    pages: HashMap<PageId, AccessHistory>,
}

impl LruKReplacer {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            current_timestamp: 0,
            pages: HashMap::new(),
        }
    }

    /// Records that the given page was accessed at the current timestamp.
    pub fn record_access(&mut self, page_id: PageId) {
        let timestamp = self.current_timestamp;
        self.current_timestamp += 1;
        self.pages
            .entry(page_id)
            .or_insert_with(AccessHistory::new)
            .record_access(timestamp, self.k);
    }

    /// Picks the page with the largest backward k-distance among those accepted
    /// by `filter` and stops tracking it. Returns None if no page qualifies.
    pub fn victim<F>(&mut self, mut filter: F) -> Option<PageId>
    where
        F: FnMut(PageId) -> bool,
    {
        let mut victim: Option<PageId> = None;
        let mut victim_k_dist: Option<Timestamp> = None;
        let mut victim_earliest_ts: Option<Timestamp> = None;

        for (page_id, info) in self.pages.iter() {
            if !filter(*page_id) {
                continue;
            }

            let k_dist = info.k_distance(self.current_timestamp, self.k);
            let earliest_ts = info.earliest_timestamp();

            let should_replace = match (victim_k_dist, k_dist) {
                (None, Some(_)) => false,
                (Some(_), None) => true,
                (None, None) => match (victim_earliest_ts, earliest_ts) {
                    (Some(v_ts), Some(c_ts)) => c_ts < v_ts,
                    (None, Some(_)) => true,
                    _ => false,
                },
                (Some(v_dist), Some(c_dist)) => c_dist > v_dist,
            };

            if victim.is_none() || should_replace {
                victim = Some(*page_id);
                victim_k_dist = k_dist;
                victim_earliest_ts = earliest_ts;
            }
        }

        if let Some(page_id) = victim {
            self.pages.remove(&page_id);
        }
        victim
    }

    /// Stops tracking a page.
    pub fn remove(&mut self, page_id: PageId) {
        self.pages.remove(&page_id);
    }

    /// Returns the number of tracked pages.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn k(&self) -> usize {
        self.k
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_victim_empty() {
        let mut replacer = LruKReplacer::new(2);
        assert_eq!(replacer.victim(|_| true), None);
        assert!(replacer.is_empty());
    }

    #[test]
    fn test_infinite_distance_goes_first() {
        let mut replacer = LruKReplacer::new(2);
        replacer.record_access(PageId::new(0));
        replacer.record_access(PageId::new(0));
        replacer.record_access(PageId::new(1));

        // Page 1 has a single access, so +inf distance
        assert_eq!(replacer.victim(|_| true), Some(PageId::new(1)));
        assert_eq!(replacer.len(), 1);
    }

    #[test]
    fn test_filter_excludes_pages() {
        let mut replacer = LruKReplacer::new(2);
        replacer.record_access(PageId::new(0));
        replacer.record_access(PageId::new(1));

        assert_eq!(
            replacer.victim(|page_id| page_id != PageId::new(0)),
            Some(PageId::new(1))
        );
        assert_eq!(replacer.victim(|_| false), None);
        assert_eq!(replacer.len(), 1);
    }
}
