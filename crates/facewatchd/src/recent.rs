use chrono::{DateTime, Utc};
use facewatch_core::{DetectionRecord, NotificationRecord};
use std::collections::VecDeque;

/// Entries kept in each in-memory recent list.
pub const RECENT_CAPACITY: usize = 20;

pub trait Timestamped {
    fn timestamp(&self) -> DateTime<Utc>;
}

impl Timestamped for DetectionRecord {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl Timestamped for NotificationRecord {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Bounded newest-first list. Only the in-memory view is trimmed; the store
/// keeps everything.
#[derive(Debug)]
pub struct RecentList<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Timestamped + Clone> RecentList<T> {
    /// Build from stored records: newest first, cut to capacity.
    pub fn seeded(mut records: Vec<T>, capacity: usize) -> Self {
        records.sort_by_key(|r| std::cmp::Reverse(r.timestamp()));
        records.truncate(capacity);
        Self {
            items: records.into(),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        self.items.push_front(item);
        self.items.truncate(self.capacity);
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.iter_mut()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item(i64);

    impl Timestamped for Item {
        fn timestamp(&self) -> DateTime<Utc> {
            DateTime::from_timestamp_millis(self.0).unwrap()
        }
    }

    #[test]
    fn test_push_is_newest_first_and_capped() {
        let mut list = RecentList::seeded(Vec::new(), 3);
        for i in 0..5 {
            list.push(Item(i));
        }
        assert_eq!(list.to_vec(), vec![Item(4), Item(3), Item(2)]);
    }

    #[test]
    fn test_seeded_sorts_descending() {
        let list = RecentList::seeded(vec![Item(5), Item(9), Item(1), Item(7)], 3);
        assert_eq!(list.to_vec(), vec![Item(9), Item(7), Item(5)]);
    }

    #[test]
    fn test_clear() {
        let mut list = RecentList::seeded(vec![Item(1)], RECENT_CAPACITY);
        assert_eq!(list.len(), 1);
        list.clear();
        assert_eq!(list.len(), 0);
    }
}
