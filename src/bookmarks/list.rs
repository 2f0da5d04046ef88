//! Immutable bookmark list
//!
//! `BookmarkList` is an ordered, newest-first snapshot. Every mutation derives
//! a new list; an existing snapshot never changes, so it can be handed to
//! readers while the reconciler keeps working.

use std::sync::Arc;

use super::types::{BookmarkRecord, ChangeEvent};

/// Ordered snapshot of one owner's bookmarks, newest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookmarkList {
    items: Arc<[BookmarkRecord]>,
}

impl BookmarkList {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a list from query rows, ordered by creation time descending.
    ///
    /// Duplicate ids keep their first occurrence.
    pub fn from_rows(mut rows: Vec<BookmarkRecord>) -> Self {
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut seen = std::collections::HashSet::with_capacity(rows.len());
        rows.retain(|r| seen.insert(r.id.clone()));

        Self::from_ordered(rows)
    }

    fn from_ordered(rows: Vec<BookmarkRecord>) -> Self {
        Self { items: rows.into() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BookmarkRecord> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[BookmarkRecord] {
        &self.items
    }

    /// Position of the record with `id`
    pub fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|r| r.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&BookmarkRecord> {
        self.items.iter().find(|r| r.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    /// Prepend `record` unless its id is already present.
    pub fn with_inserted(&self, record: BookmarkRecord) -> Option<Self> {
        if self.contains(&record.id) {
            return None;
        }

        let mut rows = Vec::with_capacity(self.items.len() + 1);
        rows.push(record);
        rows.extend(self.items.iter().cloned());
        Some(Self::from_ordered(rows))
    }

    /// Replace the record with the same id in place. Absent ids are ignored.
    pub fn with_updated(&self, record: BookmarkRecord) -> Option<Self> {
        let index = self.position(&record.id)?;
        if self.items[index] == record {
            return None;
        }

        let mut rows = self.items.to_vec();
        rows[index] = record;
        Some(Self::from_ordered(rows))
    }

    /// Remove the record with `id`, returning the new list, the removed
    /// record and where it sat.
    pub fn with_removed(&self, id: &str) -> Option<(Self, usize, BookmarkRecord)> {
        let index = self.position(id)?;

        let mut rows = self.items.to_vec();
        let removed = rows.remove(index);
        Some((Self::from_ordered(rows), index, removed))
    }

    /// Put a previously removed record back at `index` (clamped to the end).
    /// No-op when the id has reappeared in the meantime.
    pub fn with_restored(&self, index: usize, record: BookmarkRecord) -> Option<Self> {
        if self.contains(&record.id) {
            return None;
        }

        let mut rows = self.items.to_vec();
        rows.insert(index.min(rows.len()), record);
        Some(Self::from_ordered(rows))
    }

    /// Apply a push event. Returns `None` when the event does not change the
    /// list (duplicate insert, update or delete of an absent id).
    pub fn apply(&self, event: &ChangeEvent) -> Option<Self> {
        match event {
            ChangeEvent::Inserted(record) => self.with_inserted(record.clone()),
            ChangeEvent::Updated(record) => self.with_updated(record.clone()),
            ChangeEvent::Deleted { id } => self.with_removed(id).map(|(list, _, _)| list),
        }
    }
}

impl<'a> IntoIterator for &'a BookmarkList {
    type Item = &'a BookmarkRecord;
    type IntoIter = std::slice::Iter<'a, BookmarkRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn record(id: &str, title: &str, minutes: i64) -> BookmarkRecord {
        BookmarkRecord {
            id: id.to_string(),
            title: title.to_string(),
            url: format!("{}.example.com", id),
            user_id: "u1".to_string(),
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
                + Duration::minutes(minutes),
        }
    }

    fn ids(list: &BookmarkList) -> Vec<&str> {
        list.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_from_rows_orders_newest_first() {
        let list = BookmarkList::from_rows(vec![
            record("a", "A", 1),
            record("c", "C", 3),
            record("b", "B", 2),
        ]);
        assert_eq!(ids(&list), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_insert_prepends() {
        let list = BookmarkList::from_rows(vec![record("a", "A", 1)]);
        let list = list.apply(&ChangeEvent::Inserted(record("b", "B", 2))).unwrap();
        assert_eq!(ids(&list), vec!["b", "a"]);
    }

    #[test]
    fn test_duplicate_insert_is_noop() {
        let list = BookmarkList::from_rows(vec![record("a", "A", 1), record("b", "B", 2)]);
        let mut changed = record("a", "Changed", 1);
        changed.url = "other.example.com".to_string();

        assert!(list.apply(&ChangeEvent::Inserted(changed)).is_none());
        assert_eq!(list.len(), 2);
        assert_eq!(list.get("a").unwrap().title, "A");
    }

    #[test]
    fn test_update_keeps_position() {
        let list = BookmarkList::from_rows(vec![
            record("a", "A", 1),
            record("b", "B", 2),
            record("c", "C", 3),
        ]);
        let mut updated = record("b", "Renamed", 2);
        updated.url = "renamed.example.com".to_string();

        let list = list.apply(&ChangeEvent::Updated(updated)).unwrap();
        assert_eq!(ids(&list), vec!["c", "b", "a"]);
        assert_eq!(list.get("b").unwrap().title, "Renamed");
        assert_eq!(list.get("b").unwrap().url, "renamed.example.com");
    }

    #[test]
    fn test_update_absent_is_noop() {
        let list = BookmarkList::from_rows(vec![record("a", "A", 1)]);
        assert!(list.apply(&ChangeEvent::Updated(record("z", "Z", 9))).is_none());
    }

    #[test]
    fn test_delete_absent_is_noop() {
        let list = BookmarkList::from_rows(vec![record("a", "A", 1)]);
        let event = ChangeEvent::Deleted {
            id: "missing".to_string(),
        };
        assert!(list.apply(&event).is_none());
    }

    #[test]
    fn test_snapshots_are_not_mutated() {
        let original = BookmarkList::from_rows(vec![record("a", "A", 1), record("b", "B", 2)]);
        let event = ChangeEvent::Deleted {
            id: "a".to_string(),
        };
        let derived = original.apply(&event).unwrap();

        assert_eq!(ids(&original), vec!["b", "a"]);
        assert_eq!(ids(&derived), vec!["b"]);
    }

    #[test]
    fn test_restore_puts_record_back() {
        let list = BookmarkList::from_rows(vec![
            record("a", "A", 1),
            record("b", "B", 2),
            record("c", "C", 3),
        ]);
        let (without, index, removed) = list.with_removed("b").unwrap();
        assert_eq!(index, 1);

        let restored = without.with_restored(index, removed.clone()).unwrap();
        assert_eq!(restored, list);

        // Already back (e.g. via a push insert): nothing to do
        assert!(restored.with_restored(index, removed).is_none());
    }
}
