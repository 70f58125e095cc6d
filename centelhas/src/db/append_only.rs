//! Write-once log used by the in-memory store.

use serde::Serialize;

/// Sequential log whose only write verb is [`AppendOnlyLog::append`]
///
/// Row IDs are assigned from the position in the log starting at 1, so an
/// ID always resolves to the same row for the lifetime of the log. There is
/// no way to borrow a row mutably.
#[derive(Debug, Clone, Serialize)]
pub struct AppendOnlyLog<T> {
    rows: Vec<T>,
}

impl<T> Default for AppendOnlyLog<T> {
    fn default() -> Self {
        Self { rows: Vec::new() }
    }
}

impl<T> AppendOnlyLog<T> {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the row built for the next ID and return it
    pub fn append(&mut self, build: impl FnOnce(i64) -> T) -> &T {
        let id = self.next_id();
        self.rows.push(build(id));
        &self.rows[self.rows.len() - 1]
    }

    /// ID the next appended row will receive
    pub fn next_id(&self) -> i64 {
        self.rows.len() as i64 + 1
    }

    /// Row with the given ID
    pub fn get(&self, id: i64) -> Option<&T> {
        usize::try_from(id - 1).ok().and_then(|idx| self.rows.get(idx))
    }

    /// Whether a row with the given ID exists
    pub fn contains(&self, id: i64) -> bool {
        self.get(id).is_some()
    }

    /// Rows in append order
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.rows.iter()
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the log is empty
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_follow_append_order() {
        let mut log = AppendOnlyLog::new();
        assert_eq!(log.append(|id| (id, "first")).0, 1);
        assert_eq!(log.append(|id| (id, "second")).0, 2);
        assert_eq!(log.get(2), Some(&(2, "second")));
        assert_eq!(log.get(0), None);
        assert_eq!(log.get(3), None);
        assert_eq!(log.len(), 2);
        assert_eq!(log.iter().next_back(), Some(&(2, "second")));
    }
}
