//! Bookmark of the highest ledger id already handled.

use crate::error::{CursorError, LedgerError};
use crate::ledger::Ledger;
use std::ops::RangeInclusive;

/// Monotonic processing cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerCursor {
    last_processed_id: u64,
}

impl LedgerCursor {
    /// Cursor positioned after `last_processed_id`.
    pub fn new(last_processed_id: u64) -> Self {
        Self { last_processed_id }
    }

    /// Cursor at the current ledger head, so history is not reprocessed.
    pub async fn at_head(ledger: &dyn Ledger) -> Result<Self, LedgerError> {
        Ok(Self::new(ledger.length().await?))
    }

    pub fn last_processed_id(&self) -> u64 {
        self.last_processed_id
    }

    /// Move forward to `id`. Moving backwards means the ledger shrank or was
    /// rewritten, which is never repaired here.
    pub fn advance_to(&mut self, id: u64) -> Result<(), CursorError> {
        if id < self.last_processed_id {
            return Err(CursorError::InvariantViolation {
                current: self.last_processed_id,
                requested: id,
            });
        }
        self.last_processed_id = id;
        Ok(())
    }

    /// Ids not yet handled given the current ledger length.
    pub fn pending_range(&self, current_length: u64) -> RangeInclusive<u64> {
        self.last_processed_id.saturating_add(1)..=current_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_range() {
        let cursor = LedgerCursor::new(3);

        assert_eq!(cursor.pending_range(6).collect::<Vec<_>>(), vec![4, 5, 6]);
        assert!(cursor.pending_range(3).is_empty());
        assert!(cursor.pending_range(1).is_empty());
    }

    #[test]
    fn test_advance_is_monotonic() {
        let mut cursor = LedgerCursor::new(0);
        cursor.advance_to(2).unwrap();
        cursor.advance_to(2).unwrap();
        cursor.advance_to(5).unwrap();

        assert_eq!(
            cursor.advance_to(4),
            Err(CursorError::InvariantViolation { current: 5, requested: 4 })
        );
        assert_eq!(cursor.last_processed_id(), 5);
    }

    #[test]
    fn test_pending_empty_after_advance_to_length() {
        let mut cursor = LedgerCursor::new(0);
        for length in [0u64, 1, 7, 7, 20] {
            cursor.advance_to(length).unwrap();
            assert!(cursor.pending_range(length).is_empty());
        }
    }

    #[test]
    fn test_never_decreases_over_sequence() {
        let mut cursor = LedgerCursor::new(0);
        let mut previous = 0;
        for target in [3u64, 1, 8, 8, 2, 10, 0] {
            let _ = cursor.advance_to(target);
            assert!(cursor.last_processed_id() >= previous);
            previous = cursor.last_processed_id();
        }
        assert_eq!(previous, 10);
    }
}
