//! Batch size reconciliation against the backend ceiling.

use crate::error::{SyncError, SyncResult};

/// Reconciles a caller-requested batch size with the backend ceiling.
///
/// A caller asking for more than the backend allows is silently capped.
/// A caller whose payload is bigger than its own request has broken its
/// contract and the whole call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimiter {
    ceiling: usize,
}

impl BatchLimiter {
    /// Creates a limiter for the given backend ceiling (at least 1).
    pub fn new(ceiling: usize) -> Self {
        Self {
            ceiling: ceiling.max(1),
        }
    }

    /// The backend ceiling.
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// `min(max(1, requested), ceiling)`.
    pub fn effective_batch_size(&self, requested: usize) -> usize {
        requested.max(1).min(self.ceiling)
    }

    /// Checks `items` against `requested` and truncates to the effective
    /// size, keeping the head.
    ///
    /// `items` should already be the accepted drafts: rejected drafts never
    /// count toward the size check.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::BatchTooLarge`] if `items` is longer than
    /// `requested`.
    pub fn apply<T>(&self, requested: usize, mut items: Vec<T>) -> SyncResult<Vec<T>> {
        if items.len() > requested {
            return Err(SyncError::BatchTooLarge {
                requested,
                accepted: items.len(),
            });
        }
        items.truncate(self.effective_batch_size(requested));
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn effective_size() {
        let limiter = BatchLimiter::new(10);
        assert_eq!(limiter.effective_batch_size(0), 1);
        assert_eq!(limiter.effective_batch_size(4), 4);
        assert_eq!(limiter.effective_batch_size(50), 10);
    }

    #[test]
    fn ceiling_caps_silently() {
        let limiter = BatchLimiter::new(3);
        let kept = limiter.apply(5, vec![1, 2, 3, 4, 5]).unwrap();
        assert_eq!(kept, [1, 2, 3]);
    }

    #[test]
    fn exceeding_request_fails() {
        let limiter = BatchLimiter::new(100);
        let result = limiter.apply(2, vec!['a', 'b', 'c']);
        assert!(matches!(
            result,
            Err(SyncError::BatchTooLarge {
                requested: 2,
                accepted: 3
            })
        ));
    }

    #[test]
    fn zero_ceiling_is_floored() {
        assert_eq!(BatchLimiter::new(0).ceiling(), 1);
    }

    proptest! {
        #[test]
        fn never_exceeds_ceiling(ceiling in 0usize..20, requested in 0usize..40, len in 0usize..40) {
            let limiter = BatchLimiter::new(ceiling);
            let items: Vec<usize> = (0..len).collect();
            match limiter.apply(requested, items) {
                Ok(kept) => {
                    prop_assert!(len <= requested);
                    prop_assert!(kept.len() <= limiter.ceiling());
                    prop_assert_eq!(kept, (0..len.min(limiter.effective_batch_size(requested))).collect::<Vec<_>>());
                }
                Err(_) => prop_assert!(len > requested),
            }
        }
    }
}
