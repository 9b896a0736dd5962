//! Observable state of a cached result.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Lifecycle discriminant of a cached result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum QueryStatus {
    /// Nothing has run or been seeded yet.
    #[default]
    Idle,
    /// An operation is in flight.
    Loading,
    /// The latest attempt produced a value.
    Succeeded,
    /// The latest attempt failed. Data from an earlier success may remain.
    Failed,
}

impl QueryStatus {
    /// Derive the status from the raw fields of a result.
    ///
    /// A pending operation always wins; otherwise an error means the latest
    /// attempt failed, since success clears it.
    pub fn derive(pending: bool, has_data: bool, has_error: bool) -> Self {
        match (pending, has_data, has_error) {
            (true, _, _) => Self::Loading,
            (false, _, true) => Self::Failed,
            (false, true, false) => Self::Succeeded,
            (false, false, false) => Self::Idle,
        }
    }

    /// Returns true while an operation is in flight.
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    /// Returns true once an attempt has completed (either way).
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time copy of a result's observable fields.
///
/// Snapshots are taken under the result's state lock, so a snapshot never
/// mixes fields from two different transitions.
#[derive(Debug)]
pub struct QuerySnapshot<D, E> {
    pub status: QueryStatus,
    pub data: Option<Arc<D>>,
    pub error: Option<Arc<E>>,
    /// Bumped on every observable transition.
    pub revision: u64,
}

impl<D, E> QuerySnapshot<D, E> {
    /// The snapshot of a result nobody has touched yet.
    pub fn idle() -> Self {
        Self {
            status: QueryStatus::Idle,
            data: None,
            error: None,
            revision: 0,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.status.is_loading()
    }

    /// Borrow the last successful payload, if any.
    pub fn data_ref(&self) -> Option<&D> {
        self.data.as_deref()
    }

    /// Borrow the last failure, if any.
    pub fn error_ref(&self) -> Option<&E> {
        self.error.as_deref()
    }
}

impl<D, E> Clone for QuerySnapshot<D, E> {
    fn clone(&self) -> Self {
        Self {
            status: self.status,
            data: self.data.clone(),
            error: self.error.clone(),
            revision: self.revision,
        }
    }
}

impl<D, E> Default for QuerySnapshot<D, E> {
    fn default() -> Self {
        Self::idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_status_display() {
        assert_eq!(QueryStatus::Idle.to_string(), "idle");
        assert_eq!(QueryStatus::Loading.to_string(), "loading");
        assert_eq!(QueryStatus::Succeeded.to_string(), "succeeded");
        assert_eq!(QueryStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_stale_data_with_error_is_failed() {
        assert_eq!(QueryStatus::derive(false, true, true), QueryStatus::Failed);
    }

    #[test]
    fn test_idle_snapshot() {
        let snapshot: QuerySnapshot<u32, String> = QuerySnapshot::default();
        assert_eq!(snapshot.status, QueryStatus::Idle);
        assert!(snapshot.data_ref().is_none());
        assert!(snapshot.error_ref().is_none());
        assert_eq!(snapshot.revision, 0);
    }

    #[test]
    fn test_snapshot_clone_shares_payload() {
        let snapshot: QuerySnapshot<String, String> = QuerySnapshot {
            status: QueryStatus::Succeeded,
            data: Some(Arc::new("payload".to_string())),
            error: None,
            revision: 3,
        };
        let copy = snapshot.clone();
        assert!(Arc::ptr_eq(
            snapshot.data.as_ref().unwrap(),
            copy.data.as_ref().unwrap()
        ));
    }

    proptest! {
        /// Property: Loading iff pending, regardless of the other fields.
        #[test]
        fn prop_loading_iff_pending(pending in any::<bool>(), data in any::<bool>(), error in any::<bool>()) {
            let status = QueryStatus::derive(pending, data, error);
            prop_assert_eq!(status.is_loading(), pending);
        }

        /// Property: Succeeded implies data present and error absent;
        /// Failed implies error present.
        #[test]
        fn prop_settled_status_matches_fields(data in any::<bool>(), error in any::<bool>()) {
            match QueryStatus::derive(false, data, error) {
                QueryStatus::Succeeded => prop_assert!(data && !error),
                QueryStatus::Failed => prop_assert!(error),
                QueryStatus::Idle => prop_assert!(!data && !error),
                QueryStatus::Loading => prop_assert!(false, "not pending"),
            }
        }
    }
}
