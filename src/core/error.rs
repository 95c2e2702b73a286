//! Runtime failure codes.
//!
//! Only outcomes that can legitimately happen at run time are represented
//! here: a deadline expiring, or the supervising object being killed while
//! the caller waited. Contract violations (null handles, thread-only calls
//! from interrupt context, a non-owner releasing a mutex) are caught by
//! assertions at API entry and carry no error plumbing.

use crate::types::{Event, E_STOPPED, E_TIMEOUT};

/// Failure of a blocking operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsError {
    /// The deadline expired, or `IMMEDIATE` was requested and the operation
    /// would have blocked.
    Timeout,
    /// The supervising object was killed while the caller was waiting.
    Stopped,
}

/// Result type for kernel operations.
pub type OsResult<T> = Result<T, OsError>;

/// Translate a wakeup event word into a result.
#[inline]
pub(crate) fn event_result(event: Event) -> OsResult<()> {
    match event {
        E_TIMEOUT => Err(OsError::Timeout),
        E_STOPPED => Err(OsError::Stopped),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::E_SUCCESS;

    #[test]
    fn test_event_mapping() {
        assert_eq!(event_result(E_SUCCESS), Ok(()));
        assert_eq!(event_result(E_TIMEOUT), Err(OsError::Timeout));
        assert_eq!(event_result(E_STOPPED), Err(OsError::Stopped));
        // flag wakeups deliver the mask through the event word
        assert_eq!(event_result(0x0000_00ff), Ok(()));
    }
}
