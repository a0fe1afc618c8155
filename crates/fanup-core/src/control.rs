//! Cancellation for a running dispatch.
//!
//! A `CancelToken` is handed to every job. The CLI sets it on Ctrl-C; jobs
//! that have not started sending fail as cancelled and in-flight transfers
//! are aborted from libcurl's progress callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Error returned when an upload is stopped by the user.
#[derive(Debug)]
pub struct UploadCancelled;

impl std::fmt::Display for UploadCancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "upload cancelled by user")
    }
}

impl std::error::Error for UploadCancelled {}

/// Shared cancellation flag. Cloning shares the same flag.
///
/// A token made with [`CancelToken::child`] is also cancelled when its parent
/// is, but cancelling the child leaves the parent alone.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    parent: Option<Arc<CancelToken>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(&self) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(Arc::new(self.clone())),
        }
    }

    /// Request cancellation of every job holding this token.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
            || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }
}
