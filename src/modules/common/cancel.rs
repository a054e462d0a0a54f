// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{
    modules::error::{code::ErrorCode, PostroomResult},
    raise_error,
};

/// Cooperative cancellation for long-running passes. Observers check
/// between batches, so already-committed work is never rolled back: the
/// store is left in a committed-prefix state.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> PostroomResult<()> {
        if self.is_cancelled() {
            return Err(raise_error!(
                "Operation cancelled".into(),
                ErrorCode::Cancelled
            ));
        }
        Ok(())
    }
}
