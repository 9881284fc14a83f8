//! Provisional identifiers
//!
//! Locally created entities get a millisecond timestamp as their id until the
//! backend assigns a real one. Two calls in the same millisecond still get
//! distinct values.

use crate::config::PROVISIONAL_ID_FLOOR;
use crate::database::EntityId;
use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Strictly increasing, clock-derived id source
#[derive(Debug, Default)]
pub struct ProvisionalIds {
    last: AtomicI64,
}

impl ProvisionalIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> EntityId {
        let now = Utc::now().timestamp_millis();
        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);

        now.max(previous + 1)
    }
}

/// True for ids handed out by [`ProvisionalIds`] and not yet reconciled
pub fn is_provisional(id: EntityId) -> bool {
    id >= PROVISIONAL_ID_FLOOR
}
