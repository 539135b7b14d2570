// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Duplicate-delivery suppression keyed by correlation id.
//
// The set is bounded; when full it is cleared outright before the new id is
// recorded.  A cleared id may be printed again if redelivered.

use std::collections::HashSet;
use std::sync::Mutex;

use tracing::{debug, warn};

/// Upper bound on remembered correlation ids.
pub const MAX_TRACKED_IDS: usize = 10_000;

#[derive(Debug)]
pub struct IdempotencyGuard {
    seen: Mutex<HashSet<String>>,
    capacity: usize,
}

impl Default for IdempotencyGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl IdempotencyGuard {
    pub fn new() -> Self {
        Self::with_capacity(MAX_TRACKED_IDS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            seen: Mutex::new(HashSet::new()),
            capacity: capacity.max(1),
        }
    }

    /// Returns `true` if `correlation_id` was already seen.  Otherwise records
    /// it and returns `false`.  Empty ids are never tracked.
    pub fn check_and_record(&self, correlation_id: &str) -> bool {
        if correlation_id.is_empty() {
            return false;
        }
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        if seen.contains(correlation_id) {
            debug!(correlation_id, "duplicate delivery");
            return true;
        }
        if seen.len() >= self.capacity {
            warn!(capacity = self.capacity, "idempotency set full, clearing");
            seen.clear();
        }
        seen.insert(correlation_id.to_string());
        false
    }

    pub fn contains(&self, correlation_id: &str) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(correlation_id)
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}
