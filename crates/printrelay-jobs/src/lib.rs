// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printrelay Jobs — turns print-job events into printer output.

pub mod content;
pub mod idempotency;
pub mod processor;

pub use content::{ContentResolver, HttpAuth, decode_base64};
pub use idempotency::IdempotencyGuard;
pub use processor::JobProcessor;
