// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printrelay — Core types, error definitions, configuration, and the
// credential/config seams shared across all crates.

pub mod config;
pub mod error;
pub mod session;
pub mod types;

pub use config::{AppConfig, ConfigSource};
pub use error::{ErrorClass, RelayError, Result, classify_error};
pub use session::{Session, StaticTokenProvider, TokenProvider, redact_token};
pub use types::*;
