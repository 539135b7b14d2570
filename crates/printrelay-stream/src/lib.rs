// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printrelay Stream — the event-bus side: Pub/Sub wire messages, the gRPC
// transport, Avro decoding, the flow-controlled subscription engine and the
// reconnect supervisor wrapped around it.

pub mod decode;
pub mod engine;
pub mod proto;
pub mod retry;
pub mod transport;

pub use engine::{EngineOptions, EventHandler, StopHandle, SubscriptionEngine, SubscriptionState};
pub use proto::ReplayFrom;
pub use retry::{ReconnectPolicy, Supervisor};
pub use transport::{GrpcTransport, PubSubTransport, install_crypto_provider};
