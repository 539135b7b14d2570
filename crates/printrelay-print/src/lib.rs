// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printrelay Print — the device side: raw TCP and print-queue drivers, the
// registry that selects between them, and ZPL auto-configuration.

pub mod driver;
pub mod ipp_client;
pub mod lp_client;
pub mod raw_client;
pub mod zpl;

pub use driver::{Capability, Driver, DriverRegistry, DriverSettings, DriverSource, PrinterDriver};
pub use zpl::{AutoConfigProbe, PrinterInfo, PrinterInfoCache, ZplSetup};
