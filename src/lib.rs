//! VT-x bring-up
//!
//! Gates entry into VMX operations on every core: checks that the processor and its firmware
//! configuration can run the hypervisor, then resolves the VMX controls against the capabilities
//! reported by the core. The outcome of all cores is turned into a single QEMU exit status.
#![cfg_attr(not(test), no_std)]

pub mod bringup;
pub mod config;
pub mod report;

#[cfg(test)]
mod tests;

pub use vmx;

#[cfg(target_arch = "x86_64")]
pub use crate::bringup::bringup_current_core;
pub use crate::bringup::{bringup_core, BringupError};
pub use crate::config::BringupConfig;
pub use crate::report::{BringupReport, CoreStatus, MAX_CPU_NUM, REPORT};

/// Installs the logger and sets the cores expected in the report, must be called once before
/// bringing up the first core.
pub fn init(config: &BringupConfig) {
    logger::init(config.log_level);
    REPORT.lock().expect_cores(config.cores);
}
