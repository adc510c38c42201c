//! Per-core bring-up
//!
//! Runs the readiness checks, resolves the VMX controls and optionally verifies them, logging
//! every step. Each core must go through this on its own: capabilities are never shared across
//! cores.

use core::fmt;

use vmx::{
    check_controls, BuildFailure, CapabilitySource, ControlSetBuilder, HardwareAccess,
    ReadinessOutcome, ReadinessValidator, VmxControls, VmxError,
};

use crate::config::BringupConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringupError {
    /// At least one readiness check failed.
    NotReady(ReadinessOutcome),
    /// The desired controls can't be honored by this core.
    Conflict(BuildFailure),
    /// The resolved controls didn't pass verification.
    Verification(VmxError),
}

impl fmt::Display for BringupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BringupError::NotReady(outcome) => match outcome.first_failure() {
                Some(failure) => write!(f, "not ready: {}", failure),
                None => write!(f, "not ready"),
            },
            BringupError::Conflict(failure) => write!(f, "control conflict: {}", failure),
            BringupError::Verification(err) => write!(f, "verification failed: {}", err),
        }
    }
}

/// Brings up VMX on the core described by `hw`.
pub fn bringup_core<H: HardwareAccess>(
    hw: &H,
    core_id: usize,
    config: &BringupConfig,
) -> Result<VmxControls, BringupError> {
    log::info!("CPU {}: VMX bring-up", core_id);

    let outcome = ReadinessValidator::new(hw, config.readiness).validate(config.mode);
    for result in outcome.results() {
        match result.diagnostic {
            None => log::debug!("CPU {}: {} passed", core_id, result.name.as_str()),
            Some(failure) => log::error!(
                "CPU {}: {} failed ({:?}): {}",
                core_id,
                result.name.as_str(),
                failure.class(),
                failure
            ),
        }
    }
    if !outcome.passed() {
        return Err(BringupError::NotReady(outcome));
    }

    let caps = CapabilitySource::new(hw);
    let controls = match ControlSetBuilder::new(&caps).build(&config.desired) {
        Ok(controls) => controls,
        Err(failure) => {
            log_conflicts(core_id, &failure);
            return Err(BringupError::Conflict(failure));
        }
    };
    log_controls(core_id, &controls);

    if config.verify_controls {
        if let Err(err) = check_controls(&caps, &controls) {
            log::error!("CPU {}: invalid controls: {}", core_id, err);
            return Err(BringupError::Verification(err));
        }
        log::debug!("CPU {}: controls verified", core_id);
    }

    Ok(controls)
}

fn log_conflicts(core_id: usize, failure: &BuildFailure) {
    log::error!(
        "CPU {}: {} can't be configured ({:?} capabilities, resolved 0x{:08x})",
        core_id,
        failure.register,
        failure.origin,
        failure.resolution.resolved_value
    );
    for conflict in failure.resolution.conflicts.iter() {
        log::error!("CPU {}:   {}", core_id, conflict);
    }
}

fn log_controls(core_id: usize, controls: &VmxControls) {
    for register in vmx::ControlRegister::ALL {
        match controls.get(register) {
            Some(resolved) => log::info!(
                "CPU {}: {}: 0x{:08x} ({:?})",
                core_id,
                register,
                resolved.value,
                resolved.origin
            ),
            None => log::info!("CPU {}: {}: not activated", core_id, register),
        }
    }
}

/// Brings up VMX on the current core and records the outcome in the global report.
///
/// ## Safety
///
/// Must run in ring 0 on the core identified by `core_id`.
#[cfg(target_arch = "x86_64")]
pub unsafe fn bringup_current_core(
    core_id: usize,
    config: &BringupConfig,
) -> Result<VmxControls, BringupError> {
    let hw = vmx::Platform::new();
    let result = bringup_core(&hw, core_id, config);
    crate::report::REPORT.lock().record_result(core_id, &result);
    result
}
