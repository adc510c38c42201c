//! Software implementation of VMX control checks
//!
//! Verifies resolved control values against the capabilities of the current core, along with
//! some of the checks done by the VMX extension on VM entries (Intel SDM Vol 3C Section 26.2.1).
//! It is intended as a tool for development and debugging: resolved values are always legal, a
//! failure here means the capabilities changed under our feet or the values were tampered with.

use crate::bitmaps::{EntryControls, ExitControls, PinbasedControls};
use crate::caps::{CapabilityMask, CapabilitySource, ControlRegister, ACTIVATE_SECONDARY_CONTROLS};
use crate::controls::VmxControls;
use crate::errors::{VmxError, VmxFieldError};
use crate::hw::HardwareAccess;

// ———————————————————————— Main Checking Functions ————————————————————————— //

/// Checks a set of resolved controls against the capabilities of the current core.
pub fn check_controls<H: HardwareAccess>(
    caps: &CapabilitySource<H>,
    controls: &VmxControls,
) -> Result<(), VmxError> {
    for register in ControlRegister::ALL {
        let resolved = match controls.get(register) {
            Some(resolved) => resolved,
            None => continue,
        };
        if register == ControlRegister::Secondary {
            check_secondary_activation(caps, controls)?;
        }
        let (mask, _) = caps.mask(register, resolved.origin);
        check_control(register, resolved.value, mask)?;
    }

    check_exec_ctrl_fields(controls)
}

/// Checks a single control value against its allowed settings.
pub fn check_control(
    register: ControlRegister,
    value: u32,
    mask: CapabilityMask,
) -> Result<(), VmxError> {
    validate_ctls(value, mask).map_err(|err| err.set_field(VmxFieldError::from(register)))
}

/// The secondary controls are only meaningful if activated and supported.
fn check_secondary_activation<H: HardwareAccess>(
    caps: &CapabilitySource<H>,
    controls: &VmxControls,
) -> Result<(), VmxError> {
    if controls.primary.value & ACTIVATE_SECONDARY_CONTROLS == 0 {
        return Err(VmxError::Disallowed0(VmxFieldError::PrimaryControls, 31));
    }
    if !caps.secondary_controls_available() {
        return Err(VmxError::Disallowed1(VmxFieldError::SecondaryControls, 31));
    }
    Ok(())
}

/// Performs some of the checks on execution control fields (section 26.2.1).
fn check_exec_ctrl_fields(controls: &VmxControls) -> Result<(), VmxError> {
    let pin_ctrls = PinbasedControls::from_bits_truncate(controls.pinbased.value);
    let exit_ctrls = ExitControls::from_bits_truncate(controls.exit.value);
    let entry_ctrls = EntryControls::from_bits_truncate(controls.entry.value);

    // VM-Exit Control Fields, section 26.2.1.2
    if !pin_ctrls.contains(PinbasedControls::VMX_PREEMPTION_TIMER)
        && exit_ctrls.contains(ExitControls::SAVE_VMX_PREEMPTION_TIMER)
    {
        return Err(VmxError::Disallowed1(VmxFieldError::ExitControls, 22));
    }

    // VM-Entry Control Fields, section 26.2.1.3
    if entry_ctrls.contains(EntryControls::ENTRY_TO_SMM) {
        return Err(VmxError::Disallowed1(VmxFieldError::EntryControls, 10));
    }
    if entry_ctrls.contains(EntryControls::DEACTIVATE_DUAL_MONITOR) {
        return Err(VmxError::Disallowed1(VmxFieldError::EntryControls, 11));
    }
    Ok(())
}

// ———————————————————————————— Helper Functions ———————————————————————————— //

/// Validates a control value against its allowed settings.
///
/// See Intel SDM Vol 3D Appendix A.3.
fn validate_ctls(value: u32, mask: CapabilityMask) -> Result<(), VmxError> {
    let must_be_one = mask.mandatory_ones() & !value;
    if must_be_one != 0 {
        let idx = must_be_one.trailing_zeros() as u8;
        return Err(VmxError::Disallowed0(VmxFieldError::Unknown, idx));
    }

    let must_be_zero = !mask.allowed1 & value;
    if must_be_zero != 0 {
        let idx = must_be_zero.trailing_zeros() as u8;
        return Err(VmxError::Disallowed1(VmxFieldError::Unknown, idx));
    }

    Ok(())
}

// ————————————————————————————————— Tests —————————————————————————————————— //
