//! VMX bring-up
//!
//! Decides whether the current core can enter VMX operations and computes the control values to
//! program into the VMCS. Everything is read through [`HardwareAccess`], nothing is written: the
//! caller decides what to do with the outcome.
#![cfg_attr(not(test), no_std)]

pub mod bitmaps;
pub mod caps;
pub mod check;
pub mod controls;
pub mod errors;
#[cfg(any(test, feature = "fake-hardware"))]
pub mod fake;
pub mod hw;
pub mod msr;
pub mod readiness;
pub mod resolve;

#[cfg(test)]
mod tests;

pub use crate::caps::{
    CapabilityMask, CapabilityOrigin, CapabilitySource, ControlRegister, VmxBasicInfo,
};
pub use crate::check::{check_control, check_controls};
pub use crate::controls::{
    BuildFailure, BuildState, ControlSetBuilder, DesiredControls, ResolvedControl, VmxControls,
};
pub use crate::errors::{
    CpuFeature, EferFlag, FailureClass, ReadinessFailure, VmxError, VmxFieldError,
};
#[cfg(target_arch = "x86_64")]
pub use crate::hw::Platform;
pub use crate::hw::{CpuidResult, HardwareAccess};
pub use crate::readiness::{
    CheckName, CheckResult, ReadinessConfig, ReadinessMode, ReadinessOutcome, ReadinessValidator,
    VendorSignature,
};
pub use crate::resolve::{
    resolve, resolve_mask, Conflict, ConflictReason, Conflicts, ControlResolution,
    DesiredFeatureSet,
};
