//! VMX readiness
//!
//! An ordered list of checks that must all pass before the current core can enter VMX
//! operations. Checks only read processor state, they never try to fix what they find: a
//! failure is terminal for the core.

use crate::caps::CapabilitySource;
use crate::errors::{CpuFeature, EferFlag, ReadinessFailure};
use crate::hw::{
    HardwareAccess, CPUID_EAX_XSAVES_MASK, CPUID_ECX_VMX_MASK, CPUID_ECX_XSAVE_MASK,
    CPUID_LEAF_EXTENDED_STATE, CPUID_LEAF_FEATURES, CPUID_LEAF_VENDOR,
};
use crate::msr;

/// Number of readiness checks.
pub const CHECK_COUNT: usize = 6;

// —————————————————————————————— Configuration ——————————————————————————————— //

/// The vendor string returned by CPUID leaf 0, split across registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VendorSignature {
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

impl VendorSignature {
    /// "GenuineIntel"
    pub const INTEL: VendorSignature = VendorSignature::from_bytes(b"GenuineIntel");

    /// Builds a signature from its 12 characters, in EBX, EDX, ECX order.
    pub const fn from_bytes(vendor: &[u8; 12]) -> Self {
        const fn word(bytes: &[u8; 12], start: usize) -> u32 {
            u32::from_le_bytes([
                bytes[start],
                bytes[start + 1],
                bytes[start + 2],
                bytes[start + 3],
            ])
        }

        Self {
            ebx: word(vendor, 0),
            edx: word(vendor, 4),
            ecx: word(vendor, 8),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessConfig {
    /// Expected processor vendor.
    pub vendor: VendorSignature,
    /// Size in bytes of the buffer the hypervisor saves the extended state into.
    pub xsave_area_limit: u32,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            vendor: VendorSignature::INTEL,
            xsave_area_limit: 0x1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessMode {
    /// Stop at the first failing check.
    ShortCircuit,
    /// Run every check and report every failure.
    Accumulate,
}

// ————————————————————————————————— Outcome —————————————————————————————————— //

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckName {
    Vendor,
    Feature,
    ExtendedState,
    Lock,
    Capability,
    LongMode,
}

impl CheckName {
    pub const fn as_str(self) -> &'static str {
        match self {
            CheckName::Vendor => "VendorCheck",
            CheckName::Feature => "FeatureCheck",
            CheckName::ExtendedState => "ExtendedStateCheck",
            CheckName::Lock => "LockCheck",
            CheckName::Capability => "CapabilityCheck",
            CheckName::LongMode => "LongModeCheck",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckResult {
    pub name: CheckName,
    pub passed: bool,
    /// The reason of the failure, `None` if the check passed.
    pub diagnostic: Option<ReadinessFailure>,
}

/// The results of the checks that ran, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessOutcome {
    mode: ReadinessMode,
    results: [Option<CheckResult>; CHECK_COUNT],
}

impl ReadinessOutcome {
    fn new(mode: ReadinessMode) -> Self {
        Self {
            mode,
            results: [None; CHECK_COUNT],
        }
    }

    fn push(&mut self, result: CheckResult) {
        if let Some(slot) = self.results.iter_mut().find(|slot| slot.is_none()) {
            *slot = Some(result);
        }
    }

    pub fn mode(&self) -> ReadinessMode {
        self.mode
    }

    /// The overall verdict: true only if every check ran and passed.
    pub fn passed(&self) -> bool {
        self.results
            .iter()
            .all(|result| matches!(result, Some(CheckResult { passed: true, .. })))
    }

    /// Results of the checks that were executed.
    pub fn results(&self) -> impl Iterator<Item = &CheckResult> + '_ {
        self.results.iter().flatten()
    }

    pub fn executed(&self) -> usize {
        self.results().count()
    }

    pub fn failures(&self) -> impl Iterator<Item = ReadinessFailure> + '_ {
        self.results().filter_map(|result| result.diagnostic)
    }

    pub fn first_failure(&self) -> Option<ReadinessFailure> {
        self.failures().next()
    }

    pub fn result(&self, name: CheckName) -> Option<&CheckResult> {
        self.results().find(|result| result.name == name)
    }
}

// ———————————————————————————————— Validator ————————————————————————————————— //

/// State shared by the checks.
pub struct CheckContext<'a, H: HardwareAccess> {
    pub caps: &'a CapabilitySource<'a, H>,
    pub config: &'a ReadinessConfig,
}

type Check<H> = for<'a> fn(&CheckContext<'a, H>) -> Result<(), ReadinessFailure>;

/// The checks, in execution order. Each check may assume the previous ones passed.
fn checks<H: HardwareAccess>() -> [(CheckName, Check<H>); CHECK_COUNT] {
    [
        (CheckName::Vendor, check_vendor::<H> as Check<H>),
        (CheckName::Feature, check_features::<H> as Check<H>),
        (CheckName::ExtendedState, check_extended_state::<H> as Check<H>),
        (CheckName::Lock, check_feature_control::<H> as Check<H>),
        (CheckName::Capability, check_vmx_basic::<H> as Check<H>),
        (CheckName::LongMode, check_long_mode::<H> as Check<H>),
    ]
}

pub struct ReadinessValidator<'hw, H: HardwareAccess> {
    caps: CapabilitySource<'hw, H>,
    config: ReadinessConfig,
}

impl<'hw, H: HardwareAccess> ReadinessValidator<'hw, H> {
    pub fn new(hw: &'hw H, config: ReadinessConfig) -> Self {
        Self {
            caps: CapabilitySource::new(hw),
            config,
        }
    }

    /// Runs the checks on the current core.
    pub fn validate(&self, mode: ReadinessMode) -> ReadinessOutcome {
        let context = CheckContext {
            caps: &self.caps,
            config: &self.config,
        };
        let mut outcome = ReadinessOutcome::new(mode);

        for (name, check) in checks::<H>() {
            let diagnostic = check(&context).err();
            let passed = diagnostic.is_none();
            match diagnostic {
                None => log::trace!("{}: passed", name.as_str()),
                Some(failure) => log::debug!("{}: {}", name.as_str(), failure),
            }
            outcome.push(CheckResult {
                name,
                passed,
                diagnostic,
            });

            if !passed && mode == ReadinessMode::ShortCircuit {
                break;
            }
        }

        outcome
    }
}

// —————————————————————————————————— Checks —————————————————————————————————— //

fn check_vendor<H: HardwareAccess>(ctx: &CheckContext<H>) -> Result<(), ReadinessFailure> {
    let vendor = ctx.caps.cpuid(CPUID_LEAF_VENDOR, 0);
    let expected = ctx.config.vendor;
    if vendor.ebx != expected.ebx || vendor.ecx != expected.ecx || vendor.edx != expected.edx {
        return Err(ReadinessFailure::WrongVendor {
            ebx: vendor.ebx,
            ecx: vendor.ecx,
            edx: vendor.edx,
        });
    }
    Ok(())
}

fn check_features<H: HardwareAccess>(ctx: &CheckContext<H>) -> Result<(), ReadinessFailure> {
    let features = ctx.caps.cpuid(CPUID_LEAF_FEATURES, 0);
    if features.ecx & CPUID_ECX_VMX_MASK == 0 {
        return Err(ReadinessFailure::MissingFeature {
            flag: CpuFeature::Vmx,
        });
    }
    if features.ecx & CPUID_ECX_XSAVE_MASK == 0 {
        return Err(ReadinessFailure::MissingFeature {
            flag: CpuFeature::Xsave,
        });
    }
    Ok(())
}

/// See Intel SDM Vol. 1 Section 13.2.
fn check_extended_state<H: HardwareAccess>(
    ctx: &CheckContext<H>,
) -> Result<(), ReadinessFailure> {
    // Subleaf 0: ECX is the size of the XSAVE area for every component supported in XCR0, EDX
    // the supported bits 63:32 of XCR0.
    let xcr0 = ctx.caps.cpuid(CPUID_LEAF_EXTENDED_STATE, 0);
    if xcr0.ecx > ctx.config.xsave_area_limit {
        return Err(ReadinessFailure::StateAreaTooLarge { size: xcr0.ecx });
    }
    if xcr0.edx != 0 {
        return Err(ReadinessFailure::UnsupportedStateBits {
            subleaf: 0,
            edx: xcr0.edx,
        });
    }

    // Subleaf 1: EAX reports XSAVES, EDX the supported bits 63:32 of IA32_XSS.
    let xss = ctx.caps.cpuid(CPUID_LEAF_EXTENDED_STATE, 1);
    if xss.eax & CPUID_EAX_XSAVES_MASK == 0 {
        return Err(ReadinessFailure::MissingFeature {
            flag: CpuFeature::Xsaves,
        });
    }
    if xss.edx != 0 {
        return Err(ReadinessFailure::UnsupportedStateBits {
            subleaf: 1,
            edx: xss.edx,
        });
    }
    Ok(())
}

/// See Intel SDM Vol. 3C Section 23.7.
fn check_feature_control<H: HardwareAccess>(
    ctx: &CheckContext<H>,
) -> Result<(), ReadinessFailure> {
    let feature_control = ctx.caps.feature_control();
    if feature_control & msr::FEATURE_CONTROL_VMX_OUTSIDE_SMX == 0 {
        return Err(ReadinessFailure::VmxDisabledByFirmware {
            msr: feature_control,
        });
    }
    Ok(())
}

fn check_vmx_basic<H: HardwareAccess>(ctx: &CheckContext<H>) -> Result<(), ReadinessFailure> {
    let info = ctx.caps.basic();
    if info.physical_address_width_32 {
        return Err(ReadinessFailure::PhysicalAddressWidthRestricted { msr: info.raw });
    }
    if !info.write_back() {
        return Err(ReadinessFailure::UnsupportedMemoryType { msr: info.raw });
    }
    if !info.support_true_ctls {
        return Err(ReadinessFailure::MissingTrueControls { msr: info.raw });
    }
    Ok(())
}

fn check_long_mode<H: HardwareAccess>(ctx: &CheckContext<H>) -> Result<(), ReadinessFailure> {
    const REQUIRED: [(u64, EferFlag); 4] = [
        (msr::EFER_NXE, EferFlag::Nxe),
        (msr::EFER_LMA, EferFlag::Lma),
        (msr::EFER_LME, EferFlag::Lme),
        (msr::EFER_SCE, EferFlag::Sce),
    ];

    let efer = ctx.caps.efer();
    for (mask, flag) in REQUIRED {
        if efer & mask == 0 {
            return Err(ReadinessFailure::MissingEferBit { flag, efer });
        }
    }
    Ok(())
}

// ————————————————————————————————— Tests —————————————————————————————————— //
