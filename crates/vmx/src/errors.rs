//! VMX Errors

use core::fmt;

use crate::caps::ControlRegister;

// ——————————————————————————————— Field Errors ——————————————————————————————— //

/// An error found while verifying a control value.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum VmxError {
    /// Value 1 is not supported for one of the configuration bits for which it was requested.
    Disallowed1(VmxFieldError, u8),

    /// Value 0 is not supported for one of the configuration bits for which it was requested.
    Disallowed0(VmxFieldError, u8),
}

impl VmxError {
    /// Override the faulty VMX field.
    pub(crate) fn set_field(self, field: VmxFieldError) -> Self {
        match self {
            Self::Disallowed0(_, idx) => Self::Disallowed0(field, idx),
            Self::Disallowed1(_, idx) => Self::Disallowed1(field, idx),
        }
    }
}

impl fmt::Display for VmxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disallowed0(field, idx) => write!(f, "{:?}: bit {} can't be 0", field, idx),
            Self::Disallowed1(field, idx) => write!(f, "{:?}: bit {} can't be 1", field, idx),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum VmxFieldError {
    PinBasedControls,
    PrimaryControls,
    SecondaryControls,
    ExitControls,
    EntryControls,
    Unknown,
}

impl From<ControlRegister> for VmxFieldError {
    fn from(register: ControlRegister) -> Self {
        match register {
            ControlRegister::Pinbased => Self::PinBasedControls,
            ControlRegister::Primary => Self::PrimaryControls,
            ControlRegister::Secondary => Self::SecondaryControls,
            ControlRegister::Exit => Self::ExitControls,
            ControlRegister::Entry => Self::EntryControls,
        }
    }
}

// ———————————————————————————— Readiness Failures ———————————————————————————— //

/// CPU features required before entering VMX operations.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CpuFeature {
    /// CPUID.1:ECX.VMX[bit 5].
    Vmx,
    /// CPUID.1:ECX.XSAVE[bit 26].
    Xsave,
    /// CPUID.(EAX=0xD,ECX=1):EAX.XSAVES[bit 3].
    Xsaves,
}

/// IA32_EFER bits required before entering VMX operations.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum EferFlag {
    /// No-execute enable.
    Nxe,
    /// Long mode active.
    Lma,
    /// Long mode enable.
    Lme,
    /// SYSCALL enable.
    Sce,
}

/// The broad kind of a readiness failure, which dictates the remedy.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum FailureClass {
    /// The processor can't run the hypervisor.
    HardwareMismatch,
    /// The processor can, but firmware configuration prevents it.
    FirmwarePolicy,
    /// The requested controls are incompatible with the processor.
    CapabilityConflict,
}

/// A reason for the current core not to be ready for VMX operations.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ReadinessFailure {
    /// CPUID leaf 0 returned an unexpected vendor signature.
    WrongVendor { ebx: u32, ecx: u32, edx: u32 },

    /// A required CPU feature is not reported.
    MissingFeature { flag: CpuFeature },

    /// The XSAVE area doesn't fit in the hypervisor's save buffer.
    StateAreaTooLarge { size: u32 },

    /// Upper 32 bits of XCR0 (subleaf 0) or IA32_XSS (subleaf 1) are reported as supported.
    UnsupportedStateBits { subleaf: u32, edx: u32 },

    /// IA32_FEATURE_CONTROL doesn't allow VMXON outside SMX operation.
    VmxDisabledByFirmware { msr: u64 },

    /// IA32_VMX_BASIC restricts VMX structures to 32 bits physical addresses.
    PhysicalAddressWidthRestricted { msr: u64 },

    /// IA32_VMX_BASIC reports a memory type other than write-back.
    UnsupportedMemoryType { msr: u64 },

    /// IA32_VMX_BASIC doesn't report the TRUE capability MSRs.
    MissingTrueControls { msr: u64 },

    /// A required IA32_EFER bit is cleared.
    MissingEferBit { flag: EferFlag, efer: u64 },
}

impl ReadinessFailure {
    pub const fn class(&self) -> FailureClass {
        match self {
            Self::VmxDisabledByFirmware { .. } => FailureClass::FirmwarePolicy,
            _ => FailureClass::HardwareMismatch,
        }
    }
}

impl fmt::Display for ReadinessFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongVendor { ebx, ecx, edx } => write!(
                f,
                "wrong vendor (ebx=0x{:08x}, ecx=0x{:08x}, edx=0x{:08x})",
                ebx, ecx, edx
            ),
            Self::MissingFeature { flag } => write!(f, "missing CPU feature {:?}", flag),
            Self::StateAreaTooLarge { size } => {
                write!(f, "XSAVE area of {} bytes is too large", size)
            }
            Self::UnsupportedStateBits { subleaf, edx } => write!(
                f,
                "unsupported extended state bits (subleaf {}, edx=0x{:08x})",
                subleaf, edx
            ),
            Self::VmxDisabledByFirmware { msr } => write!(
                f,
                "VMX disabled by firmware (IA32_FEATURE_CONTROL=0x{:x})",
                msr
            ),
            Self::PhysicalAddressWidthRestricted { msr } => write!(
                f,
                "VMX physical address width restricted (IA32_VMX_BASIC=0x{:x})",
                msr
            ),
            Self::UnsupportedMemoryType { msr } => write!(
                f,
                "VMX memory type is not write-back (IA32_VMX_BASIC=0x{:x})",
                msr
            ),
            Self::MissingTrueControls { msr } => write!(
                f,
                "TRUE controls not supported (IA32_VMX_BASIC=0x{:x})",
                msr
            ),
            Self::MissingEferBit { flag, efer } => {
                write!(f, "missing EFER bit {:?} (IA32_EFER=0x{:x})", flag, efer)
            }
        }
    }
}

// ————————————————————————————————— Tests —————————————————————————————————— //
