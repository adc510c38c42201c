//! VMX capabilities
//!
//! Reads the capability-report MSRs of the current core. Nothing is cached: every query hits the
//! hardware, so that values from one core are never reused on another one.

use core::fmt;

use crate::hw::{CpuidResult, HardwareAccess};
use crate::msr::{self, basic, Msr};

/// Mask for keeping only the 32 lower bits.
const LOW_32_BITS_MASK: u64 = (1 << 32) - 1;

/// Bit of the primary processor-based controls activating the secondary controls.
pub const ACTIVATE_SECONDARY_CONTROLS: u32 = 1 << 31;

// ————————————————————————————— Capability Mask —————————————————————————————— //

/// The allowed settings of a control register, as reported by its capability MSR.
///
/// Bit `i` of `allowed0` is set if control bit `i` may be 0, bit `i` of `allowed1` is set if it
/// may be 1.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityMask {
    pub allowed0: u32,
    pub allowed1: u32,
}

impl CapabilityMask {
    /// The allowed settings of a register without capability MSR: every bit must be 0.
    pub const UNSUPPORTED: Self = Self {
        allowed0: u32::MAX,
        allowed1: 0,
    };

    /// Decodes a capability MSR.
    ///
    /// In the raw MSR a set bit in the low half forbids the 0-setting of that control, hence
    /// the inversion. The high half lists the allowed 1-settings as is.
    pub const fn from_msr(raw: u64) -> Self {
        Self {
            allowed0: !((raw & LOW_32_BITS_MASK) as u32),
            allowed1: (raw >> 32) as u32,
        }
    }

    /// Bits the hardware forces to 1.
    pub const fn mandatory_ones(&self) -> u32 {
        !self.allowed0 & self.allowed1
    }

    /// Bits the hardware forces to 0.
    pub const fn mandatory_zeros(&self) -> u32 {
        !self.allowed1
    }

    /// Bits that can be freely chosen.
    pub const fn flexible(&self) -> u32 {
        self.allowed0 & self.allowed1
    }

    /// Bits reported as neither allowed to be 0 nor allowed to be 1.
    pub const fn anomalies(&self) -> u32 {
        !self.allowed0 & !self.allowed1
    }

    /// Returns true if the hardware accepts `value`.
    pub const fn permits(&self, value: u32) -> bool {
        value & self.mandatory_ones() == self.mandatory_ones() && value & !self.allowed1 == 0
    }
}

// ————————————————————————————— Control Registers ———————————————————————————— //

/// The VMX control registers configured during bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRegister {
    Pinbased,
    Primary,
    Secondary,
    Exit,
    Entry,
}

impl ControlRegister {
    pub const ALL: [ControlRegister; 5] = [
        ControlRegister::Pinbased,
        ControlRegister::Primary,
        ControlRegister::Secondary,
        ControlRegister::Exit,
        ControlRegister::Entry,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            ControlRegister::Pinbased => "pin-based controls",
            ControlRegister::Primary => "primary processor-based controls",
            ControlRegister::Secondary => "secondary processor-based controls",
            ControlRegister::Exit => "VM-exit controls",
            ControlRegister::Entry => "VM-entry controls",
        }
    }

    /// The capability MSR available on every VMX capable processor.
    pub const fn legacy_msr(self) -> Msr {
        match self {
            ControlRegister::Pinbased => msr::VMX_PINBASED_CTLS,
            ControlRegister::Primary => msr::VMX_PROCBASED_CTLS,
            ControlRegister::Secondary => msr::VMX_PROCBASED_CTLS2,
            ControlRegister::Exit => msr::VMX_EXIT_CTLS,
            ControlRegister::Entry => msr::VMX_ENTRY_CTLS,
        }
    }

    /// The TRUE capability MSR, the secondary controls have none.
    pub const fn true_msr(self) -> Option<Msr> {
        match self {
            ControlRegister::Pinbased => Some(msr::VMX_TRUE_PINBASED_CTLS),
            ControlRegister::Primary => Some(msr::VMX_TRUE_PROCBASED_CTLS),
            ControlRegister::Secondary => None,
            ControlRegister::Exit => Some(msr::VMX_TRUE_EXIT_CTLS),
            ControlRegister::Entry => Some(msr::VMX_TRUE_ENTRY_CTLS),
        }
    }
}

impl fmt::Display for ControlRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which capability MSR a mask has been read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityOrigin {
    /// IA32_VMX_TRUE_*_CTLS.
    True,
    /// IA32_VMX_*_CTLS.
    Legacy,
}

// ———————————————————————————— Basic VMX Information ——————————————————————————— //

/// Basic VMX Information.
///
/// See Intel SDM Vol. 3D Appendix A-1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VmxBasicInfo {
    /// The raw IA32_VMX_BASIC value.
    pub raw: u64,

    /// The 31-bits VMCS revision identifier used by the CPU.
    pub revision: u32,

    /// Minimum required size in bytes for VMCS and VMXON regions.
    pub vmcs_width: u32,

    /// Physical addresses of VMX structures are limited to 32 bits.
    pub physical_address_width_32: bool,

    /// Memory type the processor uses to access VMX structures.
    pub memory_type: u8,

    /// Support the VMX_TRUE_CTLS registers.
    pub support_true_ctls: bool,
}

impl VmxBasicInfo {
    pub const fn from_raw(raw: u64) -> Self {
        Self {
            raw,
            revision: basic::REVISION.get(raw) as u32,
            vmcs_width: basic::REGION_SIZE.get(raw) as u32,
            physical_address_width_32: basic::PHYSICAL_ADDRESS_WIDTH.is_set(raw),
            memory_type: basic::MEMORY_TYPE.get(raw) as u8,
            support_true_ctls: basic::TRUE_CONTROLS.is_set(raw),
        }
    }

    /// Returns true if VMX structures are accessed with the write-back memory type.
    pub const fn write_back(&self) -> bool {
        self.memory_type as u64 == basic::MEMORY_TYPE_WRITE_BACK
    }
}

// ————————————————————————————— Capability Source ———————————————————————————— //

/// Reads the capabilities of the current core.
pub struct CapabilitySource<'hw, H: HardwareAccess> {
    hw: &'hw H,
}

impl<'hw, H: HardwareAccess> CapabilitySource<'hw, H> {
    pub fn new(hw: &'hw H) -> Self {
        Self { hw }
    }

    /// Returns basic info about VMX CPU-defined structures.
    pub fn basic(&self) -> VmxBasicInfo {
        VmxBasicInfo::from_raw(self.hw.read_msr(msr::VMX_BASIC))
    }

    /// Reads the allowed settings of a control register from the requested capability MSR.
    ///
    /// The secondary controls have no TRUE capability MSR, their legacy MSR is read whatever the
    /// requested origin is.
    pub fn mask(
        &self,
        register: ControlRegister,
        origin: CapabilityOrigin,
    ) -> (CapabilityMask, CapabilityOrigin) {
        let (msr, origin) = match (origin, register.true_msr()) {
            (CapabilityOrigin::True, Some(true_msr)) => (true_msr, CapabilityOrigin::True),
            _ => (register.legacy_msr(), CapabilityOrigin::Legacy),
        };
        let raw = self.hw.read_msr(msr);
        log::trace!("{} capabilities ({:?}): 0x{:016x}", register, origin, raw);
        (CapabilityMask::from_msr(raw), origin)
    }

    /// Reads the allowed settings of a control register, using the TRUE capability MSR when
    /// `use_true` is set.
    pub fn preferred_mask(
        &self,
        register: ControlRegister,
        use_true: bool,
    ) -> (CapabilityMask, CapabilityOrigin) {
        let origin = if use_true {
            CapabilityOrigin::True
        } else {
            CapabilityOrigin::Legacy
        };
        self.mask(register, origin)
    }

    /// Returns true if the IA32_VMX_PROCBASED_CTLS2 MSR exists.
    pub fn secondary_controls_available(&self) -> bool {
        let (primary, _) = self.mask(ControlRegister::Primary, CapabilityOrigin::Legacy);
        primary.allowed1 & ACTIVATE_SECONDARY_CONTROLS != 0
    }

    /// The raw IA32_FEATURE_CONTROL value.
    pub fn feature_control(&self) -> u64 {
        self.hw.read_msr(msr::FEATURE_CONTROL)
    }

    /// The raw IA32_EFER value.
    pub fn efer(&self) -> u64 {
        self.hw.read_msr(msr::IA32_EFER)
    }

    pub fn cpuid(&self, leaf: u32, subleaf: u32) -> CpuidResult {
        self.hw.cpuid(leaf, subleaf)
    }
}

// ————————————————————————————————— Tests —————————————————————————————————— //
