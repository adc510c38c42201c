//! VMX Model Specific Registers
//!
//! The model specific registers read during VMX bring-up, together with the layout of the bits
//! the readiness checks care about.

#[cfg(target_arch = "x86_64")]
use core::arch::asm;

use crate::resolve::BitField;

// ——————————————————————————————— Known MSRs ——————————————————————————————— //

pub const FEATURE_CONTROL: Msr = Msr::new(0x3A);
pub const VMX_BASIC: Msr = Msr::new(0x480);
pub const VMX_PINBASED_CTLS: Msr = Msr::new(0x481);
pub const VMX_PROCBASED_CTLS: Msr = Msr::new(0x482);
pub const VMX_EXIT_CTLS: Msr = Msr::new(0x483);
pub const VMX_ENTRY_CTLS: Msr = Msr::new(0x484);
pub const VMX_PROCBASED_CTLS2: Msr = Msr::new(0x48B);
pub const VMX_TRUE_PINBASED_CTLS: Msr = Msr::new(0x48D);
pub const VMX_TRUE_PROCBASED_CTLS: Msr = Msr::new(0x48E);
pub const VMX_TRUE_EXIT_CTLS: Msr = Msr::new(0x48F);
pub const VMX_TRUE_ENTRY_CTLS: Msr = Msr::new(0x490);
pub const IA32_EFER: Msr = Msr::new(0xC000_0080);

// ——————————————————————————— IA32_FEATURE_CONTROL ————————————————————————————— //

/// Once set, the MSR can't be written until the next reset.
pub const FEATURE_CONTROL_LOCK: u64 = 1 << 0;
/// VMXON is allowed inside SMX operation.
pub const FEATURE_CONTROL_VMX_INSIDE_SMX: u64 = 1 << 1;
/// VMXON is allowed outside SMX operation.
pub const FEATURE_CONTROL_VMX_OUTSIDE_SMX: u64 = 1 << 2;

// —————————————————————————————— IA32_VMX_BASIC —————————————————————————————— //

/// See Intel SDM Vol. 3D Appendix A-1.
pub mod basic {
    use super::BitField;

    /// VMCS revision identifier, bits 30:0.
    pub const REVISION: BitField = BitField::new(0, 31);
    /// Size of the VMXON and VMCS regions, bits 44:32.
    pub const REGION_SIZE: BitField = BitField::new(32, 13);
    /// Physical addresses of VMX regions are limited to 32 bits.
    pub const PHYSICAL_ADDRESS_WIDTH: BitField = BitField::bit(48);
    /// Memory type used to access the VMCS, bits 53:50.
    pub const MEMORY_TYPE: BitField = BitField::new(50, 4);
    /// The VMX_TRUE_*_CTLS registers are implemented.
    pub const TRUE_CONTROLS: BitField = BitField::bit(55);

    /// Write-back memory type encoding.
    pub const MEMORY_TYPE_WRITE_BACK: u64 = 6;
}

// ———————————————————————————————— IA32_EFER ————————————————————————————————— //

/// SYSCALL enable.
pub const EFER_SCE: u64 = 1 << 0;
/// Long mode enable.
pub const EFER_LME: u64 = 1 << 8;
/// Long mode active.
pub const EFER_LMA: u64 = 1 << 10;
/// No-execute enable.
pub const EFER_NXE: u64 = 1 << 11;

// —————————————————————————————————— MSR ——————————————————————————————————— //

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Msr(u32);

impl Msr {
    /// Creates a new MSR for it's address.
    pub const fn new(reg: u32) -> Self {
        Self(reg)
    }

    /// Returns the address of this MSR.
    pub const fn address(self) -> u32 {
        self.0
    }

    /// Reads 64 bits MSR register.
    ///
    /// ## Safety
    ///
    /// The caller must ensure that this read operation has no unsafe side
    /// effects, and that the code runs in ring 0.
    #[cfg(target_arch = "x86_64")]
    #[inline]
    pub unsafe fn read(&self) -> u64 {
        let (high, low): (u32, u32);
        asm!(
            "rdmsr",
            in("ecx") self.0,
            out("eax") low, out("edx") high,
            options(nomem, nostack, preserves_flags),
        );
        ((high as u64) << 32) | (low as u64)
    }

    /// Writes 64 bits to MSR register.
    ///
    /// ## Safety
    ///
    /// The caller must ensure that this write operation has no unsafe side
    /// effects, and that the code runs in ring 0.
    #[cfg(target_arch = "x86_64")]
    #[inline]
    pub unsafe fn write(&self, value: u64) {
        let low = value as u32;
        let high = (value >> 32) as u32;

        asm!(
            "wrmsr",
            in("ecx") self.0,
            in("eax") low, in("edx") high,
            options(nostack, preserves_flags),
        );
    }
}

// ————————————————————————————————— Tests —————————————————————————————————— //
