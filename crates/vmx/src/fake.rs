//! Fake hardware
//!
//! A [`HardwareAccess`] implementation backed by a fixed table of MSRs and CPUID leaves, counting
//! every access. Reading an MSR missing from the table panics, as a #GP would on real hardware.

use core::cell::Cell;

use crate::hw::{
    CpuidResult, HardwareAccess, CPUID_EAX_XSAVES_MASK, CPUID_ECX_VMX_MASK, CPUID_ECX_XSAVE_MASK,
    CPUID_LEAF_EXTENDED_STATE, CPUID_LEAF_FEATURES, CPUID_LEAF_VENDOR,
};
use crate::msr::{self, Msr};
use crate::readiness::VendorSignature;

const MSR_SLOTS: usize = 16;
const CPUID_SLOTS: usize = 8;

/// IA32_VMX_BASIC of a capable core: revision 4, 4 KiB regions, write-back, TRUE controls.
pub const CAPABLE_VMX_BASIC: u64 = 0x4 | (0x1000 << 32) | (6 << 50) | (1 << 55);
/// IA32_FEATURE_CONTROL locked with VMX enabled outside SMX.
pub const CAPABLE_FEATURE_CONTROL: u64 =
    msr::FEATURE_CONTROL_LOCK | msr::FEATURE_CONTROL_VMX_OUTSIDE_SMX;
/// IA32_EFER of a core running in long mode.
pub const CAPABLE_EFER: u64 = msr::EFER_NXE | msr::EFER_LMA | msr::EFER_LME | msr::EFER_SCE;

/// Capability MSRs as reported by a recent Intel core.
pub const CAPABLE_CONTROLS: [(Msr, u64); 9] = [
    (msr::VMX_PINBASED_CTLS, 0x0000_007f_0000_0016),
    (msr::VMX_PROCBASED_CTLS, 0xfff9_fffe_0401_e172),
    (msr::VMX_EXIT_CTLS, 0x01ff_ffff_0003_6dff),
    (msr::VMX_ENTRY_CTLS, 0x0003_ffff_0000_11ff),
    (msr::VMX_PROCBASED_CTLS2, 0x00ff_ffff_0000_0000),
    (msr::VMX_TRUE_PINBASED_CTLS, 0x0000_007f_0000_0016),
    (msr::VMX_TRUE_PROCBASED_CTLS, 0xfff9_fffe_0400_6172),
    (msr::VMX_TRUE_EXIT_CTLS, 0x01ff_ffff_0003_6dfb),
    (msr::VMX_TRUE_ENTRY_CTLS, 0x0003_ffff_0000_11fb),
];

pub struct FakeHardware {
    msrs: [Option<(u32, u64)>; MSR_SLOTS],
    leaves: [Option<((u32, u32), CpuidResult)>; CPUID_SLOTS],
    msr_reads: Cell<usize>,
    msr_writes: usize,
    cpuid_calls: Cell<usize>,
    /// Bitmap of the slots read at least once.
    read_slots: Cell<u16>,
}

impl FakeHardware {
    /// A core without any MSR, returning zeros for every CPUID leaf.
    pub fn new() -> Self {
        Self {
            msrs: [None; MSR_SLOTS],
            leaves: [None; CPUID_SLOTS],
            msr_reads: Cell::new(0),
            msr_writes: 0,
            cpuid_calls: Cell::new(0),
            read_slots: Cell::new(0),
        }
    }

    /// A core passing every readiness check.
    pub fn intel_capable() -> Self {
        let vendor = VendorSignature::INTEL;
        let mut hw = Self::new()
            .with_cpuid(
                CPUID_LEAF_VENDOR,
                0,
                CpuidResult {
                    eax: CPUID_LEAF_EXTENDED_STATE,
                    ebx: vendor.ebx,
                    ecx: vendor.ecx,
                    edx: vendor.edx,
                },
            )
            .with_cpuid(
                CPUID_LEAF_FEATURES,
                0,
                CpuidResult {
                    ecx: CPUID_ECX_VMX_MASK | CPUID_ECX_XSAVE_MASK,
                    ..Default::default()
                },
            )
            .with_cpuid(
                CPUID_LEAF_EXTENDED_STATE,
                0,
                CpuidResult {
                    eax: 0x7,
                    ecx: 0x340,
                    ..Default::default()
                },
            )
            .with_cpuid(
                CPUID_LEAF_EXTENDED_STATE,
                1,
                CpuidResult {
                    eax: CPUID_EAX_XSAVES_MASK,
                    ..Default::default()
                },
            )
            .with_msr(msr::FEATURE_CONTROL, CAPABLE_FEATURE_CONTROL)
            .with_msr(msr::VMX_BASIC, CAPABLE_VMX_BASIC)
            .with_msr(msr::IA32_EFER, CAPABLE_EFER);
        for (msr, value) in CAPABLE_CONTROLS {
            hw = hw.with_msr(msr, value);
        }
        hw
    }

    /// Sets the value of an MSR, adding it if missing.
    pub fn with_msr(mut self, msr: Msr, value: u64) -> Self {
        let address = msr.address();
        let slot = match self.msr_slot(address) {
            Some(idx) => idx,
            None => match self.msrs.iter().position(Option::is_none) {
                Some(idx) => idx,
                None => panic!("Fake hardware: no MSR slot left"),
            },
        };
        self.msrs[slot] = Some((address, value));
        self
    }

    /// Removes an MSR, reading it afterward panics.
    pub fn without_msr(mut self, msr: Msr) -> Self {
        if let Some(idx) = self.msr_slot(msr.address()) {
            self.msrs[idx] = None;
        }
        self
    }

    /// Sets the result of a CPUID leaf, adding it if missing.
    pub fn with_cpuid(mut self, leaf: u32, subleaf: u32, result: CpuidResult) -> Self {
        let key = (leaf, subleaf);
        let slot = match self.leaves.iter().position(|l| matches!(l, Some((k, _)) if *k == key)) {
            Some(idx) => idx,
            None => match self.leaves.iter().position(Option::is_none) {
                Some(idx) => idx,
                None => panic!("Fake hardware: no CPUID slot left"),
            },
        };
        self.leaves[slot] = Some((key, result));
        self
    }

    /// Number of MSR reads so far.
    pub fn msr_reads(&self) -> usize {
        self.msr_reads.get()
    }

    /// Number of MSR writes so far.
    pub fn msr_writes(&self) -> usize {
        self.msr_writes
    }

    /// Number of CPUID executions so far.
    pub fn cpuid_calls(&self) -> usize {
        self.cpuid_calls.get()
    }

    /// Returns true if the MSR has been read at least once.
    pub fn was_read(&self, msr: Msr) -> bool {
        match self.msr_slot(msr.address()) {
            Some(idx) => self.read_slots.get() & (1 << idx) != 0,
            None => false,
        }
    }

    fn msr_slot(&self, address: u32) -> Option<usize> {
        self.msrs
            .iter()
            .position(|slot| matches!(slot, Some((a, _)) if *a == address))
    }
}

impl Default for FakeHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareAccess for FakeHardware {
    fn read_msr(&self, msr: Msr) -> u64 {
        self.msr_reads.set(self.msr_reads.get() + 1);
        let idx = match self.msr_slot(msr.address()) {
            Some(idx) => idx,
            None => panic!("#GP: read of unimplemented MSR 0x{:x}", msr.address()),
        };
        self.read_slots.set(self.read_slots.get() | (1 << idx));
        match self.msrs[idx] {
            Some((_, value)) => value,
            None => 0,
        }
    }

    fn write_msr(&mut self, msr: Msr, value: u64) {
        self.msr_writes += 1;
        let address = msr.address();
        if let Some(idx) = self.msr_slot(address) {
            self.msrs[idx] = Some((address, value));
        }
    }

    fn cpuid(&self, leaf: u32, subleaf: u32) -> CpuidResult {
        self.cpuid_calls.set(self.cpuid_calls.get() + 1);
        self.leaves
            .iter()
            .flatten()
            .find(|(key, _)| *key == (leaf, subleaf))
            .map(|(_, result)| *result)
            .unwrap_or_default()
    }
}
