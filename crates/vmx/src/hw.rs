//! Hardware access
//!
//! Readiness checks and capability reads never touch the hardware directly, they go through a
//! [`HardwareAccess`] implementation. On real hardware this is [`Platform`], tests plug in a fake.

#[cfg(target_arch = "x86_64")]
use core::arch;

use crate::msr::Msr;

// ——————————————————————————————— CPUID Leaves ——————————————————————————————— //

/// Vendor identification string.
pub const CPUID_LEAF_VENDOR: u32 = 0x0;
/// Feature information.
pub const CPUID_LEAF_FEATURES: u32 = 0x1;
/// Processor extended state enumeration.
pub const CPUID_LEAF_EXTENDED_STATE: u32 = 0xD;

/// CPUID.1:ECX mask for VMX support.
pub const CPUID_ECX_VMX_MASK: u32 = 1 << 5;
/// CPUID.1:ECX mask for XSAVE support.
pub const CPUID_ECX_XSAVE_MASK: u32 = 1 << 26;
/// CPUID.(0xD,1):EAX mask for XSAVES/XRSTORS and IA32_XSS support.
pub const CPUID_EAX_XSAVES_MASK: u32 = 1 << 3;

/// The values of the four registers returned by the CPUID instruction.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CpuidResult {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

// ————————————————————————————— Hardware Access ————————————————————————————— //

/// Raw access to processor state.
///
/// All operations are infallible: on the processors this code targets the instructions either
/// succeed or fault, and a fault is not something the caller can recover from.
pub trait HardwareAccess {
    /// Reads a model specific register.
    fn read_msr(&self, msr: Msr) -> u64;

    /// Writes a model specific register.
    fn write_msr(&mut self, msr: Msr, value: u64);

    /// Executes CPUID for the given leaf and subleaf.
    fn cpuid(&self, leaf: u32, subleaf: u32) -> CpuidResult;
}

/// The processor the code is currently running on.
///
/// This type is neither `Send` nor `Sync`: values read through it describe the current logical
/// core only and must not be shared with another core.
#[cfg(target_arch = "x86_64")]
pub struct Platform {
    _not_sync: core::marker::PhantomData<*const ()>,
}

#[cfg(target_arch = "x86_64")]
impl Platform {
    /// Returns a handle to the current core.
    ///
    /// ## Safety
    ///
    /// The caller must run in ring 0, otherwise RDMSR and WRMSR raise a #GP.
    pub unsafe fn new() -> Self {
        Self {
            _not_sync: core::marker::PhantomData,
        }
    }
}

#[cfg(target_arch = "x86_64")]
impl HardwareAccess for Platform {
    fn read_msr(&self, msr: Msr) -> u64 {
        // SAFETY: ring 0 is guaranteed by `Platform::new`, the MSRs read during bring-up are
        // side-effect free.
        unsafe { msr.read() }
    }

    fn write_msr(&mut self, msr: Msr, value: u64) {
        // SAFETY: ring 0 is guaranteed by `Platform::new`.
        unsafe { msr.write(value) }
    }

    fn cpuid(&self, leaf: u32, subleaf: u32) -> CpuidResult {
        // SAFETY: the CPUID instruction is not supported under SGX, we assume that this function
        // is never executed under SGX.
        // `__cpuid_count` is only unsafe on older toolchains.
        #[allow(unused_unsafe)]
        let result = unsafe { arch::x86_64::__cpuid_count(leaf, subleaf) };
        CpuidResult {
            eax: result.eax,
            ebx: result.ebx,
            ecx: result.ecx,
            edx: result.edx,
        }
    }
}
