//! VMX control bitmaps.
//!
//! Named bits of the five control registers resolved during bring-up, used to express the
//! desired feature sets.

use bitflags::bitflags;

use crate::caps::ControlRegister;
use crate::resolve::DesiredFeatureSet;

bitflags! {
    /// Pin-based VM-execution controls.
    ///
    /// See Intel SDM, Volume 3C, Section 24.6.1.
    pub struct PinbasedControls: u32 {
        const EXTERNAL_INTERRUPT_EXITING = 1 << 0;
        const NMI_EXITING                = 1 << 3;
        const VIRTUAL_NMIS               = 1 << 5;
        const VMX_PREEMPTION_TIMER       = 1 << 6;
        const POSTED_INTERRUPTS          = 1 << 7;
    }

    /// Primary processor-based VM-execution controls.
    ///
    /// See Intel SDM, Volume 3C, Section 24.6.2, Table 24-6.
    pub struct PrimaryControls: u32 {
        const INTERRUPT_WINDOW_EXITING = 1 << 2;
        const USE_TSC_OFFSETTING       = 1 << 3;
        const HLT_EXITING              = 1 << 7;
        const INVLPG_EXITING           = 1 << 9;
        const MWAIT_EXITING            = 1 << 10;
        const RDPMC_EXITING            = 1 << 11;
        const RDTSC_EXITING            = 1 << 12;
        const CR3_LOAD_EXITING         = 1 << 15;
        const CR3_STORE_EXITING        = 1 << 16;
        const CR8_LOAD_EXITING         = 1 << 19;
        const CR8_STORE_EXITING        = 1 << 20;
        const USE_TPR_SHADOW           = 1 << 21;
        const NMI_WINDOW_EXITING       = 1 << 22;
        const MOV_DR_EXITING           = 1 << 23;
        const UNCOND_IO_EXITING        = 1 << 24;
        const USE_IO_BITMAPS           = 1 << 25;
        const MONITOR_TRAP_FLAG        = 1 << 27;
        const USE_MSR_BITMAPS          = 1 << 28;
        const MONITOR_EXITING          = 1 << 29;
        const PAUSE_EXITING            = 1 << 30;
        /// Must resolve to 1 for the secondary controls to be resolved at all.
        const SECONDARY_CONTROLS       = 1 << 31;
    }

    /// Secondary processor-based VM-execution controls.
    ///
    /// See Intel SDM, Volume 3C, Section 24.6.2, Table 24-7.
    pub struct SecondaryControls: u32 {
        const VIRTUALIZE_APIC            = 1 << 0;
        const ENABLE_EPT                 = 1 << 1;
        const DTABLE_EXITING             = 1 << 2;
        const ENABLE_RDTSCP              = 1 << 3;
        const VIRTUALIZE_X2APIC          = 1 << 4;
        const ENABLE_VPID                = 1 << 5;
        const WBINVD_EXITING             = 1 << 6;
        const UNRESTRICTED_GUEST         = 1 << 7;
        const VIRTUALIZE_APIC_REGISTER   = 1 << 8;
        const VIRTUAL_INTERRUPT_DELIVERY = 1 << 9;
        const PAUSE_LOOP_EXITING         = 1 << 10;
        const RDRAND_EXITING             = 1 << 11;
        const ENABLE_INVPCID             = 1 << 12;
        const ENABLE_VM_FUNCTIONS        = 1 << 13;
        const VMCS_SHADOWING             = 1 << 14;
        const ENCLS_EXITING              = 1 << 15;
        const RDSEED_EXITING             = 1 << 16;
        const ENABLE_PML                 = 1 << 17;
        const EPT_VIOLATION_VE           = 1 << 18;
        const CONCEAL_VMX_FROM_PT        = 1 << 19;
        const ENABLE_XSAVES_XRSTORS      = 1 << 20;
        const MODE_BASED_EPT             = 1 << 22;
        const SUB_PAGE_EPT               = 1 << 23;
        const INTEL_PT_GUEST_PHYSICAL    = 1 << 24;
        const USE_TSC_SCALING            = 1 << 25;
        const ENABLE_USER_WAIT_PAUSE     = 1 << 26;
        const ENCLV_EXITING              = 1 << 28;
    }

    /// VM-exit controls.
    ///
    /// See Intel SDM, Volume 3C, Section 24.7.
    pub struct ExitControls: u32 {
        const SAVE_DEBUG_CONTROLS        = 1 << 2;
        const HOST_ADDRESS_SPACE_SIZE    = 1 << 9;
        const LOAD_IA32_PERF_GLOBAL_CTRL = 1 << 12;
        const ACK_INTERRUPT_ON_EXIT      = 1 << 15;
        const SAVE_IA32_PAT              = 1 << 18;
        const LOAD_IA32_PAT              = 1 << 19;
        const SAVE_IA32_EFER             = 1 << 20;
        const LOAD_IA32_EFER             = 1 << 21;
        const SAVE_VMX_PREEMPTION_TIMER  = 1 << 22;
        const CLEAR_IA32_BNDCFGS         = 1 << 23;
        const CONCEAL_VMX_FROM_PT        = 1 << 24;
        const CLEAR_IA32_RTIT_CTL        = 1 << 25;
    }

    /// VM-entry controls.
    ///
    /// See Intel SDM, Volume 3C, Section 24.8.
    pub struct EntryControls: u32 {
        const LOAD_DEBUG_CONTROLS        = 1 << 2;
        const IA32E_MODE_GUEST           = 1 << 9;
        const ENTRY_TO_SMM               = 1 << 10;
        const DEACTIVATE_DUAL_MONITOR    = 1 << 11;
        const LOAD_IA32_PERF_GLOBAL_CTRL = 1 << 13;
        const LOAD_IA32_PAT              = 1 << 14;
        const LOAD_IA32_EFER             = 1 << 15;
        const LOAD_IA32_BNDCFGS          = 1 << 16;
        const CONCEAL_VMX_FROM_PT        = 1 << 17;
        const LOAD_IA32_RTIT_CTL         = 1 << 18;
    }
}

/// A bitmap describing one of the VMX control registers.
pub trait ControlBits: Copy {
    const REGISTER: ControlRegister;

    fn raw(self) -> u32;

    /// A feature set requiring `required` and forbidding `forbidden`.
    fn desired(required: Self, forbidden: Self) -> DesiredFeatureSet {
        DesiredFeatureSet::new(required.raw(), forbidden.raw())
    }
}

macro_rules! control_bits {
    ($bitmap:ty, $register:expr) => {
        impl ControlBits for $bitmap {
            const REGISTER: ControlRegister = $register;

            fn raw(self) -> u32 {
                self.bits()
            }
        }
    };
}

control_bits!(PinbasedControls, ControlRegister::Pinbased);
control_bits!(PrimaryControls, ControlRegister::Primary);
control_bits!(SecondaryControls, ControlRegister::Secondary);
control_bits!(ExitControls, ControlRegister::Exit);
control_bits!(EntryControls, ControlRegister::Entry);
