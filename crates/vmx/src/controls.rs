//! VMX control set
//!
//! Resolves every VMX control register of the current core into one consistent set of values,
//! or reports the first register whose desired settings the processor can't honor.

use core::fmt;

use crate::bitmaps::{
    ControlBits, EntryControls, ExitControls, PrimaryControls, SecondaryControls,
};
use crate::caps::{
    CapabilityMask, CapabilityOrigin, CapabilitySource, ControlRegister,
    ACTIVATE_SECONDARY_CONTROLS,
};
use crate::errors::FailureClass;
use crate::hw::HardwareAccess;
use crate::resolve::{resolve_mask, ControlResolution, DesiredFeatureSet};

// ————————————————————————————— Desired Controls ————————————————————————————— //

/// The desired feature set of every control register.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DesiredControls {
    pub pinbased: DesiredFeatureSet,
    pub primary: DesiredFeatureSet,
    pub secondary: DesiredFeatureSet,
    pub exit: DesiredFeatureSet,
    pub entry: DesiredFeatureSet,
}

impl DesiredControls {
    /// The controls required to run 64 bits guests with EPT and MSR bitmaps.
    pub fn hypervisor() -> Self {
        Self::default()
            .with(
                PrimaryControls::SECONDARY_CONTROLS | PrimaryControls::USE_MSR_BITMAPS,
                PrimaryControls::empty(),
            )
            .with(
                SecondaryControls::ENABLE_RDTSCP
                    | SecondaryControls::ENABLE_EPT
                    | SecondaryControls::UNRESTRICTED_GUEST,
                SecondaryControls::empty(),
            )
            .with(
                ExitControls::HOST_ADDRESS_SPACE_SIZE
                    | ExitControls::LOAD_IA32_EFER
                    | ExitControls::SAVE_IA32_EFER,
                ExitControls::empty(),
            )
            .with(
                EntryControls::IA32E_MODE_GUEST | EntryControls::LOAD_IA32_EFER,
                EntryControls::ENTRY_TO_SMM | EntryControls::DEACTIVATE_DUAL_MONITOR,
            )
    }

    pub fn get(&self, register: ControlRegister) -> DesiredFeatureSet {
        match register {
            ControlRegister::Pinbased => self.pinbased,
            ControlRegister::Primary => self.primary,
            ControlRegister::Secondary => self.secondary,
            ControlRegister::Exit => self.exit,
            ControlRegister::Entry => self.entry,
        }
    }

    fn get_mut(&mut self, register: ControlRegister) -> &mut DesiredFeatureSet {
        match register {
            ControlRegister::Pinbased => &mut self.pinbased,
            ControlRegister::Primary => &mut self.primary,
            ControlRegister::Secondary => &mut self.secondary,
            ControlRegister::Exit => &mut self.exit,
            ControlRegister::Entry => &mut self.entry,
        }
    }

    /// Replaces the desired settings of the register described by `B`.
    pub fn with<B: ControlBits>(mut self, required: B, forbidden: B) -> Self {
        *self.get_mut(B::REGISTER) = B::desired(required, forbidden);
        self
    }
}

// ————————————————————————————— Resolved Controls ———————————————————————————— //

/// A resolved control value, tagged with the capability MSR it was resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedControl {
    pub value: u32,
    pub origin: CapabilityOrigin,
}

/// The values to program into the VMCS control fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmxControls {
    pub pinbased: ResolvedControl,
    pub primary: ResolvedControl,
    /// `None` if the secondary controls are not activated.
    pub secondary: Option<ResolvedControl>,
    pub exit: ResolvedControl,
    pub entry: ResolvedControl,
}

impl VmxControls {
    pub fn get(&self, register: ControlRegister) -> Option<ResolvedControl> {
        match register {
            ControlRegister::Pinbased => Some(self.pinbased),
            ControlRegister::Primary => Some(self.primary),
            ControlRegister::Secondary => self.secondary,
            ControlRegister::Exit => Some(self.exit),
            ControlRegister::Entry => Some(self.entry),
        }
    }
}

// ————————————————————————————————— Failures ————————————————————————————————— //

/// The first register whose resolution produced conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildFailure {
    pub register: ControlRegister,
    pub origin: CapabilityOrigin,
    pub resolution: ControlResolution,
}

impl BuildFailure {
    pub const fn class(&self) -> FailureClass {
        FailureClass::CapabilityConflict
    }
}

impl fmt::Display for BuildFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:?} capabilities): {} conflict(s)",
            self.register,
            self.origin,
            self.resolution.conflicts.len()
        )?;
        for conflict in self.resolution.conflicts.iter() {
            write!(f, ", {}", conflict)?;
        }
        Ok(())
    }
}

// ————————————————————————————————— Builder —————————————————————————————————— //

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    NotStarted,
    ResolvingPinbased,
    ResolvingProcbased,
    ResolvingSecondary,
    ResolvingExit,
    ResolvingEntry,
    Done,
    Failed(ControlRegister),
}

impl BuildState {
    fn resolving(register: ControlRegister) -> Self {
        match register {
            ControlRegister::Pinbased => BuildState::ResolvingPinbased,
            ControlRegister::Primary => BuildState::ResolvingProcbased,
            ControlRegister::Secondary => BuildState::ResolvingSecondary,
            ControlRegister::Exit => BuildState::ResolvingExit,
            ControlRegister::Entry => BuildState::ResolvingEntry,
        }
    }
}

/// Resolves the control registers one after the other.
pub struct ControlSetBuilder<'a, 'hw, H: HardwareAccess> {
    caps: &'a CapabilitySource<'hw, H>,
    state: BuildState,
    use_true: bool,
}

impl<'a, 'hw, H: HardwareAccess> ControlSetBuilder<'a, 'hw, H> {
    pub fn new(caps: &'a CapabilitySource<'hw, H>) -> Self {
        Self {
            caps,
            state: BuildState::NotStarted,
            use_true: false,
        }
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    /// Resolves all the control registers.
    ///
    /// The TRUE capability MSRs are used when IA32_VMX_BASIC reports them, the legacy ones
    /// otherwise. Resolution stops at the first register with conflicts.
    ///
    /// Without secondary controls capability the primary controls can't activate them, and any
    /// secondary control required while they are not activated is a conflict.
    pub fn build(&mut self, desired: &DesiredControls) -> Result<VmxControls, BuildFailure> {
        self.use_true = self.caps.basic().support_true_ctls;
        if !self.use_true {
            log::debug!("TRUE controls not supported, falling back to legacy capabilities");
        }
        let secondary_available = self.caps.secondary_controls_available();

        let pinbased = self.resolve(ControlRegister::Pinbased, desired)?;
        let primary = if secondary_available {
            self.resolve(ControlRegister::Primary, desired)?
        } else {
            log::debug!("Secondary controls not available");
            let (mut mask, origin) = self
                .caps
                .preferred_mask(ControlRegister::Primary, self.use_true);
            mask.allowed1 &= !ACTIVATE_SECONDARY_CONTROLS;
            self.resolve_against(ControlRegister::Primary, desired, mask, origin)?
        };
        let secondary = if primary.value & ACTIVATE_SECONDARY_CONTROLS != 0 {
            Some(self.resolve(ControlRegister::Secondary, desired)?)
        } else {
            if desired.secondary.must_be_1() != 0 {
                self.resolve_against(
                    ControlRegister::Secondary,
                    desired,
                    CapabilityMask::UNSUPPORTED,
                    CapabilityOrigin::Legacy,
                )?;
            }
            None
        };
        let exit = self.resolve(ControlRegister::Exit, desired)?;
        let entry = self.resolve(ControlRegister::Entry, desired)?;

        self.state = BuildState::Done;
        Ok(VmxControls {
            pinbased,
            primary,
            secondary,
            exit,
            entry,
        })
    }

    fn resolve(
        &mut self,
        register: ControlRegister,
        desired: &DesiredControls,
    ) -> Result<ResolvedControl, BuildFailure> {
        let (mask, origin) = self.caps.preferred_mask(register, self.use_true);
        self.resolve_against(register, desired, mask, origin)
    }

    fn resolve_against(
        &mut self,
        register: ControlRegister,
        desired: &DesiredControls,
        mask: CapabilityMask,
        origin: CapabilityOrigin,
    ) -> Result<ResolvedControl, BuildFailure> {
        self.state = BuildState::resolving(register);
        let resolution = resolve_mask(desired.get(register), mask);

        if resolution.anomalies != 0 {
            log::warn!(
                "{}: bits 0x{:08x} reported as neither 0 nor 1",
                register,
                resolution.anomalies
            );
        }
        if !resolution.is_usable() {
            self.state = BuildState::Failed(register);
            return Err(BuildFailure {
                register,
                origin,
                resolution,
            });
        }

        Ok(ResolvedControl {
            value: resolution.resolved_value,
            origin,
        })
    }
}

/// Resolves all the control registers of the current core.
pub fn build<H: HardwareAccess>(
    caps: &CapabilitySource<H>,
    desired: &DesiredControls,
) -> Result<VmxControls, BuildFailure> {
    ControlSetBuilder::new(caps).build(desired)
}
