use crate::bitmaps::PrimaryControls;
use crate::caps::{CapabilityOrigin, CapabilitySource, ControlRegister};
use crate::check::check_controls;
use crate::controls::{BuildState, ControlSetBuilder, DesiredControls};
use crate::errors::{FailureClass, VmxError, VmxFieldError};
use crate::fake::{FakeHardware, CAPABLE_VMX_BASIC};
use crate::msr;
use crate::resolve::{Conflict, ConflictReason, DesiredFeatureSet};

/// A core without the TRUE capability MSRs.
fn legacy_only() -> FakeHardware {
    FakeHardware::intel_capable()
        .with_msr(msr::VMX_BASIC, CAPABLE_VMX_BASIC & !(1 << 55))
        .without_msr(msr::VMX_TRUE_PINBASED_CTLS)
        .without_msr(msr::VMX_TRUE_PROCBASED_CTLS)
        .without_msr(msr::VMX_TRUE_EXIT_CTLS)
        .without_msr(msr::VMX_TRUE_ENTRY_CTLS)
}

#[test]
fn true_controls() {
    let hw = FakeHardware::intel_capable();
    let caps = CapabilitySource::new(&hw);
    let mut builder = ControlSetBuilder::new(&caps);
    assert_eq!(builder.state(), BuildState::NotStarted);

    let controls = match builder.build(&DesiredControls::hypervisor()) {
        Ok(controls) => controls,
        Err(failure) => panic!("Unexpected failure: {}", failure),
    };
    assert_eq!(builder.state(), BuildState::Done);

    assert_eq!(controls.pinbased.value, 0x16);
    assert_eq!(controls.primary.value, 0x9400_6172);
    assert_eq!(controls.exit.value, 0x0033_6ffb);
    assert_eq!(controls.entry.value, 0x93fb);
    for register in [
        ControlRegister::Pinbased,
        ControlRegister::Primary,
        ControlRegister::Exit,
        ControlRegister::Entry,
    ] {
        assert_eq!(
            controls.get(register).map(|c| c.origin),
            Some(CapabilityOrigin::True)
        );
    }

    let secondary = controls.secondary.map(|c| (c.value, c.origin));
    assert_eq!(secondary, Some((0x8a, CapabilityOrigin::Legacy)));

    assert_eq!(check_controls(&caps, &controls), Ok(()));
    assert_eq!(hw.msr_writes(), 0);
}

#[test]
fn legacy_fallback() {
    let hw = legacy_only();
    let caps = CapabilitySource::new(&hw);
    let mut builder = ControlSetBuilder::new(&caps);

    let controls = match builder.build(&DesiredControls::hypervisor()) {
        Ok(controls) => controls,
        Err(failure) => panic!("Unexpected failure: {}", failure),
    };

    assert_eq!(controls.pinbased.value, 0x16);
    assert_eq!(controls.primary.value, 0x9401_e172);
    assert_eq!(controls.exit.value, 0x0033_6fff);
    assert_eq!(controls.entry.value, 0x93ff);
    for register in ControlRegister::ALL {
        assert_eq!(
            controls.get(register).map(|c| c.origin),
            Some(CapabilityOrigin::Legacy)
        );
    }
    assert!(hw.was_read(msr::VMX_PROCBASED_CTLS2));
    assert_eq!(check_controls(&caps, &controls), Ok(()));
}

#[test]
fn secondary_not_requested() {
    let hw = FakeHardware::intel_capable();
    let caps = CapabilitySource::new(&hw);
    let desired = DesiredControls {
        primary: DesiredFeatureSet::empty(),
        secondary: DesiredFeatureSet::empty(),
        ..DesiredControls::hypervisor()
    };

    let controls = match ControlSetBuilder::new(&caps).build(&desired) {
        Ok(controls) => controls,
        Err(failure) => panic!("Unexpected failure: {}", failure),
    };

    assert_eq!(controls.primary.value & (1 << 31), 0);
    assert_eq!(controls.secondary, None);
    assert!(!hw.was_read(msr::VMX_PROCBASED_CTLS2));
    assert_eq!(check_controls(&caps, &controls), Ok(()));
}

#[test]
fn secondary_required_but_not_activated() {
    let hw = FakeHardware::intel_capable();
    let caps = CapabilitySource::new(&hw);
    let desired = DesiredControls {
        primary: DesiredFeatureSet::empty(),
        ..DesiredControls::hypervisor()
    };
    let mut builder = ControlSetBuilder::new(&caps);

    let failure = match builder.build(&desired) {
        Ok(controls) => panic!("Unexpected success: {:?}", controls),
        Err(failure) => failure,
    };

    assert_eq!(
        builder.state(),
        BuildState::Failed(ControlRegister::Secondary)
    );
    assert_eq!(failure.register, ControlRegister::Secondary);
    assert_eq!(failure.resolution.resolved_value, 0);
    let bits: Vec<_> = failure.resolution.conflicts.iter().map(|c| c.bit).collect();
    assert_eq!(bits, vec![1, 3, 7]);
    assert!(failure
        .resolution
        .conflicts
        .iter()
        .all(|c| c.reason == ConflictReason::RequiredButUnsupported));
    assert!(!hw.was_read(msr::VMX_PROCBASED_CTLS2));
    assert!(!hw.was_read(msr::VMX_TRUE_EXIT_CTLS));
}

/// The legacy MSR doesn't report the secondary controls and their capability MSR doesn't
/// exist, while the TRUE MSR still allows activating them.
fn without_secondary_controls() -> FakeHardware {
    FakeHardware::intel_capable()
        .with_msr(msr::VMX_PROCBASED_CTLS, 0x7ff9_fffe_0401_e172)
        .without_msr(msr::VMX_PROCBASED_CTLS2)
}

#[test]
fn secondary_not_available() {
    let hw = without_secondary_controls();
    let caps = CapabilitySource::new(&hw);
    let mut builder = ControlSetBuilder::new(&caps);

    let failure = match builder.build(&DesiredControls::hypervisor()) {
        Ok(controls) => panic!("Unexpected success: {:?}", controls),
        Err(failure) => failure,
    };

    assert_eq!(builder.state(), BuildState::Failed(ControlRegister::Primary));
    assert_eq!(failure.origin, CapabilityOrigin::True);
    assert_eq!(
        failure.resolution.conflicts.iter().collect::<Vec<_>>(),
        vec![Conflict {
            bit: 31,
            reason: ConflictReason::RequiredButUnsupported
        }]
    );
    assert_eq!(failure.resolution.resolved_value & (1 << 31), 0);
    assert!(!hw.was_read(msr::VMX_PROCBASED_CTLS2));

    // Secondary controls required without activating them.
    let desired = DesiredControls {
        primary: DesiredFeatureSet::empty(),
        ..DesiredControls::hypervisor()
    };
    let failure = match ControlSetBuilder::new(&caps).build(&desired) {
        Ok(controls) => panic!("Unexpected success: {:?}", controls),
        Err(failure) => failure,
    };
    assert_eq!(failure.register, ControlRegister::Secondary);
    assert_eq!(failure.resolution.conflicts.len(), 3);
    assert!(!hw.was_read(msr::VMX_PROCBASED_CTLS2));
}

#[test]
fn secondary_not_available_nor_requested() {
    let hw = without_secondary_controls();
    let caps = CapabilitySource::new(&hw);
    let desired = DesiredControls {
        primary: DesiredFeatureSet::empty(),
        secondary: DesiredFeatureSet::empty(),
        ..DesiredControls::hypervisor()
    };

    let controls = match ControlSetBuilder::new(&caps).build(&desired) {
        Ok(controls) => controls,
        Err(failure) => panic!("Unexpected failure: {}", failure),
    };
    assert_eq!(controls.primary.value & (1 << 31), 0);
    assert_eq!(controls.secondary, None);
    assert_eq!(check_controls(&caps, &controls), Ok(()));
}

#[test]
fn required_but_unsupported() {
    let hw = FakeHardware::intel_capable();
    let caps = CapabilitySource::new(&hw);
    let desired = DesiredControls {
        exit: DesiredFeatureSet::new((1 << 31) | (1 << 30) | (1 << 9), 0),
        ..DesiredControls::hypervisor()
    };
    let mut builder = ControlSetBuilder::new(&caps);

    let failure = match builder.build(&desired) {
        Ok(controls) => panic!("Unexpected success: {:?}", controls),
        Err(failure) => failure,
    };

    assert_eq!(builder.state(), BuildState::Failed(ControlRegister::Exit));
    assert_eq!(failure.register, ControlRegister::Exit);
    assert_eq!(failure.origin, CapabilityOrigin::True);
    assert_eq!(failure.class(), FailureClass::CapabilityConflict);
    assert_eq!(
        failure.resolution.conflicts.iter().collect::<Vec<_>>(),
        vec![
            Conflict {
                bit: 30,
                reason: ConflictReason::RequiredButUnsupported
            },
            Conflict {
                bit: 31,
                reason: ConflictReason::RequiredButUnsupported
            },
        ]
    );
    // The resolved value stays legal even on failure.
    assert_eq!(failure.resolution.resolved_value & (0b11 << 30), 0);
    assert!(!hw.was_read(msr::VMX_TRUE_ENTRY_CTLS));
}

#[test]
fn forbidden_but_mandatory() {
    let hw = FakeHardware::intel_capable();
    let caps = CapabilitySource::new(&hw);
    // Bit 1 is a default-1 bit of the pin-based controls.
    let desired = DesiredControls {
        pinbased: DesiredFeatureSet::new(0, 1 << 1),
        ..DesiredControls::hypervisor()
    };
    let mut builder = ControlSetBuilder::new(&caps);

    let failure = match builder.build(&desired) {
        Ok(controls) => panic!("Unexpected success: {:?}", controls),
        Err(failure) => failure,
    };

    assert_eq!(
        builder.state(),
        BuildState::Failed(ControlRegister::Pinbased)
    );
    assert_eq!(
        failure.resolution.conflicts.first(),
        Some(Conflict {
            bit: 1,
            reason: ConflictReason::ForbiddenButMandatory
        })
    );
    assert!(!hw.was_read(msr::VMX_TRUE_PROCBASED_CTLS));
}

#[test]
fn anomalies_do_not_fail() {
    // Bit 8 of the pin-based controls can be neither 0 nor 1.
    let hw = FakeHardware::intel_capable()
        .with_msr(msr::VMX_TRUE_PINBASED_CTLS, 0x0000_007f_0000_0116);
    let caps = CapabilitySource::new(&hw);

    let controls = match ControlSetBuilder::new(&caps).build(&DesiredControls::hypervisor()) {
        Ok(controls) => controls,
        Err(failure) => panic!("Unexpected failure: {}", failure),
    };
    assert_eq!(controls.pinbased.value, 0x16);
}

#[test]
fn tampered_controls_are_caught() {
    let hw = FakeHardware::intel_capable();
    let caps = CapabilitySource::new(&hw);
    let controls = match ControlSetBuilder::new(&caps).build(&DesiredControls::hypervisor()) {
        Ok(controls) => controls,
        Err(failure) => panic!("Unexpected failure: {}", failure),
    };

    let mut tampered = controls;
    tampered.pinbased.value &= !(1 << 4);
    assert_eq!(
        check_controls(&caps, &tampered),
        Err(VmxError::Disallowed0(VmxFieldError::PinBasedControls, 4))
    );

    let mut tampered = controls;
    tampered.primary.value &= !PrimaryControls::SECONDARY_CONTROLS.bits();
    assert_eq!(
        check_controls(&caps, &tampered),
        Err(VmxError::Disallowed0(VmxFieldError::PrimaryControls, 31))
    );

    let mut tampered = controls;
    tampered.entry.value |= 1 << 10;
    assert_eq!(
        check_controls(&caps, &tampered),
        Err(VmxError::Disallowed1(VmxFieldError::EntryControls, 10))
    );
}

#[test]
fn secondary_without_capability_is_caught() {
    let capable = FakeHardware::intel_capable();
    let controls = match ControlSetBuilder::new(&CapabilitySource::new(&capable))
        .build(&DesiredControls::hypervisor())
    {
        Ok(controls) => controls,
        Err(failure) => panic!("Unexpected failure: {}", failure),
    };

    let hw = FakeHardware::intel_capable().with_msr(msr::VMX_PROCBASED_CTLS, 0x7ff9_fffe_0401_e172);
    let caps = CapabilitySource::new(&hw);
    assert_eq!(
        check_controls(&caps, &controls),
        Err(VmxError::Disallowed1(VmxFieldError::SecondaryControls, 31))
    );
}
