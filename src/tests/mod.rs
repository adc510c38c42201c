//! # Tests for the bring-up driver.

use qemu::ExitCode;
use vmx::fake::{FakeHardware, CAPABLE_VMX_BASIC};
use vmx::hw::{CpuidResult, CPUID_LEAF_VENDOR};
use vmx::msr;
use vmx::{
    CapabilityOrigin, ControlRegister, DesiredFeatureSet, FailureClass, ReadinessFailure,
    ReadinessMode, VendorSignature, VmxError, VmxFieldError,
};

use crate::{bringup_core, BringupConfig, BringupError, BringupReport, CoreStatus};

fn config(mode: ReadinessMode, verify_controls: bool) -> BringupConfig {
    BringupConfig {
        mode,
        verify_controls,
        ..Default::default()
    }
}

fn not_intel() -> FakeHardware {
    let vendor = VendorSignature::from_bytes(b"AuthenticAMD");
    FakeHardware::intel_capable().with_cpuid(
        CPUID_LEAF_VENDOR,
        0,
        CpuidResult {
            eax: 0xD,
            ebx: vendor.ebx,
            ecx: vendor.ecx,
            edx: vendor.edx,
        },
    )
}

#[test]
fn capable_core() {
    let hw = FakeHardware::intel_capable();
    let result = bringup_core(&hw, 0, &config(ReadinessMode::ShortCircuit, true));

    let controls = match result {
        Ok(controls) => controls,
        Err(err) => panic!("Bring-up failed: {}", err),
    };
    assert_eq!(controls.primary.origin, CapabilityOrigin::True);
    assert_ne!(controls.primary.value & (1 << 31), 0);
    assert!(controls.secondary.is_some());
    assert_eq!(hw.msr_writes(), 0);

    let mut report = BringupReport::new();
    report.record_result(0, &result);
    assert_eq!(report.status(0), Some(CoreStatus::Ready));
    assert_eq!(report.exit_code(), ExitCode::Success);
}

#[test]
fn wrong_vendor() {
    let hw = not_intel();
    let result = bringup_core(&hw, 1, &config(ReadinessMode::ShortCircuit, false));

    let outcome = match result {
        Err(BringupError::NotReady(outcome)) => outcome,
        other => panic!("Unexpected result: {:?}", other),
    };
    assert_eq!(outcome.executed(), 1);
    assert!(matches!(
        outcome.first_failure(),
        Some(ReadinessFailure::WrongVendor { .. })
    ));
    assert_eq!(hw.msr_reads(), 0);

    let status = CoreStatus::from_result(&result);
    assert_eq!(status, CoreStatus::NotReady(FailureClass::HardwareMismatch));
    assert_eq!(status.exit_code(), ExitCode::NotReady);
}

#[test]
fn accumulate_reports_every_failure() {
    let hw = not_intel().with_msr(msr::FEATURE_CONTROL, msr::FEATURE_CONTROL_LOCK);
    let result = bringup_core(&hw, 0, &config(ReadinessMode::Accumulate, false));

    let outcome = match result {
        Err(BringupError::NotReady(outcome)) => outcome,
        other => panic!("Unexpected result: {:?}", other),
    };
    assert_eq!(outcome.executed(), vmx::readiness::CHECK_COUNT);
    let classes: Vec<_> = outcome.failures().map(|failure| failure.class()).collect();
    assert_eq!(
        classes,
        vec![FailureClass::HardwareMismatch, FailureClass::FirmwarePolicy]
    );
}

#[test]
fn missing_true_controls_stops_at_the_gate() {
    let hw =
        FakeHardware::intel_capable().with_msr(msr::VMX_BASIC, CAPABLE_VMX_BASIC & !(1 << 55));
    let result = bringup_core(&hw, 0, &config(ReadinessMode::ShortCircuit, false));

    match result {
        Err(BringupError::NotReady(outcome)) => assert!(matches!(
            outcome.first_failure(),
            Some(ReadinessFailure::MissingTrueControls { .. })
        )),
        other => panic!("Unexpected result: {:?}", other),
    }
    assert!(!hw.was_read(msr::VMX_PINBASED_CTLS));
    assert!(!hw.was_read(msr::VMX_TRUE_PINBASED_CTLS));
}

#[test]
fn conflicting_controls() {
    let hw = FakeHardware::intel_capable();
    let mut config = config(ReadinessMode::ShortCircuit, false);
    config.desired.entry = DesiredFeatureSet::new(1 << 30, 0);
    let result = bringup_core(&hw, 7, &config);

    let failure = match result {
        Err(BringupError::Conflict(failure)) => failure,
        other => panic!("Unexpected result: {:?}", other),
    };
    assert_eq!(failure.register, ControlRegister::Entry);
    assert_eq!(failure.resolution.conflicts.len(), 1);

    let mut report = BringupReport::new();
    report.record(0, CoreStatus::Ready);
    report.record_result(7, &result);
    assert_eq!(
        report.status(7),
        Some(CoreStatus::ControlConflict(ControlRegister::Entry))
    );
    assert_eq!(report.exit_code(), ExitCode::ControlConflict);
}

#[test]
fn verification_failure() {
    // The entry controls force a bit the verification rejects.
    let hw = FakeHardware::intel_capable()
        .with_msr(msr::VMX_TRUE_ENTRY_CTLS, 0x0003_ffff_0000_15fb);
    let mut config = config(ReadinessMode::ShortCircuit, true);
    config.desired.entry = DesiredFeatureSet::new((1 << 9) | (1 << 15), 0);
    let result = bringup_core(&hw, 0, &config);

    assert_eq!(
        result,
        Err(BringupError::Verification(VmxError::Disallowed1(
            VmxFieldError::EntryControls,
            10
        )))
    );
    assert_eq!(
        CoreStatus::from_result(&result).exit_code(),
        ExitCode::VerificationFailed
    );

    // Without verification the same controls are handed out.
    let mut config = config;
    config.verify_controls = false;
    assert!(bringup_core(&hw, 0, &config).is_ok());
}

#[test]
fn core_that_never_reported() {
    let hw = FakeHardware::intel_capable();
    let config = BringupConfig {
        cores: 4,
        ..config(ReadinessMode::ShortCircuit, false)
    };
    let result = bringup_core(&hw, 0, &config);

    let mut report = BringupReport::new();
    report.expect_cores(config.cores);
    report.record_result(0, &result);
    assert_eq!(report.status(0), Some(CoreStatus::Ready));
    assert_eq!(report.exit_code(), ExitCode::MissingCore);
}

#[test]
fn errors_display() {
    let hw = not_intel();
    let result = bringup_core(&hw, 0, &config(ReadinessMode::ShortCircuit, false));
    let err = match result {
        Err(err) => err,
        Ok(_) => panic!("Unexpected success"),
    };
    assert!(format!("{}", err).starts_with("not ready: wrong vendor"));
}
