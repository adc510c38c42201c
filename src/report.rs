//! Bring-up report
//!
//! Aggregates the outcome of every core and turns it into the exit status reported to QEMU.

use qemu::ExitCode;
use spin::Mutex;
use vmx::{ControlRegister, FailureClass, VmxControls, VmxError};

use crate::bringup::BringupError;

pub const MAX_CPU_NUM: usize = 256;

/// The report shared by all cores.
pub static REPORT: Mutex<BringupReport> = Mutex::new(BringupReport::new());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreStatus {
    Ready,
    NotReady(FailureClass),
    ControlConflict(ControlRegister),
    VerificationFailed(VmxError),
}

impl CoreStatus {
    pub fn from_result(result: &Result<VmxControls, BringupError>) -> Self {
        match result {
            Ok(_) => CoreStatus::Ready,
            Err(BringupError::NotReady(outcome)) => CoreStatus::NotReady(
                outcome
                    .first_failure()
                    .map_or(FailureClass::HardwareMismatch, |failure| failure.class()),
            ),
            Err(BringupError::Conflict(failure)) => CoreStatus::ControlConflict(failure.register),
            Err(BringupError::Verification(err)) => CoreStatus::VerificationFailed(*err),
        }
    }

    pub fn exit_code(self) -> ExitCode {
        match self {
            CoreStatus::Ready => ExitCode::Success,
            CoreStatus::NotReady(_) => ExitCode::NotReady,
            CoreStatus::ControlConflict(_) => ExitCode::ControlConflict,
            CoreStatus::VerificationFailed(_) => ExitCode::VerificationFailed,
        }
    }
}

pub struct BringupReport {
    cores: [Option<CoreStatus>; MAX_CPU_NUM],
    /// Cores `0..expected` must all report.
    expected: usize,
}

impl BringupReport {
    pub const fn new() -> Self {
        Self {
            cores: [None; MAX_CPU_NUM],
            expected: 0,
        }
    }

    /// Sets the number of cores that must run the hypervisor, cores `0..count` are expected to
    /// report.
    pub fn expect_cores(&mut self, count: usize) {
        if count > MAX_CPU_NUM {
            log::warn!(
                "{} cores expected, only {} can be recorded",
                count,
                MAX_CPU_NUM
            );
        }
        self.expected = count.min(MAX_CPU_NUM);
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Expected cores that did not report yet.
    pub fn missing(&self) -> impl Iterator<Item = usize> + '_ {
        self.cores[..self.expected]
            .iter()
            .enumerate()
            .filter(|(_, status)| status.is_none())
            .map(|(core_id, _)| core_id)
    }

    /// Records the status of a core, replacing any previous one.
    pub fn record(&mut self, core_id: usize, status: CoreStatus) {
        match self.cores.get_mut(core_id) {
            Some(slot) => *slot = Some(status),
            None => log::warn!("CPU {}: id out of range, status not recorded", core_id),
        }
    }

    pub fn record_result(&mut self, core_id: usize, result: &Result<VmxControls, BringupError>) {
        self.record(core_id, CoreStatus::from_result(result));
    }

    pub fn status(&self, core_id: usize) -> Option<CoreStatus> {
        self.cores.get(core_id).copied().flatten()
    }

    /// Number of cores recorded so far.
    pub fn recorded(&self) -> usize {
        self.cores.iter().flatten().count()
    }

    /// Success only if at least one core was recorded, every expected core reported and all of
    /// them are ready. Otherwise the code of the failing core with the lowest id, a missing core
    /// counting as failed.
    pub fn exit_code(&self) -> ExitCode {
        if self.recorded() == 0 {
            return ExitCode::Failure;
        }
        self.cores
            .iter()
            .enumerate()
            .filter_map(|(core_id, status)| match status {
                Some(status) => Some(status.exit_code()),
                None if core_id < self.expected => Some(ExitCode::MissingCore),
                None => None,
            })
            .find(|code| !code.is_success())
            .unwrap_or(ExitCode::Success)
    }

    /// Logs the verdict and reports it to QEMU.
    pub fn finish(&self) -> ExitCode {
        let code = self.exit_code();
        if code.is_success() {
            log::info!("VMX ready on {} core(s)", self.recorded());
        } else {
            for core_id in self.missing() {
                log::error!("CPU {}: never reported", core_id);
            }
            for (core_id, status) in self.cores.iter().enumerate() {
                if let Some(status) = status {
                    if *status != CoreStatus::Ready {
                        log::error!("CPU {}: {:?}", core_id, status);
                    }
                }
            }
            log::error!("VMX bring-up failed: {}", code.to_str());
        }

        #[cfg(target_arch = "x86_64")]
        qemu::exit(code);
        code
    }
}

impl Default for BringupReport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use vmx::VmxFieldError;

    #[test]
    fn empty_report_fails() {
        let report = BringupReport::new();
        assert_eq!(report.recorded(), 0);
        assert_eq!(report.exit_code(), ExitCode::Failure);
    }

    #[test]
    fn all_ready() {
        let mut report = BringupReport::new();
        report.record(0, CoreStatus::Ready);
        report.record(3, CoreStatus::Ready);
        assert_eq!(report.recorded(), 2);
        assert_eq!(report.status(3), Some(CoreStatus::Ready));
        assert_eq!(report.status(1), None);
        assert_eq!(report.exit_code(), ExitCode::Success);
    }

    #[test]
    fn lowest_failing_core_wins() {
        let mut report = BringupReport::new();
        report.record(0, CoreStatus::Ready);
        report.record(
            5,
            CoreStatus::VerificationFailed(VmxError::Disallowed1(VmxFieldError::ExitControls, 22)),
        );
        report.record(2, CoreStatus::ControlConflict(ControlRegister::Entry));
        assert_eq!(report.exit_code(), ExitCode::ControlConflict);

        report.record(2, CoreStatus::Ready);
        assert_eq!(report.exit_code(), ExitCode::VerificationFailed);
    }

    #[test]
    fn missing_core_fails() {
        let mut report = BringupReport::new();
        report.expect_cores(4);
        report.record(0, CoreStatus::Ready);
        assert_eq!(report.missing().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(report.exit_code(), ExitCode::MissingCore);

        for core_id in 1..4 {
            report.record(core_id, CoreStatus::Ready);
        }
        assert_eq!(report.missing().count(), 0);
        assert_eq!(report.exit_code(), ExitCode::Success);
    }

    #[test]
    fn missing_core_after_failing_one() {
        let mut report = BringupReport::new();
        report.expect_cores(3);
        report.record(0, CoreStatus::Ready);
        report.record(1, CoreStatus::NotReady(FailureClass::FirmwarePolicy));
        assert_eq!(report.exit_code(), ExitCode::NotReady);

        report.record(1, CoreStatus::Ready);
        assert_eq!(report.exit_code(), ExitCode::MissingCore);
    }

    #[test]
    fn expected_cores_are_capped() {
        let mut report = BringupReport::new();
        report.expect_cores(MAX_CPU_NUM + 1);
        assert_eq!(report.expected(), MAX_CPU_NUM);
    }

    #[test]
    fn out_of_range_core() {
        let mut report = BringupReport::new();
        report.record(MAX_CPU_NUM, CoreStatus::Ready);
        assert_eq!(report.recorded(), 0);
        assert_eq!(report.status(MAX_CPU_NUM), None);
    }
}
