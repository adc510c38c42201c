//! Bring-up configuration

use log::LevelFilter;
use vmx::{DesiredControls, ReadinessConfig, ReadinessMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BringupConfig {
    /// Whether the readiness checks stop at the first failure.
    pub mode: ReadinessMode,
    pub readiness: ReadinessConfig,
    /// The controls the hypervisor needs.
    pub desired: DesiredControls,
    /// Re-check the resolved controls against fresh capability reads.
    pub verify_controls: bool,
    pub log_level: LevelFilter,
    /// Number of cores that must run the hypervisor.
    pub cores: usize,
}

impl Default for BringupConfig {
    fn default() -> Self {
        let diagnostics = cfg!(feature = "diagnostics");
        Self {
            mode: if diagnostics {
                ReadinessMode::Accumulate
            } else {
                ReadinessMode::ShortCircuit
            },
            readiness: ReadinessConfig::default(),
            desired: DesiredControls::hypervisor(),
            verify_controls: diagnostics,
            log_level: if diagnostics {
                LevelFilter::Debug
            } else {
                LevelFilter::Info
            },
            cores: 1,
        }
    }
}
