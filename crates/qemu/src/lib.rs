//! QEMU support
//!
//! Serial output and the debug-exit device, used to report the outcome of the bring-up to the
//! host.
#![cfg_attr(not(test), no_std)]

#[cfg(target_arch = "x86_64")]
mod x86_64;

#[cfg(target_arch = "x86_64")]
pub use crate::x86_64::{_print, exit};

// ———————————————————————————— Print Utilities ————————————————————————————— //

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::_print(core::format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", core::format_args!($($arg)*)));
}

// —————————————————————————————— Exiting QEMU —————————————————————————————— //

/// Qemu exit codes
///
/// QEMU reports `(code << 1) | 1` as its own exit status.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u32)]
pub enum ExitCode {
    Success = 0x10,
    Failure = 0x11,
    /// At least one core failed the readiness checks.
    NotReady = 0x12,
    /// The desired controls conflict with the capabilities of at least one core.
    ControlConflict = 0x13,
    /// Resolved controls didn't pass verification.
    VerificationFailed = 0x14,
    /// At least one expected core never reported.
    MissingCore = 0x15,
}

impl ExitCode {
    pub fn to_str(self) -> &'static str {
        match self {
            ExitCode::Success => "Success",
            ExitCode::Failure => "Failure",
            ExitCode::NotReady => "NotReady",
            ExitCode::ControlConflict => "ControlConflict",
            ExitCode::VerificationFailed => "VerificationFailed",
            ExitCode::MissingCore => "MissingCore",
        }
    }

    pub fn is_success(self) -> bool {
        self == ExitCode::Success
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        let codes = [
            ExitCode::Success,
            ExitCode::Failure,
            ExitCode::NotReady,
            ExitCode::ControlConflict,
            ExitCode::VerificationFailed,
            ExitCode::MissingCore,
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(*a as u32, *b as u32);
                assert_ne!(a.to_str(), b.to_str());
            }
        }
        assert!(ExitCode::Success.is_success());
        assert!(!ExitCode::NotReady.is_success());
    }
}
