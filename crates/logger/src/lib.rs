//! Logger
//!
//! A `log` sink printing to the QEMU serial port. Records above the level selected at
//! initialization are dropped.
#![cfg_attr(not(test), no_std)]

use core::sync::atomic::{AtomicBool, Ordering};

use log::{LevelFilter, Metadata, Record};
use spin::Mutex;

static LOGGER: LockedLogger = LockedLogger(Mutex::new(Logger {
    level: LevelFilter::Off,
}));
static IS_INITIALIZED: AtomicBool = AtomicBool::new(false);

struct LockedLogger(Mutex<Logger>);

struct Logger {
    level: LevelFilter,
}

impl log::Log for LockedLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.0.lock().enabled(metadata)
    }

    fn log(&self, record: &Record) {
        self.0.lock().log(record)
    }

    fn flush(&self) {}
}

impl Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            #[cfg(target_arch = "x86_64")]
            qemu::_print(core::format_args!(
                "[{} | {}] {}\n",
                record.level(),
                record.target(),
                record.args()
            ));
        }
    }
}

/// Installs the logger, only the first call has an effect.
pub fn init(level: LevelFilter) {
    match IS_INITIALIZED.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst) {
        Ok(_) => {
            LOGGER.0.lock().level = level;
            if log::set_logger(&LOGGER).is_ok() {
                log::set_max_level(level);
            }
        }
        Err(_) => {
            log::warn!("Logger is already initialized, skipping init");
        }
    };
}
