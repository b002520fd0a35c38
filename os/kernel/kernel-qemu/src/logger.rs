use crate::qemu_trace;
use core::fmt::{self, Write};
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// `log` backend writing `[LEVEL] target: message` lines to the debug port.
pub struct QemuLogger {
    max_level: LevelFilter,
}

/// The installed instance; filtering happens through `log::max_level`.
static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Trace);

impl QemuLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }

    /// Install the logger and set the global level. Call once during early init.
    ///
    /// # Errors
    /// If another logger is already installed.
    pub fn init(self) -> Result<(), SetLoggerError> {
        log::set_logger(&LOGGER)?;
        log::set_max_level(self.max_level);
        Ok(())
    }
}

/// Format `record` the way it appears on the console.
pub(crate) fn write_record(out: &mut impl Write, record: &Record<'_>) -> fmt::Result {
    writeln!(out, "[{}] {}: {}", record.level(), record.target(), record.args())
}

struct TraceSink;

impl Write for TraceSink {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        qemu_trace!("{s}");
        Ok(())
    }
}

impl Log for QemuLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.max_level && metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let _ = write_record(&mut TraceSink, record);
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;

    #[test]
    fn records_are_one_line_each() {
        let mut out = String::new();
        write_record(
            &mut out,
            &Record::builder()
                .level(Level::Warn)
                .target("kernel_alloc::bootmem")
                .args(format_args!("out of memory for {:#x} bytes", 0x1000))
                .build(),
        )
        .unwrap();
        assert_eq!(
            out,
            "[WARN] kernel_alloc::bootmem: out of memory for 0x1000 bytes\n"
        );
    }

    #[test]
    fn level_filter_applies() {
        let logger = QemuLogger::new(LevelFilter::Info);
        let debug = Metadata::builder().level(Level::Debug).build();
        assert!(!logger.enabled(&debug));
    }
}
