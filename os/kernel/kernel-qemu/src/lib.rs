//! # QEMU Debug Console
//!
//! Diagnostic output for a kernel running under QEMU, written byte by byte to
//! the Bochs/QEMU debug port `0xE9`. Capture it on the host with
//!
//! ```bash
//! qemu-system-i386 -kernel kernel.elf -debugcon stdio
//! ```
//!
//! Two front-ends share the port:
//!
//! - [`QemuLogger`], a [`log::Log`] backend; install it once with
//!   [`QemuLogger::init`] and use the `log` macros everywhere else.
//! - [`qemu_trace!`], raw `format_args!`-style output that bypasses `log`,
//!   for the moments the logger is not set up yet.
//!
//! Port I/O is only compiled for bare-metal 32-bit x86 builds with the
//! `enabled` feature (the default). Everywhere else, including host test
//! builds, output is discarded.
//!
//! ```rust,no_run
//! use kernel_qemu::QemuLogger;
//! use log::{LevelFilter, info};
//!
//! QemuLogger::new(LevelFilter::Debug).init().ok();
//! info!("memory subsystem up");
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;

pub use logger::QemuLogger;

/// The Bochs/QEMU `debugcon` port.
pub const QEMU_DEBUG_PORT: u16 = 0xE9;

#[cfg(all(feature = "enabled", target_arch = "x86", target_os = "none"))]
#[doc(hidden)]
pub mod qemu_fmt {
    use super::QEMU_DEBUG_PORT;
    use core::fmt::{self, Write};

    #[allow(clippy::inline_always)]
    #[inline(always)]
    pub fn dbg_putc(c: u8) {
        // SAFETY: writing the debug port has no effect besides the output.
        unsafe {
            core::arch::asm!(
                "out dx, al",
                in("dx") QEMU_DEBUG_PORT,
                in("al") c,
                options(nomem, nostack, preserves_flags)
            );
        }
    }

    pub struct QemuSink;

    impl Write for QemuSink {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            for b in s.bytes() {
                dbg_putc(b);
            }
            Ok(())
        }
    }

    #[doc(hidden)]
    #[inline]
    pub fn qemu_write(args: fmt::Arguments) {
        // Best effort: nobody to report a failed debug write to.
        let _ = fmt::write(&mut QemuSink, args);
    }
}

#[cfg(not(all(feature = "enabled", target_arch = "x86", target_os = "none")))]
#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt;

    #[doc(hidden)]
    #[inline(always)]
    #[allow(clippy::inline_always, clippy::needless_pass_by_value)]
    pub fn qemu_write(_: fmt::Arguments) {}
}

/// `format_args!`-style output straight to the debug port.
#[macro_export]
macro_rules! qemu_trace {
    ($($arg:tt)*) => {{
        $crate::qemu_fmt::qemu_write(core::format_args!($($arg)*));
    }};
}
