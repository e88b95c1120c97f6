//! Host-provided collaborators.
//!
//! The interpreter never touches real hardware, an allocator, or a console
//! directly — every effectful operation goes through one of these traits,
//! injected once at [`crate::AtomBios::new`]. This keeps the crate usable
//! both in a freestanding kernel (register reads hit MMIO) and in a hosted
//! test harness (register reads are looked up in a fixture table).

/// Severity levels for the logging sink, matching the original
/// implementation's `LilradLogType` one-for-one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Verbose,
    Info,
    Warning,
    Error,
}

/// Memory-mapped graphics register access.
pub trait RegisterIo {
    fn reg_read(&mut self, reg: u32) -> u32;
    fn reg_write(&mut self, reg: u32, val: u32);
}

/// Memory controller access. Declared for parity with the original
/// interface; the core VM never calls these (see spec §4.6.2 / §9).
pub trait McIo {
    fn mc_read(&mut self, reg: u32) -> u32;
    fn mc_write(&mut self, reg: u32, val: u32);
}

/// PLL access. Declared for parity with the original interface; the core
/// VM never calls these (see spec §4.6.2 / §9).
pub trait PllIo {
    fn pll_read(&mut self, reg: u32) -> u32;
    fn pll_write(&mut self, reg: u32, val: u32);
}

/// Blocking delay primitives.
pub trait DelaySource {
    fn delay_us(&mut self, us: u32);
    fn delay_ms(&mut self, ms: u32);
}

/// A structured logging sink with severity levels.
pub trait LogSink {
    fn log(&mut self, level: LogLevel, args: core::fmt::Arguments);
}

/// Bundles the five host collaborators so [`crate::AtomBios::new`] takes one
/// argument instead of five.
pub struct Host<'a> {
    pub reg: &'a mut dyn RegisterIo,
    pub mc: &'a mut dyn McIo,
    pub pll: &'a mut dyn PllIo,
    pub delay: &'a mut dyn DelaySource,
    pub log: &'a mut dyn LogSink,
}

impl<'a> Host<'a> {
    pub fn new(
        reg: &'a mut dyn RegisterIo,
        mc: &'a mut dyn McIo,
        pll: &'a mut dyn PllIo,
        delay: &'a mut dyn DelaySource,
        log: &'a mut dyn LogSink,
    ) -> Self {
        Host { reg, mc, pll, delay, log }
    }
}

/// Shorthand for `host.log.log(level, format_args!(...))`, mirroring the
/// original's `lilrad_log(LEVEL, fmt, ...)` call sites.
macro_rules! log {
    ($host:expr, $level:expr, $($arg:tt)*) => {
        $host.log.log($level, format_args!($($arg)*))
    };
}

pub(crate) use log;
