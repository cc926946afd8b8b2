//! Kernel logging.
//!
//! All diagnostic output funnels through a single **backend** function
//! pointer registered by the platform layer (COM1 on x86_64, the SBI debug
//! console on RISC-V).  Until a backend is registered, lines are dropped.
//!
//! # Serialisation
//!
//! Several processors log concurrently during bring-up.  Every line is
//! handed to the backend while holding [`CONSOLE_LOCK`], so lines from
//! different processors never interleave.  A backend must therefore never
//! log through klog itself.

use core::fmt;
use core::sync::atomic::{AtomicPtr, AtomicU8, Ordering};

use crate::spinlock::SpinLock;

// ---------------------------------------------------------------------------
// Log levels
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KlogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl KlogLevel {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => KlogLevel::Error,
            1 => KlogLevel::Warn,
            2 => KlogLevel::Info,
            3 => KlogLevel::Debug,
            _ => KlogLevel::Trace,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        const NAMES: [(&str, KlogLevel); 5] = [
            ("error", KlogLevel::Error),
            ("warn", KlogLevel::Warn),
            ("info", KlogLevel::Info),
            ("debug", KlogLevel::Debug),
            ("trace", KlogLevel::Trace),
        ];
        NAMES
            .iter()
            .find(|(name, _)| value.eq_ignore_ascii_case(name))
            .map(|&(_, level)| level)
    }
}

static CURRENT_LEVEL: AtomicU8 = AtomicU8::new(KlogLevel::Info as u8);

#[inline(always)]
fn is_enabled(level: KlogLevel) -> bool {
    level as u8 <= CURRENT_LEVEL.load(Ordering::Relaxed)
}

// ---------------------------------------------------------------------------
// Backend dispatch
// ---------------------------------------------------------------------------

/// Signature of a klog backend.
///
/// The backend writes the formatted text followed by a newline.
pub type KlogBackend = fn(fmt::Arguments<'_>);

/// Stored as a raw pointer; `null` means "no sink yet".
static BACKEND: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

/// Serialises console output across processors.
pub static CONSOLE_LOCK: SpinLock<()> = SpinLock::new(());

#[inline]
fn dispatch(args: fmt::Arguments<'_>) {
    let ptr = BACKEND.load(Ordering::Acquire);
    if ptr.is_null() {
        return;
    }
    // SAFETY: `klog_register_backend` only stores valid `KlogBackend` fn
    // pointers, which are pointer sized on every supported target.
    let backend: KlogBackend = unsafe { core::mem::transmute::<*mut (), KlogBackend>(ptr) };
    let _console = CONSOLE_LOCK.lock();
    backend(args);
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

pub fn klog_register_backend(backend: KlogBackend) {
    BACKEND.store(backend as *mut (), Ordering::Release);
}

pub fn klog_init(level: KlogLevel) {
    CURRENT_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn klog_set_level(level: KlogLevel) {
    CURRENT_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn klog_get_level() -> KlogLevel {
    KlogLevel::from_raw(CURRENT_LEVEL.load(Ordering::Relaxed))
}

/// Emit a formatted log line at the given level.
///
/// The backend appends the trailing newline; callers should not include one.
pub fn log_args(level: KlogLevel, args: fmt::Arguments<'_>) {
    if !is_enabled(level) {
        return;
    }
    dispatch(args);
}

// ---------------------------------------------------------------------------
// Line-buffered writer
// ---------------------------------------------------------------------------

const LINE_CAPACITY: usize = 1024;
const TRUNCATED_MARK: &str = " ...";

/// `fmt::Write` adapter that turns a stream of text into klog lines.
///
/// Text is buffered until a newline and then emitted as one line at the
/// writer's level.  A line never splits: text past the buffer is dropped
/// and the line ends with ` ...`.  Call [`LineWriter::flush`] (or drop the
/// writer) to emit a trailing partial line.
pub struct LineWriter {
    level: KlogLevel,
    buf: [u8; LINE_CAPACITY],
    len: usize,
    truncated: bool,
}

impl LineWriter {
    pub const fn new(level: KlogLevel) -> Self {
        Self {
            level,
            buf: [0; LINE_CAPACITY],
            len: 0,
            truncated: false,
        }
    }

    pub fn flush(&mut self) {
        if self.len == 0 {
            return;
        }
        // Only whole `&str` fragments or ASCII bytes are pushed, but a split
        // may land inside a multi-byte character; show what is valid.
        let text = match core::str::from_utf8(&self.buf[..self.len]) {
            Ok(text) => text,
            Err(e) => {
                // SAFETY: `valid_up_to` marks a UTF-8 boundary.
                unsafe { core::str::from_utf8_unchecked(&self.buf[..e.valid_up_to()]) }
            }
        };
        let mark = if self.truncated { TRUNCATED_MARK } else { "" };
        log_args(self.level, format_args!("{}{}", text, mark));
        self.len = 0;
        self.truncated = false;
    }

    fn push(&mut self, byte: u8) {
        if byte == b'\n' {
            // Blank lines still go out so rendered output keeps its shape.
            if self.len == 0 {
                log_args(self.level, format_args!(""));
            } else {
                self.flush();
            }
            return;
        }
        if self.len == LINE_CAPACITY {
            self.truncated = true;
            return;
        }
        self.buf[self.len] = byte;
        self.len += 1;
    }
}

impl fmt::Write for LineWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &b in s.as_bytes() {
            self.push(b);
        }
        Ok(())
    }
}

impl Drop for LineWriter {
    fn drop(&mut self) {
        self.flush();
    }
}

// ---------------------------------------------------------------------------
// Macros
// ---------------------------------------------------------------------------

#[macro_export]
macro_rules! klog {
    ($level:expr, $($arg:tt)*) => {{
        $crate::klog::log_args($level, ::core::format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! klog_error {
    ($($arg:tt)*) => {
        $crate::klog::log_args($crate::klog::KlogLevel::Error, ::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_warn {
    ($($arg:tt)*) => {
        $crate::klog::log_args($crate::klog::KlogLevel::Warn, ::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_info {
    ($($arg:tt)*) => {
        $crate::klog::log_args($crate::klog::KlogLevel::Info, ::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_debug {
    ($($arg:tt)*) => {
        $crate::klog::log_args($crate::klog::KlogLevel::Debug, ::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_trace {
    ($($arg:tt)*) => {
        $crate::klog::log_args($crate::klog::KlogLevel::Trace, ::core::format_args!($($arg)*))
    };
}
