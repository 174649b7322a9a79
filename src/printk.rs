//! Kernel printk with buffering
//!
//! Implements a printk that always works:
//! - Messages are stored in a ring buffer
//! - When a console is attached, buffered messages are flushed and new
//!   messages go to both the buffer and the console
//! - The buffer provides dmesg-like access to boot messages
//!
//! ## SMP Locking
//!
//! Two locks are used to keep messages atomic without holding the buffer
//! lock during console I/O:
//! - PRINTK: protects the ring buffer (short hold time)
//! - CONSOLE: protects the registered console sink

use core::fmt::{self, Write};

use alloc::string::String;

use spin::Mutex;

/// Console sink for printk output
///
/// The kernel registers one of these (serial port, VGA text buffer) once
/// the hardware is up. Until then, messages accumulate in the ring buffer.
pub trait Console: Send + Sync {
    fn write_str(&self, s: &str);
}

/// Ring buffer size (must be a power of 2)
const PRINTK_BUFFER_SIZE: usize = 4096;

/// Ring buffer for printk messages
struct RingBuffer {
    data: [u8; PRINTK_BUFFER_SIZE],
    /// Write position (next byte to write)
    head: usize,
    /// Has the buffer wrapped (overwritten old data)?
    wrapped: bool,
}

impl RingBuffer {
    const fn new() -> Self {
        Self {
            data: [0; PRINTK_BUFFER_SIZE],
            head: 0,
            wrapped: false,
        }
    }

    fn push_str(&mut self, s: &str) {
        for &b in s.as_bytes() {
            self.data[self.head] = b;
            self.head += 1;
            if self.head == PRINTK_BUFFER_SIZE {
                self.head = 0;
                self.wrapped = true;
            }
        }
    }

    /// Reconstruct the buffered text, oldest byte first
    fn snapshot(&self) -> String {
        let mut out = String::with_capacity(PRINTK_BUFFER_SIZE);
        if self.wrapped {
            out.push_str(&String::from_utf8_lossy(&self.data[self.head..]));
        }
        out.push_str(&String::from_utf8_lossy(&self.data[..self.head]));
        out
    }
}

/// Ring buffer - messages always land here first
static PRINTK: Mutex<RingBuffer> = Mutex::new(RingBuffer::new());

/// Registered console sink, if any
static CONSOLE: Mutex<Option<&'static dyn Console>> = Mutex::new(None);

/// Register a console and flush everything buffered so far to it
pub fn register_console(console: &'static dyn Console) {
    let backlog = PRINTK.lock().snapshot();
    console.write_str(&backlog);
    *CONSOLE.lock() = Some(console);
}

/// Return the buffered log text (dmesg-style)
pub fn snapshot() -> String {
    PRINTK.lock().snapshot()
}

struct PrintkWriter;

impl fmt::Write for PrintkWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        PRINTK.lock().push_str(s);
        if let Some(console) = *CONSOLE.lock() {
            console.write_str(s);
        }
        Ok(())
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    // fmt::Write into the ring buffer cannot fail
    let _ = PrintkWriter.write_fmt(args);
}

/// Print to the kernel log without a trailing newline
#[macro_export]
macro_rules! printk {
    ($($arg:tt)*) => ($crate::printk::_print(format_args!($($arg)*)));
}

/// Print to the kernel log with a trailing newline
#[macro_export]
macro_rules! printkln {
    () => ($crate::printk!("\n"));
    ($($arg:tt)*) => ({
        $crate::printk::_print(format_args!($($arg)*));
        $crate::printk::_print(format_args!("\n"));
    });
}
