//! Crate-wide error type and the sticky per-level error trail.

use core::sync::atomic::{AtomicU8, Ordering};

/// Everything that can go wrong talking to the bus or the instrument.
///
/// `Timeout` carries the partial byte count a transmit/receive managed
/// before its handshake wait expired; callers decide whether a partial
/// count is fatal.
#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum BridgeError {
    /// A handshake wait exceeded its budget. Payload is bytes transferred.
    Timeout(usize),
    /// A 3478A response didn't match the expected shape (e.g. `B` returned
    /// fewer than 5 bytes).
    Protocol,
    /// A configuration option write was out of range, or the option name
    /// is unknown.
    Config,
    /// A display string was longer than the instrument's 12-char field.
    DisplayTooLong,
    /// The signal I/O backend can't tri-state a control line.
    LineDirection,
    /// Nonvolatile store access failed.
    Nv,
}

/// Four nesting levels of "most recent error here", read by the display formatter after three consecutive `Init` failures.
pub struct ErrorTrail {
    levels: [AtomicU8; 4],
}

impl ErrorTrail {
    pub const fn new() -> Self {
        Self {
            levels: [
                AtomicU8::new(0),
                AtomicU8::new(0),
                AtomicU8::new(0),
                AtomicU8::new(0),
            ],
        }
    }

    pub fn record(&self, level: usize, code: u8) {
        if let Some(cell) = self.levels.get(level) {
            cell.store(code, Ordering::Relaxed);
        }
    }

    /// Render as the `E:HHHHHHHH` string shown on the instrument display.
    pub fn format(&self) -> [u8; 10] {
        let mut out = [0u8; 10];
        out[0] = b'E';
        out[1] = b':';
        for (i, cell) in self.levels.iter().enumerate() {
            let byte = cell.load(Ordering::Relaxed);
            let hex = hex_pair(byte);
            out[2 + i * 2] = hex[0];
            out[3 + i * 2] = hex[1];
        }
        out
    }
}

impl Default for ErrorTrail {
    fn default() -> Self {
        Self::new()
    }
}

fn hex_pair(byte: u8) -> [u8; 2] {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    [DIGITS[(byte >> 4) as usize], DIGITS[(byte & 0x0f) as usize]]
}

/// Error code assigned to a `BridgeError` for display in the error trail.
pub fn error_code(err: BridgeError) -> u8 {
    match err {
        BridgeError::Timeout(_) => 0x01,
        BridgeError::Protocol => 0x02,
        BridgeError::Config => 0x03,
        BridgeError::DisplayTooLong => 0x04,
        BridgeError::LineDirection => 0x05,
        BridgeError::Nv => 0x06,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_pair_formats_nibbles() {
        assert_eq!(hex_pair(0xAB), [b'A', b'B']);
        assert_eq!(hex_pair(0x00), [b'0', b'0']);
    }

    #[test]
    fn trail_formats_four_levels() {
        let trail = ErrorTrail::new();
        trail.record(0, 0x01);
        trail.record(1, 0x02);
        trail.record(2, 0x03);
        trail.record(3, 0x04);
        assert_eq!(&trail.format(), b"E:01020304");
    }

    #[test]
    fn trail_ignores_out_of_range_level() {
        let trail = ErrorTrail::new();
        trail.record(4, 0xFF);
        assert_eq!(&trail.format(), b"E:00000000");
    }
}
