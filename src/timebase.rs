//! Free-running millisecond counter and SRQ edge latch shared with the two
//! interrupt contexts.
//!
//! A pair of atomics stands in for a critical section: every field here
//! fits in one word, so there's nothing a disable-interrupts section would
//! buy over a relaxed load/store.

use core::sync::atomic::{AtomicBool, AtomicU16, Ordering};

/// Anything that can report the current millisecond tick. Implemented by
/// [`SharedClock`]; a plain trait lets transport/protocol code take `&dyn
/// Clock` without depending on the concrete ISR-fed counter, e.g. in tests.
pub trait Clock {
    fn now_ms(&self) -> u16;
}

/// Anything that can report and consume a latched SRQ edge. Split out
/// from [`Clock`] so transport/session code only needs `now_ms` while the
/// event loop, which does rising-edge filtering , can
/// require both.
pub trait SrqEdgeSource {
    fn take_srq_edge(&self) -> bool;
}

impl SrqEdgeSource for SharedClock {
    fn take_srq_edge(&self) -> bool {
        SharedClock::take_srq_edge(self)
    }
}

/// Millisecond counter plus SRQ-edge latch, written from interrupt context,
/// read from the main loop.
pub struct SharedClock {
    ms: AtomicU16,
    srq_edge: AtomicBool,
}

impl SharedClock {
    pub const fn new() -> Self {
        Self {
            ms: AtomicU16::new(0),
            srq_edge: AtomicBool::new(false),
        }
    }

    /// Called from the 1 kHz timer interrupt.
    pub fn on_tick(&self) {
        self.ms.fetch_add(1, Ordering::Relaxed);
    }

    /// Called from the SRQ pin-change interrupt.
    pub fn on_srq_edge(&self) {
        self.srq_edge.store(true, Ordering::Relaxed);
    }

    /// Consume the latched SRQ edge flag (clears it).
    pub fn take_srq_edge(&self) -> bool {
        self.srq_edge.swap(false, Ordering::Relaxed)
    }
}

impl Clock for SharedClock {
    fn now_ms(&self) -> u16 {
        self.ms.load(Ordering::Relaxed)
    }
}

impl Default for SharedClock {
    fn default() -> Self {
        Self::new()
    }
}

/// 16-bit wrap-safe "has this much time elapsed" comparison.
pub fn elapsed_at_least(now: u16, since: u16, budget_ms: u16) -> bool {
    now.wrapping_sub(since) >= budget_ms
}

/// A deadline is either never, "reuse whatever was there before", or a
/// concrete absolute millisecond count.
#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum Deadline {
    Never,
    Continue,
    At(u16),
}

impl Deadline {
    /// True if `now` has reached or passed an `At` deadline. `Never` and `Continue` never fire on their own.
    pub fn due(&self, now: u16) -> bool {
        match self {
            Deadline::At(t) => (now.wrapping_sub(*t) as i16) >= 0,
            _ => false,
        }
    }
}

/// Status LED pacing: off, slow blink, fast blink.
#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum LedMode {
    Off,
    SlowBlink,
    FastBlink,
}

const SLOW_BLINK_PERIOD_MS: u16 = 1000;
const FAST_BLINK_PERIOD_MS: u16 = 200;

/// Whether the LED should be lit at time `now_ms`, for the given mode.
pub fn led_is_lit(mode: LedMode, now_ms: u16) -> bool {
    match mode {
        LedMode::Off => false,
        LedMode::SlowBlink => (now_ms % SLOW_BLINK_PERIOD_MS) < SLOW_BLINK_PERIOD_MS / 2,
        LedMode::FastBlink => (now_ms % FAST_BLINK_PERIOD_MS) < FAST_BLINK_PERIOD_MS / 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_safe_compare_handles_wraparound() {
        // now has wrapped past 0, since was near u16::MAX.
        let since = u16::MAX - 5;
        let now = 10u16;
        assert!(elapsed_at_least(now, since, 16));
        assert!(!elapsed_at_least(now, since, 17));
    }

    #[test]
    fn deadline_never_and_continue_do_not_fire() {
        assert!(!Deadline::Never.due(1_000));
        assert!(!Deadline::Continue.due(1_000));
    }

    #[test]
    fn deadline_at_fires_when_reached() {
        let d = Deadline::At(100);
        assert!(!d.due(99));
        assert!(d.due(100));
        assert!(d.due(101));
    }

    #[test]
    fn srq_edge_latches_and_clears() {
        let clock = SharedClock::new();
        assert!(!clock.take_srq_edge());
        clock.on_srq_edge();
        assert!(clock.take_srq_edge());
        assert!(!clock.take_srq_edge());
    }

    #[test]
    fn led_blink_pacing() {
        assert!(!led_is_lit(LedMode::Off, 0));
        assert!(led_is_lit(LedMode::SlowBlink, 0));
        assert!(!led_is_lit(LedMode::SlowBlink, 600));
        assert!(led_is_lit(LedMode::FastBlink, 0));
        assert!(!led_is_lit(LedMode::FastBlink, 150));
    }
}
