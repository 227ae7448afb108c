//! GPIB session: addressing, REN management, serial poll.

use crate::gpib_transport::{self, RecvOutcome, Stop, TermSet};
use crate::signal_io::GpibBus;
use crate::timebase::Clock;

/// `UNL`/`UNT` (unlisten/untalk) bus-command bytes.
pub const UNL: u8 = b'_';
pub const UNT: u8 = b'?';
/// Serial-poll-enable / serial-poll-disable bus commands.
pub const SPE: u8 = 0x18;
pub const SPD: u8 = 0x19;

/// My Talk Address base (ASCII 0x40 + addr) and My Listen Address base
/// (ASCII 0x20 + addr), per IEEE-488.1.
const MTA_BASE: u8 = 0x40;
const MLA_BASE: u8 = 0x20;

#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum SessionPhase {
    Idle,
    ControllerIsTalker,
    ControllerIsListener,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum Role {
    Talker,
    Listener,
}

/// A GPIB session: exactly one controller, lazily (re)computed addressing.
pub struct Session {
    pub phase: SessionPhase,
    pub ren_asserted: bool,
    controller_addr: u8,
    addressed: Option<(u8, Role)>,
}

impl Session {
    pub const fn new(controller_addr: u8) -> Self {
        Self {
            phase: SessionPhase::Idle,
            ren_asserted: false,
            controller_addr,
            addressed: None,
        }
    }

    pub fn controller_addr(&self) -> u8 {
        self.controller_addr
    }

    pub fn set_controller_addr(&mut self, addr: u8) {
        self.controller_addr = addr;
    }

    pub fn assert_ren<B: GpibBus>(&mut self, bus: &mut B) {
        bus.set_ren(true);
        self.ren_asserted = true;
    }

    pub fn release_ren<B: GpibBus>(&mut self, bus: &mut B) {
        bus.set_ren(false);
        self.ren_asserted = false;
    }

    /// Pulse IFC for the caller-supplied duration (the shell's `I`
    /// command); this also returns the session to an unaddressed idle
    /// phase.
    pub fn pulse_ifc<B: GpibBus>(&mut self, bus: &mut B, ms: u32) {
        bus.set_ifc(true);
        bus.delay_ms(ms);
        bus.set_ifc(false);
        self.phase = SessionPhase::Idle;
        self.addressed = None;
    }

    /// Address `addr` as `role`, issuing the MTA/MLA/UNL/UNT dance under ATN only if the bus isn't already addressed that way.
    pub fn ensure_addressed<B: GpibBus, C: Clock>(&mut self, bus: &mut B, clock: &C, addr: u8, role: Role) {
        if self.addressed == Some((addr, role)) {
            return;
        }

        bus.set_atn(true);
        bus.configure_talker();

        // Controller always addresses itself as the complementary role,
        // then the target device as the requested role.
        match role {
            Role::Talker => {
                // Target talks, so the controller addresses itself to
                // listen, then addresses the target to talk.
                gpib_transport::transmit(bus, clock, &[self.controller_addr | MLA_BASE], TermSet::empty());
                gpib_transport::transmit(bus, clock, &[addr | MTA_BASE], TermSet::empty());
                self.phase = SessionPhase::ControllerIsListener;
            }
            Role::Listener => {
                // Target listens, so the controller addresses itself to
                // talk, then addresses the target to listen.
                gpib_transport::transmit(bus, clock, &[self.controller_addr | MTA_BASE], TermSet::empty());
                gpib_transport::transmit(bus, clock, &[addr | MLA_BASE], TermSet::empty());
                self.phase = SessionPhase::ControllerIsTalker;
            }
        }

        bus.set_atn(false);
        self.addressed = Some((addr, role));
    }

    /// Release the current addressing with `UNL`/`UNT` under ATN, e.g. before a serial poll or when switching targets.
    pub fn unaddress<B: GpibBus, C: Clock>(&mut self, bus: &mut B, clock: &C) {
        if self.addressed.is_none() {
            return;
        }
        bus.set_atn(true);
        bus.configure_talker();
        gpib_transport::transmit(bus, clock, &[UNL, UNT], TermSet::empty());
        bus.set_atn(false);
        self.addressed = None;
        self.phase = SessionPhase::Idle;
    }

    /// Serial poll `addr`: `SPE`, address as talker, read one status byte,
    /// `SPD`, untalk.
    pub fn serial_poll<B: GpibBus, C: Clock>(&mut self, bus: &mut B, clock: &C, addr: u8) -> Option<u8> {
        self.unaddress(bus, clock);

        bus.set_atn(true);
        bus.configure_talker();
        gpib_transport::transmit(
            bus,
            clock,
            &[SPE, addr | MTA_BASE, self.controller_addr | MLA_BASE],
            TermSet::empty(),
        );
        bus.set_atn(false);
        self.phase = SessionPhase::ControllerIsListener;

        bus.configure_listener();
        let mut buf = [0u8; 1];
        let RecvOutcome { len, stop } = gpib_transport::receive(bus, clock, &mut buf, TermSet::empty());

        bus.set_atn(true);
        bus.configure_talker();
        gpib_transport::transmit(bus, clock, &[SPD, UNT], TermSet::empty());
        bus.set_atn(false);
        self.phase = SessionPhase::Idle;
        self.addressed = None;

        if len == 1 && !matches!(stop, Stop::Timeout) {
            Some(buf[0])
        } else {
            None
        }
    }

    /// Tear the session down to untalked state with ATN and REN released.
    pub fn abort<B: GpibBus>(&mut self, bus: &mut B) {
        bus.set_atn(false);
        self.release_ren(bus);
        self.addressed = None;
        self.phase = SessionPhase::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal_io::test_support::*;
    use crate::timebase::SharedClock;

    #[test]
    fn ensure_addressed_is_idempotent_when_already_correct() {
        let mut pins = test_pins();
        pins.nrfd.asserted.set(false);
        pins.ndac.asserted.set(false);
        let clock = SharedClock::new();
        let mut session = Session::new(21);

        session.ensure_addressed(&mut pins, &clock, 9, Role::Listener);
        assert_eq!(session.phase, SessionPhase::ControllerIsTalker);

        // Re-addressing the same target/role should be a no-op: ATN should
        // not be asserted again (observable via the ATN pin's latched state
        // returning to released after the first call).
        pins.atn.asserted.set(false);
        session.ensure_addressed(&mut pins, &clock, 9, Role::Listener);
        assert!(!pins.atn.asserted.get());
    }

    #[test]
    fn abort_releases_ren_and_atn() {
        let mut pins = test_pins();
        let mut session = Session::new(21);
        session.assert_ren(&mut pins);
        pins.atn.asserted.set(true);
        session.abort(&mut pins);
        assert!(!pins.ren.asserted.get());
        assert!(!pins.atn.asserted.get());
        assert_eq!(session.phase, SessionPhase::Idle);
    }
}
