//! Typed operations against the HP-3478A: command, read, status, mode
//! select, and display write.

use bitflags::bitflags;

use crate::error::BridgeError;
use crate::gpib_session::{Role, Session};
use crate::gpib_transport::{self, RecvOutcome, Stop, TermSet};
use crate::reading::Reading;
use crate::signal_io::GpibBus;
use crate::timebase::Clock;

bitflags! {
    /// Flags for [`Instrument::cmd`].
    #[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
    pub struct CmdFlags: u8 {
        /// Keep the controller addressed as talker/listener afterward
        /// instead of unaddressing.
        const KEEP_TALKER = 0b001;
        const KEEP_REN    = 0b010;
        const APPEND_LF   = 0b100;
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum Function {
    DcV,
    AcV,
    Ohm2W,
    Ohm4W,
    DcA,
    AcA,
    OhmExtended,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum Digits {
    D3_5,
    D4_5,
    D5_5,
}

/// Function/range/digits triple, byte 0 of the `B` status response.
#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub struct FunctionRangeDigits {
    pub function: Function,
    pub range: u8,
    pub digits: Digits,
}

bitflags! {
    /// Byte 1 of the `B` status response.
    #[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
    pub struct Modes: u8 {
        const INTERNAL_TRIGGER = 0b0000_0001;
        const AUTORANGE        = 0b0000_0010;
        const AUTOZERO         = 0b0000_0100;
        const LINE_50HZ        = 0b0000_1000;
        const FRONT_INPUT      = 0b0001_0000;
        const CAL_ENABLED      = 0b0010_0000;
        const EXT_TRIGGER      = 0b0100_0000;
    }
}

bitflags! {
    /// Byte 3 of the `B` status response: the live status bits.
    #[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
    pub struct StatusByte: u8 {
        const DREADY  = 0b0000_0001;
        const SYNERR  = 0b0000_0010;
        const INTERR  = 0b0000_0100;
        const FRPSRQ  = 0b0000_1000;
        const INVCAL  = 0b0001_0000;
        const SRQMSG  = 0b0010_0000;
        const PWRSRQ  = 0b0100_0000;
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub struct InstrumentStatus {
    pub function_range_digits: FunctionRangeDigits,
    pub modes: Modes,
    pub srq_mask: u8,
    pub status: StatusByte,
    pub reserved: u8,
}

/// SRQ falls ~250us after `K`/`M`; callers must wait this long before
/// trusting a fresh sample.
pub const SRQ_SETTLE_AFTER_K_OR_M_US: u32 = 400;

/// Every command line is LF-terminated so an aborted command still
/// completes the handshake.
pub const COMMAND_TERMINATOR: u8 = b'\n';

/// A handle to the 3478A at a fixed GPIB address.
pub struct Instrument {
    pub addr: u8,
}

impl Instrument {
    pub fn new(addr: u8) -> Self {
        Self { addr }
    }

    /// Send an ASCII command to the 3478A as listener.
    pub fn cmd<B: GpibBus, C: Clock>(
        &self,
        session: &mut Session,
        bus: &mut B,
        clock: &C,
        bytes: &[u8],
        flags: CmdFlags,
    ) -> Result<(), BridgeError> {
        session.ensure_addressed(bus, clock, self.addr, Role::Listener);
        bus.configure_talker();

        let term = if flags.contains(CmdFlags::APPEND_LF) {
            TermSet::LF
        } else {
            TermSet::empty()
        };
        let sent = gpib_transport::transmit(bus, clock, bytes, term);
        let expected = bytes.len() + if flags.contains(CmdFlags::APPEND_LF) { 1 } else { 0 };

        if sent != expected {
            // On failure the session is torn down to untalked state with
            // ATN and REN released, unless the caller asked to keep REN up
            // across the failure.
            if flags.contains(CmdFlags::KEEP_REN) {
                bus.set_atn(false);
            } else {
                session.abort(bus);
            }
            return Err(BridgeError::Timeout(sent));
        }

        if !flags.contains(CmdFlags::KEEP_TALKER) {
            session.unaddress(bus, clock);
        }
        Ok(())
    }

    /// Address the 3478A as talker and read until EOI or `buf` is full.
    pub fn read<B: GpibBus, C: Clock>(
        &self,
        session: &mut Session,
        bus: &mut B,
        clock: &C,
        buf: &mut [u8],
        flags: CmdFlags,
    ) -> Result<RecvOutcome, BridgeError> {
        session.ensure_addressed(bus, clock, self.addr, Role::Talker);
        bus.configure_listener();
        let outcome = gpib_transport::receive(bus, clock, buf, TermSet::EOI);

        if !flags.contains(CmdFlags::KEEP_TALKER) {
            session.unaddress(bus, clock);
        }

        match outcome.stop {
            Stop::Timeout => {
                session.abort(bus);
                Err(BridgeError::Timeout(outcome.len))
            }
            _ => Ok(outcome),
        }
    }

    /// Serial poll.
    pub fn get_srq_status<B: GpibBus, C: Clock>(
        &self,
        session: &mut Session,
        bus: &mut B,
        clock: &C,
    ) -> Result<u8, BridgeError> {
        session
            .serial_poll(bus, clock, self.addr)
            .ok_or(BridgeError::Protocol)
    }

    /// Issue `B` and parse the 5-byte status response.
    pub fn get_status<B: GpibBus, C: Clock>(
        &self,
        session: &mut Session,
        bus: &mut B,
        clock: &C,
    ) -> Result<InstrumentStatus, BridgeError> {
        self.cmd(session, bus, clock, b"B", CmdFlags::APPEND_LF)?;
        let mut buf = [0u8; 5];
        let outcome = self.read(session, bus, clock, &mut buf, CmdFlags::empty())?;
        if outcome.len < 5 {
            return Err(BridgeError::Protocol);
        }
        Ok(parse_status(&buf))
    }

    /// Read the current reading as ASCII and parse it.
    pub fn get_reading<B: GpibBus, C: Clock>(
        &self,
        session: &mut Session,
        bus: &mut B,
        clock: &C,
    ) -> Result<Reading, BridgeError> {
        let mut buf = [0u8; 16];
        let outcome = self.read(session, bus, clock, &mut buf, CmdFlags::empty())?;
        Reading::parse(&buf[..outcome.len])
    }

    /// Write `s` to the 12-char display.
    pub fn display<B: GpibBus, C: Clock>(
        &self,
        session: &mut Session,
        bus: &mut B,
        clock: &C,
        s: &[u8],
        hide_annunciators: bool,
    ) -> Result<(), BridgeError> {
        if s.len() > 12 {
            return Err(BridgeError::DisplayTooLong);
        }
        let prefix: &[u8] = if hide_annunciators { b"D3" } else { b"D2" };
        let mut line = [0u8; 14];
        line[..prefix.len()].copy_from_slice(prefix);
        line[prefix.len()..prefix.len() + s.len()].copy_from_slice(s);
        self.cmd(
            session,
            bus,
            clock,
            &line[..prefix.len() + s.len()],
            CmdFlags::APPEND_LF,
        )
    }

    /// Translate the desired function/range/digits/trigger/autozero/
    /// autorange combination into `R__ N_ F_ Z_ T_`.
    pub fn set_mode<B: GpibBus, C: Clock>(
        &self,
        session: &mut Session,
        bus: &mut B,
        clock: &C,
        frd: FunctionRangeDigits,
        modes: Modes,
    ) -> Result<(), BridgeError> {
        let range_letter = range_letter(frd.function, frd.range)?;
        let n = match frd.digits {
            Digits::D3_5 => b'3',
            Digits::D4_5 => b'4',
            Digits::D5_5 => b'5',
        };
        let z = if modes.contains(Modes::AUTOZERO) { b'1' } else { b'0' };
        let t = if modes.contains(Modes::INTERNAL_TRIGGER) { b'1' } else { b'3' };

        let mut buf = [0u8; 24];
        let mut w = 0usize;
        buf[w] = b'R';
        w += 1;
        let digits_written = write_signed(&mut buf[w..], range_letter);
        w += digits_written;
        buf[w] = b' ';
        w += 1;
        buf[w] = b'N';
        w += 1;
        buf[w] = n;
        w += 1;
        buf[w] = b' ';
        w += 1;
        buf[w] = b'F';
        w += 1;
        buf[w] = function_letter(frd.function);
        w += 1;
        buf[w] = b' ';
        w += 1;
        buf[w] = b'Z';
        w += 1;
        buf[w] = z;
        w += 1;
        buf[w] = b' ';
        w += 1;
        buf[w] = b'T';
        w += 1;
        buf[w] = t;
        w += 1;

        self.cmd(session, bus, clock, &buf[..w], CmdFlags::APPEND_LF)
    }
}

/// The range letter depends on the function: current uses `-1, 0`; ACV
/// uses `-1..=3`; DCV uses `-3..=2`; resistance uses `0..=7`.
fn range_letter(function: Function, range: u8) -> Result<i8, BridgeError> {
    let signed_range = range as i8;
    let ok = match function {
        Function::DcA | Function::AcA => (-1..=0).contains(&signed_range),
        Function::AcV => (-1..=3).contains(&signed_range),
        Function::DcV => (-3..=2).contains(&signed_range),
        Function::Ohm2W | Function::Ohm4W | Function::OhmExtended => (0..=7).contains(&signed_range),
    };
    if ok {
        Ok(signed_range)
    } else {
        Err(BridgeError::Config)
    }
}

fn function_letter(function: Function) -> u8 {
    match function {
        Function::DcV => b'1',
        Function::AcV => b'2',
        Function::Ohm2W => b'3',
        Function::Ohm4W => b'4',
        Function::DcA => b'5',
        Function::AcA => b'6',
        Function::OhmExtended => b'7',
    }
}

fn write_signed(out: &mut [u8], value: i8) -> usize {
    let mut w = 0;
    let mag = if value < 0 {
        out[w] = b'-';
        w += 1;
        (-value) as u8
    } else {
        value as u8
    };
    if mag >= 10 {
        out[w] = b'0' + mag / 10;
        w += 1;
    }
    out[w] = b'0' + mag % 10;
    w += 1;
    w
}

fn parse_status(buf: &[u8; 5]) -> InstrumentStatus {
    let function = match buf[0] & 0b111 {
        1 => Function::DcV,
        2 => Function::AcV,
        3 => Function::Ohm2W,
        4 => Function::Ohm4W,
        5 => Function::DcA,
        6 => Function::AcA,
        _ => Function::OhmExtended,
    };
    let range = (buf[0] >> 3) & 0b111;
    let digits = match (buf[0] >> 6) & 0b11 {
        0 => Digits::D5_5,
        1 => Digits::D4_5,
        _ => Digits::D3_5,
    };

    InstrumentStatus {
        function_range_digits: FunctionRangeDigits { function, range, digits },
        modes: Modes::from_bits_truncate(buf[1]),
        srq_mask: buf[2],
        status: StatusByte::from_bits_truncate(buf[3]),
        reserved: buf[4],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal_io::test_support::*;
    use crate::timebase::SharedClock;

    fn ready_pins() -> TestPins {
        let mut pins = test_pins();
        pins.nrfd.asserted.set(false);
        pins.ndac.asserted.set(false);
        pins
    }

    #[test]
    fn display_rejects_too_long_string() {
        let instrument = Instrument::new(23);
        let mut pins = ready_pins();
        let mut session = Session::new(21);
        let clock = SharedClock::new();
        let err = instrument
            .display(&mut session, &mut pins, &clock, b"0123456789AB", false)
            .unwrap_err();
        assert_eq!(err, BridgeError::DisplayTooLong);
    }

    #[test]
    fn set_mode_rejects_out_of_range_dcv_range() {
        let frd = FunctionRangeDigits {
            function: Function::DcV,
            range: 9,
            digits: Digits::D4_5,
        };
        assert_eq!(range_letter(frd.function, frd.range), Err(BridgeError::Config));
    }

    #[test]
    fn set_mode_accepts_valid_dcv_range() {
        let frd = FunctionRangeDigits {
            function: Function::DcV,
            range: 0,
            digits: Digits::D4_5,
        };
        assert!(range_letter(frd.function, frd.range).is_ok());
    }

    #[test]
    fn parse_status_extracts_flags() {
        let buf = [0b0100_1001u8, Modes::AUTOZERO.bits(), 0, StatusByte::DREADY.bits() | StatusByte::FRPSRQ.bits(), 0];
        let status = parse_status(&buf);
        assert_eq!(status.function_range_digits.function, Function::DcA);
        assert!(status.status.contains(StatusByte::DREADY));
        assert!(status.status.contains(StatusByte::FRPSRQ));
        assert!(status.modes.contains(Modes::AUTOZERO));
    }
}
