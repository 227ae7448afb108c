//! The serial command shell: parsing and dispatch.
use crate::error::BridgeError;
use crate::gpib_session::Role;
use crate::gpib_transport::{self, RecvOutcome, Stop, TermSet};
use crate::hp3478a::CmdFlags;
use crate::nvconfig::OptionId;
use crate::FirmwareContext;

#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum ShellCommand {
    C,
    D,
    Thc,
    Thd,
    Tbd,
    P,
    R,
    L,
    I,
    S,
    O,
    H,
    Help,
}

/// The shell never propagates [`BridgeError`] as an `Err` — a wrong
/// command is a local UI error, not a fault. Failures are translated to
/// data one layer up from where `BridgeError` is produced.
#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum ShellResponse {
    Ok,
    Timeout(usize),
    Error,
    /// Payload bytes were written into the caller-supplied output buffer; this carries the length.
    Payload(usize),
}

/// Parse the leading command letter(s), case-insensitively. Returns `None` for an unrecognized command.
pub fn parse_command(line: &[u8]) -> Option<(ShellCommand, &[u8])> {
    if line.is_empty() {
        return None;
    }
    let upper0 = line[0].to_ascii_uppercase();

    // Multi-letter commands are checked first so `T` doesn't shadow them.
    if upper0 == b'T' && line.len() >= 3 {
        let upper1 = line[1].to_ascii_uppercase();
        let upper2 = line[2].to_ascii_uppercase();
        match (upper1, upper2) {
            (b'H', b'C') => return Some((ShellCommand::Thc, &line[3..])),
            (b'H', b'D') => return Some((ShellCommand::Thd, &line[3..])),
            (b'B', b'D') => return Some((ShellCommand::Tbd, &line[3..])),
            _ => {}
        }
    }

    let rest = &line[1..];
    match upper0 {
        b'C' => Some((ShellCommand::C, rest)),
        b'D' => Some((ShellCommand::D, rest)),
        b'P' => Some((ShellCommand::P, rest)),
        b'R' => Some((ShellCommand::R, rest)),
        b'L' => Some((ShellCommand::L, rest)),
        b'I' => Some((ShellCommand::I, rest)),
        b'S' => Some((ShellCommand::S, rest)),
        b'O' => Some((ShellCommand::O, rest)),
        b'H' => Some((ShellCommand::H, rest)),
        b'?' => Some((ShellCommand::Help, rest)),
        _ => None,
    }
}

/// Dispatch a parsed command, writing any payload into `out`. `B`/`C`/`N`/`U`/`T`/`Led` are the context's generic backends (bus, clock, nv-store, UART, tone, LED).
pub fn dispatch<B, C, N, U, T, Led>(
    cmd: ShellCommand,
    args: &[u8],
    ctx: &mut FirmwareContext<B, C, N, U, T, Led>,
    out: &mut [u8],
) -> ShellResponse
where
    B: crate::signal_io::GpibBus,
    C: crate::timebase::Clock,
    N: crate::nvconfig::NvStore,
    U: crate::io::UartIo,
    T: crate::tone_led::ToneGen,
    Led: crate::tone_led::StatusLed,
{
    match cmd {
        ShellCommand::C => send_command(ctx, args),
        ShellCommand::D => data_command(ctx, args, out),
        ShellCommand::Thc => hex_command(ctx, args),
        ShellCommand::Thd => hex_data(ctx, args, out),
        ShellCommand::Tbd => binary_frames(ctx, args, out),
        ShellCommand::P => ShellResponse::Ok, // plotter mode is driven by the event loop, not dispatched here.
        ShellCommand::R => {
            ctx.session.assert_ren(&mut ctx.bus);
            ShellResponse::Ok
        }
        ShellCommand::L => {
            ctx.session.release_ren(&mut ctx.bus);
            ShellResponse::Ok
        }
        ShellCommand::I => {
            ctx.session.pulse_ifc(&mut ctx.bus, 1);
            ShellResponse::Ok
        }
        ShellCommand::S => status_bits(ctx, out),
        ShellCommand::O => option_command(ctx, args, out),
        ShellCommand::H => history_list(ctx, out),
        ShellCommand::Help => help_text(out),
    }
}

fn send_command<B, C, N, U, T, Led>(ctx: &mut FirmwareContext<B, C, N, U, T, Led>, args: &[u8]) -> ShellResponse
where
    B: crate::signal_io::GpibBus,
    C: crate::timebase::Clock,
    N: crate::nvconfig::NvStore,
    U: crate::io::UartIo,
    T: crate::tone_led::ToneGen,
    Led: crate::tone_led::StatusLed,
{
    match ctx.instrument.cmd(&mut ctx.session, &mut ctx.bus, &ctx.clock, args, CmdFlags::empty()) {
        Ok(()) => ShellResponse::Ok,
        Err(BridgeError::Timeout(n)) => ShellResponse::Timeout(n),
        Err(_) => ShellResponse::Error,
    }
}

fn data_command<B, C, N, U, T, Led>(
    ctx: &mut FirmwareContext<B, C, N, U, T, Led>,
    args: &[u8],
    out: &mut [u8],
) -> ShellResponse
where
    B: crate::signal_io::GpibBus,
    C: crate::timebase::Clock,
    N: crate::nvconfig::NvStore,
    U: crate::io::UartIo,
    T: crate::tone_led::ToneGen,
    Led: crate::tone_led::StatusLed,
{
    if !args.is_empty() {
        ctx.session.ensure_addressed(&mut ctx.bus, &ctx.clock, ctx.instrument.addr, Role::Listener);
        ctx.bus.configure_talker();
        let sent = gpib_transport::transmit(&mut ctx.bus, &ctx.clock, args, TermSet::EOI);
        ctx.session.unaddress(&mut ctx.bus, &ctx.clock);
        return if sent != args.len() {
            ShellResponse::Timeout(sent)
        } else {
            ShellResponse::Ok
        };
    }

    ctx.session.ensure_addressed(&mut ctx.bus, &ctx.clock, ctx.instrument.addr, Role::Talker);
    ctx.bus.configure_listener();
    let RecvOutcome { len, stop } = gpib_transport::receive(&mut ctx.bus, &ctx.clock, out, TermSet::EOI | TermSet::LF);
    ctx.session.unaddress(&mut ctx.bus, &ctx.clock);
    match stop {
        Stop::Timeout => ShellResponse::Timeout(len),
        _ => ShellResponse::Payload(len),
    }
}

fn hex_command<B, C, N, U, T, Led>(ctx: &mut FirmwareContext<B, C, N, U, T, Led>, args: &[u8]) -> ShellResponse
where
    B: crate::signal_io::GpibBus,
    C: crate::timebase::Clock,
    N: crate::nvconfig::NvStore,
    U: crate::io::UartIo,
    T: crate::tone_led::ToneGen,
    Led: crate::tone_led::StatusLed,
{
    let mut bytes = [0u8; 32];
    let n = match decode_hex_pairs(args, &mut bytes) {
        Some(n) => n,
        None => return ShellResponse::Error,
    };
    send_command(ctx, &bytes[..n])
}

fn hex_data<B, C, N, U, T, Led>(
    ctx: &mut FirmwareContext<B, C, N, U, T, Led>,
    args: &[u8],
    out: &mut [u8],
) -> ShellResponse
where
    B: crate::signal_io::GpibBus,
    C: crate::timebase::Clock,
    N: crate::nvconfig::NvStore,
    U: crate::io::UartIo,
    T: crate::tone_led::ToneGen,
    Led: crate::tone_led::StatusLed,
{
    // A trailing `;` suppresses EOI on send; on receive the raw bytes are
    // hex-encoded back into `out`.
    let suppress_eoi = args.last() == Some(&b';');
    let hex_args = if suppress_eoi { &args[..args.len() - 1] } else { args };

    if hex_args.is_empty() {
        let mut raw = [0u8; 16];
        let response = data_command(ctx, &[], &mut raw);
        if let ShellResponse::Payload(len) = response {
            let encoded = encode_hex_pairs(&raw[..len], out);
            return ShellResponse::Payload(encoded);
        }
        return response;
    }

    let mut bytes = [0u8; 32];
    let n = match decode_hex_pairs(hex_args, &mut bytes) {
        Some(n) => n,
        None => return ShellResponse::Error,
    };
    let term = if suppress_eoi { TermSet::empty() } else { TermSet::EOI };
    ctx.session.ensure_addressed(&mut ctx.bus, &ctx.clock, ctx.instrument.addr, Role::Listener);
    ctx.bus.configure_talker();
    let sent = gpib_transport::transmit(&mut ctx.bus, &ctx.clock, &bytes[..n], term);
    ctx.session.unaddress(&mut ctx.bus, &ctx.clock);
    if sent != n {
        ShellResponse::Timeout(sent)
    } else {
        ShellResponse::Ok
    }
}

/// Length-prefixed binary framing: high bit of the length byte marks EOI
/// on that frame; `00` is the terminating frame.
fn binary_frames<B, C, N, U, T, Led>(
    ctx: &mut FirmwareContext<B, C, N, U, T, Led>,
    _args: &[u8],
    out: &mut [u8],
) -> ShellResponse
where
    B: crate::signal_io::GpibBus,
    C: crate::timebase::Clock,
    N: crate::nvconfig::NvStore,
    U: crate::io::UartIo,
    T: crate::tone_led::ToneGen,
    Led: crate::tone_led::StatusLed,
{
    ctx.session.ensure_addressed(&mut ctx.bus, &ctx.clock, ctx.instrument.addr, Role::Talker);
    ctx.bus.configure_listener();
    let mut written = 0usize;
    loop {
        if written + 1 > out.len() {
            return ShellResponse::Payload(written);
        }
        let mut frame = [0u8; 127];
        let RecvOutcome { len, stop } = gpib_transport::receive(&mut ctx.bus, &ctx.clock, &mut frame, TermSet::EOI);
        if matches!(stop, Stop::Timeout) {
            ctx.session.unaddress(&mut ctx.bus, &ctx.clock);
            return ShellResponse::Timeout(written);
        }
        let eoi = matches!(stop, Stop::Term(s) if s.contains(TermSet::EOI));
        let header = (len as u8) | if eoi { 0x80 } else { 0 };
        out[written] = header;
        written += 1;
        let copy_len = len.min(out.len() - written);
        out[written..written + copy_len].copy_from_slice(&frame[..copy_len]);
        written += copy_len;
        if len == 0 || eoi {
            break;
        }
    }
    ctx.session.unaddress(&mut ctx.bus, &ctx.clock);
    if written < out.len() {
        out[written] = 0;
        written += 1;
    }
    ShellResponse::Payload(written)
}

fn status_bits<B, C, N, U, T, Led>(ctx: &mut FirmwareContext<B, C, N, U, T, Led>, out: &mut [u8]) -> ShellResponse
where
    B: crate::signal_io::GpibBus,
    C: crate::timebase::Clock,
    N: crate::nvconfig::NvStore,
    U: crate::io::UartIo,
    T: crate::tone_led::ToneGen,
    Led: crate::tone_led::StatusLed,
{
    if out.len() < 3 {
        return ShellResponse::Error;
    }
    out[0] = if ctx.session.ren_asserted { b'1' } else { b'0' };
    out[1] = if ctx.bus.read_srq() { b'1' } else { b'0' };
    out[2] = match ctx.session.phase {
        crate::gpib_session::SessionPhase::ControllerIsListener => b'1',
        _ => b'0',
    };
    ShellResponse::Payload(3)
}

/// `O<opt>[val[w]]`: get or set a configuration option, addressed by its
/// letter mnemonic (`OX1`, `OC25w`, `OBn`); `w` persists. `O0`/`O1` apply
/// the factory defaults.
fn option_command<B, C, N, U, T, Led>(
    ctx: &mut FirmwareContext<B, C, N, U, T, Led>,
    args: &[u8],
    out: &mut [u8],
) -> ShellResponse
where
    B: crate::signal_io::GpibBus,
    C: crate::timebase::Clock,
    N: crate::nvconfig::NvStore,
    U: crate::io::UartIo,
    T: crate::tone_led::ToneGen,
    Led: crate::tone_led::StatusLed,
{
    if args == b"0" {
        return match ctx.options.factory_reset(&mut ctx.nvstore, false) {
            Ok(()) => ShellResponse::Ok,
            Err(_) => ShellResponse::Error,
        };
    }
    if args == b"1" {
        return match ctx.options.factory_reset(&mut ctx.nvstore, true) {
            Ok(()) => ShellResponse::Ok,
            Err(_) => ShellResponse::Error,
        };
    }

    if args.is_empty() {
        return ShellResponse::Error;
    }
    let id = match parse_option_id(args[0].to_ascii_uppercase()) {
        Some(id) => id,
        None => return ShellResponse::Error,
    };
    let rest = &args[1..];

    if rest.is_empty() {
        let value = ctx.options.get(id);
        return write_decimal(value, out);
    }

    let persist = rest.last() == Some(&b'w') || rest.last() == Some(&b'W');
    let value_digits = if persist { &rest[..rest.len() - 1] } else { rest };
    let value = match parse_decimal(value_digits) {
        Some(v) => v,
        None => return ShellResponse::Error,
    };
    match ctx.options.set(&mut ctx.nvstore, id, value, persist) {
        Ok(()) => ShellResponse::Ok,
        Err(_) => ShellResponse::Error,
    }
}

/// The letter mnemonic for each option, in no particular order beyond
/// `X`/`C`/`B` matching the converter's documented shortcuts for
/// extension-enable, converter address, and baud rate.
fn parse_option_id(letter: u8) -> Option<OptionId> {
    Some(match letter {
        b'X' => OptionId::ExtensionEnable,
        b'E' => OptionId::Echo,
        b'C' => OptionId::ConverterAddress,
        b'I' => OptionId::InstrumentAddress,
        b'L' => OptionId::EolMask,
        b'B' => OptionId::BaudRate,
        b'N' => OptionId::InitialMode,
        b'P' => OptionId::BuzzerPeriod,
        b'D' => OptionId::BuzzerDuty,
        b'T' => OptionId::ContinuityThreshold,
        b'R' => OptionId::ContinuityRange,
        b'A' => OptionId::ContinuityLatch,
        b'F' => OptionId::ContinuityBeepLow,
        b'H' => OptionId::ContinuityBeepHigh,
        _ => return None,
    })
}

fn history_list<B, C, N, U, T, Led>(ctx: &mut FirmwareContext<B, C, N, U, T, Led>, out: &mut [u8]) -> ShellResponse
where
    B: crate::signal_io::GpibBus,
    C: crate::timebase::Clock,
    N: crate::nvconfig::NvStore,
    U: crate::io::UartIo,
    T: crate::tone_led::ToneGen,
    Led: crate::tone_led::StatusLed,
{
    let mut w = 0usize;
    for (i, entry) in ctx.history.iter().enumerate() {
        w += write_decimal_into(i as u16, &mut out[w..]);
        if w < out.len() {
            out[w] = b':';
            w += 1;
        }
        if w < out.len() {
            out[w] = b' ';
            w += 1;
        }
        let n = entry.len().min(out.len() - w);
        out[w..w + n].copy_from_slice(&entry.as_bytes()[..n]);
        w += n;
        if w + 2 <= out.len() {
            out[w] = b'\r';
            out[w + 1] = b'\n';
            w += 2;
        }
    }
    ShellResponse::Payload(w)
}

fn help_text(out: &mut [u8]) -> ShellResponse {
    const HELP: &[u8] = b"C D THC THD TBD P R L I S O H ?\r\n";
    let n = HELP.len().min(out.len());
    out[..n].copy_from_slice(&HELP[..n]);
    ShellResponse::Payload(n)
}

fn parse_decimal(s: &[u8]) -> Option<u16> {
    if s.is_empty() {
        return None;
    }
    let mut v: u16 = 0;
    for &b in s {
        if !b.is_ascii_digit() {
            return None;
        }
        v = v.checked_mul(10)?.checked_add((b - b'0') as u16)?;
    }
    Some(v)
}

fn write_decimal(value: u16, out: &mut [u8]) -> ShellResponse {
    let n = write_decimal_into(value, out);
    ShellResponse::Payload(n)
}

fn write_decimal_into(value: u16, out: &mut [u8]) -> usize {
    let mut digits = [0u8; 5];
    let mut n = 0;
    let mut v = value;
    loop {
        digits[n] = b'0' + (v % 10) as u8;
        v /= 10;
        n += 1;
        if v == 0 {
            break;
        }
    }
    let w = n.min(out.len());
    for i in 0..w {
        out[i] = digits[n - 1 - i];
    }
    w
}

fn decode_hex_pairs(s: &[u8], out: &mut [u8]) -> Option<usize> {
    if s.len() % 2 != 0 {
        return None;
    }
    let n = (s.len() / 2).min(out.len());
    for i in 0..n {
        out[i] = (hex_nibble(s[i * 2])? << 4) | hex_nibble(s[i * 2 + 1])?;
    }
    Some(n)
}

fn hex_nibble(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}

fn encode_hex_pairs(bytes: &[u8], out: &mut [u8]) -> usize {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    let n = bytes.len().min(out.len() / 2);
    for (i, &byte) in bytes[..n].iter().enumerate() {
        out[i * 2] = DIGITS[(byte >> 4) as usize];
        out[i * 2 + 1] = DIGITS[(byte & 0x0f) as usize];
    }
    n * 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_letter_commands() {
        assert_eq!(parse_command(b"R").unwrap().0, ShellCommand::R);
        assert_eq!(parse_command(b"r").unwrap().0, ShellCommand::R);
        assert_eq!(parse_command(b"?").unwrap().0, ShellCommand::Help);
    }

    #[test]
    fn parses_three_letter_commands_before_single_letter_t() {
        let (cmd, rest) = parse_command(b"THC4142").unwrap();
        assert_eq!(cmd, ShellCommand::Thc);
        assert_eq!(rest, b"4142");
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(parse_command(b"Z").is_none());
    }

    #[test]
    fn hex_roundtrip() {
        let mut decoded = [0u8; 8];
        let n = decode_hex_pairs(b"4142", &mut decoded).unwrap();
        assert_eq!(&decoded[..n], b"AB");
        let mut encoded = [0u8; 8];
        let m = encode_hex_pairs(&decoded[..n], &mut encoded);
        assert_eq!(&encoded[..m], b"4142");
    }

    #[test]
    fn option_id_parses_known_mnemonics() {
        assert_eq!(parse_option_id(b'C'), Some(OptionId::ConverterAddress));
        assert_eq!(parse_option_id(b'X'), Some(OptionId::ExtensionEnable));
        assert_eq!(parse_option_id(b'Z'), None);
    }

    use crate::io::test_support::MockUart;
    use crate::nvconfig::test_support::MapNvStore;
    use crate::nvconfig::Options;
    use crate::signal_io::test_support::*;
    use crate::timebase::SharedClock;
    use crate::tone_led::test_support::{RecordingLed, RecordingTone};
    use crate::FirmwareContext;

    fn fresh_ctx() -> FirmwareContext<TestPins, SharedClock, MapNvStore, MockUart, RecordingTone, RecordingLed> {
        let store = MapNvStore::default();
        let options = Options::load(&store);
        FirmwareContext::new(test_pins(), SharedClock::new(), store, options, MockUart::new(), RecordingTone::default(), RecordingLed::default(), 21, 23)
    }

    #[test]
    fn option_set_with_letter_mnemonic_and_persist_round_trips() {
        let mut ctx = fresh_ctx();
        let mut out = [0u8; 16];
        assert_eq!(option_command(&mut ctx, b"C25w", &mut out), ShellResponse::Ok);
        match option_command(&mut ctx, b"C", &mut out) {
            ShellResponse::Payload(n) => assert_eq!(&out[..n], b"25"),
            other => panic!("expected payload, got {other:?}"),
        }
    }

    #[test]
    fn option_set_extension_enable_by_mnemonic() {
        let mut ctx = fresh_ctx();
        let mut out = [0u8; 16];
        assert_eq!(option_command(&mut ctx, b"X1", &mut out), ShellResponse::Ok);
        assert_eq!(ctx.options.get(OptionId::ExtensionEnable), 1);
    }

    #[test]
    fn data_command_with_args_sends_instead_of_reading() {
        let mut ctx = fresh_ctx();
        // Pretend a listener immediately frees NRFD/NDAC each byte.
        ctx.bus.nrfd.asserted.set(false);
        ctx.bus.ndac.asserted.set(false);
        let mut out = [0u8; 16];
        assert_eq!(data_command(&mut ctx, b"HELLO", &mut out), ShellResponse::Ok);
    }
}
